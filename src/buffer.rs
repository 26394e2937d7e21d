//! A thread-safe, zero-copy, single-consumer byte buffer.
//!
//! The queueing and slice-draining logic here is grounded on the
//! `ChunkBuffer` in `re_log_encoding`'s stream decoder (a `VecDeque` of
//! owned chunks drained byte-by-byte into a caller-sized window); this
//! module adds the blocking producer/consumer handshake (mutex + condvar,
//! `state` machine, `preserve_data` history) that spec section 4.1 asks for
//! and that a decoupled network/decoder boundary needs.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::error::DecodeError;

/// The lifecycle state of a [`Buffer`]. Monotonic: once not `Open`, never
/// returns to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Open,
    Completed,
    Errored,
}

struct QueuedSlice {
    bytes: Arc<[u8]>,
    consumed: usize,
}

impl QueuedSlice {
    fn remaining(&self) -> &[u8] {
        &self.bytes[self.consumed..]
    }
}

struct Inner {
    queue: VecDeque<QueuedSlice>,
    unread: usize,
    written: usize,
    state: BufferState,
    preserve_data: bool,
    history: Vec<Arc<[u8]>>,
    limit: Option<usize>,
}

struct Shared {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

/// A multi-producer, single-consumer queue of immutable byte slices.
///
/// Cloning a `Buffer` is cheap (it's an `Arc` handle) and is how producers
/// on other threads get their own write-capable reference; there is
/// intentionally no way to clone out a second *reader*, since [`read`]
/// (Buffer::read) is documented as single-consumer.
#[derive(Clone)]
pub struct Buffer {
    shared: Arc<Shared>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Creates an empty, open buffer that does not preserve written slices.
    pub fn new() -> Self {
        Self::with_options(false, None)
    }

    /// Creates a buffer that retains every slice ever written, for the
    /// lifetime of the buffer, accessible via [`all_data`](Self::all_data).
    ///
    /// This is a debugging aid: it doubles memory use for the stream's
    /// lifetime and should not be enabled in production decode paths.
    pub fn with_preserve_data(preserve_data: bool) -> Self {
        Self::with_options(preserve_data, None)
    }

    /// Creates a buffer that closes itself as [`BufferState::Errored`] and
    /// surfaces [`DecodeError::InputTooLarge`] once the aggregate number of
    /// bytes ever written exceeds `max_bytes`.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self::with_options(false, Some(max_bytes))
    }

    fn with_options(preserve_data: bool, limit: Option<usize>) -> Self {
        Buffer {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::new(),
                    unread: 0,
                    written: 0,
                    state: BufferState::Open,
                    preserve_data,
                    history: Vec::new(),
                    limit,
                }),
                condvar: Condvar::new(),
            }),
        }
    }

    /// The buffer's current lifecycle state.
    pub fn state(&self) -> BufferState {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Appends a slice to the tail of the queue.
    ///
    /// A no-op for empty slices, and a no-op (silently) once the buffer is
    /// no longer open - producers are fire-and-forget and should not have to
    /// check state before every write. Safe to call from any thread,
    /// including concurrently with other writers.
    pub fn write(&self, slice: impl Into<Arc<[u8]>>) {
        let slice = slice.into();
        if slice.is_empty() {
            return;
        }
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != BufferState::Open {
            return;
        }
        inner.written += slice.len();
        if let Some(limit) = inner.limit {
            if inner.written > limit {
                inner.state = BufferState::Errored;
                self.shared.condvar.notify_all();
                return;
            }
        }
        inner.unread += slice.len();
        if inner.preserve_data {
            inner.history.push(Arc::clone(&slice));
        }
        inner.queue.push_back(QueuedSlice { bytes: slice, consumed: 0 });
        self.shared.condvar.notify_all();
    }

    /// Transitions the buffer to a terminal state, waking any blocked reader.
    ///
    /// `completed = true` means the producer finished normally;
    /// `completed = false` means it stopped due to error or cancellation.
    /// Idempotent: calls after the first are no-ops.
    pub fn close(&self, completed: bool) {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == BufferState::Open {
            inner.state = if completed { BufferState::Completed } else { BufferState::Errored };
            self.shared.condvar.notify_all();
        }
    }

    /// Blocks until `dst.len()` bytes are available, then copies them in and
    /// advances the read cursor. Returns `false` (without consuming any
    /// bytes) if the buffer terminates with fewer than `dst.len()` unread
    /// bytes remaining.
    ///
    /// Must only ever be called from one thread at a time; the crate's
    /// [`Decoder`](crate::Decoder) upholds that by owning the `Buffer`
    /// exclusively.
    pub fn read(&self, dst: &mut [u8]) -> bool {
        let n = dst.len();
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if inner.unread >= n {
                Self::drain_into(&mut inner, dst);
                return true;
            }
            if inner.state != BufferState::Open {
                return false;
            }
            inner = self.shared.condvar.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Returns all remaining unread bytes as one contiguous buffer.
    ///
    /// Only legal once the buffer has been [`close`](Self::close)d; must not
    /// be interleaved with [`read`](Self::read) calls.
    pub fn read_all(&self) -> Vec<u8> {
        let mut inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        assert_ne!(inner.state, BufferState::Open, "read_all called on an open buffer");
        let mut out = vec![0u8; inner.unread];
        Self::drain_into(&mut inner, &mut out);
        out
    }

    /// Returns a concatenation of every slice ever written.
    ///
    /// Only available when the buffer was created with `preserve_data` set
    /// (see [`with_preserve_data`](Self::with_preserve_data)); panics
    /// otherwise. Calling this while still open is supported for debugging
    /// only and may race with concurrent writers (the returned snapshot
    /// reflects writes observed up to some point, not necessarily the last).
    #[track_caller]
    pub fn all_data(&self) -> Vec<u8> {
        let inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        assert!(inner.preserve_data, "all_data called on a buffer without preserve_data set");
        let total: usize = inner.history.iter().map(|s| s.len()).sum();
        let mut out = Vec::with_capacity(total);
        for slice in &inner.history {
            out.extend_from_slice(slice);
        }
        out
    }

    fn drain_into(inner: &mut Inner, mut dst: &mut [u8]) {
        while !dst.is_empty() {
            let front = inner.queue.front_mut().expect("unread count says bytes remain");
            let remaining = front.remaining();
            let take = remaining.len().min(dst.len());
            dst[..take].copy_from_slice(&remaining[..take]);
            front.consumed += take;
            inner.unread -= take;
            dst = &mut dst[take..];
            if front.consumed == front.bytes.len() {
                inner.queue.pop_front();
            }
        }
    }

    /// Spawns a background thread that repeatedly reads from `reader` and
    /// forwards the bytes into a fresh buffer, closing it on EOF
    /// (`completed = true`) or I/O error (`completed = false`).
    ///
    /// This is the Rust shape of the original unpacker's "takes ownership of
    /// an input stream" constructor (see `SPEC_FULL.md` section 4.5):
    /// instead of a special code path, it's just a producer thread plumbed
    /// into the same `Buffer` contract every other producer uses.
    pub fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Buffer {
        const CHUNK_SIZE: usize = 64 * 1024;

        let buffer = Buffer::new();
        let producer = buffer.clone();
        thread::spawn(move || {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        producer.close(true);
                        break;
                    }
                    Ok(n) => producer.write(chunk[..n].to_vec()),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => {
                        producer.close(false);
                        break;
                    }
                }
            }
        });
        buffer
    }

    /// Reads `n` bytes, mapping buffer termination into [`DecodeError`]s the
    /// way the decoder's typed readers need (see spec section 7: the error
    /// reported depends on *what* was being read, not just that the buffer
    /// ran dry).
    pub(crate) fn read_exact_for(&self, dst: &mut [u8], on_underflow: DecodeError) -> Result<(), DecodeError> {
        if self.read(dst) {
            Ok(())
        } else {
            Err(on_underflow)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn write_then_read() {
        let buffer = Buffer::new();
        buffer.write(vec![1, 2, 3, 4]);
        let mut dst = [0u8; 4];
        assert!(buffer.read(&mut dst));
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn read_spans_multiple_slices() {
        let buffer = Buffer::new();
        buffer.write(vec![1, 2]);
        buffer.write(vec![3]);
        buffer.write(vec![4, 5]);
        let mut dst = [0u8; 5];
        assert!(buffer.read(&mut dst));
        assert_eq!(dst, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn read_partial_slice_leaves_remainder_queued() {
        let buffer = Buffer::new();
        buffer.write(vec![1, 2, 3, 4]);
        let mut first = [0u8; 2];
        assert!(buffer.read(&mut first));
        assert_eq!(first, [1, 2]);
        let mut second = [0u8; 2];
        assert!(buffer.read(&mut second));
        assert_eq!(second, [3, 4]);
    }

    #[test]
    fn close_completed_with_insufficient_bytes_fails_read() {
        let buffer = Buffer::new();
        buffer.write(vec![1, 2]);
        buffer.close(true);
        let mut dst = [0u8; 3];
        assert!(!buffer.read(&mut dst));
    }

    #[test]
    fn close_errored_fails_read_identically() {
        let buffer = Buffer::new();
        buffer.write(vec![1]);
        buffer.close(false);
        let mut dst = [0u8; 5];
        assert!(!buffer.read(&mut dst));
    }

    #[test]
    fn writes_after_close_are_discarded() {
        let buffer = Buffer::new();
        buffer.close(true);
        buffer.write(vec![1, 2, 3]);
        assert_eq!(buffer.read_all().len(), 0);
    }

    #[test]
    fn read_all_only_after_close() {
        let buffer = Buffer::new();
        buffer.write(vec![1, 2, 3]);
        buffer.close(true);
        assert_eq!(buffer.read_all(), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn read_all_panics_while_open() {
        let buffer = Buffer::new();
        buffer.read_all();
    }

    #[test]
    fn preserve_data_survives_consumption() {
        let buffer = Buffer::with_preserve_data(true);
        buffer.write(vec![1, 2, 3]);
        let mut dst = [0u8; 3];
        assert!(buffer.read(&mut dst));
        assert_eq!(buffer.all_data(), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn all_data_panics_without_preserve_data() {
        let buffer = Buffer::new();
        buffer.all_data();
    }

    #[test]
    fn blocking_reader_wakes_on_write() {
        let buffer = Buffer::new();
        let reader = buffer.clone();
        let handle = thread::spawn(move || {
            let mut dst = [0u8; 3];
            let ok = reader.read(&mut dst);
            (ok, dst)
        });
        thread::sleep(Duration::from_millis(20));
        buffer.write(vec![9, 8, 7]);
        let (ok, dst) = handle.join().unwrap();
        assert!(ok);
        assert_eq!(dst, [9, 8, 7]);
    }

    #[test]
    fn blocking_reader_wakes_on_close() {
        let buffer = Buffer::new();
        let reader = buffer.clone();
        let handle = thread::spawn(move || {
            let mut dst = [0u8; 3];
            reader.read(&mut dst)
        });
        thread::sleep(Duration::from_millis(20));
        buffer.close(false);
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn limit_errors_the_buffer() {
        let buffer = Buffer::with_limit(2);
        buffer.write(vec![1, 2, 3]);
        assert_eq!(buffer.state(), BufferState::Errored);
    }

    #[test]
    fn spawn_reader_streams_to_completion() {
        let data = b"hello world".to_vec();
        let buffer = Buffer::spawn_reader(std::io::Cursor::new(data.clone()));
        assert_eq!(buffer.read_all_blocking(), data);
    }

    impl Buffer {
        // Test-only helper: block until closed, then drain.
        fn read_all_blocking(&self) -> Vec<u8> {
            loop {
                if self.state() != BufferState::Open {
                    return self.read_all();
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
}
