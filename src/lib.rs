//! Streaming MessagePack decoding over a thread-safe, zero-copy chunk buffer.
//!
//! A [`Buffer`] is a blocking, multi-producer/single-consumer queue of
//! immutable byte slices: producers on any thread [`write`](Buffer::write)
//! chunks as they arrive and eventually [`close`](Buffer::close) it, while a
//! single consumer thread drains it with [`read`](Buffer::read). A
//! [`Decoder`] sits on top of one `Buffer` and exposes the MessagePack
//! grammar as a cursor: typed readers (`read_integer`, `read_string`,
//! `read_array_count`, ...) each look at the value currently under the
//! cursor and either consume it or report [`DecodeError::InvalidType`],
//! `skip` discards whatever's there, and [`decode_value`](Decoder::decode_value)
//! materializes it generically as a [`Value`].
//!
//! ```
//! use msgpack_stream::{Buffer, Decoder};
//!
//! let buffer = Buffer::new();
//! buffer.write(vec![0x92, 0x01, 0x02]); // [1, 2]
//! buffer.close(true);
//!
//! let mut decoder = Decoder::new(buffer);
//! let count = decoder.read_array_count().unwrap();
//! let mut sum = 0;
//! for _ in 0..count {
//!     sum += decoder.read_integer().unwrap();
//! }
//! assert_eq!(sum, 3);
//! ```

mod buffer;
mod decoder;
mod error;
mod marker;
mod pull;
#[cfg(test)]
mod proptests;
mod value;

pub use buffer::{Buffer, BufferState};
pub use decoder::Decoder;
pub use error::DecodeError;
pub use marker::ValueType;
pub use pull::PullDecode;
pub use value::Value;
