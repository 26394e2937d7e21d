//! The streaming, cursor-based MessagePack decoder.
//!
//! Where the original unpacker keeps exactly one pending value around
//! (peeked by reading its marker and any inline length, then either
//! consumed by a typed reader or discarded by `skip`), this module keeps
//! the same single-slot cursor as a `CurrentValue`, built from the marker
//! grammar in [`crate::marker`]. The type-compatibility and error-latching
//! rules below are this crate's Rust reading of that same contract.

use std::io::Read;
use std::mem;

use crate::buffer::Buffer;
use crate::error::DecodeError;
use crate::marker::{checked_len, IntWidth, Marker, ValueType};
use crate::pull::PullDecode;
use crate::value::Value;

const DEFAULT_SKIP_DEPTH_LIMIT: usize = 512;

/// The value sitting under the cursor: a marker byte plus whatever inline
/// length/tag bytes accompany it, already read off the buffer. Only scalar
/// payload bytes (the integer's magnitude, the float's bits, the
/// string/binary/ext body) remain unread at this point.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CurrentValue {
    Nil,
    Bool(bool),
    FixInt(i64),
    PendingInt(IntWidth),
    PendingFloat32,
    PendingFloat64,
    Str { len: u32 },
    Bin { len: u32 },
    Array { len: u32 },
    Map { len: u32 },
    Ext { len: u32 },
}

/// A stateful, single-slot cursor over a [`Buffer`] of MessagePack bytes.
///
/// Once any reader method returns an error, the decoder latches it: every
/// subsequent call returns a clone of that same error without touching the
/// buffer again. This mirrors the original unpacker's "first error wins"
/// behavior and means callers only need to check for failure once, after a
/// sequence of reads, rather than after each one.
pub struct Decoder {
    buffer: Buffer,
    current: Option<CurrentValue>,
    last_error: Option<DecodeError>,
    force_map_keys_to_string: bool,
    skip_depth_limit: usize,
    key_scratch: Vec<u8>,
}

impl Decoder {
    /// Wraps an existing buffer. Does not take ownership of any producer
    /// thread; the caller is responsible for writing to and closing `buffer`.
    pub fn new(buffer: Buffer) -> Decoder {
        Decoder {
            buffer,
            current: None,
            last_error: None,
            force_map_keys_to_string: false,
            skip_depth_limit: DEFAULT_SKIP_DEPTH_LIMIT,
            key_scratch: Vec::new(),
        }
    }

    /// Spawns a background reader thread over `reader` (see
    /// [`Buffer::spawn_reader`]) and wraps the resulting buffer.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Decoder {
        Decoder::new(Buffer::spawn_reader(reader))
    }

    /// Borrows the underlying buffer, e.g. to inspect its
    /// [`state`](Buffer::state).
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// When set, [`decode_value`](Self::decode_value) renders non-string map
    /// keys (integers, bools, floats) as their string representation instead
    /// of reporting them as their native `Value` variant.
    pub fn set_force_map_keys_to_string(&mut self, force: bool) {
        self.force_map_keys_to_string = force;
    }

    /// Overrides the recursion ceiling used by [`skip`](Self::skip). The
    /// default is generous enough for realistic documents while still
    /// bounding stack depth against adversarial input.
    pub fn set_skip_depth_limit(&mut self, limit: usize) {
        self.skip_depth_limit = limit;
    }

    /// The first error this decoder ever produced, if any.
    pub fn last_error(&self) -> Option<&DecodeError> {
        self.last_error.as_ref()
    }

    fn latch(&mut self, err: DecodeError) -> DecodeError {
        self.last_error = Some(err.clone());
        err
    }

    fn read_n<const N: usize>(&mut self, err: DecodeError) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        self.buffer.read_exact_for(&mut buf, err).map_err(|e| self.latch(e))?;
        Ok(buf)
    }

    fn ensure_current(&mut self) -> Result<(), DecodeError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        if self.current.is_some() {
            return Ok(());
        }
        let current = self.parse_next()?;
        self.current = Some(current);
        Ok(())
    }

    fn parse_next(&mut self) -> Result<CurrentValue, DecodeError> {
        let [byte] = self.read_n::<1>(DecodeError::ReadingTypeMarker)?;
        let marker = Marker::from_u8(byte);
        match marker {
            Marker::Null => Ok(CurrentValue::Nil),
            Marker::False => Ok(CurrentValue::Bool(false)),
            Marker::True => Ok(CurrentValue::Bool(true)),
            Marker::FixPos(v) => Ok(CurrentValue::FixInt(v as i64)),
            Marker::FixNeg(v) => Ok(CurrentValue::FixInt(v as i64)),
            Marker::Reserved => Err(self.latch(DecodeError::InvalidType)),
            Marker::U8 | Marker::U16 | Marker::U32 | Marker::U64 | Marker::I8 | Marker::I16 | Marker::I32 | Marker::I64 => {
                let width = IntWidth::from_marker(marker).expect("marker matched an integer arm");
                Ok(CurrentValue::PendingInt(width))
            }
            Marker::F32 => Ok(CurrentValue::PendingFloat32),
            Marker::F64 => Ok(CurrentValue::PendingFloat64),
            Marker::FixStr(len) => Ok(CurrentValue::Str { len: len as u32 }),
            Marker::Str8 => {
                let [len] = self.read_n::<1>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Str { len: len as u32 })
            }
            Marker::Str16 => {
                let bytes = self.read_n::<2>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Str { len: u16::from_be_bytes(bytes) as u32 })
            }
            Marker::Str32 => {
                let bytes = self.read_n::<4>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Str { len: u32::from_be_bytes(bytes) })
            }
            Marker::Bin8 => {
                let [len] = self.read_n::<1>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Bin { len: len as u32 })
            }
            Marker::Bin16 => {
                let bytes = self.read_n::<2>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Bin { len: u16::from_be_bytes(bytes) as u32 })
            }
            Marker::Bin32 => {
                let bytes = self.read_n::<4>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Bin { len: u32::from_be_bytes(bytes) })
            }
            Marker::FixArray(len) => Ok(CurrentValue::Array { len: len as u32 }),
            Marker::Array16 => {
                let bytes = self.read_n::<2>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Array { len: u16::from_be_bytes(bytes) as u32 })
            }
            Marker::Array32 => {
                let bytes = self.read_n::<4>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Array { len: u32::from_be_bytes(bytes) })
            }
            Marker::FixMap(len) => Ok(CurrentValue::Map { len: len as u32 }),
            Marker::Map16 => {
                let bytes = self.read_n::<2>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Map { len: u16::from_be_bytes(bytes) as u32 })
            }
            Marker::Map32 => {
                let bytes = self.read_n::<4>(DecodeError::ReadingLength)?;
                Ok(CurrentValue::Map { len: u32::from_be_bytes(bytes) })
            }
            Marker::FixExt1 => self.parse_ext_tag(1),
            Marker::FixExt2 => self.parse_ext_tag(2),
            Marker::FixExt4 => self.parse_ext_tag(4),
            Marker::FixExt8 => self.parse_ext_tag(8),
            Marker::FixExt16 => self.parse_ext_tag(16),
            Marker::Ext8 => {
                let [len] = self.read_n::<1>(DecodeError::ReadingLength)?;
                self.parse_ext_tag(len as u32)
            }
            Marker::Ext16 => {
                let bytes = self.read_n::<2>(DecodeError::ReadingLength)?;
                self.parse_ext_tag(u16::from_be_bytes(bytes) as u32)
            }
            Marker::Ext32 => {
                let bytes = self.read_n::<4>(DecodeError::ReadingLength)?;
                self.parse_ext_tag(u32::from_be_bytes(bytes))
            }
        }
    }

    fn parse_ext_tag(&mut self, len: u32) -> Result<CurrentValue, DecodeError> {
        // The extension type byte carries no meaning at this layer (see spec
        // section 1's non-goals); it still has to be read off the wire to
        // reach the payload that follows it.
        let _ = self.read_n::<1>(DecodeError::ReadingExtType)?;
        Ok(CurrentValue::Ext { len })
    }

    fn take_current(&mut self) -> CurrentValue {
        self.current.take().expect("ensure_current populated current")
    }

    fn current_value_type_ref(&self) -> ValueType {
        match self.current.as_ref().expect("ensure_current populated current") {
            CurrentValue::Nil => ValueType::Nil,
            CurrentValue::Bool(_) => ValueType::Bool,
            CurrentValue::FixInt(v) if *v < 0 => ValueType::SignedInt,
            CurrentValue::FixInt(_) => ValueType::UnsignedInt,
            CurrentValue::PendingInt(width) => width.value_type(),
            CurrentValue::PendingFloat32 => ValueType::Float32,
            CurrentValue::PendingFloat64 => ValueType::Float64,
            CurrentValue::Str { .. } => ValueType::String,
            CurrentValue::Bin { .. } => ValueType::Binary,
            CurrentValue::Array { .. } => ValueType::Array,
            CurrentValue::Map { .. } => ValueType::Map,
            CurrentValue::Ext { .. } => ValueType::Extension,
        }
    }

    /// The type tag of the value under the cursor, without consuming it.
    pub fn current_value_type(&mut self) -> Result<ValueType, DecodeError> {
        self.ensure_current()?;
        Ok(self.current_value_type_ref())
    }

    fn read_pending_int_payload(&mut self, width: IntWidth) -> Result<i128, DecodeError> {
        match width {
            IntWidth::U8 => Ok(self.read_n::<1>(DecodeError::ReadingData)?[0] as i128),
            IntWidth::U16 => Ok(u16::from_be_bytes(self.read_n::<2>(DecodeError::ReadingData)?) as i128),
            IntWidth::U32 => Ok(u32::from_be_bytes(self.read_n::<4>(DecodeError::ReadingData)?) as i128),
            IntWidth::U64 => Ok(u64::from_be_bytes(self.read_n::<8>(DecodeError::ReadingData)?) as i128),
            IntWidth::I8 => Ok(self.read_n::<1>(DecodeError::ReadingData)?[0] as i8 as i128),
            IntWidth::I16 => Ok(i16::from_be_bytes(self.read_n::<2>(DecodeError::ReadingData)?) as i128),
            IntWidth::I32 => Ok(i32::from_be_bytes(self.read_n::<4>(DecodeError::ReadingData)?) as i128),
            IntWidth::I64 => Ok(i64::from_be_bytes(self.read_n::<8>(DecodeError::ReadingData)?) as i128),
        }
    }

    fn take_integer_value(&mut self) -> Result<i128, DecodeError> {
        match self.take_current() {
            CurrentValue::FixInt(v) => Ok(v as i128),
            CurrentValue::PendingInt(width) => self.read_pending_int_payload(width),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    fn read_float32_payload(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_be_bytes(self.read_n::<4>(DecodeError::ReadingData)?))
    }

    fn read_float64_payload(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.read_n::<8>(DecodeError::ReadingData)?))
    }

    /// Consumes a `nil` value.
    pub fn read_nil(&mut self) -> Result<(), DecodeError> {
        self.ensure_current()?;
        match self.take_current() {
            CurrentValue::Nil => Ok(()),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// Consumes a boolean value.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        self.ensure_current()?;
        match self.take_current() {
            CurrentValue::Bool(b) => Ok(b),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// Consumes an integer whose tag is `UnsignedInt` or `SignedInt` (any
    /// fixint, or an 8/16/32-bit sized marker) and whose value fits an
    /// `i32`. A `u32`-sized unsigned value too large for `i32`, or any
    /// 64-bit-sized marker, is reported as [`DecodeError::InvalidType`] even
    /// though the tag alone might otherwise look compatible.
    pub fn read_integer(&mut self) -> Result<i32, DecodeError> {
        self.ensure_current()?;
        let value_type = self.current_value_type_ref();
        if !matches!(value_type, ValueType::UnsignedInt | ValueType::SignedInt) {
            return Err(self.latch(DecodeError::InvalidType));
        }
        let value = self.take_integer_value()?;
        i32::try_from(value).map_err(|_| self.latch(DecodeError::InvalidType))
    }

    /// Consumes an integer tagged `UnsignedInt` whose value fits a `u32`.
    pub fn read_unsigned_integer(&mut self) -> Result<u32, DecodeError> {
        self.ensure_current()?;
        if self.current_value_type_ref() != ValueType::UnsignedInt {
            return Err(self.latch(DecodeError::InvalidType));
        }
        let value = self.take_integer_value()?;
        u32::try_from(value).map_err(|_| self.latch(DecodeError::InvalidType))
    }

    /// Consumes any integer (signed or unsigned, any width) whose value
    /// fits an `i64`.
    pub fn read_int64(&mut self) -> Result<i64, DecodeError> {
        self.ensure_current()?;
        let value_type = self.current_value_type_ref();
        let compatible = matches!(
            value_type,
            ValueType::UnsignedInt | ValueType::UnsignedInt64 | ValueType::SignedInt | ValueType::SignedInt64
        );
        if !compatible {
            return Err(self.latch(DecodeError::InvalidType));
        }
        let value = self.take_integer_value()?;
        i64::try_from(value).map_err(|_| self.latch(DecodeError::InvalidType))
    }

    /// Consumes an unsigned integer (any width) whose value fits a `u64`.
    pub fn read_unsigned_int64(&mut self) -> Result<u64, DecodeError> {
        self.ensure_current()?;
        let value_type = self.current_value_type_ref();
        if !matches!(value_type, ValueType::UnsignedInt | ValueType::UnsignedInt64) {
            return Err(self.latch(DecodeError::InvalidType));
        }
        let value = self.take_integer_value()?;
        u64::try_from(value).map_err(|_| self.latch(DecodeError::InvalidType))
    }

    /// Consumes a 32-bit float. Does not accept a 64-bit float, even if its
    /// value would round-trip losslessly.
    pub fn read_float(&mut self) -> Result<f32, DecodeError> {
        self.ensure_current()?;
        match self.take_current() {
            CurrentValue::PendingFloat32 => self.read_float32_payload(),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// Consumes a 32- or 64-bit float, widening a 32-bit value to `f64`.
    pub fn read_double(&mut self) -> Result<f64, DecodeError> {
        self.ensure_current()?;
        match self.take_current() {
            CurrentValue::PendingFloat32 => Ok(self.read_float32_payload()? as f64),
            CurrentValue::PendingFloat64 => self.read_float64_payload(),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// The byte length of the current string, without consuming it.
    pub fn read_string_length(&mut self) -> Result<u32, DecodeError> {
        self.ensure_current()?;
        match self.current {
            Some(CurrentValue::Str { len }) => Ok(len),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// The byte length of the current string plus one, sized for a
    /// NUL-terminated C buffer. Always `read_string_length() + 1`.
    pub fn read_string_buffer_size(&mut self) -> Result<u32, DecodeError> {
        Ok(self.read_string_length()? + 1)
    }

    /// The byte length of the current binary blob, without consuming it.
    pub fn read_data_length(&mut self) -> Result<u32, DecodeError> {
        self.ensure_current()?;
        match self.current {
            Some(CurrentValue::Bin { len }) => Ok(len),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// Consumes a string, validating it as UTF-8.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.ensure_current()?;
        let len = match self.current {
            Some(CurrentValue::Str { len }) => len,
            _ => return Err(self.latch(DecodeError::InvalidType)),
        };
        self.current = None;
        let n = checked_len(len, DecodeError::StringDataTooLong).map_err(|e| self.latch(e))?;
        let mut bytes = vec![0u8; n];
        self.buffer.read_exact_for(&mut bytes, DecodeError::ReadingData).map_err(|e| self.latch(e))?;
        String::from_utf8(bytes).map_err(|_| self.latch(DecodeError::InvalidType))
    }

    /// Consumes a binary blob.
    pub fn read_data(&mut self) -> Result<Vec<u8>, DecodeError> {
        self.ensure_current()?;
        let len = match self.current {
            Some(CurrentValue::Bin { len }) => len,
            _ => return Err(self.latch(DecodeError::InvalidType)),
        };
        self.current = None;
        let n = checked_len(len, DecodeError::BinaryDataTooLong).map_err(|e| self.latch(e))?;
        let mut bytes = vec![0u8; n];
        self.buffer.read_exact_for(&mut bytes, DecodeError::ReadingData).map_err(|e| self.latch(e))?;
        Ok(bytes)
    }

    /// Consumes an array marker, returning its element count. The elements
    /// themselves remain to be read one at a time.
    pub fn read_array_count(&mut self) -> Result<u32, DecodeError> {
        self.ensure_current()?;
        match self.take_current() {
            CurrentValue::Array { len } => Ok(len),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// Consumes a map marker, returning its pair count. The key/value pairs
    /// themselves remain to be read one at a time.
    pub fn read_map_count(&mut self) -> Result<u32, DecodeError> {
        self.ensure_current()?;
        match self.take_current() {
            CurrentValue::Map { len } => Ok(len),
            _ => Err(self.latch(DecodeError::InvalidType)),
        }
    }

    /// Discards the current value, recursing into arrays and maps.
    /// Recursion depth is bounded by [`set_skip_depth_limit`](Self::set_skip_depth_limit).
    pub fn skip(&mut self) -> Result<(), DecodeError> {
        self.skip_at_depth(0)
    }

    fn skip_at_depth(&mut self, depth: usize) -> Result<(), DecodeError> {
        if depth > self.skip_depth_limit {
            return Err(self.latch(DecodeError::SkipDepthLimitExceeded));
        }
        self.ensure_current()?;
        match self.take_current() {
            CurrentValue::Nil | CurrentValue::Bool(_) | CurrentValue::FixInt(_) => Ok(()),
            CurrentValue::PendingInt(width) => self.read_pending_int_payload(width).map(|_| ()),
            CurrentValue::PendingFloat32 => self.read_float32_payload().map(|_| ()),
            CurrentValue::PendingFloat64 => self.read_float64_payload().map(|_| ()),
            CurrentValue::Str { len } => {
                let n = checked_len(len, DecodeError::StringDataTooLong).map_err(|e| self.latch(e))?;
                self.skip_bytes(n)
            }
            CurrentValue::Bin { len } => {
                let n = checked_len(len, DecodeError::BinaryDataTooLong).map_err(|e| self.latch(e))?;
                self.skip_bytes(n)
            }
            CurrentValue::Ext { len, .. } => {
                let n = checked_len(len, DecodeError::BinaryDataTooLong).map_err(|e| self.latch(e))?;
                self.skip_bytes(n)
            }
            CurrentValue::Array { len } => {
                for _ in 0..len {
                    self.skip_at_depth(depth + 1)?;
                }
                Ok(())
            }
            CurrentValue::Map { len } => {
                for _ in 0..len {
                    self.skip_at_depth(depth + 1)?;
                    self.skip_at_depth(depth + 1)?;
                }
                Ok(())
            }
        }
    }

    fn skip_bytes(&mut self, n: usize) -> Result<(), DecodeError> {
        let mut discard = vec![0u8; n];
        self.buffer.read_exact_for(&mut discard, DecodeError::ReadingData).map_err(|e| self.latch(e))
    }

    fn read_c_string_into(&mut self, out: &mut Vec<u8>) -> Result<usize, DecodeError> {
        self.ensure_current()?;
        let len = match self.current {
            Some(CurrentValue::Str { len }) => len,
            _ => return Err(self.latch(DecodeError::InvalidType)),
        };
        self.current = None;
        let n = checked_len(len, DecodeError::StringDataTooLong).map_err(|e| self.latch(e))?;
        out.clear();
        out.resize(n, 0);
        self.buffer.read_exact_for(out, DecodeError::ReadingData).map_err(|e| self.latch(e))?;
        out.push(0);
        Ok(n)
    }

    /// Consumes a string key and returns it (without the trailing NUL) along
    /// with its length, reusing an internal scratch buffer across calls so
    /// that iterating many keys does not allocate per key.
    pub fn decode_c_string_with_returned_length(&mut self) -> Result<(&[u8], usize), DecodeError> {
        let mut key = mem::take(&mut self.key_scratch);
        let result = self.read_c_string_into(&mut key);
        self.key_scratch = key;
        let len = result?;
        Ok((&self.key_scratch[..len], len))
    }

    /// Reads a map one string-keyed pair at a time, invoking `callback` with
    /// the decoder (positioned on the value) and the key's raw bytes.
    ///
    /// The key buffer is reused across iterations via a swap through `self`,
    /// which is what lets `callback` take `&mut Decoder` without also
    /// holding a live borrow of the key it was just handed.
    pub fn enumerate_keys_in_map(
        &mut self,
        mut callback: impl FnMut(&mut Decoder, &[u8]) -> Result<(), DecodeError>,
    ) -> Result<(), DecodeError> {
        let count = self.read_map_count()?;
        for _ in 0..count {
            let mut key = mem::take(&mut self.key_scratch);
            let len = match self.read_c_string_into(&mut key) {
                Ok(len) => len,
                Err(e) => {
                    self.key_scratch = key;
                    return Err(e);
                }
            };
            let result = callback(self, &key[..len]);
            self.key_scratch = key;
            result?;
        }
        Ok(())
    }

    /// Materializes the current value, recursively, as a generic [`Value`].
    pub fn decode_value(&mut self) -> Result<Value, DecodeError> {
        self.ensure_current()?;
        match self.current_value_type_ref() {
            ValueType::Nil => {
                self.read_nil()?;
                Ok(Value::Nil)
            }
            ValueType::Bool => Ok(Value::Bool(self.read_bool()?)),
            ValueType::UnsignedInt | ValueType::UnsignedInt64 => Ok(Value::UInt(self.read_unsigned_int64()?)),
            ValueType::SignedInt | ValueType::SignedInt64 => Ok(Value::Int(self.read_int64()?)),
            ValueType::Float32 => Ok(Value::F32(self.read_float()?)),
            ValueType::Float64 => Ok(Value::F64(self.read_double()?)),
            ValueType::String => Ok(Value::String(self.read_string()?)),
            ValueType::Binary => Ok(Value::Binary(self.read_data()?)),
            ValueType::Array => {
                let len = self.read_array_count()?;
                let n = checked_len(len, DecodeError::ArrayTooLong).map_err(|e| self.latch(e))?;
                let mut items = Vec::with_capacity(n.min(4096));
                for _ in 0..len {
                    items.push(self.decode_value()?);
                }
                Ok(Value::Array(items))
            }
            ValueType::Map => {
                let len = self.read_map_count()?;
                let n = checked_len(len, DecodeError::MapTooLong).map_err(|e| self.latch(e))?;
                let mut entries = Vec::with_capacity(n.min(4096));
                for _ in 0..len {
                    let key = self.decode_value()?;
                    let key = if self.force_map_keys_to_string {
                        Value::String(Self::render_key_as_string(&key))
                    } else {
                        key
                    };
                    let value = self.decode_value()?;
                    entries.push((key, value));
                }
                Ok(Value::Map(entries))
            }
            ValueType::Extension => {
                let len = match self.current {
                    Some(CurrentValue::Ext { len, .. }) => len,
                    _ => unreachable!("value type Extension implies CurrentValue::Ext"),
                };
                self.current = None;
                let n = checked_len(len, DecodeError::BinaryDataTooLong).map_err(|e| self.latch(e))?;
                let mut bytes = vec![0u8; n];
                self.buffer.read_exact_for(&mut bytes, DecodeError::ReadingData).map_err(|e| self.latch(e))?;
                Ok(Value::Binary(bytes))
            }
            ValueType::Unspecified => Err(self.latch(DecodeError::Internal("encountered an unspecified value type"))),
        }
    }

    fn render_key_as_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::F32(f) => f.to_string(),
            Value::F64(f) => f.to_string(),
            Value::Nil => "nil".to_string(),
            Value::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Array(_) | Value::Map(_) => String::new(),
        }
    }

    /// Positions the cursor on the next value and hands the decoder to
    /// `T::decode`. `Ok(None)` means the encoded value was `nil`.
    pub fn decode<T: PullDecode>(&mut self) -> Result<Option<T>, DecodeError> {
        T::decode(self)
    }

    /// Consumes an array, decoding each element with `T::decode`. A `None`
    /// entry means that element was encoded as `nil`.
    pub fn decode_array_of<T: PullDecode>(&mut self) -> Result<Vec<Option<T>>, DecodeError> {
        let len = self.read_array_count()?;
        let n = checked_len(len, DecodeError::ArrayTooLong).map_err(|e| self.latch(e))?;
        let mut items = Vec::with_capacity(n.min(4096));
        for _ in 0..len {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }

    /// Consumes a map, decoding each key with `K::decode` and each value
    /// with `V::decode`.
    pub fn decode_dictionary<K: PullDecode, V: PullDecode>(&mut self) -> Result<Vec<(Option<K>, Option<V>)>, DecodeError> {
        let len = self.read_map_count()?;
        let n = checked_len(len, DecodeError::MapTooLong).map_err(|e| self.latch(e))?;
        let mut entries = Vec::with_capacity(n.min(4096));
        for _ in 0..len {
            let key = K::decode(self)?;
            let value = V::decode(self)?;
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Consumes an array, decoding each element with `T::decode` and
    /// collecting the non-nil results into a set. Mirrors
    /// `decode_array_of` but for callers who want set semantics over the
    /// decoded elements.
    pub fn decode_set_of<T: PullDecode + Eq + std::hash::Hash>(&mut self) -> Result<std::collections::HashSet<T>, DecodeError> {
        let len = self.read_array_count()?;
        let mut set = std::collections::HashSet::with_capacity(checked_len(len, DecodeError::ArrayTooLong).map_err(|e| self.latch(e))?.min(4096));
        for _ in 0..len {
            if let Some(item) = T::decode(self)? {
                set.insert(item);
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    fn decoder_for(bytes: &[u8]) -> Decoder {
        let buffer = Buffer::new();
        buffer.write(bytes.to_vec());
        buffer.close(true);
        Decoder::new(buffer)
    }

    #[test]
    fn empty_map() {
        let mut d = decoder_for(&[0x80]);
        assert_eq!(d.read_map_count().unwrap(), 0);
    }

    #[test]
    fn small_uint_fixint() {
        let mut d = decoder_for(&[0x7f]);
        assert_eq!(d.read_integer().unwrap(), 127);
    }

    #[test]
    fn uint_u16() {
        let mut d = decoder_for(&[0xcd, 0x01, 0x00]);
        assert_eq!(d.read_integer().unwrap(), 256);
    }

    #[test]
    fn negative_fixint() {
        let mut d = decoder_for(&[0xff]);
        assert_eq!(d.read_integer().unwrap(), -1);
    }

    #[test]
    fn negative_i8() {
        let mut d = decoder_for(&[0xd0, 0x80]);
        assert_eq!(d.read_integer().unwrap(), -128);
    }

    #[test]
    fn short_string() {
        let mut d = decoder_for(&[0xa5, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(d.read_string().unwrap(), "hello");
    }

    #[test]
    fn array_of_two_bools() {
        let mut d = decoder_for(&[0x92, 0xc3, 0xc2]);
        assert_eq!(d.read_array_count().unwrap(), 2);
        assert!(d.read_bool().unwrap());
        assert!(!d.read_bool().unwrap());
    }

    #[test]
    fn map_with_forced_string_keys() {
        let mut d = decoder_for(&[0x81, 0x01, 0x02]);
        d.set_force_map_keys_to_string(true);
        let value = d.decode_value().unwrap();
        let entries = value.as_map().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, Value::String("1".to_string()));
        assert_eq!(entries[0].1, Value::UInt(2));
    }

    #[test]
    fn truncated_string_surfaces_reading_data() {
        let mut d = decoder_for(&[0xa3, b'a', b'b']);
        assert_eq!(d.read_string().unwrap_err(), DecodeError::ReadingData);
    }

    #[test]
    fn error_latches_across_calls() {
        let mut d = decoder_for(&[0xa3, b'a', b'b']);
        let first = d.read_string().unwrap_err();
        let second = d.read_bool().unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn read_integer_rejects_unsigned_int64() {
        let mut d = decoder_for(&[0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(d.read_integer().unwrap_err(), DecodeError::InvalidType);
    }

    #[test]
    fn read_int64_accepts_i64_max_encoded_as_u64() {
        let mut d = decoder_for(&[0xcf, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(d.read_int64().unwrap(), i64::MAX);
    }

    #[test]
    fn read_int64_rejects_u64_overflow() {
        let mut d = decoder_for(&[0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(d.read_int64().unwrap_err(), DecodeError::InvalidType);
    }

    #[test]
    fn skip_recurses_through_nested_containers() {
        let mut d = decoder_for(&[0x92, 0x01, 0x81, 0xa1, b'a', 0x02]);
        d.read_array_count().unwrap();
        d.skip().unwrap();
        d.skip().unwrap();
    }

    #[test]
    fn enumerate_keys_in_map_visits_each_pair() {
        let mut d = decoder_for(&[0x82, 0xa1, b'a', 0x01, 0xa1, b'b', 0x02]);
        let mut seen = Vec::new();
        d.enumerate_keys_in_map(|d, key| {
            let key = String::from_utf8_lossy(key).into_owned();
            let value = d.read_integer()?;
            seen.push((key, value));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn string_length_accessors_are_non_consuming_and_consistent() {
        let mut d = decoder_for(&[0xa5, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(d.read_string_length().unwrap(), 5);
        assert_eq!(d.read_string_buffer_size().unwrap(), 6);
        assert_eq!(d.read_string().unwrap(), "hello");
    }
}
