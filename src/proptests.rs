//! Property tests spanning [`Buffer`](crate::Buffer) and
//! [`Decoder`](crate::Decoder) together.
//!
//! Colocated unit tests in `buffer.rs`/`decoder.rs` cover specific byte
//! sequences; these properties instead generate arbitrary inputs the way
//! `oferchen-rsync`'s protocol crate fuzzes its own wire format.

#![cfg(test)]

use proptest::collection::vec as pvec;
use proptest::prelude::*;

use crate::{Buffer, Decoder};

/// Every byte written to an open buffer is eventually read back, in order,
/// regardless of how it was chunked on the way in.
fn conservation(chunks: Vec<Vec<u8>>) -> bool {
    let buffer = Buffer::new();
    let expected: Vec<u8> = chunks.iter().flatten().copied().collect();
    for chunk in &chunks {
        buffer.write(chunk.clone());
    }
    buffer.close(true);
    buffer.read_all() == expected
}

/// Round-tripping a signed 32-bit integer through a fixint/u/i marker and
/// back out through `read_integer` (or `read_int64` for values outside
/// `i32`'s range) always recovers the original value.
fn int_round_trips(value: i64) -> bool {
    let encoded = encode_int(value);
    let buffer = Buffer::new();
    buffer.write(encoded);
    buffer.close(true);
    let mut decoder = Decoder::new(buffer);
    decoder.read_int64() == Ok(value)
}

fn encode_int(value: i64) -> Vec<u8> {
    if (0..=127).contains(&value) {
        vec![value as u8]
    } else if (-32..0).contains(&value) {
        vec![value as i8 as u8]
    } else if let Ok(v) = u8::try_from(value) {
        vec![0xcc, v]
    } else if let Ok(v) = u16::try_from(value) {
        let mut out = vec![0xcd];
        out.extend_from_slice(&v.to_be_bytes());
        out
    } else if let Ok(v) = u32::try_from(value) {
        let mut out = vec![0xce];
        out.extend_from_slice(&v.to_be_bytes());
        out
    } else if value >= 0 {
        let mut out = vec![0xcf];
        out.extend_from_slice(&(value as u64).to_be_bytes());
        out
    } else if let Ok(v) = i8::try_from(value) {
        vec![0xd0, v as u8]
    } else if let Ok(v) = i16::try_from(value) {
        let mut out = vec![0xd1];
        out.extend_from_slice(&v.to_be_bytes());
        out
    } else if let Ok(v) = i32::try_from(value) {
        let mut out = vec![0xd2];
        out.extend_from_slice(&v.to_be_bytes());
        out
    } else {
        let mut out = vec![0xd3];
        out.extend_from_slice(&value.to_be_bytes());
        out
    }
}

/// A string encoded with `decode_value` round-trips byte-for-byte.
fn string_round_trips(s: String) -> bool {
    let mut encoded = Vec::new();
    let len = s.len() as u32;
    if len < 32 {
        encoded.push(0xa0 | len as u8);
    } else if let Ok(v) = u8::try_from(len) {
        encoded.push(0xd9);
        encoded.push(v);
    } else if let Ok(v) = u16::try_from(len) {
        encoded.push(0xda);
        encoded.extend_from_slice(&v.to_be_bytes());
    } else {
        encoded.push(0xdb);
        encoded.extend_from_slice(&len.to_be_bytes());
    }
    encoded.extend_from_slice(s.as_bytes());

    let buffer = Buffer::new();
    buffer.write(encoded);
    buffer.close(true);
    let mut decoder = Decoder::new(buffer);
    decoder.read_string() == Ok(s)
}

proptest! {
    #[test]
    fn buffer_conserves_every_byte(chunks in pvec(pvec(any::<u8>(), 0..64), 0..32)) {
        prop_assert!(conservation(chunks));
    }

    #[test]
    fn decoder_round_trips_integers(value in any::<i64>()) {
        prop_assert!(int_round_trips(value));
    }

    #[test]
    fn decoder_round_trips_strings(s in "\\PC*") {
        prop_assert!(string_round_trips(s));
    }
}
