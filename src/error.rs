use core::fmt;

/// Everything that can go wrong while pulling a value out of a [`Decoder`](crate::Decoder).
///
/// The decoder latches the first error it produces (see [`Decoder::last_error`]
/// (crate::Decoder::last_error)); this type is what gets latched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// An encoded string length exceeds what this platform can address.
    StringDataTooLong,
    /// An encoded binary length exceeds what this platform can address.
    BinaryDataTooLong,
    /// An encoded array count exceeds what this platform can address.
    ArrayTooLong,
    /// An encoded map count exceeds what this platform can address.
    MapTooLong,
    /// The buffer's producer-side ceiling (see [`Buffer::with_limit`](crate::Buffer::with_limit))
    /// was exceeded.
    InputTooLarge,
    /// The underlying [`Buffer`](crate::Buffer) closed before a type marker byte arrived.
    ReadingTypeMarker,
    /// The underlying buffer closed before a length field (string/bin/array/map/ext) arrived.
    ReadingLength,
    /// The underlying buffer closed before a value's payload bytes arrived.
    ReadingData,
    /// The underlying buffer closed before an extension type tag byte arrived.
    ReadingExtType,
    /// The current value is incompatible with the reader that was called, or a reserved
    /// marker byte (`0xc1`) was encountered.
    InvalidType,
    /// A recursive [`skip`](crate::Decoder::skip) exceeded the configured depth limit.
    SkipDepthLimitExceeded,
    /// An invariant of this crate was violated; this indicates a bug here, not in the caller.
    Internal(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::StringDataTooLong => write!(f, "string length exceeds platform limits"),
            DecodeError::BinaryDataTooLong => write!(f, "binary length exceeds platform limits"),
            DecodeError::ArrayTooLong => write!(f, "array count exceeds platform limits"),
            DecodeError::MapTooLong => write!(f, "map count exceeds platform limits"),
            DecodeError::InputTooLarge => write!(f, "aggregate input exceeded the configured ceiling"),
            DecodeError::ReadingTypeMarker => write!(f, "stream ended while reading a type marker"),
            DecodeError::ReadingLength => write!(f, "stream ended while reading a length field"),
            DecodeError::ReadingData => write!(f, "stream ended while reading value data"),
            DecodeError::ReadingExtType => write!(f, "stream ended while reading an extension type tag"),
            DecodeError::InvalidType => write!(f, "current value is not compatible with the reader called"),
            DecodeError::SkipDepthLimitExceeded => write!(f, "skip recursion exceeded the configured depth limit"),
            DecodeError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}
