//! The pull-decoding capability trait.
//!
//! The original Objective-C unpacker lets any object opt into decoding by
//! implementing `PINStreamingDecoding` (`+objectWithStreamingDecoder:`,
//! returning `nil` for an encoded `nil`); `PullDecode` is the same contract
//! expressed as a Rust trait, dispatched statically instead of through a
//! duck-typed class method.

use crate::decoder::Decoder;
use crate::error::DecodeError;

/// Types that know how to pull their own representation off a [`Decoder`].
///
/// Implementations are expected to position the decoder on the next value,
/// inspect its type, and consume exactly that value - leaving the cursor on
/// whatever follows. Returning `Ok(None)` signals that the encoded value was
/// `nil`, mirroring the original protocol's "the constructor may return nil".
pub trait PullDecode: Sized {
    fn decode(decoder: &mut Decoder) -> Result<Option<Self>, DecodeError>;
}
