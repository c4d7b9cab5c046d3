//! Error types for word and sentence framing.

use thiserror::Error;

/// A length header that cannot be decoded.
///
/// The receive stream is unsynchronised once this is reported; the only
/// sensible recovery is to drop the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The first header byte is one of the reserved control forms
    /// (`0xF1..=0xFF`).
    #[error("reserved control byte {byte:#04x} at start of word")]
    ReservedControlByte {
        /// The offending byte.
        byte: u8,
    },
}

/// A payload that cannot be represented on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// The payload does not fit the widest (4-byte) length field.
    #[error("word of {length} bytes exceeds the 4-byte length field")]
    TooLong {
        /// Length of the rejected payload.
        length: usize,
    },
}

/// Errors raised while grouping words into sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AssemblyError {
    /// A word header could not be decoded.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// An end-of-sentence marker arrived before any word of the sentence.
    #[error("received end-of-sentence with no sentence data")]
    EmptySentence,
}
