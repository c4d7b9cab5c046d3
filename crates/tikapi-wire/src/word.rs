//! Length-prefixed word codec.
//!
//! Wire format:
//! ```text
//! ┌──────────────────────┬──────────────────────┐
//! │ Length (1..=5 bytes) │ Payload (N bytes)    │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! The high bits of the first header byte select the header width:
//!
//! | first byte    | width | payload lengths            |
//! |---------------|-------|----------------------------|
//! | `0xxx_xxxx`   | 1     | `0 ..= 0x7F`               |
//! | `10xx_xxxx`   | 2     | `0x80 ..= 0x3FFF`          |
//! | `110x_xxxx`   | 3     | `0x4000 ..= 0x1F_FFFF`     |
//! | `1110_xxxx`   | 4     | `0x20_0000 ..= 0xFFF_FFFF` |
//! | `1111_0000`   | 5     | `0x1000_0000 ..= u32::MAX` |
//!
//! First bytes `0xF1..=0xFF` are reserved control forms and rejected.

use crate::error::{EncodingError, FramingError};

/// Longest payload representable by the 5-byte header.
pub const MAX_WORD_LEN: usize = u32::MAX as usize;

/// Width of a word's length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderWidth {
    /// One byte, payloads up to `0x7F`.
    One,
    /// Two bytes, payloads up to `0x3FFF`.
    Two,
    /// Three bytes, payloads up to `0x1F_FFFF`.
    Three,
    /// Four bytes, payloads up to `0xFFF_FFFF`.
    Four,
    /// `0xF0` marker plus a four-byte big-endian length.
    Five,
}

impl HeaderWidth {
    /// Returns the narrowest header able to carry `length` payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::TooLong`] when `length` exceeds
    /// [`MAX_WORD_LEN`].
    pub const fn for_payload(length: usize) -> Result<Self, EncodingError> {
        match length {
            0..=0x7F => Ok(Self::One),
            0x80..=0x3FFF => Ok(Self::Two),
            0x4000..=0x1F_FFFF => Ok(Self::Three),
            0x20_0000..=0xFFF_FFFF => Ok(Self::Four),
            _ if length <= MAX_WORD_LEN => Ok(Self::Five),
            _ => Err(EncodingError::TooLong { length }),
        }
    }

    /// Selects the header width announced by the first header byte.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::ReservedControlByte`] for `0xF1..=0xFF`.
    pub const fn from_first_byte(byte: u8) -> Result<Self, FramingError> {
        match byte {
            0x00..=0x7F => Ok(Self::One),
            0x80..=0xBF => Ok(Self::Two),
            0xC0..=0xDF => Ok(Self::Three),
            0xE0..=0xEF => Ok(Self::Four),
            0xF0 => Ok(Self::Five),
            _ => Err(FramingError::ReservedControlByte { byte }),
        }
    }

    /// Number of header bytes.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
            Self::Five => 5,
        }
    }

    /// Bits of the first header byte that belong to the length value.
    const fn first_byte_mask(self) -> u8 {
        match self {
            Self::One => 0x7F,
            Self::Two => 0x3F,
            Self::Three => 0x1F,
            Self::Four => 0x0F,
            Self::Five => 0x00,
        }
    }
}

/// Outcome of [`decode_word`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// A complete word sits at the front of the buffer.
    Word {
        /// Header plus payload bytes to drop from the buffer.
        consumed: usize,
        /// The payload.
        word: &'a [u8],
    },
    /// The buffer ends inside a header or payload.
    NeedMoreData,
}

/// Encodes `payload` as a word using the shortest header.
///
/// # Errors
///
/// Returns [`EncodingError::TooLong`] for payloads of 2^32 bytes or more.
pub fn encode_word(payload: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    encode_word_into(payload, &mut out)?;
    Ok(out)
}

/// Appends the encoding of `payload` to `out`.
///
/// Nothing is written when encoding fails.
///
/// # Errors
///
/// Returns [`EncodingError::TooLong`] for payloads of 2^32 bytes or more.
pub fn encode_word_into(payload: &[u8], out: &mut Vec<u8>) -> Result<(), EncodingError> {
    let length = payload.len();
    let width = HeaderWidth::for_payload(length)?;
    let value = u32::try_from(length).map_err(|_| EncodingError::TooLong { length })?;
    let [b0, b1, b2, b3] = value.to_be_bytes();
    match width {
        HeaderWidth::One => out.push(b3),
        HeaderWidth::Two => out.extend_from_slice(&[b2 | 0x80, b3]),
        HeaderWidth::Three => out.extend_from_slice(&[b1 | 0xC0, b2, b3]),
        HeaderWidth::Four => out.extend_from_slice(&[b0 | 0xE0, b1, b2, b3]),
        HeaderWidth::Five => out.extend_from_slice(&[0xF0, b0, b1, b2, b3]),
    }
    out.extend_from_slice(payload);
    Ok(())
}

/// Encodes a whole sentence: one word per item followed by the zero-length
/// terminator.
///
/// # Errors
///
/// Returns [`EncodingError::TooLong`] if any word is too long.
pub fn encode_sentence<I, W>(words: I) -> Result<Vec<u8>, EncodingError>
where
    I: IntoIterator<Item = W>,
    W: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for word in words {
        encode_word_into(word.as_ref(), &mut out)?;
    }
    out.push(0);
    Ok(out)
}

/// Decodes the word at the front of `buffer`.
///
/// Short buffers report [`Decoded::NeedMoreData`]; the caller keeps the bytes
/// and retries once more data has arrived. Any well-formed header width is
/// accepted, including wider-than-necessary ones.
///
/// # Errors
///
/// Returns [`FramingError::ReservedControlByte`] if the first byte is a
/// reserved control form.
pub fn decode_word(buffer: &[u8]) -> Result<Decoded<'_>, FramingError> {
    let Some(&first) = buffer.first() else {
        return Ok(Decoded::NeedMoreData);
    };
    let width = HeaderWidth::from_first_byte(first)?;
    let header_len = width.len();
    let Some(header) = buffer.get(..header_len) else {
        return Ok(Decoded::NeedMoreData);
    };
    let payload_len = declared_length(width, header);
    let Some(end) = header_len.checked_add(payload_len) else {
        return Ok(Decoded::NeedMoreData);
    };
    match buffer.get(header_len..end) {
        Some(word) => Ok(Decoded::Word {
            consumed: end,
            word,
        }),
        None => Ok(Decoded::NeedMoreData),
    }
}

fn declared_length(width: HeaderWidth, header: &[u8]) -> usize {
    let mut bytes = header.iter().copied();
    let seed = bytes
        .next()
        .map_or(0, |first| usize::from(first & width.first_byte_mask()));
    bytes.fold(seed, |length, byte| (length << 8) | usize::from(byte))
}
