//! Incremental sentence assembly over a receive buffer.

use tracing::trace;

use crate::WIRE_TARGET;
use crate::error::AssemblyError;
use crate::sentence::Sentence;
use crate::word::{Decoded, decode_word};

/// Groups decoded words into sentences.
///
/// Bytes are appended with [`extend`](Self::extend) as they arrive and
/// complete sentences are pulled with [`next_sentence`](Self::next_sentence).
/// Words split across reads stay buffered until their last byte is present.
#[derive(Debug, Default)]
pub struct SentenceAssembler {
    buffer: Vec<u8>,
    start: usize,
    pending: Sentence,
}

impl SentenceAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            start: 0,
            pending: Sentence::new(),
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.start > 0 && self.start == self.buffer.len() {
            self.buffer.clear();
            self.start = 0;
        } else if self.start.saturating_mul(2) > self.buffer.len() {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Decodes words until a sentence completes or the buffer runs dry.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Words decoded before
    /// that point are kept in the pending sentence.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError::Framing`] for a malformed header, leaving the
    /// offending bytes in place, and [`AssemblyError::EmptySentence`] when a
    /// terminator arrives with no words before it.
    pub fn next_sentence(&mut self) -> Result<Option<Sentence>, AssemblyError> {
        loop {
            let remaining = self.buffer.get(self.start..).unwrap_or_default();
            let (consumed, word) = match decode_word(remaining)? {
                Decoded::Word { consumed, word } => (consumed, word),
                Decoded::NeedMoreData => return Ok(None),
            };
            if word.is_empty() {
                self.start += consumed;
                if self.pending.is_empty() {
                    return Err(AssemblyError::EmptySentence);
                }
                let sentence = std::mem::take(&mut self.pending);
                trace!(target: WIRE_TARGET, entries = sentence.len(), "sentence complete");
                return Ok(Some(sentence));
            }
            trace!(
                target: WIRE_TARGET,
                word = %String::from_utf8_lossy(word),
                "received word"
            );
            self.pending.push_word(word);
            self.start += consumed;
        }
    }

    /// Number of received bytes not yet decoded into words.
    #[must_use]
    pub const fn buffered(&self) -> usize {
        self.buffer.len().saturating_sub(self.start)
    }

    /// Reports whether words of an unfinished sentence are held.
    #[must_use]
    pub const fn has_partial_sentence(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops buffered bytes and any partial sentence.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.start = 0;
        self.pending = Sentence::new();
    }
}
