//! Wire framing for the RouterOS API protocol.
//!
//! The protocol moves *words* (length-prefixed byte strings) grouped into
//! *sentences* that end with a zero-length word. This crate owns both
//! directions of that framing and nothing else: it performs no I/O and keeps
//! no connection state beyond the partially received sentence held by
//! [`SentenceAssembler`].
//!
//! - [`encode_word`] / [`decode_word`] implement the variable-width length
//!   header (1 to 5 bytes).
//! - [`Sentence`] is the ordered key to optional value map built from the
//!   words of one message.
//! - [`SentenceAssembler`] turns a growing receive buffer into complete
//!   sentences, tolerating reads that split words at any byte boundary.
//!
//! # Example
//!
//! ```
//! use tikapi_wire::{SentenceAssembler, SentenceKind, encode_sentence};
//!
//! let bytes = encode_sentence(["!done", ".tag=7"])?;
//! let mut assembler = SentenceAssembler::new();
//! assembler.extend(&bytes);
//! let sentence = assembler.next_sentence()?.expect("complete sentence");
//! assert_eq!(sentence.kind(), Some(SentenceKind::Done));
//! assert_eq!(sentence.tag(), Some("7"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod assembler;
mod error;
mod sentence;
mod word;

pub use assembler::SentenceAssembler;
pub use error::{AssemblyError, EncodingError, FramingError};
pub use sentence::{Sentence, SentenceKind, TAG_KEY};
pub use word::{
    Decoded, HeaderWidth, MAX_WORD_LEN, decode_word, encode_sentence, encode_word,
    encode_word_into,
};

/// Log target for word-level wire tracing.
pub const WIRE_TARGET: &str = "tikapi::wire";
