//! Decoded sentences.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Key carrying the correlation tag of a sentence.
pub const TAG_KEY: &str = ".tag";

/// Sentence-type keys sent by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentenceKind {
    /// `!done`: the final sentence of a reply.
    Done,
    /// `!re`: one data row.
    Re,
    /// `!trap`: the command failed or was interrupted.
    Trap,
    /// `!fatal`: the device is closing the connection.
    Fatal,
}

impl SentenceKind {
    /// All kinds, in lookup order.
    pub const ALL: [Self; 4] = [Self::Done, Self::Re, Self::Trap, Self::Fatal];

    /// The word that marks a sentence of this kind.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Done => "!done",
            Self::Re => "!re",
            Self::Trap => "!trap",
            Self::Fatal => "!fatal",
        }
    }
}

impl fmt::Display for SentenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// An ordered map of keys to optional values.
///
/// Entries keep the position of their first insertion; inserting an
/// existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    entries: Vec<(String, Option<String>)>,
}

impl Sentence {
    /// Creates an empty sentence.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts or replaces `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Adds one received word.
    ///
    /// Words of the form `key=value` or `=key=value`, with a non-empty key
    /// free of `=`, split at the first `=` after the key. Any other word is
    /// stored unchanged as a bare key. Invalid UTF-8 is replaced.
    pub fn push_word(&mut self, word: &[u8]) {
        let text = String::from_utf8_lossy(word);
        let body = text.strip_prefix('=').unwrap_or(&text);
        match body.split_once('=') {
            Some((key, value)) if !key.is_empty() => self.insert(key, Some(value.to_owned())),
            _ => self.insert(text.as_ref(), None),
        }
    }

    /// Looks up `key`. The outer `Option` reports presence.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_deref())
    }

    /// Returns the value of `key` when present with a value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).flatten()
    }

    /// Reports whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the sentence type, if any type key is present.
    #[must_use]
    pub fn kind(&self) -> Option<SentenceKind> {
        SentenceKind::ALL
            .into_iter()
            .find(|kind| self.contains_key(kind.key()))
    }

    /// Reports whether this sentence is of `kind`.
    #[must_use]
    pub fn is(&self, kind: SentenceKind) -> bool {
        self.contains_key(kind.key())
    }

    /// Returns the raw correlation tag.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.value(TAG_KEY)
    }

    /// Returns the `message` value carried by traps and fatals.
    ///
    /// Devices send the reason of a `!fatal` as a bare word; that word is
    /// returned when no `message` attribute is present.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.value("message").or_else(|| {
            if !self.is(SentenceKind::Fatal) {
                return None;
            }
            self.entries
                .iter()
                .find(|(key, value)| {
                    value.is_none()
                        && !SentenceKind::ALL.iter().any(|kind| kind.key() == key.as_str())
                })
                .map(|(key, _)| key.as_str())
        })
    }

    /// Iterates entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether the sentence has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for Sentence
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        let mut sentence = Self::new();
        for (key, value) in iter {
            sentence.insert(key, value.map(Into::into));
        }
        sentence
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match value {
                Some(value) => write!(f, "{key}={value}")?,
                None => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

impl Serialize for Sentence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
