//! Collected reply sentences.

use serde::Serialize;
use tikapi_wire::{Sentence, SentenceKind};

/// The sentences received for one request, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Reply {
    sentences: Vec<Sentence>,
}

impl Reply {
    /// Appends a sentence.
    pub fn push(&mut self, sentence: Sentence) {
        self.sentences.push(sentence);
    }

    /// All sentences.
    #[must_use]
    pub const fn sentences(&self) -> &[Sentence] {
        self.sentences.as_slice()
    }

    /// Iterates the sentences.
    pub fn iter(&self) -> std::slice::Iter<'_, Sentence> {
        self.sentences.iter()
    }

    /// Number of sentences.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.sentences.len()
    }

    /// Reports whether no sentence has arrived.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// The first sentence.
    #[must_use]
    pub fn first(&self) -> Option<&Sentence> {
        self.sentences.first()
    }

    /// The most recent sentence.
    #[must_use]
    pub fn last(&self) -> Option<&Sentence> {
        self.sentences.last()
    }

    /// Sentences of `kind`, in order.
    pub fn of_kind(&self, kind: SentenceKind) -> impl Iterator<Item = &Sentence> {
        self.sentences.iter().filter(move |sentence| sentence.is(kind))
    }

    /// The first sentence of `kind`.
    #[must_use]
    pub fn first_of(&self, kind: SentenceKind) -> Option<&Sentence> {
        self.of_kind(kind).next()
    }

    /// The `!re` data rows.
    pub fn rows(&self) -> impl Iterator<Item = &Sentence> {
        self.of_kind(SentenceKind::Re)
    }

    /// Message of the first `!trap`, if any.
    #[must_use]
    pub fn trap_message(&self) -> Option<&str> {
        self.first_of(SentenceKind::Trap)
            .map(|trap| trap.message().unwrap_or("unknown error"))
    }

    /// Reports whether a `!done` has been received.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.first_of(SentenceKind::Done).is_some()
    }

    /// Consumes the reply into its sentences.
    #[must_use]
    pub fn into_sentences(self) -> Vec<Sentence> {
        self.sentences
    }
}

impl<'a> IntoIterator for &'a Reply {
    type Item = &'a Sentence;
    type IntoIter = std::slice::Iter<'a, Sentence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sentences.iter()
    }
}

impl FromIterator<Sentence> for Reply {
    fn from_iter<I: IntoIterator<Item = Sentence>>(iter: I) -> Self {
        Self {
            sentences: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    fn sentence(words: &[&str]) -> Sentence {
        let mut sentence = Sentence::new();
        for word in words {
            sentence.push_word(word.as_bytes());
        }
        sentence
    }

    #[fixture]
    fn interface_listing() -> Reply {
        [
            sentence(&["!re", "=name=ether1", ".tag=2"]),
            sentence(&["!re", "=name=ether2", ".tag=2"]),
            sentence(&["!trap", "=message=interrupted", ".tag=2"]),
            sentence(&["!done", ".tag=2"]),
        ]
        .into_iter()
        .collect()
    }

    #[rstest]
    fn looks_up_sentences_by_kind(interface_listing: Reply) {
        let names: Vec<_> = interface_listing
            .rows()
            .filter_map(|row| row.value("name"))
            .collect();

        assert_eq!(names, vec!["ether1", "ether2"]);
        assert_eq!(interface_listing.trap_message(), Some("interrupted"));
        assert!(interface_listing.is_done());
        assert_eq!(
            interface_listing.last().and_then(Sentence::kind),
            Some(SentenceKind::Done)
        );
    }

    #[rstest]
    fn empty_reply_has_no_trap() {
        let reply = Reply::default();

        assert!(reply.is_empty());
        assert_eq!(reply.trap_message(), None);
        assert!(!reply.is_done());
    }

    #[rstest]
    fn serializes_as_list_of_maps(interface_listing: Reply) {
        let json = serde_json::to_value(&interface_listing).expect("serialize");

        assert_eq!(json[0]["name"], "ether1");
        assert_eq!(json[3]["!done"], serde_json::Value::Null);
    }
}
