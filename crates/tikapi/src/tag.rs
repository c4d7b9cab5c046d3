//! Request correlation tags.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Correlation tag of a request on one connection.
///
/// Tags come from a per-connection counter and are never reused while the
/// connection value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u64);

impl Tag {
    /// Wraps a raw tag value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw tag value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Text that is not a tag in the form this crate writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tag '{text}'")]
pub struct TagParseError {
    text: String,
}

impl FromStr for Tag {
    type Err = TagParseError;

    /// Accepts only canonical decimal: digits without sign or leading zeros.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let canonical = !text.is_empty()
            && text.bytes().all(|byte| byte.is_ascii_digit())
            && (text == "0" || !text.starts_with('0'));
        let invalid = || TagParseError {
            text: text.to_owned(),
        };
        if !canonical {
            return Err(invalid());
        }
        text.parse().map(Self).map_err(|_| invalid())
    }
}

/// Monotonic tag source.
#[derive(Debug, Default)]
pub(crate) struct TagSequence {
    next: u64,
}

impl TagSequence {
    pub(crate) const fn next_tag(&mut self) -> Tag {
        let tag = Tag(self.next);
        self.next += 1;
        tag
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn sequence_is_monotonic() {
        let mut tags = TagSequence::default();
        let issued: Vec<_> = (0..4).map(|_| tags.next_tag().get()).collect();

        assert_eq!(issued, vec![0, 1, 2, 3]);
    }

    #[rstest]
    #[case("0", Some(0))]
    #[case("42", Some(42))]
    #[case("-1", None)]
    #[case("abc", None)]
    #[case("", None)]
    #[case("+5", None)]
    #[case("05", None)]
    #[case("00", None)]
    #[case(" 7", None)]
    #[case("18446744073709551616", None)]
    fn parses_wire_tags(#[case] text: &str, #[case] expected: Option<u64>) {
        assert_eq!(text.parse::<Tag>().ok().map(Tag::get), expected);
    }
}
