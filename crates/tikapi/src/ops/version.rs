//! RouterOS version ordering.

use std::cmp::Ordering;

/// Compares two version strings such as `6.49.7`, `7.1rc4` or
/// `7.15.3 (stable)`.
///
/// Versions split on `.`, `rc`, `beta` and `alpha`; each part contributes
/// its leading digits (or zero). Parts compare pairwise and, when all shared
/// parts are equal, the version with fewer parts orders first.
#[must_use]
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left = version_parts(left);
    let right = version_parts(right);
    left.iter()
        .zip(&right)
        .map(|(a, b)| a.cmp(b))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| left.len().cmp(&right.len()))
}

fn version_parts(version: &str) -> Vec<u64> {
    let mut parts: Vec<&str> = Vec::new();
    let mut rest = version;
    while let Some((index, separator)) = next_separator(rest) {
        parts.push(rest.get(..index).unwrap_or_default());
        rest = rest.get(index + separator.len()..).unwrap_or_default();
    }
    parts.push(rest);
    while parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }
    parts.into_iter().map(leading_number).collect()
}

fn next_separator(text: &str) -> Option<(usize, &'static str)> {
    [".", "rc", "beta", "alpha"]
        .into_iter()
        .filter_map(|separator| text.find(separator).map(|index| (index, separator)))
        .min_by_key(|(index, _)| *index)
}

/// Value of the leading ASCII digits of `text`, zero when there are none.
pub(crate) fn leading_number(text: &str) -> u64 {
    let digits = text
        .trim_start()
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or_default();
    digits.parse().unwrap_or(0)
}
