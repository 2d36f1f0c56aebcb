//! Candidate fact lines and the per-round accumulator.

use std::fmt;

use thiserror::Error;

/// Minimum character count for an accepted fact line.
///
/// Anything shorter is stray punctuation or a list artifact, not a fact.
pub const MIN_LINE_LEN: usize = 5;

/// A fully formed line of model output: trimmed, list decoration already
/// stripped by the segmenter, long enough to plausibly be a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateLine(String);

/// Why a piece of text cannot become a [`CandidateLine`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("line is empty after trimming")]
    Empty,
    #[error("line is too short to be a fact ({len} of {MIN_LINE_LEN} chars)")]
    TooShort { len: usize },
}

impl CandidateLine {
    /// Validates and trims `value`.
    pub fn new(value: impl Into<String>) -> Result<Self, LineError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(LineError::Empty);
        }
        let len = trimmed.chars().count();
        if len < MIN_LINE_LEN {
            return Err(LineError::TooShort { len });
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CandidateLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CandidateLine {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CandidateLine {
    type Error = LineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CandidateLine {
    type Error = LineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Ordered collection of facts accepted during one generation round.
///
/// Insertion order is discovery order and is preserved; downstream
/// numbering relies on it. [`accept`](Self::accept) is the only way in and
/// refuses exact repeats, so consumers can rely on the list being
/// duplicate-free.
#[derive(Debug, Default, Clone)]
pub struct RoundFacts {
    lines: Vec<CandidateLine>,
}

impl RoundFacts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `line` unless an equal line was already accepted.
    ///
    /// Returns `true` when the line was added.
    pub fn accept(&mut self, line: CandidateLine) -> bool {
        if self.lines.contains(&line) {
            return false;
        }
        self.lines.push(line);
        true
    }

    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.lines.iter().any(|line| line.as_str() == text)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drops everything accepted so far. Used when reasoning text turns out
    /// to have leaked into the answer channel.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateLine> {
        self.lines.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[CandidateLine] {
        &self.lines
    }

    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines.into_iter().map(CandidateLine::into_inner).collect()
    }
}

impl<'a> IntoIterator for &'a RoundFacts {
    type Item = &'a CandidateLine;
    type IntoIter = std::slice::Iter<'a, CandidateLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}
