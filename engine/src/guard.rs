//! Loop detection and corrective re-prompting.
//!
//! When the model emits a line it already produced this round, aborting
//! would throw away everything the round has computed so far. Instead the
//! guard rejects the repeat, hands the runner a corrective interruption to
//! splice into the conversation, and the repeated line's leading token gets
//! a short ban. The model reads the interruption as its own self-catch and
//! moves on.

use edify_types::{CandidateLine, RoundFacts};

/// Interruptions spliced into the stream mid-line. Each starts with a dash
/// pair so it reads as the model cutting itself off, and ends with a
/// newline so the broken line is closed out.
const CORRECTIVE_PHRASES: [&str; 9] = [
    "--wait, I already said that one. Something different:\n",
    "--hold on, that fact came up earlier. A fresh one instead:\n",
    "--no, I mentioned that already. Moving to a new topic:\n",
    "--scratch that, it repeats an earlier line. Next:\n",
    "--hmm, I used that one before. Let me pick another:\n",
    "--that one is a duplicate. Here is a new fact:\n",
    "--I covered that above. Switching to something else:\n",
    "--actually, I wrote that earlier. A different fact:\n",
    "--stop, that repeats itself. On to a new one:\n",
];

/// Outcome of checking one candidate against the round so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New line, accept it.
    Accept,
    /// Exact repeat of an accepted line: splice `correction` into the
    /// conversation and ban the repeat's leading token.
    Repeat { correction: &'static str },
}

/// Per-round repetition guard.
#[derive(Debug, Default)]
pub struct LoopGuard {
    repeats: usize,
}

impl LoopGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repeats caught this round.
    #[must_use]
    pub fn repeats(&self) -> usize {
        self.repeats
    }

    /// Checks `candidate` against the lines the round has accepted.
    pub fn check(&mut self, candidate: &CandidateLine, facts: &RoundFacts) -> Verdict {
        if !facts.contains(candidate.as_str()) {
            return Verdict::Accept;
        }
        self.repeats += 1;
        let correction = CORRECTIVE_PHRASES[rand::random_range(0..CORRECTIVE_PHRASES.len())];
        tracing::debug!(line = candidate.as_str(), "repeat detected, injecting correction");
        Verdict::Repeat { correction }
    }
}
