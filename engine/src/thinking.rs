//! Reasoning-phase tracking for the fragment stream.
//!
//! Models wrap their chain of thought in `<think>`/`</think>` markers.
//! Everything inside is discarded; everything after the close is answer
//! text. The tracker watches the segmenter's raw buffer and tells the
//! round runner how to react to closing markers, hallucinated repeats, and
//! echoed prompt structure.

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, Anchored, Input, MatchKind, StartKind};

/// Opening reasoning marker.
pub const THINK_OPEN: &str = "<think>";
/// Closing reasoning marker.
pub const THINK_CLOSE: &str = "</think>";

/// Marker and sentinel prefixes are only trusted near the start of a line;
/// further in, the same text is ordinary prose quoting the marker.
const PREFIX_WINDOW: usize = 20;

/// Phase of one generation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingState {
    /// No reasoning marker seen yet.
    AwaitingAnswer,
    /// Inside the reasoning block; output is discarded.
    InReasoning,
    /// Past the closing marker; output is kept.
    Answering,
}

/// What the round runner must do after a buffer inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to apply.
    Continue,
    /// The reasoning phase closed: discard the round's accumulated facts
    /// and the buffered tail, then keep generating answer text.
    AnswerBegins,
    /// A hallucinated closing marker while already answering: drop the
    /// buffered tail and end the pass. Accepted facts stand.
    RepeatedClose,
    /// The model echoed prompt structure: drop the buffered tail, treat
    /// the answer phase as begun, end the pass. Accepted facts stand.
    SentinelEcho,
}

/// One row of the sentinel table: a prefix the model is known to echo and
/// the directive it triggers. New malformed patterns are new rows here.
struct SentinelRule {
    prefix: &'static str,
    action: Directive,
}

/// Truncated closing tags of the prompt's fact sections.
const SENTINEL_RULES: [SentinelRule; 2] = [
    SentinelRule {
        prefix: "</Known",
        action: Directive::SentinelEcho,
    },
    SentinelRule {
        prefix: "</Pend",
        action: Directive::SentinelEcho,
    },
];

fn sentinel_automaton() -> &'static AhoCorasick {
    static AUTOMATON: OnceLock<AhoCorasick> = OnceLock::new();
    AUTOMATON.get_or_init(|| {
        let prefixes: Vec<&str> = SENTINEL_RULES.iter().map(|rule| rule.prefix).collect();
        AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostLongest)
            .start_kind(StartKind::Anchored)
            .build(&prefixes)
            .expect("valid sentinel prefix table")
    })
}

fn match_sentinel(buffer: &str) -> Option<&'static SentinelRule> {
    let input = Input::new(buffer).anchored(Anchored::Yes);
    sentinel_automaton()
        .find(input)
        .map(|found| &SENTINEL_RULES[found.pattern().as_usize()])
}

/// State machine distinguishing reasoning output from answer output.
///
/// Transitions only move forward; the one exception is the orchestrated
/// forced close ([`force_answering`](Self::force_answering)) after a pass
/// that never closed its reasoning block.
#[derive(Debug)]
pub struct ThinkingModeTracker {
    state: ThinkingState,
}

impl Default for ThinkingModeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkingModeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ThinkingState::AwaitingAnswer,
        }
    }

    #[must_use]
    pub fn state(&self) -> ThinkingState {
        self.state
    }

    #[must_use]
    pub fn is_in_reasoning(&self) -> bool {
        self.state == ThinkingState::InReasoning
    }

    /// The round runner injected the opening marker itself.
    pub fn begin_reasoning(&mut self) {
        self.state = ThinkingState::InReasoning;
    }

    /// Forced close: the pass ended while still reasoning, the runner
    /// injects the closing marker and resumes in the answer phase.
    pub fn force_answering(&mut self) {
        self.state = ThinkingState::Answering;
    }

    /// Inspects the segmenter's raw buffer after a fragment was appended.
    ///
    /// `round_has_facts` distinguishes a legitimate close (nothing kept
    /// yet) from a hallucinated repeat after real answer lines.
    pub fn inspect(&mut self, buffer: &str, round_has_facts: bool) -> Directive {
        let within_window = buffer.chars().count() < PREFIX_WINDOW;
        let close_seen = buffer.ends_with(THINK_CLOSE)
            || (within_window && buffer.starts_with(THINK_CLOSE));

        if close_seen && self.state == ThinkingState::Answering && round_has_facts {
            tracing::debug!("closing marker repeated after answer lines; ending pass");
            return Directive::RepeatedClose;
        }

        if within_window
            && let Some(rule) = match_sentinel(buffer)
        {
            tracing::debug!(prefix = rule.prefix, "sentinel echo in buffer");
            self.state = ThinkingState::Answering;
            return rule.action;
        }

        if close_seen {
            self.state = ThinkingState::Answering;
            return Directive::AnswerBegins;
        }

        if self.state == ThinkingState::AwaitingAnswer
            && within_window
            && buffer.trim_start().starts_with(THINK_OPEN)
        {
            self.state = ThinkingState::InReasoning;
        }

        Directive::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_awaiting_answer() {
        let tracker = ThinkingModeTracker::new();
        assert_eq!(tracker.state(), ThinkingState::AwaitingAnswer);
    }

    #[test]
    fn open_marker_enters_reasoning() {
        let mut tracker = ThinkingModeTracker::new();
        let directive = tracker.inspect("<think>\nSo the", false);
        assert_eq!(directive, Directive::Continue);
        assert!(tracker.is_in_reasoning());
    }

    #[test]
    fn close_at_buffer_end_begins_answer() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.begin_reasoning();
        let directive = tracker.inspect("long reasoning about facts </think>", false);
        assert_eq!(directive, Directive::AnswerBegins);
        assert_eq!(tracker.state(), ThinkingState::Answering);
    }

    #[test]
    fn close_at_short_buffer_start_begins_answer() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.begin_reasoning();
        assert_eq!(tracker.inspect("</think>\n", false), Directive::AnswerBegins);
    }

    #[test]
    fn repeated_close_with_facts_ends_pass() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.begin_reasoning();
        tracker.inspect("</think>", false);
        assert_eq!(tracker.state(), ThinkingState::Answering);

        let directive = tracker.inspect("</think>", true);
        assert_eq!(directive, Directive::RepeatedClose);
        assert_eq!(tracker.state(), ThinkingState::Answering);
    }

    #[test]
    fn repeated_close_without_facts_reads_as_fresh_close() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.begin_reasoning();
        tracker.inspect("</think>", false);
        assert_eq!(tracker.inspect("</think>", false), Directive::AnswerBegins);
    }

    #[test]
    fn sentinel_prefix_forces_answer_phase() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.begin_reasoning();
        let directive = tracker.inspect("</KnownFa", false);
        assert_eq!(directive, Directive::SentinelEcho);
        assert_eq!(tracker.state(), ThinkingState::Answering);
    }

    #[test]
    fn pending_sentinel_matches_too() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.force_answering();
        assert_eq!(tracker.inspect("</Pending", true), Directive::SentinelEcho);
    }

    #[test]
    fn sentinel_outside_window_is_ignored() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.force_answering();
        let directive = tracker.inspect("</KnownFacts> plus trailing prose", false);
        assert_eq!(directive, Directive::Continue);
    }

    #[test]
    fn close_prefix_outside_window_is_ignored() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.begin_reasoning();
        let directive = tracker.inspect("</think> quoted later in a long line", false);
        assert_eq!(directive, Directive::Continue);
        assert!(tracker.is_in_reasoning());
    }

    #[test]
    fn sentinel_mid_buffer_is_ignored() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.force_answering();
        assert_eq!(tracker.inspect("see </Known", true), Directive::Continue);
    }

    #[test]
    fn forced_answering_overrides_reasoning() {
        let mut tracker = ThinkingModeTracker::new();
        tracker.begin_reasoning();
        tracker.force_answering();
        assert_eq!(tracker.state(), ThinkingState::Answering);
    }
}
