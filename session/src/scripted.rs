//! Deterministic in-process engine for tests and offline runs.

use std::collections::VecDeque;
use std::time::Duration;

use edify_types::TokenId;

use crate::{DecodeOutcome, EngineError, EngineSession, SamplingPolicy, StopTokens};

/// End-of-sequence token id of the scripted vocabulary.
pub const EOS_TOKEN: TokenId = 2;
/// End-of-turn token id of the scripted vocabulary.
pub const EOT_TOKEN: TokenId = 3;

/// Fragment token ids count up from here; word ids from [`word_token`] live
/// in a disjoint high range, so the two spaces cannot collide.
const FRAGMENT_ID_BASE: TokenId = 16;
const WORD_ID_BASE: TokenId = 0x4000_0000;

/// One step of a scripted generation.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit this text as the next decoded fragment.
    Fragment(String),
    /// Emit the end-of-sequence token.
    Stop,
    /// Emit the end-of-turn token (the hallucinated stop case).
    TurnStop,
}

impl ScriptStep {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Fragment(text.into())
    }
}

/// Engine double that replays a fixed script of fragments.
///
/// The script spans rounds: each round consumes steps until a stop token,
/// and the next round picks up where the previous one left off, which is
/// how one script covers a whole compact/generate/evaluate cycle. An
/// exhausted script yields the stop token forever, so over-long cycles end
/// gracefully instead of hanging.
///
/// Everything the driving code asks of the session is recorded: formatted
/// prompts, tokenized text (which is how corrective injections become
/// visible to tests), and reset counts.
#[derive(Debug)]
pub struct ScriptedSession {
    script: VecDeque<ScriptStep>,
    fragments: Vec<String>,
    tokenize_log: Vec<String>,
    prompts: Vec<String>,
    resets: usize,
    decode_calls: usize,
    fail_decode_at: Option<usize>,
    decode_delay: Option<Duration>,
}

impl ScriptedSession {
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fragments: Vec::new(),
            tokenize_log: Vec::new(),
            prompts: Vec::new(),
            resets: 0,
            decode_calls: 0,
            fail_decode_at: None,
            decode_delay: None,
        }
    }

    /// Script built from plain fragments followed by one stop.
    #[must_use]
    pub fn from_fragments(fragments: &[&str]) -> Self {
        let mut script: Vec<ScriptStep> = fragments
            .iter()
            .map(|fragment| ScriptStep::fragment(*fragment))
            .collect();
        script.push(ScriptStep::Stop);
        Self::new(script)
    }

    /// Offline backend with a small canned discovery run: one generation
    /// round that thinks briefly and lists a handful of facts, then one
    /// evaluation round that keeps most of them.
    #[must_use]
    pub fn with_canned_facts() -> Self {
        let mut script = Vec::new();
        script.push(ScriptStep::fragment(
            "The user wants short factual statements. I will list a few.\n",
        ));
        script.push(ScriptStep::fragment("</think>"));
        for fact in CANNED_FACTS {
            script.push(ScriptStep::fragment(format!("\n{fact}")));
        }
        script.push(ScriptStep::Stop);
        script.push(ScriptStep::fragment(
            "Keeping the distinct, relevant ones.\n",
        ));
        script.push(ScriptStep::fragment("</think>"));
        for fact in CANNED_FACTS.iter().take(3) {
            script.push(ScriptStep::fragment(format!("\n{fact}")));
        }
        script.push(ScriptStep::Stop);
        Self::new(script)
    }

    /// Makes the `n`th decode step (1-based) fail, modeling a backend
    /// reporting a non-success decode status.
    #[must_use]
    pub fn fail_decode_at(mut self, n: usize) -> Self {
        self.fail_decode_at = Some(n);
        self
    }

    /// Sleeps this long on every decode step, modeling a model that takes
    /// real time per token.
    #[must_use]
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = Some(delay);
        self
    }

    /// Every piece of text the driver tokenized, in order. Prompt
    /// submissions, reasoning seeds, and corrective injections all pass
    /// through here.
    #[must_use]
    pub fn tokenize_log(&self) -> &[String] {
        &self.tokenize_log
    }

    /// Prompts that went through the chat template, in order.
    #[must_use]
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    #[must_use]
    pub fn resets(&self) -> usize {
        self.resets
    }

    #[must_use]
    pub fn remaining_steps(&self) -> usize {
        self.script.len()
    }
}

impl EngineSession for ScriptedSession {
    fn reset(&mut self) -> Result<(), EngineError> {
        self.resets += 1;
        Ok(())
    }

    fn format_user_turn(&self, text: &str) -> String {
        format!("<|user|>\n{text}\n<|assistant|>\n")
    }

    fn tokenize(
        &mut self,
        text: &str,
        _add_special: bool,
        _parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError> {
        self.tokenize_log.push(text.to_string());
        if text.contains("<|user|>") {
            self.prompts.push(text.to_string());
        }
        Ok(text.split_whitespace().map(word_token).collect())
    }

    fn enqueue(&mut self, _tokens: &[TokenId]) -> Result<(), EngineError> {
        Ok(())
    }

    fn decode_step(&mut self) -> Result<DecodeOutcome, EngineError> {
        self.decode_calls += 1;
        if self.fail_decode_at == Some(self.decode_calls) {
            return Err(EngineError::Decode {
                reason: "scripted decode failure".to_string(),
            });
        }
        if let Some(delay) = self.decode_delay {
            std::thread::sleep(delay);
        }
        Ok(DecodeOutcome::NeedsSampling)
    }

    fn sample_next(&mut self, policy: &mut SamplingPolicy) -> TokenId {
        let token = match self.script.pop_front() {
            Some(ScriptStep::Fragment(text)) => {
                self.fragments.push(text);
                FRAGMENT_ID_BASE + (self.fragments.len() as TokenId - 1)
            }
            Some(ScriptStep::Stop) | None => EOS_TOKEN,
            Some(ScriptStep::TurnStop) => EOT_TOKEN,
        };
        policy.accept(token);
        token
    }

    fn detokenize(&mut self, token: TokenId) -> String {
        if token >= FRAGMENT_ID_BASE && token < WORD_ID_BASE {
            let index = (token - FRAGMENT_ID_BASE) as usize;
            self.fragments
                .get(index)
                .cloned()
                .unwrap_or_default()
        } else {
            String::new()
        }
    }

    fn stop_tokens(&self) -> StopTokens {
        StopTokens {
            end_of_sequence: EOS_TOKEN,
            end_of_turn: Some(EOT_TOKEN),
        }
    }
}

/// Stable token id for one whitespace-separated word.
///
/// FNV-1a folded into the high id range. Tests lean on the stability: the
/// first token of a duplicated line tokenizes to the same id every time.
#[must_use]
pub fn word_token(word: &str) -> TokenId {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    WORD_ID_BASE | ((hash as TokenId) & 0x3FFF_FFFF)
}

const CANNED_FACTS: [&str; 5] = [
    "Honey found in Egyptian tombs is still edible after three thousand years.",
    "Octopuses have three hearts and blue blood.",
    "A day on Venus lasts longer than its year.",
    "Bananas are berries but strawberries are not.",
    "The Eiffel Tower grows about fifteen centimeters in summer heat.",
];

#[cfg(test)]
mod tests {
    use super::*;
    use edify_types::Temperature;

    fn policy(session: &ScriptedSession) -> SamplingPolicy {
        SamplingPolicy::new(Temperature::ZERO, session.stop_tokens())
    }

    #[test]
    fn replays_fragments_then_stops() {
        let mut session = ScriptedSession::from_fragments(&["Hello", " world\n"]);
        let mut policy = policy(&session);

        let first = session.sample_next(&mut policy);
        assert_eq!(session.detokenize(first), "Hello");
        let second = session.sample_next(&mut policy);
        assert_eq!(session.detokenize(second), " world\n");

        let stop = session.sample_next(&mut policy);
        assert!(policy.is_end_of_generation(stop));
        assert!(policy.stop_observed());
    }

    #[test]
    fn exhausted_script_keeps_stopping() {
        let mut session = ScriptedSession::new([ScriptStep::Stop]);
        let mut policy = policy(&session);
        assert_eq!(session.sample_next(&mut policy), EOS_TOKEN);
        assert_eq!(session.sample_next(&mut policy), EOS_TOKEN);
    }

    #[test]
    fn turn_stop_emits_end_of_turn() {
        let mut session = ScriptedSession::new([ScriptStep::TurnStop]);
        let mut policy = policy(&session);
        let token = session.sample_next(&mut policy);
        assert_eq!(token, EOT_TOKEN);
        assert!(policy.stop_observed());
    }

    #[test]
    fn scripted_decode_failure_fires_once() {
        let mut session = ScriptedSession::from_fragments(&["hi there"]).fail_decode_at(2);
        assert!(session.decode_step().is_ok());
        assert!(session.decode_step().is_err());
    }

    #[test]
    fn word_tokens_are_stable() {
        assert_eq!(word_token("Fact"), word_token("Fact"));
        assert_ne!(word_token("Fact"), word_token("fact"));
    }

    #[test]
    fn tokenize_records_text() {
        let mut session = ScriptedSession::from_fragments(&[]);
        let tokens = session.tokenize("Fact A", false, false).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(session.tokenize_log(), ["Fact A"]);
    }
}
