//! Inference engine session contract.
//!
//! # Architecture
//!
//! The streaming core never talks to a model binding directly; it drives an
//! [`EngineSession`], one loaded model with one active conversation:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | `reset` | Start a fresh conversation for a new round |
//! | `format_user_turn` | Apply the model's chat template to a prompt |
//! | `tokenize` / `enqueue` | Turn text into tokens and append them to the pending context |
//! | `decode_step` | Advance the engine one step (blocking) |
//! | `sample_next` | Choose the next token under a [`SamplingPolicy`] |
//! | `detokenize` | Decode one token into a text fragment |
//!
//! A session is single-threaded: exactly one round drives it at a time, and
//! the orchestrator's cycle lock enforces that upstream.
//!
//! [`SamplingPolicy`] carries the per-round controls the engine must honor:
//! requested temperature and seed, the loop-guard ban table, and stop-token
//! recognition. Implementations report every chosen token through
//! [`SamplingPolicy::accept`] so ban durations and the stop flag stay
//! correct without the engine knowing why a token was banned.
//!
//! [`ScriptedSession`] is the in-process implementation used by tests and
//! offline runs; llama.cpp-class backends implement the same trait out of
//! tree.

pub mod policy;
pub mod scripted;

pub use policy::{DEFAULT_BAN_CALLS, SamplingPolicy, StopTokens};
pub use scripted::{ScriptStep, ScriptedSession};

use edify_types::TokenId;
use thiserror::Error;

/// Failures reported by an engine backend.
///
/// A `Decode` failure is fatal to the running cycle; nothing at this layer
/// retries it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("decode step failed: {reason}")]
    Decode { reason: String },
    #[error("tokenizer rejected input: {reason}")]
    Tokenize { reason: String },
}

/// Result of one decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The engine produced logits and wants the next token sampled.
    NeedsSampling,
    /// The engine is still working through queued tokens.
    Pending,
}

/// One loaded model plus its active conversation.
///
/// Implementations are not re-entrant: callers serialize rounds externally.
pub trait EngineSession: Send {
    /// Drops the current conversation and starts an empty one. Called at
    /// the top of every round.
    fn reset(&mut self) -> Result<(), EngineError>;

    /// Applies the model's chat template to a single user turn.
    fn format_user_turn(&self, text: &str) -> String;

    /// Turns text into tokens. `add_special` controls BOS insertion;
    /// `parse_special` lets marker tokens like `</think>` tokenize as
    /// single vocabulary entries instead of plain text.
    fn tokenize(
        &mut self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError>;

    /// Appends tokens to the pending context for the next decode steps.
    fn enqueue(&mut self, tokens: &[TokenId]) -> Result<(), EngineError>;

    /// Advances the engine one step. Blocking for the duration of the step.
    fn decode_step(&mut self) -> Result<DecodeOutcome, EngineError>;

    /// Chooses the next token. Implementations must skip tokens the policy
    /// bans, honor its temperature and seed, and pass the chosen token
    /// through [`SamplingPolicy::accept`] exactly once.
    fn sample_next(&mut self, policy: &mut SamplingPolicy) -> TokenId;

    /// Decodes one token into text. Stateful: a token may land on a partial
    /// UTF-8 boundary, in which case the fragment is empty and the bytes
    /// are carried into the next call.
    fn detokenize(&mut self, token: TokenId) -> String;

    /// The stop tokens of the loaded vocabulary.
    fn stop_tokens(&self) -> StopTokens;
}
