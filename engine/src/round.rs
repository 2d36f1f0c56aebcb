//! One generation round: prompt in, deduplicated fact lines out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use edify_session::{DecodeOutcome, EngineError, EngineSession, SamplingPolicy};
use edify_types::{Hint, RoundFacts, Temperature, TokenId};
use thiserror::Error;

use crate::guard::{LoopGuard, Verdict};
use crate::segment::StreamSegmenter;
use crate::sink::Progress;
use crate::thinking::{Directive, THINK_CLOSE, ThinkingModeTracker};

/// Injected right after the prompt so every round opens its reasoning
/// phase deterministically instead of hoping the model does.
const REASONING_SEED: &str = "<think>\rOkay, ";

/// Knobs for one round.
#[derive(Debug, Clone)]
pub struct RoundOptions {
    pub temperature: Temperature,
    /// Maximum sampled tokens per pass. The forced-close retry gets a
    /// fresh budget.
    pub token_budget: usize,
    /// Sampling calls a repeat's leading token stays banned.
    pub ban_calls: u32,
    /// Only the end-of-sequence token stops generation.
    pub strict_turn_stop: bool,
}

impl Default for RoundOptions {
    fn default() -> Self {
        Self {
            temperature: Temperature::ZERO,
            token_budget: 4096,
            ban_calls: edify_session::DEFAULT_BAN_CALLS,
            strict_turn_stop: false,
        }
    }
}

/// What a completed round produced.
#[derive(Debug)]
pub struct RoundOutcome {
    pub facts: RoundFacts,
    /// The model never closed its reasoning phase and the runner closed it.
    pub forced_close: bool,
    /// Repeats the loop guard converted into corrective re-prompts.
    pub repeats: usize,
    /// Tokens banned by the loop guard, in the order they were banned.
    pub bans_issued: Vec<TokenId>,
}

#[derive(Debug, Error)]
pub enum RoundError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("round cancelled")]
    Cancelled,
}

/// Cooperative cancellation for in-flight rounds, checked at fragment
/// boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs one full generation round against `session`.
///
/// The conversation is reset, the templated prompt and reasoning seed go
/// in, and tokens stream out through the segmenter until a stop token or
/// the budget ends the pass. If the pass ends with the reasoning phase
/// still open, everything accumulated is invalid: the runner discards it,
/// injects the closing marker, and lets generation resume once. Repeats
/// never terminate a round; they become corrective context and a token
/// ban.
pub fn run_round<S: EngineSession + ?Sized>(
    session: &mut S,
    prompt: &str,
    options: &RoundOptions,
    sink: &dyn Progress,
    cancel: &CancelFlag,
) -> Result<RoundOutcome, RoundError> {
    session.reset()?;

    let mut policy = SamplingPolicy::new(options.temperature, session.stop_tokens())
        .with_strict_turn_stop(options.strict_turn_stop);

    let templated = session.format_user_turn(prompt);
    let prompt_tokens = session.tokenize(&templated, true, true)?;
    session.enqueue(&prompt_tokens)?;
    let seed_tokens = session.tokenize(REASONING_SEED, false, true)?;
    session.enqueue(&seed_tokens)?;

    let mut segmenter = StreamSegmenter::new();
    let mut tracker = ThinkingModeTracker::new();
    tracker.begin_reasoning();
    let mut guard = LoopGuard::new();
    let mut facts = RoundFacts::new();
    let mut bans_issued = Vec::new();
    let mut forced_close = false;

    loop {
        let mut sampled = 0usize;

        while sampled < options.token_budget {
            if cancel.is_cancelled() {
                tracing::info!("round cancelled at fragment boundary");
                return Err(RoundError::Cancelled);
            }

            if session.decode_step()? == DecodeOutcome::Pending {
                continue;
            }

            let token = session.sample_next(&mut policy);
            if policy.is_end_of_generation(token) {
                break;
            }
            sampled += 1;

            let fragment = session.detokenize(token);
            if fragment.is_empty() {
                // Partial UTF-8 boundary; bytes carry into the next token.
                session.enqueue(&[token])?;
                continue;
            }
            segmenter.append(&fragment);

            match tracker.inspect(segmenter.buffer(), !facts.is_empty()) {
                Directive::Continue => {}
                Directive::AnswerBegins => {
                    // Reasoning is over. Anything gathered so far was
                    // reasoning-phase leakage.
                    facts.clear();
                    segmenter.clear_buffer();
                }
                Directive::RepeatedClose | Directive::SentinelEcho => {
                    segmenter.clear_buffer();
                    break;
                }
            }

            if fragment.contains('\n') {
                let completed = segmenter.drain_complete();
                if tracker.is_in_reasoning() {
                    // Reasoning lines drop without touching the round.
                } else {
                    let mut corrected = false;
                    for line in completed {
                        match guard.check(&line, &facts) {
                            Verdict::Accept => {
                                facts.accept(line);
                            }
                            Verdict::Repeat { correction } => {
                                if corrected {
                                    // One correction per fragment is enough.
                                    continue;
                                }
                                corrected = true;
                                if let Some(first) =
                                    session.tokenize(line.as_str(), false, false)?.first()
                                {
                                    policy.register_ban(*first, options.ban_calls);
                                    bans_issued.push(*first);
                                }
                                let tail = fragment
                                    .split('\n')
                                    .next()
                                    .unwrap_or("")
                                    .trim_end_matches('.');
                                let injected = format!("{tail}{correction}");
                                let corrective = session.tokenize(&injected, false, true)?;
                                session.enqueue(&corrective)?;
                            }
                        }
                    }
                    if corrected {
                        // The corrective context replaces this token.
                        continue;
                    }
                }
            }

            sink.write(&fragment, Hint::Stream);
            session.enqueue(&[token])?;
        }

        if !tracker.is_in_reasoning()
            && let Some(last) = segmenter.flush()
        {
            facts.accept(last);
        }

        if tracker.is_in_reasoning() && !forced_close {
            forced_close = true;
            facts.clear();
            segmenter.clear_buffer();
            tracker.force_answering();
            let close_tokens = session.tokenize(THINK_CLOSE, false, true)?;
            session.enqueue(&close_tokens)?;
            sink.line(" [reasoning never closed; closing it]", Hint::Note);
            tracing::info!("pass ended inside reasoning; forcing close and resuming");
            continue;
        }

        break;
    }

    Ok(RoundOutcome {
        facts,
        forced_close,
        repeats: guard.repeats(),
        bans_issued,
    })
}
