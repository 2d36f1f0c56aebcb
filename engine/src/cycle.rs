//! One full discovery cycle: compact, generate, evaluate, persist.
//!
//! A cycle runs to completion on whatever thread calls it; the
//! orchestrator decides whether that thread is the foreground or a
//! background worker and guarantees only one cycle holds the engine at a
//! time. The resting state between cycles is simply the absence of a
//! running one.

use edify_session::EngineSession;
use edify_store::{DiscoveryStore, FactId};
use edify_types::{Hint, Temperature};
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::prompt;
use crate::round::{CancelFlag, RoundError, run_round};
use crate::sink::Progress;

/// Facts compacted per round. Keeps each compaction prompt well inside
/// the context window.
const COMPACTION_CHUNK: usize = 20;

/// The phase a cycle is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Compacting,
    Generating,
    Evaluating,
    Persisting,
}

impl CyclePhase {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Compacting => "compacting",
            Self::Generating => "generating",
            Self::Evaluating => "evaluating",
            Self::Persisting => "persisting",
        }
    }

    fn announce(self) -> Option<&'static str> {
        match self {
            Self::Compacting => Some("\nCompacting known facts to keep prompts small..."),
            Self::Generating => Some("\nGenerating new facts..."),
            Self::Evaluating => Some("\nEvaluating the generated facts..."),
            // The persist outcome line carries its own message.
            Self::Persisting => None,
        }
    }
}

/// What one cycle accomplished.
#[derive(Debug)]
pub struct CycleReport {
    /// Known facts that received a compacted form.
    pub compacted: usize,
    /// Candidate lines the generation round produced.
    pub generated: usize,
    /// Survivors written to the pending queue.
    pub persisted: usize,
    /// Temperature to use for the next cycle: zero after any success,
    /// raised by one step after a dry cycle.
    pub temperature: Temperature,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Engine(#[from] edify_session::EngineError),
    #[error("cycle cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<RoundError> for CycleError {
    fn from(err: RoundError) -> Self {
        match err {
            RoundError::Engine(engine) => Self::Engine(engine),
            RoundError::Cancelled => Self::Cancelled,
        }
    }
}

/// Runs one discovery cycle against `session` and `store`.
///
/// Compaction progress is persisted batch by batch, so an interrupted
/// cycle never loses the compacted forms already produced. Generation
/// runs at the supplied temperature; evaluation and compaction always run
/// greedy. An engine failure aborts the cycle with nothing persisted from
/// the generation that failed.
pub fn run_cycle<S: EngineSession>(
    session: &mut S,
    store: &mut DiscoveryStore,
    temperature: Temperature,
    config: &GenerationConfig,
    sink: &dyn Progress,
    cancel: &CancelFlag,
) -> Result<CycleReport, CycleError> {
    if cancel.is_cancelled() {
        return Err(CycleError::Cancelled);
    }

    enter(CyclePhase::Compacting, sink);
    let compacted = compact_known_facts(session, store, config, sink, cancel)?;

    let interests = names(store.interests()?);
    let dislikes = names(store.dislikes()?);
    let known = dedupe_context(store)?;

    enter(CyclePhase::Generating, sink);
    let generation = prompt::generation_prompt(&interests, &dislikes, &known);
    let outcome = run_round(
        session,
        &generation,
        &config.round_options(temperature),
        sink,
        cancel,
    )?;
    let candidates = outcome.facts.into_lines();
    let generated = candidates.len();
    tracing::info!(
        candidates = generated,
        forced_close = outcome.forced_close,
        repeats = outcome.repeats,
        "generation round finished"
    );

    let survivors = if candidates.is_empty() {
        Vec::new()
    } else {
        enter(CyclePhase::Evaluating, sink);
        let evaluation = prompt::evaluation_prompt(&dislikes, &known, &candidates);
        let outcome = run_round(
            session,
            &evaluation,
            &config.round_options(Temperature::ZERO),
            sink,
            cancel,
        )?;
        outcome.facts.into_lines()
    };

    enter(CyclePhase::Persisting, sink);
    let mut temperature = temperature;
    if survivors.is_empty() {
        temperature.escalate(config.temperature_step, config.temperature_cap);
        sink.line(
            &format!(
                "\nNo new facts survived. Raising temperature to {:.1}.",
                temperature.value()
            ),
            Hint::Warning,
        );
        tracing::warn!(
            temperature = temperature.value(),
            "cycle yielded nothing; temperature raised"
        );
    } else {
        store.append_pending(&survivors)?;
        let plural = if survivors.len() == 1 { "" } else { "s" };
        sink.line(
            &format!(
                "\n{} new fact{plural} added to the pending list.",
                survivors.len()
            ),
            Hint::Success,
        );
        tracing::info!(persisted = survivors.len(), "cycle persisted new pending facts");
        temperature.reset();
    }

    Ok(CycleReport {
        compacted,
        generated,
        persisted: survivors.len(),
        temperature,
    })
}

/// Re-runs evaluation over the pending queue after the user's preferences
/// changed, replacing the queue with the survivors.
pub fn reevaluate_pending<S: EngineSession>(
    session: &mut S,
    store: &mut DiscoveryStore,
    config: &GenerationConfig,
    sink: &dyn Progress,
    cancel: &CancelFlag,
) -> Result<usize, CycleError> {
    let pending: Vec<String> = store
        .pending_facts()?
        .into_iter()
        .map(|fact| fact.text)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    sink.line(
        "\nPreferences changed; re-evaluating the pending facts...",
        Hint::Note,
    );
    let dislikes = names(store.dislikes()?);
    let known: Vec<String> = store
        .known_facts()?
        .iter()
        .map(|fact| fact.prompt_text().to_string())
        .collect();
    let evaluation = prompt::evaluation_prompt(&dislikes, &known, &pending);
    let outcome = run_round(
        session,
        &evaluation,
        &config.round_options(Temperature::ZERO),
        sink,
        cancel,
    )?;
    let survivors = outcome.facts.into_lines();
    store.replace_pending(&survivors)?;
    tracing::info!(
        kept = survivors.len(),
        dropped = pending.len().saturating_sub(survivors.len()),
        "pending facts re-evaluated"
    );
    Ok(survivors.len())
}

fn compact_known_facts<S: EngineSession>(
    session: &mut S,
    store: &mut DiscoveryStore,
    config: &GenerationConfig,
    sink: &dyn Progress,
    cancel: &CancelFlag,
) -> Result<usize, CycleError> {
    let missing = store.facts_missing_compacted()?;
    if missing.is_empty() {
        tracing::debug!("no facts awaiting compaction");
        return Ok(0);
    }

    let mut stored = 0usize;
    for chunk in missing.chunks(COMPACTION_CHUNK) {
        if cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        let texts: Vec<String> = chunk.iter().map(|fact| fact.text.clone()).collect();
        let compaction = prompt::compaction_prompt(&texts);
        let outcome = run_round(
            session,
            &compaction,
            &config.round_options(Temperature::ZERO),
            sink,
            cancel,
        )?;
        let lines = outcome.facts.into_lines();
        if lines.len() < chunk.len() {
            // Models skip or merge lines sometimes; the unmatched facts
            // stay uncompacted and get another chance next cycle.
            tracing::warn!(
                expected = chunk.len(),
                got = lines.len(),
                "compaction batch came back short"
            );
        }
        let pairs: Vec<(FactId, String)> = chunk
            .iter()
            .zip(lines)
            .map(|(fact, line)| (fact.id, line))
            .collect();
        stored += pairs.len();
        // Persist per batch so an interruption keeps the progress.
        store.store_compacted(&pairs)?;
    }
    Ok(stored)
}

fn enter(phase: CyclePhase, sink: &dyn Progress) {
    tracing::info!(phase = phase.label(), "cycle phase");
    if let Some(text) = phase.announce() {
        sink.line(text, Hint::Note);
    }
}

/// Compacted known facts plus verbatim pending texts: generating ahead
/// must not reinvent a fact that is merely waiting to be served.
fn dedupe_context(store: &DiscoveryStore) -> Result<Vec<String>, CycleError> {
    let mut context: Vec<String> = store
        .known_facts()?
        .iter()
        .map(|fact| fact.prompt_text().to_string())
        .collect();
    context.extend(store.pending_facts()?.into_iter().map(|fact| fact.text));
    Ok(context)
}

fn names(preferences: Vec<edify_store::Preference>) -> Vec<String> {
    preferences.into_iter().map(|p| p.name).collect()
}
