//! Streaming core for Edify: fact extraction, loop defense, and cycle
//! orchestration.
//!
//! # Architecture
//!
//! A generation **round** drives one `EngineSession` conversation: tokens
//! are sampled one at a time, decoded into fragments, and pushed through
//! the [`StreamSegmenter`]; the [`ThinkingModeTracker`] decides which side
//! of the reasoning markers each piece of buffer falls on, and the
//! [`LoopGuard`] turns exact repetition into corrective re-prompting
//! instead of a wasted round. [`run_round`](round::run_round) wires the
//! three together.
//!
//! A **cycle** strings rounds into compact, generate, evaluate, persist
//! (see [`cycle`]), with the temperature escalation decided as the cycle
//! closes. The [`Orchestrator`] serializes cycles behind one lock, runs
//! them on blocking workers, and owns the background/foreground handoff
//! through a [`RedirectableSink`].

mod config;
mod cycle;
mod guard;
mod orchestrator;
mod prompt;
mod round;
mod segment;
mod sink;
mod thinking;

pub use config::{
    ConfigError, EdifyConfig, EngineConfig, GenerationConfig, StorageConfig, default_db_path,
    default_log_dir, discover_model_path,
};
pub use cycle::{CycleError, CyclePhase, CycleReport, reevaluate_pending, run_cycle};
pub use guard::{LoopGuard, Verdict};
pub use orchestrator::{CycleTask, EngineSlot, Orchestrator};
pub use prompt::{compaction_prompt, evaluation_prompt, generation_prompt};
pub use round::{CancelFlag, RoundError, RoundOptions, RoundOutcome, run_round};
pub use segment::{StreamSegmenter, strip_list_markers};
pub use sink::{FileSink, MemorySink, Progress, RedirectableSink};
pub use thinking::{Directive, THINK_CLOSE, THINK_OPEN, ThinkingModeTracker, ThinkingState};
