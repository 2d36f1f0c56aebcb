//! Core domain types for Edify.
//!
//! Pure vocabulary shared by every layer: validated candidate fact lines,
//! the per-round accumulator, the cross-cycle sampling temperature, and the
//! styling hints carried by progress narration. No IO, no async, so every
//! crate in the workspace can depend on this one.

mod line;
mod progress;
mod temperature;

pub use line::{CandidateLine, LineError, MIN_LINE_LEN, RoundFacts};
pub use progress::Hint;
pub use temperature::Temperature;

/// Identifier for one entry of the loaded model's vocabulary.
///
/// Signed to match what llama-family engines hand back; the scripted
/// session synthesizes stable non-negative ids.
pub type TokenId = i32;
