//! Styling hints for progress narration.

/// How a piece of progress text should be presented.
///
/// Sinks map hints to whatever styling they have: colors on a terminal,
/// nothing in a log file. Hints never carry control-flow meaning; dropping
/// them entirely must not change behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    /// Unstyled text.
    Plain,
    /// Raw token-stream echo, visually quiet.
    Stream,
    /// Phase markers and recovery notes.
    Note,
    /// An accepted fact or a completed cycle.
    Success,
    /// Escalations and tolerated anomalies.
    Warning,
    /// A failure worth the user's attention.
    Error,
}
