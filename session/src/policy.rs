//! Per-round sampling controls: temperature, token bans, stop catching.

use std::collections::HashMap;

use edify_types::{Temperature, TokenId};

/// How many sampling calls a loop-guard ban stays active by default.
pub const DEFAULT_BAN_CALLS: u32 = 6;

/// Stop tokens of a loaded vocabulary.
///
/// `end_of_turn` is technically reserved for closing a user turn, but
/// models hallucinate it as a generation stop often enough that the policy
/// accepts it by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTokens {
    pub end_of_sequence: TokenId,
    pub end_of_turn: Option<TokenId>,
}

/// Sampling controls for one generation round.
///
/// Owned by the round, lent to the engine on every sampling call. The ban
/// table maps tokens to the number of remaining sampling calls they stay
/// suppressed for; entries expire on their own as calls elapse.
#[derive(Debug)]
pub struct SamplingPolicy {
    temperature: Temperature,
    seed: u64,
    stop: StopTokens,
    strict_turn_stop: bool,
    bans: HashMap<TokenId, u32>,
    stop_observed: bool,
}

impl SamplingPolicy {
    /// Builds a policy for one round. The sampler seed is drawn fresh so
    /// repeated non-greedy rounds do not replay each other.
    #[must_use]
    pub fn new(temperature: Temperature, stop: StopTokens) -> Self {
        Self {
            temperature,
            seed: rand::random::<u64>(),
            stop,
            strict_turn_stop: false,
            bans: HashMap::new(),
            stop_observed: false,
        }
    }

    /// Restricts stop recognition to the true end-of-sequence token.
    #[must_use]
    pub fn with_strict_turn_stop(mut self, strict: bool) -> Self {
        self.strict_turn_stop = strict;
        self
    }

    #[must_use]
    pub fn temperature(&self) -> Temperature {
        self.temperature
    }

    /// Seed the engine's distribution sampler should use when the
    /// temperature is non-greedy.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Suppresses `token` for the next `calls` sampling calls.
    pub fn register_ban(&mut self, token: TokenId, calls: u32) {
        if calls == 0 {
            return;
        }
        tracing::debug!(token, calls, "registering token ban");
        let remaining = self.bans.entry(token).or_insert(0);
        *remaining = (*remaining).max(calls);
    }

    /// Whether `token` is currently suppressed. Engines consult this while
    /// ranking candidates.
    #[must_use]
    pub fn is_banned(&self, token: TokenId) -> bool {
        self.bans.contains_key(&token)
    }

    /// Remaining sampling calls for a banned token, if any.
    #[must_use]
    pub fn ban_remaining(&self, token: TokenId) -> Option<u32> {
        self.bans.get(&token).copied()
    }

    /// Records the token an engine actually chose. Ages the ban table by
    /// one call and latches the stop flag when a stop token goes by.
    pub fn accept(&mut self, token: TokenId) {
        self.bans.retain(|_, remaining| {
            *remaining -= 1;
            *remaining > 0
        });
        if self.is_end_of_generation(token) {
            self.stop_observed = true;
        }
    }

    /// Whether `token` ends the generation.
    #[must_use]
    pub fn is_end_of_generation(&self, token: TokenId) -> bool {
        if token == self.stop.end_of_sequence {
            return true;
        }
        if self.strict_turn_stop {
            return false;
        }
        self.stop.end_of_turn == Some(token)
    }

    /// Latched once a stop token has been accepted.
    #[must_use]
    pub fn stop_observed(&self) -> bool {
        self.stop_observed
    }
}
