//! Transaction configuration.

use std::time::Duration;

/// What to do when pre-commit recalculation does not converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePolicy {
    /// Log the circular dependency and commit anyway.
    #[default]
    LogAndProceed,
    /// Roll the transaction back and fail the commit.
    Fail,
}

/// Configuration for a mesh base's transaction manager.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long `create_transaction_asap` waits for the slot.
    pub asap_timeout: Duration,

    /// Consecutive non-shrinking recalculation rounds tolerated before a
    /// cycle is declared.
    ///
    /// A straight chain of projections dirties one object per round, so a
    /// chain longer than this bound is reported as a cycle as well. Under
    /// [`CyclePolicy::LogAndProceed`] the objects past the bound are then
    /// committed without being recalculated.
    pub max_recalculate_attempts: u32,

    /// Reaction to a detected recalculation cycle.
    pub cycle_policy: CyclePolicy,

    /// Maximum retries of a transaction action (None = unbounded).
    pub action_retry_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            asap_timeout: Duration::from_secs(5),
            max_recalculate_attempts: 20,
            cycle_policy: CyclePolicy::LogAndProceed,
            action_retry_limit: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the asap wait timeout.
    #[must_use]
    pub const fn asap_timeout(mut self, timeout: Duration) -> Self {
        self.asap_timeout = timeout;
        self
    }

    /// Sets the recalculation attempt bound.
    #[must_use]
    pub const fn max_recalculate_attempts(mut self, attempts: u32) -> Self {
        self.max_recalculate_attempts = attempts;
        self
    }

    /// Sets the cycle policy.
    #[must_use]
    pub const fn cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Bounds the number of retries of a transaction action.
    #[must_use]
    pub const fn action_retry_limit(mut self, limit: Option<u32>) -> Self {
        self.action_retry_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_recalculate_attempts, 20);
        assert_eq!(config.cycle_policy, CyclePolicy::LogAndProceed);
        assert!(config.action_retry_limit.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .asap_timeout(Duration::from_millis(50))
            .cycle_policy(CyclePolicy::Fail)
            .action_retry_limit(Some(3));

        assert_eq!(config.asap_timeout, Duration::from_millis(50));
        assert_eq!(config.cycle_policy, CyclePolicy::Fail);
        assert_eq!(config.action_retry_limit, Some(3));
    }
}
