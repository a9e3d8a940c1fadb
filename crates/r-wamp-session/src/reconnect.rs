//! ---
//! wamp_section: "04-session-core"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Session protocol state machine and async runtime."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---

/// Saturating counter that never exceeds its maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectCounter {
    value: u32,
    max: u32,
}

impl ReconnectCounter {
    pub fn new(max: u32) -> Self {
        Self { value: 0, max }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Increment when the result stays within `max`. Returns whether it did.
    pub fn try_increment(&mut self) -> bool {
        if self.value < self.max {
            self.value += 1;
            true
        } else {
            false
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.value >= self.max
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }
}

/// What to do after an unexpected transport close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Open a new transport immediately. `attempt` is 1-based.
    Retry { attempt: u32 },
    /// Stay closed.
    GiveUp,
}

/// Immediate-retry policy bounded by `max_retries`.
///
/// With `max_retries = M` the first M unexpected closes retry and the
/// (M+1)-th is terminal. Every established session restores the full budget.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    counter: ReconnectCounter,
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            counter: ReconnectCounter::new(max_retries),
        }
    }

    pub fn on_unexpected_close(&mut self) -> ReconnectDecision {
        if self.counter.try_increment() {
            ReconnectDecision::Retry {
                attempt: self.counter.value(),
            }
        } else {
            ReconnectDecision::GiveUp
        }
    }

    pub fn on_established(&mut self) {
        self.counter.reset();
    }

    pub fn attempts(&self) -> u32 {
        self.counter.value()
    }

    pub fn max_retries(&self) -> u32 {
        self.counter.max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_saturates_at_max() {
        let mut counter = ReconnectCounter::new(2);
        assert!(counter.try_increment());
        assert!(counter.try_increment());
        assert!(counter.is_exhausted());
        assert!(!counter.try_increment());
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn counter_at_u32_max_never_wraps() {
        let mut counter = ReconnectCounter::new(u32::MAX);
        counter.value = u32::MAX - 1;
        assert!(counter.try_increment());
        assert!(!counter.try_increment());
        assert_eq!(counter.value(), u32::MAX);
    }

    #[test]
    fn policy_gives_up_on_close_after_budget() {
        let mut policy = ReconnectPolicy::new(3);
        let decisions: Vec<_> = (0..4).map(|_| policy.on_unexpected_close()).collect();
        assert_eq!(
            decisions,
            vec![
                ReconnectDecision::Retry { attempt: 1 },
                ReconnectDecision::Retry { attempt: 2 },
                ReconnectDecision::Retry { attempt: 3 },
                ReconnectDecision::GiveUp,
            ]
        );
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let mut policy = ReconnectPolicy::new(0);
        assert_eq!(policy.on_unexpected_close(), ReconnectDecision::GiveUp);
    }

    #[test]
    fn establishment_restores_budget() {
        let mut policy = ReconnectPolicy::new(1);
        assert_eq!(
            policy.on_unexpected_close(),
            ReconnectDecision::Retry { attempt: 1 }
        );
        policy.on_established();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(
            policy.on_unexpected_close(),
            ReconnectDecision::Retry { attempt: 1 }
        );
    }
}
