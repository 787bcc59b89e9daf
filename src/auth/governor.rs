//! Consecutive-failure lockout for login attempts
//!
//! Two states per identity, `Normal` and `Locked`. The governor only computes
//! transitions; `UserRepository` applies them inside an immediate transaction
//! so concurrent attempts against one account are counted one by one.

use chrono::{DateTime, Duration, Utc};

/// Lockout columns of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub locked: bool,
    pub lockout_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    /// Locked with an unexpired `lockout_until`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        match (self.locked, self.lockout_until) {
            (true, Some(until)) => until > now,
            // A lock without a deadline never lapses on its own
            (true, None) => true,
            (false, _) => false,
        }
    }
}

/// Result of asking whether an attempt may proceed to password comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Locked { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy)]
pub struct LoginGovernor {
    threshold: u32,
    lockout: Duration,
}

impl Default for LoginGovernor {
    fn default() -> Self {
        Self::new(5, std::time::Duration::from_secs(30 * 60))
    }
}

impl LoginGovernor {
    pub fn new(threshold: u32, lockout: std::time::Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            lockout: Duration::from_std(lockout).unwrap_or_else(|_| Duration::minutes(30)),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// An expired lock admits the attempt; it is cleared by the attempt's outcome.
    pub fn admit(&self, state: &LockoutState, now: DateTime<Utc>) -> Admission {
        if state.is_locked_at(now) {
            Admission::Locked {
                until: state.lockout_until.unwrap_or(now + self.lockout),
            }
        } else {
            Admission::Allowed
        }
    }

    /// Transition for a confirmed password mismatch
    pub fn on_failure(&self, state: &LockoutState, now: DateTime<Utc>) -> LockoutState {
        if state.is_locked_at(now) {
            return *state;
        }

        let previous = if state.locked { 0 } else { state.failed_attempts };
        let failed_attempts = previous.saturating_add(1);

        if failed_attempts >= self.threshold {
            LockoutState {
                failed_attempts,
                locked: true,
                lockout_until: Some(now + self.lockout),
            }
        } else {
            LockoutState {
                failed_attempts,
                locked: false,
                lockout_until: None,
            }
        }
    }

    /// Transition for a successful authentication or a password reset
    pub fn on_success(&self) -> LockoutState {
        LockoutState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> LoginGovernor {
        LoginGovernor::new(5, std::time::Duration::from_secs(1800))
    }

    #[test]
    fn test_counts_up_to_threshold_then_locks() {
        let governor = governor();
        let now = Utc::now();
        let mut state = LockoutState::default();

        for expected in 1..5 {
            state = governor.on_failure(&state, now);
            assert_eq!(state.failed_attempts, expected);
            assert!(!state.locked);
            assert_eq!(governor.admit(&state, now), Admission::Allowed);
        }

        state = governor.on_failure(&state, now);
        assert_eq!(state.failed_attempts, 5);
        assert!(state.locked);
        assert_eq!(state.lockout_until, Some(now + Duration::minutes(30)));
        assert_eq!(
            governor.admit(&state, now),
            Admission::Locked { until: now + Duration::minutes(30) }
        );
    }

    #[test]
    fn test_failures_while_locked_do_not_extend_lock() {
        let governor = governor();
        let now = Utc::now();
        let locked = LockoutState {
            failed_attempts: 5,
            locked: true,
            lockout_until: Some(now + Duration::minutes(10)),
        };

        assert_eq!(governor.on_failure(&locked, now), locked);
    }

    #[test]
    fn test_expired_lock_admits_and_restarts_count() {
        let governor = governor();
        let now = Utc::now();
        let expired = LockoutState {
            failed_attempts: 5,
            locked: true,
            lockout_until: Some(now - Duration::seconds(1)),
        };

        assert_eq!(governor.admit(&expired, now), Admission::Allowed);

        let next = governor.on_failure(&expired, now);
        assert_eq!(next.failed_attempts, 1);
        assert!(!next.locked);
        assert_eq!(next.lockout_until, None);
    }

    #[test]
    fn test_success_resets_everything() {
        assert_eq!(governor().on_success(), LockoutState::default());
    }

    #[test]
    fn test_locked_implies_threshold_reached() {
        let governor = LoginGovernor::new(3, std::time::Duration::from_secs(60));
        let now = Utc::now();
        let mut state = LockoutState::default();

        for _ in 0..10 {
            state = governor.on_failure(&state, now);
            if state.locked {
                assert!(state.failed_attempts >= governor.threshold());
            }
        }
    }
}
