//! Failure classification and backoff policy.

use std::time::Duration;

use crate::remote::RemoteError;

/// Bounds on automatic retrying of transient failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Transient failures tolerated per attempt window before an
    /// operation escalates to `failed`
    pub budget: u32,
    /// First backoff delay; doubles on every subsequent failure
    pub base_delay: Duration,
    /// Ceiling on the exponential backoff
    pub max_delay: Duration,
    /// Minimum delay while the link is degraded
    pub degraded_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            degraded_floor: Duration::from_secs(30),
        }
    }
}

/// What to do with an operation after a remote failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Defer and re-attempt after `delay`
    Retry { delay: Duration },
    /// Transient budget spent; escalate to manual review
    Exhausted,
    /// Pause until the session is refreshed
    AwaitAuth,
    /// Permanent rejection with the server's reason
    Reject { reason: String },
}

impl RetryPolicy {
    /// Delay before the attempt following `attempts_in_window` failures
    #[must_use]
    pub fn backoff_delay(&self, attempts_in_window: u32, degraded: bool) -> Duration {
        // 2^n with the shift clamped well below overflow
        let factor = 1_u32 << attempts_in_window.min(16);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if degraded {
            delay.max(self.degraded_floor)
        } else {
            delay
        }
    }

    /// Classify a remote failure for an operation that has already
    /// accumulated `attempts_in_window` failures in its current window
    #[must_use]
    pub fn classify(
        &self,
        error: &RemoteError,
        attempts_in_window: u32,
        degraded: bool,
    ) -> Disposition {
        match error {
            RemoteError::Transient(_) => {
                if attempts_in_window + 1 >= self.budget {
                    Disposition::Exhausted
                } else {
                    Disposition::Retry {
                        delay: self.backoff_delay(attempts_in_window + 1, degraded),
                    }
                }
            }
            RemoteError::AuthExpired(_) => Disposition::AwaitAuth,
            RemoteError::Validation(reason) => Disposition::Reject {
                reason: reason.clone(),
            },
            // missing records surface as conflicts before classification;
            // reaching here means the server lost the record mid-apply
            RemoteError::NotFound => Disposition::Reject {
                reason: "record not found".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            budget: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            degraded_floor: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_delay(0, false), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(1, false), Duration::from_secs(4));
        assert_eq!(p.backoff_delay(3, false), Duration::from_secs(16));
        assert_eq!(p.backoff_delay(10, false), Duration::from_secs(60));
    }

    #[test]
    fn test_degraded_raises_floor() {
        let p = policy();
        assert_eq!(p.backoff_delay(0, true), Duration::from_secs(30));
        // already above the floor; unchanged
        assert_eq!(p.backoff_delay(5, true), Duration::from_secs(60));
    }

    #[test]
    fn test_transient_retries_until_budget() {
        let p = policy();
        let error = RemoteError::Transient("connection reset".to_string());

        assert!(matches!(
            p.classify(&error, 0, false),
            Disposition::Retry { .. }
        ));
        assert!(matches!(
            p.classify(&error, 3, false),
            Disposition::Retry { .. }
        ));
        // fifth consecutive failure exhausts the budget
        assert_eq!(p.classify(&error, 4, false), Disposition::Exhausted);
    }

    #[test]
    fn test_auth_pauses_without_spending_budget() {
        let p = policy();
        let error = RemoteError::AuthExpired("token expired".to_string());
        assert_eq!(p.classify(&error, 4, false), Disposition::AwaitAuth);
    }

    #[test]
    fn test_validation_rejects_with_reason() {
        let p = policy();
        let error = RemoteError::Validation("weight must be positive".to_string());
        assert_eq!(
            p.classify(&error, 0, false),
            Disposition::Reject {
                reason: "weight must be positive".to_string()
            }
        );
    }
}
