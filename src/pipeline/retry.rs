//! Retry/backoff policy for completion calls.
//!
//! Kept free of I/O so the wait schedule can be tested without a server:
//! [`RetryPolicy::delay_for`] maps `(attempt, failure class)` to either a
//! wait duration or "give up". The extraction client owns the loop; this
//! module only answers how long to wait.
//!
//! ## Schedule (defaults: 5 s base, 7 attempts)
//!
//! | Failure       | Wait after attempt `n` (0-based)          |
//! |---------------|-------------------------------------------|
//! | connect/timeout | `base * 2^n`                            |
//! | read stall    | `base * 2^n + network_error_delay`        |
//! | HTTP 429      | `base * 2^n + rate_limit_penalty`         |
//! | other         | `base`                                    |
//!
//! Non-429 HTTP statuses never reach this module: the client propagates
//! them on the spot.

use crate::config::ExtractionConfig;
use crate::error::TransportKind;
use std::time::Duration;

/// Why one attempt failed, as far as retry timing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transport failure of the given kind.
    Transport(TransportKind),
    /// HTTP 429.
    RateLimited,
    /// Anything else: unreadable envelope, missing `choices`, decode error.
    Other,
}

/// Pure retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub read_stall_extra_ms: u64,
    pub rate_limit_extra_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay_ms: config.retry_delay_ms,
            read_stall_extra_ms: config.network_error_delay_ms,
            rate_limit_extra_ms: config.rate_limit_penalty_ms,
        }
    }

    /// Wait before the next attempt, or `None` if `attempt` was the last.
    pub fn delay_for(&self, attempt: u32, class: FailureClass) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }
        let ms = match class {
            FailureClass::Transport(TransportKind::Read) => {
                self.exponential(attempt).saturating_add(self.read_stall_extra_ms)
            }
            FailureClass::Transport(_) => self.exponential(attempt),
            FailureClass::RateLimited => {
                self.exponential(attempt).saturating_add(self.rate_limit_extra_ms)
            }
            FailureClass::Other => self.base_delay_ms,
        };
        Some(Duration::from_millis(ms))
    }

    fn exponential(&self, attempt: u32) -> u64 {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 7,
            base_delay_ms: 5_000,
            read_stall_extra_ms: 15_000,
            rate_limit_extra_ms: 5_000,
        }
    }

    fn ms(d: Option<Duration>) -> Option<u128> {
        d.map(|d| d.as_millis())
    }

    #[test]
    fn connect_failures_back_off_exponentially() {
        let p = policy();
        let class = FailureClass::Transport(TransportKind::Connect);
        assert_eq!(ms(p.delay_for(0, class)), Some(5_000));
        assert_eq!(ms(p.delay_for(1, class)), Some(10_000));
        assert_eq!(ms(p.delay_for(3, class)), Some(40_000));
    }

    #[test]
    fn read_stalls_wait_longer() {
        let p = policy();
        let class = FailureClass::Transport(TransportKind::Read);
        assert_eq!(ms(p.delay_for(0, class)), Some(20_000));
        assert_eq!(ms(p.delay_for(2, class)), Some(35_000));
    }

    #[test]
    fn rate_limit_adds_penalty() {
        let p = policy();
        assert_eq!(ms(p.delay_for(1, FailureClass::RateLimited)), Some(15_000));
    }

    #[test]
    fn other_failures_use_fixed_delay() {
        let p = policy();
        assert_eq!(ms(p.delay_for(0, FailureClass::Other)), Some(5_000));
        assert_eq!(ms(p.delay_for(5, FailureClass::Other)), Some(5_000));
    }

    #[test]
    fn last_attempt_gives_up() {
        let p = policy();
        assert!(p.delay_for(6, FailureClass::Other).is_none());
        assert!(p.delay_for(6, FailureClass::RateLimited).is_none());
        let single = RetryPolicy { max_attempts: 1, ..p };
        assert!(single.delay_for(0, FailureClass::Transport(TransportKind::Timeout)).is_none());
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let p = RetryPolicy { max_attempts: u32::MAX, ..policy() };
        let d = p.delay_for(80, FailureClass::Transport(TransportKind::Connect)).unwrap();
        assert_eq!(d, Duration::from_millis(u64::MAX));
    }

    #[test]
    fn from_config_reads_delays() {
        let config = ExtractionConfig::default();
        let p = RetryPolicy::from_config(&config);
        assert_eq!(p.max_attempts, 7);
        assert_eq!(p.read_stall_extra_ms, 15_000);
    }
}
