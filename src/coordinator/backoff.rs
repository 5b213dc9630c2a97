//! Exponential retry delays for connection-level failures.

use std::time::Duration;

use crate::error::FailureKind;

/// Protocol failures (refused, bad credentials) rarely clear up quickly, so
/// they enter the sequence this many doublings further along.
const PROTOCOL_HEAD_START: u32 = 4;

/// Per-source backoff state. Reset after every successful cycle.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            failures: 0,
        }
    }

    /// Delay before the next attempt after a failure of `kind`.
    pub fn next_delay(&mut self, kind: FailureKind) -> Duration {
        let step = match kind {
            FailureKind::Timeout => self.failures,
            FailureKind::Protocol => self.failures.saturating_add(PROTOCOL_HEAD_START),
        };
        self.failures = self.failures.saturating_add(1);

        let factor = 1u32.checked_shl(step).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_timeouts_double_until_capped() {
        let mut backoff = Backoff::new(secs(5), secs(60));
        let delays: Vec<_> = (0..6)
            .map(|_| backoff.next_delay(FailureKind::Timeout))
            .collect();
        assert_eq!(
            delays,
            vec![secs(5), secs(10), secs(20), secs(40), secs(60), secs(60)]
        );
    }

    #[test]
    fn test_protocol_failures_start_further_along() {
        let mut backoff = Backoff::new(secs(5), secs(300));
        assert_eq!(backoff.next_delay(FailureKind::Protocol), secs(80));
        assert_eq!(backoff.next_delay(FailureKind::Protocol), secs(160));
        assert_eq!(backoff.next_delay(FailureKind::Protocol), secs(300));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(secs(1), secs(100));
        backoff.next_delay(FailureKind::Timeout);
        backoff.next_delay(FailureKind::Timeout);
        assert_eq!(backoff.failures(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(FailureKind::Timeout), secs(1));
    }

    #[test]
    fn test_huge_attempt_counts_stay_capped() {
        let mut backoff = Backoff::new(secs(5), secs(300));
        for _ in 0..100 {
            assert!(backoff.next_delay(FailureKind::Protocol) <= secs(300));
        }
    }
}
