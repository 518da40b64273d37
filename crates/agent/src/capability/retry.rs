use std::time::Duration;

use rand::Rng;
use supportline_core::config::CapabilityConfig;
use supportline_core::domain::tool::{FailureKind, Idempotency, ToolFailure, ToolResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

/// One retry policy shared by every capability call.
///
/// Only transient failures of idempotent operations are retried. Failures of
/// non-idempotent operations are never retried and are reclassified so the
/// caller can tell "did not happen" apart from "may have happened".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 200, max_delay_ms: 2_000, jitter: true }
    }
}

impl From<&CapabilityConfig> for RetryPolicy {
    fn from(config: &CapabilityConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn without_delay(max_retries: u32) -> Self {
        Self { max_retries, base_delay_ms: 0, max_delay_ms: 0, jitter: false }
    }

    /// `attempt` is zero-based: the first call is attempt 0.
    pub fn decide(
        &self,
        idempotency: Idempotency,
        result: &ToolResult,
        attempt: u32,
    ) -> RetryDecision {
        let Some(kind) = result.failure_kind() else {
            return RetryDecision::Stop;
        };

        let retryable = idempotency == Idempotency::Idempotent && kind.is_transient();
        if retryable && attempt < self.max_retries {
            RetryDecision::Retry { delay: self.backoff(attempt) }
        } else {
            RetryDecision::Stop
        }
    }

    /// Capped exponential backoff. With jitter the delay lands in the upper
    /// half of the capped value.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);

        if !self.jitter || delay_ms < 2 {
            return Duration::from_millis(delay_ms);
        }

        let half = delay_ms / 2;
        let jittered = half + rand::thread_rng().gen_range(0..=delay_ms - half);
        Duration::from_millis(jittered)
    }

    /// Final shape of a result once no more attempts will be made.
    pub fn settle(&self, idempotency: Idempotency, result: ToolResult) -> ToolResult {
        match (idempotency, result) {
            (Idempotency::NonIdempotent, ToolResult::Failure(failure))
                if matches!(failure.kind, FailureKind::Timeout | FailureKind::Transient) =>
            {
                ToolResult::Failure(ToolFailure::new(
                    FailureKind::AmbiguousNonIdempotent,
                    format!("outcome unknown after {}: {}", failure.kind.as_str(), failure.message),
                ))
            }
            (_, result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use supportline_core::domain::tool::{FailureKind, Idempotency, ToolPayload, ToolResult};

    use super::{RetryDecision, RetryPolicy};

    #[test]
    fn transient_idempotent_failures_retry_until_bound() {
        let policy = RetryPolicy::without_delay(2);
        let timeout = ToolResult::failure(FailureKind::Timeout, "slow");

        assert!(matches!(
            policy.decide(Idempotency::Idempotent, &timeout, 0),
            RetryDecision::Retry { .. }
        ));
        assert!(matches!(
            policy.decide(Idempotency::Idempotent, &timeout, 1),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(Idempotency::Idempotent, &timeout, 2), RetryDecision::Stop);
    }

    #[test]
    fn application_failures_and_successes_never_retry() {
        let policy = RetryPolicy::without_delay(3);
        for kind in [
            FailureKind::NotFound,
            FailureKind::Validation,
            FailureKind::InvalidCredentials,
            FailureKind::Rejected,
        ] {
            let result = ToolResult::failure(kind, "no");
            assert_eq!(policy.decide(Idempotency::Idempotent, &result, 0), RetryDecision::Stop);
        }

        let success = ToolResult::Success(ToolPayload::text("ok"));
        assert_eq!(policy.decide(Idempotency::Idempotent, &success, 0), RetryDecision::Stop);
    }

    #[test]
    fn non_idempotent_failures_are_never_retried() {
        let policy = RetryPolicy::without_delay(5);
        for kind in [FailureKind::Timeout, FailureKind::Transient, FailureKind::Unreachable] {
            let result = ToolResult::failure(kind, "lost");
            assert_eq!(policy.decide(Idempotency::NonIdempotent, &result, 0), RetryDecision::Stop);
        }
    }

    #[test]
    fn settle_marks_ambiguous_order_outcomes() {
        let policy = RetryPolicy::default();

        let timed_out = policy.settle(
            Idempotency::NonIdempotent,
            ToolResult::failure(FailureKind::Timeout, "no reply"),
        );
        assert_eq!(timed_out.failure_kind(), Some(FailureKind::AmbiguousNonIdempotent));

        let refused = policy.settle(
            Idempotency::NonIdempotent,
            ToolResult::failure(FailureKind::Unreachable, "connection refused"),
        );
        assert_eq!(refused.failure_kind(), Some(FailureKind::Unreachable));

        let idempotent = policy
            .settle(Idempotency::Idempotent, ToolResult::failure(FailureKind::Timeout, "slow"));
        assert_eq!(idempotent.failure_kind(), Some(FailureKind::Timeout));
    }

    #[test]
    fn backoff_is_capped_and_jitter_stays_in_upper_half() {
        let policy =
            RetryPolicy { max_retries: 10, base_delay_ms: 100, max_delay_ms: 1_000, jitter: false };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(8), Duration::from_millis(1_000));

        let jittered = RetryPolicy { jitter: true, ..policy };
        for attempt in 0..6 {
            let capped = (100_u64 << attempt).min(1_000);
            let delay = jittered.backoff(attempt).as_millis() as u64;
            assert!(delay >= capped / 2 && delay <= capped, "delay {delay} for cap {capped}");
        }
    }
}
