//! Bounded, selective retry around the model provider.
//!
//! The invoker owns exactly one concern: turn a provider call into an
//! [`InvocationOutcome`], retrying rate-limited attempts with randomized
//! exponential backoff and surfacing everything else immediately.  It never
//! sees the risk verdict (gating is the pipeline's job) and never emits
//! metrics (that is the recorder's job), so it can be tested with a fake
//! provider and no sink dependencies.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::provider::{ModelProvider, ProviderError, TokenUsage};

/// Placeholder returned when the upstream safety filter declined to
/// generate.  A non-retryable, non-error outcome.
pub const SAFETY_BLOCKED_TEXT: &str = "Safety filter triggered: Response blocked by Google.";

/// Terminal result of one gated invocation.
#[derive(Clone, Debug)]
pub enum InvocationOutcome {
    Success {
        text: String,
        usage: TokenUsage,
    },
    SafetyBlocked {
        placeholder_text: &'static str,
    },
    /// All attempts exhausted or a permanent error.  `detail` is for the
    /// telemetry log only and must never reach user-visible text.
    Failure {
        detail: String,
    },
}

/// Explicit retry policy: which errors retry, how many total attempts, and
/// how long to wait between them.  Kept as a plain value object so the
/// predicate and backoff curve are testable without any network.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Only transient rate-limit conditions are worth a second attempt.
    pub fn should_retry(&self, err: &ProviderError) -> bool {
        err.is_rate_limited()
    }

    /// Randomized exponential backoff for the given 1-based attempt number,
    /// clamped to `[min_backoff, max_backoff]`.  The wait is drawn uniformly
    /// from `[min, min * 2^(attempt-1)]` capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .min_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        if ceiling <= self.min_backoff {
            return self.min_backoff;
        }
        let span = (ceiling - self.min_backoff).as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=span);
        self.min_backoff + Duration::from_millis(jitter)
    }
}

/// Wraps a [`ModelProvider`] with the retry policy.
pub struct RetryingInvoker {
    provider: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(provider: Arc<dyn ModelProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn invoke(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> InvocationOutcome {
        let mut attempt = 1u32;
        loop {
            match self.provider.generate(prompt, system_instruction).await {
                Ok(generation) => {
                    let usage = generation.usage.unwrap_or_default();
                    return match generation.text {
                        Some(text) if !text.is_empty() => {
                            InvocationOutcome::Success { text, usage }
                        }
                        _ => InvocationOutcome::SafetyBlocked {
                            placeholder_text: SAFETY_BLOCKED_TEXT,
                        },
                    };
                }
                Err(err) => {
                    if self.policy.should_retry(&err) && attempt < self.policy.max_attempts {
                        let wait = self.policy.backoff(attempt);
                        tracing::warn!(
                            attempt,
                            max_attempts = self.policy.max_attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %err,
                            "rate limited, backing off before retry"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }
                    return InvocationOutcome::Failure {
                        detail: err.to_string(),
                    };
                }
            }
        }
    }
}
