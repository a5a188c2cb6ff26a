//! Shared fakes for integration tests: a scripted model provider and a
//! capturing log sink, wired through the same public seams production uses.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sentinel::classifier::{RiskClassifier, RuleSet};
use sentinel::invoker::{RetryPolicy, RetryingInvoker};
use sentinel::pipeline::Pipeline;
use sentinel::provider::{Generation, ModelProvider, ProviderError, TokenUsage};
use sentinel::telemetry::{LogSink, TelemetryRecorder};

pub const TEST_MODEL: &str = "gemini-2.0-flash";

/// What the fake provider should do on every call.
#[allow(dead_code)]
pub enum FakeBehavior {
    /// Succeed with this text and some token usage.
    Reply(&'static str),
    /// Succeed with no text (upstream safety filter fired).
    SafetyFiltered,
    /// Fail every call with a permanent (non-retryable) error.
    PermanentError,
    /// Fail every call with a rate-limit error.
    RateLimited,
}

pub struct FakeProvider {
    pub behavior: FakeBehavior,
    pub calls: AtomicU32,
    pub last_system_instruction: Mutex<Option<String>>,
}

impl FakeProvider {
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
            last_system_instruction: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelProvider for FakeProvider {
    async fn generate(
        &self,
        _prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system_instruction.lock().unwrap() =
            system_instruction.map(|s| s.to_string());
        match self.behavior {
            FakeBehavior::Reply(text) => Ok(Generation {
                text: Some(text.to_string()),
                usage: Some(TokenUsage {
                    input_tokens: 8,
                    output_tokens: 21,
                }),
            }),
            FakeBehavior::SafetyFiltered => Ok(Generation {
                text: None,
                usage: None,
            }),
            FakeBehavior::PermanentError => Err(ProviderError::Network(
                "connection timed out".to_string(),
            )),
            FakeBehavior::RateLimited => Err(ProviderError::RateLimited {
                status: 429,
                message: "RESOURCE_EXHAUSTED".to_string(),
            }),
        }
    }
}

/// Log sink that keeps every record in memory for assertions.
#[derive(Default)]
pub struct CapturingLog {
    pub records: Mutex<Vec<serde_json::Value>>,
}

impl LogSink for CapturingLog {
    fn append(&self, record: &serde_json::Value) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Millisecond-scale retry policy so failure scenarios stay fast.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// Assemble a pipeline around the fake provider and capturing log, using the
/// default rule sets and no metrics sink.
pub fn build_pipeline(provider: Arc<FakeProvider>, log: Arc<CapturingLog>) -> Pipeline {
    let classifier = RiskClassifier::new(RuleSet::default());
    let invoker = RetryingInvoker::new(provider, fast_policy());
    let recorder = TelemetryRecorder::new(None, Some(log));
    Pipeline::new(classifier, invoker, recorder, TEST_MODEL.to_string())
}

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: std::collections::HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: std::collections::HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        self.originals
            .insert(key.to_string(), std::env::var(key).ok());
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}
