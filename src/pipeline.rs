//! The request pipeline: classify, gate, invoke, record.
//!
//! Three terminal states per request.  High-risk prompts are refused without
//! ever touching the provider; low-risk prompts are forwarded through the
//! retrying invoker; provider failure after retries becomes a fixed
//! service-unavailable reply.  Every path calls the telemetry recorder
//! exactly once and returns that call's trace id.

use std::time::Instant;

use serde::Serialize;

use crate::classifier::RiskClassifier;
use crate::invoker::{InvocationOutcome, RetryingInvoker};
use crate::telemetry::TelemetryRecorder;

/// System instruction used when a request arrives through the support
/// endpoint.
pub const SUPPORT_SYSTEM_INSTRUCTION: &str =
    "You are a helpful Customer Support assistant for LLM Sentinel.";

/// Fixed reply when the provider keeps failing after retries.
pub const SERVICE_UNAVAILABLE_TEXT: &str = "Service temporarily unavailable (Inference Failure).";

/// Token usage attributed to one request.  Zeroed on the blocked fast path,
/// where no model call occurred.
#[derive(Clone, Debug, Serialize)]
pub struct UsageStats {
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageStats {
    pub fn zeroed(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// Explicit terminal state of a request.  The front door keys off this
/// field; nothing downstream matches on response text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStatus {
    Blocked,
    Served,
    Failed,
}

/// The contract returned to every external caller, uniform across the
/// blocked, served and failed cases.
#[derive(Clone, Debug)]
pub struct PipelineReply {
    pub text: String,
    pub usage: UsageStats,
    pub trace_id: String,
    pub status: ReplyStatus,
}

pub struct Pipeline {
    classifier: RiskClassifier,
    invoker: RetryingInvoker,
    recorder: TelemetryRecorder,
    model_id: String,
}

impl Pipeline {
    pub fn new(
        classifier: RiskClassifier,
        invoker: RetryingInvoker,
        recorder: TelemetryRecorder,
        model_id: String,
    ) -> Self {
        Self {
            classifier,
            invoker,
            recorder,
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Handle one request.  Never fails: every policy and provider
    /// condition is encoded in the returned reply.
    pub async fn handle(&self, prompt: &str, support_mode: bool) -> PipelineReply {
        let verdict = self.classifier.classify(prompt);
        let mut usage = UsageStats::zeroed(&self.model_id);

        if verdict.is_high_risk() {
            let text = format!(
                "Access Denied: Your request violates our safety policy ({}).",
                verdict.category.as_str()
            );
            tracing::info!(
                category = verdict.category.as_str(),
                injection = verdict.injection_detected,
                "blocking high-risk prompt"
            );
            let trace_id = self
                .recorder
                .record(prompt, &text, &usage, &verdict, 0, false);
            return PipelineReply {
                text,
                usage,
                trace_id,
                status: ReplyStatus::Blocked,
            };
        }

        let system_instruction = support_mode.then_some(SUPPORT_SYSTEM_INSTRUCTION);
        let start = Instant::now();
        let outcome = self.invoker.invoke(prompt, system_instruction).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (text, error, status) = match outcome {
            InvocationOutcome::Success {
                text,
                usage: tokens,
            } => {
                usage.input_tokens = tokens.input_tokens;
                usage.output_tokens = tokens.output_tokens;
                (text, false, ReplyStatus::Served)
            }
            InvocationOutcome::SafetyBlocked { placeholder_text } => {
                (placeholder_text.to_string(), false, ReplyStatus::Served)
            }
            InvocationOutcome::Failure { detail } => {
                // The raw provider error stays in telemetry; callers only
                // ever see the fixed unavailable message.
                tracing::error!(error = %detail, "provider invocation failed");
                (SERVICE_UNAVAILABLE_TEXT.to_string(), true, ReplyStatus::Failed)
            }
        };

        let trace_id = self
            .recorder
            .record(prompt, &text, &usage, &verdict, latency_ms, error);

        PipelineReply {
            text,
            usage,
            trace_id,
            status,
        }
    }
}
