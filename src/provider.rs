//! Model provider capability.
//!
//! The pipeline depends on one narrow capability: "given a prompt and an
//! optional system instruction, return generated text and token usage, or
//! fail".  [`ModelProvider`] is that seam; [`GeminiClient`] is the shipped
//! implementation over the Gemini `generateContent` REST API.  Tests inject
//! fakes through the same trait.

use serde::{Deserialize, Serialize};

/// Token accounting reported by the provider.  Zero when the provider omits
/// usage metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One successful generation.  `text` is `None` when the upstream safety
/// filter declined to produce any content.
#[derive(Clone, Debug, Default)]
pub struct Generation {
    pub text: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Provider failure taxonomy.  Only [`ProviderError::is_rate_limited`]
/// errors are transient; everything else surfaces immediately.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rate limited (status {status}): {message}")]
    RateLimited { status: u16, message: String },
    #[error("provider returned status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("provider network error: {0}")]
    Network(String),
    #[error("provider returned a malformed response body")]
    MalformedResponse,
}

impl ProviderError {
    /// Transient rate-limit detection: a 429 status or a resource-exhaustion
    /// marker anywhere in the message.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Http { status, message } => {
                *status == 429 || message.contains("RESOURCE_EXHAUSTED")
            }
            ProviderError::Network(message) => {
                message.contains("429") || message.contains("RESOURCE_EXHAUSTED")
            }
            ProviderError::MalformedResponse => false,
        }
    }
}

#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<Generation, ProviderError>;
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Fixed sampling temperature for all generations.
const TEMPERATURE: f64 = 0.7;

/// Client for the Gemini REST API.  Content-safety judgment is largely
/// deferred to the upstream model: only the highest severity tier blocks.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model_id: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

impl GeminiClient {
    pub fn new(model_id: String, api_key: String) -> Self {
        Self::with_base_url(GEMINI_BASE_URL.to_string(), model_id, api_key)
    }

    /// Construction with an explicit base URL, used by tests pointing at a
    /// local stub server.
    pub fn with_base_url(base_url: String, model_id: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url,
            model_id,
            api_key,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn build_request<'a>(
        prompt: &'a str,
        system_instruction: Option<&'a str>,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: system_instruction.map(|text| Content {
                parts: vec![Part { text }],
            }),
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
            safety_settings: vec![
                SafetySetting {
                    category: "HARM_CATEGORY_HARASSMENT",
                    threshold: "BLOCK_ONLY_HIGH",
                },
                SafetySetting {
                    category: "HARM_CATEGORY_HATE_SPEECH",
                    threshold: "BLOCK_ONLY_HIGH",
                },
            ],
        }
    }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<Generation, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model_id
        );
        let body = Self::build_request(prompt, system_instruction);
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 || message.contains("RESOURCE_EXHAUSTED") {
                return Err(ProviderError::RateLimited {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|_| ProviderError::MalformedResponse)?;

        let text = parsed.candidates.first().and_then(|c| {
            c.content.as_ref().map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
        });
        // An empty candidate text is indistinguishable from a missing one:
        // both mean the upstream safety filter fired.
        let text = text.filter(|t| !t.is_empty());

        let usage = parsed.usage_metadata.map(|u| TokenUsage {
            input_tokens: u.prompt_token_count.unwrap_or(0),
            output_tokens: u.candidates_token_count.unwrap_or(0),
        });

        Ok(Generation { text, usage })
    }
}
