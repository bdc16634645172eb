//! Reply drafting through an LLM provider.
//!
//! The worker only depends on the `Commenter` trait; concrete providers are
//! chosen once at startup from configuration. Drafting may fail, in which
//! case callers fall back to `FALLBACK_REPLY` rather than failing the item.

use async_trait::async_trait;
use resona_core::{CoreError, Engagement, JobOptions, LlmConfig, LlmError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Used whenever drafting fails or produces an empty reply.
pub const FALLBACK_REPLY: &str = "Great point, thanks for sharing this!";

/// Longest content excerpt forwarded to the provider.
const MAX_CONTENT_CHARS: usize = 800;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CommentRequest<'a> {
    pub content: &'a str,
    pub engagement: Engagement,
    pub options: &'a JobOptions,
}

#[async_trait]
pub trait Commenter: Send + Sync {
    async fn draft(&self, request: &CommentRequest<'_>) -> Result<String, CoreError>;
}

/// Drafting prompt shared by all providers.
pub fn build_prompt(request: &CommentRequest<'_>) -> String {
    let excerpt = truncate_chars(request.content, MAX_CONTENT_CHARS);
    let mut prompt = format!(
        "Write a {} reply of at most {} words to the following social post. \
         The post has {} reactions and {} replies, so match the energy of an \
         engaged reader without overselling.\n\nPost:\n{}\n\n",
        request.options.tone.as_str(),
        request.options.length.word_budget(),
        request.engagement.reactions,
        request.engagement.replies,
        excerpt
    );

    if request.options.want_emoji {
        prompt.push_str("Include at most one fitting emoji. ");
    } else {
        prompt.push_str("Do not use emoji. ");
    }
    if request.options.want_hashtags {
        prompt.push_str("End with one relevant hashtag. ");
    } else {
        prompt.push_str("Do not use hashtags. ");
    }
    prompt.push_str("Reply with the comment text only.");
    prompt
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn clean_reply(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}

/// Build the configured provider. Fails fast on an unknown provider name or
/// a missing API key so misconfiguration is a startup error, not a per-item
/// fallback.
pub fn commenter_from_config(config: &LlmConfig) -> Result<Arc<dyn Commenter>, CoreError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        CoreError::Config(resona_core::ConfigError::MissingField {
            field: "llm.api_key".to_string(),
        })
    })?;

    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCommenter::new(api_key, config.model.clone()))),
        "claude" | "anthropic" => {
            Ok(Arc::new(ClaudeCommenter::new(api_key, config.model.clone())))
        }
        other => Err(CoreError::Config(resona_core::ConfigError::InvalidValue {
            field: "llm.provider".to_string(),
            value: other.to_string(),
        })),
    }
}

fn map_provider_status(provider: &str, status: reqwest::StatusCode, retry_after: Option<u64>) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::InvalidApiKey {
            provider: provider.to_string(),
        },
        429 => LlmError::RateLimitExceeded {
            provider: provider.to_string(),
            retry_after: retry_after.unwrap_or(30),
        },
        code if status.is_server_error() => LlmError::ServiceUnavailable {
            provider: format!("{} (status {})", provider, code),
        },
        _ => LlmError::InvalidResponseFormat {
            provider: provider.to_string(),
        },
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

pub struct OpenAiCommenter {
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl OpenAiCommenter {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            http_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl Commenter for OpenAiCommenter {
    async fn draft(&self, request: &CommentRequest<'_>) -> Result<String, CoreError> {
        let prompt = build_prompt(request);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": request.options.length.word_budget() * 4,
            "temperature": 0.8,
        });

        let response = self
            .http_client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("OpenAI request failed: {}", e);
                if e.is_timeout() {
                    CoreError::Llm(LlmError::RequestTimeout {
                        provider: "openai".to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            return Err(CoreError::Llm(map_provider_status(
                "openai", status, retry_after,
            )));
        }

        let payload: Value = response.json().await.map_err(|_| {
            CoreError::Llm(LlmError::InvalidResponseFormat {
                provider: "openai".to_string(),
            })
        })?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .map(clean_reply)
            .filter(|reply| !reply.is_empty())
            .ok_or_else(|| {
                CoreError::Llm(LlmError::InvalidResponseFormat {
                    provider: "openai".to_string(),
                })
            })?;

        debug!("Drafted {}-char reply via openai", text.len());
        Ok(text)
    }
}

pub struct ClaudeCommenter {
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl ClaudeCommenter {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            http_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl Commenter for ClaudeCommenter {
    async fn draft(&self, request: &CommentRequest<'_>) -> Result<String, CoreError> {
        let prompt = build_prompt(request);
        let body = json!({
            "model": self.model,
            "max_tokens": request.options.length.word_budget() * 4,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .http_client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Claude request failed: {}", e);
                if e.is_timeout() {
                    CoreError::Llm(LlmError::RequestTimeout {
                        provider: "claude".to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            return Err(CoreError::Llm(map_provider_status(
                "claude", status, retry_after,
            )));
        }

        let payload: Value = response.json().await.map_err(|_| {
            CoreError::Llm(LlmError::InvalidResponseFormat {
                provider: "claude".to_string(),
            })
        })?;

        let text = payload["content"][0]["text"]
            .as_str()
            .map(clean_reply)
            .filter(|reply| !reply.is_empty())
            .ok_or_else(|| {
                CoreError::Llm(LlmError::InvalidResponseFormat {
                    provider: "claude".to_string(),
                })
            })?;

        debug!("Drafted {}-char reply via claude", text.len());
        Ok(text)
    }
}
