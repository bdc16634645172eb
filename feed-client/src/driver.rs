use crate::metrics::{MetricsCollector, OperationMetrics};
use async_trait::async_trait;
use resona_core::{CoreError, PlatformError, SessionToken};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Named interaction target on the feed page. The automation service owns
/// the selector strategy for each role; this core only names the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRole {
    ReplyComposer,
    SubmitReply,
    LoadMore,
}

impl ControlRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlRole::ReplyComposer => "reply_composer",
            ControlRole::SubmitReply => "submit_reply",
            ControlRole::LoadMore => "load_more",
        }
    }
}

/// A post as extracted from the live view, before its canonical permalink
/// has been resolved. `post_ref` is an opaque handle the automation service
/// understands.
#[derive(Debug, Clone)]
pub struct RawPost {
    pub post_ref: String,
    pub content: String,
    pub reactions: u32,
    pub replies: u32,
}

/// Browser-automation capability against the external feed. One instance
/// corresponds to one authenticated browser session for one user; it is
/// never shared across users.
#[async_trait]
pub trait FeedDriver: Send + Sync {
    /// Open the feed with the given session cookies installed.
    async fn open_session(&self, tokens: &[SessionToken]) -> Result<(), CoreError>;

    async fn is_logged_in(&self) -> Result<bool, CoreError>;

    /// Run a keyword search, leaving the result view current.
    async fn search(&self, keyword: &str) -> Result<(), CoreError>;

    /// Open the user's general feed, unscoped by keyword.
    async fn open_feed(&self) -> Result<(), CoreError>;

    /// Trigger the current view's load-more mechanism.
    async fn load_more(&self) -> Result<(), CoreError>;

    /// Extract the posts currently rendered in the view.
    async fn visible_posts(&self) -> Result<Vec<RawPost>, CoreError>;

    /// Resolve a post handle to its canonical URL. Comparatively expensive.
    async fn resolve_permalink(&self, post_ref: &str) -> Result<String, CoreError>;

    async fn goto(&self, url: &str) -> Result<(), CoreError>;

    /// Whether the named control exists on the current page.
    async fn locate(&self, role: ControlRole) -> Result<bool, CoreError>;

    /// Type and submit a reply on the current page.
    async fn submit_reply(&self, text: &str) -> Result<(), CoreError>;

    /// Reload the current view; the governor's lightweight recovery action.
    async fn reload(&self) -> Result<(), CoreError>;

    async fn close(&self) -> Result<(), CoreError>;
}

/// `FeedDriver` backed by a browserless-style remote automation service.
/// Each command is one POST to the service; the service holds the actual
/// browser and the DOM selector knowledge.
#[derive(Debug)]
pub struct BrowserSession {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    session_id: String,
    metrics: Arc<MetricsCollector>,
}

impl BrowserSession {
    pub fn new(base_url: &str, token: Option<&str>, session_id: &str, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            session_id: session_id.to_string(),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    async fn command(&self, action: &str, args: Value) -> Result<Value, CoreError> {
        let mut endpoint = format!("{}/sessions/{}/command", self.base_url, self.session_id);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let body = json!({ "action": action, "args": args });
        let start_time = Instant::now();

        debug!("Sending automation command: {}", action);
        let response = match self.http_client.post(&endpoint).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for command {}: {}", action, e);
                self.record(action, start_time, OperationMetrics::failure());
                if e.is_timeout() {
                    return Err(CoreError::Platform(PlatformError::RequestTimeout));
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!("Automation service throttled, retry after {}s", retry_after);
                self.record(action, start_time, OperationMetrics::throttled());
                return Err(CoreError::Platform(PlatformError::RateLimitExceeded {
                    retry_after,
                }));
            }

            self.record(action, start_time, OperationMetrics::failure());
            return match status.as_u16() {
                401 | 403 => Err(CoreError::Platform(PlatformError::SessionExpired {
                    user_id: self.session_id.clone(),
                })),
                code if status.is_server_error() => {
                    Err(CoreError::Platform(PlatformError::ServerError {
                        status_code: code,
                    }))
                }
                _ => Err(CoreError::Platform(PlatformError::InvalidResponse {
                    details: format!("command {} returned status {}", action, status),
                })),
            };
        }

        let payload: Value = response.json().await.map_err(|e| {
            error!("Failed to parse response for {}: {}", action, e);
            CoreError::Platform(PlatformError::InvalidResponse {
                details: format!("unparseable response for {}", action),
            })
        })?;

        // The service reports DOM-level outcomes inside a 200 envelope.
        if payload.get("ok").and_then(Value::as_bool) == Some(false) {
            let reason = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            self.record(action, start_time, OperationMetrics::failure());
            let err = match reason {
                "timeout" => PlatformError::ElementTimeout {
                    what: action.to_string(),
                },
                "too_many_requests" => PlatformError::RateLimitExceeded { retry_after: 60 },
                _ => PlatformError::InvalidResponse {
                    details: format!("{}: {}", action, reason),
                },
            };
            return Err(CoreError::Platform(err));
        }

        self.record(action, start_time, OperationMetrics::success());
        Ok(payload.get("data").cloned().unwrap_or(Value::Null))
    }

    fn record(&self, action: &str, start_time: Instant, outcome: OperationMetrics) {
        self.metrics
            .record(action, start_time.elapsed(), outcome);
    }
}

#[async_trait]
impl FeedDriver for BrowserSession {
    async fn open_session(&self, tokens: &[SessionToken]) -> Result<(), CoreError> {
        let cookies: Vec<Value> = tokens
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "value": t.value,
                    "domain": t.domain,
                    "path": t.path,
                    "expires": t.expires_at,
                })
            })
            .collect();

        self.command("open_session", json!({ "cookies": cookies }))
            .await?;
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool, CoreError> {
        let data = self.command("check_login", json!({})).await?;
        Ok(data
            .get("logged_in")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn search(&self, keyword: &str) -> Result<(), CoreError> {
        self.command("search", json!({ "query": keyword })).await?;
        Ok(())
    }

    async fn open_feed(&self) -> Result<(), CoreError> {
        self.command("open_feed", json!({})).await?;
        Ok(())
    }

    async fn load_more(&self) -> Result<(), CoreError> {
        self.command("load_more", json!({})).await?;
        Ok(())
    }

    async fn visible_posts(&self) -> Result<Vec<RawPost>, CoreError> {
        let data = self.command("extract_posts", json!({})).await?;
        let posts = data
            .get("posts")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CoreError::Platform(PlatformError::InvalidResponse {
                    details: "extract_posts returned no posts array".to_string(),
                })
            })?;

        let mut extracted = Vec::with_capacity(posts.len());
        for post in posts {
            // A single malformed entry should not sink the whole extraction.
            let post_ref = match post.get("ref").and_then(Value::as_str) {
                Some(r) => r.to_string(),
                None => {
                    debug!("Skipping post without ref handle");
                    continue;
                }
            };
            extracted.push(RawPost {
                post_ref,
                content: post
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                reactions: post.get("reactions").and_then(Value::as_u64).unwrap_or(0) as u32,
                replies: post.get("replies").and_then(Value::as_u64).unwrap_or(0) as u32,
            });
        }
        Ok(extracted)
    }

    async fn resolve_permalink(&self, post_ref: &str) -> Result<String, CoreError> {
        let data = self
            .command("resolve_permalink", json!({ "ref": post_ref }))
            .await?;
        let raw = data.get("url").and_then(Value::as_str).ok_or_else(|| {
            CoreError::Platform(PlatformError::InvalidResponse {
                details: "resolve_permalink returned no url".to_string(),
            })
        })?;

        let parsed = url::Url::parse(raw).map_err(|_| {
            CoreError::Platform(PlatformError::InvalidResponse {
                details: format!("resolve_permalink returned invalid url: {}", raw),
            })
        })?;
        Ok(parsed.to_string())
    }

    async fn goto(&self, target: &str) -> Result<(), CoreError> {
        self.command("goto", json!({ "url": target }))
            .await
            .map_err(|e| match e {
                CoreError::Platform(PlatformError::ElementTimeout { .. }) => {
                    CoreError::Platform(PlatformError::NavigationFailed {
                        url: target.to_string(),
                    })
                }
                other => other,
            })?;
        Ok(())
    }

    async fn locate(&self, role: ControlRole) -> Result<bool, CoreError> {
        let data = self
            .command("locate", json!({ "role": role.as_str() }))
            .await?;
        Ok(data.get("found").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn submit_reply(&self, text: &str) -> Result<(), CoreError> {
        self.command("submit_reply", json!({ "text": text }))
            .await
            .map_err(|e| match e {
                CoreError::Platform(PlatformError::InvalidResponse { details }) => {
                    CoreError::Platform(PlatformError::SubmissionFailed { details })
                }
                other => other,
            })?;
        Ok(())
    }

    async fn reload(&self) -> Result<(), CoreError> {
        self.command("reload", json!({})).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.command("close", json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_role_names() {
        assert_eq!(ControlRole::ReplyComposer.as_str(), "reply_composer");
        assert_eq!(ControlRole::SubmitReply.as_str(), "submit_reply");
        assert_eq!(ControlRole::LoadMore.as_str(), "load_more");
    }

    #[test]
    fn test_session_creation() {
        let session = BrowserSession::new(
            "http://localhost:3000/",
            Some("secret"),
            "user-1",
            Duration::from_secs(30),
        );
        assert_eq!(session.base_url, "http://localhost:3000");
        assert_eq!(session.session_id, "user-1");
    }
}
