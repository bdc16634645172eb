use crate::error::*;
use std::time::Duration;
use tracing::{error, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn is_throttle(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Platform(e) => error!("Platform error details: {:?}", e),
            CoreError::Database(e) => error!("Database error details: {:?}", e),
            CoreError::Llm(e) => error!("LLM error details: {:?}", e),
            CoreError::Config(e) => error!("Configuration error details: {:?}", e),
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Platform(e) => e.is_retryable(),
            CoreError::Database(e) => matches!(e, DatabaseError::DatabaseLocked),
            CoreError::Llm(e) => e.is_retryable(),
            CoreError::Network(_) => true,
            CoreError::Timeout { .. } => true,
            CoreError::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// True for explicit throttling signals from the external system,
    /// the trigger for the governor's backoff-and-reload recovery.
    fn is_throttle(&self) -> bool {
        match self {
            CoreError::Platform(PlatformError::RateLimitExceeded { .. }) => true,
            CoreError::RateLimited { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Platform(PlatformError::RateLimitExceeded { retry_after }) => {
                Some(Duration::from_secs(*retry_after))
            }
            CoreError::Llm(LlmError::RateLimitExceeded { retry_after, .. }) => {
                Some(Duration::from_secs(*retry_after))
            }
            CoreError::Timeout { seconds } => Some(Duration::from_secs(*seconds)),
            CoreError::RateLimited { retry_after, .. } => *retry_after,
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Platform(e) => e.user_friendly_message(),
            CoreError::Database(_) => "A storage error occurred.".to_string(),
            CoreError::Llm(e) => e.user_friendly_message(),
            CoreError::Config(e) => format!("Configuration problem: {}", e),
            CoreError::Network(_) => {
                "Network connection error. Please check connectivity.".to_string()
            }
            CoreError::InvalidInput { message } => format!("Invalid input: {}", message),
            CoreError::Timeout { .. } => "The operation took too long to complete.".to_string(),
            CoreError::NotFound { resource } => format!("Could not find: {}", resource),
            CoreError::RateLimited { message, .. } => {
                format!("Rate limited: {}. Waiting before the next attempt.", message)
            }
            _ => "An unexpected error occurred.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Platform(_) => "PLATFORM".to_string(),
            CoreError::Database(_) => "DATABASE".to_string(),
            CoreError::Llm(_) => "LLM".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Io(_) => "IO".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
            CoreError::Timeout { .. } => "TIMEOUT".to_string(),
            CoreError::NotFound { .. } => "NOT_FOUND".to_string(),
            CoreError::Internal { .. } => "INTERNAL".to_string(),
            CoreError::RateLimited { .. } => "RATE_LIMITED".to_string(),
        }
    }
}

impl ErrorExt for PlatformError {
    fn log_error(&self) -> &Self {
        error!("PlatformError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("PlatformError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            PlatformError::RateLimitExceeded { .. } => true,
            PlatformError::RequestTimeout => true,
            PlatformError::ElementTimeout { .. } => true,
            PlatformError::NavigationFailed { .. } => true,
            PlatformError::ServerError { status_code } => *status_code >= 500,
            _ => false,
        }
    }

    fn is_throttle(&self) -> bool {
        matches!(self, PlatformError::RateLimitExceeded { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ if self.is_retryable() => Some(Duration::from_secs(30)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            PlatformError::AuthenticationFailed { .. } => {
                "Feed authentication failed. Please refresh the stored session.".to_string()
            }
            PlatformError::SessionExpired { .. } => {
                "The stored feed session has expired. Please log in again.".to_string()
            }
            PlatformError::RateLimitExceeded { retry_after } => format!(
                "Too many requests. Waiting {} seconds before trying again.",
                retry_after
            ),
            PlatformError::ControlNotFound { role } => {
                format!("Could not find the {} control (replies may be disabled).", role)
            }
            PlatformError::NavigationFailed { url } => format!("Could not open {}.", url),
            PlatformError::ElementTimeout { what } => {
                format!("Timed out waiting for {}.", what)
            }
            PlatformError::SubmissionFailed { .. } => {
                "The reply could not be submitted.".to_string()
            }
            _ => "The feed platform returned an unexpected response.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            PlatformError::AuthenticationFailed { .. } => "AUTH_FAILED".to_string(),
            PlatformError::SessionExpired { .. } => "SESSION_EXPIRED".to_string(),
            PlatformError::RateLimitExceeded { .. } => "THROTTLED".to_string(),
            PlatformError::ControlNotFound { .. } => "CONTROL_NOT_FOUND".to_string(),
            PlatformError::NavigationFailed { .. } => "NAVIGATION_FAILED".to_string(),
            PlatformError::ElementTimeout { .. } => "ELEMENT_TIMEOUT".to_string(),
            PlatformError::SubmissionFailed { .. } => "SUBMISSION_FAILED".to_string(),
            PlatformError::InvalidResponse { .. } => "INVALID_RESPONSE".to_string(),
            PlatformError::ServerError { .. } => "SERVER_ERROR".to_string(),
            PlatformError::RequestTimeout => "REQUEST_TIMEOUT".to_string(),
        }
    }
}

impl ErrorExt for LlmError {
    fn log_error(&self) -> &Self {
        error!("LlmError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("LlmError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimitExceeded { .. }
                | LlmError::ServiceUnavailable { .. }
                | LlmError::RequestTimeout { .. }
        )
    }

    fn is_throttle(&self) -> bool {
        matches!(self, LlmError::RateLimitExceeded { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimitExceeded { retry_after, .. } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ if self.is_retryable() => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            LlmError::AuthenticationFailed { provider } | LlmError::InvalidApiKey { provider } => {
                format!("LLM credentials for {} were rejected.", provider)
            }
            LlmError::RateLimitExceeded { provider, .. } => {
                format!("{} is rate limiting drafting requests.", provider)
            }
            LlmError::ContentFiltered { .. } => {
                "The provider declined to draft a reply for this content.".to_string()
            }
            _ => "Reply drafting failed; the fallback reply will be used.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            LlmError::AuthenticationFailed { .. } => "LLM_AUTH_FAILED".to_string(),
            LlmError::InvalidApiKey { .. } => "LLM_INVALID_KEY".to_string(),
            LlmError::RateLimitExceeded { .. } => "LLM_THROTTLED".to_string(),
            LlmError::ModelNotAvailable { .. } => "LLM_NO_MODEL".to_string(),
            LlmError::InvalidPrompt { .. } => "LLM_BAD_PROMPT".to_string(),
            LlmError::ContentFiltered { .. } => "LLM_FILTERED".to_string(),
            LlmError::ServiceUnavailable { .. } => "LLM_UNAVAILABLE".to_string(),
            LlmError::RequestTimeout { .. } => "LLM_TIMEOUT".to_string(),
            LlmError::InvalidResponseFormat { .. } => "LLM_BAD_RESPONSE".to_string(),
        }
    }
}
