use resona_core::{ConfigError, CoreError, DatabaseError, ErrorExt, LlmError, PlatformError};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let platform_error = CoreError::Platform(PlatformError::RequestTimeout);
    assert_eq!(platform_error.error_code(), "PLATFORM");

    let db_error = CoreError::Database(DatabaseError::DatabaseLocked);
    assert_eq!(db_error.error_code(), "DATABASE");

    let llm_error = CoreError::Llm(LlmError::InvalidApiKey {
        provider: "openai".to_string(),
    });
    assert_eq!(llm_error.error_code(), "LLM");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");
}

#[test]
fn test_retryable_errors() {
    let retryable =
        CoreError::Platform(PlatformError::RateLimitExceeded { retry_after: 60 });
    assert!(retryable.is_retryable());
    assert!(retryable.is_throttle());

    let locked = CoreError::Database(DatabaseError::DatabaseLocked);
    assert!(locked.is_retryable());
    assert!(!locked.is_throttle());

    let non_retryable = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert!(!non_retryable.is_retryable());

    let session = CoreError::Platform(PlatformError::SessionExpired {
        user_id: "u1".to_string(),
    });
    assert!(!session.is_retryable());
}

#[test]
fn test_retry_after() {
    let rate_limited =
        CoreError::Platform(PlatformError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(60)));

    let timeout = CoreError::Timeout { seconds: 30 };
    assert_eq!(timeout.retry_after(), Some(Duration::from_secs(30)));

    let llm = CoreError::Llm(LlmError::RateLimitExceeded {
        provider: "claude".to_string(),
        retry_after: 15,
    });
    assert_eq!(llm.retry_after(), Some(Duration::from_secs(15)));
}

#[test]
fn test_user_friendly_messages() {
    let expired = CoreError::Platform(PlatformError::SessionExpired {
        user_id: "u1".to_string(),
    });
    let message = expired.user_friendly_message();
    assert!(!message.is_empty());
    assert!(message.contains("expired"));

    let control = CoreError::Platform(PlatformError::ControlNotFound {
        role: "reply_composer".to_string(),
    });
    assert!(control.user_friendly_message().contains("reply_composer"));
}
