use crate::driver::FeedDriver;
use chrono::Utc;
use resona_core::{CoreError, CredentialStore, PlatformError, SessionToken};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Establishes and verifies a live authenticated session from stored
/// credentials. Failure here is job-fatal: it is not retried within a job
/// and surfaces to the queue's own retry mechanism.
pub struct SessionValidator {
    credentials: Arc<dyn CredentialStore>,
    establish_timeout: Duration,
}

impl SessionValidator {
    pub fn new(credentials: Arc<dyn CredentialStore>, establish_timeout: Duration) -> Self {
        Self {
            credentials,
            establish_timeout,
        }
    }

    pub async fn establish(
        &self,
        driver: &dyn FeedDriver,
        user_id: &str,
    ) -> Result<(), CoreError> {
        if !self.credentials.has_valid_session(user_id).await? {
            warn!("No stored session for user {}", user_id);
            return Err(CoreError::Platform(PlatformError::AuthenticationFailed {
                reason: format!("no stored session for user {}", user_id),
            }));
        }

        let tokens = self.credentials.load_session(user_id).await?;
        let now_epoch = Utc::now().timestamp();
        let live: Vec<SessionToken> = tokens
            .into_iter()
            .filter(|token| !token.is_expired(now_epoch))
            .collect();

        if live.is_empty() {
            warn!("All stored session tokens expired for user {}", user_id);
            return Err(CoreError::Platform(PlatformError::SessionExpired {
                user_id: user_id.to_string(),
            }));
        }

        debug!(
            "Opening feed session for user {} with {} tokens",
            user_id,
            live.len()
        );
        tokio::time::timeout(self.establish_timeout, driver.open_session(&live))
            .await
            .map_err(|_| CoreError::Timeout {
                seconds: self.establish_timeout.as_secs(),
            })??;

        if !driver.is_logged_in().await? {
            warn!("Session tokens rejected by the feed for user {}", user_id);
            return Err(CoreError::Platform(PlatformError::SessionExpired {
                user_id: user_id.to_string(),
            }));
        }

        info!("Live session established for user {}", user_id);
        Ok(())
    }
}
