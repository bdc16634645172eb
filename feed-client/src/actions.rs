use crate::driver::{ControlRole, FeedDriver};
use crate::rate_governor::RateGovernor;
use resona_core::{CoreError, PlatformError};
use std::sync::Arc;
use tracing::{debug, info};

/// Submits one reply to one candidate post, honoring the rate budget. A
/// throttling signal mid-action gets exactly one backoff-and-reload
/// recovery cycle; any further failure propagates to the caller as a
/// per-item failure.
pub struct ActionExecutor {
    governor: Arc<RateGovernor>,
}

/// Recovery cycles allowed for a single reply submission.
const ACTION_RECOVERY_ATTEMPTS: u32 = 1;

impl ActionExecutor {
    pub fn new(governor: Arc<RateGovernor>) -> Self {
        Self { governor }
    }

    pub async fn engage(
        &self,
        driver: &dyn FeedDriver,
        url: &str,
        text: &str,
    ) -> Result<(), CoreError> {
        debug!("Navigating to candidate {}", url);
        self.governor
            .execute_guarded(driver, "goto", ACTION_RECOVERY_ATTEMPTS, || driver.goto(url))
            .await?;

        let composer_present = driver.locate(ControlRole::ReplyComposer).await?;
        if !composer_present {
            // Replies disabled or layout changed; this item cannot be engaged.
            return Err(CoreError::Platform(PlatformError::ControlNotFound {
                role: ControlRole::ReplyComposer.as_str().to_string(),
            }));
        }

        self.governor
            .execute_guarded(driver, "submit_reply", ACTION_RECOVERY_ATTEMPTS, || {
                driver.submit_reply(text)
            })
            .await?;

        info!("Reply submitted to {}", url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_governor::RateBudgetConfig;
    use crate::testing::{MockDriver, ScriptedFailure};

    fn executor() -> ActionExecutor {
        let config = RateBudgetConfig {
            per_minute_cap: 1000,
            per_hour_cap: 10000,
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
            jitter_factor: 0.0,
            max_recovery_attempts: 3,
        };
        ActionExecutor::new(Arc::new(RateGovernor::new(config)))
    }

    #[tokio::test]
    async fn test_engage_submits_reply() {
        let driver = MockDriver::new();
        let result = executor()
            .engage(&driver, "https://feed.example/p/p1", "nice post!")
            .await;

        assert!(result.is_ok());
        let submitted = driver.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, "https://feed.example/p/p1");
        assert_eq!(submitted[0].1, "nice post!");
    }

    #[tokio::test]
    async fn test_engage_fails_when_composer_missing() {
        let driver = MockDriver::new();
        driver.disable_composer_for("https://feed.example/p/p1");

        let result = executor()
            .engage(&driver, "https://feed.example/p/p1", "nice post!")
            .await;

        assert!(matches!(
            result,
            Err(CoreError::Platform(PlatformError::ControlNotFound { .. }))
        ));
        assert!(driver.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_engage_recovers_from_single_throttle() {
        let driver = MockDriver::new();
        driver.script_submissions(vec![Err(ScriptedFailure::Throttle), Ok(())]);

        let result = executor()
            .engage(&driver, "https://feed.example/p/p1", "nice post!")
            .await;

        assert!(result.is_ok());
        // Submitted exactly once despite the throttled first attempt.
        assert_eq!(driver.submitted().len(), 1);
        assert_eq!(driver.reload_count(), 1);
    }

    #[tokio::test]
    async fn test_engage_fails_after_repeated_throttle() {
        let driver = MockDriver::new();
        driver.script_submissions(vec![
            Err(ScriptedFailure::Throttle),
            Err(ScriptedFailure::Throttle),
        ]);

        let result = executor()
            .engage(&driver, "https://feed.example/p/p1", "nice post!")
            .await;

        assert!(matches!(result, Err(CoreError::RateLimited { .. })));
        assert!(driver.submitted().is_empty());
    }
}
