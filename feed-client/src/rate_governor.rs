//! Request budget governor for the external feed.
//!
//! Two sliding windows (per-minute and per-hour) gate every externally
//! visible action. When the external system signals throttling anyway, the
//! governor runs bounded exponential backoff with a view reload between
//! attempts. Counters live in process memory only; a restart resets the
//! governor to an empty, conservative state.

use crate::driver::FeedDriver;
use resona_core::{CoreError, ErrorExt};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RateBudgetConfig {
    /// Hard cap on actions per minute window.
    pub per_minute_cap: u32,
    /// Hard cap on actions per hour window.
    pub per_hour_cap: u32,
    /// Base delay for throttle backoff (in milliseconds).
    pub backoff_base_ms: u64,
    /// Ceiling on any single backoff delay (in milliseconds).
    pub backoff_cap_ms: u64,
    /// Maximum jitter factor (0.0 to 1.0).
    pub jitter_factor: f64,
    /// Throttle recovery attempts before an operation fails terminally.
    pub max_recovery_attempts: u32,
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            per_minute_cap: 20,
            per_hour_cap: 300,
            backoff_base_ms: 2000,
            backoff_cap_ms: 60000,
            jitter_factor: 0.2, // 20% jitter to avoid lockstep retries
            max_recovery_attempts: 3,
        }
    }
}

impl RateBudgetConfig {
    /// Conservative budget tuned for anti-automation-sensitive feeds.
    pub fn feed_default() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
struct BudgetWindow {
    duration: Duration,
    cap: u32,
    count: u32,
    window_start: Instant,
}

impl BudgetWindow {
    fn new(duration: Duration, cap: u32) -> Self {
        Self {
            duration,
            cap,
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn roll_if_expired(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= self.duration {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn remaining_wait(&self, now: Instant) -> Duration {
        self.duration
            .saturating_sub(now.duration_since(self.window_start))
    }
}

#[derive(Debug)]
struct Windows {
    minute: BudgetWindow,
    hour: BudgetWindow,
}

#[derive(Debug, Clone, Default)]
pub struct GovernorStats {
    pub reserved: u64,
    pub budget_waits: u64,
    pub throttle_recoveries: u64,
    pub throttle_failures: u64,
}

#[derive(Debug)]
pub struct RateGovernor {
    config: RateBudgetConfig,
    windows: Mutex<Windows>,
    stats: Mutex<GovernorStats>,
}

impl RateGovernor {
    pub fn new(config: RateBudgetConfig) -> Self {
        let windows = Windows {
            minute: BudgetWindow::new(Duration::from_secs(60), config.per_minute_cap),
            hour: BudgetWindow::new(Duration::from_secs(3600), config.per_hour_cap),
        };
        Self {
            config,
            windows: Mutex::new(windows),
            stats: Mutex::new(GovernorStats::default()),
        }
    }

    /// Try to reserve one action slot in both windows. Returns `None` when
    /// reserved, or the wait until the binding window resets. A reservation
    /// either takes a slot in both windows or in neither.
    pub fn check_and_reserve(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap();

        windows.minute.roll_if_expired(now);
        windows.hour.roll_if_expired(now);

        if windows.minute.count >= windows.minute.cap {
            return Some(windows.minute.remaining_wait(now));
        }
        if windows.hour.count >= windows.hour.cap {
            return Some(windows.hour.remaining_wait(now));
        }

        windows.minute.count += 1;
        windows.hour.count += 1;
        drop(windows);

        self.stats.lock().unwrap().reserved += 1;
        None
    }

    /// Block until a slot is reserved. The sleeps are plain tokio sleeps,
    /// cancelled with the surrounding task on shutdown.
    pub async fn acquire(&self) {
        loop {
            match self.check_and_reserve() {
                None => return,
                Some(wait) => {
                    debug!("Rate budget exhausted, waiting {:?}", wait);
                    self.stats.lock().unwrap().budget_waits += 1;
                    sleep(wait).await;
                }
            }
        }
    }

    /// Backoff delay for a throttle recovery attempt:
    /// `min(base * 2^attempt, cap)` plus jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .config
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.config.backoff_cap_ms);

        let jitter_range = (exponential as f64 * self.config.jitter_factor) as u64;
        let jitter = if jitter_range > 0 {
            fastrand::u64(0..=jitter_range)
        } else {
            0
        };

        Duration::from_millis((exponential + jitter).min(self.config.backoff_cap_ms))
    }

    /// Run one externally visible operation under the budget, recovering
    /// from throttle signals with backoff plus a view reload, at most
    /// `max_recovery_attempts` times. Non-throttle errors propagate
    /// unchanged; exhausting the recovery budget is a terminal rate-limit
    /// error for this operation.
    pub async fn execute_guarded<T, F, Fut>(
        &self,
        driver: &dyn FeedDriver,
        operation_name: &str,
        max_recovery_attempts: u32,
        operation: F,
    ) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            self.acquire().await;

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            "Operation {} recovered from throttling after {} attempts",
                            operation_name, attempt
                        );
                        self.stats.lock().unwrap().throttle_recoveries += 1;
                    }
                    return Ok(value);
                }
                Err(error) if error.is_throttle() => {
                    if attempt >= max_recovery_attempts {
                        warn!(
                            "Operation {} still throttled after {} recovery attempts",
                            operation_name, attempt
                        );
                        self.stats.lock().unwrap().throttle_failures += 1;
                        return Err(CoreError::RateLimited {
                            message: format!(
                                "{} exhausted {} throttle recovery attempts",
                                operation_name, max_recovery_attempts
                            ),
                            retry_after: error.retry_after(),
                        });
                    }

                    let delay = error
                        .retry_after()
                        .unwrap_or_else(|| self.backoff_delay(attempt));
                    warn!(
                        "Operation {} throttled, backing off {:?} before recovery attempt {}",
                        operation_name,
                        delay,
                        attempt + 1
                    );
                    sleep(delay).await;

                    // Lightweight recovery: reload the current view. A
                    // failed reload is logged, the retry still proceeds.
                    if let Err(reload_error) = driver.reload().await {
                        debug!(
                            "Recovery reload failed for {}: {}",
                            operation_name, reload_error
                        );
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    pub fn recovery_budget(&self) -> u32 {
        self.config.max_recovery_attempts
    }

    pub fn stats(&self) -> GovernorStats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;
    use resona_core::PlatformError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tight_config() -> RateBudgetConfig {
        RateBudgetConfig {
            per_minute_cap: 2,
            per_hour_cap: 100,
            backoff_base_ms: 1,
            backoff_cap_ms: 10,
            jitter_factor: 0.0,
            max_recovery_attempts: 2,
        }
    }

    #[test]
    fn test_reserve_until_cap() {
        let governor = RateGovernor::new(tight_config());

        assert!(governor.check_and_reserve().is_none());
        assert!(governor.check_and_reserve().is_none());

        let wait = governor.check_and_reserve();
        assert!(wait.is_some());
        assert!(wait.unwrap() <= Duration::from_secs(60));
    }

    #[test]
    fn test_hour_window_binds_independently() {
        let config = RateBudgetConfig {
            per_minute_cap: 100,
            per_hour_cap: 1,
            ..tight_config()
        };
        let governor = RateGovernor::new(config);

        assert!(governor.check_and_reserve().is_none());
        let wait = governor.check_and_reserve().expect("hour cap should bind");
        assert!(wait <= Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_delay_is_exponential_and_capped() {
        let config = RateBudgetConfig {
            backoff_base_ms: 1000,
            backoff_cap_ms: 10000,
            jitter_factor: 0.0,
            ..RateBudgetConfig::default()
        };
        let governor = RateGovernor::new(config);

        assert_eq!(governor.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(governor.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(governor.backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(governor.backoff_delay(10), Duration::from_millis(10000));
    }

    #[tokio::test]
    async fn test_guarded_operation_recovers_from_throttle() {
        let governor = RateGovernor::new(tight_config());
        let driver = MockDriver::new();
        let calls = AtomicU32::new(0);

        let result = governor
            .execute_guarded(&driver, "submit_reply", 2, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CoreError::Platform(PlatformError::RateLimitExceeded {
                            retry_after: 0,
                        }))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // The reload recovery action ran once.
        assert_eq!(driver.reload_count(), 1);
        assert_eq!(governor.stats().throttle_recoveries, 1);
    }

    #[tokio::test]
    async fn test_guarded_operation_exhausts_recovery_budget() {
        let governor = RateGovernor::new(tight_config());
        let driver = MockDriver::new();

        let result: Result<(), CoreError> = governor
            .execute_guarded(&driver, "search", 1, || async {
                Err(CoreError::Platform(PlatformError::RateLimitExceeded {
                    retry_after: 0,
                }))
            })
            .await;

        match result {
            Err(CoreError::RateLimited { message, .. }) => {
                assert!(message.contains("search"));
            }
            other => panic!("expected terminal rate-limit error, got {:?}", other.err()),
        }
        assert_eq!(governor.stats().throttle_failures, 1);
    }

    #[tokio::test]
    async fn test_guarded_operation_propagates_other_errors() {
        let governor = RateGovernor::new(tight_config());
        let driver = MockDriver::new();

        let result: Result<(), CoreError> = governor
            .execute_guarded(&driver, "goto", 2, || async {
                Err(CoreError::Platform(PlatformError::ControlNotFound {
                    role: "reply_composer".to_string(),
                }))
            })
            .await;

        assert!(matches!(
            result,
            Err(CoreError::Platform(PlatformError::ControlNotFound { .. }))
        ));
        assert_eq!(driver.reload_count(), 0);
    }
}
