//! Shared harness for processor integration tests: a temp-file database,
//! a scriptable mock driver shared with the pool, and a canned commenter.

use async_trait::async_trait;
use commenter::{CommentRequest, Commenter};
use database::Database;
use feed_client::driver::FeedDriver;
use feed_client::pool::DriverFactory;
use feed_client::testing::MockDriver;
use feed_client::{DriverPool, DriverPoolConfig, RateBudgetConfig, RateGovernor};
use resona_core::{AppConfig, CoreError, LlmError, SessionToken};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use worker::JobProcessor;

pub struct MockCommenter {
    fail: bool,
    calls: AtomicU32,
}

impl MockCommenter {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Commenter for MockCommenter {
    async fn draft(&self, _request: &CommentRequest<'_>) -> Result<String, CoreError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(CoreError::Llm(LlmError::ServiceUnavailable {
                provider: "mock".to_string(),
            }));
        }
        Ok(format!("Thoughtful reply #{}", n))
    }
}

pub struct Harness {
    pub db: Database,
    pub driver: Arc<MockDriver>,
    pub processor: JobProcessor,
    pub commenter: Arc<MockCommenter>,
    pub shutdown_tx: watch::Sender<bool>,
}

pub async fn harness() -> Harness {
    harness_with_commenter(Arc::new(MockCommenter::new())).await
}

pub async fn harness_with_commenter(commenter: Arc<MockCommenter>) -> Harness {
    let db_path =
        std::env::temp_dir().join(format!("test_resona_worker_{}.db", uuid::Uuid::new_v4()));
    let db = Database::connect(&format!("sqlite://{}", db_path.display()))
        .await
        .expect("connect test db");
    db.run_migrations().await.expect("migrations");

    let config = Arc::new(AppConfig {
        inter_action_delay_secs: 0,
        ..AppConfig::default()
    });

    let governor = Arc::new(RateGovernor::new(RateBudgetConfig {
        per_minute_cap: 100_000,
        per_hour_cap: 1_000_000,
        backoff_base_ms: 1,
        backoff_cap_ms: 2,
        jitter_factor: 0.0,
        max_recovery_attempts: 2,
    }));

    let driver = Arc::new(MockDriver::new());
    let shared = driver.clone();
    let factory: DriverFactory =
        Arc::new(move |_user_id: &str| shared.clone() as Arc<dyn FeedDriver>);
    let pool = Arc::new(DriverPool::new(DriverPoolConfig::default(), factory));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let processor = JobProcessor::new(
        config,
        db.jobs(),
        db.items(),
        db.reports(),
        Arc::new(db.credentials()),
        pool,
        governor,
        commenter.clone(),
        shutdown_rx,
    );

    Harness {
        db,
        driver,
        processor,
        commenter,
        shutdown_tx,
    }
}

pub async fn seed_credentials(db: &Database, user_id: &str) {
    db.credentials()
        .save_tokens(
            user_id,
            &[SessionToken {
                name: "session".to_string(),
                value: "opaque".to_string(),
                domain: ".feed.example".to_string(),
                path: "/".to_string(),
                expires_at: None,
            }],
        )
        .await
        .expect("seed credentials");
}

/// Fill a keyword view with `count` clean posts of descending engagement.
/// Contents are long enough to clear the minimum-length filter.
pub fn seed_posts(driver: &MockDriver, keyword: &str, prefix: &str, count: u32) {
    let posts = (0..count)
        .map(|i| {
            MockDriver::post(
                &format!("{}{}", prefix, i + 1),
                &format!(
                    "A genuinely interesting {} discussion, part {} of the thread",
                    keyword,
                    i + 1
                ),
                20u32.saturating_sub(i),
                2,
            )
        })
        .collect();
    driver.add_keyword_page(keyword, posts);
}
