use anyhow::Context;
use commenter::commenter_from_config;
use database::Database;
use feed_client::driver::{BrowserSession, FeedDriver};
use feed_client::pool::DriverFactory;
use feed_client::{DriverPool, DriverPoolConfig, RateBudgetConfig, RateGovernor};
use resona_core::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use worker::{EngagementService, JobProcessor, JobQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "resona=info,worker=info,feed_client=info,commenter=info,database=warn".into()
            }),
        )
        .init();

    tracing::info!("Starting Resona engagement worker");

    // Any failure before the worker loop is an unrecoverable startup error:
    // the process exits non-zero without touching the queue.
    let config = Arc::new(AppConfig::from_env().context("loading configuration")?);

    let db = Database::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    db.run_migrations().await.context("running migrations")?;

    let governor = Arc::new(RateGovernor::new(RateBudgetConfig::feed_default()));
    let commenter = commenter_from_config(&config.llm).context("building commenter")?;

    let browser = config.browser.clone();
    let request_timeout = Duration::from_secs(browser.request_timeout_secs);
    let factory: DriverFactory = Arc::new(move |user_id: &str| {
        Arc::new(BrowserSession::new(
            &browser.base_url,
            browser.token.as_deref(),
            user_id,
            request_timeout,
        )) as Arc<dyn FeedDriver>
    });
    let pool = Arc::new(DriverPool::new(DriverPoolConfig::default(), factory));

    let queue = JobQueue::new(db.pool(), config.queue_max_delivery_attempts);
    queue
        .recover_stuck()
        .await
        .context("recovering stuck deliveries")?;
    let waiting = db
        .jobs()
        .waiting_jobs()
        .await
        .context("listing waiting jobs")?;
    if !waiting.is_empty() {
        tracing::info!("Re-enqueueing {} waiting jobs from the store", waiting.len());
        for (job_id, user_id) in waiting {
            queue.enqueue(&job_id, &user_id).await?;
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = JobProcessor::new(
        config.clone(),
        db.jobs(),
        db.items(),
        db.reports(),
        Arc::new(db.credentials()),
        pool,
        governor,
        commenter,
        shutdown_rx.clone(),
    );
    let service = EngagementService::new(queue, processor, config.queue_poll_interval());

    let worker_handle = tokio::spawn(async move { service.run(shutdown_rx).await });

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining worker");
    let _ = shutdown_tx.send(true);

    worker_handle.await.context("worker task panicked")??;
    tracing::info!("Resona worker stopped cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
