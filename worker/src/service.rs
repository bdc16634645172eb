use crate::processor::JobProcessor;
use crate::queue::JobQueue;
use resona_core::CoreError;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// The long-running worker loop: one job in flight at a time, polled from
/// the durable queue. On shutdown the in-flight job runs to its next safe
/// checkpoint and the loop drains before returning.
pub struct EngagementService {
    queue: JobQueue,
    processor: JobProcessor,
    poll_interval: Duration,
}

impl EngagementService {
    pub fn new(queue: JobQueue, processor: JobProcessor, poll_interval: Duration) -> Self {
        Self {
            queue,
            processor,
            poll_interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), CoreError> {
        info!("Engagement worker started");

        loop {
            if *shutdown.borrow() {
                info!("Shutdown signal observed, draining worker loop");
                break;
            }

            let entry = match self.queue.next_due().await {
                Ok(entry) => entry,
                Err(queue_error) => {
                    error!("Queue poll failed: {}", queue_error);
                    sleep(self.poll_interval).await;
                    continue;
                }
            };

            match entry {
                None => {
                    // Idle; wake early if shutdown arrives.
                    tokio::select! {
                        _ = sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Some(entry) => {
                    info!(
                        "Delivering job {} (attempt {}/{})",
                        entry.job_id, entry.attempts, entry.max_attempts
                    );
                    match self.processor.process(&entry.job_id).await {
                        Ok(outcome) => {
                            if !outcome.success {
                                debug!("Job {} settled without run: {}", entry.job_id, outcome.message);
                            }
                            self.queue.settle_success(&entry).await?;
                        }
                        Err(process_error) => {
                            error!(
                                "Job {} delivery failed: {}",
                                entry.job_id, process_error
                            );
                            self.queue
                                .settle_failure(&entry, &process_error.to_string())
                                .await?;
                        }
                    }
                }
            }
        }

        info!("Engagement worker stopped");
        Ok(())
    }
}
