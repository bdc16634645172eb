//! The job lifecycle state machine.
//!
//! One `process()` call takes a delivered job through
//! `waiting/failed → active → {completed | failed}` with the entry guards
//! from the design: a job already active is a duplicate delivery and a
//! no-op, a recently completed job is not re-run, and a job whose failure
//! count has hit the bound becomes permanently failed and is never
//! attempted again. Everything after the claim runs under a top-level
//! catch that marks the job failed, writes a failure report, and re-raises
//! so the queue's retry cycle applies.

use chrono::Utc;
use commenter::{CommentRequest, Commenter, FALLBACK_REPLY};
use database::{ItemStore, JobStore, ReportStore};
use feed_client::driver::FeedDriver;
use feed_client::{
    ActionExecutor, DriverPool, ExclusionRules, RateGovernor, ScrapePipeline, SessionValidator,
};
use resona_core::filter::{select_candidates, FilterOptions};
use resona_core::{AppConfig, CoreError, CredentialStore, Job, JobOutcome, JobStatus};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::report::ReportBuilder;

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub success: bool,
    pub message: String,
    pub acted_count: u32,
    pub discovered_count: u32,
}

impl ProcessOutcome {
    fn skipped(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            acted_count: 0,
            discovered_count: 0,
        }
    }
}

struct PipelineCounts {
    discovered: u32,
    filtered: u32,
    acted: u32,
    failed: u32,
}

pub struct JobProcessor {
    config: Arc<AppConfig>,
    jobs: JobStore,
    items: ItemStore,
    reports: ReportStore,
    pool: Arc<DriverPool>,
    validator: SessionValidator,
    scraper: ScrapePipeline,
    executor: ActionExecutor,
    commenter: Arc<dyn Commenter>,
    shutdown: watch::Receiver<bool>,
}

impl JobProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AppConfig>,
        jobs: JobStore,
        items: ItemStore,
        reports: ReportStore,
        credentials: Arc<dyn CredentialStore>,
        pool: Arc<DriverPool>,
        governor: Arc<RateGovernor>,
        commenter: Arc<dyn Commenter>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let validator = SessionValidator::new(credentials, config.scrape.navigation_timeout());
        let scraper = ScrapePipeline::new(governor.clone(), config.scrape.clone());
        let executor = ActionExecutor::new(governor);

        Self {
            config,
            jobs,
            items,
            reports,
            pool,
            validator,
            scraper,
            executor,
            commenter,
            shutdown,
        }
    }

    pub async fn process(&self, job_id: &str) -> Result<ProcessOutcome, CoreError> {
        let job = self.jobs.get(job_id).await?.ok_or_else(|| CoreError::NotFound {
            resource: format!("job {}", job_id),
        })?;

        // Entry guards, in order: duplicate delivery, cooldown, attempt
        // budget. All of them settle the delivery without an error.
        match job.status {
            JobStatus::Active => {
                info!("Job {} is already processing, ignoring duplicate delivery", job_id);
                return Ok(ProcessOutcome::skipped("already processing"));
            }
            JobStatus::Completed => {
                let message = if job.completed_within(self.config.cooldown(), Utc::now()) {
                    "completed recently"
                } else {
                    "already completed"
                };
                info!("Job {} skipped: {}", job_id, message);
                return Ok(ProcessOutcome::skipped(message));
            }
            JobStatus::PermanentlyFailed => {
                info!("Job {} is permanently failed, ignoring delivery", job_id);
                return Ok(ProcessOutcome::skipped("permanently failed"));
            }
            JobStatus::Failed if job.failed_attempts >= self.config.max_failed_attempts => {
                warn!(
                    "Job {} reached the failure bound ({}), marking permanently failed",
                    job_id, job.failed_attempts
                );
                self.jobs
                    .mark_permanently_failed(job_id, "failure budget exhausted, giving up")
                    .await?;
                return Ok(ProcessOutcome::skipped("failure budget exhausted"));
            }
            JobStatus::Waiting | JobStatus::Failed => {}
        }

        if !self
            .jobs
            .claim_active(job_id, job.status, Utc::now())
            .await?
        {
            info!("Job {} was claimed by another delivery", job_id);
            return Ok(ProcessOutcome::skipped("already processing"));
        }

        info!(
            "Job {} started for user {} ({} keywords, {} actions requested)",
            job_id,
            job.user_id,
            job.keywords.len(),
            job.action_count
        );

        let mut report = ReportBuilder::new(&job);
        report.begin_step("acquiring_session");

        let pooled = match self.pool.acquire(&job.user_id).await {
            Ok(pooled) => pooled,
            Err(acquire_error) => return self.fail_job(&job, report, acquire_error).await,
        };

        let result = self.run_pipeline(&job, pooled.driver(), &mut report).await;
        // The checkout guard returns the session before settlement writes.
        drop(pooled);

        match result {
            Ok(counts) => match self.finalize(&job, counts, report).await {
                Ok(outcome) => Ok(outcome),
                Err(finalize_error) => {
                    // A job must not be stranded in active if the terminal
                    // write itself failed. mark_failed is conditional on
                    // active, so a completion that already landed stays
                    // completed.
                    error!("Job {} finalization failed: {}", job.id, finalize_error);
                    if let Err(store_error) = self
                        .jobs
                        .mark_failed(&job.id, &finalize_error.to_string())
                        .await
                    {
                        error!(
                            "Could not record finalization failure for job {}: {}",
                            job.id, store_error
                        );
                    }
                    Err(finalize_error)
                }
            },
            Err(pipeline_error) => self.fail_job(&job, report, pipeline_error).await,
        }
    }

    async fn run_pipeline(
        &self,
        job: &Job,
        driver: &dyn FeedDriver,
        report: &mut ReportBuilder,
    ) -> Result<PipelineCounts, CoreError> {
        // Precondition: a usable live session. Not retried within the job;
        // the queue's retry mechanism owns this failure.
        self.advance(&job.id, report, "validating_session", 5).await?;
        self.validator.establish(driver, &job.user_id).await?;

        // Scrape, with slack for filtering losses.
        self.advance(&job.id, report, "scraping", 20).await?;
        let scrape_started = Instant::now();
        let target = self.config.overscrape_target(job.action_count);
        let seen = self.items.urls_for_job(&job.id, &job.user_id).await?;
        let rules = ExclusionRules {
            excluded_terms: self.config.excluded_terms.clone(),
            min_raw_engagement: self.config.min_raw_engagement,
        };
        let harvest = self
            .scraper
            .collect(
                driver,
                &job.id,
                &job.user_id,
                &job.keywords,
                target,
                &seen,
                &rules,
            )
            .await;
        for scrape_error in &harvest.errors {
            report.record_error("scraping", scrape_error.message.as_str());
        }
        report.set_scrape_time(scrape_started.elapsed());
        let discovered = harvest.items.len() as u32;

        // Persist candidates. Duplicate (url, user) rows are skipped, never
        // fatal to the batch.
        self.advance(&job.id, report, "saving_candidates", 45).await?;
        let summary = self.items.insert_batch(&harvest.items).await?;
        if summary.duplicates > 0 {
            info!(
                "Job {}: {} duplicate candidates skipped on insert",
                job.id, summary.duplicates
            );
        }

        // Filter and rank against the stored rows: everything recorded for
        // this job (including a failed earlier attempt's rows) plus any
        // harvest URL that an earlier job already owns, so acted-upon state
        // is visible.
        self.advance(&job.id, report, "filtering", 55).await?;
        let filter_started = Instant::now();
        let mut candidates = self.items.items_for_job(&job.id, &job.user_id).await?;
        let mut pooled_urls: std::collections::HashSet<String> =
            candidates.iter().map(|item| item.url.clone()).collect();
        let harvest_urls: Vec<String> = harvest
            .items
            .iter()
            .map(|item| item.url.clone())
            .filter(|url| !pooled_urls.contains(url))
            .collect();
        for item in self
            .items
            .items_for_urls(&job.user_id, &harvest_urls)
            .await?
        {
            pooled_urls.insert(item.url.clone());
            candidates.push(item);
        }
        let filter_options = FilterOptions::new(
            job.options.min_reactions,
            job.options.exclude_flagged,
            &self.config.excluded_terms,
            self.config.min_content_length,
        );
        let ranked = select_candidates(&candidates, &filter_options, usize::MAX);
        let filtered = ranked.len() as u32;
        let selected: Vec<_> = ranked
            .into_iter()
            .take(job.action_count as usize)
            .collect();
        report.set_filter_time(filter_started.elapsed());
        info!(
            "Job {}: {} discovered, {} after filtering, {} selected",
            job.id,
            discovered,
            filtered,
            selected.len()
        );

        // Act on the ranked selection. Per-item failures are counted and
        // logged, never job-fatal.
        self.advance(&job.id, report, "engaging", 65).await?;
        let act_started = Instant::now();
        let total = selected.len();
        let mut acted: u32 = 0;
        let mut failed: u32 = 0;

        for (index, item) in selected.iter().enumerate() {
            if *self.shutdown.borrow() {
                // Safe checkpoint: stop between actions, never mid-submission.
                warn!(
                    "Shutdown requested, stopping job {} after {} of {} actions",
                    job.id, index, total
                );
                report.record_error("engaging", "shutdown requested before remaining actions");
                break;
            }

            let request = CommentRequest {
                content: &item.content,
                engagement: item.engagement(),
                options: &job.options,
            };
            let text = match self.commenter.draft(&request).await {
                Ok(text) => text,
                Err(draft_error) => {
                    warn!(
                        "Drafting failed for {}, using fallback reply: {}",
                        item.url, draft_error
                    );
                    FALLBACK_REPLY.to_string()
                }
            };

            match self.executor.engage(driver, &item.url, &text).await {
                Ok(()) => {
                    if !self
                        .items
                        .mark_acted(&item.url, &job.user_id, &text, Utc::now())
                        .await?
                    {
                        warn!("Acted on {} but no stored row was updated", item.url);
                    }
                    acted += 1;
                    debug!("Job {}: engaged {} ({}/{})", job.id, item.url, acted, total);
                }
                Err(item_error) => {
                    failed += 1;
                    warn!("Job {}: action failed for {}: {}", job.id, item.url, item_error);
                    report.record_error("engaging", item_error.to_string());
                }
            }

            let done = (index + 1) as u32;
            let percent = 65 + (done * 30 / total.max(1) as u32) as u8;
            self.jobs
                .update_progress(&job.id, "engaging", percent.min(95))
                .await?;

            // Etiquette pause between actions, success or failure.
            if index + 1 < total {
                sleep(self.config.inter_action_delay()).await;
            }
        }
        report.set_act_time(act_started.elapsed());

        Ok(PipelineCounts {
            discovered,
            filtered,
            acted,
            failed,
        })
    }

    /// Terminal success path. The final status write happens before the
    /// report is created; the report reference is backfilled afterwards.
    async fn finalize(
        &self,
        job: &Job,
        counts: PipelineCounts,
        mut report: ReportBuilder,
    ) -> Result<ProcessOutcome, CoreError> {
        self.advance(&job.id, &mut report, "finalizing", 95).await?;
        report.set_counts(counts.discovered, counts.filtered, counts.acted, counts.failed);

        let outcome = JobOutcome {
            success: true,
            acted_count: counts.acted,
            discovered_count: counts.discovered,
            report_id: None,
        };
        self.jobs.mark_completed(&job.id, &outcome).await?;

        let report_id = self.reports.insert(&report.build()).await?;
        self.jobs.attach_report(&job.id, report_id).await?;

        info!(
            "Job {} completed: {} acted, {} failed, {} discovered",
            job.id, counts.acted, counts.failed, counts.discovered
        );
        Ok(ProcessOutcome {
            success: true,
            message: "completed".to_string(),
            acted_count: counts.acted,
            discovered_count: counts.discovered,
        })
    }

    /// Terminal failure path: mark the job failed (progress stays frozen at
    /// the failing step), write the failure report, and re-raise the error
    /// so the queue applies its own retry and backoff.
    async fn fail_job(
        &self,
        job: &Job,
        mut report: ReportBuilder,
        cause: CoreError,
    ) -> Result<ProcessOutcome, CoreError> {
        let step = report.step().to_string();
        let message = cause.to_string();
        error!("Job {} failed during {}: {}", job.id, step, message);
        report.record_error(&step, message.as_str());

        match self.jobs.mark_failed(&job.id, &message).await {
            Ok(attempts) => debug!("Job {} failure count is now {}", job.id, attempts),
            Err(store_error) => {
                error!("Could not record failure for job {}: {}", job.id, store_error)
            }
        }
        // Status first, then the report, even on the failure path.
        if let Err(report_error) = self.reports.insert(&report.build()).await {
            error!(
                "Could not persist failure report for job {}: {}",
                job.id, report_error
            );
        }

        Err(cause)
    }

    async fn advance(
        &self,
        job_id: &str,
        report: &mut ReportBuilder,
        step: &str,
        percent: u8,
    ) -> Result<(), CoreError> {
        report.begin_step(step);
        self.jobs.update_progress(job_id, step, percent).await
    }
}
