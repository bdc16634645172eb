use chrono::Utc;
use resona_core::{Job, PhaseTimings, ReportError, SessionReport};
use std::time::{Duration, Instant};

/// Accumulates counts, errors, and per-phase timings over one job attempt,
/// then produces the immutable session report.
pub struct ReportBuilder {
    job_id: String,
    user_id: String,
    keywords: Vec<String>,
    start_wall: chrono::DateTime<Utc>,
    started: Instant,
    discovered: u32,
    filtered: u32,
    acted: u32,
    failed: u32,
    errors: Vec<ReportError>,
    scrape_ms: i64,
    filter_ms: i64,
    act_ms: i64,
    current_step: String,
}

impl ReportBuilder {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            keywords: job.keywords.clone(),
            start_wall: Utc::now(),
            started: Instant::now(),
            discovered: 0,
            filtered: 0,
            acted: 0,
            failed: 0,
            errors: Vec::new(),
            scrape_ms: 0,
            filter_ms: 0,
            act_ms: 0,
            current_step: "starting".to_string(),
        }
    }

    /// Track the pipeline step in flight, so a fatal error can be filed
    /// against the step where it happened.
    pub fn begin_step(&mut self, step: &str) {
        self.current_step = step.to_string();
    }

    pub fn step(&self) -> &str {
        &self.current_step
    }

    pub fn record_error(&mut self, step: &str, message: impl Into<String>) {
        self.errors.push(ReportError {
            message: message.into(),
            step: step.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn set_counts(&mut self, discovered: u32, filtered: u32, acted: u32, failed: u32) {
        self.discovered = discovered;
        self.filtered = filtered;
        self.acted = acted;
        self.failed = failed;
    }

    pub fn set_scrape_time(&mut self, elapsed: Duration) {
        self.scrape_ms = elapsed.as_millis() as i64;
    }

    pub fn set_filter_time(&mut self, elapsed: Duration) {
        self.filter_ms = elapsed.as_millis() as i64;
    }

    pub fn set_act_time(&mut self, elapsed: Duration) {
        self.act_ms = elapsed.as_millis() as i64;
    }

    pub fn build(self) -> SessionReport {
        let total_ms = self.started.elapsed().as_millis() as i64;
        let attempted = self.acted + self.failed;
        let success_rate_percent = if attempted == 0 {
            0.0
        } else {
            (self.acted as f64 / attempted as f64) * 100.0
        };

        SessionReport {
            id: None,
            job_id: self.job_id,
            user_id: self.user_id,
            discovered_count: self.discovered,
            filtered_count: self.filtered,
            acted_count: self.acted,
            failed_count: self.failed,
            duration_ms: total_ms,
            start_time: self.start_wall,
            end_time: Utc::now(),
            success_rate_percent,
            errors: self.errors,
            performance: PhaseTimings {
                scrape_ms: self.scrape_ms,
                filter_ms: self.filter_ms,
                act_ms: self.act_ms,
                total_ms,
            },
            keywords: self.keywords,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_aggregates() {
        let job = Job::new("user-1", vec!["rust".to_string()], 5);
        let mut builder = ReportBuilder::new(&job);

        builder.set_counts(8, 6, 4, 1);
        builder.set_scrape_time(Duration::from_millis(500));
        builder.record_error("engaging", "one item failed");

        let report = builder.build();
        assert_eq!(report.discovered_count, 8);
        assert_eq!(report.filtered_count, 6);
        assert_eq!(report.acted_count, 4);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.performance.scrape_ms, 500);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.keywords, vec!["rust".to_string()]);
        assert!((report.success_rate_percent - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_rate_with_no_attempts() {
        let job = Job::new("user-1", vec!["rust".to_string()], 5);
        let report = ReportBuilder::new(&job).build();
        assert_eq!(report.success_rate_percent, 0.0);
        assert_eq!(report.acted_count, 0);
    }
}
