use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Upper bound on keywords per job.
pub const MAX_KEYWORDS: usize = 10;
/// Upper bound on requested reply actions per job.
pub const MAX_ACTION_COUNT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    PermanentlyFailed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::PermanentlyFailed => "permanently_failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "waiting" => Some(JobStatus::Waiting),
            "active" => Some(JobStatus::Active),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "permanently_failed" => Some(JobStatus::PermanentlyFailed),
            _ => None,
        }
    }

    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::PermanentlyFailed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyTone {
    Friendly,
    Professional,
    Casual,
}

impl ReplyTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyTone::Friendly => "friendly",
            ReplyTone::Professional => "professional",
            ReplyTone::Casual => "casual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyLength {
    Short,
    Medium,
    Long,
}

impl ReplyLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyLength::Short => "short",
            ReplyLength::Medium => "medium",
            ReplyLength::Long => "long",
        }
    }

    /// Rough word budget handed to the drafting prompt.
    pub fn word_budget(&self) -> u32 {
        match self {
            ReplyLength::Short => 20,
            ReplyLength::Medium => 45,
            ReplyLength::Long => 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub min_reactions: u32,
    pub exclude_flagged: bool,
    pub tone: ReplyTone,
    pub length: ReplyLength,
    pub want_emoji: bool,
    pub want_hashtags: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            min_reactions: 0,
            exclude_flagged: true,
            tone: ReplyTone::Friendly,
            length: ReplyLength::Medium,
            want_emoji: false,
            want_hashtags: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current_step: String,
    pub step_progress: u8,
    pub total_steps: u8,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            current_step: "queued".to_string(),
            step_progress: 0,
            total_steps: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub success: bool,
    pub acted_count: u32,
    pub discovered_count: u32,
    pub report_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub keywords: Vec<String>,
    pub action_count: u32,
    pub options: JobOptions,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: JobProgress,
    pub result: Option<JobOutcome>,
    pub error: Option<String>,
    pub failed_attempts: u32,
}

impl Job {
    pub fn new(user_id: &str, keywords: Vec<String>, action_count: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            keywords,
            action_count,
            options: JobOptions::default(),
            status: JobStatus::Waiting,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: JobProgress::default(),
            result: None,
            error: None,
            failed_attempts: 0,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.keywords.is_empty() || self.keywords.len() > MAX_KEYWORDS {
            return Err(CoreError::InvalidInput {
                message: format!("keyword count must be 1..={}", MAX_KEYWORDS),
            });
        }
        if self.action_count == 0 || self.action_count > MAX_ACTION_COUNT {
            return Err(CoreError::InvalidInput {
                message: format!("action count must be 1..={}", MAX_ACTION_COUNT),
            });
        }
        Ok(())
    }

    /// True when the job completed within `cooldown` of `now`.
    pub fn completed_within(&self, cooldown: std::time::Duration, now: DateTime<Utc>) -> bool {
        match (self.status, self.completed_at) {
            (JobStatus::Completed, Some(done)) => {
                let window = Duration::from_std(cooldown).unwrap_or_else(|_| Duration::zero());
                now.signed_duration_since(done) < window
            }
            _ => false,
        }
    }
}

/// Engagement counters scraped off a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub reactions: u32,
    pub replies: u32,
}

impl Engagement {
    pub fn total(&self) -> u32 {
        self.reactions + self.replies
    }
}

/// One scraped unit of content, unique per (url, user_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: Option<i64>,
    pub url: String,
    pub content: String,
    pub reaction_count: u32,
    pub reply_count: u32,
    pub keyword: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub acted_upon: bool,
    pub acted_text: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
    pub job_id: String,
    pub user_id: String,
}

impl CandidateItem {
    pub fn engagement(&self) -> Engagement {
        Engagement {
            reactions: self.reaction_count,
            replies: self.reply_count,
        }
    }

    pub fn engagement_score(&self) -> u32 {
        self.reaction_count + self.reply_count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportError {
    pub message: String,
    pub step: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub scrape_ms: i64,
    pub filter_ms: i64,
    pub act_ms: i64,
    pub total_ms: i64,
}

/// Immutable audit record of one job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub id: Option<i64>,
    pub job_id: String,
    pub user_id: String,
    pub discovered_count: u32,
    pub filtered_count: u32,
    pub acted_count: u32,
    pub failed_count: u32,
    pub duration_ms: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub success_rate_percent: f64,
    pub errors: Vec<ReportError>,
    pub performance: PhaseTimings,
    pub keywords: Vec<String>,
}

/// Cookie-equivalent credential permitting authenticated feed access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires_at: Option<i64>,
}

impl SessionToken {
    pub fn is_expired(&self, now_epoch: i64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now_epoch)
    }
}

/// Read access to stored session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn has_valid_session(&self, user_id: &str) -> Result<bool, CoreError>;

    async fn load_session(&self, user_id: &str) -> Result<Vec<SessionToken>, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Active,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::PermanentlyFailed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::PermanentlyFailed.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Active.is_terminal());
    }

    #[test]
    fn test_job_validation_bounds() {
        let job = Job::new("user-1", vec!["rust".to_string()], 5);
        assert!(job.validate().is_ok());

        let no_keywords = Job::new("user-1", vec![], 5);
        assert!(no_keywords.validate().is_err());

        let too_many_actions = Job::new("user-1", vec!["rust".to_string()], MAX_ACTION_COUNT + 1);
        assert!(too_many_actions.validate().is_err());
    }

    #[test]
    fn test_completed_within_cooldown() {
        let mut job = Job::new("user-1", vec!["rust".to_string()], 3);
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now() - Duration::seconds(60));

        let now = Utc::now();
        assert!(job.completed_within(std::time::Duration::from_secs(300), now));
        assert!(!job.completed_within(std::time::Duration::from_secs(30), now));

        job.status = JobStatus::Failed;
        assert!(!job.completed_within(std::time::Duration::from_secs(300), now));
    }

    #[test]
    fn test_token_expiry() {
        let token = SessionToken {
            name: "session".to_string(),
            value: "abc".to_string(),
            domain: ".example.com".to_string(),
            path: "/".to_string(),
            expires_at: Some(1_000),
        };
        assert!(token.is_expired(2_000));
        assert!(!token.is_expired(500));

        let no_expiry = SessionToken {
            expires_at: None,
            ..token
        };
        assert!(!no_expiry.is_expired(i64::MAX));
    }
}
