use crate::Database;
use chrono::Utc;
use resona_core::{
    CandidateItem, CredentialStore, Job, JobOutcome, JobStatus, PhaseTimings, ReportError,
    SessionReport, SessionToken,
};
use std::env;

async fn setup_test_db() -> Database {
    let db_path = env::temp_dir().join(format!("test_resona_{}.db", uuid::Uuid::new_v4()));
    let db_url = format!("sqlite://{}", db_path.display());

    let db = Database::connect(&db_url)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    db
}

fn sample_job(user_id: &str) -> Job {
    Job::new(user_id, vec!["rust".to_string(), "tokio".to_string()], 5)
}

fn sample_item(url: &str, user_id: &str, job_id: &str) -> CandidateItem {
    CandidateItem {
        id: None,
        url: url.to_string(),
        content: "scraped post content with enough length".to_string(),
        reaction_count: 4,
        reply_count: 2,
        keyword: Some("rust".to_string()),
        scraped_at: Utc::now(),
        acted_upon: false,
        acted_text: None,
        acted_at: None,
        job_id: job_id.to_string(),
        user_id: user_id.to_string(),
    }
}

fn sample_report(job_id: &str, user_id: &str) -> SessionReport {
    SessionReport {
        id: None,
        job_id: job_id.to_string(),
        user_id: user_id.to_string(),
        discovered_count: 8,
        filtered_count: 6,
        acted_count: 5,
        failed_count: 1,
        duration_ms: 1234,
        start_time: Utc::now(),
        end_time: Utc::now(),
        success_rate_percent: 83.3,
        errors: vec![ReportError {
            message: "one item failed".to_string(),
            step: "engaging".to_string(),
            timestamp: Utc::now(),
        }],
        performance: PhaseTimings {
            scrape_ms: 800,
            filter_ms: 4,
            act_ms: 400,
            total_ms: 1234,
        },
        keywords: vec!["rust".to_string()],
    }
}

#[tokio::test]
async fn test_database_connection_and_migrations() {
    let _db = setup_test_db().await;
}

#[tokio::test]
async fn test_job_round_trip_and_claim() {
    let db = setup_test_db().await;
    let jobs = db.jobs();

    let job = sample_job("user-1");
    jobs.create(&job).await.expect("create job");

    let loaded = jobs.get(&job.id).await.expect("get job").expect("exists");
    assert_eq!(loaded.status, JobStatus::Waiting);
    assert_eq!(loaded.keywords, job.keywords);
    assert_eq!(loaded.action_count, 5);

    // First claim wins, the duplicate delivery loses.
    assert!(jobs
        .claim_active(&job.id, JobStatus::Waiting, Utc::now())
        .await
        .unwrap());
    assert!(!jobs
        .claim_active(&job.id, JobStatus::Waiting, Utc::now())
        .await
        .unwrap());

    let active = jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(active.status, JobStatus::Active);
    assert!(active.started_at.is_some());
}

#[tokio::test]
async fn test_job_completion_is_terminal() {
    let db = setup_test_db().await;
    let jobs = db.jobs();

    let job = sample_job("user-1");
    jobs.create(&job).await.unwrap();
    jobs.claim_active(&job.id, JobStatus::Waiting, Utc::now())
        .await
        .unwrap();

    let outcome = JobOutcome {
        success: true,
        acted_count: 3,
        discovered_count: 8,
        report_id: Some(1),
    };
    jobs.mark_completed(&job.id, &outcome).await.unwrap();

    let done = jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result, Some(outcome));
    assert_eq!(done.progress.step_progress, 100);

    // Completed is terminal: no further claim from any expected state.
    assert!(!jobs
        .claim_active(&job.id, JobStatus::Waiting, Utc::now())
        .await
        .unwrap());
    assert!(!jobs
        .claim_active(&job.id, JobStatus::Failed, Utc::now())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_job_failure_counts_and_permanent_failure() {
    let db = setup_test_db().await;
    let jobs = db.jobs();

    let job = sample_job("user-1");
    jobs.create(&job).await.unwrap();

    jobs.claim_active(&job.id, JobStatus::Waiting, Utc::now())
        .await
        .unwrap();
    jobs.update_progress(&job.id, "scraping", 25).await.unwrap();
    let attempts = jobs.mark_failed(&job.id, "session expired").await.unwrap();
    assert_eq!(attempts, 1);

    // Progress stays frozen at the failing step.
    let failed = jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress.current_step, "scraping");
    assert_eq!(failed.error.as_deref(), Some("session expired"));

    // Retry path: failed jobs can be claimed again.
    assert!(jobs
        .claim_active(&job.id, JobStatus::Failed, Utc::now())
        .await
        .unwrap());
    let attempts = jobs.mark_failed(&job.id, "still broken").await.unwrap();
    assert_eq!(attempts, 2);

    assert!(jobs
        .mark_permanently_failed(&job.id, "retries exhausted")
        .await
        .unwrap());
    let dead = jobs.get(&job.id).await.unwrap().unwrap();
    assert_eq!(dead.status, JobStatus::PermanentlyFailed);

    // Terminal: neither claim nor a second permanent transition applies.
    assert!(!jobs
        .claim_active(&job.id, JobStatus::Failed, Utc::now())
        .await
        .unwrap());
    assert!(!jobs
        .mark_permanently_failed(&job.id, "again")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_item_uniqueness_per_user() {
    let db = setup_test_db().await;
    let items = db.items();

    let batch = vec![
        sample_item("https://feed.example/p/1", "user-1", "job-1"),
        sample_item("https://feed.example/p/2", "user-1", "job-1"),
    ];
    let summary = items.insert_batch(&batch).await.unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.duplicates, 0);

    // Same URLs again for the same user: all skipped, none fatal.
    let summary = items.insert_batch(&batch).await.unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.duplicates, 2);

    // Same URL for a different user is a separate document.
    let other = vec![sample_item("https://feed.example/p/1", "user-2", "job-2")];
    let summary = items.insert_batch(&other).await.unwrap();
    assert_eq!(summary.inserted, 1);

    assert_eq!(items.count_for_user("user-1").await.unwrap(), 2);
    assert_eq!(items.count_for_user("user-2").await.unwrap(), 1);
}

#[tokio::test]
async fn test_mark_acted_is_scoped_to_user() {
    let db = setup_test_db().await;
    let items = db.items();

    let url = "https://feed.example/p/1";
    items
        .insert_batch(&[
            sample_item(url, "user-1", "job-1"),
            sample_item(url, "user-2", "job-2"),
        ])
        .await
        .unwrap();

    assert!(items
        .mark_acted(url, "user-1", "thanks for this!", Utc::now())
        .await
        .unwrap());

    let acted = items.get(url, "user-1").await.unwrap().unwrap();
    assert!(acted.acted_upon);
    assert_eq!(acted.acted_text.as_deref(), Some("thanks for this!"));
    assert!(acted.acted_at.is_some());

    // The other user's row for the same URL is untouched.
    let untouched = items.get(url, "user-2").await.unwrap().unwrap();
    assert!(!untouched.acted_upon);
    assert!(untouched.acted_text.is_none());

    // Unknown rows report no update.
    assert!(!items
        .mark_acted("https://feed.example/p/404", "user-1", "x", Utc::now())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_reports_are_append_only() {
    let db = setup_test_db().await;
    let reports = db.reports();

    let first = reports.insert(&sample_report("job-1", "user-1")).await.unwrap();
    let second = reports.insert(&sample_report("job-1", "user-1")).await.unwrap();
    assert!(second > first);

    let listed = reports.list_for_job("job-1").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].acted_count, 5);
    assert_eq!(listed[0].errors.len(), 1);
    assert_eq!(listed[0].errors[0].step, "engaging");
    assert_eq!(listed[0].performance.scrape_ms, 800);
}

#[tokio::test]
async fn test_credential_store_honors_expiry() {
    let db = setup_test_db().await;
    let credentials = db.credentials();

    assert!(!credentials.has_valid_session("user-1").await.unwrap());

    let tokens = vec![
        SessionToken {
            name: "session".to_string(),
            value: "opaque".to_string(),
            domain: ".feed.example".to_string(),
            path: "/".to_string(),
            expires_at: None,
        },
        SessionToken {
            name: "stale".to_string(),
            value: "old".to_string(),
            domain: ".feed.example".to_string(),
            path: "/".to_string(),
            expires_at: Some(1),
        },
    ];
    credentials.save_tokens("user-1", &tokens).await.unwrap();

    assert!(credentials.has_valid_session("user-1").await.unwrap());
    let loaded = credentials.load_session("user-1").await.unwrap();
    assert_eq!(loaded.len(), 2);

    // Re-saving a token with the same name replaces it.
    credentials
        .save_tokens(
            "user-1",
            &[SessionToken {
                name: "session".to_string(),
                value: "rotated".to_string(),
                domain: ".feed.example".to_string(),
                path: "/".to_string(),
                expires_at: None,
            }],
        )
        .await
        .unwrap();
    let loaded = credentials.load_session("user-1").await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.iter().any(|t| t.value == "rotated"));

    credentials.delete_tokens("user-1").await.unwrap();
    assert!(!credentials.has_valid_session("user-1").await.unwrap());
}
