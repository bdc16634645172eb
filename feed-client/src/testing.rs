//! Scriptable in-memory `FeedDriver` for tests. No network, no browser:
//! keyword searches serve pre-loaded pages, load-more reveals the next
//! page, and reply submission outcomes can be scripted per call.

use crate::driver::{ControlRole, FeedDriver, RawPost};
use async_trait::async_trait;
use resona_core::{CoreError, PlatformError, SessionToken};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Failure shapes a test can script for driver calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Throttle,
    Submission,
    Navigation,
    Timeout,
}

impl ScriptedFailure {
    fn to_error(self) -> CoreError {
        match self {
            ScriptedFailure::Throttle => {
                CoreError::Platform(PlatformError::RateLimitExceeded { retry_after: 0 })
            }
            ScriptedFailure::Submission => CoreError::Platform(PlatformError::SubmissionFailed {
                details: "scripted submission failure".to_string(),
            }),
            ScriptedFailure::Navigation => CoreError::Platform(PlatformError::NavigationFailed {
                url: "scripted".to_string(),
            }),
            ScriptedFailure::Timeout => CoreError::Platform(PlatformError::ElementTimeout {
                what: "scripted".to_string(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    pages_by_keyword: HashMap<String, Vec<Vec<RawPost>>>,
    feed_pages: Vec<Vec<RawPost>>,
    visible: Vec<RawPost>,
    active_pages: Vec<Vec<RawPost>>,
    next_page: usize,
    logged_in: bool,
    fail_open_session: bool,
    open_session_calls: u32,
    reload_count: u32,
    close_count: u32,
    current_url: Option<String>,
    composer_missing_urls: HashSet<String>,
    submit_script: VecDeque<Result<(), ScriptedFailure>>,
    search_script: VecDeque<Result<(), ScriptedFailure>>,
    submitted: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        let driver = Self::default();
        driver.state.lock().unwrap().logged_in = true;
        driver
    }

    pub fn post(reference: &str, content: &str, reactions: u32, replies: u32) -> RawPost {
        RawPost {
            post_ref: reference.to_string(),
            content: content.to_string(),
            reactions,
            replies,
        }
    }

    /// Permalink the mock resolves a post reference to.
    pub fn permalink(reference: &str) -> String {
        format!("https://feed.example/p/{}", reference)
    }

    pub fn add_keyword_page(&self, keyword: &str, posts: Vec<RawPost>) {
        self.state
            .lock()
            .unwrap()
            .pages_by_keyword
            .entry(keyword.to_string())
            .or_default()
            .push(posts);
    }

    pub fn add_feed_page(&self, posts: Vec<RawPost>) {
        self.state.lock().unwrap().feed_pages.push(posts);
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.state.lock().unwrap().logged_in = logged_in;
    }

    pub fn fail_open_session(&self) {
        self.state.lock().unwrap().fail_open_session = true;
    }

    pub fn disable_composer_for(&self, url: &str) {
        self.state
            .lock()
            .unwrap()
            .composer_missing_urls
            .insert(url.to_string());
    }

    /// Queue the outcome of the next reply submissions, in order. Calls
    /// beyond the script succeed.
    pub fn script_submissions(&self, outcomes: Vec<Result<(), ScriptedFailure>>) {
        self.state.lock().unwrap().submit_script = outcomes.into();
    }

    pub fn script_searches(&self, outcomes: Vec<Result<(), ScriptedFailure>>) {
        self.state.lock().unwrap().search_script = outcomes.into();
    }

    pub fn submitted(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn reload_count(&self) -> u32 {
        self.state.lock().unwrap().reload_count
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().unwrap().close_count
    }

    pub fn open_session_calls(&self) -> u32 {
        self.state.lock().unwrap().open_session_calls
    }
}

#[async_trait]
impl FeedDriver for MockDriver {
    async fn open_session(&self, _tokens: &[SessionToken]) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        state.open_session_calls += 1;
        if state.fail_open_session {
            return Err(CoreError::Platform(PlatformError::AuthenticationFailed {
                reason: "scripted open failure".to_string(),
            }));
        }
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool, CoreError> {
        Ok(self.state.lock().unwrap().logged_in)
    }

    async fn search(&self, keyword: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(Err(failure)) = state.search_script.pop_front() {
            return Err(failure.to_error());
        }
        state.active_pages = state
            .pages_by_keyword
            .get(keyword)
            .cloned()
            .unwrap_or_default();
        state.visible = state.active_pages.first().cloned().unwrap_or_default();
        state.next_page = 1;
        Ok(())
    }

    async fn open_feed(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        state.active_pages = state.feed_pages.clone();
        state.visible = state.active_pages.first().cloned().unwrap_or_default();
        state.next_page = 1;
        Ok(())
    }

    async fn load_more(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        let index = state.next_page;
        if let Some(page) = state.active_pages.get(index).cloned() {
            state.visible.extend(page);
            state.next_page += 1;
        }
        Ok(())
    }

    async fn visible_posts(&self) -> Result<Vec<RawPost>, CoreError> {
        Ok(self.state.lock().unwrap().visible.clone())
    }

    async fn resolve_permalink(&self, post_ref: &str) -> Result<String, CoreError> {
        Ok(Self::permalink(post_ref))
    }

    async fn goto(&self, url: &str) -> Result<(), CoreError> {
        self.state.lock().unwrap().current_url = Some(url.to_string());
        Ok(())
    }

    async fn locate(&self, role: ControlRole) -> Result<bool, CoreError> {
        let state = self.state.lock().unwrap();
        if role == ControlRole::ReplyComposer {
            if let Some(ref url) = state.current_url {
                if state.composer_missing_urls.contains(url) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn submit_reply(&self, text: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(Err(failure)) = state.submit_script.pop_front() {
            return Err(failure.to_error());
        }
        let url = state.current_url.clone().unwrap_or_default();
        state.submitted.push((url, text.to_string()));
        Ok(())
    }

    async fn reload(&self) -> Result<(), CoreError> {
        self.state.lock().unwrap().reload_count += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.state.lock().unwrap().close_count += 1;
        Ok(())
    }
}
