//! Keyword-driven candidate scraping.
//!
//! For each keyword the pipeline searches the feed and keeps triggering
//! load-more until the overscrape target is met, no new posts have appeared
//! for a bounded number of rounds (stagnation), or a hard round cap is hit.
//! Cheap exclusion rules run before the comparatively expensive permalink
//! resolution. If all keywords together still fall short, one fallback pass
//! scrapes the user's general feed under the same bounds.

use crate::driver::{FeedDriver, RawPost};
use crate::rate_governor::RateGovernor;
use chrono::Utc;
use resona_core::filter::contains_excluded_term;
use resona_core::{CandidateItem, ScrapeLimits};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pre-persistence exclusion applied while scraping, before any
/// URL-resolution call is spent on an item.
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    pub excluded_terms: Vec<String>,
    pub min_raw_engagement: u32,
}

impl ExclusionRules {
    pub fn excludes(&self, post: &RawPost) -> bool {
        if post.reactions + post.replies < self.min_raw_engagement {
            return true;
        }
        contains_excluded_term(&post.content, &self.excluded_terms)
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeError {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ScrapeHarvest {
    pub items: Vec<CandidateItem>,
    pub errors: Vec<ScrapeError>,
}

pub struct ScrapePipeline {
    governor: Arc<RateGovernor>,
    limits: ScrapeLimits,
}

impl ScrapePipeline {
    pub fn new(governor: Arc<RateGovernor>, limits: ScrapeLimits) -> Self {
        Self { governor, limits }
    }

    /// Gather up to `target` candidates for the job, deduplicated against
    /// `seen_urls` (URLs already recorded for this job and user).
    pub async fn collect(
        &self,
        driver: &dyn FeedDriver,
        job_id: &str,
        user_id: &str,
        keywords: &[String],
        target: usize,
        seen_urls: &HashSet<String>,
        rules: &ExclusionRules,
    ) -> ScrapeHarvest {
        let mut harvest = ScrapeHarvest::default();
        let mut seen = seen_urls.clone();
        let budget = self.governor.recovery_budget();

        for keyword in keywords {
            if harvest.items.len() >= target {
                break;
            }

            debug!("Scraping keyword '{}' for job {}", keyword, job_id);
            let opened = self
                .governor
                .execute_guarded(driver, "search", budget, || driver.search(keyword))
                .await;
            if let Err(error) = opened {
                warn!("Search failed for keyword '{}': {}", keyword, error);
                harvest.errors.push(ScrapeError {
                    source: keyword.clone(),
                    message: error.to_string(),
                });
                continue;
            }

            self.harvest_view(
                driver,
                job_id,
                user_id,
                Some(keyword.as_str()),
                target,
                &mut seen,
                rules,
                &mut harvest,
            )
            .await;
        }

        if harvest.items.len() < target {
            info!(
                "Keywords exhausted at {}/{} candidates, falling back to general feed",
                harvest.items.len(),
                target
            );
            let opened = self
                .governor
                .execute_guarded(driver, "open_feed", budget, || driver.open_feed())
                .await;
            match opened {
                Ok(()) => {
                    self.harvest_view(
                        driver,
                        job_id,
                        user_id,
                        None,
                        target,
                        &mut seen,
                        rules,
                        &mut harvest,
                    )
                    .await;
                }
                Err(error) => {
                    warn!("General feed fallback failed: {}", error);
                    harvest.errors.push(ScrapeError {
                        source: "feed".to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }

        info!(
            "Scrape for job {} harvested {} candidates ({} errors)",
            job_id,
            harvest.items.len(),
            harvest.errors.len()
        );
        harvest
    }

    /// Drain the current view (search results or general feed) into the
    /// harvest until the target, a stagnation run, or the round cap stops
    /// it. Individual item failures log and continue.
    #[allow(clippy::too_many_arguments)]
    async fn harvest_view(
        &self,
        driver: &dyn FeedDriver,
        job_id: &str,
        user_id: &str,
        keyword: Option<&str>,
        target: usize,
        seen: &mut HashSet<String>,
        rules: &ExclusionRules,
        harvest: &mut ScrapeHarvest,
    ) {
        let source = keyword.unwrap_or("feed");
        let budget = self.governor.recovery_budget();
        let mut known_refs: HashSet<String> = HashSet::new();
        let mut stagnant_rounds: u32 = 0;
        let mut rounds: u32 = 0;

        loop {
            if harvest.items.len() >= target {
                return;
            }

            let posts = match driver.visible_posts().await {
                Ok(posts) => posts,
                Err(error) => {
                    warn!("Post extraction failed on '{}': {}", source, error);
                    harvest.errors.push(ScrapeError {
                        source: source.to_string(),
                        message: error.to_string(),
                    });
                    return;
                }
            };

            let fresh: Vec<RawPost> = posts
                .into_iter()
                .filter(|post| !known_refs.contains(&post.post_ref))
                .collect();

            if fresh.is_empty() {
                stagnant_rounds += 1;
            } else {
                stagnant_rounds = 0;
            }

            for post in fresh {
                known_refs.insert(post.post_ref.clone());

                if rules.excludes(&post) {
                    debug!("Excluded post {} before URL resolution", post.post_ref);
                    continue;
                }
                if harvest.items.len() >= target {
                    break;
                }

                let resolved = self
                    .governor
                    .execute_guarded(driver, "resolve_permalink", budget, || {
                        driver.resolve_permalink(&post.post_ref)
                    })
                    .await;

                match resolved {
                    Ok(resolved_url) => {
                        if !seen.insert(resolved_url.clone()) {
                            debug!("Skipping already-seen URL {}", resolved_url);
                            continue;
                        }
                        harvest.items.push(CandidateItem {
                            id: None,
                            url: resolved_url,
                            content: post.content,
                            reaction_count: post.reactions,
                            reply_count: post.replies,
                            keyword: keyword.map(String::from),
                            scraped_at: Utc::now(),
                            acted_upon: false,
                            acted_text: None,
                            acted_at: None,
                            job_id: job_id.to_string(),
                            user_id: user_id.to_string(),
                        });
                    }
                    Err(error) => {
                        debug!(
                            "Permalink resolution failed for {} on '{}': {}",
                            post.post_ref, source, error
                        );
                        harvest.errors.push(ScrapeError {
                            source: source.to_string(),
                            message: error.to_string(),
                        });
                    }
                }
            }

            if harvest.items.len() >= target {
                return;
            }
            if stagnant_rounds >= self.limits.stagnation_limit {
                debug!("View '{}' stagnated after {} rounds", source, rounds);
                return;
            }
            rounds += 1;
            if rounds >= self.limits.max_load_more_rounds {
                debug!("View '{}' hit the load-more round cap", source);
                return;
            }

            let loaded = self
                .governor
                .execute_guarded(driver, "load_more", budget, || driver.load_more())
                .await;
            if let Err(error) = loaded {
                warn!("Load-more failed on '{}': {}", source, error);
                harvest.errors.push(ScrapeError {
                    source: source.to_string(),
                    message: error.to_string(),
                });
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_governor::RateBudgetConfig;
    use crate::testing::{MockDriver, ScriptedFailure};

    fn pipeline() -> ScrapePipeline {
        let config = RateBudgetConfig {
            per_minute_cap: 1000,
            per_hour_cap: 10000,
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
            jitter_factor: 0.0,
            max_recovery_attempts: 1,
        };
        ScrapePipeline::new(Arc::new(RateGovernor::new(config)), ScrapeLimits::default())
    }

    fn rules() -> ExclusionRules {
        ExclusionRules {
            excluded_terms: vec!["sponsored".to_string()],
            min_raw_engagement: 1,
        }
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[tokio::test]
    async fn test_collects_across_keywords_until_target() {
        let driver = MockDriver::new();
        driver.add_keyword_page(
            "rust",
            vec![
                MockDriver::post("p1", "a long enough post about rust things", 3, 1),
                MockDriver::post("p2", "another long enough rust discussion", 2, 0),
            ],
        );
        driver.add_keyword_page(
            "tokio",
            vec![MockDriver::post("p3", "async runtime content with length", 5, 2)],
        );

        let harvest = pipeline()
            .collect(
                &driver,
                "job-1",
                "user-1",
                &keywords(&["rust", "tokio"]),
                3,
                &HashSet::new(),
                &rules(),
            )
            .await;

        assert_eq!(harvest.items.len(), 3);
        assert_eq!(harvest.items[0].keyword.as_deref(), Some("rust"));
        assert_eq!(harvest.items[2].keyword.as_deref(), Some("tokio"));
        assert!(harvest.errors.is_empty());
    }

    #[tokio::test]
    async fn test_exclusion_runs_before_resolution() {
        let driver = MockDriver::new();
        driver.add_keyword_page(
            "rust",
            vec![
                MockDriver::post("p1", "Sponsored: the best crate money buys", 50, 5),
                MockDriver::post("p2", "no reactions at all on this one", 0, 0),
                MockDriver::post("p3", "a genuine post with some traction", 4, 1),
            ],
        );

        let harvest = pipeline()
            .collect(
                &driver,
                "job-1",
                "user-1",
                &keywords(&["rust"]),
                5,
                &HashSet::new(),
                &rules(),
            )
            .await;

        assert_eq!(harvest.items.len(), 1);
        assert_eq!(harvest.items[0].url, MockDriver::permalink("p3"));
    }

    #[tokio::test]
    async fn test_seen_urls_are_not_rescraped() {
        let driver = MockDriver::new();
        driver.add_keyword_page(
            "rust",
            vec![MockDriver::post("p1", "previously recorded post content", 3, 0)],
        );

        let mut seen = HashSet::new();
        seen.insert(MockDriver::permalink("p1"));

        let harvest = pipeline()
            .collect(
                &driver,
                "job-1",
                "user-1",
                &keywords(&["rust"]),
                5,
                &seen,
                &rules(),
            )
            .await;

        assert!(harvest.items.is_empty());
    }

    #[tokio::test]
    async fn test_failed_keyword_skips_to_next() {
        let driver = MockDriver::new();
        driver.script_searches(vec![Err(ScriptedFailure::Navigation), Ok(())]);
        driver.add_keyword_page(
            "tokio",
            vec![MockDriver::post("p1", "healthy keyword still harvested", 2, 2)],
        );

        let harvest = pipeline()
            .collect(
                &driver,
                "job-1",
                "user-1",
                &keywords(&["rust", "tokio"]),
                1,
                &HashSet::new(),
                &rules(),
            )
            .await;

        assert_eq!(harvest.items.len(), 1);
        assert_eq!(harvest.errors.len(), 1);
        assert_eq!(harvest.errors[0].source, "rust");
    }

    #[tokio::test]
    async fn test_fallback_feed_pass_fills_shortfall() {
        let driver = MockDriver::new();
        driver.add_keyword_page(
            "rust",
            vec![MockDriver::post("p1", "only one keyword result appears", 2, 0)],
        );
        driver.add_feed_page(vec![
            MockDriver::post("f1", "general feed post with enough text", 1, 1),
            MockDriver::post("f2", "second general feed post, also fine", 1, 0),
        ]);

        let harvest = pipeline()
            .collect(
                &driver,
                "job-1",
                "user-1",
                &keywords(&["rust"]),
                3,
                &HashSet::new(),
                &rules(),
            )
            .await;

        assert_eq!(harvest.items.len(), 3);
        // Fallback items carry no source keyword.
        assert!(harvest.items[1].keyword.is_none());
        assert!(harvest.items[2].keyword.is_none());
    }

    #[tokio::test]
    async fn test_load_more_reveals_later_pages() {
        let driver = MockDriver::new();
        driver.add_keyword_page(
            "rust",
            vec![MockDriver::post("p1", "first page post with some length", 2, 0)],
        );
        driver.add_keyword_page(
            "rust",
            vec![MockDriver::post("p2", "second page post with some length", 3, 0)],
        );

        let harvest = pipeline()
            .collect(
                &driver,
                "job-1",
                "user-1",
                &keywords(&["rust"]),
                2,
                &HashSet::new(),
                &rules(),
            )
            .await;

        assert_eq!(harvest.items.len(), 2);
        assert_eq!(harvest.items[1].url, MockDriver::permalink("p2"));
    }
}
