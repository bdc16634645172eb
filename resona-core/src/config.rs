use serde::Deserialize;
use std::time::Duration;

use crate::error::{ConfigError, CoreError};

/// Bounds on the scrape loop against the external feed. Content loading
/// there is asynchronous and unbounded polling risks hanging, so both a
/// stagnation bound and a hard round cap apply.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeLimits {
    pub max_load_more_rounds: u32,
    pub stagnation_limit: u32,
    pub navigation_timeout_secs: u64,
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        Self {
            max_load_more_rounds: 20,
            stagnation_limit: 3,
            navigation_timeout_secs: 30,
        }
    }
}

impl ScrapeLimits {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            token: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Process-wide configuration, built once at startup and never mutated.
/// All engagement tunables live here as overridable defaults rather than
/// constants baked into the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub browser: BrowserConfig,
    pub llm: LlmConfig,
    pub scrape: ScrapeLimits,

    /// Multiplier on the requested action count when gathering candidates,
    /// leaving slack for filtering losses.
    pub overscrape_factor: f64,
    /// Recently-completed jobs are not re-run within this window.
    pub cooldown_secs: u64,
    /// Failure count at which a job becomes permanently failed.
    pub max_failed_attempts: u32,
    /// Pause between successive reply submissions, success or failure.
    pub inter_action_delay_secs: u64,
    /// Posts with less content than this are treated as link-only noise.
    pub min_content_length: usize,
    /// Raw engagement floor applied before permalink resolution is spent.
    pub min_raw_engagement: u32,
    /// Case-insensitive substring matches that disqualify a post.
    pub excluded_terms: Vec<String>,

    pub queue_poll_interval_secs: u64,
    pub queue_max_delivery_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://resona.db".to_string(),
            browser: BrowserConfig::default(),
            llm: LlmConfig::default(),
            scrape: ScrapeLimits::default(),
            overscrape_factor: 1.5,
            cooldown_secs: 300,
            max_failed_attempts: 3,
            inter_action_delay_secs: 8,
            min_content_length: 30,
            min_raw_engagement: 1,
            excluded_terms: vec![
                "giveaway".to_string(),
                "sponsored".to_string(),
                "promo code".to_string(),
                "follow back".to_string(),
                "airdrop".to_string(),
                "nsfw".to_string(),
            ],
            queue_poll_interval_secs: 5,
            queue_max_delivery_attempts: 3,
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then an optional TOML file named by
    /// `RESONA_CONFIG`, then individual environment overrides.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = match std::env::var("RESONA_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|_| {
                    CoreError::Config(ConfigError::FileNotFound { path: path.clone() })
                })?;
                let parsed: AppConfig =
                    toml::from_str(&raw).map_err(|e| CoreError::Config(ConfigError::Parse(e)))?;
                parsed
            }
            Err(_) => AppConfig::default(),
        };

        if let Ok(url) = std::env::var("RESONA_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(url) = std::env::var("RESONA_BROWSER_URL") {
            config.browser.base_url = url;
        }
        if let Ok(token) = std::env::var("RESONA_BROWSER_TOKEN") {
            config.browser.token = Some(token);
        }
        if let Ok(provider) = std::env::var("RESONA_LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(key) = std::env::var("RESONA_LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("RESONA_LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(raw) = std::env::var("RESONA_COOLDOWN_SECS") {
            config.cooldown_secs = parse_env("RESONA_COOLDOWN_SECS", &raw)?;
        }
        if let Ok(raw) = std::env::var("RESONA_MAX_FAILED_ATTEMPTS") {
            config.max_failed_attempts = parse_env("RESONA_MAX_FAILED_ATTEMPTS", &raw)?;
        }
        if let Ok(raw) = std::env::var("RESONA_OVERSCRAPE_FACTOR") {
            config.overscrape_factor = parse_env("RESONA_OVERSCRAPE_FACTOR", &raw)?;
        }
        if let Ok(raw) = std::env::var("RESONA_INTER_ACTION_DELAY_SECS") {
            config.inter_action_delay_secs = parse_env("RESONA_INTER_ACTION_DELAY_SECS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.overscrape_factor < 1.0 {
            return Err(CoreError::Config(ConfigError::ValidationFailed {
                reason: "overscrape_factor must be at least 1.0".to_string(),
            }));
        }
        if self.max_failed_attempts == 0 {
            return Err(CoreError::Config(ConfigError::ValidationFailed {
                reason: "max_failed_attempts must be at least 1".to_string(),
            }));
        }
        if self.scrape.stagnation_limit == 0 || self.scrape.max_load_more_rounds == 0 {
            return Err(CoreError::Config(ConfigError::ValidationFailed {
                reason: "scrape bounds must be non-zero".to_string(),
            }));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn inter_action_delay(&self) -> Duration {
        Duration::from_secs(self.inter_action_delay_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue_poll_interval_secs)
    }

    /// Candidate count to gather for a requested action count.
    pub fn overscrape_target(&self, action_count: u32) -> usize {
        (action_count as f64 * self.overscrape_factor).ceil() as usize
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, CoreError> {
    raw.parse().map_err(|_| {
        CoreError::Config(ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cooldown(), Duration::from_secs(300));
    }

    #[test]
    fn test_overscrape_target_rounds_up() {
        let config = AppConfig::default();
        assert_eq!(config.overscrape_target(5), 8); // ceil(5 * 1.5)
        assert_eq!(config.overscrape_target(2), 3);
        assert_eq!(config.overscrape_target(4), 6);
    }

    #[test]
    fn test_validation_rejects_bad_factor() {
        let config = AppConfig {
            overscrape_factor: 0.5,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_overlay_fills_missing_fields() {
        let parsed: AppConfig = toml::from_str(
            r#"
            cooldown_secs = 60

            [scrape]
            stagnation_limit = 5
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(parsed.cooldown_secs, 60);
        assert_eq!(parsed.scrape.stagnation_limit, 5);
        // Untouched fields keep their defaults.
        assert_eq!(parsed.max_failed_attempts, 3);
        assert_eq!(parsed.scrape.max_load_more_rounds, 20);
    }
}
