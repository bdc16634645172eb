//! Keyed browser-session pool.
//!
//! One session per user, bounded pool size, idle eviction, and validation
//! on checkout. A checked-out session is exclusively owned by its holder
//! until the `PooledDriver` guard drops, which returns it to the pool on
//! every exit path.

use crate::driver::FeedDriver;
use resona_core::CoreError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DriverPoolConfig {
    pub max_sessions: usize,
    pub max_idle: Duration,
}

impl Default for DriverPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            max_idle: Duration::from_secs(600),
        }
    }
}

/// Builds a fresh driver session for a user.
pub type DriverFactory = Arc<dyn Fn(&str) -> Arc<dyn FeedDriver> + Send + Sync>;

struct PoolEntry {
    driver: Arc<dyn FeedDriver>,
    last_used: Instant,
    in_use: bool,
}

pub struct DriverPool {
    config: DriverPoolConfig,
    factory: DriverFactory,
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl DriverPool {
    pub fn new(config: DriverPoolConfig, factory: DriverFactory) -> Self {
        Self {
            config,
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check out the session for `user_id`, creating or rebuilding it as
    /// needed. Errors if the user's session is already checked out; jobs
    /// for one user never run concurrently.
    pub async fn acquire(self: &Arc<Self>, user_id: &str) -> Result<PooledDriver, CoreError> {
        let (existing, evicted) = {
            let mut entries = self.entries.lock().unwrap();

            let mut evicted: Vec<(String, Arc<dyn FeedDriver>)> = Vec::new();
            let max_idle = self.config.max_idle;
            entries.retain(|uid, entry| {
                if !entry.in_use && entry.last_used.elapsed() > max_idle {
                    evicted.push((uid.clone(), entry.driver.clone()));
                    false
                } else {
                    true
                }
            });

            if let Some(entry) = entries.get_mut(user_id) {
                if entry.in_use {
                    return Err(CoreError::Internal {
                        message: format!("session for user {} is already checked out", user_id),
                    });
                }
                entry.in_use = true;
                (Some(entry.driver.clone()), evicted)
            } else {
                if entries.len() >= self.config.max_sessions {
                    let lru = entries
                        .iter()
                        .filter(|(_, entry)| !entry.in_use)
                        .min_by_key(|(_, entry)| entry.last_used)
                        .map(|(uid, _)| uid.clone());
                    match lru {
                        Some(uid) => {
                            let entry = entries.remove(&uid).expect("lru key just observed");
                            evicted.push((uid, entry.driver));
                        }
                        None => {
                            return Err(CoreError::Internal {
                                message: "driver pool exhausted by in-use sessions".to_string(),
                            });
                        }
                    }
                }
                (None, evicted)
            }
        };

        for (uid, driver) in evicted {
            debug!("Evicting idle session for user {}", uid);
            if let Err(error) = driver.close().await {
                debug!("Close of evicted session for {} failed: {}", uid, error);
            }
        }

        let driver = match existing {
            Some(existing) => match existing.is_logged_in().await {
                Ok(_) => existing,
                Err(error) => {
                    // Session no longer answers; rebuild it.
                    warn!(
                        "Pooled session for user {} failed validation ({}), rebuilding",
                        user_id, error
                    );
                    if let Err(close_error) = existing.close().await {
                        debug!("Close of stale session failed: {}", close_error);
                    }
                    let fresh = (self.factory)(user_id);
                    if let Some(entry) = self.entries.lock().unwrap().get_mut(user_id) {
                        entry.driver = fresh.clone();
                    }
                    fresh
                }
            },
            None => {
                let fresh = (self.factory)(user_id);
                self.entries.lock().unwrap().insert(
                    user_id.to_string(),
                    PoolEntry {
                        driver: fresh.clone(),
                        last_used: Instant::now(),
                        in_use: true,
                    },
                );
                fresh
            }
        };

        Ok(PooledDriver {
            pool: Arc::clone(self),
            user_id: user_id.to_string(),
            driver,
        })
    }

    fn release(&self, user_id: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(user_id) {
            entry.in_use = false;
            entry.last_used = Instant::now();
        }
    }

    pub fn pooled_sessions(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Checkout guard. Dropping it returns the session to the pool, so release
/// is paired with acquisition on every exit path including panics and
/// early returns.
pub struct PooledDriver {
    pool: Arc<DriverPool>,
    user_id: String,
    driver: Arc<dyn FeedDriver>,
}

impl PooledDriver {
    pub fn driver(&self) -> &dyn FeedDriver {
        self.driver.as_ref()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for PooledDriver {
    fn drop(&mut self) {
        self.pool.release(&self.user_id);
    }
}
