pub mod actions;
pub mod driver;
pub mod metrics;
pub mod pool;
pub mod rate_governor;
pub mod scraper;
pub mod session;
pub mod testing;

pub use actions::ActionExecutor;
pub use driver::{BrowserSession, ControlRole, FeedDriver, RawPost};
pub use pool::{DriverPool, DriverPoolConfig, PooledDriver};
pub use rate_governor::{RateBudgetConfig, RateGovernor};
pub use scraper::{ExclusionRules, ScrapeHarvest, ScrapePipeline};
pub use session::SessionValidator;
