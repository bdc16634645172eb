pub mod processor;
pub mod queue;
pub mod report;
pub mod service;

pub use processor::{JobProcessor, ProcessOutcome};
pub use queue::{JobQueue, QueueEntry};
pub use report::ReportBuilder;
pub use service::EngagementService;
