pub mod batch_processor;
pub mod scheduler;

pub use batch_processor::BatchProcessor;
pub use scheduler::{NotificationScheduler, TickSummary, next_occurrence};
