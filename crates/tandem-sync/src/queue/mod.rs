//! Mutation queue: ordering, retry scheduling, prioritization

mod manager;
mod scheduler;

pub use manager::{EnqueueOutcome, QueueManager, RetryDisposition};
pub use scheduler::{BackoffPolicy, RetryScheduler};
