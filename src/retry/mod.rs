//! Retry eligibility, backoff and the periodic retry job

pub mod policy;
pub mod scheduler;

pub use policy::{RetryPolicy, calculate_next_retry};
pub use scheduler::{BatchReport, RetryItemReport, RetryScheduler, RetryWorker};
