//! Persistent delayed job queue

pub mod manager;

pub use manager::{EnqueueOptions, JobQueue, LeasedJob, QueueStats, RetryPolicy, SendJob};
