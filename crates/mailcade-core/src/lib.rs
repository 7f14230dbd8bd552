//! Mailcade Core - The delivery pipeline
//!
//! Batch planner, persistent delayed queue, rate limiter, worker pool,
//! scheduling coordinator, and the outbound transport adapter.

pub mod clock;
pub mod coordinator;
pub mod planner;
pub mod queue;
pub mod ratelimit;
pub mod text;
pub mod transport;
pub mod worker;

pub use clock::{Clock, SystemClock};
pub use coordinator::{ScheduleCoordinator, ScheduleError, ScheduleRequest, ScheduledBatch};
pub use queue::{EnqueueOptions, JobQueue, LeasedJob, RetryPolicy, SendJob};
pub use ratelimit::{MemoryCounterStore, RateLimitConfig, RateLimitDecision, RateLimiter};
pub use transport::{Envelope, PreviewTransport, SendOutcome, SmtpSettings, SmtpTransport, Transport};
pub use worker::{WorkerConfig, WorkerPool};
