//! Repositories over the durable store

pub mod batches;
pub mod messages;
pub mod rate_counters;
pub mod senders;
pub mod users;

pub use batches::BatchRepository;
pub use messages::{ListFilter, MessageRepository, SortOrder};
pub use rate_counters::RateCounterRepository;
pub use senders::SenderRepository;
pub use users::UserRepository;
