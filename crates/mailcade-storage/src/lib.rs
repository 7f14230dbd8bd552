//! Mailcade Storage - PostgreSQL persistence layer
//!
//! Connection pool, `FromRow` models, and the repositories the delivery
//! pipeline mutates durable state through.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
