//! Mailcade Common - Shared configuration, errors, and types
//!
//! This crate holds everything the other mailcade crates agree on:
//! the environment-sourced configuration, the surface error taxonomy,
//! and the id/status types of the delivery pipeline.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
