//! Request handlers

pub mod auth;
pub mod emails;
pub mod health;
pub mod senders;
