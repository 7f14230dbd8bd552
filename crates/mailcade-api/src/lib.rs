//! Mailcade API - HTTP surface
//!
//! axum routers and handlers over the scheduling coordinator and the
//! storage repositories, with JWT session auth and a pluggable OAuth
//! identity provider.

pub mod auth;
pub mod handlers;
pub mod identity;
pub mod response;
pub mod routes;

pub use auth::{AppState, AuthUser};
pub use identity::{GoogleProvider, IdentityProvider, ResolvedIdentity};
pub use routes::create_router;
