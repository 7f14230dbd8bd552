//! API routes

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{auth, emails, health, senders};

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Session-free routes
    let public_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/auth/google", get(auth::google_start))
        .route("/auth/google/callback", get(auth::google_callback))
        .route("/auth/logout", post(auth::logout));

    // Everything else requires a valid session and a matching user
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/senders", get(senders::list_senders))
        .route("/senders", post(senders::create_sender))
        .route("/senders/:id", get(senders::get_sender))
        .route("/senders/:id", put(senders::update_sender))
        .route("/senders/:id", delete(senders::delete_sender))
        .route("/emails/schedule", post(emails::schedule_emails))
        .route("/emails/scheduled", get(emails::list_scheduled))
        .route("/emails/sent", get(emails::list_sent))
        .route("/emails/stats", get(emails::stats))
        .route("/emails/:id", get(emails::get_email))
        .route("/emails/:id", delete(emails::cancel_email))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let cors = cors_layer(&state.config.server.frontend_origin);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(frontend_origin: &str) -> CorsLayer {
    let origin = match frontend_origin.parse::<HeaderValue>() {
        Ok(origin) => origin,
        Err(e) => {
            warn!("Invalid frontend origin {:?}: {}", frontend_origin, e);
            HeaderValue::from_static("http://localhost:5173")
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
