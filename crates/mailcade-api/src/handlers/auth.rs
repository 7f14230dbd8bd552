//! OAuth sign-in and session handlers

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, IntoResponse, Redirect},
    Extension, Json,
};
use mailcade_common::Error;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::auth::{cookie_value, mint_token, AppState, AuthUser, OAUTH_STATE_COOKIE, TOKEN_COOKIE};
use crate::response::{ApiError, ApiResponse, ApiResult};

/// GET /auth/google - start the OAuth flow
pub async fn google_start(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    let url = state.identity.authorize_url(&nonce)?;

    // Short-lived state cookie; verified at the callback.
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age=600",
        OAUTH_STATE_COOKIE, nonce
    );

    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::to(&url),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// GET /auth/google/callback - finish the OAuth flow
pub async fn google_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<impl IntoResponse> {
    let expected = cookie_value(&headers, OAUTH_STATE_COOKIE)
        .ok_or_else(|| Error::Unauthenticated("Missing OAuth state cookie".to_string()))?;

    if expected != query.state {
        return Err(ApiError(Error::Unauthenticated(
            "OAuth state mismatch".to_string(),
        )));
    }

    let identity = state.identity.resolve(&query.code).await?;

    let user = state
        .users
        .upsert_by_google_id(mailcade_storage::models::UpsertUser {
            google_id: identity.external_id,
            email: identity.email,
            name: identity.name,
            avatar_url: identity.avatar,
        })
        .await
        .map_err(Error::store)?;

    info!(user_id = %user.id, "User signed in");

    let token = mint_token(&state.config.auth, &user)?;
    let max_age = state.config.auth.jwt_expiry_hours * 3600;

    let session_cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        TOKEN_COOKIE, token, max_age
    );
    let clear_state_cookie = format!("{}=; Path=/; HttpOnly; Max-Age=0", OAUTH_STATE_COOKIE);

    Ok((
        AppendHeaders([
            (header::SET_COOKIE, session_cookie),
            (header::SET_COOKIE, clear_state_cookie),
        ]),
        Redirect::to(&state.config.server.frontend_origin),
    ))
}

/// GET /auth/me - the authenticated user
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<mailcade_storage::models::User>>> {
    let user = state
        .users
        .get(auth.user_id)
        .await
        .map_err(Error::store)?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))?;

    Ok(Json(ApiResponse::ok(user)))
}

/// POST /auth/logout - clear the session cookie
pub async fn logout() -> impl IntoResponse {
    let cookie = format!("{}=; Path=/; HttpOnly; Max-Age=0", TOKEN_COOKIE);

    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(ApiResponse::message("Logged out")),
    )
}
