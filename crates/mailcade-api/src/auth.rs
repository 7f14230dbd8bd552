//! Session authentication
//!
//! Signed JWT sessions carried as a bearer token or cookie. The
//! middleware resolves the token to an authenticated principal and
//! threads it through request extensions; ownership checks in handlers
//! are explicit against its user id.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use mailcade_common::config::{AuthConfig, Config};
use mailcade_common::types::UserId;
use mailcade_common::{Error, Result};
use mailcade_core::ScheduleCoordinator;
use mailcade_storage::models::User;
use mailcade_storage::repository::{MessageRepository, SenderRepository, UserRepository};
use mailcade_storage::DatabasePool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::identity::IdentityProvider;
use crate::response::ApiError;

/// Session cookie name
pub const TOKEN_COOKIE: &str = "mailcade_token";

/// OAuth state cookie name
pub const OAUTH_STATE_COOKIE: &str = "mailcade_oauth_state";

/// Application state shared across handlers
pub struct AppState {
    pub db_pool: DatabasePool,
    pub config: Arc<Config>,
    pub coordinator: Arc<ScheduleCoordinator>,
    pub identity: Arc<dyn IdentityProvider>,
    pub users: UserRepository,
    pub senders: SenderRepository,
    pub messages: MessageRepository,
}

impl AppState {
    pub fn new(
        db_pool: DatabasePool,
        config: Arc<Config>,
        coordinator: Arc<ScheduleCoordinator>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            db_pool,
            config,
            coordinator,
            identity,
            users: UserRepository::new(pool.clone()),
            senders: SenderRepository::new(pool.clone()),
            messages: MessageRepository::new(pool),
        }
    }
}

/// Authenticated principal threaded through request extensions
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: String,
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Sign a session token for a user
pub fn mint_token(auth: &AuthConfig, user: &User) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(auth.jwt_expiry_hours)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
}

/// Verify a session token and return its claims
pub fn verify_token(auth: &AuthConfig, token: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| Error::Unauthenticated(format!("Invalid session token: {}", e)))
}

/// Bearer token from the Authorization header, else the session cookie
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = auth.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    cookie_value(headers, TOKEN_COOKIE)
}

/// Read one cookie out of the Cookie header
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;

    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| Error::Unauthenticated("Missing session token".to_string()))?;

    let claims = verify_token(&state.config.auth, &token)?;

    // The token must still name a live user.
    let user = state
        .users
        .get(claims.sub)
        .await
        .map_err(Error::store)?
        .ok_or_else(|| Error::Unauthenticated("Unknown user".to_string()))?;

    request.extensions_mut().insert(AuthUser {
        user_id: user.id,
        email: user.email,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            jwt_expiry_hours: 1,
            google_client_id: String::new(),
            google_client_secret: String::new(),
            google_callback_url: String::new(),
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            google_id: "g-123".to_string(),
            email: "user@example.com".to_string(),
            name: "User".to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_round_trip() {
        let config = auth_config();
        let user = user();

        let token = mint_token(&config, &user).unwrap();
        let claims = verify_token(&config, &token).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, user.email);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = auth_config();
        let token = mint_token(&config, &user()).unwrap();

        let mut other = auth_config();
        other.jwt_secret = "different".to_string();
        assert!(verify_token(&other, &token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verify_token(&auth_config(), "not.a.token").is_err());
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("a=1; mailcade_token=abc.def.ghi; b=2"),
        );

        assert_eq!(
            cookie_value(&headers, TOKEN_COOKIE).as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_bearer_preferred_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer header-token"),
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("mailcade_token=cookie-token"),
        );

        assert_eq!(extract_token(&headers).as_deref(), Some("header-token"));
    }
}
