//! Identity provider - pluggable OAuth capability
//!
//! The core only consumes the resolved identity; the Google provider is
//! one implementation of the seam.

use async_trait::async_trait;
use mailcade_common::config::AuthConfig;
use mailcade_common::{Error, Result};
use reqwest::Url;
use serde::Deserialize;

/// External identity resolved by a provider
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub external_id: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
}

/// OAuth identity capability
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL to redirect the user agent to for consent
    fn authorize_url(&self, state: &str) -> Result<String>;

    /// Exchange the callback code for a resolved identity
    async fn resolve(&self, code: &str) -> Result<ResolvedIdentity>;
}

const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Google OAuth provider
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    callback_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    id: String,
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl GoogleProvider {
    pub fn new(auth: &AuthConfig) -> Self {
        Self {
            client_id: auth.google_client_id.clone(),
            client_secret: auth.google_client_secret.clone(),
            callback_url: auth.google_callback_url.clone(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            GOOGLE_AUTH_ENDPOINT,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )
        .map_err(|e| Error::Internal(format!("Failed to build authorize URL: {}", e)))?;

        Ok(url.to_string())
    }

    async fn resolve(&self, code: &str) -> Result<ResolvedIdentity> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.callback_url.as_str()),
        ];

        let response = self
            .http
            .post(GOOGLE_TOKEN_ENDPOINT)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Unauthenticated(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Unauthenticated(format!(
                "Token exchange rejected with status {}",
                response.status()
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Unauthenticated(format!("Malformed token response: {}", e)))?;

        let info: UserInfoResponse = self
            .http
            .get(GOOGLE_USERINFO_ENDPOINT)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| Error::Unauthenticated(format!("Userinfo request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::Unauthenticated(format!("Malformed userinfo response: {}", e)))?;

        Ok(ResolvedIdentity {
            external_id: info.id,
            name: info.name.unwrap_or_else(|| info.email.clone()),
            email: info.email,
            avatar: info.picture,
        })
    }
}
