//! Sender CRUD handlers

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use mailcade_common::types::SenderId;
use mailcade_common::Error;
use mailcade_storage::models::{CreateSender, Sender, UpdateSender};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{AppState, AuthUser};
use crate::response::{map_sqlx, ApiResponse, ApiResult};

fn is_valid_email(email: &str) -> bool {
    match email.rfind('@') {
        Some(at) => {
            let domain = &email[at + 1..];
            !email[..at].is_empty() && !domain.is_empty() && domain.contains('.')
        }
        None => false,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSenderRequest {
    pub email: String,
    pub name: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSenderRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub smtp_host: Option<Option<String>>,
    pub smtp_port: Option<Option<i32>>,
    pub smtp_user: Option<Option<String>>,
    pub smtp_password: Option<Option<String>>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

/// GET /senders
pub async fn list_senders(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<Vec<Sender>>>> {
    let senders = state
        .senders
        .list_by_user(auth.user_id)
        .await
        .map_err(map_sqlx)?;

    Ok(Json(ApiResponse::ok(senders)))
}

/// POST /senders
pub async fn create_sender(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<CreateSenderRequest>,
) -> ApiResult<Json<ApiResponse<Sender>>> {
    if !is_valid_email(&input.email) {
        return Err(Error::Validation("Invalid sender email address".to_string()).into());
    }
    if input.name.trim().is_empty() {
        return Err(Error::Validation("Sender name is required".to_string()).into());
    }

    let sender = state
        .senders
        .create(CreateSender {
            user_id: auth.user_id,
            email: input.email.to_lowercase(),
            name: input.name,
            smtp_host: input.smtp_host,
            smtp_port: input.smtp_port,
            smtp_user: input.smtp_user,
            smtp_password: input.smtp_password,
            is_default: input.is_default,
        })
        .await
        .map_err(map_sqlx)?;

    Ok(Json(ApiResponse::ok(sender)))
}

/// GET /senders/:id
pub async fn get_sender(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<SenderId>,
) -> ApiResult<Json<ApiResponse<Sender>>> {
    let sender = state
        .senders
        .get_by_user(auth.user_id, id)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| Error::NotFound("Sender not found".to_string()))?;

    Ok(Json(ApiResponse::ok(sender)))
}

/// PUT /senders/:id
pub async fn update_sender(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<SenderId>,
    Json(input): Json<UpdateSenderRequest>,
) -> ApiResult<Json<ApiResponse<Sender>>> {
    if let Some(email) = &input.email {
        if !is_valid_email(email) {
            return Err(Error::Validation("Invalid sender email address".to_string()).into());
        }
    }

    let sender = state
        .senders
        .update(
            auth.user_id,
            id,
            UpdateSender {
                email: input.email.map(|e| e.to_lowercase()),
                name: input.name,
                smtp_host: input.smtp_host,
                smtp_port: input.smtp_port,
                smtp_user: input.smtp_user,
                smtp_password: input.smtp_password,
                is_default: input.is_default,
                is_active: input.is_active,
            },
        )
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| Error::NotFound("Sender not found".to_string()))?;

    Ok(Json(ApiResponse::ok(sender)))
}

/// DELETE /senders/:id
pub async fn delete_sender(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<SenderId>,
) -> ApiResult<Json<ApiResponse<()>>> {
    // A user keeps at least one sender while messages may reference it.
    let count = state
        .senders
        .count_by_user(auth.user_id)
        .await
        .map_err(map_sqlx)?;

    if count <= 1 {
        return Err(Error::Conflict("Cannot delete the last sender".to_string()).into());
    }

    let deleted = state
        .senders
        .delete(auth.user_id, id)
        .await
        .map_err(map_sqlx)?;

    if !deleted {
        return Err(Error::NotFound("Sender not found".to_string()).into());
    }

    Ok(Json(ApiResponse::message("Sender deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("a.b+c@sub.example.org"));
        assert!(!is_valid_email("invalid"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@nodot"));
    }
}
