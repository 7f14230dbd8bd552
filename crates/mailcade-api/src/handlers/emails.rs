//! Email scheduling and status handlers

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use mailcade_common::types::{MessageId, MessageStatus, Pagination, SenderId};
use mailcade_common::Error;
use mailcade_core::ScheduleRequest;
use mailcade_storage::models::{Message, MessageStatusCounts};
use mailcade_storage::repository::{ListFilter, SortOrder};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::auth::{AppState, AuthUser};
use crate::response::{map_sqlx, ApiResponse, ApiResult};

/// Bounds enforced at the HTTP edge; the core receives valid inputs.
const MAX_RECIPIENTS: usize = 1000;
const MAX_DELAY_SECONDS: u32 = 3600;
const MAX_HOURLY_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEmailsRequest {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub delay_between_emails: u32,
    pub hourly_limit: u32,
    pub sender_id: Option<SenderId>,
}

/// Wire shape of one message
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub recipient: String,
    pub subject: String,
    pub status: String,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub provider_message_id: Option<String>,
    pub preview_url: Option<String>,
    pub batch_id: uuid::Uuid,
    pub batch_index: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            recipient: m.recipient,
            subject: m.subject,
            status: m.status,
            scheduled_at: m.scheduled_at,
            sent_at: m.sent_at,
            error_message: m.error_message,
            retry_count: m.retry_count,
            max_retries: m.max_retries,
            provider_message_id: m.provider_message_id,
            preview_url: m.preview_url,
            batch_id: m.batch_id,
            batch_index: m.batch_index,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEmailsResponse {
    pub batch_id: uuid::Uuid,
    pub total_emails: usize,
    pub scheduled_emails: Vec<MessageView>,
}

fn is_valid_email(email: &str) -> bool {
    match email.rfind('@') {
        Some(at) => {
            let domain = &email[at + 1..];
            !email[..at].is_empty() && !domain.is_empty() && domain.contains('.')
        }
        None => false,
    }
}

fn validate_schedule(input: &ScheduleEmailsRequest) -> Result<(), Error> {
    if input.subject.trim().is_empty() {
        return Err(Error::Validation("Subject is required".to_string()));
    }
    if input.body.trim().is_empty() {
        return Err(Error::Validation("Body is required".to_string()));
    }
    if input.recipients.is_empty() {
        return Err(Error::Validation(
            "At least one recipient is required".to_string(),
        ));
    }
    if input.recipients.len() > MAX_RECIPIENTS {
        return Err(Error::Validation(format!(
            "Too many recipients: {} (max {})",
            input.recipients.len(),
            MAX_RECIPIENTS
        )));
    }
    for recipient in &input.recipients {
        if !is_valid_email(recipient) {
            return Err(Error::Validation(format!(
                "Invalid recipient email address: {}",
                recipient
            )));
        }
    }
    if input.delay_between_emails > MAX_DELAY_SECONDS {
        return Err(Error::Validation(format!(
            "delayBetweenEmails must be between 0 and {}",
            MAX_DELAY_SECONDS
        )));
    }
    if input.hourly_limit < 1 || input.hourly_limit > MAX_HOURLY_LIMIT {
        return Err(Error::Validation(format!(
            "hourlyLimit must be between 1 and {}",
            MAX_HOURLY_LIMIT
        )));
    }
    Ok(())
}

/// POST /emails/schedule
pub async fn schedule_emails(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<ScheduleEmailsRequest>,
) -> ApiResult<Json<ApiResponse<ScheduleEmailsResponse>>> {
    validate_schedule(&input)?;

    let batch = state
        .coordinator
        .schedule_batch(
            auth.user_id,
            ScheduleRequest {
                subject: input.subject,
                body: input.body,
                recipients: input.recipients,
                start_time: input.start_time,
                delay_seconds: input.delay_between_emails,
                hourly_limit: input.hourly_limit,
                sender_id: input.sender_id,
            },
        )
        .await
        .map_err(Error::from)?;

    Ok(Json(ApiResponse::ok(ScheduleEmailsResponse {
        batch_id: batch.batch_id,
        total_emails: batch.total_emails,
        scheduled_emails: batch.messages.into_iter().map(MessageView::from).collect(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_sort_order")]
    pub sort_order: String,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

fn default_sort_by() -> String {
    "scheduledAt".to_string()
}

fn default_sort_order() -> String {
    "asc".to_string()
}

impl ListQuery {
    fn into_filter(self, scope: Vec<MessageStatus>) -> Result<ListFilter, Error> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(MessageStatus::from_str(raw)?),
            None => None,
        };

        let order = match self.sort_order.to_ascii_lowercase().as_str() {
            "desc" => SortOrder::Desc,
            _ => SortOrder::Asc,
        };

        Ok(ListFilter {
            scope,
            status,
            page: self.page.max(1),
            limit: self.limit.clamp(1, 100),
            sort_by: self.sort_by,
            order,
        })
    }
}

async fn list_messages(
    state: &AppState,
    auth: &AuthUser,
    query: ListQuery,
    scope: Vec<MessageStatus>,
) -> ApiResult<Json<ApiResponse<Vec<MessageView>>>> {
    let filter = query.into_filter(scope)?;
    let (page, limit) = (filter.page, filter.limit);

    let (messages, total) = state
        .messages
        .list(auth.user_id, &filter)
        .await
        .map_err(map_sqlx)?;

    Ok(Json(ApiResponse::ok_paginated(
        messages.into_iter().map(MessageView::from).collect(),
        Pagination::new(page, limit, total),
    )))
}

/// GET /emails/scheduled - non-terminal messages
pub async fn list_scheduled(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Vec<MessageView>>>> {
    list_messages(
        &state,
        &auth,
        query,
        vec![
            MessageStatus::Scheduled,
            MessageStatus::Processing,
            MessageStatus::RateLimited,
        ],
    )
    .await
}

/// GET /emails/sent - terminal messages
pub async fn list_sent(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ApiResponse<Vec<MessageView>>>> {
    list_messages(
        &state,
        &auth,
        query,
        vec![MessageStatus::Sent, MessageStatus::Failed],
    )
    .await
}

/// GET /emails/stats
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<ApiResponse<MessageStatusCounts>>> {
    let counts = state
        .messages
        .status_counts(auth.user_id)
        .await
        .map_err(map_sqlx)?;

    Ok(Json(ApiResponse::ok(counts)))
}

/// GET /emails/:id
pub async fn get_email(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<MessageId>,
) -> ApiResult<Json<ApiResponse<MessageView>>> {
    let message = state
        .messages
        .get_by_user(auth.user_id, id)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| Error::NotFound("Message not found".to_string()))?;

    Ok(Json(ApiResponse::ok(message.into())))
}

/// DELETE /emails/:id - cancel a pending message
pub async fn cancel_email(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<MessageId>,
) -> ApiResult<Json<ApiResponse<()>>> {
    let message = state
        .messages
        .get_by_user(auth.user_id, id)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| Error::NotFound("Message not found".to_string()))?;

    let cancelled = state
        .messages
        .delete_cancellable(auth.user_id, id)
        .await
        .map_err(map_sqlx)?;

    if !cancelled {
        // The row exists but is past the point of cancellation.
        let reason = match MessageStatus::from_str(&message.status) {
            Ok(MessageStatus::Processing) => "Message is currently being sent",
            _ => "Message has already completed",
        };
        return Err(Error::Conflict(reason.to_string()).into());
    }

    Ok(Json(ApiResponse::message("Message cancelled")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ScheduleEmailsRequest {
        ScheduleEmailsRequest {
            subject: "Subject".to_string(),
            body: "<p>Body</p>".to_string(),
            recipients: vec!["a@x.com".to_string(), "b@x.com".to_string()],
            start_time: "2025-01-01T10:00:00Z".parse().unwrap(),
            delay_between_emails: 30,
            hourly_limit: 100,
            sender_id: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_schedule(&request()).is_ok());
    }

    #[test]
    fn test_empty_recipients_rejected() {
        let mut r = request();
        r.recipients.clear();
        assert!(validate_schedule(&r).is_err());
    }

    #[test]
    fn test_bad_recipient_rejected() {
        let mut r = request();
        r.recipients.push("nope".to_string());
        assert!(validate_schedule(&r).is_err());
    }

    #[test]
    fn test_delay_bounds() {
        let mut r = request();
        r.delay_between_emails = 3600;
        assert!(validate_schedule(&r).is_ok());
        r.delay_between_emails = 3601;
        assert!(validate_schedule(&r).is_err());
    }

    #[test]
    fn test_hourly_limit_bounds() {
        let mut r = request();
        r.hourly_limit = 0;
        assert!(validate_schedule(&r).is_err());
        r.hourly_limit = 1;
        assert!(validate_schedule(&r).is_ok());
        r.hourly_limit = 1000;
        assert!(validate_schedule(&r).is_ok());
        r.hourly_limit = 1001;
        assert!(validate_schedule(&r).is_err());
    }

    #[test]
    fn test_list_query_filter_mapping() {
        let query = ListQuery {
            status: Some("SCHEDULED".to_string()),
            page: 0,
            limit: 500,
            sort_by: "createdAt".to_string(),
            sort_order: "DESC".to_string(),
        };

        let filter = query
            .into_filter(vec![MessageStatus::Scheduled, MessageStatus::Processing])
            .unwrap();

        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.status, Some(MessageStatus::Scheduled));
        assert_eq!(filter.order, SortOrder::Desc);
    }

    #[test]
    fn test_list_query_unknown_status_rejected() {
        let query = ListQuery {
            status: Some("BOUNCED".to_string()),
            page: 1,
            limit: 20,
            sort_by: default_sort_by(),
            sort_order: default_sort_order(),
        };

        assert!(query.into_filter(vec![MessageStatus::Scheduled]).is_err());
    }
}
