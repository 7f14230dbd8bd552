//! Database models

use chrono::{DateTime, Utc};
use mailcade_common::types::{BatchId, MessageId, SenderId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sender model - a user-owned outbound identity, optionally carrying
/// its own transport configuration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Sender {
    pub id: SenderId,
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_user: Option<String>,
    #[serde(skip_serializing)]
    pub smtp_password: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Message model - one prospective delivery to one recipient
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub user_id: UserId,
    pub sender_id: Option<SenderId>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub job_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub preview_url: Option<String>,
    pub batch_id: BatchId,
    pub batch_index: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Batch model - one schedule request's worth of messages
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub user_id: UserId,
    pub total_emails: i32,
    pub scheduled_emails: i32,
    pub sent_emails: i32,
    pub failed_emails: i32,
    pub start_time: DateTime<Utc>,
    pub delay_seconds: i32,
    pub hourly_limit: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable rate counter for one (scope, hour window) pair
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RateCounter {
    pub key: String,
    pub count: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Persisted queue job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: uuid::Uuid,
    pub job_id: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: String,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff_initial_ms: i64,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Create sender input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSender {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub is_default: bool,
}

/// Update sender input; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSender {
    pub email: Option<String>,
    pub name: Option<String>,
    pub smtp_host: Option<Option<String>>,
    pub smtp_port: Option<Option<i32>>,
    pub smtp_user: Option<Option<String>>,
    pub smtp_password: Option<Option<String>>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

/// Create message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessage {
    pub user_id: UserId,
    pub sender_id: SenderId,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub scheduled_at: DateTime<Utc>,
    pub max_retries: i32,
    pub batch_id: BatchId,
    pub batch_index: i32,
}

/// Create batch input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatch {
    pub user_id: UserId,
    pub total_emails: i32,
    pub start_time: DateTime<Utc>,
    pub delay_seconds: i32,
    pub hourly_limit: i32,
}

/// Resolved external identity used to create or refresh a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertUser {
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// Per-status message counts for one user
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusCounts {
    pub scheduled: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
    pub rate_limited: i64,
    pub total: i64,
}
