//! Scheduling coordinator - the batch write path
//!
//! Resolves the sender, lays out send instants, persists the batch and
//! its messages, then bulk-enqueues one delivery job per message. The
//! ordering (batch, then messages, then jobs, then job-id links) keeps
//! every message discoverable before its job can possibly fire. If
//! enqueueing fails after the rows committed, the whole batch is marked
//! FAILED so no orphaned SCHEDULED row remains.

use chrono::{DateTime, Duration, Utc};
use mailcade_common::types::{BatchId, BucketClock, SenderId, UserId};
use mailcade_storage::db::DatabasePool;
use mailcade_storage::models::{CreateBatch, CreateMessage, Message, Sender};
use mailcade_storage::repository::{BatchRepository, MessageRepository, SenderRepository};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::planner;
use crate::queue::{EnqueueOptions, JobQueue, SendJob};

/// Scheduling errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Sender does not exist, is not yours, or is inactive")]
    InvalidSender,

    #[error("No active sender configured")]
    NoSender,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to enqueue delivery jobs: {0}")]
    Queue(String),
}

impl From<ScheduleError> for mailcade_common::Error {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::InvalidSender => {
                mailcade_common::Error::Validation(err.to_string())
            }
            ScheduleError::NoSender => mailcade_common::Error::Conflict(err.to_string()),
            ScheduleError::Database(e) => mailcade_common::Error::store(e),
            ScheduleError::Queue(e) => mailcade_common::Error::QueueUnavailable(e),
        }
    }
}

/// One schedule request, already validated at the HTTP edge
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub delay_seconds: u32,
    pub hourly_limit: u32,
    pub sender_id: Option<SenderId>,
}

/// Result of a committed schedule request
#[derive(Debug, Clone)]
pub struct ScheduledBatch {
    pub batch_id: BatchId,
    pub total_emails: usize,
    pub messages: Vec<Message>,
}

/// Scheduling coordinator
pub struct ScheduleCoordinator {
    senders: SenderRepository,
    messages: MessageRepository,
    batches: BatchRepository,
    queue: Arc<JobQueue>,
    clock: Arc<dyn Clock>,
    bucket_clock: BucketClock,
    max_retries: i32,
}

impl ScheduleCoordinator {
    pub fn new(
        db_pool: &DatabasePool,
        queue: Arc<JobQueue>,
        clock: Arc<dyn Clock>,
        bucket_clock: BucketClock,
        max_retries: i32,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            senders: SenderRepository::new(pool.clone()),
            messages: MessageRepository::new(pool.clone()),
            batches: BatchRepository::new(pool),
            queue,
            clock,
            bucket_clock,
            max_retries,
        }
    }

    /// Schedule a batch of messages for a user
    pub async fn schedule_batch(
        &self,
        user_id: UserId,
        request: ScheduleRequest,
    ) -> Result<ScheduledBatch, ScheduleError> {
        let sender = self.resolve_sender(user_id, request.sender_id).await?;

        let instants = planner::plan(
            request.recipients.len(),
            request.start_time,
            request.delay_seconds,
            request.hourly_limit,
            self.bucket_clock,
        );

        let batch = self
            .batches
            .create(CreateBatch {
                user_id,
                total_emails: request.recipients.len() as i32,
                start_time: request.start_time,
                delay_seconds: request.delay_seconds as i32,
                hourly_limit: request.hourly_limit as i32,
            })
            .await?;

        let inputs = request
            .recipients
            .iter()
            .zip(instants.iter())
            .enumerate()
            .map(|(index, (recipient, scheduled_at))| CreateMessage {
                user_id,
                sender_id: sender.id,
                recipient: recipient.clone(),
                subject: request.subject.clone(),
                body: request.body.clone(),
                scheduled_at: *scheduled_at,
                max_retries: self.max_retries,
                batch_id: batch.id,
                batch_index: index as i32,
            })
            .collect();

        let messages = self.messages.create_batch(inputs).await?;

        let now = self.clock.now();
        let jobs: Vec<(SendJob, EnqueueOptions)> = messages
            .iter()
            .map(|message| {
                (
                    SendJob {
                        message_id: message.id,
                        recipient: message.recipient.clone(),
                        subject: message.subject.clone(),
                        body: message.body.clone(),
                        sender_id: message.sender_id,
                        user_id,
                        batch_id: batch.id,
                        attempt: 1,
                    },
                    EnqueueOptions {
                        delay: (message.scheduled_at - now).max(Duration::zero()),
                        priority: message.batch_index,
                    },
                )
            })
            .collect();

        let job_ids = match self.queue.enqueue_bulk(&jobs).await {
            Ok(job_ids) => job_ids,
            Err(e) => {
                // Recovery: no SCHEDULED row may survive without a job.
                let failed = self
                    .messages
                    .mark_batch_failed(batch.id, &format!("Failed to enqueue delivery jobs: {}", e))
                    .await?;
                self.batches.add_failed(batch.id, failed as i32).await?;

                warn!(
                    batch_id = %batch.id,
                    failed,
                    "Enqueue failed after commit; batch marked failed"
                );
                return Err(ScheduleError::Queue(e.to_string()));
            }
        };

        // Linking job ids is observability only; a miss is logged, not fatal.
        for (message, job_id) in messages.iter().zip(job_ids.iter()) {
            if let Some(job_id) = job_id {
                if let Err(e) = self.messages.set_job_id(message.id, job_id).await {
                    warn!(message_id = %message.id, "Failed to link job id: {}", e);
                }
            }
        }

        info!(
            batch_id = %batch.id,
            total = messages.len(),
            start = %request.start_time,
            "Batch scheduled"
        );

        Ok(ScheduledBatch {
            batch_id: batch.id,
            total_emails: messages.len(),
            messages,
        })
    }

    /// Resolve which sender a batch goes out through: the requested one
    /// (must belong to the user and be active), else the user's default
    /// active sender, else any active sender.
    async fn resolve_sender(
        &self,
        user_id: UserId,
        sender_id: Option<SenderId>,
    ) -> Result<Sender, ScheduleError> {
        match sender_id {
            Some(id) => self
                .senders
                .get_by_user(user_id, id)
                .await?
                .filter(|s| s.is_active)
                .ok_or(ScheduleError::InvalidSender),
            None => {
                if let Some(sender) = self.senders.find_default_active(user_id).await? {
                    return Ok(sender);
                }
                self.senders
                    .find_any_active(user_id)
                    .await?
                    .ok_or(ScheduleError::NoSender)
            }
        }
    }
}
