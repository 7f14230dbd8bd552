//! Message repository
//!
//! Every status update carries a `WHERE status = ...` guard so that only
//! the transitions of the send state machine can occur, even when several
//! workers race on redelivered jobs.

use chrono::{DateTime, Utc};
use mailcade_common::types::{BatchId, MessageId, MessageStatus, SenderId, UserId};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::models::{CreateMessage, Message, MessageStatusCounts};

/// Sort direction for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Listing filter for the per-user message endpoints
#[derive(Debug, Clone)]
pub struct ListFilter {
    /// Status scope of the listing (non-terminal vs terminal endpoints)
    pub scope: Vec<MessageStatus>,
    /// Optional further narrowing within the scope
    pub status: Option<MessageStatus>,
    pub page: i64,
    pub limit: i64,
    pub sort_by: String,
    pub order: SortOrder,
}

impl ListFilter {
    /// Whitelisted sort column; unknown input falls back to scheduled_at.
    fn sort_column(&self) -> &'static str {
        match self.sort_by.as_str() {
            "createdAt" | "created_at" => "created_at",
            "sentAt" | "sent_at" => "sent_at",
            "status" => "status",
            _ => "scheduled_at",
        }
    }

    fn effective_statuses(&self) -> Vec<&'static str> {
        match self.status {
            Some(s) if self.scope.contains(&s) => vec![s.as_str()],
            Some(_) => vec![],
            None => self.scope.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Message repository
#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create all messages of one batch in a single transaction so none
    /// of them becomes visible before the batch row exists.
    pub async fn create_batch(
        &self,
        inputs: Vec<CreateMessage>,
    ) -> Result<Vec<Message>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(inputs.len());

        for input in inputs {
            let message = sqlx::query_as::<_, Message>(
                r#"
                INSERT INTO messages (
                    id, user_id, sender_id, recipient, subject, body,
                    scheduled_at, status, retry_count, max_retries,
                    batch_id, batch_index
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'SCHEDULED', 0, $8, $9, $10)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(input.user_id)
            .bind(input.sender_id)
            .bind(&input.recipient)
            .bind(&input.subject)
            .bind(&input.body)
            .bind(input.scheduled_at)
            .bind(input.max_retries)
            .bind(input.batch_id)
            .bind(input.batch_index)
            .fetch_one(&mut *tx)
            .await?;

            created.push(message);
        }

        tx.commit().await?;
        Ok(created)
    }

    /// Get a message by id (worker path, no owner scope)
    pub async fn get(&self, id: MessageId) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a message scoped to its owner
    pub async fn get_by_user(
        &self,
        user_id: UserId,
        id: MessageId,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Paginated listing plus total count for the filter
    pub async fn list(
        &self,
        user_id: UserId,
        filter: &ListFilter,
    ) -> Result<(Vec<Message>, i64), sqlx::Error> {
        let statuses = filter.effective_statuses();
        if statuses.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let limit = filter.limit.clamp(1, 100);
        let offset = (filter.page.max(1) - 1) * limit;

        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM messages WHERE user_id = ");
        query.push_bind(user_id);
        query.push(" AND status = ANY(");
        query.push_bind(statuses.clone());
        query.push(")");
        query.push(format!(
            " ORDER BY {} {} NULLS LAST LIMIT ",
            filter.sort_column(),
            filter.order.as_sql()
        ));
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let messages = query.build_query_as::<Message>().fetch_all(&self.pool).await?;

        let total: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE user_id = $1 AND status = ANY($2)",
        )
        .bind(user_id)
        .bind(&statuses)
        .fetch_one(&self.pool)
        .await?;

        Ok((messages, total.0))
    }

    /// Per-status counts for the stats endpoint
    pub async fn status_counts(&self, user_id: UserId) -> Result<MessageStatusCounts, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'SCHEDULED') as scheduled,
                COUNT(*) FILTER (WHERE status = 'PROCESSING') as processing,
                COUNT(*) FILTER (WHERE status = 'SENT') as sent,
                COUNT(*) FILTER (WHERE status = 'FAILED') as failed,
                COUNT(*) FILTER (WHERE status = 'RATE_LIMITED') as rate_limited,
                COUNT(*) as total
            FROM messages
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageStatusCounts {
            scheduled: row.get::<Option<i64>, _>("scheduled").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            sent: row.get::<Option<i64>, _>("sent").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            rate_limited: row.get::<Option<i64>, _>("rate_limited").unwrap_or(0),
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
        })
    }

    /// Claim a message for delivery. Accepts SCHEDULED and RATE_LIMITED
    /// (the requeue collapses into the claim) as well as PROCESSING left
    /// behind by a crashed worker whose lease expired.
    pub async fn mark_processing(
        &self,
        id: MessageId,
        job_id: &str,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                status = 'PROCESSING',
                job_id = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('SCHEDULED', 'RATE_LIMITED', 'PROCESSING')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Terminal success
    pub async fn mark_sent(
        &self,
        id: MessageId,
        sent_at: DateTime<Utc>,
        provider_message_id: &str,
        preview_url: Option<&str>,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                status = 'SENT',
                sent_at = $2,
                provider_message_id = $3,
                preview_url = $4,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(sent_at)
        .bind(provider_message_id)
        .bind(preview_url)
        .fetch_optional(&self.pool)
        .await
    }

    /// Terminal failure after the retry budget is exhausted
    pub async fn mark_failed(
        &self,
        id: MessageId,
        error: &str,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                status = 'FAILED',
                error_message = $2,
                retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
    }

    /// Transient failure: back to SCHEDULED, the queue redelivers with
    /// backoff.
    pub async fn mark_retry_scheduled(
        &self,
        id: MessageId,
        error: &str,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                status = 'SCHEDULED',
                error_message = $2,
                retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
    }

    /// Quota deferral: parked until the next rate-limit slot. Does not
    /// consume a retry.
    pub async fn mark_rate_limited(
        &self,
        id: MessageId,
        next_slot_at: DateTime<Utc>,
    ) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages SET
                status = 'RATE_LIMITED',
                scheduled_at = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next_slot_at)
        .fetch_optional(&self.pool)
        .await
    }

    /// Coordinator recovery: when enqueueing fails after the rows were
    /// committed, no SCHEDULED row may be left behind without a job.
    pub async fn mark_batch_failed(
        &self,
        batch_id: BatchId,
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET
                status = 'FAILED',
                error_message = $2,
                updated_at = NOW()
            WHERE batch_id = $1 AND status = 'SCHEDULED'
            "#,
        )
        .bind(batch_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Best-effort link of the queue job id back onto the message
    pub async fn set_job_id(&self, id: MessageId, job_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE messages SET job_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// SENT messages inside one hour window, optionally sender-scoped.
    /// This is the rate limiter's durable fallback.
    pub async fn count_sent_in_window(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        sender_id: Option<SenderId>,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = if let Some(sender_id) = sender_id {
            sqlx::query_as(
                r#"
                SELECT COUNT(*) FROM messages
                WHERE status = 'SENT' AND sent_at >= $1 AND sent_at < $2 AND sender_id = $3
                "#,
            )
            .bind(window_start)
            .bind(window_end)
            .bind(sender_id)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT COUNT(*) FROM messages
                WHERE status = 'SENT' AND sent_at >= $1 AND sent_at < $2
                "#,
            )
            .bind(window_start)
            .bind(window_end)
            .fetch_one(&self.pool)
            .await?
        };
        Ok(count.0)
    }

    /// Cancellation is a hard delete, honoured only while no worker holds
    /// the message. The scheduled queue job becomes a no-op.
    pub async fn delete_cancellable(
        &self,
        user_id: UserId,
        id: MessageId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE id = $1 AND user_id = $2 AND status IN ('SCHEDULED', 'RATE_LIMITED')",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(scope: Vec<MessageStatus>, status: Option<MessageStatus>) -> ListFilter {
        ListFilter {
            scope,
            status,
            page: 1,
            limit: 20,
            sort_by: "scheduledAt".to_string(),
            order: SortOrder::Asc,
        }
    }

    #[test]
    fn test_sort_column_whitelist() {
        let mut f = filter(vec![MessageStatus::Sent], None);
        assert_eq!(f.sort_column(), "scheduled_at");
        f.sort_by = "createdAt".into();
        assert_eq!(f.sort_column(), "created_at");
        f.sort_by = "sentAt".into();
        assert_eq!(f.sort_column(), "sent_at");
        // injection attempts fall back to the default column
        f.sort_by = "created_at; DROP TABLE messages".into();
        assert_eq!(f.sort_column(), "scheduled_at");
    }

    #[test]
    fn test_effective_statuses_respects_scope() {
        let scope = vec![
            MessageStatus::Scheduled,
            MessageStatus::Processing,
            MessageStatus::RateLimited,
        ];

        let f = filter(scope.clone(), None);
        assert_eq!(f.effective_statuses().len(), 3);

        let f = filter(scope.clone(), Some(MessageStatus::Scheduled));
        assert_eq!(f.effective_statuses(), vec!["SCHEDULED"]);

        // a terminal status requested on the non-terminal endpoint
        // matches nothing rather than widening the scope
        let f = filter(scope, Some(MessageStatus::Sent));
        assert!(f.effective_statuses().is_empty());
    }
}
