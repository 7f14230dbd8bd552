//! Queue manager - durable delayed delivery jobs
//!
//! Jobs live in the `send_jobs` table. Delivery to workers is lease
//! based: a fetched job is marked active with a `locked_until` horizon,
//! and a job whose lease expired is redelivered by the same query that
//! serves fresh ones. Job identity is deterministic per
//! `(message, attempt)`, so re-enqueueing the same attempt is a no-op.

use chrono::{DateTime, Duration, Utc};
use mailcade_common::types::{BatchId, MessageId, SenderId, UserId};
use mailcade_common::{Error, Result};
use mailcade_storage::db::DatabasePool;
use mailcade_storage::models::QueuedJob;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;

/// Job payload: one attempt to send one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendJob {
    pub message_id: MessageId,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sender_id: Option<SenderId>,
    pub user_id: UserId,
    pub batch_id: BatchId,
    /// 1-based attempt number; bumped only by quota deferral
    pub attempt: i32,
}

impl SendJob {
    /// Deterministic queue identity. A duplicate enqueue of the same
    /// `(message, attempt)` pair is rejected by the unique index.
    pub fn queue_id(&self) -> String {
        format!("email-{}-attempt-{}", self.message_id, self.attempt)
    }
}

/// Retry policy shared by all jobs of the queue
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub initial_delay_ms: u64,
}

impl RetryPolicy {
    /// Exponential backoff before the given retry (1-based), capped at
    /// four hours.
    pub fn backoff(&self, retry: i32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20) as u32;
        let millis = (self.initial_delay_ms as i64).saturating_mul(1i64 << exponent);
        Duration::milliseconds(millis.min(Duration::hours(4).num_milliseconds()))
    }
}

/// Per-job enqueue options
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Visibility delay from now; clamped at zero
    pub delay: Duration,
    /// Smaller runs first among jobs due at the same instant
    pub priority: i32,
}

/// A job currently leased to this worker
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: Uuid,
    pub job_id: String,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub payload: SendJob,
}

/// Queue depth counters
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: i64,
    pub active: i64,
    pub completed: i64,
    pub dead: i64,
}

/// How long completed and dead jobs are retained
const COMPLETED_RETENTION_HOURS: i64 = 24;
const COMPLETED_RETENTION_COUNT: i64 = 1000;
const DEAD_RETENTION_DAYS: i64 = 7;

/// Persistent delayed queue over PostgreSQL
pub struct JobQueue {
    db_pool: DatabasePool,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl JobQueue {
    pub fn new(db_pool: DatabasePool, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            db_pool,
            policy,
            clock,
        }
    }

    /// Enqueue one job. Returns its queue id, or `None` when an
    /// identical `(message, attempt)` job already exists.
    pub async fn enqueue(&self, job: &SendJob, opts: &EnqueueOptions) -> Result<Option<String>> {
        let job_id = job.queue_id();
        let run_at = self.clock.now() + opts.delay.max(Duration::zero());

        let payload = serde_json::to_value(job)
            .map_err(|e| Error::QueueUnavailable(format!("Failed to encode job: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO send_jobs (
                id, job_id, payload, priority, status,
                attempts_made, max_attempts, backoff_initial_ms, run_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&job_id)
        .bind(&payload)
        .bind(opts.priority)
        .bind(self.policy.max_attempts)
        .bind(self.policy.initial_delay_ms as i64)
        .bind(run_at)
        .execute(self.db_pool.pool())
        .await
        .map_err(Error::queue)?;

        if result.rows_affected() == 0 {
            debug!(%job_id, "Duplicate enqueue rejected");
            return Ok(None);
        }

        Ok(Some(job_id))
    }

    /// Enqueue a whole batch inside one transaction. The returned vector
    /// is positionally aligned with the input; `None` marks a duplicate.
    pub async fn enqueue_bulk(
        &self,
        jobs: &[(SendJob, EnqueueOptions)],
    ) -> Result<Vec<Option<String>>> {
        let now = self.clock.now();
        let mut tx = self
            .db_pool
            .pool()
            .begin()
            .await
            .map_err(Error::queue)?;

        let mut job_ids = Vec::with_capacity(jobs.len());

        for (job, opts) in jobs {
            let job_id = job.queue_id();
            let run_at = now + opts.delay.max(Duration::zero());
            let payload = serde_json::to_value(job)
                .map_err(|e| Error::QueueUnavailable(format!("Failed to encode job: {}", e)))?;

            let result = sqlx::query(
                r#"
                INSERT INTO send_jobs (
                    id, job_id, payload, priority, status,
                    attempts_made, max_attempts, backoff_initial_ms, run_at
                )
                VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7)
                ON CONFLICT (job_id) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(&job_id)
            .bind(&payload)
            .bind(opts.priority)
            .bind(self.policy.max_attempts)
            .bind(self.policy.initial_delay_ms as i64)
            .bind(run_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::queue)?;

            job_ids.push((result.rows_affected() > 0).then_some(job_id));
        }

        tx.commit().await.map_err(Error::queue)?;

        info!(count = job_ids.len(), "Bulk enqueue committed");
        Ok(job_ids)
    }

    /// Lease up to `limit` due jobs. Jobs whose previous lease expired
    /// (stalled workers) are served by the same query. Due jobs are
    /// ordered by visibility instant, then priority, then insertion.
    pub async fn fetch_due(&self, limit: i64, lease: Duration) -> Result<Vec<LeasedJob>> {
        let now = self.clock.now();
        let locked_until = now + lease;

        let rows: Vec<QueuedJob> = sqlx::query_as(
            r#"
            UPDATE send_jobs SET
                status = 'active',
                locked_until = $1
            WHERE id IN (
                SELECT id FROM send_jobs
                WHERE (status = 'pending' AND run_at <= $2)
                   OR (status = 'active' AND locked_until < $2)
                ORDER BY run_at ASC, priority ASC, created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(locked_until)
        .bind(now)
        .bind(limit)
        .fetch_all(self.db_pool.pool())
        .await
        .map_err(Error::queue)?;

        let mut leased = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<SendJob>(row.payload.clone()) {
                Ok(payload) => leased.push(LeasedJob {
                    id: row.id,
                    job_id: row.job_id,
                    attempts_made: row.attempts_made,
                    max_attempts: row.max_attempts,
                    payload,
                }),
                Err(e) => {
                    // Undecodable payloads can never succeed; bury them.
                    warn!(job_id = %row.job_id, "Dropping undecodable job payload: {}", e);
                    self.mark_dead(row.id, &format!("Undecodable payload: {}", e))
                        .await?;
                }
            }
        }

        Ok(leased)
    }

    /// Acknowledge a job as done. Covers both successful sends and
    /// deferrals that re-enqueued under a new attempt id.
    pub async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE send_jobs SET
                status = 'completed',
                locked_until = NULL,
                completed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(self.clock.now())
        .execute(self.db_pool.pool())
        .await
        .map_err(Error::queue)?;

        Ok(())
    }

    /// Return a failed job to the queue. Schedules a backoff redelivery
    /// while attempts remain; returns `false` once the job is dead.
    pub async fn fail(&self, job: &LeasedJob, error: &str) -> Result<bool> {
        let attempts = job.attempts_made + 1;

        if attempts >= job.max_attempts {
            self.mark_dead_with_attempts(job.id, attempts, error).await?;
            return Ok(false);
        }

        let run_at = self.clock.now() + self.policy.backoff(attempts);

        sqlx::query(
            r#"
            UPDATE send_jobs SET
                status = 'pending',
                attempts_made = $2,
                last_error = $3,
                run_at = $4,
                locked_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(attempts)
        .bind(error)
        .bind(run_at)
        .execute(self.db_pool.pool())
        .await
        .map_err(Error::queue)?;

        debug!(job_id = %job.job_id, attempts, %run_at, "Job scheduled for retry");
        Ok(true)
    }

    /// Bury a job immediately, bypassing remaining retries. Used when the
    /// message reached a terminal state and further delivery attempts
    /// would be wasted work.
    pub async fn discard(&self, id: Uuid, error: &str) -> Result<()> {
        self.mark_dead(id, error).await
    }

    async fn mark_dead(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE send_jobs SET
                status = 'dead',
                last_error = $2,
                locked_until = NULL,
                completed_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(self.clock.now())
        .execute(self.db_pool.pool())
        .await
        .map_err(Error::queue)?;

        Ok(())
    }

    async fn mark_dead_with_attempts(&self, id: Uuid, attempts: i32, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE send_jobs SET
                status = 'dead',
                attempts_made = $2,
                last_error = $3,
                locked_until = NULL,
                completed_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(self.clock.now())
        .execute(self.db_pool.pool())
        .await
        .map_err(Error::queue)?;

        Ok(())
    }

    /// Apply the removal policies: completed jobs kept 24 h up to the
    /// 1000 newest, dead jobs kept 7 d.
    pub async fn cleanup(&self) -> Result<u64> {
        let now = self.clock.now();
        let pool = self.db_pool.pool();
        let mut removed = 0u64;

        let result = sqlx::query(
            "DELETE FROM send_jobs WHERE status = 'completed' AND completed_at < $1",
        )
        .bind(now - Duration::hours(COMPLETED_RETENTION_HOURS))
        .execute(pool)
        .await
        .map_err(Error::queue)?;
        removed += result.rows_affected();

        let result = sqlx::query(
            r#"
            DELETE FROM send_jobs
            WHERE status = 'completed' AND id NOT IN (
                SELECT id FROM send_jobs
                WHERE status = 'completed'
                ORDER BY completed_at DESC
                LIMIT $1
            )
            "#,
        )
        .bind(COMPLETED_RETENTION_COUNT)
        .execute(pool)
        .await
        .map_err(Error::queue)?;
        removed += result.rows_affected();

        let result = sqlx::query(
            "DELETE FROM send_jobs WHERE status = 'dead' AND completed_at < $1",
        )
        .bind(now - Duration::days(DEAD_RETENTION_DAYS))
        .execute(pool)
        .await
        .map_err(Error::queue)?;
        removed += result.rows_affected();

        Ok(removed)
    }

    /// Queue depth counters
    pub async fn stats(&self) -> Result<QueueStats> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'dead')
            FROM send_jobs
            "#,
        )
        .fetch_one(self.db_pool.pool())
        .await
        .map_err(Error::queue)?;

        Ok(QueueStats {
            pending: row.0,
            active: row.1,
            completed: row.2,
            dead: row.3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(attempt: i32) -> SendJob {
        SendJob {
            message_id: "00000000-0000-0000-0000-00000000abcd".parse().unwrap(),
            recipient: "rcpt@example.com".to_string(),
            subject: "Subject".to_string(),
            body: "<p>Body</p>".to_string(),
            sender_id: None,
            user_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            attempt,
        }
    }

    #[test]
    fn test_queue_id_is_deterministic() {
        let a = job(1);
        let b = job(1);
        assert_eq!(a.queue_id(), b.queue_id());
        assert_eq!(
            a.queue_id(),
            "email-00000000-0000-0000-0000-00000000abcd-attempt-1"
        );
    }

    #[test]
    fn test_queue_id_varies_with_attempt() {
        assert_ne!(job(1).queue_id(), job(2).queue_id());
    }

    #[test]
    fn test_payload_round_trip() {
        let original = job(3);
        let value = serde_json::to_value(&original).unwrap();
        let decoded: SendJob = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.queue_id(), original.queue_id());
        assert_eq!(decoded.recipient, original.recipient);
    }

    #[test]
    fn test_backoff_progression() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 60_000,
        };

        assert_eq!(policy.backoff(1), Duration::minutes(1));
        assert_eq!(policy.backoff(2), Duration::minutes(2));
        assert_eq!(policy.backoff(3), Duration::minutes(4));
        assert_eq!(policy.backoff(4), Duration::minutes(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 50,
            initial_delay_ms: 60_000,
        };

        assert_eq!(policy.backoff(30), Duration::hours(4));
        assert_eq!(policy.backoff(1000), Duration::hours(4));
    }
}
