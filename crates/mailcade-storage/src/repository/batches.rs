//! Batch repository

use mailcade_common::types::{BatchId, UserId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Batch, CreateBatch};

/// Batch repository
#[derive(Clone)]
pub struct BatchRepository {
    pool: PgPool,
}

impl BatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a batch row; committed before its messages so every message
    /// always references an existing batch.
    pub async fn create(&self, input: CreateBatch) -> Result<Batch, sqlx::Error> {
        sqlx::query_as::<_, Batch>(
            r#"
            INSERT INTO batches (
                id, user_id, total_emails, scheduled_emails,
                start_time, delay_seconds, hourly_limit
            )
            VALUES ($1, $2, $3, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.total_emails)
        .bind(input.start_time)
        .bind(input.delay_seconds)
        .bind(input.hourly_limit)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a batch scoped to its owner
    pub async fn get_by_user(
        &self,
        user_id: UserId,
        id: BatchId,
    ) -> Result<Option<Batch>, sqlx::Error> {
        sqlx::query_as::<_, Batch>("SELECT * FROM batches WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Atomically bump the sent counter
    pub async fn increment_sent(&self, id: BatchId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batches SET sent_emails = sent_emails + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically bump the failed counter
    pub async fn increment_failed(&self, id: BatchId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batches SET failed_emails = failed_emails + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Add to the failed counter in one statement (coordinator recovery)
    pub async fn add_failed(&self, id: BatchId, count: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE batches SET failed_emails = failed_emails + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
