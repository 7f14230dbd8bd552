//! Sender repository

use mailcade_common::types::{SenderId, UserId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CreateSender, Sender, UpdateSender};

/// Sender repository
#[derive(Clone)]
pub struct SenderRepository {
    pool: PgPool,
}

impl SenderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new sender. When `is_default` is set, any previous
    /// default of the same user is cleared in the same transaction so at
    /// most one default exists per user.
    pub async fn create(&self, input: CreateSender) -> Result<Sender, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if input.is_default {
            sqlx::query("UPDATE senders SET is_default = FALSE, updated_at = NOW() WHERE user_id = $1 AND is_default")
                .bind(input.user_id)
                .execute(&mut *tx)
                .await?;
        }

        let sender = sqlx::query_as::<_, Sender>(
            r#"
            INSERT INTO senders (
                id, user_id, email, name,
                smtp_host, smtp_port, smtp_user, smtp_password,
                is_default, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.email)
        .bind(&input.name)
        .bind(&input.smtp_host)
        .bind(input.smtp_port)
        .bind(&input.smtp_user)
        .bind(&input.smtp_password)
        .bind(input.is_default)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sender)
    }

    /// List senders for a user
    pub async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Sender>, sqlx::Error> {
        sqlx::query_as::<_, Sender>(
            "SELECT * FROM senders WHERE user_id = $1 ORDER BY is_default DESC, created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Get a sender scoped to its owner
    pub async fn get_by_user(
        &self,
        user_id: UserId,
        id: SenderId,
    ) -> Result<Option<Sender>, sqlx::Error> {
        sqlx::query_as::<_, Sender>("SELECT * FROM senders WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Get a sender by id regardless of owner (worker path)
    pub async fn get(&self, id: SenderId) -> Result<Option<Sender>, sqlx::Error> {
        sqlx::query_as::<_, Sender>("SELECT * FROM senders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The user's default active sender, if any
    pub async fn find_default_active(&self, user_id: UserId) -> Result<Option<Sender>, sqlx::Error> {
        sqlx::query_as::<_, Sender>(
            "SELECT * FROM senders WHERE user_id = $1 AND is_default AND is_active LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Any active sender of the user, oldest first
    pub async fn find_any_active(&self, user_id: UserId) -> Result<Option<Sender>, sqlx::Error> {
        sqlx::query_as::<_, Sender>(
            "SELECT * FROM senders WHERE user_id = $1 AND is_active ORDER BY created_at ASC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Apply a partial update. Setting `is_default` clears the previous
    /// default in the same transaction.
    pub async fn update(
        &self,
        user_id: UserId,
        id: SenderId,
        input: UpdateSender,
    ) -> Result<Option<Sender>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if input.is_default == Some(true) {
            sqlx::query(
                "UPDATE senders SET is_default = FALSE, updated_at = NOW() WHERE user_id = $1 AND is_default AND id <> $2",
            )
            .bind(user_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        let sender = sqlx::query_as::<_, Sender>(
            r#"
            UPDATE senders SET
                email = COALESCE($3, email),
                name = COALESCE($4, name),
                smtp_host = CASE WHEN $5 THEN $6 ELSE smtp_host END,
                smtp_port = CASE WHEN $7 THEN $8 ELSE smtp_port END,
                smtp_user = CASE WHEN $9 THEN $10 ELSE smtp_user END,
                smtp_password = CASE WHEN $11 THEN $12 ELSE smtp_password END,
                is_default = COALESCE($13, is_default),
                is_active = COALESCE($14, is_active),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(&input.email)
        .bind(&input.name)
        .bind(input.smtp_host.is_some())
        .bind(input.smtp_host.clone().flatten())
        .bind(input.smtp_port.is_some())
        .bind(input.smtp_port.flatten())
        .bind(input.smtp_user.is_some())
        .bind(input.smtp_user.clone().flatten())
        .bind(input.smtp_password.is_some())
        .bind(input.smtp_password.clone().flatten())
        .bind(input.is_default)
        .bind(input.is_active)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sender)
    }

    /// Count senders owned by a user
    pub async fn count_by_user(&self, user_id: UserId) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM senders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Delete a sender. Messages referencing it keep their rows with
    /// `sender_id` set to NULL (FK ON DELETE SET NULL).
    pub async fn delete(&self, user_id: UserId, id: SenderId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM senders WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
