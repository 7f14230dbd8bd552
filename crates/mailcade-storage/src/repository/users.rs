//! User repository

use mailcade_common::types::UserId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{UpsertUser, User};

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the user on first sign-in, or refresh profile fields on a
    /// repeat sign-in with the same external identity.
    pub async fn upsert_by_google_id(&self, input: UpsertUser) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, google_id, email, name, avatar_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (google_id)
            DO UPDATE SET email = $3, name = $4, avatar_url = $5
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.google_id)
        .bind(&input.email)
        .bind(&input.name)
        .bind(&input.avatar_url)
        .fetch_one(&self.pool)
        .await
    }

    /// Get a user by id
    pub async fn get(&self, id: UserId) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }
}
