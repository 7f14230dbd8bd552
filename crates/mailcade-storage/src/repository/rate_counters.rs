//! Durable rate counter repository
//!
//! Shadow rows for the fast-path counters; consulted for observability
//! and reclaimed after 24 hours.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Rate counter repository
#[derive(Clone)]
pub struct RateCounterRepository {
    pool: PgPool,
}

impl RateCounterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Increment the counter for one (scope, hour) key, creating it on
    /// first use.
    pub async fn upsert_increment(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO rate_counters (key, count, window_start, window_end)
            VALUES ($1, 1, $2, $3)
            ON CONFLICT (key)
            DO UPDATE SET count = rate_counters.count + 1
            "#,
        )
        .bind(key)
        .bind(window_start)
        .bind(window_end)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete counters whose window started before the cutoff
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rate_counters WHERE window_start < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
