//! Location history repository.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::LocationSample;
use crate::geo::Coordinates;

/// Repository for location history.
#[derive(Debug, Clone)]
pub struct LocationRepository {
    pool: SqlitePool,
}

impl LocationRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a history sample for a user.
    pub async fn record(
        &self,
        user_id: &str,
        location: Coordinates,
        accuracy: Option<f64>,
    ) -> Result<LocationSample> {
        let sample = LocationSample {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            latitude: location.latitude,
            longitude: location.longitude,
            accuracy,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO location_samples (id, user_id, latitude, longitude, accuracy, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.id)
        .bind(&sample.user_id)
        .bind(sample.latitude)
        .bind(sample.longitude)
        .bind(sample.accuracy)
        .bind(sample.created_at)
        .execute(&self.pool)
        .await
        .context("recording location sample")?;

        Ok(sample)
    }

    /// Count stored samples for a user.
    pub async fn count_for_user(&self, user_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM location_samples WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("counting location samples")?;

        Ok(count)
    }

    /// Trim every owner's history to the `keep` most recent samples.
    /// Returns the number of deleted rows.
    pub async fn trim_history(&self, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM location_samples
            WHERE id IN (
                SELECT id FROM (
                    SELECT id,
                           ROW_NUMBER() OVER (
                               PARTITION BY user_id ORDER BY created_at DESC
                           ) AS rank
                    FROM location_samples
                )
                WHERE rank > ?
            )
            "#,
        )
        .bind(keep)
        .execute(&self.pool)
        .await
        .context("trimming location history")?;

        Ok(result.rows_affected())
    }
}
