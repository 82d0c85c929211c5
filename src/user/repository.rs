//! User database repository.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::User;
use crate::geo::Coordinates;

/// Repository for user persistence.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a user by ID.
    pub async fn get(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, last_latitude, last_longitude, last_location_updated_at,
                   created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching user")?;

        Ok(user)
    }

    /// Get a user by email, creating the account on first login.
    pub async fn get_or_create_by_email(&self, email: &str) -> Result<User> {
        let existing = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, last_latitude, last_longitude, last_location_updated_at,
                   created_at, updated_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("fetching user by email")?;

        if let Some(user) = existing {
            return Ok(user);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            last_latitude: None,
            last_longitude: None,
            last_location_updated_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO users (id, email, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .context("creating user")?;

        Ok(user)
    }

    /// Record the user's last-known location.
    pub async fn set_last_location(&self, user_id: &str, location: Coordinates) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE users
            SET last_latitude = ?, last_longitude = ?, last_location_updated_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .context("updating user location")?;

        Ok(())
    }
}
