//! Scene database repository.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::{Scene, SceneWithPersona};
use crate::geo::Coordinates;

/// Cap on nearby listings.
const NEARBY_LIMIT: i64 = 50;

/// Repository for scene persistence.
#[derive(Debug, Clone)]
pub struct SceneRepository {
    pool: SqlitePool,
}

impl SceneRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a scene by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Scene>> {
        let scene = sqlx::query_as::<_, Scene>(
            r#"
            SELECT id, persona_id, latitude, longitude, is_active, started_at, expires_at, created_at
            FROM scenes
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching scene")?;

        Ok(scene)
    }

    /// The owner's active, non-expired scene, if any.
    pub async fn find_active_for_persona(
        &self,
        persona_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Scene>> {
        let scene = sqlx::query_as::<_, Scene>(
            r#"
            SELECT id, persona_id, latitude, longitude, is_active, started_at, expires_at, created_at
            FROM scenes
            WHERE persona_id = ? AND is_active = 1 AND expires_at > ?
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(persona_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("fetching active scene")?;

        Ok(scene)
    }

    /// Whether the scene exists, is active and unexpired.
    pub async fn is_live(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let live = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM scenes WHERE id = ? AND is_active = 1 AND expires_at > ?
            )
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("checking scene liveness")?;

        Ok(live)
    }

    /// Create a new scene.
    pub async fn create(&self, scene: &Scene) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scenes (id, persona_id, latitude, longitude, is_active, started_at, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&scene.id)
        .bind(&scene.persona_id)
        .bind(scene.latitude)
        .bind(scene.longitude)
        .bind(scene.is_active)
        .bind(scene.started_at)
        .bind(scene.expires_at)
        .bind(scene.created_at)
        .execute(&self.pool)
        .await
        .context("creating scene")?;

        Ok(())
    }

    /// Move a scene and push out its expiry (repeat-announcement upsert).
    pub async fn extend(
        &self,
        id: &str,
        location: Coordinates,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE scenes SET latitude = ?, longitude = ?, expires_at = ? WHERE id = ?")
            .bind(location.latitude)
            .bind(location.longitude)
            .bind(expires_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("extending scene")?;

        Ok(())
    }

    /// Deactivate a scene (owner hard-stop).
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE scenes SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deactivating scene")?;

        Ok(())
    }

    /// Deactivate every scene still marked active. Returns the number of
    /// rows touched. Used by the startup sweep: no scene legitimately
    /// survives a restart as active without being re-announced.
    pub async fn deactivate_all(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE scenes SET is_active = 0 WHERE is_active = 1")
            .execute(&self.pool)
            .await
            .context("deactivating stale scenes")?;

        Ok(result.rows_affected())
    }

    /// Scenes whose TTL has lapsed, for the expiry sweep.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Scene>> {
        let scenes = sqlx::query_as::<_, Scene>(
            r#"
            SELECT id, persona_id, latitude, longitude, is_active, started_at, expires_at, created_at
            FROM scenes
            WHERE expires_at < ?
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("listing expired scenes")?;

        Ok(scenes)
    }

    /// Hard-delete a scene. Chat requests and messages hanging off it go
    /// with it via cascade.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scenes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting scene")?;

        Ok(())
    }

    /// Active scenes of other users, with persona info, for the nearby
    /// listing.
    pub async fn list_live_excluding_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SceneWithPersona>> {
        let scenes = sqlx::query_as::<_, SceneWithPersona>(
            r#"
            SELECT s.id, s.persona_id, s.latitude, s.longitude, s.is_active,
                   s.started_at, s.expires_at, s.created_at,
                   p.name AS persona_name,
                   p.avatar_url AS persona_avatar,
                   p.description AS persona_description
            FROM scenes s
            JOIN personas p ON s.persona_id = p.id
            WHERE s.is_active = 1 AND s.expires_at > ? AND p.user_id != ?
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(user_id)
        .bind(NEARBY_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("listing nearby scenes")?;

        Ok(scenes)
    }
}
