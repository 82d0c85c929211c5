//! Persona database repository.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::Persona;

/// Repository for persona persistence.
#[derive(Debug, Clone)]
pub struct PersonaRepository {
    pool: SqlitePool,
}

impl PersonaRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a persona by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Persona>> {
        let persona = sqlx::query_as::<_, Persona>(
            r#"
            SELECT id, user_id, name, avatar_url, description, is_active, created_at, updated_at
            FROM personas
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching persona")?;

        Ok(persona)
    }

    /// Create the user's persona, or update its profile if it already
    /// exists. The persona id is the user id.
    pub async fn upsert(
        &self,
        user_id: &str,
        name: &str,
        avatar_url: &str,
        description: &str,
    ) -> Result<Persona> {
        let now = Utc::now();

        if let Some(mut persona) = self.get(user_id).await? {
            persona.name = name.to_string();
            persona.avatar_url = avatar_url.to_string();
            persona.description = description.to_string();
            persona.updated_at = now;

            sqlx::query(
                r#"
                UPDATE personas
                SET name = ?, avatar_url = ?, description = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&persona.name)
            .bind(&persona.avatar_url)
            .bind(&persona.description)
            .bind(persona.updated_at)
            .bind(&persona.id)
            .execute(&self.pool)
            .await
            .context("updating persona")?;

            return Ok(persona);
        }

        let persona = Persona {
            id: user_id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            avatar_url: avatar_url.to_string(),
            description: description.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO personas (id, user_id, name, avatar_url, description, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&persona.id)
        .bind(&persona.user_id)
        .bind(&persona.name)
        .bind(&persona.avatar_url)
        .bind(&persona.description)
        .bind(persona.is_active)
        .bind(persona.created_at)
        .bind(persona.updated_at)
        .execute(&self.pool)
        .await
        .context("creating persona")?;

        Ok(persona)
    }

    /// List personas owned by a user.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Persona>> {
        let personas = sqlx::query_as::<_, Persona>(
            r#"
            SELECT id, user_id, name, avatar_url, description, is_active, created_at, updated_at
            FROM personas
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("listing personas")?;

        Ok(personas)
    }
}
