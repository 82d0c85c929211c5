//! Personas: the public face a user presents in nearby listings and chats.
//!
//! The simplified model gives each user one persona whose id equals the user
//! id; scenes hang off the persona.

mod repository;

pub use repository::PersonaRepository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user's persona.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Persona {
    /// Unique persona ID (equal to the owning user's ID).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Avatar image URL.
    pub avatar_url: String,
    /// Free-form description.
    pub description: String,
    /// Whether the persona is selectable.
    pub is_active: bool,
    /// When the persona was created.
    pub created_at: DateTime<Utc>,
    /// When the persona was last modified.
    pub updated_at: DateTime<Utc>,
}
