//! Scene data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::geo::Coordinates;

/// An owner's presence announcement: "I am here until `expires_at`".
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Scene {
    /// Unique scene ID. Stable across repeated announcements while active.
    pub id: String,
    /// Owning persona.
    pub persona_id: String,
    /// Announced latitude.
    pub latitude: f64,
    /// Announced longitude.
    pub longitude: f64,
    /// Cleared on owner stop or by the startup sweep.
    pub is_active: bool,
    /// When presence began.
    pub started_at: DateTime<Utc>,
    /// When presence lapses absent a renewal.
    pub expires_at: DateTime<Utc>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl Scene {
    /// The scene's announced coordinate.
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// A scene joined with its owner's persona, for nearby listings.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SceneWithPersona {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub scene: Scene,
    pub persona_name: String,
    pub persona_avatar: String,
    pub persona_description: String,
}
