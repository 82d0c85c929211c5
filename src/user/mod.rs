//! User accounts.

mod repository;

pub use repository::UserRepository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Login email, unique.
    pub email: String,
    /// Last reported latitude.
    pub last_latitude: Option<f64>,
    /// Last reported longitude.
    pub last_longitude: Option<f64>,
    /// When the location was last reported.
    pub last_location_updated_at: Option<DateTime<Utc>>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last modified.
    pub updated_at: DateTime<Utc>,
}
