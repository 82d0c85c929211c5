//! Location reporting and per-owner history.

mod repository;

pub use repository::LocationRepository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// History entries kept per owner; older samples are trimmed by the sweep.
pub const HISTORY_KEEP: i64 = 100;

/// One recorded location report.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocationSample {
    pub id: String,
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub created_at: DateTime<Utc>,
}
