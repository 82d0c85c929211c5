//! Scene lifecycle: ephemeral, time-bounded presence announcements.

mod models;
mod repository;
mod service;

pub use models::{Scene, SceneWithPersona};
pub use repository::SceneRepository;
pub use service::{PRESENCE_RADIUS_METERS, SCENE_TTL_HOURS, SceneService};
