//! Application state shared across handlers.

use crate::auth::{AuthState, OtpRepository};
use crate::chat::ChatService;
use crate::db::Database;
use crate::location::LocationRepository;
use crate::persona::PersonaRepository;
use crate::scene::SceneService;
use crate::user::UserRepository;
use crate::ws::Hub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// User accounts.
    pub users: UserRepository,
    /// One-time login codes.
    pub otps: OtpRepository,
    /// Personas.
    pub personas: PersonaRepository,
    /// Location history.
    pub locations: LocationRepository,
    /// Scene lifecycle service.
    pub scenes: SceneService,
    /// Chat lifecycle service.
    pub chats: ChatService,
    /// Connection dispatcher.
    pub hub: Hub,
    /// Authentication state.
    pub auth: AuthState,
    /// Allowed CORS origins; an empty list means permissive (development).
    pub cors_origins: Vec<String>,
}

impl AppState {
    /// Wire up repositories and services over one database.
    pub fn new(db: &Database, hub: Hub, auth: AuthState) -> Self {
        use crate::chat::ChatRepository;
        use crate::scene::SceneRepository;

        let pool = db.pool().clone();
        let scene_repo = SceneRepository::new(pool.clone());
        let chat_repo = ChatRepository::new(pool.clone());
        let persona_repo = PersonaRepository::new(pool.clone());

        Self {
            users: UserRepository::new(pool.clone()),
            otps: OtpRepository::new(pool.clone()),
            personas: persona_repo.clone(),
            locations: LocationRepository::new(pool.clone()),
            scenes: SceneService::new(scene_repo.clone(), chat_repo.clone(), hub.clone()),
            chats: ChatService::new(chat_repo, scene_repo, persona_repo, hub.clone()),
            hub,
            auth,
            cors_origins: Vec::new(),
        }
    }

    /// Set the allowed CORS origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
