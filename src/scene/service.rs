//! Scene lifecycle operations.

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use super::models::{Scene, SceneWithPersona};
use super::repository::SceneRepository;
use crate::chat::ChatRepository;
use crate::error::{DomainError, DomainResult};
use crate::geo::Coordinates;
use crate::ws::{Hub, WsEvent};

/// Presence lifetime in hours; refreshed, not accumulated, on every extend.
pub const SCENE_TTL_HOURS: i64 = 4;

/// Fixed radius for presence broadcasts.
pub const PRESENCE_RADIUS_METERS: f64 = 5_000.0;

/// Scene lifecycle service.
#[derive(Clone)]
pub struct SceneService {
    repo: SceneRepository,
    chats: ChatRepository,
    hub: Hub,
}

impl SceneService {
    /// Create a new service.
    pub fn new(repo: SceneRepository, chats: ChatRepository, hub: Hub) -> Self {
        Self { repo, chats, hub }
    }

    /// Access to the underlying repository.
    pub fn repository(&self) -> &SceneRepository {
        &self.repo
    }

    /// Announce presence. Extends the owner's active scene in place when one
    /// exists (stable id, new coordinate, refreshed expiry), creates a fresh
    /// scene otherwise, and broadcasts the announcement to the area.
    pub async fn start_or_extend(
        &self,
        persona_id: &str,
        location: Coordinates,
    ) -> DomainResult<Scene> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(SCENE_TTL_HOURS);

        let scene = match self.repo.find_active_for_persona(persona_id, now).await? {
            Some(mut scene) => {
                scene.latitude = location.latitude;
                scene.longitude = location.longitude;
                scene.expires_at = expires_at;
                self.repo.extend(&scene.id, location, expires_at).await?;
                info!(scene_id = %scene.id, persona_id = %persona_id, "extended scene");
                scene
            }
            None => {
                let scene = Scene {
                    id: Uuid::new_v4().to_string(),
                    persona_id: persona_id.to_string(),
                    latitude: location.latitude,
                    longitude: location.longitude,
                    is_active: true,
                    started_at: now,
                    expires_at,
                    created_at: now,
                };
                self.repo.create(&scene).await?;
                info!(scene_id = %scene.id, persona_id = %persona_id, "started scene");
                scene
            }
        };

        self.hub
            .send_to_area(
                location,
                PRESENCE_RADIUS_METERS,
                WsEvent::PresenceStarted {
                    scene_id: scene.id.clone(),
                    latitude: scene.latitude,
                    longitude: scene.longitude,
                },
                None,
            )
            .await;

        Ok(scene)
    }

    /// End the owner's presence: drop dependent chat requests, deactivate
    /// the scene and tell the area it is gone.
    pub async fn stop(&self, persona_id: &str) -> DomainResult<Scene> {
        let now = Utc::now();
        let scene = self
            .repo
            .find_active_for_persona(persona_id, now)
            .await?
            .ok_or_else(|| DomainError::not_found("No active scene found"))?;

        self.chats.delete_for_scene(&scene.id).await?;
        self.repo.deactivate(&scene.id).await?;
        info!(scene_id = %scene.id, persona_id = %persona_id, "stopped scene");

        self.hub
            .send_to_area(
                scene.coordinates(),
                PRESENCE_RADIUS_METERS,
                WsEvent::PresenceEnded {
                    scene_id: scene.id.clone(),
                },
                None,
            )
            .await;

        Ok(scene)
    }

    /// The owner's active scene, if any.
    pub async fn active_for_persona(&self, persona_id: &str) -> DomainResult<Option<Scene>> {
        Ok(self
            .repo
            .find_active_for_persona(persona_id, Utc::now())
            .await?)
    }

    /// Live scenes of other users, with persona info.
    pub async fn nearby_for_user(&self, user_id: &str) -> DomainResult<Vec<SceneWithPersona>> {
        Ok(self
            .repo
            .list_live_excluding_user(user_id, Utc::now())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::persona::PersonaRepository;
    use crate::user::UserRepository;

    async fn service() -> (SceneService, Database) {
        let (service, db, _) = service_with_hub().await;
        (service, db)
    }

    async fn service_with_hub() -> (SceneService, Database, Hub) {
        let db = Database::in_memory().await.unwrap();
        let hub = Hub::spawn();
        let service = SceneService::new(
            SceneRepository::new(db.pool().clone()),
            ChatRepository::new(db.pool().clone()),
            hub.clone(),
        );
        (service, db, hub)
    }

    async fn seed_persona(db: &Database, email: &str, name: &str) -> String {
        let user = UserRepository::new(db.pool().clone())
            .get_or_create_by_email(email)
            .await
            .unwrap();
        PersonaRepository::new(db.pool().clone())
            .upsert(&user.id, name, "", "")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_start_creates_then_extends() {
        let (service, db) = service().await;
        let persona = seed_persona(&db, "a@example.com", "A").await;

        let first = service
            .start_or_extend(&persona, Coordinates::new(10.0, 20.0))
            .await
            .unwrap();
        let second = service
            .start_or_extend(&persona, Coordinates::new(10.5, 20.5))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.expires_at >= first.expires_at);
        assert_eq!(second.latitude, 10.5);
        assert_eq!(second.longitude, 20.5);
    }

    #[tokio::test]
    async fn test_stop_requires_active_scene() {
        let (service, db) = service().await;
        let persona = seed_persona(&db, "a@example.com", "A").await;

        let err = service.stop(&persona).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_deactivates() {
        let (service, db) = service().await;
        let persona = seed_persona(&db, "a@example.com", "A").await;

        service
            .start_or_extend(&persona, Coordinates::new(10.0, 20.0))
            .await
            .unwrap();
        service.stop(&persona).await.unwrap();

        assert!(service.active_for_persona(&persona).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_start_after_stop_gets_new_id() {
        let (service, db) = service().await;
        let persona = seed_persona(&db, "a@example.com", "A").await;

        let first = service
            .start_or_extend(&persona, Coordinates::new(10.0, 20.0))
            .await
            .unwrap();
        service.stop(&persona).await.unwrap();
        let second = service
            .start_or_extend(&persona, Coordinates::new(10.0, 20.0))
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_start_announces_presence_to_the_area() {
        let (service, db, hub) = service_with_hub().await;
        let persona = seed_persona(&db, "a@example.com", "A").await;

        // A peer connected ~3 km from the announcement.
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        hub.connect("conn-peer".to_string(), None, tx).await;
        hub.update_location("conn-peer".to_string(), Coordinates::new(10.027, 20.0))
            .await;

        let scene = service
            .start_or_extend(&persona, Coordinates::new(10.0, 20.0))
            .await
            .unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for presence event")
            .unwrap();
        assert_eq!(
            event,
            crate::ws::WsEvent::PresenceStarted {
                scene_id: scene.id,
                latitude: 10.0,
                longitude: 20.0,
            }
        );
    }

    #[tokio::test]
    async fn test_nearby_excludes_own_scenes() {
        let (service, db) = service().await;
        let mine = seed_persona(&db, "a@example.com", "A").await;
        let theirs = seed_persona(&db, "b@example.com", "B").await;

        service
            .start_or_extend(&mine, Coordinates::new(10.0, 20.0))
            .await
            .unwrap();
        service
            .start_or_extend(&theirs, Coordinates::new(10.01, 20.0))
            .await
            .unwrap();

        // Personas use the owning user's id, so `mine` doubles as user id.
        let nearby = service.nearby_for_user(&mine).await.unwrap();
        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].persona_name, "B");
    }
}
