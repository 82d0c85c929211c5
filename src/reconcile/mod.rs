//! Reconciliation worker: turns elapsed time into state transitions.
//!
//! Every tick expires chats and scenes whose TTL has lapsed, cascades the
//! dependent deletions and pushes notifications through the dispatcher.
//! Ticks never overlap; a tick that fails partway logs and leaves the rest
//! for the next one. Everything here is idempotent, so running a sweep twice
//! in a row deletes and notifies nothing the second time.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::chat::{ChatRepository, PENDING_RESPONSE_WINDOW_MINUTES};
use crate::location::{HISTORY_KEEP, LocationRepository};
use crate::scene::{PRESENCE_RADIUS_METERS, SceneRepository};
use crate::ws::{Hub, WsEvent};

/// Sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long terminal chat requests are kept before deletion.
const TERMINAL_RETENTION_HOURS: i64 = 1;

/// Periodic sweep over the ephemeral entities.
#[derive(Clone)]
pub struct Reconciler {
    chats: ChatRepository,
    scenes: SceneRepository,
    locations: LocationRepository,
    hub: Hub,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        chats: ChatRepository,
        scenes: SceneRepository,
        locations: LocationRepository,
        hub: Hub,
    ) -> Self {
        Self {
            chats,
            scenes,
            locations,
            hub,
        }
    }

    /// Run the sweep forever on the fixed interval. The next tick waits for
    /// the previous to finish.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("reconciliation worker started");

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// The boot-time variant: additionally force-deactivates scenes left
    /// active by a previous run. No scene legitimately survives a restart
    /// without being re-announced.
    pub async fn startup(&self) {
        match self.scenes.deactivate_all().await {
            Ok(0) => {}
            Ok(count) => info!(count, "deactivated stale scenes from previous run"),
            Err(err) => warn!("startup scene cleanup failed: {err:#}"),
        }
        self.tick().await;
    }

    /// One sweep. Failures are logged per entity and retried next tick.
    pub async fn tick(&self) {
        self.expire_accepted_chats().await;
        self.expire_stale_pending_chats().await;
        self.delete_expired_scenes().await;
        self.prune_terminal_chats().await;
        self.trim_location_history().await;
    }

    /// Accepted chats past their window: drop messages, mark expired and
    /// tell both scenes.
    async fn expire_accepted_chats(&self) {
        let now = Utc::now();
        let expired = match self.chats.list_expired_accepted(now).await {
            Ok(expired) => expired,
            Err(err) => {
                warn!("failed to query expired chats: {err:#}");
                return;
            }
        };

        for request in expired {
            match self.chats.delete_messages(&request.id).await {
                Ok(0) => {}
                Ok(count) => debug!(request_id = %request.id, count, "deleted expired chat messages"),
                Err(err) => {
                    warn!(request_id = %request.id, "failed to delete messages: {err:#}");
                    continue;
                }
            }

            match self.chats.expire_if_accepted(&request.id).await {
                // Lost a race with another transition; nothing to announce.
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    warn!(request_id = %request.id, "failed to expire chat: {err:#}");
                    continue;
                }
            }

            info!(request_id = %request.id, "chat expired");
            let event = WsEvent::ChatExpired {
                request_id: request.id.clone(),
                from_scene_id: request.from_scene_id.clone(),
                to_scene_id: request.to_scene_id.clone(),
            };
            self.hub
                .send_to_scene(request.from_scene_id.clone(), event.clone())
                .await;
            self.hub.send_to_scene(request.to_scene_id.clone(), event).await;
        }
    }

    /// Proposals nobody answered inside the response window.
    async fn expire_stale_pending_chats(&self) {
        let cutoff = Utc::now() - chrono::Duration::minutes(PENDING_RESPONSE_WINDOW_MINUTES);
        match self.chats.expire_stale_pending(cutoff).await {
            Ok(0) => {}
            Ok(count) => info!(count, "expired unanswered chat requests"),
            Err(err) => warn!("failed to expire stale pending chats: {err:#}"),
        }
    }

    /// Scenes past their TTL are hard-deleted; stale presence has no
    /// retention value. Requests and messages hanging off them cascade away.
    async fn delete_expired_scenes(&self) {
        let now = Utc::now();
        let expired = match self.scenes.list_expired(now).await {
            Ok(expired) => expired,
            Err(err) => {
                warn!("failed to query expired scenes: {err:#}");
                return;
            }
        };

        for scene in expired {
            if let Err(err) = self.scenes.delete(&scene.id).await {
                warn!(scene_id = %scene.id, "failed to delete scene: {err:#}");
                continue;
            }

            info!(scene_id = %scene.id, "expired scene deleted");
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
        }
    }

    /// Terminal requests past the retention window.
    async fn prune_terminal_chats(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(TERMINAL_RETENTION_HOURS);
        match self.chats.delete_terminal_before(cutoff).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "pruned terminal chat requests"),
            Err(err) => warn!("failed to prune terminal chats: {err:#}"),
        }
    }

    /// Keep only the most recent samples per owner.
    async fn trim_location_history(&self) {
        match self.locations.trim_history(HISTORY_KEEP).await {
            Ok(0) => {}
            Ok(count) => debug!(count, "trimmed location history"),
            Err(err) => warn!("failed to trim location history: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatRequestStatus, ChatService};
    use crate::db::Database;
    use crate::geo::Coordinates;
    use crate::persona::PersonaRepository;
    use crate::scene::SceneService;
    use crate::user::UserRepository;

    struct Fixture {
        db: Database,
        reconciler: Reconciler,
        chats: ChatService,
        scenes: SceneService,
        scene_a: String,
        scene_b: String,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let hub = Hub::spawn();
        let scene_repo = SceneRepository::new(db.pool().clone());
        let chat_repo = ChatRepository::new(db.pool().clone());
        let persona_repo = PersonaRepository::new(db.pool().clone());
        let location_repo = LocationRepository::new(db.pool().clone());

        let scenes = SceneService::new(scene_repo.clone(), chat_repo.clone(), hub.clone());
        let chats = ChatService::new(
            chat_repo.clone(),
            scene_repo.clone(),
            persona_repo.clone(),
            hub.clone(),
        );
        let reconciler = Reconciler::new(chat_repo, scene_repo, location_repo, hub);

        let users = UserRepository::new(db.pool().clone());
        let mut ids = Vec::new();
        for (email, name) in [("a@example.com", "A"), ("b@example.com", "B")] {
            let user = users.get_or_create_by_email(email).await.unwrap();
            let persona = persona_repo.upsert(&user.id, name, "", "").await.unwrap();
            let scene = scenes
                .start_or_extend(&persona.id, Coordinates::new(10.0, 20.0))
                .await
                .unwrap();
            ids.push(scene.id);
        }

        Fixture {
            db,
            reconciler,
            chats,
            scenes,
            scene_b: ids.pop().unwrap(),
            scene_a: ids.pop().unwrap(),
        }
    }

    async fn set_request_expiry_minutes_ago(db: &Database, request_id: &str, minutes: i64) {
        let past = Utc::now() - chrono::Duration::minutes(minutes);
        sqlx::query("UPDATE chat_requests SET expires_at = ? WHERE id = ?")
            .bind(past)
            .bind(request_id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    async fn request_status(db: &Database, request_id: &str) -> Option<String> {
        sqlx::query_scalar("SELECT status FROM chat_requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(db.pool())
            .await
            .unwrap()
    }

    async fn message_count(db: &Database, request_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE chat_request_id = ?")
            .bind(request_id)
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_expired_accepted_chat_is_swept() {
        let f = fixture().await;
        let request = f
            .chats
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();
        f.chats.accept(&request.id, &f.scene_b).await.unwrap();
        f.chats
            .post_message(&request.id, &f.scene_a, "hello".to_string())
            .await
            .unwrap();

        set_request_expiry_minutes_ago(&f.db, &request.id, 1).await;
        f.reconciler.tick().await;

        assert_eq!(
            request_status(&f.db, &request.id).await.as_deref(),
            Some("expired")
        );
        assert_eq!(message_count(&f.db, &request.id).await, 0);
    }

    #[tokio::test]
    async fn test_stale_pending_chat_is_expired() {
        let f = fixture().await;
        let request = f
            .chats
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        let stale = Utc::now()
            - chrono::Duration::minutes(PENDING_RESPONSE_WINDOW_MINUTES + 1);
        sqlx::query("UPDATE chat_requests SET created_at = ? WHERE id = ?")
            .bind(stale)
            .bind(&request.id)
            .execute(f.db.pool())
            .await
            .unwrap();

        f.reconciler.tick().await;

        assert_eq!(
            request_status(&f.db, &request.id).await.as_deref(),
            Some("expired")
        );

        // A swept pair frees the slot for a fresh proposal after pruning;
        // until then the terminal row no longer blocks new proposals.
        let again = f.chats.propose(&f.scene_a, &f.scene_b, None).await.unwrap();
        assert_eq!(again.status, ChatRequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_expired_scene_is_hard_deleted_with_dependents() {
        let f = fixture().await;
        let request = f
            .chats
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        let past = Utc::now() - chrono::Duration::minutes(1);
        sqlx::query("UPDATE scenes SET expires_at = ? WHERE id = ?")
            .bind(past)
            .bind(&f.scene_a)
            .execute(f.db.pool())
            .await
            .unwrap();

        f.reconciler.tick().await;

        let scene_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scenes WHERE id = ?")
            .bind(&f.scene_a)
            .fetch_one(f.db.pool())
            .await
            .unwrap();
        assert_eq!(scene_count, 0);
        assert!(request_status(&f.db, &request.id).await.is_none());

        // The other scene is untouched.
        assert!(
            f.scenes
                .repository()
                .get(&f.scene_b)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_terminal_requests_are_pruned_after_retention() {
        let f = fixture().await;
        let request = f
            .chats
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();
        f.chats.reject(&request.id, &f.scene_b).await.unwrap();

        // Fresh terminal rows survive the sweep.
        f.reconciler.tick().await;
        assert!(request_status(&f.db, &request.id).await.is_some());

        let old = Utc::now() - chrono::Duration::hours(2);
        sqlx::query("UPDATE chat_requests SET created_at = ? WHERE id = ?")
            .bind(old)
            .bind(&request.id)
            .execute(f.db.pool())
            .await
            .unwrap();

        f.reconciler.tick().await;
        assert!(request_status(&f.db, &request.id).await.is_none());
    }

    #[tokio::test]
    async fn test_location_history_is_trimmed() {
        let f = fixture().await;
        let users = UserRepository::new(f.db.pool().clone());
        let user = users.get_or_create_by_email("a@example.com").await.unwrap();
        let locations = LocationRepository::new(f.db.pool().clone());

        for i in 0..(HISTORY_KEEP + 10) {
            locations
                .record(&user.id, Coordinates::new(0.0, i as f64 * 0.001), None)
                .await
                .unwrap();
        }

        f.reconciler.tick().await;
        assert_eq!(locations.count_for_user(&user.id).await.unwrap(), HISTORY_KEEP);
    }

    #[tokio::test]
    async fn test_tick_is_idempotent() {
        let f = fixture().await;
        let request = f
            .chats
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();
        f.chats.accept(&request.id, &f.scene_b).await.unwrap();
        set_request_expiry_minutes_ago(&f.db, &request.id, 1).await;

        f.reconciler.tick().await;
        let status_after_first = request_status(&f.db, &request.id).await;
        let requests_after_first: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_requests")
                .fetch_one(f.db.pool())
                .await
                .unwrap();

        f.reconciler.tick().await;
        assert_eq!(request_status(&f.db, &request.id).await, status_after_first);
        let requests_after_second: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_requests")
                .fetch_one(f.db.pool())
                .await
                .unwrap();
        assert_eq!(requests_after_first, requests_after_second);
    }

    #[tokio::test]
    async fn test_startup_deactivates_leftover_scenes() {
        let f = fixture().await;

        f.reconciler.startup().await;

        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scenes WHERE is_active = 1")
                .fetch_one(f.db.pool())
                .await
                .unwrap();
        assert_eq!(active, 0);
    }
}
