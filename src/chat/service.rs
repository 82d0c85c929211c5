//! Chat lifecycle operations.
//!
//! The transition rules live here; the repository's conditional updates are
//! the authority when two callers race for the same request, so the loser
//! surfaces an InvalidTransition instead of clobbering state.

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use super::models::{
    ChatMessage, ChatRequest, ChatRequestStatus, ChatRequestWithPersona, ChatSessionSummary,
};
use super::repository::ChatRepository;
use crate::error::{DomainError, DomainResult};
use crate::persona::PersonaRepository;
use crate::scene::SceneRepository;
use crate::ws::{Hub, WsEvent};

/// How long two parties may exchange messages after an accept. Deliberately
/// much shorter than a scene's presence TTL; a fresh handshake is required
/// afterwards.
pub const ACCEPT_WINDOW_MINUTES: i64 = 5;

/// How long a proposal waits for an answer before the sweep expires it.
pub const PENDING_RESPONSE_WINDOW_MINUTES: i64 = 15;

/// Chat lifecycle service.
#[derive(Clone)]
pub struct ChatService {
    chats: ChatRepository,
    scenes: SceneRepository,
    personas: PersonaRepository,
    hub: Hub,
}

impl ChatService {
    /// Create a new service.
    pub fn new(
        chats: ChatRepository,
        scenes: SceneRepository,
        personas: PersonaRepository,
        hub: Hub,
    ) -> Self {
        Self {
            chats,
            scenes,
            personas,
            hub,
        }
    }

    /// Access to the underlying repository.
    pub fn repository(&self) -> &ChatRepository {
        &self.chats
    }

    /// Propose a chat from one scene to another. At most one pending or
    /// accepted request may exist per unordered scene pair.
    pub async fn propose(
        &self,
        from_scene_id: &str,
        to_scene_id: &str,
        message: Option<String>,
    ) -> DomainResult<ChatRequest> {
        if from_scene_id == to_scene_id {
            return Err(DomainError::invalid_argument(
                "Cannot send a chat request to yourself",
            ));
        }

        let now = Utc::now();
        if !self.scenes.is_live(to_scene_id, now).await? {
            return Err(DomainError::not_found("Target scene not found or inactive"));
        }

        if self
            .chats
            .find_live_for_pair(from_scene_id, to_scene_id)
            .await?
            .is_some()
        {
            return Err(DomainError::conflict(
                "Chat request already exists between these scenes",
            ));
        }

        let request = ChatRequest {
            id: Uuid::new_v4().to_string(),
            from_scene_id: from_scene_id.to_string(),
            to_scene_id: to_scene_id.to_string(),
            message,
            status: ChatRequestStatus::Pending,
            accepted_at: None,
            expires_at: None,
            created_at: now,
        };
        self.chats.create(&request).await?;
        info!(request_id = %request.id, from = %from_scene_id, to = %to_scene_id, "chat proposed");

        if let Some(persona) = self.persona_for_scene(from_scene_id).await? {
            self.hub
                .send_to_scene(
                    to_scene_id.to_string(),
                    WsEvent::ChatProposed {
                        request_id: request.id.clone(),
                        from_scene_id: request.from_scene_id.clone(),
                        from_persona_name: persona.name,
                        from_persona_avatar: persona.avatar_url,
                        from_persona_description: persona.description,
                        message: request.message.clone(),
                        created_at: request.created_at,
                    },
                )
                .await;
        }

        Ok(request)
    }

    /// Accept a pending request addressed to `by_scene_id`, opening the
    /// messaging window.
    pub async fn accept(&self, request_id: &str, by_scene_id: &str) -> DomainResult<ChatRequest> {
        let mut request = self.get_request(request_id).await?;

        if request.to_scene_id != by_scene_id {
            return Err(DomainError::forbidden("This request is not for your scene"));
        }

        let now = Utc::now();
        let expires_at = now + Duration::minutes(ACCEPT_WINDOW_MINUTES);

        if !self.chats.accept_if_pending(request_id, now, expires_at).await? {
            return Err(DomainError::invalid_transition(format!(
                "Request already {}",
                request.status
            )));
        }

        request.status = ChatRequestStatus::Accepted;
        request.accepted_at = Some(now);
        request.expires_at = Some(expires_at);
        info!(request_id = %request.id, "chat accepted");

        let event = WsEvent::ChatAccepted {
            request_id: request.id.clone(),
            from_scene_id: request.from_scene_id.clone(),
            to_scene_id: request.to_scene_id.clone(),
            expires_at,
        };
        self.hub
            .send_to_scene(request.from_scene_id.clone(), event.clone())
            .await;
        self.hub
            .send_to_scene(request.to_scene_id.clone(), event)
            .await;

        Ok(request)
    }

    /// Reject a pending request addressed to `by_scene_id`.
    pub async fn reject(&self, request_id: &str, by_scene_id: &str) -> DomainResult<()> {
        let request = self.get_request(request_id).await?;

        if request.to_scene_id != by_scene_id {
            return Err(DomainError::forbidden("This request is not for your scene"));
        }

        if !self.chats.reject_if_pending(request_id).await? {
            return Err(DomainError::invalid_transition(format!(
                "Request already {}",
                request.status
            )));
        }
        info!(request_id = %request.id, "chat rejected");

        let rejecter_name = self
            .persona_for_scene(by_scene_id)
            .await?
            .map(|p| p.name)
            .unwrap_or_default();

        self.hub
            .send_to_scene(
                request.from_scene_id.clone(),
                WsEvent::ChatRejected {
                    request_id: request.id.clone(),
                    rejecter_name,
                },
            )
            .await;

        Ok(())
    }

    /// Withdraw a pending request sent by `by_scene_id`.
    pub async fn cancel(&self, request_id: &str, by_scene_id: &str) -> DomainResult<()> {
        let request = self.get_request(request_id).await?;

        if request.from_scene_id != by_scene_id {
            return Err(DomainError::forbidden("You didn't send this request"));
        }

        if !self.chats.reject_if_pending(request_id).await? {
            return Err(DomainError::invalid_transition(format!(
                "Request already {}",
                request.status
            )));
        }
        info!(request_id = %request.id, "chat canceled");

        self.hub
            .send_to_scene(
                request.to_scene_id.clone(),
                WsEvent::ChatCanceled {
                    request_id: request.id.clone(),
                },
            )
            .await;

        Ok(())
    }

    /// Post a message inside an accepted, unexpired chat `by_scene_id`
    /// participates in.
    pub async fn post_message(
        &self,
        request_id: &str,
        by_scene_id: &str,
        content: String,
    ) -> DomainResult<ChatMessage> {
        if content.trim().is_empty() {
            return Err(DomainError::invalid_argument("Message content is empty"));
        }

        let request = self.get_request(request_id).await?;

        if request.from_scene_id != by_scene_id && request.to_scene_id != by_scene_id {
            return Err(DomainError::forbidden("You are not part of this chat"));
        }

        if request.status != ChatRequestStatus::Accepted {
            return Err(DomainError::invalid_transition(format!(
                "Chat is not active (status: {})",
                request.status
            )));
        }

        let now = Utc::now();
        if request.expires_at.is_none_or(|deadline| now >= deadline) {
            return Err(DomainError::invalid_transition("Chat has expired"));
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            chat_request_id: request.id.clone(),
            from_scene_id: by_scene_id.to_string(),
            content,
            created_at: now,
        };
        self.chats.insert_message(&message).await?;

        let other_scene_id = if by_scene_id == request.to_scene_id {
            request.from_scene_id.clone()
        } else {
            request.to_scene_id.clone()
        };

        self.hub
            .send_to_scene(
                other_scene_id,
                WsEvent::ChatMessage {
                    message_id: message.id.clone(),
                    request_id: request.id.clone(),
                    from_scene_id: message.from_scene_id.clone(),
                    content: message.content.clone(),
                    created_at: message.created_at,
                },
            )
            .await;

        Ok(message)
    }

    /// Messages of a chat `by_scene_id` participates in.
    pub async fn messages(
        &self,
        request_id: &str,
        by_scene_id: &str,
    ) -> DomainResult<Vec<ChatMessage>> {
        let request = self.get_request(request_id).await?;

        if request.from_scene_id != by_scene_id && request.to_scene_id != by_scene_id {
            return Err(DomainError::forbidden("You are not part of this chat"));
        }

        Ok(self.chats.list_messages(request_id).await?)
    }

    /// Pending requests addressed to a scene.
    pub async fn inbox(&self, scene_id: &str) -> DomainResult<Vec<ChatRequestWithPersona>> {
        Ok(self.chats.list_inbox(scene_id).await?)
    }

    /// Pending requests sent by a scene.
    pub async fn sent(&self, scene_id: &str) -> DomainResult<Vec<ChatRequestWithPersona>> {
        Ok(self.chats.list_sent(scene_id).await?)
    }

    /// Accepted, unexpired chats a scene participates in.
    pub async fn active_sessions(&self, scene_id: &str) -> DomainResult<Vec<ChatSessionSummary>> {
        Ok(self.chats.list_active_sessions(scene_id, Utc::now()).await?)
    }

    async fn get_request(&self, request_id: &str) -> DomainResult<ChatRequest> {
        self.chats
            .get(request_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Chat request not found"))
    }

    async fn persona_for_scene(
        &self,
        scene_id: &str,
    ) -> DomainResult<Option<crate::persona::Persona>> {
        let Some(scene) = self.scenes.get(scene_id).await? else {
            return Ok(None);
        };
        Ok(self.personas.get(&scene.persona_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::geo::Coordinates;
    use crate::scene::SceneService;
    use crate::user::UserRepository;

    struct Fixture {
        service: ChatService,
        db: Database,
        scene_a: String,
        scene_b: String,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let hub = Hub::spawn();
        let scenes = SceneRepository::new(db.pool().clone());
        let personas = PersonaRepository::new(db.pool().clone());
        let chats = ChatRepository::new(db.pool().clone());
        let service = ChatService::new(chats.clone(), scenes.clone(), personas.clone(), hub.clone());

        let scene_service = SceneService::new(scenes, chats, hub);
        let users = UserRepository::new(db.pool().clone());

        let mut ids = Vec::new();
        for (email, name) in [("a@example.com", "A"), ("b@example.com", "B")] {
            let user = users.get_or_create_by_email(email).await.unwrap();
            let persona = personas.upsert(&user.id, name, "", "").await.unwrap();
            let scene = scene_service
                .start_or_extend(&persona.id, Coordinates::new(10.0, 20.0))
                .await
                .unwrap();
            ids.push(scene.id);
        }

        Fixture {
            service,
            db,
            scene_b: ids.pop().unwrap(),
            scene_a: ids.pop().unwrap(),
        }
    }

    /// Backdate an accepted request's messaging window.
    async fn backdate_expiry(db: &Database, request_id: &str, minutes_ago: i64) {
        let past = Utc::now() - Duration::minutes(minutes_ago);
        sqlx::query("UPDATE chat_requests SET expires_at = ? WHERE id = ?")
            .bind(past)
            .bind(request_id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_propose_to_self_is_invalid() {
        let f = fixture().await;
        let err = f
            .service
            .propose(&f.scene_a, &f.scene_a, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_propose_to_unknown_scene_is_not_found() {
        let f = fixture().await;
        let err = f
            .service
            .propose(&f.scene_a, "no-such-scene", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_propose_conflicts_in_both_directions() {
        let f = fixture().await;
        f.service
            .propose(&f.scene_a, &f.scene_b, Some("hi".to_string()))
            .await
            .unwrap();

        let same_way = f.service.propose(&f.scene_a, &f.scene_b, None).await;
        assert!(matches!(same_way, Err(DomainError::Conflict(_))));

        let other_way = f.service.propose(&f.scene_b, &f.scene_a, None).await;
        assert!(matches!(other_way, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_accept_requires_recipient() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        let err = f.service.accept(&request.id, &f.scene_a).await.unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_accept_sets_five_minute_window() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        let accepted = f.service.accept(&request.id, &f.scene_b).await.unwrap();
        assert_eq!(accepted.status, ChatRequestStatus::Accepted);

        let window = accepted.expires_at.unwrap() - accepted.accepted_at.unwrap();
        assert_eq!(window, Duration::minutes(ACCEPT_WINDOW_MINUTES));
    }

    #[tokio::test]
    async fn test_accept_twice_is_invalid_transition() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        f.service.accept(&request.id, &f.scene_b).await.unwrap();
        let err = f.service.accept(&request.id, &f.scene_b).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_reject_then_accept_is_invalid_transition() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        f.service.reject(&request.id, &f.scene_b).await.unwrap();
        let err = f.service.accept(&request.id, &f.scene_b).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_cancel_requires_sender() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        let err = f.service.cancel(&request.id, &f.scene_b).await.unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        f.service.cancel(&request.id, &f.scene_a).await.unwrap();
    }

    #[tokio::test]
    async fn test_message_on_pending_is_invalid_transition() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();

        let err = f
            .service
            .post_message(&request.id, &f.scene_a, "hello".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_message_by_outsider_is_forbidden() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();
        f.service.accept(&request.id, &f.scene_b).await.unwrap();

        let err = f
            .service
            .post_message(&request.id, "someone-else", "hello".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_message_inside_window_succeeds() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();
        f.service.accept(&request.id, &f.scene_b).await.unwrap();

        let message = f
            .service
            .post_message(&request.id, &f.scene_a, "hello".to_string())
            .await
            .unwrap();
        assert_eq!(message.content, "hello");

        let messages = f.service.messages(&request.id, &f.scene_b).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_message_after_window_is_invalid_transition() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();
        f.service.accept(&request.id, &f.scene_b).await.unwrap();
        backdate_expiry(&f.db, &request.id, 1).await;

        let err = f
            .service
            .post_message(&request.id, &f.scene_a, "too late".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_inbox_and_sent_views() {
        let f = fixture().await;
        f.service
            .propose(&f.scene_a, &f.scene_b, Some("hi there".to_string()))
            .await
            .unwrap();

        let inbox = f.service.inbox(&f.scene_b).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].persona_name, "A");
        assert_eq!(inbox[0].request.message.as_deref(), Some("hi there"));

        let sent = f.service.sent(&f.scene_a).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].persona_name, "B");

        assert!(f.service.inbox(&f.scene_a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_sessions_show_last_message() {
        let f = fixture().await;
        let request = f
            .service
            .propose(&f.scene_a, &f.scene_b, None)
            .await
            .unwrap();
        f.service.accept(&request.id, &f.scene_b).await.unwrap();
        f.service
            .post_message(&request.id, &f.scene_a, "first".to_string())
            .await
            .unwrap();
        f.service
            .post_message(&request.id, &f.scene_b, "second".to_string())
            .await
            .unwrap();

        let sessions = f.service.active_sessions(&f.scene_a).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].other_persona_name, "B");
        assert_eq!(sessions[0].last_message_content.as_deref(), Some("second"));
        assert_eq!(
            sessions[0].last_message_sender_id.as_deref(),
            Some(f.scene_b.as_str())
        );
    }
}
