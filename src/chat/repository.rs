//! Chat database repository.
//!
//! State transitions go through conditional updates (`WHERE status =
//! 'pending'` and friends); the row count tells racing callers apart without
//! any in-process locking.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::{
    ChatMessage, ChatRequest, ChatRequestWithPersona, ChatSessionSummary,
};

/// Repository for chat requests and messages.
#[derive(Debug, Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    /// Create a new repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a request by ID.
    pub async fn get(&self, id: &str) -> Result<Option<ChatRequest>> {
        let request = sqlx::query_as::<_, ChatRequest>(
            r#"
            SELECT id, from_scene_id, to_scene_id, message, status, accepted_at, expires_at, created_at
            FROM chat_requests
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching chat request")?;

        Ok(request)
    }

    /// A pending or accepted request between the unordered scene pair, if
    /// one exists.
    pub async fn find_live_for_pair(&self, a: &str, b: &str) -> Result<Option<ChatRequest>> {
        let request = sqlx::query_as::<_, ChatRequest>(
            r#"
            SELECT id, from_scene_id, to_scene_id, message, status, accepted_at, expires_at, created_at
            FROM chat_requests
            WHERE ((from_scene_id = ? AND to_scene_id = ?) OR (from_scene_id = ? AND to_scene_id = ?))
              AND status IN ('pending', 'accepted')
            LIMIT 1
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_optional(&self.pool)
        .await
        .context("checking for live pair request")?;

        Ok(request)
    }

    /// Create a new request.
    pub async fn create(&self, request: &ChatRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_requests (id, from_scene_id, to_scene_id, message, status, accepted_at, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.from_scene_id)
        .bind(&request.to_scene_id)
        .bind(&request.message)
        .bind(request.status.to_string())
        .bind(request.accepted_at)
        .bind(request.expires_at)
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .context("creating chat request")?;

        Ok(())
    }

    /// Accept a request, but only while still pending. Returns whether this
    /// caller won the transition.
    pub async fn accept_if_pending(
        &self,
        id: &str,
        accepted_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_requests
            SET status = 'accepted', accepted_at = ?, expires_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(accepted_at)
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("accepting chat request")?;

        Ok(result.rows_affected() > 0)
    }

    /// Reject (or cancel) a request, but only while still pending.
    pub async fn reject_if_pending(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chat_requests SET status = 'rejected' WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("rejecting chat request")?;

        Ok(result.rows_affected() > 0)
    }

    /// Expire a request, but only while still accepted.
    pub async fn expire_if_accepted(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chat_requests SET status = 'expired' WHERE id = ? AND status = 'accepted'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("expiring chat request")?;

        Ok(result.rows_affected() > 0)
    }

    /// Accepted requests whose messaging window has lapsed.
    pub async fn list_expired_accepted(&self, now: DateTime<Utc>) -> Result<Vec<ChatRequest>> {
        let requests = sqlx::query_as::<_, ChatRequest>(
            r#"
            SELECT id, from_scene_id, to_scene_id, message, status, accepted_at, expires_at, created_at
            FROM chat_requests
            WHERE status = 'accepted' AND expires_at < ?
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("listing expired accepted requests")?;

        Ok(requests)
    }

    /// Expire pending requests nobody answered before `cutoff`. Returns the
    /// number of rows swept.
    pub async fn expire_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE chat_requests SET status = 'expired' WHERE status = 'pending' AND created_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("expiring stale pending requests")?;

        Ok(result.rows_affected())
    }

    /// Delete terminal requests that turned stale before `cutoff`. The
    /// cutoff compares against the end of the messaging window when there
    /// was one, the creation time otherwise.
    pub async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM chat_requests
            WHERE status IN ('expired', 'rejected')
              AND COALESCE(expires_at, created_at) < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("deleting terminal requests")?;

        Ok(result.rows_affected())
    }

    /// Delete every request referencing a scene, in either direction.
    pub async fn delete_for_scene(&self, scene_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM chat_requests WHERE from_scene_id = ? OR to_scene_id = ?",
        )
        .bind(scene_id)
        .bind(scene_id)
        .execute(&self.pool)
        .await
        .context("deleting chat requests for scene")?;

        Ok(result.rows_affected())
    }

    /// Store a message.
    pub async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, chat_request_id, from_scene_id, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.chat_request_id)
        .bind(&message.from_scene_id)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .context("storing chat message")?;

        Ok(())
    }

    /// Messages of a request, oldest first.
    pub async fn list_messages(&self, request_id: &str) -> Result<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, chat_request_id, from_scene_id, content, created_at
            FROM chat_messages
            WHERE chat_request_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .context("listing chat messages")?;

        Ok(messages)
    }

    /// Delete all messages of a request. Returns the number deleted.
    pub async fn delete_messages(&self, request_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE chat_request_id = ?")
            .bind(request_id)
            .execute(&self.pool)
            .await
            .context("deleting chat messages")?;

        Ok(result.rows_affected())
    }

    /// Pending requests addressed to a scene, newest first, with the
    /// sender's persona.
    pub async fn list_inbox(&self, scene_id: &str) -> Result<Vec<ChatRequestWithPersona>> {
        let requests = sqlx::query_as::<_, ChatRequestWithPersona>(
            r#"
            SELECT cr.id, cr.from_scene_id, cr.to_scene_id, cr.message, cr.status,
                   cr.accepted_at, cr.expires_at, cr.created_at,
                   p.name AS persona_name,
                   p.avatar_url AS persona_avatar,
                   p.description AS persona_description
            FROM chat_requests cr
            JOIN scenes s ON cr.from_scene_id = s.id
            JOIN personas p ON s.persona_id = p.id
            WHERE cr.to_scene_id = ? AND cr.status = 'pending'
            ORDER BY cr.created_at DESC
            "#,
        )
        .bind(scene_id)
        .fetch_all(&self.pool)
        .await
        .context("listing inbox requests")?;

        Ok(requests)
    }

    /// Pending requests sent by a scene, newest first, with the recipient's
    /// persona.
    pub async fn list_sent(&self, scene_id: &str) -> Result<Vec<ChatRequestWithPersona>> {
        let requests = sqlx::query_as::<_, ChatRequestWithPersona>(
            r#"
            SELECT cr.id, cr.from_scene_id, cr.to_scene_id, cr.message, cr.status,
                   cr.accepted_at, cr.expires_at, cr.created_at,
                   p.name AS persona_name,
                   p.avatar_url AS persona_avatar,
                   p.description AS persona_description
            FROM chat_requests cr
            JOIN scenes s ON cr.to_scene_id = s.id
            JOIN personas p ON s.persona_id = p.id
            WHERE cr.from_scene_id = ? AND cr.status = 'pending'
            ORDER BY cr.created_at DESC
            "#,
        )
        .bind(scene_id)
        .fetch_all(&self.pool)
        .await
        .context("listing sent requests")?;

        Ok(requests)
    }

    /// Accepted, unexpired chats a scene participates in, most recently
    /// active first, with the other party's persona and the last message.
    pub async fn list_active_sessions(
        &self,
        scene_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChatSessionSummary>> {
        let sessions = sqlx::query_as::<_, ChatSessionSummary>(
            r#"
            SELECT cr.id AS request_id, cr.from_scene_id, cr.to_scene_id, cr.expires_at,
                   p.name AS other_persona_name,
                   p.avatar_url AS other_persona_avatar,
                   p.description AS other_persona_description,
                   (SELECT cm.content FROM chat_messages cm
                    WHERE cm.chat_request_id = cr.id
                    ORDER BY cm.created_at DESC LIMIT 1) AS last_message_content,
                   (SELECT cm.from_scene_id FROM chat_messages cm
                    WHERE cm.chat_request_id = cr.id
                    ORDER BY cm.created_at DESC LIMIT 1) AS last_message_sender_id,
                   (SELECT cm.created_at FROM chat_messages cm
                    WHERE cm.chat_request_id = cr.id
                    ORDER BY cm.created_at DESC LIMIT 1) AS last_message_at
            FROM chat_requests cr
            JOIN scenes s
              ON s.id = CASE WHEN cr.from_scene_id = ? THEN cr.to_scene_id ELSE cr.from_scene_id END
            JOIN personas p ON s.persona_id = p.id
            WHERE (cr.from_scene_id = ? OR cr.to_scene_id = ?)
              AND cr.status = 'accepted'
              AND cr.expires_at > ?
            ORDER BY COALESCE(last_message_at, cr.accepted_at) DESC
            "#,
        )
        .bind(scene_id)
        .bind(scene_id)
        .bind(scene_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("listing active chat sessions")?;

        Ok(sessions)
    }
}
