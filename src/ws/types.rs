//! WebSocket message types for real-time notifications.
//!
//! Events are serialized as `{"kind": "...", "data": {...}}` tagged records.
//! Each variant carries only the fields relevant to its kind, so handling on
//! either side stays exhaustive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Events (Server -> Client)
// ============================================================================

/// Events pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum WsEvent {
    /// A nearby scene started or refreshed its presence.
    #[serde(rename = "presence.started")]
    PresenceStarted {
        scene_id: String,
        latitude: f64,
        longitude: f64,
    },

    /// A nearby scene ended (owner stop or TTL expiry).
    #[serde(rename = "presence.ended")]
    PresenceEnded { scene_id: String },

    /// A chat request arrived for the receiving scene.
    #[serde(rename = "chat.proposed")]
    ChatProposed {
        request_id: String,
        from_scene_id: String,
        from_persona_name: String,
        from_persona_avatar: String,
        from_persona_description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        created_at: DateTime<Utc>,
    },

    /// A chat request was accepted; messaging is open until `expires_at`.
    #[serde(rename = "chat.accepted")]
    ChatAccepted {
        request_id: String,
        from_scene_id: String,
        to_scene_id: String,
        expires_at: DateTime<Utc>,
    },

    /// A chat request was rejected by its recipient.
    #[serde(rename = "chat.rejected")]
    ChatRejected {
        request_id: String,
        rejecter_name: String,
    },

    /// A chat request was withdrawn by its sender.
    #[serde(rename = "chat.canceled")]
    ChatCanceled { request_id: String },

    /// A message was posted in an accepted chat.
    #[serde(rename = "chat.message")]
    ChatMessage {
        message_id: String,
        request_id: String,
        from_scene_id: String,
        content: String,
        created_at: DateTime<Utc>,
    },

    /// An accepted chat ran out its window; its messages are gone.
    #[serde(rename = "chat.expired")]
    ChatExpired {
        request_id: String,
        from_scene_id: String,
        to_scene_id: String,
    },

    /// Liveness reply to a client `heartbeat.ping`.
    #[serde(rename = "heartbeat.pong")]
    HeartbeatPong,
}

// ============================================================================
// Frames (Client -> Server)
// ============================================================================

/// Frames recognized from clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum ClientFrame {
    /// Application-level liveness probe; answered with `heartbeat.pong`.
    #[serde(rename = "heartbeat.ping")]
    HeartbeatPing,

    /// The client moved; updates the connection's last-known coordinate.
    #[serde(rename = "location.update")]
    LocationUpdate { latitude: f64, longitude: f64 },
}
