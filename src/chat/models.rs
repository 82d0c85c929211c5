//! Chat data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Where a chat request sits in its life.
///
/// `pending` exits to `accepted` or `rejected` (reject and cancel both land
/// there) or, when nobody answers, to `expired`. `accepted` only ever exits
/// to `expired`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRequestStatus {
    /// Waiting for the recipient's answer.
    Pending,
    /// Messaging is open until the expiry deadline.
    Accepted,
    /// Declined by the recipient or withdrawn by the sender.
    Rejected,
    /// Ran out its window; messages are deleted.
    Expired,
}

impl std::fmt::Display for ChatRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRequestStatus::Pending => write!(f, "pending"),
            ChatRequestStatus::Accepted => write!(f, "accepted"),
            ChatRequestStatus::Rejected => write!(f, "rejected"),
            ChatRequestStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ChatRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ChatRequestStatus::Pending),
            "accepted" => Ok(ChatRequestStatus::Accepted),
            "rejected" => Ok(ChatRequestStatus::Rejected),
            "expired" => Ok(ChatRequestStatus::Expired),
            _ => Err(format!("unknown chat request status: {}", s)),
        }
    }
}

impl TryFrom<String> for ChatRequestStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A negotiation between two scenes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatRequest {
    /// Unique request ID.
    pub id: String,
    /// Proposing scene.
    pub from_scene_id: String,
    /// Receiving scene.
    pub to_scene_id: String,
    /// Optional opening text shown with the proposal.
    pub message: Option<String>,
    /// Current state.
    #[sqlx(try_from = "String")]
    pub status: ChatRequestStatus,
    /// When the request was accepted.
    pub accepted_at: Option<DateTime<Utc>>,
    /// End of the messaging window; meaningful once accepted.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
}

/// A message inside an accepted chat. Immutable once created; owned by its
/// request and deleted with it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: String,
    pub chat_request_id: String,
    pub from_scene_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A request joined with the counterpart's persona, for inbox/outbox views.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChatRequestWithPersona {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: ChatRequest,
    pub persona_name: String,
    pub persona_avatar: String,
    pub persona_description: String,
}

/// An active chat with the other party's persona and the latest message.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChatSessionSummary {
    pub request_id: String,
    pub from_scene_id: String,
    pub to_scene_id: String,
    pub expires_at: DateTime<Utc>,
    pub other_persona_name: String,
    pub other_persona_avatar: String,
    pub other_persona_description: String,
    pub last_message_content: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ChatRequestStatus::Pending,
            ChatRequestStatus::Accepted,
            ChatRequestStatus::Rejected,
            ChatRequestStatus::Expired,
        ] {
            assert_eq!(status.to_string().parse::<ChatRequestStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!("canceled".parse::<ChatRequestStatus>().is_err());
    }
}
