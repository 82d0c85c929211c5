//! Chat lifecycle: negotiated, time-bounded message exchange between scenes.

mod models;
mod repository;
mod service;

pub use models::{
    ChatMessage, ChatRequest, ChatRequestStatus, ChatRequestWithPersona, ChatSessionSummary,
};
pub use repository::ChatRepository;
pub use service::{ACCEPT_WINDOW_MINUTES, ChatService, PENDING_RESPONSE_WINDOW_MINUTES};
