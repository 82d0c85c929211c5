//! Request handlers.

pub mod auth;
pub mod chat;
pub mod location;
pub mod persona;
pub mod scene;
pub mod system;
