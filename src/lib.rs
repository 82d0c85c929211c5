//! Sceneon backend library.
//!
//! Core components for the ephemeral presence and consensual chat backend:
//! the WebSocket dispatcher, the scene and chat lifecycles, and the
//! reconciliation worker, plus the HTTP API that exposes them.

pub mod api;
pub mod auth;
pub mod chat;
pub mod db;
pub mod error;
pub mod geo;
pub mod location;
pub mod persona;
pub mod reconcile;
pub mod scene;
pub mod user;
pub mod ws;
