//! Real-time notification layer: connection dispatcher, per-socket pumps and
//! the wire protocol.

pub mod hub;
pub mod session;
pub mod types;

pub use hub::Hub;
pub use session::ws_handler;
pub use types::{ClientFrame, WsEvent};
