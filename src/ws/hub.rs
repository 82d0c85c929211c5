//! Connection dispatcher: the single owner of all live-connection state.
//!
//! The registry is private to one task that consumes commands from a queue.
//! Registrations, removals and every fan-out are processed in submission
//! order on that task, so no send ever observes a half-updated registry and
//! no caller ever touches the maps directly.
//!
//! Delivery is best-effort: enqueueing onto a connection's send buffer never
//! blocks, and a full buffer drops the event for that one recipient. Clients
//! that suspect a missed notification reconcile through the query endpoints.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::WsEvent;
use crate::geo::{self, Coordinates};

/// Size of the dispatcher command queue.
const COMMAND_BUFFER_SIZE: usize = 256;

/// Size of the per-connection send buffer.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Commands processed by the dispatcher task.
enum Command {
    Connect {
        conn_id: String,
        scene_id: Option<String>,
        sender: mpsc::Sender<WsEvent>,
    },
    Disconnect {
        conn_id: String,
    },
    SendToScene {
        scene_id: String,
        event: WsEvent,
    },
    SendToArea {
        origin: Coordinates,
        radius_meters: f64,
        event: WsEvent,
        exclude: Option<String>,
    },
    UpdateLocation {
        conn_id: String,
        location: Coordinates,
    },
}

/// Handle to the dispatcher. Cheap to clone; all methods enqueue a command
/// and return without waiting for it to be processed.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<Command>,
}

impl Hub {
    /// Spawn the dispatcher task and return a handle to it.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        tokio::spawn(run(rx));
        Self { tx }
    }

    /// Register a connection, optionally grouped under a scene id.
    ///
    /// A duplicate connection id silently replaces the prior entry; the
    /// transport guarantees uniqueness.
    pub async fn connect(&self, conn_id: String, scene_id: Option<String>, sender: mpsc::Sender<WsEvent>) {
        self.submit(Command::Connect {
            conn_id,
            scene_id,
            sender,
        })
        .await;
    }

    /// Remove a connection from the registry. No-op if already absent.
    pub async fn disconnect(&self, conn_id: String) {
        self.submit(Command::Disconnect { conn_id }).await;
    }

    /// Enqueue an event for every connection grouped under `scene_id`.
    /// Silent no-op if nobody is connected for that scene.
    pub async fn send_to_scene(&self, scene_id: String, event: WsEvent) {
        self.submit(Command::SendToScene { scene_id, event }).await;
    }

    /// Enqueue an event for every connection whose last reported location is
    /// within `radius_meters` of `origin`. Connections that never reported a
    /// location are excluded, as is `exclude` when given.
    pub async fn send_to_area(
        &self,
        origin: Coordinates,
        radius_meters: f64,
        event: WsEvent,
        exclude: Option<String>,
    ) {
        self.submit(Command::SendToArea {
            origin,
            radius_meters,
            event,
            exclude,
        })
        .await;
    }

    /// Record a connection's last-known coordinate. Issued only by that
    /// connection's own reader loop.
    pub(crate) async fn update_location(&self, conn_id: String, location: Coordinates) {
        self.submit(Command::UpdateLocation { conn_id, location })
            .await;
    }

    async fn submit(&self, command: Command) {
        // Fails only during shutdown, once the dispatcher task is gone.
        if self.tx.send(command).await.is_err() {
            warn!("dispatcher is gone, dropping command");
        }
    }
}

/// One registered connection.
struct ClientEntry {
    scene_id: Option<String>,
    location: Option<Coordinates>,
    sender: mpsc::Sender<WsEvent>,
}

/// Live-connection state. Owned exclusively by the dispatcher task.
#[derive(Default)]
struct Registry {
    clients: HashMap<String, ClientEntry>,
    scene_clients: HashMap<String, HashSet<String>>,
}

impl Registry {
    fn connect(&mut self, conn_id: String, scene_id: Option<String>, sender: mpsc::Sender<WsEvent>) {
        if let Some(prior) = self.clients.insert(
            conn_id.clone(),
            ClientEntry {
                scene_id: scene_id.clone(),
                location: None,
                sender,
            },
        ) {
            self.remove_from_scene(&conn_id, prior.scene_id.as_deref());
        }

        if let Some(scene_id) = scene_id.clone() {
            self.scene_clients
                .entry(scene_id)
                .or_default()
                .insert(conn_id.clone());
        }

        info!(conn_id = %conn_id, scene_id = ?scene_id, "client connected");
    }

    fn disconnect(&mut self, conn_id: &str) {
        if let Some(entry) = self.clients.remove(conn_id) {
            self.remove_from_scene(conn_id, entry.scene_id.as_deref());
            info!(conn_id = %conn_id, "client disconnected");
        }
    }

    fn remove_from_scene(&mut self, conn_id: &str, scene_id: Option<&str>) {
        if let Some(scene_id) = scene_id {
            if let Some(members) = self.scene_clients.get_mut(scene_id) {
                members.remove(conn_id);
                if members.is_empty() {
                    self.scene_clients.remove(scene_id);
                }
            }
        }
    }

    fn send_to_scene(&self, scene_id: &str, event: WsEvent) {
        let Some(members) = self.scene_clients.get(scene_id) else {
            // The recipient may simply not be connected yet.
            debug!(scene_id = %scene_id, "no clients for targeted send");
            return;
        };

        for conn_id in members {
            if let Some(entry) = self.clients.get(conn_id) {
                deliver(conn_id, entry, event.clone());
            }
        }
    }

    fn send_to_area(
        &self,
        origin: Coordinates,
        radius_meters: f64,
        event: WsEvent,
        exclude: Option<&str>,
    ) {
        for (conn_id, entry) in &self.clients {
            if exclude.is_some_and(|ex| ex == conn_id) {
                continue;
            }

            // Never match connections that have not reported a location.
            let Some(location) = entry.location else {
                continue;
            };

            if geo::distance_meters(location, origin) <= radius_meters {
                deliver(conn_id, entry, event.clone());
            }
        }
    }

    fn update_location(&mut self, conn_id: &str, location: Coordinates) {
        if let Some(entry) = self.clients.get_mut(conn_id) {
            entry.location = Some(location);
        }
    }
}

/// Non-blocking enqueue onto one connection's send buffer. A full buffer
/// drops the event for that recipient; a closed one is cleaned up by the
/// disconnect path.
fn deliver(conn_id: &str, entry: &ClientEntry, event: WsEvent) {
    match entry.sender.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(conn_id = %conn_id, "send buffer full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(conn_id = %conn_id, "send buffer closed, dropping event");
        }
    }
}

async fn run(mut rx: mpsc::Receiver<Command>) {
    let mut registry = Registry::default();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Connect {
                conn_id,
                scene_id,
                sender,
            } => registry.connect(conn_id, scene_id, sender),
            Command::Disconnect { conn_id } => registry.disconnect(&conn_id),
            Command::SendToScene { scene_id, event } => registry.send_to_scene(&scene_id, event),
            Command::SendToArea {
                origin,
                radius_meters,
                event,
                exclude,
            } => registry.send_to_area(origin, radius_meters, event, exclude.as_deref()),
            Command::UpdateLocation { conn_id, location } => {
                registry.update_location(&conn_id, location)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, timeout};

    fn ended(scene_id: &str) -> WsEvent {
        WsEvent::PresenceEnded {
            scene_id: scene_id.to_string(),
        }
    }

    async fn register(hub: &Hub, conn_id: &str, scene_id: Option<&str>) -> mpsc::Receiver<WsEvent> {
        let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
        hub.connect(conn_id.to_string(), scene_id.map(String::from), tx)
            .await;
        rx
    }

    async fn recv(rx: &mut mpsc::Receiver<WsEvent>) -> WsEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_targeted_send_reaches_scene_group_only() {
        let hub = Hub::spawn();
        let mut a = register(&hub, "conn-a", Some("scene-a")).await;
        let mut b = register(&hub, "conn-b", Some("scene-b")).await;

        hub.send_to_scene("scene-a".to_string(), ended("scene-a"))
            .await;
        assert_eq!(recv(&mut a).await, ended("scene-a"));

        // Flush a sentinel through b's own group; commands are ordered, so
        // once it arrives we know b saw nothing from the earlier send.
        hub.send_to_scene("scene-b".to_string(), ended("sentinel"))
            .await;
        assert_eq!(recv(&mut b).await, ended("sentinel"));
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_send_to_empty_group_is_noop() {
        let hub = Hub::spawn();
        let mut a = register(&hub, "conn-a", Some("scene-a")).await;

        hub.send_to_scene("scene-nobody".to_string(), ended("x"))
            .await;
        hub.send_to_scene("scene-a".to_string(), ended("sentinel"))
            .await;
        assert_eq!(recv(&mut a).await, ended("sentinel"));
    }

    #[tokio::test]
    async fn test_area_send_filters_by_radius() {
        let hub = Hub::spawn();
        let origin = Coordinates::new(10.0, 20.0);

        // ~3 km north of the origin
        let mut near = register(&hub, "conn-near", Some("scene-near")).await;
        hub.update_location("conn-near".to_string(), Coordinates::new(10.027, 20.0))
            .await;

        // ~8 km north of the origin
        let mut far = register(&hub, "conn-far", Some("scene-far")).await;
        hub.update_location("conn-far".to_string(), Coordinates::new(10.072, 20.0))
            .await;

        // never reported a location
        let mut silent = register(&hub, "conn-silent", Some("scene-silent")).await;

        hub.send_to_area(origin, 5_000.0, ended("area"), None).await;
        assert_eq!(recv(&mut near).await, ended("area"));

        hub.send_to_scene("scene-far".to_string(), ended("sentinel"))
            .await;
        assert_eq!(recv(&mut far).await, ended("sentinel"));
        assert!(far.try_recv().is_err());

        hub.send_to_scene("scene-silent".to_string(), ended("sentinel"))
            .await;
        assert_eq!(recv(&mut silent).await, ended("sentinel"));
        assert!(silent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_area_send_skips_excluded_connection() {
        let hub = Hub::spawn();
        let origin = Coordinates::new(0.0, 0.0);

        let mut a = register(&hub, "conn-a", Some("scene-a")).await;
        hub.update_location("conn-a".to_string(), origin).await;

        hub.send_to_area(origin, 1_000.0, ended("area"), Some("conn-a".to_string()))
            .await;
        hub.send_to_scene("scene-a".to_string(), ended("sentinel"))
            .await;
        assert_eq!(recv(&mut a).await, ended("sentinel"));
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_after_send_observes_the_send() {
        let hub = Hub::spawn();
        let mut a = register(&hub, "conn-a", Some("scene-a")).await;

        hub.send_to_scene("scene-a".to_string(), ended("first"))
            .await;
        hub.disconnect("conn-a".to_string()).await;
        hub.send_to_scene("scene-a".to_string(), ended("second"))
            .await;

        assert_eq!(recv(&mut a).await, ended("first"));
        // The disconnect closed the buffer, so nothing sent afterwards arrives.
        let closed = timeout(Duration::from_secs(1), a.recv())
            .await
            .expect("timed out waiting for close");
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_connect_replaces_prior_entry() {
        let hub = Hub::spawn();
        let mut first = register(&hub, "conn-a", Some("scene-a")).await;
        let mut second = register(&hub, "conn-a", Some("scene-a")).await;

        hub.send_to_scene("scene-a".to_string(), ended("after-replace"))
            .await;
        assert_eq!(recv(&mut second).await, ended("after-replace"));
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_send_buffer_drops_events() {
        let hub = Hub::spawn();
        let (tx, mut rx) = mpsc::channel(1);
        hub.connect("conn-slow".to_string(), Some("scene-s".to_string()), tx)
            .await;

        hub.send_to_scene("scene-s".to_string(), ended("kept"))
            .await;
        hub.send_to_scene("scene-s".to_string(), ended("dropped"))
            .await;
        // A sentinel on a second connection tells us both sends were processed.
        let mut probe = register(&hub, "conn-probe", Some("scene-p")).await;
        hub.send_to_scene("scene-p".to_string(), ended("sentinel"))
            .await;
        assert_eq!(recv(&mut probe).await, ended("sentinel"));

        assert_eq!(recv(&mut rx).await, ended("kept"));
        assert!(rx.try_recv().is_err());
    }
}
