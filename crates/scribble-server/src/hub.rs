//! The coordinator loop.
//!
//! Every room mutation happens on the single task running [`Hub::run`]. It
//! drains one inbound queue, so the order in which connection events reach
//! that queue is the total order of operations for every room. Connection
//! tasks own the sockets; they talk to the hub through a [`HubHandle`] and
//! receive their frames on a per-connection outbox.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use scribble_core::{ClientMessage, ConnectionId, Delivery, RoomId, RoomRegistry, SessionCoordinator};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{INBOX_CAPACITY, ServerConfig};

/// Frames queued for one connection.
pub type Outbox = mpsc::UnboundedReceiver<Utf8Bytes>;

/// Events a connection task feeds to the hub.
#[derive(Debug)]
enum Inbound {
    Connected(ConnectionId),
    Message {
        conn: ConnectionId,
        message: ClientMessage,
    },
    /// A frame that failed boundary checks. Queued like any other event so
    /// the `error` reply keeps its place among the sender's replies.
    Rejected {
        conn: ConnectionId,
        reason: String,
    },
    Disconnected(ConnectionId),
    Stats(oneshot::Sender<HubStats>),
}

/// Snapshot served on `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Room ids, sorted.
    pub rooms: Vec<RoomId>,
    pub connections: usize,
}

/// The hub has shut down and accepts no more events.
#[derive(Debug, Clone, Copy)]
pub struct HubClosed;

/// Outbox senders, shared between connection tasks (register/unregister) and
/// the hub (delivery).
type Outboxes = DashMap<ConnectionId, mpsc::UnboundedSender<Utf8Bytes>>;

/// Cloneable handle used by connection tasks.
#[derive(Clone)]
pub struct HubHandle {
    inbox: mpsc::Sender<Inbound>,
    outboxes: Arc<Outboxes>,
}

impl HubHandle {
    /// Register a new connection and return its id and outbox.
    pub async fn connect(&self) -> Result<(ConnectionId, Outbox), HubClosed> {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.insert(conn, tx);
        if self.inbox.send(Inbound::Connected(conn)).await.is_err() {
            self.outboxes.remove(&conn);
            return Err(HubClosed);
        }
        Ok((conn, rx))
    }

    /// Queue a decoded message from `conn`.
    pub async fn send(&self, conn: ConnectionId, message: ClientMessage) -> Result<(), HubClosed> {
        self.inbox
            .send(Inbound::Message { conn, message })
            .await
            .map_err(|_| HubClosed)
    }

    /// Queue an `error` reply for a frame that failed to decode or validate.
    pub async fn reject(&self, conn: ConnectionId, err: impl std::fmt::Display) -> Result<(), HubClosed> {
        self.inbox
            .send(Inbound::Rejected {
                conn,
                reason: err.to_string(),
            })
            .await
            .map_err(|_| HubClosed)
    }

    /// Unregister `conn`; the hub then removes it from its room.
    pub async fn disconnect(&self, conn: ConnectionId) {
        self.outboxes.remove(&conn);
        let _ = self.inbox.send(Inbound::Disconnected(conn)).await;
    }

    /// Ask the hub for its current rooms and connection count.
    pub async fn stats(&self) -> Result<HubStats, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(Inbound::Stats(tx)).await.map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }
}

/// Owns the [`SessionCoordinator`] and runs it.
pub struct Hub {
    coordinator: SessionCoordinator,
    inbox: mpsc::Receiver<Inbound>,
    outboxes: Arc<Outboxes>,
}

impl Hub {
    pub fn new(config: &ServerConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let outboxes = Arc::new(Outboxes::new());
        let coordinator = SessionCoordinator::new(RoomRegistry::new(config.undo_policy))
            .with_max_points(config.max_points);

        let hub = Self {
            coordinator,
            inbox: rx,
            outboxes: outboxes.clone(),
        };
        let handle = HubHandle {
            inbox: tx,
            outboxes,
        };
        (hub, handle)
    }

    /// Process events until every handle is dropped.
    pub async fn run(mut self) {
        info!(
            "Hub running ({} undo)",
            self.coordinator.registry().policy()
        );
        while let Some(event) = self.inbox.recv().await {
            let deliveries = match event {
                Inbound::Connected(conn) => {
                    self.coordinator.connect(conn);
                    Vec::new()
                }
                Inbound::Message { conn, message } => self.coordinator.handle(conn, message),
                Inbound::Rejected { conn, reason } => vec![Delivery::error(conn, reason)],
                Inbound::Disconnected(conn) => self.coordinator.disconnect(conn),
                Inbound::Stats(reply) => {
                    let _ = reply.send(self.stats());
                    Vec::new()
                }
            };
            for delivery in deliveries {
                deliver(&self.outboxes, delivery);
            }
        }
        info!("Hub stopped");
    }

    fn stats(&self) -> HubStats {
        let mut rooms: Vec<RoomId> = self
            .coordinator
            .registry()
            .room_ids()
            .map(str::to_string)
            .collect();
        rooms.sort_unstable();
        HubStats {
            rooms,
            connections: self.coordinator.connection_count(),
        }
    }
}

/// Encode once and queue the frame for every target still connected.
fn deliver(outboxes: &Outboxes, delivery: Delivery) {
    let text = match delivery.message.encode() {
        Ok(json) => Utf8Bytes::from(json),
        Err(e) => {
            warn!("Failed to encode {:?}: {}", delivery.message, e);
            return;
        }
    };
    for target in &delivery.targets {
        match outboxes.get(target) {
            Some(outbox) => {
                let _ = outbox.send(text.clone());
            }
            None => debug!("Dropping frame for closed connection {}", target),
        }
    }
}
