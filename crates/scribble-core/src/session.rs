//! Per-connection session logic.
//!
//! The [`SessionCoordinator`] owns the [`RoomRegistry`] and knows which
//! connection sits in which room under which user. Each handler returns the
//! [`Delivery`] list the transport has to send; it never performs I/O itself,
//! so the host only has to feed it events one at a time in arrival order.

use std::collections::HashMap;

use log::{debug, info, warn};
use thiserror::Error;

use crate::applier;
use crate::protocol::{
    ClientMessage, ClientOperation, ConnectionId, CursorUpdate, DEFAULT_COLOR, DEFAULT_ROOM,
    JoinRequest, MAX_POINTS_PER_OPERATION, Member, ProtocolError, RoomId, ServerMessage, UserId,
};
use crate::registry::RoomRegistry;
use crate::stamp::{Stamper, SystemStamper};

/// Session-level errors. Reported to the offending connection only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Join a room before sending operations")]
    NotJoined,
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A message addressed to a set of connections.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub targets: Vec<ConnectionId>,
    pub message: ServerMessage,
}

impl Delivery {
    /// Address a single connection.
    pub fn to(target: ConnectionId, message: ServerMessage) -> Self {
        Self {
            targets: vec![target],
            message,
        }
    }

    /// The `error` reply to a rejected frame.
    pub fn error(target: ConnectionId, err: impl std::fmt::Display) -> Self {
        Self::to(target, ServerMessage::error(err))
    }
}

/// Where a joined connection sits.
#[derive(Debug, Clone)]
struct Membership {
    room: RoomId,
    user: UserId,
}

/// Routes connection events to rooms and decides the broadcast shape.
pub struct SessionCoordinator<S = SystemStamper> {
    registry: RoomRegistry,
    stamper: S,
    /// Every open connection; `None` until it joins a room.
    sessions: HashMap<ConnectionId, Option<Membership>>,
    /// Connections per room, in join order.
    occupants: HashMap<RoomId, Vec<ConnectionId>>,
    max_points: usize,
}

impl SessionCoordinator<SystemStamper> {
    pub fn new(registry: RoomRegistry) -> Self {
        Self::with_stamper(registry, SystemStamper::new())
    }
}

impl<S: Stamper> SessionCoordinator<S> {
    pub fn with_stamper(registry: RoomRegistry, stamper: S) -> Self {
        Self {
            registry,
            stamper,
            sessions: HashMap::new(),
            occupants: HashMap::new(),
            max_points: MAX_POINTS_PER_OPERATION,
        }
    }

    /// Limit the number of points a single stroke or erase may carry.
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Room and user of a joined connection.
    pub fn membership(&self, conn: ConnectionId) -> Option<(&str, &str)> {
        self.sessions
            .get(&conn)?
            .as_ref()
            .map(|m| (m.room.as_str(), m.user.as_str()))
    }

    /// Connections currently in `room`, in join order.
    pub fn occupants(&self, room: &str) -> &[ConnectionId] {
        self.occupants.get(room).map(Vec::as_slice).unwrap_or(&[])
    }

    // --- Connection lifecycle ---

    /// Register a new connection. It receives nothing until it joins.
    pub fn connect(&mut self, conn: ConnectionId) {
        self.sessions.entry(conn).or_insert(None);
    }

    /// Leave the current room (if any) and forget the connection.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Vec<Delivery> {
        let deliveries = self.leave(conn);
        self.sessions.remove(&conn);
        deliveries
    }

    /// Handle one decoded client message. Failures turn into an `error`
    /// delivery for the sender.
    pub fn handle(&mut self, conn: ConnectionId, message: ClientMessage) -> Vec<Delivery> {
        let result = match message {
            ClientMessage::Join(request) => Ok(self.join(conn, request)),
            ClientMessage::Leave => Ok(self.leave(conn)),
            ClientMessage::Op { op } => self.operation(conn, op),
            ClientMessage::Cursor(update) => self.cursor(conn, update),
        };
        result.unwrap_or_else(|err| {
            warn!("Rejected message from {}: {}", conn, err);
            vec![Delivery::error(conn, err)]
        })
    }

    // --- Events ---

    /// Join a room, leaving the previous one first.
    ///
    /// The joiner gets a `sync` with the visible state, then everyone in the
    /// room (joiner included) gets the updated `presence`.
    pub fn join(&mut self, conn: ConnectionId, request: JoinRequest) -> Vec<Delivery> {
        let mut deliveries = self.leave(conn);

        let room_id = non_empty(request.room_id).unwrap_or_else(|| DEFAULT_ROOM.to_string());
        let user = non_empty(request.user_id).unwrap_or_else(|| conn.to_string());
        let member = Member {
            name: non_empty(request.name).unwrap_or_else(|| guest_name(&user)),
            color: non_empty(request.color).unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            id: user.clone(),
        };
        let note = format!("{} joined", member.name);

        let room = self.registry.get_or_create(&room_id);
        room.add_member(member);
        let snapshot = room.visible();
        let users = room.members();

        info!("{} joined room {} as {}", conn, room_id, user);
        self.sessions.insert(
            conn,
            Some(Membership {
                room: room_id.clone(),
                user,
            }),
        );
        self.occupants.entry(room_id.clone()).or_default().push(conn);

        deliveries.push(Delivery::to(conn, ServerMessage::Sync { ops: snapshot }));
        deliveries.push(Delivery {
            targets: self.occupants(&room_id).to_vec(),
            message: ServerMessage::Presence {
                users,
                note: Some(note),
            },
        });
        deliveries
    }

    /// Leave the current room. A no-op for connections that are not in one.
    pub fn leave(&mut self, conn: ConnectionId) -> Vec<Delivery> {
        let Some(membership) = self.sessions.get_mut(&conn).and_then(Option::take) else {
            return Vec::new();
        };

        if let Some(occupants) = self.occupants.get_mut(&membership.room) {
            occupants.retain(|c| *c != conn);
            if occupants.is_empty() {
                self.occupants.remove(&membership.room);
            }
        }

        let room = self.registry.get_or_create(&membership.room);
        let note = match room.remove_member(&membership.user) {
            Some(member) => format!("{} left", member.name),
            None => "someone left".to_string(),
        };
        let users = room.members();
        info!("{} left room {}", conn, membership.room);

        let targets = self.occupants(&membership.room).to_vec();
        if targets.is_empty() {
            return Vec::new();
        }
        vec![Delivery {
            targets,
            message: ServerMessage::Presence {
                users,
                note: Some(note),
            },
        }]
    }

    /// Apply a drawing action or undo/redo from `conn`.
    ///
    /// Strokes and erases go out incrementally as `op`. Undo and redo change
    /// which earlier entries are visible, so they trigger a full `sync`.
    pub fn operation(
        &mut self,
        conn: ConnectionId,
        op: ClientOperation,
    ) -> Result<Vec<Delivery>, SessionError> {
        op.validate(self.max_points)?;
        let Membership { room: room_id, user } = self.joined(conn)?.clone();

        let room = self.registry.get_or_create(&room_id);
        let canonical = applier::apply(room, op, &user, &mut self.stamper);
        let message = if canonical.is_drawing() {
            ServerMessage::Op { op: canonical }
        } else {
            debug!("{:?} in room {}, resyncing", canonical.kind(), room_id);
            ServerMessage::Sync {
                ops: room.visible(),
            }
        };

        Ok(vec![Delivery {
            targets: self.occupants(&room_id).to_vec(),
            message,
        }])
    }

    /// Relay a pointer position to everyone else in the room. Dropped when the
    /// sender has not joined.
    pub fn cursor(
        &mut self,
        conn: ConnectionId,
        update: CursorUpdate,
    ) -> Result<Vec<Delivery>, SessionError> {
        update.validate()?;
        let Ok(Membership { room, user }) = self.joined(conn) else {
            return Ok(Vec::new());
        };

        let targets: Vec<_> = self
            .occupants(room)
            .iter()
            .copied()
            .filter(|c| *c != conn)
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Delivery {
            targets,
            message: ServerMessage::Cursor {
                user: user.clone(),
                x: update.x,
                y: update.y,
                color: update.color,
            },
        }])
    }

    fn joined(&self, conn: ConnectionId) -> Result<&Membership, SessionError> {
        self.sessions
            .get(&conn)
            .ok_or(SessionError::UnknownConnection(conn))?
            .as_ref()
            .ok_or(SessionError::NotJoined)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `guest-` followed by the first four characters of the user id.
fn guest_name(user: &str) -> String {
    let prefix: String = user.chars().take(4).collect();
    format!("guest-{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CanonicalOperation, OperationKind, Point};
    use crate::room::UndoPolicy;
    use crate::stamp::SequenceStamper;
    use uuid::Uuid;

    fn coordinator() -> SessionCoordinator<SequenceStamper> {
        SessionCoordinator::with_stamper(RoomRegistry::default(), SequenceStamper::new())
    }

    fn conn(n: u128) -> ConnectionId {
        Uuid::from_u128(n)
    }

    fn stroke(color: &str) -> ClientOperation {
        ClientOperation::Stroke {
            color: color.to_string(),
            width: 3.0,
            points: vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)],
        }
    }

    fn join(c: &mut SessionCoordinator<SequenceStamper>, id: ConnectionId, user: &str) {
        c.connect(id);
        c.join(id, JoinRequest::room("lobby").with_user(user).with_name(user));
    }

    fn synced(deliveries: &[Delivery]) -> Vec<CanonicalOperation> {
        match deliveries {
            [Delivery {
                message: ServerMessage::Sync { ops },
                ..
            }] => ops.clone(),
            other => panic!("expected a single sync, got {other:?}"),
        }
    }

    #[test]
    fn test_join_sends_sync_then_presence() {
        let mut c = coordinator();
        c.connect(conn(1));
        let out = c.join(conn(1), JoinRequest::room("lobby").with_user("alice"));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Delivery::to(conn(1), ServerMessage::Sync { ops: vec![] }));
        assert_eq!(
            out[1],
            Delivery {
                targets: vec![conn(1)],
                message: ServerMessage::Presence {
                    users: vec![Member {
                        id: "alice".to_string(),
                        name: "guest-alic".to_string(),
                        color: DEFAULT_COLOR.to_string(),
                    }],
                    note: Some("guest-alic joined".to_string()),
                },
            }
        );
        assert_eq!(c.membership(conn(1)), Some(("lobby", "alice")));
    }

    #[test]
    fn test_join_defaults_to_connection_identity() {
        let mut c = coordinator();
        let id = conn(0xabcd_0000_0000_0000_0000_0000_0000_0000);
        c.connect(id);
        c.join(id, JoinRequest::default().with_name(""));

        let (room, user) = c.membership(id).unwrap();
        assert_eq!(room, DEFAULT_ROOM);
        assert_eq!(user, id.to_string());
        let member = c.registry().get(DEFAULT_ROOM).unwrap().member(user).unwrap();
        assert_eq!(member.name, "guest-abcd");
    }

    #[test]
    fn test_stroke_broadcasts_incremental_op() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "bob");

        let out = c.operation(conn(1), stroke("#f00")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].targets, vec![conn(1), conn(2)]);
        match &out[0].message {
            ServerMessage::Op { op } => {
                assert_eq!(op.user, "alice");
                assert_eq!(op.kind(), OperationKind::Stroke);
            }
            other => panic!("expected op, got {other:?}"),
        }
    }

    #[test]
    fn test_late_joiner_receives_existing_strokes() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        c.operation(conn(1), stroke("#f00")).unwrap();

        c.connect(conn(2));
        let out = c.join(conn(2), JoinRequest::room("lobby").with_user("bob"));
        let ops = synced(&out[..1]);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].user, "alice");
        assert_eq!(ops[0].op, stroke("#f00"));
    }

    #[test]
    fn test_undo_and_redo_resync_the_room() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "bob");
        c.operation(conn(1), stroke("s1")).unwrap();
        c.operation(conn(1), stroke("s2")).unwrap();

        let out = c.operation(conn(1), ClientOperation::Undo).unwrap();
        assert_eq!(out[0].targets, vec![conn(1), conn(2)]);
        let ops = synced(&out);
        assert_eq!(ops.iter().map(|o| o.op.clone()).collect::<Vec<_>>(), vec![stroke("s1")]);

        let out = c.operation(conn(1), ClientOperation::Redo).unwrap();
        let ops = synced(&out);
        assert_eq!(
            ops.iter().map(|o| o.op.clone()).collect::<Vec<_>>(),
            vec![stroke("s1"), stroke("s2")]
        );
    }

    #[test]
    fn test_undo_with_nothing_to_retract() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");

        let out = c.operation(conn(1), ClientOperation::Undo).unwrap();
        assert!(synced(&out).is_empty());
    }

    #[test]
    fn test_operation_before_join_is_rejected() {
        let mut c = coordinator();
        c.connect(conn(1));

        let err = c.operation(conn(1), stroke("#f00")).unwrap_err();
        assert!(matches!(err, SessionError::NotJoined));

        let out = c.handle(conn(1), ClientMessage::Op { op: stroke("#f00") });
        assert!(matches!(
            &out[..],
            [Delivery { message: ServerMessage::Error { .. }, .. }]
        ));

        let err = c.operation(conn(9), ClientOperation::Undo).unwrap_err();
        assert!(matches!(err, SessionError::UnknownConnection(_)));
    }

    #[test]
    fn test_invalid_operation_reaches_only_sender() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "bob");

        let bad = ClientOperation::Erase {
            width: -1.0,
            points: Vec::new(),
        };
        let out = c.handle(conn(1), ClientMessage::Op { op: bad });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].targets, vec![conn(1)]);
        assert!(c.registry().get("lobby").unwrap().operations().is_empty());
    }

    #[test]
    fn test_max_points_is_enforced() {
        let mut c = coordinator().with_max_points(1);
        join(&mut c, conn(1), "alice");
        let err = c.operation(conn(1), stroke("#f00")).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol(ProtocolError::TooManyPoints { .. })
        ));
    }

    #[test]
    fn test_cursor_skips_sender_and_other_rooms() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "bob");
        c.connect(conn(3));
        c.join(conn(3), JoinRequest::room("elsewhere").with_user("carol"));

        let update = CursorUpdate {
            x: 5.0,
            y: 6.0,
            color: "#f00".to_string(),
        };
        let out = c.cursor(conn(1), update.clone()).unwrap();
        assert_eq!(
            out,
            vec![Delivery::to(
                conn(2),
                ServerMessage::Cursor {
                    user: "alice".to_string(),
                    x: 5.0,
                    y: 6.0,
                    color: "#f00".to_string(),
                }
            )]
        );

        assert!(c.cursor(conn(3), update.clone()).unwrap().is_empty());
        c.connect(conn(4));
        assert!(c.cursor(conn(4), update).unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_updates_presence_and_keeps_strokes() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "bob");
        c.operation(conn(1), stroke("#f00")).unwrap();

        let out = c.disconnect(conn(1));
        assert_eq!(
            out,
            vec![Delivery::to(
                conn(2),
                ServerMessage::Presence {
                    users: vec![Member {
                        id: "bob".to_string(),
                        name: "bob".to_string(),
                        color: DEFAULT_COLOR.to_string(),
                    }],
                    note: Some("alice left".to_string()),
                }
            )]
        );
        assert_eq!(c.connection_count(), 1);
        assert_eq!(c.registry().get("lobby").unwrap().visible().len(), 1);
        assert_eq!(c.occupants("lobby"), &[conn(2)]);
    }

    #[test]
    fn test_last_leaver_gets_no_presence() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        assert!(c.disconnect(conn(1)).is_empty());
        assert!(c.occupants("lobby").is_empty());
        assert!(c.registry().get("lobby").unwrap().members().is_empty());
    }

    #[test]
    fn test_rejoin_moves_between_rooms() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "bob");

        let out = c.join(conn(2), JoinRequest::room("studio").with_user("bob"));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].targets, vec![conn(1)]);
        assert!(matches!(
            &out[0].message,
            ServerMessage::Presence { note: Some(note), .. } if note == "bob left"
        ));
        assert_eq!(c.occupants("lobby"), &[conn(1)]);
        assert_eq!(c.occupants("studio"), &[conn(2)]);
    }

    #[test]
    fn test_explicit_leave_then_operation_fails() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        c.handle(conn(1), ClientMessage::Leave);

        assert!(c.membership(conn(1)).is_none());
        assert!(matches!(
            c.operation(conn(1), ClientOperation::Undo),
            Err(SessionError::NotJoined)
        ));
    }

    #[test]
    fn test_shared_user_id_stays_present_until_last_connection() {
        let mut c = coordinator();
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "alice");

        let out = c.disconnect(conn(1));
        match &out[0].message {
            ServerMessage::Presence { users, .. } => assert_eq!(users.len(), 1),
            other => panic!("expected presence, got {other:?}"),
        }
    }

    #[test]
    fn test_global_policy_lets_anyone_undo() {
        let mut c = SessionCoordinator::with_stamper(
            RoomRegistry::new(UndoPolicy::Global),
            SequenceStamper::new(),
        );
        join(&mut c, conn(1), "alice");
        join(&mut c, conn(2), "bob");
        c.operation(conn(1), stroke("a1")).unwrap();

        let out = c.operation(conn(2), ClientOperation::Undo).unwrap();
        assert!(synced(&out).is_empty());
    }
}
