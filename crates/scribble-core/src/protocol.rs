//! Wire protocol between canvas clients and the room authority.
//!
//! Every frame is a JSON object tagged with `type`:
//! ```json
//! { "type": "join", "roomId": "lobby", "userId": "alice", "name": "Alice" }
//! { "type": "op", "op": { "kind": "stroke", "color": "#f00", "width": 3, "points": [[0, 0], [10, 10]] } }
//! { "type": "cursor", "x": 120.5, "y": 48.0, "color": "#f00" }
//! { "type": "leave" }
//! ```
//!
//! The authority answers with `sync`, `op`, `cursor`, `presence` and `error`
//! frames (see [`ServerMessage`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Room used when a join request names none.
pub const DEFAULT_ROOM: &str = "default";

/// Color given to members that join without one.
pub const DEFAULT_COLOR: &str = "#0ea5e9";

/// Upper bound on points carried by a single stroke or erase.
pub const MAX_POINTS_PER_OPERATION: usize = 10_000;

/// Identifier of a room.
pub type RoomId = String;

/// Identifier of a user. Supplied by the client on join or derived from the connection.
pub type UserId = String;

/// Authority-assigned identifier of a canonical operation.
pub type OperationId = Uuid;

/// Identifier of one transport connection.
pub type ConnectionId = Uuid;

/// Boundary errors: anything that stops an inbound frame from reaching the applier.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Binary frames are not supported")]
    BinaryFrame,
    #[error("Width must be a positive finite number, got {0}")]
    InvalidWidth(f64),
    #[error("Point {index} has a non-finite coordinate")]
    NonFinitePoint { index: usize },
    #[error("Operation carries {count} points, the limit is {limit}")]
    TooManyPoints { count: usize, limit: usize },
    #[error("Stroke color must not be empty")]
    EmptyColor,
    #[error("Cursor position must be finite")]
    NonFiniteCursor,
}

/// A position in canvas space. Encoded as `[x, y]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(point: Point) -> Self {
        [point.x, point.y]
    }
}

/// One drawing or control action as sent by a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientOperation {
    /// A freehand line.
    Stroke {
        color: String,
        width: f64,
        points: Vec<Point>,
    },
    /// A freehand erase path.
    Erase { width: f64, points: Vec<Point> },
    /// Retract the most recent drawing action.
    Undo,
    /// Restore the most recently retracted action.
    Redo,
}

/// Discriminant of [`ClientOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Stroke,
    Erase,
    Undo,
    Redo,
}

impl ClientOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Stroke { .. } => OperationKind::Stroke,
            Self::Erase { .. } => OperationKind::Erase,
            Self::Undo => OperationKind::Undo,
            Self::Redo => OperationKind::Redo,
        }
    }

    /// Whether this operation leaves ink on the canvas (stroke or erase).
    pub fn is_drawing(&self) -> bool {
        matches!(self, Self::Stroke { .. } | Self::Erase { .. })
    }

    /// Check the values serde cannot: finite geometry, sane widths, bounded size.
    pub fn validate(&self, max_points: usize) -> Result<(), ProtocolError> {
        let (width, points) = match self {
            Self::Stroke {
                color,
                width,
                points,
            } => {
                if color.trim().is_empty() {
                    return Err(ProtocolError::EmptyColor);
                }
                (*width, points)
            }
            Self::Erase { width, points } => (*width, points),
            Self::Undo | Self::Redo => return Ok(()),
        };

        if !width.is_finite() || width <= 0.0 {
            return Err(ProtocolError::InvalidWidth(width));
        }
        if points.len() > max_points {
            return Err(ProtocolError::TooManyPoints {
                count: points.len(),
                limit: max_points,
            });
        }
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(ProtocolError::NonFinitePoint { index });
        }
        Ok(())
    }
}

/// An operation stamped by the authority. The only form that is stored or broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOperation {
    pub id: OperationId,
    pub user: UserId,
    /// Milliseconds since the Unix epoch, never decreasing across a process lifetime.
    #[serde(rename = "t")]
    pub timestamp: u64,
    #[serde(flatten)]
    pub op: ClientOperation,
}

impl CanonicalOperation {
    pub fn kind(&self) -> OperationKind {
        self.op.kind()
    }

    pub fn is_drawing(&self) -> bool {
        self.op.is_drawing()
    }
}

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub color: String,
}

/// Payload of a `join` frame. Every field is optional; empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl JoinRequest {
    pub fn room(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: Some(room_id.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Ephemeral pointer position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorUpdate {
    pub x: f64,
    pub y: f64,
    pub color: String,
}

impl CursorUpdate {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.x.is_finite() && self.y.is_finite() {
            Ok(())
        } else {
            Err(ProtocolError::NonFiniteCursor)
        }
    }
}

/// Messages sent to the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join (or switch to) a room
    Join(JoinRequest),
    /// Leave the current room
    Leave,
    /// A drawing action or undo/redo request
    Op { op: ClientOperation },
    /// Pointer position
    Cursor(CursorUpdate),
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent by the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full visible operation sequence; replaces the client's local state
    Sync { ops: Vec<CanonicalOperation> },
    /// One committed stroke or erase
    Op { op: CanonicalOperation },
    /// Another member's pointer position
    Cursor {
        user: UserId,
        x: f64,
        y: f64,
        color: String,
    },
    /// Current roster plus an optional human-readable note
    Presence {
        users: Vec<Member>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    /// Rejected frame; the connection stays open
    Error { message: String },
}

impl ServerMessage {
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
