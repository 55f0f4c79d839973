//! Scribble Core Library
//!
//! The authoritative side of a shared canvas: per-room operation logs, the
//! undo/redo state machine over those logs, and the session logic that decides
//! what every connected client receives.
//!
//! Nothing in here performs I/O. The [`SessionCoordinator`] turns inbound
//! [`ClientMessage`]s into [`Delivery`] lists and leaves the actual sending to
//! the transport that hosts it.

pub mod applier;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod session;
pub mod stamp;

pub use applier::apply;
pub use protocol::{
    CanonicalOperation, ClientMessage, ClientOperation, ConnectionId, CursorUpdate, JoinRequest,
    Member, OperationId, OperationKind, Point, ProtocolError, RoomId, ServerMessage, UserId,
};
pub use registry::RoomRegistry;
pub use room::{Room, UndoPolicy, UnknownUndoPolicy};
pub use session::{Delivery, SessionCoordinator, SessionError};
pub use stamp::{SequenceStamper, Stamper, SystemStamper};
