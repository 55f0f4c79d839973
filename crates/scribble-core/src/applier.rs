//! The room state transition function.

use log::{debug, trace};

use crate::protocol::{CanonicalOperation, ClientOperation};
use crate::room::Room;
use crate::stamp::Stamper;

/// Apply a validated client operation on behalf of `user`.
///
/// Every call yields a canonical operation with a fresh id and timestamp, even
/// an undo or redo that found nothing to act on. Strokes and erases are
/// appended to the log; undo and redo only move entries between the visible
/// and retracted sets, and their canonical form is never stored.
pub fn apply<S: Stamper + ?Sized>(
    room: &mut Room,
    op: ClientOperation,
    user: &str,
    stamper: &mut S,
) -> CanonicalOperation {
    let canonical = CanonicalOperation {
        id: stamper.next_id(),
        user: user.to_string(),
        timestamp: stamper.now_millis(),
        op,
    };

    match &canonical.op {
        ClientOperation::Stroke { .. } | ClientOperation::Erase { .. } => {
            debug!(
                "room {}: {} committed {:?} {}",
                room.id(),
                user,
                canonical.kind(),
                canonical.id
            );
            room.commit(canonical.clone());
        }
        ClientOperation::Undo => match room.retract(user) {
            Some(id) => debug!("room {}: {} retracted {}", room.id(), user, id),
            None => trace!("room {}: nothing to undo for {}", room.id(), user),
        },
        ClientOperation::Redo => match room.restore(user) {
            Some(id) => debug!("room {}: {} restored {}", room.id(), user, id),
            None => trace!("room {}: nothing to redo for {}", room.id(), user),
        },
    }

    canonical
}
