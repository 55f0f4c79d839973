//! The set of live rooms.

use std::collections::HashMap;

use log::info;

use crate::protocol::RoomId;
use crate::room::{Room, UndoPolicy};

/// Owns every room. Rooms are created on first reference and never removed.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    /// Policy given to rooms created from now on.
    policy: UndoPolicy,
}

impl RoomRegistry {
    pub fn new(policy: UndoPolicy) -> Self {
        Self {
            rooms: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> UndoPolicy {
        self.policy
    }

    /// Get or create a room
    pub fn get_or_create(&mut self, room_id: &str) -> &mut Room {
        let policy = self.policy;
        self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Created room {} ({} undo)", room_id, policy);
            Room::new(room_id, policy)
        })
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Ids of every room created so far, in no particular order.
    pub fn room_ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }
}
