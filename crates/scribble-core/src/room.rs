//! Authoritative state of one room: operation log, retraction bookkeeping and roster.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol::{CanonicalOperation, Member, OperationId, RoomId, UserId};

/// How `undo`/`redo` choose what to retract and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndoPolicy {
    /// Each user retracts only their own actions. Retracted entries stay in the
    /// log, hidden, so a redo restores them at their original position.
    #[default]
    PerUser,
    /// Anyone retracts the most recent action in the room. Retracted entries
    /// leave the log and a redo re-appends them at the end.
    Global,
}

impl fmt::Display for UndoPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerUser => f.write_str("per-user"),
            Self::Global => f.write_str("global"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown undo policy `{0}`, expected `per-user` or `global`")]
pub struct UnknownUndoPolicy(String);

impl FromStr for UndoPolicy {
    type Err = UnknownUndoPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-user" | "per_user" | "peruser" => Ok(Self::PerUser),
            "global" => Ok(Self::Global),
            _ => Err(UnknownUndoPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
enum Retraction {
    PerUser {
        hidden: HashSet<OperationId>,
        /// Retracted ids per user, most recent last.
        stacks: HashMap<UserId, Vec<OperationId>>,
    },
    Global {
        /// Entries removed from the log, most recent last.
        stack: Vec<CanonicalOperation>,
    },
}

impl Retraction {
    fn new(policy: UndoPolicy) -> Self {
        match policy {
            UndoPolicy::PerUser => Self::PerUser {
                hidden: HashSet::new(),
                stacks: HashMap::new(),
            },
            UndoPolicy::Global => Self::Global { stack: Vec::new() },
        }
    }
}

#[derive(Debug, Clone)]
struct RosterEntry {
    member: Member,
    /// Live connections joined under this user id.
    connections: usize,
}

/// One room. Created empty on first join and kept for the process lifetime.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    /// Committed strokes and erases in arrival order. Never holds undo/redo.
    operations: Vec<CanonicalOperation>,
    retraction: Retraction,
    /// Members in join order.
    roster: Vec<RosterEntry>,
}

impl Room {
    pub fn new(id: impl Into<RoomId>, policy: UndoPolicy) -> Self {
        Self {
            id: id.into(),
            operations: Vec::new(),
            retraction: Retraction::new(policy),
            roster: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn policy(&self) -> UndoPolicy {
        match self.retraction {
            Retraction::PerUser { .. } => UndoPolicy::PerUser,
            Retraction::Global { .. } => UndoPolicy::Global,
        }
    }

    /// The full log, retracted entries included.
    pub fn operations(&self) -> &[CanonicalOperation] {
        &self.operations
    }

    /// Whether `id` is currently retracted.
    #[cfg(test)]
    pub(crate) fn is_hidden(&self, id: &OperationId) -> bool {
        match &self.retraction {
            Retraction::PerUser { hidden, .. } => hidden.contains(id),
            Retraction::Global { stack } => stack.iter().any(|op| &op.id == id),
        }
    }

    /// Iterate the visible drawing state in log order.
    pub fn visible_iter(&self) -> impl Iterator<Item = &CanonicalOperation> {
        let hidden = match &self.retraction {
            Retraction::PerUser { hidden, .. } => Some(hidden),
            Retraction::Global { .. } => None,
        };
        self.operations
            .iter()
            .filter(move |op| hidden.is_none_or(|hidden| !hidden.contains(&op.id)))
    }

    /// Snapshot of the visible drawing state, as carried by a resync.
    pub fn visible(&self) -> Vec<CanonicalOperation> {
        self.visible_iter().cloned().collect()
    }

    /// Check if `user` has anything to redo.
    #[cfg(test)]
    pub(crate) fn can_redo(&self, user: &str) -> bool {
        match &self.retraction {
            Retraction::PerUser { stacks, .. } => stacks.get(user).is_some_and(|s| !s.is_empty()),
            Retraction::Global { stack } => !stack.is_empty(),
        }
    }

    // --- Log transitions (driven by the applier) ---

    /// Append a canonical stroke or erase. Under the per-user policy this
    /// discards the actor's pending redo history. The global stack is kept, so
    /// a later redo lands after the new entry.
    pub(crate) fn commit(&mut self, op: CanonicalOperation) {
        debug_assert!(op.is_drawing());
        if let Retraction::PerUser { stacks, .. } = &mut self.retraction {
            if let Some(stack) = stacks.get_mut(&op.user) {
                stack.clear();
            }
        }
        self.operations.push(op);
    }

    /// Retract the most recent eligible action.
    /// Returns the retracted id, or `None` if nothing was eligible.
    pub(crate) fn retract(&mut self, user: &str) -> Option<OperationId> {
        match &mut self.retraction {
            Retraction::PerUser { hidden, stacks } => {
                let id = self
                    .operations
                    .iter()
                    .rev()
                    .find(|op| op.user == user && !hidden.contains(&op.id))?
                    .id;
                hidden.insert(id);
                stacks.entry(user.to_string()).or_default().push(id);
                Some(id)
            }
            Retraction::Global { stack } => {
                let op = self.operations.pop()?;
                let id = op.id;
                stack.push(op);
                Some(id)
            }
        }
    }

    /// Restore the most recently retracted action.
    /// Returns the restored id, or `None` if there was nothing to restore.
    pub(crate) fn restore(&mut self, user: &str) -> Option<OperationId> {
        match &mut self.retraction {
            Retraction::PerUser { hidden, stacks } => {
                let id = stacks.get_mut(user)?.pop()?;
                hidden.remove(&id);
                Some(id)
            }
            Retraction::Global { stack } => {
                let op = stack.pop()?;
                let id = op.id;
                self.operations.push(op);
                Some(id)
            }
        }
    }

    // --- Roster ---

    /// Add a member, or refresh the name and color of one already present.
    pub fn add_member(&mut self, member: Member) {
        match self.roster.iter_mut().find(|e| e.member.id == member.id) {
            Some(entry) => {
                entry.member = member;
                entry.connections += 1;
            }
            None => self.roster.push(RosterEntry {
                member,
                connections: 1,
            }),
        }
    }

    /// Drop one connection of `user`. The entry disappears with its last
    /// connection. Returns the member as it was known, `None` if unknown.
    pub fn remove_member(&mut self, user: &str) -> Option<Member> {
        let index = self.roster.iter().position(|e| e.member.id == user)?;
        let entry = &mut self.roster[index];
        entry.connections = entry.connections.saturating_sub(1);
        if entry.connections == 0 {
            Some(self.roster.remove(index).member)
        } else {
            Some(entry.member.clone())
        }
    }

    pub fn member(&self, user: &str) -> Option<&Member> {
        self.roster
            .iter()
            .find(|e| e.member.id == user)
            .map(|e| &e.member)
    }

    /// Current roster in join order.
    pub fn members(&self) -> Vec<Member> {
        self.roster.iter().map(|e| e.member.clone()).collect()
    }
}
