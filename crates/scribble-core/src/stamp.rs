//! Identity source for canonical operations.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::protocol::OperationId;

/// Supplies operation ids and timestamps to the applier.
///
/// Ids must be unique for the lifetime of the process; timestamps must never
/// decrease between calls.
pub trait Stamper {
    fn next_id(&mut self) -> OperationId;
    fn now_millis(&mut self) -> u64;
}

/// Random v4 ids and wall-clock milliseconds, clamped so a clock stepping
/// backwards never produces a smaller timestamp.
#[derive(Debug, Default)]
pub struct SystemStamper {
    last: u64,
}

impl SystemStamper {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self, wall: u64) -> u64 {
        self.last = self.last.max(wall);
        self.last
    }
}

impl Stamper for SystemStamper {
    fn next_id(&mut self) -> OperationId {
        Uuid::new_v4()
    }

    fn now_millis(&mut self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.observe(wall)
    }
}

/// Deterministic stamper: ids `1, 2, 3, ...` and one millisecond per operation.
///
/// Used for replaying a session and in tests.
#[derive(Debug, Default)]
pub struct SequenceStamper {
    counter: u64,
    clock: u64,
}

impl SequenceStamper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stamper for SequenceStamper {
    fn next_id(&mut self) -> OperationId {
        self.counter += 1;
        Uuid::from_u128(u128::from(self.counter))
    }

    fn now_millis(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_ids_are_unique() {
        let mut stamper = SystemStamper::new();
        let a = stamper.next_id();
        let b = stamper.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_system_clock_never_goes_backwards() {
        let mut stamper = SystemStamper::new();
        assert_eq!(stamper.observe(1_000), 1_000);
        assert_eq!(stamper.observe(900), 1_000);
        assert_eq!(stamper.observe(1_500), 1_500);

        let first = stamper.now_millis();
        let second = stamper.now_millis();
        assert!(second >= first);
    }

    #[test]
    fn test_sequence_stamper() {
        let mut stamper = SequenceStamper::new();
        assert_eq!(stamper.next_id(), Uuid::from_u128(1));
        assert_eq!(stamper.next_id(), Uuid::from_u128(2));
        assert_eq!(stamper.now_millis(), 1);
        assert_eq!(stamper.now_millis(), 2);
    }
}
