//! Server configuration.

use std::net::SocketAddr;

use clap::Parser;
use scribble_core::UndoPolicy;
use scribble_core::protocol::MAX_POINTS_PER_OPERATION;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:3030";

/// Capacity of the hub's inbound queue.
pub const INBOX_CAPACITY: usize = 256;

/// Scribble room server
#[derive(Debug, Clone, Parser)]
#[command(name = "scribble-server", version, about, long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "SCRIBBLE_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Undo scope: `per-user` (each user undoes their own strokes) or `global`
    /// (undo retracts the room's latest stroke, whoever drew it)
    #[arg(long, env = "SCRIBBLE_UNDO_POLICY", default_value_t = UndoPolicy::PerUser)]
    pub undo_policy: UndoPolicy,

    /// Maximum number of points in a single stroke or erase
    #[arg(long, env = "SCRIBBLE_MAX_POINTS", default_value_t = MAX_POINTS_PER_OPERATION)]
    pub max_points: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3030)),
            undo_policy: UndoPolicy::default(),
            max_points: MAX_POINTS_PER_OPERATION,
        }
    }
}
