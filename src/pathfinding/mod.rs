//! A* grid pathfinding.
//!
//! Searches run against a read-only [`Grid`](crate::grid::Grid) using pooled
//! scratch state ([`PathfindingContext`]). Node slots are stamped with a
//! per-search generation so a context can be reused without clearing its
//! arrays; a slot belongs to the current search iff its stamp matches.
//!
//! Failures are ordinary outcomes of play (a blocked corridor, a goal inside
//! a wall) and are returned as [`PathFailReason`], never raised.

pub mod astar;
pub mod buffer;
pub mod context;

pub use astar::{find_path, find_path_into, heuristic};
pub use buffer::PathBuffer;
pub use context::{PathfinderPool, PathfindingContext};

use crate::grid::GridCoord;
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Per-request search options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PathFlags: u8 {
        /// 4-connected search with a Manhattan heuristic.
        const CARDINAL_ONLY = 0b0000_0001;
        /// On failure, return a path to the visited cell closest to the goal.
        const ALLOW_PARTIAL = 0b0000_0010;
    }
}

/// Why a search produced no usable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
pub enum PathFailReason {
    #[error("start or goal is out of bounds or on another floor")]
    InvalidRequest,
    #[error("start cell is not walkable")]
    StartBlocked,
    #[error("goal cell is not walkable")]
    GoalBlocked,
    #[error("no path exists")]
    NoPathExists,
    #[error("node budget exhausted")]
    Timeout,
    #[error("path longer than the waypoint buffer")]
    BufferTooSmall,
}

/// A single search request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathQuery {
    pub start: GridCoord,
    pub goal: GridCoord,
    pub flags: PathFlags,
}

impl PathQuery {
    pub fn new(start: GridCoord, goal: GridCoord, flags: PathFlags) -> Self {
        Self { start, goal, flags }
    }
}

/// Search limits shared by every query in a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    /// Node expansions before giving up.
    pub max_nodes: usize,
    /// Maximum path length in steps.
    pub max_waypoints: usize,
    pub prevent_corner_cutting: bool,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_nodes: 8192,
            max_waypoints: 256,
            prevent_corner_cutting: true,
        }
    }
}

impl From<&crate::config::SimConfig> for SearchLimits {
    fn from(config: &crate::config::SimConfig) -> Self {
        Self {
            max_nodes: config.max_nodes_per_search,
            max_waypoints: config.max_waypoints,
            prevent_corner_cutting: config.prevent_corner_cutting,
        }
    }
}

/// Summary of a successful search. The path itself is left in the context
/// (see [`PathfindingContext::path`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathOutcome {
    /// Number of steps, excluding the start cell.
    pub steps: usize,
    /// Last cell of the path; differs from the goal for partial paths.
    pub end: GridCoord,
    pub partial: bool,
    pub nodes_expanded: usize,
}

/// Result type of a search.
pub type PathResult = Result<PathOutcome, PathFailReason>;
