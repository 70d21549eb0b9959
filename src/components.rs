//! ECS components for simulated agents.
//!
//! Components are pure data containers attached to entities.
//! All logic lives in the movement, sync and staging systems.

use crate::grid::GridCoord;
use crate::index::NetworkId;
use crate::net::PeerId;
use crate::pathfinding::{PathBuffer, PathFailReason, PathFlags};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// SPATIAL COMPONENTS
// ============================================================================

/// Committed cell of an agent. Updated when a step completes.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition(pub GridCoord);

/// In-flight cell transition.
///
/// While `is_moving`, both `from_cell` and `to_cell` are held by this agent
/// in the grid: the destination is reserved when the step starts and the
/// origin released when it completes.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementState {
    pub is_moving: bool,
    pub from_cell: GridCoord,
    pub to_cell: GridCoord,
    pub start_tick: u64,
    pub end_tick: u64,
}

impl MovementState {
    /// The cell the agent will stand on once any in-flight step lands.
    pub fn committed_cell(&self, position: GridCoord) -> GridCoord {
        if self.is_moving {
            self.to_cell
        } else {
            position
        }
    }

    /// Fraction of the current step completed at `tick` (0.0 - 1.0).
    pub fn progress(&self, tick: u64) -> f32 {
        if !self.is_moving || self.end_tick <= self.start_tick {
            return if self.is_moving { 0.0 } else { 1.0 };
        }
        let span = (self.end_tick - self.start_tick) as f32;
        (tick.saturating_sub(self.start_tick) as f32 / span).clamp(0.0, 1.0)
    }
}

/// Per-agent step durations in ticks.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveDuration {
    pub cardinal_ticks: u64,
    pub diagonal_ticks: u64,
}

impl MoveDuration {
    pub fn for_step(&self, from: GridCoord, to: GridCoord) -> u64 {
        if from.is_diagonal_to(&to) {
            self.diagonal_ticks
        } else {
            self.cardinal_ticks
        }
    }
}

impl Default for MoveDuration {
    fn default() -> Self {
        Self {
            cardinal_ticks: 1,
            diagonal_ticks: 1,
        }
    }
}

// ============================================================================
// PATH STATE COMPONENTS
// ============================================================================

/// Movement state machine of an agent.
///
/// `Idle -> RequestPending -> PathComputing -> Following -> {Completed | Failed | Cancelled}`.
/// Blocked steps while `Following` are flagged with [`WaitingForPath`].
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    #[default]
    Idle,
    RequestPending,
    PathComputing,
    Following,
    Completed,
    Failed(PathFailReason),
    Cancelled,
}

impl PathStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::RequestPending => "RequestPending",
            Self::PathComputing => "PathComputing",
            Self::Following => "Following",
            Self::Completed => "Completed",
            Self::Failed(_) => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Pending path request. Removed when the request is serviced or cancelled.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct PathRequest {
    pub goal: GridCoord,
    pub flags: PathFlags,
    /// Matches the queue entry that will service this request.
    pub ticket: u64,
    pub requested_tick: u64,
}

/// The next step is blocked. `blocked_by` is `None` for static obstacles.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingForPath {
    pub cell: GridCoord,
    pub blocked_by: Option<Entity>,
    /// External id of the blocker, when it has one.
    pub blocker_key: Option<NetworkId>,
    pub since_tick: u64,
}

impl WaitingForPath {
    /// Ticks spent waiting as of `tick`.
    pub fn waited(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.since_tick)
    }
}

/// One-shot marker: the agent finished its path this tick.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachedDestination {
    pub cell: GridCoord,
    pub tick: u64,
    /// The path ended short of the requested goal.
    pub partial: bool,
}

// ============================================================================
// DIRECTIONAL MOVEMENT
// ============================================================================

/// One of the eight grid directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// Offset with `y` growing southward.
    pub fn offset(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
        }
    }

    pub fn is_diagonal(&self) -> bool {
        let (dx, dy) = self.offset();
        dx != 0 && dy != 0
    }
}

/// Single-step or repeated movement in a fixed direction, bypassing
/// pathfinding.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionalMove {
    pub direction: Direction,
    /// Keep stepping until stopped; otherwise removed after one step starts.
    pub repeat: bool,
}

// ============================================================================
// NETWORK / LIFECYCLE COMPONENTS
// ============================================================================

/// Client input asking the server to path the sender's agent to a cell.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub x: i32,
    pub y: i32,
    pub floor: u8,
}

impl MoveIntent {
    pub fn target(&self) -> GridCoord {
        GridCoord::on_floor(self.x, self.y, self.floor)
    }
}

/// Peer controlling this agent. Its disconnect destroys the agent.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner(pub PeerId);

/// Marker for agents (entities that hold grid cells).
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Agent;

/// Destroyed during the cleanup phase of the current tick.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct MarkedForDestruction;

// ============================================================================
// BUNDLES
// ============================================================================

/// Components every movable agent carries.
#[derive(Bundle)]
pub struct AgentBundle {
    pub agent: Agent,
    pub position: GridPosition,
    pub movement: MovementState,
    pub duration: MoveDuration,
    pub status: PathStatus,
    pub path: PathBuffer,
}

impl AgentBundle {
    pub fn new(cell: GridCoord, duration: MoveDuration, max_waypoints: usize) -> Self {
        Self {
            agent: Agent,
            position: GridPosition(cell),
            movement: MovementState {
                from_cell: cell,
                to_cell: cell,
                ..Default::default()
            },
            duration,
            status: PathStatus::Idle,
            path: PathBuffer::new(max_waypoints),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_cell() {
        let here = GridCoord::new(1, 1);
        let mut state = MovementState::default();
        assert_eq!(state.committed_cell(here), here);
        state.is_moving = true;
        state.to_cell = GridCoord::new(2, 1);
        assert_eq!(state.committed_cell(here), GridCoord::new(2, 1));
    }

    #[test]
    fn test_progress() {
        let state = MovementState {
            is_moving: true,
            start_tick: 10,
            end_tick: 14,
            ..Default::default()
        };
        assert_eq!(state.progress(10), 0.0);
        assert_eq!(state.progress(12), 0.5);
        assert_eq!(state.progress(20), 1.0);
    }

    #[test]
    fn test_step_duration_by_kind() {
        let d = MoveDuration {
            cardinal_ticks: 4,
            diagonal_ticks: 6,
        };
        let o = GridCoord::new(0, 0);
        assert_eq!(d.for_step(o, GridCoord::new(1, 0)), 4);
        assert_eq!(d.for_step(o, GridCoord::new(1, 1)), 6);
    }

    #[test]
    fn test_direction_offsets() {
        assert_eq!(Direction::East.offset(), (1, 0));
        assert!(Direction::SouthWest.is_diagonal());
        assert!(!Direction::North.is_diagonal());
    }
}
