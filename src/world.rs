//! Serializable debug view of the simulation.
//!
//! A `Snapshot` lists every positioned entity with its network key and
//! movement state. It is meant for tooling and logs, not the wire.

use crate::components::*;
use crate::grid::Grid;
use crate::index::{EntityIndex, NetworkId};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// One positioned entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Network key, if indexed.
    pub key: Option<u64>,
    pub x: i32,
    pub y: i32,
    pub floor: u8,
    pub moving: bool,
    /// `(x, y)` of the in-flight step destination.
    pub moving_to: Option<(i32, i32)>,
    pub status: Option<String>,
    /// Remaining steps of the loaded path.
    pub remaining_steps: usize,
    /// Key of the agent blocking the next step, if any.
    pub waiting_on: Option<u64>,
    pub waiting: bool,
}

/// Whole-world snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub grid_width: u32,
    pub grid_height: u32,
    pub occupied_cells: usize,
    /// Sorted by key, unindexed entities last.
    pub agents: Vec<AgentSnapshot>,
}

impl Snapshot {
    /// Create a snapshot from the ECS world.
    pub fn from_world(world: &mut World, tick: u64) -> Self {
        let mut query = world.query::<(
            Entity,
            &GridPosition,
            Option<&MovementState>,
            Option<&PathStatus>,
            Option<&crate::pathfinding::PathBuffer>,
            Option<&WaitingForPath>,
        )>();

        let index = world.get_resource::<EntityIndex<NetworkId>>();
        let mut agents: Vec<AgentSnapshot> = query
            .iter(world)
            .map(|(entity, position, movement, status, path, waiting)| {
                let moving = movement.is_some_and(|m| m.is_moving);
                AgentSnapshot {
                    key: index.and_then(|i| i.try_get_key(entity)).map(|k| k.0),
                    x: position.0.x,
                    y: position.0.y,
                    floor: position.0.floor,
                    moving,
                    moving_to: movement.filter(|m| m.is_moving).map(|m| (m.to_cell.x, m.to_cell.y)),
                    status: status.map(|s| s.label().to_string()),
                    remaining_steps: path.map_or(0, |p| p.remaining()),
                    waiting_on: waiting.and_then(|w| w.blocker_key).map(|k| k.0),
                    waiting: waiting.is_some(),
                }
            })
            .collect();
        agents.sort_by_key(|a| (a.key.is_none(), a.key));

        let (grid_width, grid_height, occupied_cells) = world
            .get_resource::<Grid>()
            .map_or((0, 0, 0), |g| (g.width(), g.height(), g.occupied_count()));

        Self {
            tick,
            grid_width,
            grid_height,
            occupied_cells,
            agents,
        }
    }

    pub fn agent(&self, key: NetworkId) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|a| a.key == Some(key.0))
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
