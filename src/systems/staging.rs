//! Staging phase - materializes host requests queued from other threads.

use crate::components::*;
use crate::config::SimConfig;
use crate::grid::{Grid, GridCoord, Reservation};
use crate::index::{EntityIndex, IndexKey, NetworkId};
use crate::net::PeerId;
use bevy_ecs::prelude::*;
use crossbeam_channel::{Receiver, Sender};

/// A creation or destruction request crossing into the simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum StagingRequest {
    SpawnAgent {
        key: NetworkId,
        cell: GridCoord,
        owner: Option<PeerId>,
    },
    DespawnAgent {
        key: NetworkId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    #[error("Invalid network key {0}")]
    InvalidKey(NetworkId),
    #[error("Network key {0} already in use")]
    KeyInUse(NetworkId),
    #[error("Cell {0} is out of bounds")]
    OutOfBounds(GridCoord),
    #[error("Cell {0} is not walkable")]
    Blocked(GridCoord),
    #[error("Cell {0} is occupied")]
    Occupied(GridCoord),
}

/// Thread-safe producer handle for staging requests.
#[derive(Debug, Clone)]
pub struct StagingSender(Sender<StagingRequest>);

impl StagingSender {
    /// Returns false if the simulation has been dropped.
    pub fn send(&self, request: StagingRequest) -> bool {
        self.0.send(request).is_ok()
    }
}

/// Consumer side, drained by [`staging_system`].
#[derive(Resource, Debug)]
pub struct StagingQueue {
    rx: Receiver<StagingRequest>,
}

impl StagingQueue {
    pub fn channel() -> (StagingSender, StagingQueue) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (StagingSender(tx), StagingQueue { rx })
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Materialize up to `max_staging_per_tick` queued requests.
pub fn staging_system(world: &mut World) {
    let cap = world.resource::<SimConfig>().max_staging_per_tick;
    let requests: Vec<StagingRequest> = world.resource::<StagingQueue>().rx.try_iter().take(cap).collect();

    for request in requests {
        match request {
            StagingRequest::SpawnAgent { key, cell, owner } => {
                if let Err(e) = spawn_agent(world, key, cell, owner) {
                    tracing::warn!("Staged spawn of {} failed: {}", key, e);
                }
            }
            StagingRequest::DespawnAgent { key } => {
                if !despawn_agent(world, key) {
                    tracing::debug!("Staged despawn of unknown agent {}", key);
                }
            }
        }
    }
}

/// Create an agent on a free cell and index it under `key`.
pub fn spawn_agent(
    world: &mut World,
    key: NetworkId,
    cell: GridCoord,
    owner: Option<PeerId>,
) -> Result<Entity, SpawnError> {
    if !key.is_valid() {
        return Err(SpawnError::InvalidKey(key));
    }
    let in_use = world.resource_scope(|world, mut index: Mut<EntityIndex<NetworkId>>| {
        index.resolve(key, world.entities()).is_some()
    });
    if in_use {
        return Err(SpawnError::KeyInUse(key));
    }
    match world.resource::<Grid>().cell(cell) {
        None => return Err(SpawnError::OutOfBounds(cell)),
        Some(c) if !c.walkable => return Err(SpawnError::Blocked(cell)),
        Some(c) if c.occupant.is_some() => return Err(SpawnError::Occupied(cell)),
        Some(_) => {}
    }

    let (duration, max_waypoints) = {
        let config = world.resource::<SimConfig>();
        (
            MoveDuration {
                cardinal_ticks: config.cardinal_step_ticks,
                diagonal_ticks: config.diagonal_step_ticks,
            },
            config.max_waypoints,
        )
    };
    let mut agent = world.spawn(AgentBundle::new(cell, duration, max_waypoints));
    if let Some(owner) = owner {
        agent.insert(Owner(owner));
    }
    let entity = agent.id();

    let reserved = world.resource_mut::<Grid>().try_reserve(cell, entity);
    debug_assert_eq!(reserved, Reservation::Reserved);
    world.resource_mut::<EntityIndex<NetworkId>>().register(key, entity);
    tracing::info!("Spawned agent {} as {:?} at {}", key, entity, cell);
    Ok(entity)
}

/// Mark the agent indexed under `key` for destruction this tick.
pub fn despawn_agent(world: &mut World, key: NetworkId) -> bool {
    let entity = world.resource_scope(|world, mut index: Mut<EntityIndex<NetworkId>>| {
        index.resolve(key, world.entities())
    });
    match entity {
        Some(entity) => {
            world.entity_mut(entity).insert(MarkedForDestruction);
            true
        }
        None => false,
    }
}
