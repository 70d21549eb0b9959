//! Cleanup phase - removes entities marked for destruction.

use crate::components::*;
use crate::config::SimTick;
use crate::grid::Grid;
use crate::index::{EntityIndex, NetworkId};
use crate::net::Outbox;
use crate::sync::{enqueue_despawn, NetRole, SyncRegistry};
use bevy_ecs::prelude::*;

/// Release held cells, drop the index entry, then despawn.
///
/// Index entries are removed with the versioned check before the handle is
/// freed, so a recycled handle can never be reached through a stale key.
/// A server that replicates state tells its peers about every indexed
/// entity it removes.
pub fn destruction_system(world: &mut World) {
    let mut marked = world.query_filtered::<(Entity, Option<&GridPosition>, Option<&MovementState>), With<MarkedForDestruction>>();
    let doomed: Vec<(Entity, Option<GridPosition>, Option<MovementState>)> = marked
        .iter(world)
        .map(|(entity, position, movement)| (entity, position.copied(), movement.copied()))
        .collect();
    if doomed.is_empty() {
        return;
    }
    let announce = world.get_resource::<NetRole>() == Some(&NetRole::Server)
        && world.get_resource::<SyncRegistry>().is_some_and(|r| r.replicates());
    let tick = world.get_resource::<SimTick>().map_or(0, |t| t.0);

    for (entity, position, movement) in doomed {
        {
            let mut grid = world.resource_mut::<Grid>();
            if let Some(position) = position {
                grid.release(position.0, entity);
            }
            if let Some(movement) = movement.filter(|m| m.is_moving) {
                grid.release(movement.from_cell, entity);
                grid.release(movement.to_cell, entity);
            }
        }
        let removed = {
            let mut index = world.resource_mut::<EntityIndex<NetworkId>>();
            index
                .try_get_key(entity)
                .filter(|&key| index.try_remove_if_matches(key, entity))
        };
        if let Some(key) = removed {
            tracing::info!("Removed agent {} ({:?})", key, entity);
            if announce {
                if let Some(mut outbox) = world.get_resource_mut::<Outbox>() {
                    enqueue_despawn(&mut outbox, key, tick);
                }
            }
        }
        world.despawn(entity);
    }
}
