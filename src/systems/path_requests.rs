//! Pathfinding phase - services queued path requests, bounded per tick.

use crate::components::*;
use crate::config::{SimConfig, SimTick};
use crate::grid::Grid;
use crate::pathfinding::{
    find_path, PathBuffer, PathFailReason, PathQuery, PathResult, PathfinderPool, PathfindingContext,
    SearchLimits,
};
use bevy_ecs::prelude::*;
use std::collections::VecDeque;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Arrival-ordered queue of agents waiting for a search.
///
/// Entries carry the ticket of the request they were queued for. An entry
/// whose agent no longer holds a [`PathRequest`] with that ticket (stopped,
/// re-requested, despawned) is skipped when popped.
#[derive(Resource, Debug, Default)]
pub struct PathRequestQueue {
    pending: VecDeque<(Entity, u64)>,
    next_ticket: u64,
}

impl PathRequestQueue {
    /// Queue `entity` and return the ticket for its [`PathRequest`].
    pub fn enqueue(&mut self, entity: Entity) -> u64 {
        self.next_ticket += 1;
        self.pending.push_back((entity, self.next_ticket));
        self.next_ticket
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// One search in flight: owns its rented scratch context.
struct SearchJob {
    entity: Entity,
    query: PathQuery,
    ctx: PathfindingContext,
}

fn run_search(mut job: SearchJob, grid: &Grid, limits: &SearchLimits) -> (SearchJob, PathResult) {
    let result = find_path(&mut job.ctx, grid, &job.query, limits);
    (job, result)
}

/// Service up to `min(max_path_requests_per_tick, free contexts)` requests
/// in arrival order.
///
/// Searches start from the agent's committed cell, so a request issued
/// mid-step plans from the cell the step lands on. Results are applied in
/// arrival order: `Following` with a loaded buffer, or `Failed(reason)`.
pub fn path_request_system(
    tick: Res<SimTick>,
    config: Res<SimConfig>,
    grid: Res<Grid>,
    mut pool: ResMut<PathfinderPool>,
    mut queue: ResMut<PathRequestQueue>,
    mut commands: Commands,
    mut agents: Query<(&GridPosition, &MovementState, &PathRequest, &mut PathStatus, &mut PathBuffer)>,
) {
    let budget = config.max_path_requests_per_tick.min(pool.available());
    if budget == 0 || queue.is_empty() {
        return;
    }

    // COLLECT PHASE: pop live requests and rent a context for each
    let mut jobs: Vec<SearchJob> = Vec::with_capacity(budget);
    while jobs.len() < budget {
        let Some((entity, ticket)) = queue.pending.pop_front() else {
            break;
        };
        let Ok((position, movement, request, mut status, _)) = agents.get_mut(entity) else {
            continue;
        };
        if request.ticket != ticket {
            continue;
        }
        let Some(mut ctx) = pool.rent() else {
            queue.pending.push_front((entity, ticket));
            break;
        };
        if ctx.cell_capacity() != grid.cell_count() {
            ctx = PathfindingContext::new(grid.cell_count());
        }
        *status = PathStatus::PathComputing;
        jobs.push(SearchJob {
            entity,
            query: PathQuery::new(movement.committed_cell(position.0), request.goal, request.flags),
            ctx,
        });
    }

    // COMPUTE PHASE: searches only read the grid
    let limits = SearchLimits::from(&*config);

    #[cfg(feature = "parallel")]
    let results: Vec<(SearchJob, PathResult)> = jobs
        .into_par_iter()
        .map(|job| run_search(job, &grid, &limits))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let results: Vec<(SearchJob, PathResult)> = jobs
        .into_iter()
        .map(|job| run_search(job, &grid, &limits))
        .collect();

    // APPLY PHASE: arrival order
    for (job, result) in results {
        if let Ok((_, _, request, mut status, mut buffer)) = agents.get_mut(job.entity) {
            let outcome = result.and_then(|outcome| {
                buffer.load(job.ctx.path(), request.goal)?;
                Ok(outcome)
            });
            match outcome {
                Ok(outcome) => {
                    *status = PathStatus::Following;
                    tracing::debug!(
                        "Path for {:?}: {} steps to {} ({} nodes{})",
                        job.entity,
                        outcome.steps,
                        outcome.end,
                        outcome.nodes_expanded,
                        if outcome.partial { ", partial" } else { "" }
                    );
                }
                Err(reason) => {
                    buffer.clear();
                    *status = PathStatus::Failed(reason);
                    log_failure(job.entity, &job.query, reason, tick.0);
                }
            }
            commands.entity(job.entity).remove::<PathRequest>();
        }
        pool.give_back(job.ctx);
    }
}

fn log_failure(entity: Entity, query: &PathQuery, reason: PathFailReason, tick: u64) {
    match reason {
        // Capacity mismatch between grid size and waypoint limit.
        PathFailReason::BufferTooSmall => tracing::warn!(
            "Path for {:?} from {} to {} exceeds the waypoint buffer (tick {})",
            entity,
            query.start,
            query.goal,
            tick
        ),
        _ => tracing::debug!(
            "Path for {:?} from {} to {} failed: {} (tick {})",
            entity,
            query.start,
            query.goal,
            reason,
            tick
        ),
    }
}
