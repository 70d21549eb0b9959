//! Movement phase - turns waypoints into timed cell-to-cell steps.
//!
//! A step reserves its destination cell when it starts and releases its
//! origin when it lands, so while an agent is mid-step it holds both cells.
//! Steps started in the same tick commit in query iteration order; the
//! loser of a race for a cell observes it as occupied and waits.

use super::path_requests::PathRequestQueue;
use crate::components::*;
use crate::config::{SimConfig, SimTick};
use crate::grid::{Grid, GridCoord, Reservation};
use crate::index::{EntityIndex, NetworkId};
use crate::pathfinding::{PathBuffer, PathFlags};
use bevy_ecs::prelude::*;

/// Shared reserve-or-wait logic for path and directional steps.
struct Stepper<'a, 'w, 's> {
    grid: &'a mut Grid,
    index: &'a EntityIndex<NetworkId>,
    commands: &'a mut Commands<'w, 's>,
    now: u64,
}

impl Stepper<'_, '_, '_> {
    /// Try to start a step from `from` to `to`. On success the destination
    /// is reserved and `movement` describes the in-flight step; otherwise
    /// the agent is flagged as waiting.
    fn begin(
        &mut self,
        entity: Entity,
        from: GridCoord,
        to: GridCoord,
        movement: &mut MovementState,
        duration: &MoveDuration,
        waiting: Option<&WaitingForPath>,
    ) -> bool {
        match self.grid.try_reserve(to, entity) {
            Reservation::Reserved => {
                *movement = MovementState {
                    is_moving: true,
                    from_cell: from,
                    to_cell: to,
                    start_tick: self.now,
                    end_tick: self.now + duration.for_step(from, to).max(1),
                };
                if waiting.is_some() {
                    self.commands.entity(entity).remove::<WaitingForPath>();
                }
                true
            }
            Reservation::Occupied(blocker) => {
                self.wait(entity, to, Some(blocker), waiting);
                false
            }
            Reservation::Blocked | Reservation::OutOfBounds => {
                self.wait(entity, to, None, waiting);
                false
            }
        }
    }

    fn wait(&mut self, entity: Entity, cell: GridCoord, blocker: Option<Entity>, previous: Option<&WaitingForPath>) {
        if let Some(previous) = previous {
            if previous.cell == cell && previous.blocked_by == blocker {
                return;
            }
        }
        let blocker_key = blocker.and_then(|b| self.index.try_get_key(b));
        tracing::trace!("{:?} waiting on {} (blocked by {:?})", entity, cell, blocker_key);
        self.commands.entity(entity).insert(WaitingForPath {
            cell,
            blocked_by: blocker,
            blocker_key,
            since_tick: self.now,
        });
    }
}

fn corner_blocked(grid: &Grid, from: GridCoord, dx: i32, dy: i32) -> bool {
    dx != 0 && dy != 0 && (!grid.is_walkable(from.offset(dx, 0)) || !grid.is_walkable(from.offset(0, dy)))
}

/// Land due steps, then start the next waypoint step of every following
/// agent.
///
/// The final landing of a path sets `Completed` and attaches
/// [`ReachedDestination`] for exactly one tick.
#[allow(clippy::type_complexity)]
pub fn movement_step_system(
    tick: Res<SimTick>,
    mut grid: ResMut<Grid>,
    index: Res<EntityIndex<NetworkId>>,
    mut commands: Commands,
    reached: Query<Entity, With<ReachedDestination>>,
    mut agents: Query<
        (
            Entity,
            &mut GridPosition,
            &mut MovementState,
            &MoveDuration,
            &mut PathStatus,
            &mut PathBuffer,
            Option<&WaitingForPath>,
        ),
        (With<Agent>, Without<MarkedForDestruction>),
    >,
) {
    let now = tick.0;
    for entity in reached.iter() {
        commands.entity(entity).remove::<ReachedDestination>();
    }

    let mut stepper = Stepper {
        grid: &mut *grid,
        index: &*index,
        commands: &mut commands,
        now,
    };

    for (entity, mut position, mut movement, duration, mut status, mut path, waiting) in agents.iter_mut() {
        if movement.is_moving {
            if now < movement.end_tick {
                continue;
            }
            stepper.grid.release(movement.from_cell, entity);
            position.0 = movement.to_cell;
            movement.is_moving = false;
            movement.from_cell = movement.to_cell;
        }

        if *status != PathStatus::Following {
            continue;
        }

        let Some(next) = path.next_waypoint() else {
            let partial = path.goal().is_some_and(|goal| goal != position.0);
            *status = PathStatus::Completed;
            stepper.commands.entity(entity).insert(ReachedDestination {
                cell: position.0,
                tick: now,
                partial,
            });
            tracing::debug!("{:?} reached {} at tick {}", entity, position.0, now);
            continue;
        };

        if stepper.begin(entity, position.0, next, &mut movement, duration, waiting) {
            path.advance();
        }
    }
}

/// Start directional (non-path) steps for idle agents carrying a
/// [`DirectionalMove`].
#[allow(clippy::type_complexity)]
pub fn directional_step_system(
    tick: Res<SimTick>,
    config: Res<SimConfig>,
    mut grid: ResMut<Grid>,
    index: Res<EntityIndex<NetworkId>>,
    mut commands: Commands,
    mut agents: Query<
        (
            Entity,
            &GridPosition,
            &mut MovementState,
            &MoveDuration,
            &DirectionalMove,
            Option<&WaitingForPath>,
        ),
        (With<Agent>, Without<MarkedForDestruction>),
    >,
) {
    let mut stepper = Stepper {
        grid: &mut *grid,
        index: &*index,
        commands: &mut commands,
        now: tick.0,
    };

    for (entity, position, mut movement, duration, directional, waiting) in agents.iter_mut() {
        if movement.is_moving {
            continue;
        }
        let (dx, dy) = directional.direction.offset();
        let target = position.0.offset(dx, dy);
        if config.prevent_corner_cutting && corner_blocked(stepper.grid, position.0, dx, dy) {
            stepper.wait(entity, target, None, waiting);
            continue;
        }
        if stepper.begin(entity, position.0, target, &mut movement, duration, waiting) && !directional.repeat {
            stepper.commands.entity(entity).remove::<DirectionalMove>();
        }
    }
}

/// Ask for a path to `target`.
///
/// Clears any previous path and directional move and queues a search from
/// the agent's committed cell; an in-flight step still lands. Returns false
/// (and changes nothing) if `entity` is not an agent or `target` is out of
/// bounds.
pub fn request_move_to(world: &mut World, entity: Entity, target: GridCoord, flags: PathFlags) -> bool {
    if world.get::<PathStatus>(entity).is_none() {
        return false;
    }
    if !world.resource::<Grid>().in_bounds(target) {
        tracing::debug!("Rejected move request for {:?} to out-of-bounds {}", entity, target);
        return false;
    }

    let mut flags = flags;
    if !world.resource::<SimConfig>().allow_diagonals {
        flags |= PathFlags::CARDINAL_ONLY;
    }
    let tick = world.resource::<SimTick>().0;
    let ticket = world.resource_mut::<PathRequestQueue>().enqueue(entity);

    let mut agent = world.entity_mut(entity);
    if let Some(mut path) = agent.get_mut::<PathBuffer>() {
        path.clear();
    }
    agent.remove::<(WaitingForPath, DirectionalMove)>();
    agent.insert((
        PathStatus::RequestPending,
        PathRequest {
            goal: target,
            flags,
            ticket,
            requested_tick: tick,
        },
    ));
    true
}

/// Cancel pathing and directional movement.
///
/// An in-flight step is not rolled back: its destination is already
/// reserved, so the agent lands there and stops. Returns false if `entity`
/// is not an agent.
pub fn stop_agent(world: &mut World, entity: Entity) -> bool {
    let Some(mut status) = world.get_mut::<PathStatus>(entity) else {
        return false;
    };
    *status = PathStatus::Cancelled;

    let mut agent = world.entity_mut(entity);
    if let Some(mut path) = agent.get_mut::<PathBuffer>() {
        path.clear();
    }
    agent.remove::<(PathRequest, WaitingForPath, DirectionalMove)>();
    true
}

/// Step in a fixed direction without pathfinding, once or until stopped.
pub fn request_direction(world: &mut World, entity: Entity, direction: Direction, repeat: bool) -> bool {
    let Some(mut status) = world.get_mut::<PathStatus>(entity) else {
        return false;
    };
    *status = PathStatus::Idle;

    let mut agent = world.entity_mut(entity);
    if let Some(mut path) = agent.get_mut::<PathBuffer>() {
        path.clear();
    }
    agent.remove::<(PathRequest, WaitingForPath)>();
    agent.insert(DirectionalMove { direction, repeat });
    true
}

/// Turn received [`MoveIntent`]s into move requests (server side).
pub fn move_intent_system(world: &mut World) {
    let mut intents = world.query::<(Entity, &MoveIntent)>();
    let pending: Vec<(Entity, GridCoord)> = intents
        .iter(world)
        .map(|(entity, intent)| (entity, intent.target()))
        .collect();

    for (entity, target) in pending {
        world.entity_mut(entity).remove::<MoveIntent>();
        if !request_move_to(world, entity, target, PathFlags::empty()) {
            tracing::debug!("Ignored move intent for {:?} to {}", entity, target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathfinding::PathfinderPool;
    use crate::systems::path_request_system;

    struct Harness {
        world: World,
        schedule: Schedule,
    }

    impl Harness {
        fn new(grid: Grid) -> Self {
            let config = SimConfig::default();
            let mut world = World::new();
            world.insert_resource(PathfinderPool::new(config.pathfinder_pool_size, grid.cell_count()));
            world.insert_resource(config);
            world.insert_resource(grid);
            world.insert_resource(SimTick(0));
            world.init_resource::<PathRequestQueue>();
            world.init_resource::<EntityIndex<NetworkId>>();
            let mut schedule = Schedule::default();
            schedule.add_systems((path_request_system, movement_step_system, directional_step_system).chain());
            Self { world, schedule }
        }

        fn spawn(&mut self, key: u64, cell: GridCoord) -> Entity {
            let entity = self.world.spawn(AgentBundle::new(cell, MoveDuration::default(), 64)).id();
            assert_eq!(self.world.resource_mut::<Grid>().try_reserve(cell, entity), Reservation::Reserved);
            self.world.resource_mut::<EntityIndex<NetworkId>>().register(NetworkId(key), entity);
            entity
        }

        fn tick(&mut self) {
            self.world.resource_mut::<SimTick>().increment();
            self.schedule.run(&mut self.world);
        }

        fn position(&self, entity: Entity) -> GridCoord {
            self.world.get::<GridPosition>(entity).unwrap().0
        }

        fn status(&self, entity: Entity) -> PathStatus {
            *self.world.get::<PathStatus>(entity).unwrap()
        }
    }

    #[test]
    fn test_walks_path_and_marks_arrival_once() {
        let mut h = Harness::new(Grid::new(50, 50, 1));
        let agent = h.spawn(1, GridCoord::new(5, 5));
        assert!(request_move_to(&mut h.world, agent, GridCoord::new(8, 5), PathFlags::empty()));
        assert_eq!(h.status(agent), PathStatus::RequestPending);

        let mut arrived_at = None;
        for t in 1..=10 {
            h.tick();
            if h.world.get::<ReachedDestination>(agent).is_some() {
                assert!(arrived_at.is_none(), "marker attached twice");
                arrived_at = Some(t);
            }
        }
        assert_eq!(arrived_at, Some(4));
        assert_eq!(h.position(agent), GridCoord::new(8, 5));
        assert_eq!(h.status(agent), PathStatus::Completed);
        let grid = h.world.resource::<Grid>();
        assert_eq!(grid.occupant(GridCoord::new(8, 5)), Some(agent));
        assert_eq!(grid.occupied_count(), 1);
    }

    #[test]
    fn test_reservation_happens_at_step_start() {
        let mut h = Harness::new(Grid::new(10, 10, 1));
        let agent = h.spawn(1, GridCoord::new(1, 1));
        h.world.get_mut::<MoveDuration>(agent).unwrap().cardinal_ticks = 3;
        request_move_to(&mut h.world, agent, GridCoord::new(2, 1), PathFlags::empty());

        h.tick();
        let movement = *h.world.get::<MovementState>(agent).unwrap();
        assert!(movement.is_moving);
        assert_eq!(movement.end_tick, movement.start_tick + 3);
        let grid = h.world.resource::<Grid>();
        assert_eq!(grid.occupant(GridCoord::new(1, 1)), Some(agent));
        assert_eq!(grid.occupant(GridCoord::new(2, 1)), Some(agent));
        assert_eq!(h.position(agent), GridCoord::new(1, 1));
    }

    #[test]
    fn test_same_cell_race_has_one_winner() {
        let mut h = Harness::new(Grid::new(20, 20, 1));
        let a = h.spawn(1, GridCoord::new(5, 5));
        let b = h.spawn(2, GridCoord::new(7, 5));
        let target = GridCoord::new(6, 5);
        request_move_to(&mut h.world, a, target, PathFlags::empty());
        request_move_to(&mut h.world, b, target, PathFlags::empty());

        h.tick();

        let moving: Vec<Entity> = [a, b]
            .into_iter()
            .filter(|&e| h.world.get::<MovementState>(e).unwrap().is_moving)
            .collect();
        assert_eq!(moving.len(), 1);
        let winner = moving[0];
        let loser = if winner == a { b } else { a };
        let waiting = h.world.get::<WaitingForPath>(loser).unwrap();
        assert_eq!(waiting.cell, target);
        assert_eq!(waiting.blocked_by, Some(winner));
        let winner_key = h.world.resource::<EntityIndex<NetworkId>>().try_get_key(winner);
        assert_eq!(waiting.blocker_key, winner_key);

        h.tick();
        assert_eq!(h.position(winner), target);
        assert_eq!(h.status(winner), PathStatus::Completed);
    }

    #[test]
    fn test_waiting_keeps_start_tick_while_blocked() {
        let mut h = Harness::new(Grid::new(20, 20, 1));
        let blocker = h.spawn(1, GridCoord::new(6, 5));
        let agent = h.spawn(2, GridCoord::new(5, 5));
        request_move_to(&mut h.world, agent, GridCoord::new(7, 5), PathFlags::CARDINAL_ONLY);

        // The planner ignores occupancy; the first step runs into the blocker.
        h.tick();
        let since = h.world.get::<WaitingForPath>(agent).unwrap().since_tick;
        for _ in 0..3 {
            h.tick();
        }
        let waiting = h.world.get::<WaitingForPath>(agent).unwrap();
        assert_eq!(waiting.since_tick, since);
        assert_eq!(waiting.blocked_by, Some(blocker));
        assert_eq!(waiting.waited(h.world.resource::<SimTick>().0), 3);
        assert_eq!(h.status(agent), PathStatus::Following);

        // Blocker leaves: the agent resumes.
        h.world.resource_mut::<Grid>().release(GridCoord::new(6, 5), blocker);
        h.world.despawn(blocker);
        h.tick();
        assert!(h.world.get::<WaitingForPath>(agent).is_none());
        assert!(h.world.get::<MovementState>(agent).unwrap().is_moving);
    }

    #[test]
    fn test_stop_during_following_cancels() {
        let mut h = Harness::new(Grid::new(20, 20, 1));
        let agent = h.spawn(1, GridCoord::new(1, 1));
        request_move_to(&mut h.world, agent, GridCoord::new(10, 1), PathFlags::empty());
        h.tick();
        h.tick();
        assert_eq!(h.status(agent), PathStatus::Following);

        assert!(stop_agent(&mut h.world, agent));
        assert_eq!(h.status(agent), PathStatus::Cancelled);
        assert!(h.world.get::<PathRequest>(agent).is_none());

        h.tick();
        let movement = h.world.get::<MovementState>(agent).unwrap();
        assert!(!movement.is_moving);
        let here = h.position(agent);
        assert_eq!(here, GridCoord::new(3, 1));
        assert_eq!(h.world.resource::<Grid>().occupant(here), Some(agent));
        assert_eq!(h.world.resource::<Grid>().occupied_count(), 1);
        assert_eq!(h.status(agent), PathStatus::Cancelled);
    }

    #[test]
    fn test_stop_while_pending_removes_request() {
        let mut h = Harness::new(Grid::new(20, 20, 1));
        let agent = h.spawn(1, GridCoord::new(1, 1));
        request_move_to(&mut h.world, agent, GridCoord::new(10, 1), PathFlags::empty());
        stop_agent(&mut h.world, agent);
        h.tick();
        assert_eq!(h.status(agent), PathStatus::Cancelled);
        assert!(h.world.get::<PathRequest>(agent).is_none());
        assert_eq!(h.position(agent), GridCoord::new(1, 1));
        assert!(h.world.resource::<PathRequestQueue>().is_empty());
    }

    #[test]
    fn test_rejects_out_of_bounds_target() {
        let mut h = Harness::new(Grid::new(10, 10, 1));
        let agent = h.spawn(1, GridCoord::new(1, 1));
        assert!(!request_move_to(&mut h.world, agent, GridCoord::new(10, 1), PathFlags::empty()));
        assert_eq!(h.status(agent), PathStatus::Idle);
        assert!(h.world.get::<PathRequest>(agent).is_none());
    }

    #[test]
    fn test_zero_length_request_completes() {
        let mut h = Harness::new(Grid::new(10, 10, 1));
        let agent = h.spawn(1, GridCoord::new(4, 4));
        request_move_to(&mut h.world, agent, GridCoord::new(4, 4), PathFlags::empty());
        h.tick();
        assert_eq!(h.status(agent), PathStatus::Completed);
        assert!(h.world.get::<ReachedDestination>(agent).is_some());
    }

    #[test]
    fn test_directional_single_step() {
        let mut h = Harness::new(Grid::new(10, 10, 1));
        let agent = h.spawn(1, GridCoord::new(4, 4));
        assert!(request_direction(&mut h.world, agent, Direction::East, false));
        h.tick();
        assert!(h.world.get::<DirectionalMove>(agent).is_none());
        h.tick();
        h.tick();
        assert_eq!(h.position(agent), GridCoord::new(5, 4));
    }

    #[test]
    fn test_directional_repeat_waits_at_wall() {
        let mut grid = Grid::new(10, 10, 1);
        grid.set_walkable(GridCoord::new(3, 0), false);
        let mut h = Harness::new(grid);
        let agent = h.spawn(1, GridCoord::new(0, 0));
        request_direction(&mut h.world, agent, Direction::East, true);
        for _ in 0..6 {
            h.tick();
        }
        assert_eq!(h.position(agent), GridCoord::new(2, 0));
        let waiting = h.world.get::<WaitingForPath>(agent).unwrap();
        assert_eq!(waiting.cell, GridCoord::new(3, 0));
        assert_eq!(waiting.blocked_by, None);
        assert_eq!(waiting.blocker_key, None);
    }

    #[test]
    fn test_directional_diagonal_blocked_by_corner() {
        let mut grid = Grid::new(10, 10, 1);
        grid.set_walkable(GridCoord::new(5, 4), false);
        let mut h = Harness::new(grid);
        let agent = h.spawn(1, GridCoord::new(4, 4));
        let target = GridCoord::new(5, 5);
        request_direction(&mut h.world, agent, Direction::SouthEast, false);

        h.tick();
        assert!(!h.world.get::<MovementState>(agent).unwrap().is_moving);
        let waiting = h.world.get::<WaitingForPath>(agent).unwrap();
        assert_eq!(waiting.cell, target);
        assert_eq!(waiting.blocked_by, None);
        assert_eq!(h.world.resource::<Grid>().occupant(target), None);
        assert!(h.world.get::<DirectionalMove>(agent).is_some());

        h.world.resource_mut::<SimConfig>().prevent_corner_cutting = false;
        h.tick();
        let movement = *h.world.get::<MovementState>(agent).unwrap();
        assert!(movement.is_moving);
        assert_eq!(movement.to_cell, target);
        assert_eq!(h.world.resource::<Grid>().occupant(target), Some(agent));
        assert!(h.world.get::<WaitingForPath>(agent).is_none());
    }

    #[test]
    fn test_entities_without_agent_marker_are_not_moved() {
        let mut h = Harness::new(Grid::new(10, 10, 1));
        let replica = h.spawn(1, GridCoord::new(2, 2));
        h.world.entity_mut(replica).remove::<Agent>();
        h.world.entity_mut(replica).insert(DirectionalMove {
            direction: Direction::East,
            repeat: true,
        });
        h.tick();
        h.tick();
        assert!(!h.world.get::<MovementState>(replica).unwrap().is_moving);
        assert_eq!(h.position(replica), GridCoord::new(2, 2));
    }

    #[test]
    fn test_move_intent_becomes_request() {
        let mut h = Harness::new(Grid::new(10, 10, 1));
        let agent = h.spawn(1, GridCoord::new(0, 0));
        h.world.entity_mut(agent).insert(MoveIntent { x: 2, y: 0, floor: 0 });
        move_intent_system(&mut h.world);
        assert!(h.world.get::<MoveIntent>(agent).is_none());
        assert_eq!(h.status(agent), PathStatus::RequestPending);
        assert_eq!(h.world.get::<PathRequest>(agent).map(|r| r.goal), Some(GridCoord::new(2, 0)));
    }
}
