//! Public API for the simulation.
//!
//! `SimWorld` owns the ECS world and one schedule per tick phase, and is the
//! interface a host (game server, headless client, tests) drives.
//!
//! ## Fixed Timestep
//!
//! `step(dt)` accumulates real time and runs whole fixed ticks of
//! `1 / tick_rate_hz`; `tick()` runs exactly one. The tick counter is
//! incremented before any phase runs, so every system in a tick sees the
//! same `SimTick`.
//!
//! ## Threading
//!
//! The simulation runs on the caller's thread. Other threads talk to it only
//! through channels: a [`StagingSender`] for spawn/despawn requests and a
//! [`NetworkBridge`] for network traffic. Neither blocks a tick.
//!
//! ## StopAgent contract
//!
//! Stopping an agent mid-step does not roll the step back: the destination
//! is already reserved, so the agent lands there and then stays.

use crate::components::*;
use crate::config::{ConfigError, SimConfig, SimTick};
use crate::grid::{Grid, GridCoord};
use crate::index::{EntityIndex, NetworkId};
use crate::net::{
    drain_ingress_system, peer_disconnect_system, ConnectedPeers, InboundBuffer, Inbox, NetworkBridge, Outbox,
    PeerId,
};
use crate::pathfinding::{PathFlags, PathfinderPool};
use crate::profiler::Profiler;
use crate::sync::{
    apply_despawn_system, apply_inbound_system, client_intent_system, server_sync_system, Authority, LastApplied,
    NetRole, Shadow, SyncComponent, SyncRegistry, SyncSettings,
};
use crate::systems::*;
use crate::world::Snapshot;
use bevy_ecs::prelude::*;
use std::time::Duration;

/// Tick phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Ingress,
    Staging,
    Pathfinding,
    Movement,
    Gameplay,
    Sync,
    Cleanup,
}

impl Phase {
    pub const COUNT: usize = 7;

    pub const ALL: [Phase; Phase::COUNT] = [
        Phase::Ingress,
        Phase::Staging,
        Phase::Pathfinding,
        Phase::Movement,
        Phase::Gameplay,
        Phase::Sync,
        Phase::Cleanup,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Ingress => "ingress",
            Phase::Staging => "staging",
            Phase::Pathfinding => "pathfinding",
            Phase::Movement => "movement",
            Phase::Gameplay => "gameplay",
            Phase::Sync => "sync",
            Phase::Cleanup => "cleanup",
        }
    }
}

/// Per-type inbound apply systems; replica despawns run after them.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
struct ApplyInbound;

/// The main simulation world container.
///
/// Holds the ECS world and phase schedules, providing a clean API for:
/// - Stepping the simulation forward
/// - Spawning, moving and stopping agents by network key
/// - Registering component types for network sync
/// - Extracting state snapshots
pub struct SimWorld {
    world: World,
    schedules: [Schedule; Phase::COUNT],
    role: NetRole,
    time: f32,
    /// Accumulated time for fixed timestep.
    time_accumulator: f32,
    staging: StagingSender,
    bridge: NetworkBridge,
    profiler: Option<Profiler>,
}

impl SimWorld {
    /// Server world with default configuration.
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Server world. An invalid configuration is logged and replaced by the
    /// defaults.
    pub fn with_config(config: SimConfig) -> Self {
        Self::build_or_default(config, NetRole::Server)
    }

    /// Client world: replicates server-authority types and sends intents.
    pub fn client(config: SimConfig) -> Self {
        Self::build_or_default(config, NetRole::Client)
    }

    fn build_or_default(config: SimConfig, role: NetRole) -> Self {
        match Self::try_new(config, role) {
            Ok(sim) => sim,
            Err(e) => {
                tracing::warn!("Invalid simulation config ({}), using defaults", e);
                Self::build(SimConfig::default(), role)
            }
        }
    }

    pub fn try_new(config: SimConfig, role: NetRole) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, role))
    }

    fn build(config: SimConfig, role: NetRole) -> Self {
        let mut world = World::new();

        let grid = Grid::new(config.grid_width, config.grid_height, config.grid_floors);
        world.insert_resource(PathfinderPool::new(config.pathfinder_pool_size, grid.cell_count()));
        world.insert_resource(grid);
        world.init_resource::<PathRequestQueue>();
        world.init_resource::<EntityIndex<NetworkId>>();
        world.init_resource::<SyncRegistry>();

        let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        world.insert_resource(Outbox::new(outbound_tx));
        world.insert_resource(Inbox::new(inbound_rx));
        world.init_resource::<InboundBuffer>();
        world.init_resource::<ConnectedPeers>();

        let (staging, queue) = StagingQueue::channel();
        world.insert_resource(queue);

        world.insert_resource(SimTick(0));
        world.insert_resource(role);
        tracing::info!(
            "Simulation created ({:?}, {}x{}x{} grid, {} Hz)",
            role,
            config.grid_width,
            config.grid_height,
            config.grid_floors,
            config.tick_rate_hz
        );
        let budget = Duration::from_secs_f32(config.fixed_timestep());
        world.insert_resource(config);

        let mut schedules: [Schedule; Phase::COUNT] = std::array::from_fn(|_| Schedule::default());
        schedules[Phase::Ingress as usize].add_systems((drain_ingress_system, peer_disconnect_system).chain());
        match role {
            NetRole::Server => {
                schedules[Phase::Staging as usize].add_systems((staging_system, move_intent_system).chain());
            }
            NetRole::Client => {
                schedules[Phase::Ingress as usize]
                    .add_systems(apply_despawn_system.after(drain_ingress_system).after(ApplyInbound));
                schedules[Phase::Staging as usize].add_systems(staging_system);
            }
        }
        schedules[Phase::Pathfinding as usize].add_systems(path_request_system);
        schedules[Phase::Movement as usize].add_systems((movement_step_system, directional_step_system).chain());
        schedules[Phase::Cleanup as usize].add_systems(destruction_system);

        Self {
            world,
            schedules,
            role,
            time: 0.0,
            time_accumulator: 0.0,
            staging,
            bridge: NetworkBridge::new(outbound_rx, inbound_tx),
            profiler: cfg!(feature = "profile").then(|| Profiler::with_budget(budget)),
        }
    }

    /// Step the simulation forward by `dt` seconds. Returns the number of
    /// fixed ticks run.
    pub fn step(&mut self, dt: f32) -> u32 {
        let fixed_dt = self.world.resource::<SimConfig>().fixed_timestep();
        self.time_accumulator += dt;

        let mut ran = 0;
        while self.time_accumulator >= fixed_dt {
            self.tick();
            self.time_accumulator -= fixed_dt;
            ran += 1;
        }
        ran
    }

    /// Run exactly one fixed tick.
    pub fn tick(&mut self) {
        self.world.resource_mut::<SimTick>().increment();

        for (phase, schedule) in Phase::ALL.iter().zip(self.schedules.iter_mut()) {
            match self.profiler.as_mut() {
                Some(profiler) => profiler.time_section(phase.name(), || schedule.run(&mut self.world)),
                None => schedule.run(&mut self.world),
            }
        }
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.tick();
        }

        self.time += self.world.resource::<SimConfig>().fixed_timestep();
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    /// Spawn an agent immediately. Prefer [`SimWorld::staging_sender`] from
    /// other threads.
    pub fn spawn_agent(&mut self, key: NetworkId, cell: GridCoord) -> Result<Entity, SpawnError> {
        spawn_agent(&mut self.world, key, cell, None)
    }

    /// Spawn an agent controlled by `owner`; it is destroyed when that peer
    /// disconnects.
    pub fn spawn_owned_agent(&mut self, key: NetworkId, cell: GridCoord, owner: PeerId) -> Result<Entity, SpawnError> {
        spawn_agent(&mut self.world, key, cell, Some(owner))
    }

    /// Mark an agent for destruction at the end of the next tick.
    pub fn despawn_agent(&mut self, key: NetworkId) -> bool {
        despawn_agent(&mut self.world, key)
    }

    /// Path the agent to `target` with the configured default flags.
    pub fn request_move_to(&mut self, key: NetworkId, target: GridCoord) -> bool {
        self.request_move_to_with(key, target, PathFlags::empty())
    }

    pub fn request_move_to_with(&mut self, key: NetworkId, target: GridCoord, flags: PathFlags) -> bool {
        match self.agent_entity(key) {
            Some(entity) => request_move_to(&mut self.world, entity, target, flags),
            None => false,
        }
    }

    /// Cancel the agent's movement. See the module docs for the mid-step
    /// contract.
    pub fn stop_agent(&mut self, key: NetworkId) -> bool {
        match self.agent_entity(key) {
            Some(entity) => stop_agent(&mut self.world, entity),
            None => false,
        }
    }

    pub fn request_direction(&mut self, key: NetworkId, direction: Direction, repeat: bool) -> bool {
        match self.agent_entity(key) {
            Some(entity) => request_direction(&mut self.world, entity, direction, repeat),
            None => false,
        }
    }

    /// Resolve a key, evicting it if its entity is gone.
    pub fn agent_entity(&mut self, key: NetworkId) -> Option<Entity> {
        self.world
            .resource_scope(|world, mut index: Mut<EntityIndex<NetworkId>>| index.resolve(key, world.entities()))
    }

    pub fn position_of(&mut self, key: NetworkId) -> Option<GridCoord> {
        let entity = self.agent_entity(key)?;
        self.world.get::<GridPosition>(entity).map(|p| p.0)
    }

    pub fn status_of(&mut self, key: NetworkId) -> Option<PathStatus> {
        let entity = self.agent_entity(key)?;
        self.world.get::<PathStatus>(entity).copied()
    }

    pub fn waiting_of(&mut self, key: NetworkId) -> Option<WaitingForPath> {
        let entity = self.agent_entity(key)?;
        self.world.get::<WaitingForPath>(entity).copied()
    }

    pub fn is_moving(&mut self, key: NetworkId) -> bool {
        self.agent_entity(key)
            .and_then(|e| self.world.get::<MovementState>(e))
            .is_some_and(|m| m.is_moving)
    }

    /// Attach a client-authority value to the entity with `key`; it is sent
    /// to the server during the next sync phase.
    pub fn send_intent<T: SyncComponent>(&mut self, key: NetworkId, intent: T) -> bool {
        match self.agent_entity(key) {
            Some(entity) => {
                self.world.entity_mut(entity).insert(intent);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Register `T` for synchronization and return its channel.
    ///
    /// Channels are assigned in registration order, so server and clients
    /// must register the same types in the same order.
    ///
    /// # Panics
    /// If `T` is already registered.
    #[track_caller]
    pub fn register_sync<T: SyncComponent>(&mut self, settings: SyncSettings) -> u8 {
        let channel = self.world.resource_mut::<SyncRegistry>().register::<T>(settings);
        match (self.role, settings.authority) {
            (NetRole::Server, Authority::Server) => {
                self.schedules[Phase::Sync as usize].add_systems(server_sync_system::<T>);
            }
            (NetRole::Client, Authority::Client) => {
                self.schedules[Phase::Sync as usize].add_systems(client_intent_system::<T>);
            }
            (NetRole::Server, Authority::Client) | (NetRole::Client, Authority::Server) => {
                self.schedules[Phase::Ingress as usize].add_systems(
                    apply_inbound_system::<T>
                        .after(drain_ingress_system)
                        .in_set(ApplyInbound),
                );
            }
        }
        channel
    }

    /// Stop synchronizing `T` and drop its per-entity sync state. Returns
    /// false if `T` was never registered.
    pub fn disable_sync<T: SyncComponent>(&mut self) -> bool {
        if !self.world.resource_mut::<SyncRegistry>().set_enabled::<T>(false) {
            return false;
        }
        let mut query = self
            .world
            .query_filtered::<Entity, Or<(With<Shadow<T>>, With<LastApplied<T>>)>>();
        let tracked: Vec<Entity> = query.iter(&self.world).collect();
        for entity in tracked {
            self.world.entity_mut(entity).remove::<(Shadow<T>, LastApplied<T>)>();
        }
        true
    }

    /// Digest of the registered channel layout; equal on both ends iff they
    /// registered the same types in the same order.
    pub fn sync_fingerprint(&self) -> u64 {
        self.world.resource::<SyncRegistry>().fingerprint()
    }

    /// Resume synchronizing `T`. Every value is re-sent in full.
    pub fn enable_sync<T: SyncComponent>(&mut self) -> bool {
        self.world.resource_mut::<SyncRegistry>().set_enabled::<T>(true)
    }

    // ------------------------------------------------------------------
    // Host plumbing
    // ------------------------------------------------------------------

    /// Thread-safe handle for staging spawn/despawn requests.
    pub fn staging_sender(&self) -> StagingSender {
        self.staging.clone()
    }

    /// Network-side handle to this world's queues.
    pub fn network_bridge(&self) -> NetworkBridge {
        self.bridge.clone()
    }

    /// Systems added here run after movement and before sync every tick.
    pub fn gameplay_schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedules[Phase::Gameplay as usize]
    }

    pub fn enable_profiling(&mut self) {
        if self.profiler.is_none() {
            let budget = Duration::from_secs_f32(self.config().fixed_timestep());
            self.profiler = Some(Profiler::with_budget(budget));
        }
    }

    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    /// Get a snapshot of the current simulation state.
    pub fn snapshot(&mut self) -> Snapshot {
        let tick = self.current_tick();
        Snapshot::from_world(&mut self.world, tick)
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&mut self) -> String {
        self.snapshot().to_json().unwrap_or_else(|_| "{}".to_string())
    }

    pub fn current_tick(&self) -> u64 {
        self.world.resource::<SimTick>().0
    }

    /// Elapsed simulation time in seconds.
    pub fn current_time(&self) -> f32 {
        self.time
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn config(&self) -> &SimConfig {
        self.world.resource::<SimConfig>()
    }

    pub fn grid(&self) -> &Grid {
        self.world.resource::<Grid>()
    }

    /// Edit the map. Call between ticks only.
    pub fn grid_mut(&mut self) -> Mut<'_, Grid> {
        self.world.resource_mut::<Grid>()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}
