//! Gridnet - Simulation Core
//!
//! A fixed-timestep ECS simulation of agents on a shared tile grid, with
//! bounded A* pathfinding, tick-based step movement with cell reservation,
//! and server-authoritative component synchronization.
//! Uses `bevy_ecs` for the entity-component-system architecture.

pub mod api;
pub mod components;
pub mod config;
pub mod grid;
pub mod index;
pub mod net;
pub mod pathfinding;
pub mod profiler;
pub mod sync;
pub mod systems;
pub mod world;

pub use api::{Phase, SimWorld};
pub use components::*;
pub use config::{ConfigError, SimConfig, SimTick};
pub use grid::{Grid, GridCoord, Reservation};
pub use index::{EntityIndex, IndexKey, NetworkId};
pub use net::{MemoryTransport, NetworkBridge, PeerId, Transport};
pub use pathfinding::{PathBuffer, PathFailReason, PathFlags};
pub use sync::{Authority, NetRole, SyncComponent, SyncSettings, Trigger};
pub use systems::*;
pub use world::Snapshot;
