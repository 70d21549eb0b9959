//! ECS systems for the tick pipeline.
//!
//! Systems contain the logic that operates on components. Each tick runs
//! the phases below in order; within a phase, systems that share the grid
//! are chained.
//!
//! **Ingress** - network traffic enters the world:
//! - `drain_ingress_system` (in `net`) - inbound queue into `InboundBuffer`
//! - `peer_disconnect_system` (in `net`) - marks agents of departed peers
//! - `apply_inbound_system::<T>` (in `sync`) - one per registered type
//! - `apply_despawn_system` (in `sync`, client) - marks replicas the server removed
//!
//! **Staging** - host requests become entities:
//! - `staging_system` - spawn/despawn requests, capped per tick
//! - `move_intent_system` - client intents become move requests (server)
//!
//! **Pathfinding**:
//! - `path_request_system` - bounded, arrival-ordered search servicing
//!
//! **Movement**:
//! - `movement_step_system` - land due steps, start path steps
//! - `directional_step_system` - start directional steps
//!
//! **Sync** - `server_sync_system::<T>` / `client_intent_system::<T>`
//!
//! **Cleanup**:
//! - `destruction_system` - release cells, unindex, despawn, announce (server)

pub mod destruction;
pub mod movement;
pub mod path_requests;
pub mod staging;

pub use destruction::*;
pub use movement::*;
pub use path_requests::*;
pub use staging::*;
