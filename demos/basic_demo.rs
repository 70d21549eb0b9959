//! Basic demonstration of the grid simulation: a server and a client world
//! connected through the in-memory transport.
//!
//! Run with: cargo run --example basic_demo
//! Set RUST_LOG=gridnet_sim=debug for per-request logging.

use gridnet_sim::sync::{SyncSettings, Trigger};
use gridnet_sim::{GridCoord, GridPosition, MemoryTransport, MoveIntent, NetworkId, PeerId, SimConfig, SimWorld};
use tracing_subscriber::EnvFilter;

const SERVER: PeerId = PeerId(1000);
const CLIENT: PeerId = PeerId(1);

fn register(sim: &mut SimWorld) {
    // Same order on both sides: channels are assigned by registration order.
    sim.register_sync::<GridPosition>(SyncSettings::server(Trigger::OnChange));
    sim.register_sync::<MoveIntent>(SyncSettings::client());
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = SimConfig {
        grid_width: 24,
        grid_height: 12,
        cardinal_step_ticks: 3,
        diagonal_step_ticks: 4,
        ..SimConfig::load_or_default()
    };

    let mut server = SimWorld::with_config(config.clone());
    let mut client = SimWorld::client(config);
    register(&mut server);
    register(&mut client);
    if server.sync_fingerprint() != client.sync_fingerprint() {
        tracing::error!("Sync registrations differ between server and client");
        return;
    }
    server.enable_profiling();

    // A wall with a single gap.
    server
        .grid_mut()
        .fill_rect(GridCoord::new(12, 0), GridCoord::new(12, 10), false);

    let mut server_net = MemoryTransport::new(SERVER);
    let mut client_net = MemoryTransport::new(CLIENT);
    MemoryTransport::connect(&mut server_net, &mut client_net);
    let server_bridge = server.network_bridge();
    let client_bridge = client.network_bridge();

    let hero = NetworkId(1);
    server
        .spawn_owned_agent(hero, GridCoord::new(2, 2), CLIENT)
        .expect("spawn hero");
    for (n, y) in [4, 6, 8].into_iter().enumerate() {
        let key = NetworkId(10 + n as u64);
        server.spawn_agent(key, GridCoord::new(18, y)).expect("spawn wanderer");
        server.request_move_to(key, GridCoord::new(3, y));
    }

    println!("=== Grid Simulation Demo ===\n");
    for round in 0..120 {
        if round == 2 {
            println!("--- Client asks to move the hero through the gap ---\n");
            client.send_intent(hero, MoveIntent { x: 20, y: 2, floor: 0 });
        }

        client_bridge.pump(&mut client_net);
        client.tick();
        client_bridge.flush(&mut client_net);

        server_bridge.pump(&mut server_net);
        server.tick();
        server_bridge.flush(&mut server_net);

        if (round + 1) % 20 == 0 {
            println!(
                "tick {:>3}: server hero at {:?} ({:?}), client sees {:?}",
                server.current_tick(),
                server.position_of(hero),
                server.status_of(hero),
                client.position_of(hero)
            );
        }
    }

    if let Some(profiler) = server.profiler() {
        profiler.log_summary();
    }

    println!("\n=== Final Server State (JSON) ===\n");
    match server.snapshot().to_json_pretty() {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("snapshot failed: {}", e),
    }
}
