//! Simulation configuration and the global tick counter.

use bevy_ecs::prelude::*;

/// Configuration errors caught by [`SimConfig::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick_rate_hz must be at least 1")]
    ZeroTickRate,
    #[error("grid dimensions must be non-zero (got {width}x{height}x{floors})")]
    EmptyGrid { width: u32, height: u32, floors: u8 },
    #[error("pathfinder_pool_size ({pool}) must cover max_path_requests_per_tick ({cap})")]
    PoolTooSmall { pool: usize, cap: usize },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// Configuration for the simulation core.
#[derive(Resource, Debug, Clone)]
pub struct SimConfig {
    /// Fixed ticks per second.
    pub tick_rate_hz: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    pub grid_floors: u8,
    /// A* expansions before a search gives up with `Timeout`.
    pub max_nodes_per_search: usize,
    /// Maximum number of steps a path buffer holds.
    pub max_waypoints: usize,
    /// Number of pooled pathfinding scratch contexts.
    pub pathfinder_pool_size: usize,
    /// Path requests serviced per tick; the rest wait in arrival order.
    pub max_path_requests_per_tick: usize,
    /// Default for new requests; cardinal-only when false.
    pub allow_diagonals: bool,
    /// Reject diagonal steps that clip a blocked orthogonal neighbour.
    pub prevent_corner_cutting: bool,
    /// Default ticks for a cardinal step.
    pub cardinal_step_ticks: u64,
    /// Default ticks for a diagonal step.
    pub diagonal_step_ticks: u64,
    /// Interval for `Trigger::OnTick` sync.
    pub sync_rate_ticks: u64,
    /// Staged spawn/despawn requests materialized per tick.
    pub max_staging_per_tick: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            grid_width: 128,
            grid_height: 128,
            grid_floors: 1,
            max_nodes_per_search: 8192,
            max_waypoints: 256,
            pathfinder_pool_size: 8,
            max_path_requests_per_tick: 8,
            allow_diagonals: true,
            prevent_corner_cutting: true,
            cardinal_step_ticks: 1,
            diagonal_step_ticks: 1,
            sync_rate_ticks: 3,
            max_staging_per_tick: 64,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, accept: impl Fn(&T) -> bool) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(v) if accept(&v) => Some(v),
        Ok(_) => {
            tracing::warn!("{} '{}' out of range, using default", name, raw);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

impl SimConfig {
    /// Fixed timestep in seconds.
    pub fn fixed_timestep(&self) -> f32 {
        1.0 / self.tick_rate_hz.max(1) as f32
    }

    /// Load config from `SIM_*` environment variables or use defaults.
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("SIM_TICK_RATE", |v| (1..=1000).contains(v)) {
            config.tick_rate_hz = v;
        }
        if let Some(v) = env_parse::<u32>("SIM_GRID_WIDTH", |v| *v > 0) {
            config.grid_width = v;
        }
        if let Some(v) = env_parse::<u32>("SIM_GRID_HEIGHT", |v| *v > 0) {
            config.grid_height = v;
        }
        if let Some(v) = env_parse::<u8>("SIM_GRID_FLOORS", |v| *v > 0) {
            config.grid_floors = v;
        }
        if let Some(v) = env_parse::<usize>("SIM_MAX_NODES_PER_SEARCH", |v| *v > 0) {
            config.max_nodes_per_search = v;
        }
        if let Some(v) = env_parse::<usize>("SIM_MAX_WAYPOINTS", |v| *v > 0) {
            config.max_waypoints = v;
        }
        if let Some(v) = env_parse::<usize>("SIM_PATHFINDER_POOL", |v| *v > 0) {
            config.pathfinder_pool_size = v;
        }
        if let Some(v) = env_parse::<usize>("SIM_PATH_REQUESTS_PER_TICK", |v| *v > 0) {
            config.max_path_requests_per_tick = v;
        }
        if let Some(v) = env_parse::<bool>("SIM_ALLOW_DIAGONALS", |_| true) {
            config.allow_diagonals = v;
        }
        if let Some(v) = env_parse::<u64>("SIM_SYNC_RATE_TICKS", |v| *v > 0) {
            config.sync_rate_ticks = v;
        }

        config
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.grid_width == 0 || self.grid_height == 0 || self.grid_floors == 0 {
            return Err(ConfigError::EmptyGrid {
                width: self.grid_width,
                height: self.grid_height,
                floors: self.grid_floors,
            });
        }
        if self.max_nodes_per_search == 0 {
            return Err(ConfigError::Zero("max_nodes_per_search"));
        }
        if self.max_waypoints == 0 {
            return Err(ConfigError::Zero("max_waypoints"));
        }
        if self.max_path_requests_per_tick == 0 {
            return Err(ConfigError::Zero("max_path_requests_per_tick"));
        }
        if self.pathfinder_pool_size < self.max_path_requests_per_tick {
            return Err(ConfigError::PoolTooSmall {
                pool: self.pathfinder_pool_size,
                cap: self.max_path_requests_per_tick,
            });
        }
        if self.cardinal_step_ticks == 0 || self.diagonal_step_ticks == 0 {
            return Err(ConfigError::Zero("step ticks"));
        }
        if self.sync_rate_ticks == 0 {
            return Err(ConfigError::Zero("sync_rate_ticks"));
        }
        Ok(())
    }
}

/// Global simulation tick counter, incremented at the start of every tick.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimTick(pub u64);

impl SimTick {
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// True on ticks that fall on an `every`-tick boundary.
    #[inline]
    pub fn is_multiple_of(&self, every: u64) -> bool {
        every > 0 && self.0 % every == 0
    }
}
