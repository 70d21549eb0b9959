//! Per-phase tick profiler.
//!
//! `SimWorld` times each schedule phase when profiling is enabled (always
//! with the `profile` feature, or via `SimWorld::enable_profiling`). A tick
//! whose phases together exceed the fixed timestep counts as an overrun.

use std::time::{Duration, Instant};

/// Accumulated timings for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTiming {
    pub name: &'static str,
    pub runs: u64,
    pub total: Duration,
    pub worst: Duration,
    pub last: Duration,
}

impl PhaseTiming {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            runs: 0,
            total: Duration::ZERO,
            worst: Duration::ZERO,
            last: Duration::ZERO,
        }
    }

    pub fn mean(&self) -> Duration {
        match u32::try_from(self.runs) {
            Ok(0) => Duration::ZERO,
            Ok(runs) => self.total / runs,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.runs as f64),
        }
    }
}

#[derive(Debug, Default)]
pub struct Profiler {
    /// In first-recorded order; a tick has few phases, so lookup is linear.
    phases: Vec<PhaseTiming>,
    budget: Option<Duration>,
    current_tick: Duration,
    ticks: u64,
    overruns: u64,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profiler that counts ticks slower than `budget`.
    pub fn with_budget(budget: Duration) -> Self {
        Self {
            budget: Some(budget),
            ..Self::default()
        }
    }

    /// Run `f`, charging its wall time to `phase`.
    pub fn time_section<R>(&mut self, phase: &'static str, f: impl FnOnce() -> R) -> R {
        let started = Instant::now();
        let out = f();
        self.record(phase, started.elapsed());
        out
    }

    pub fn record(&mut self, phase: &'static str, elapsed: Duration) {
        let slot = match self.phases.iter().position(|p| p.name == phase) {
            Some(i) => i,
            None => {
                self.phases.push(PhaseTiming::new(phase));
                self.phases.len() - 1
            }
        };
        let timing = &mut self.phases[slot];
        timing.runs += 1;
        timing.total += elapsed;
        timing.last = elapsed;
        timing.worst = timing.worst.max(elapsed);
        self.current_tick += elapsed;
    }

    /// Close the current tick.
    pub fn tick(&mut self) {
        if self.budget.is_some_and(|b| self.current_tick > b) {
            self.overruns += 1;
            tracing::debug!("Tick {} overran its budget: {:?}", self.ticks + 1, self.current_tick);
        }
        self.current_tick = Duration::ZERO;
        self.ticks += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Ticks that took longer than the budget.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseTiming> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phases(&self) -> &[PhaseTiming] {
        &self.phases
    }

    pub fn section_names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|p| p.name).collect()
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|p| p.total).sum()
    }

    pub fn log_summary(&self) {
        let total = self.total();
        tracing::info!(
            "Profiled {} ticks, {} over budget, {:?} total",
            self.ticks,
            self.overruns,
            total
        );
        for phase in &self.phases {
            let share = if total.is_zero() {
                0.0
            } else {
                phase.total.as_secs_f64() / total.as_secs_f64() * 100.0
            };
            tracing::info!(
                "  {:<12} mean {:>10.2?} worst {:>10.2?} {:>5.1}%",
                phase.name,
                phase.mean(),
                phase.worst,
                share
            );
        }
    }

    pub fn reset(&mut self) {
        self.phases.clear();
        self.current_tick = Duration::ZERO;
        self.ticks = 0;
        self.overruns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_keep_first_seen_order() {
        let mut profiler = Profiler::new();
        for _ in 0..3 {
            profiler.record("ingress", Duration::from_micros(5));
            profiler.record("pathfinding", Duration::from_micros(50));
            profiler.tick();
        }
        assert_eq!(profiler.section_names(), vec!["ingress", "pathfinding"]);
        let pathfinding = profiler.phase("pathfinding").unwrap();
        assert_eq!(pathfinding.runs, 3);
        assert_eq!(pathfinding.mean(), Duration::from_micros(50));
        assert_eq!(profiler.total(), Duration::from_micros(165));

        profiler.reset();
        assert_eq!(profiler.tick_count(), 0);
        assert!(profiler.phases().is_empty());
    }

    #[test]
    fn test_overruns_count_slow_ticks() {
        let mut profiler = Profiler::with_budget(Duration::from_millis(10));
        profiler.record("movement", Duration::from_millis(4));
        profiler.record("sync", Duration::from_millis(4));
        profiler.tick();
        profiler.record("movement", Duration::from_millis(8));
        profiler.record("sync", Duration::from_millis(4));
        profiler.tick();

        assert_eq!(profiler.overruns(), 1);
        assert_eq!(profiler.phase("movement").unwrap().worst, Duration::from_millis(8));
        assert_eq!(profiler.phase("movement").unwrap().last, Duration::from_millis(8));
    }

    #[test]
    fn test_time_section_returns_value() {
        let mut profiler = Profiler::new();
        let n = profiler.time_section("gameplay", || 7);
        assert_eq!(n, 7);
        assert_eq!(profiler.phase("gameplay").unwrap().runs, 1);
    }
}
