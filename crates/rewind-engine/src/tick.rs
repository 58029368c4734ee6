//! Fixed-timestep tick loop with catch-up and rollback.
//!
//! The [`TickLoop`] owns the [`World`] and drives it forward one fixed tick
//! at a time. Each tick:
//!
//! 1. The tick counter advances and [`SimulationTime`] is refreshed
//!    (`elapsed = tick * dt`, never accumulated).
//! 2. User systems run in registration order, reading the tick's
//!    [`InputFrame`] through the [`TickContext`].
//! 3. Built-in passes run: gravity, movement, then the collision pipeline.
//! 4. A snapshot of the world is stored under the tick, and history older
//!    than the rollback window or the last confirmed tick is pruned.
//!
//! [`TickLoop::advance`] feeds wall-clock time into an accumulator and runs
//! as many ticks as are due, but never more than `max_catch_up_steps`; the
//! rest of a long stall is discarded. A pending rollback is processed before
//! any new tick: the target snapshot is restored and the ticks up to the
//! pre-rollback tick are re-simulated with the retained inputs.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use rewind_engine::prelude::*;
//!
//! let mut tick_loop = TickLoop::new(World::new(), EngineConfig::default()).unwrap();
//!
//! // 60 Hz: 50 ms of wall-clock time is three ticks.
//! let report = tick_loop.advance(Duration::from_millis(50));
//! assert_eq!(report.steps, 3);
//! assert_eq!(tick_loop.tick_count(), 3);
//!
//! // Roll back and re-simulate: the state lands on the same hash.
//! let hash = tick_loop.state_hash();
//! tick_loop.rollback_to(1).unwrap();
//! assert_eq!(tick_loop.tick_count(), 3);
//! assert_eq!(tick_loop.state_hash(), hash);
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rewind_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::collision::{self, CollisionSettings, CollisionStats, COLLISION_SYSTEM_NAME};
use crate::components::{register_engine_types, GlobalGravity, LayerMatrix, SimulationTime};
use crate::config::EngineConfig;
use crate::movement::{integrate_movement, MOVEMENT_SYSTEM_NAME};
use crate::physics::{integrate_gravity, PHYSICS_SYSTEM_NAME};
use crate::snapshot::{SnapshotHistory, TickSnapshot};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One player's input for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub motion: FxVec3,
    pub aim: FxVec3,
    pub buttons: u32,
}

impl PlayerInput {
    pub fn pressed(&self, button: u32) -> bool {
        self.buttons & button != 0
    }
}

/// Every player's input for one tick, keyed by player id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFrame {
    pub players: BTreeMap<u32, PlayerInput>,
}

impl InputFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_player(mut self, player: u32, input: PlayerInput) -> Self {
        self.players.insert(player, input);
        self
    }

    pub fn player(&self, player: u32) -> Option<&PlayerInput> {
        self.players.get(&player)
    }
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// What a user system sees of the current tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub tick: u64,
    pub dt: Fx,
    pub input: &'a InputFrame,
}

/// A user system. Runs once per tick, before the built-in passes.
pub type SystemFn = fn(&mut World, &TickContext<'_>);

#[derive(Debug)]
struct RegisteredSystem {
    name: String,
    func: SystemFn,
}

/// Errors from system registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("duplicate system name: {name:?}")]
    DuplicateSystem { name: String },

    #[error("system {system:?} depends on {dependency:?}, which is not registered")]
    MissingDependency { system: String, dependency: String },
}

const BUILTIN_SYSTEMS: [&str; 3] = [PHYSICS_SYSTEM_NAME, MOVEMENT_SYSTEM_NAME, COLLISION_SYSTEM_NAME];

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Timing and counters for the last tick.
#[derive(Debug, Clone, Default)]
pub struct TickDiagnostics {
    pub tick: u64,
    /// Wall-clock time per system in execution order, built-ins included.
    pub system_times: Vec<(String, Duration)>,
    pub total_time: Duration,
    pub physics_bodies: usize,
    pub moved: usize,
    pub collision: CollisionStats,
    /// Payload size of the snapshot taken for this tick.
    pub snapshot_bytes: usize,
}

/// Why a rollback was refused. Refusals leave the simulation untouched.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("tick {target} is in the future (current tick {current})")]
    FutureTick { target: u64, current: u64 },

    #[error("tick {target} is outside the rollback window ({window} ticks behind {current})")]
    OutsideWindow { target: u64, current: u64, window: u32 },

    #[error("tick {target} precedes the last confirmed tick {confirmed}")]
    BeforeConfirmed { target: u64, confirmed: u64 },

    #[error("no snapshot retained for tick {target}")]
    NoSnapshot { target: u64 },

    #[error("snapshots are disabled")]
    SnapshotsDisabled,

    #[error(transparent)]
    Restore(#[from] EcsError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Tick the simulation was at when the rollback started.
    pub from_tick: u64,
    /// Tick whose snapshot was restored.
    pub to_tick: u64,
    pub resimulated: u64,
    pub restore: RestoreReport,
    /// Snapshot hash of `from_tick` before the rollback, if one was held.
    pub previous_hash: Option<String>,
    /// World hash after re-simulating back to `from_tick`.
    pub resimulated_hash: String,
}

impl RollbackReport {
    /// True when re-simulation changed the state of `from_tick`, which is
    /// expected after an input correction and a determinism bug otherwise.
    pub fn diverged(&self) -> bool {
        self.previous_hash
            .as_deref()
            .is_some_and(|prev| prev != self.resimulated_hash)
    }
}

/// Outcome of one [`TickLoop::advance`] call.
#[derive(Debug)]
pub struct FrameReport {
    /// Ticks stepped for wall-clock time (re-simulated ticks not counted).
    pub steps: u32,
    /// Backlog thrown away by the catch-up cap.
    pub discarded: Duration,
    /// Result of the pending rollback, if one was processed.
    pub rollback: Option<Result<RollbackReport, RollbackError>>,
    /// Tick count after the frame.
    pub tick: u64,
}

// ---------------------------------------------------------------------------
// TickLoop
// ---------------------------------------------------------------------------

pub struct TickLoop {
    world: World,
    config: EngineConfig,
    collision: CollisionSettings,
    dt: Fx,
    step_duration: Duration,
    accumulator: Duration,
    systems: Vec<RegisteredSystem>,
    history: SnapshotHistory,
    inputs: BTreeMap<u64, InputFrame>,
    pending_rollback: Option<u64>,
    /// Authoritative; mirrored into `SimulationTime` every tick.
    tick: u64,
    last_confirmed: u64,
    last_diagnostics: TickDiagnostics,
}

impl TickLoop {
    /// Validate `config`, register the engine types on `world`, install any
    /// missing singletons and capture the starting snapshot.
    ///
    /// If `world` already holds a [`SimulationTime`], its tick and confirmed
    /// tick are adopted.
    pub fn new(mut world: World, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        register_engine_types(&mut world)?;

        let (tick, last_confirmed) = world
            .resource::<SimulationTime>()
            .map_or((0, 0), |t| (t.tick, t.last_confirmed_tick.min(t.tick)));
        let dt = config.fixed_dt_fx();

        let mut tick_loop = Self {
            world,
            collision: CollisionSettings::new(&config.collision, dt),
            dt,
            step_duration: config.fixed_dt(),
            accumulator: Duration::ZERO,
            systems: Vec::new(),
            history: SnapshotHistory::new(),
            inputs: BTreeMap::new(),
            pending_rollback: None,
            tick,
            last_confirmed,
            last_diagnostics: TickDiagnostics::default(),
            config,
        };
        for name in tick_loop.install_missing_singletons() {
            tracing::debug!(resource = name, "installed default singleton");
        }
        tick_loop.sync_time();
        if tick_loop.config.snapshots_enabled {
            tick_loop
                .history
                .insert(TickSnapshot::capture(&tick_loop.world, tick));
        }
        Ok(tick_loop)
    }

    // -- systems ------------------------------------------------------------

    /// Register a user system. Systems run in registration order.
    pub fn add_system(&mut self, name: &str, func: SystemFn) -> Result<(), ScheduleError> {
        self.add_system_after(name, &[], func)
    }

    /// Register a user system that must run after each system in `after`.
    /// Dependencies must already be registered, so registration order
    /// satisfies every constraint.
    pub fn add_system_after(
        &mut self,
        name: &str,
        after: &[&str],
        func: SystemFn,
    ) -> Result<(), ScheduleError> {
        if BUILTIN_SYSTEMS.contains(&name) || self.systems.iter().any(|s| s.name == name) {
            return Err(ScheduleError::DuplicateSystem {
                name: name.to_owned(),
            });
        }
        if let Some(missing) = after
            .iter()
            .find(|dep| !self.systems.iter().any(|s| s.name == **dep))
        {
            return Err(ScheduleError::MissingDependency {
                system: name.to_owned(),
                dependency: (*missing).to_owned(),
            });
        }
        self.systems.push(RegisteredSystem {
            name: name.to_owned(),
            func,
        });
        Ok(())
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// User system names in execution order.
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    // -- stepping -----------------------------------------------------------

    /// Feed `elapsed` wall-clock time into the loop.
    ///
    /// Processes a pending rollback first, then runs every tick that is due,
    /// capped at `max_catch_up_steps`. Backlog past the cap is discarded.
    pub fn advance(&mut self, elapsed: Duration) -> FrameReport {
        let rollback = self.pending_rollback.take().map(|target| {
            let result = self.rollback_to(target);
            if let Err(err) = &result {
                tracing::warn!(target_tick = target, tick = self.tick, %err, "rollback request dropped");
            }
            result
        });

        self.accumulator = self.accumulator.saturating_add(elapsed);
        let cap = self.step_duration * self.config.max_catch_up_steps;
        let mut discarded = Duration::ZERO;
        if self.accumulator > cap {
            discarded = self.accumulator - cap;
            tracing::debug!(?discarded, max_steps = self.config.max_catch_up_steps, "catch-up backlog discarded");
            self.accumulator = cap;
        }

        let mut steps = 0;
        while self.accumulator >= self.step_duration {
            self.step();
            self.accumulator -= self.step_duration;
            steps += 1;
        }

        FrameReport {
            steps,
            discarded,
            rollback,
            tick: self.tick,
        }
    }

    /// Run `count` ticks back to back, ignoring wall-clock time.
    pub fn run_ticks(&mut self, count: u64) {
        for _ in 0..count {
            self.step();
        }
    }

    /// Execute one tick.
    pub fn step(&mut self) {
        let started = Instant::now();
        self.tick += 1;
        let tick = self.tick;

        for name in self.install_missing_singletons() {
            tracing::warn!(tick, resource = name, "singleton missing; restored default");
        }
        self.sync_time();

        let mut system_times = Vec::with_capacity(self.systems.len() + BUILTIN_SYSTEMS.len());
        let no_input = InputFrame::default();
        let ctx = TickContext {
            tick,
            dt: self.dt,
            input: self.inputs.get(&tick).unwrap_or(&no_input),
        };
        for system in &self.systems {
            let t = Instant::now();
            (system.func)(&mut self.world, &ctx);
            system_times.push((system.name.clone(), t.elapsed()));
        }

        let t = Instant::now();
        let physics_bodies = integrate_gravity(&mut self.world, self.dt);
        system_times.push((PHYSICS_SYSTEM_NAME.to_owned(), t.elapsed()));

        let t = Instant::now();
        let moved = integrate_movement(&mut self.world, self.dt);
        system_times.push((MOVEMENT_SYSTEM_NAME.to_owned(), t.elapsed()));

        let t = Instant::now();
        let collision = collision::run_collision(&mut self.world, tick, &self.collision);
        system_times.push((COLLISION_SYSTEM_NAME.to_owned(), t.elapsed()));

        let mut snapshot_bytes = 0;
        if self.config.snapshots_enabled {
            let snapshot = TickSnapshot::capture(&self.world, tick);
            snapshot_bytes = snapshot.image.byte_len();
            self.history.insert(snapshot);
        }
        self.prune();

        tracing::trace!(tick, physics_bodies, moved, candidates = collision.candidates, "tick stepped");
        self.last_diagnostics = TickDiagnostics {
            tick,
            system_times,
            total_time: started.elapsed(),
            physics_bodies,
            moved,
            collision,
            snapshot_bytes,
        };
    }

    // -- rollback -----------------------------------------------------------

    /// Queue a rollback to `target`, processed at the start of the next
    /// [`advance`](Self::advance). Several requests collapse to the earliest.
    pub fn request_rollback(&mut self, target: u64) {
        self.pending_rollback = Some(self.pending_rollback.map_or(target, |t| t.min(target)));
    }

    pub fn pending_rollback(&self) -> Option<u64> {
        self.pending_rollback
    }

    /// Check whether `target` may be rolled back to right now.
    pub fn can_rollback_to(&self, target: u64) -> Result<(), RollbackError> {
        if !self.config.snapshots_enabled {
            return Err(RollbackError::SnapshotsDisabled);
        }
        if target > self.tick {
            return Err(RollbackError::FutureTick {
                target,
                current: self.tick,
            });
        }
        let window = self.config.max_rollback_window;
        if self.tick - target > u64::from(window) {
            return Err(RollbackError::OutsideWindow {
                target,
                current: self.tick,
                window,
            });
        }
        if target < self.last_confirmed {
            return Err(RollbackError::BeforeConfirmed {
                target,
                confirmed: self.last_confirmed,
            });
        }
        if !self.history.contains(target) {
            return Err(RollbackError::NoSnapshot { target });
        }
        Ok(())
    }

    /// Restore the snapshot of `target` and re-simulate up to the current
    /// tick with the retained inputs.
    ///
    /// Entities spawned after `target` are removed and entities despawned
    /// since are brought back with their original ids. Event and contact
    /// buffers are not part of the snapshot: they are emptied and rebuilt by
    /// re-simulation, or kept as they are when `target` is the current tick.
    pub fn rollback_to(&mut self, target: u64) -> Result<RollbackReport, RollbackError> {
        self.can_rollback_to(target)?;
        let snapshot = self
            .history
            .get(target)
            .cloned()
            .ok_or(RollbackError::NoSnapshot { target })?;

        let from_tick = self.tick;
        let previous_hash = self.history.get(from_tick).map(|s| s.hash.clone());

        let restore = self.world.rewind_to_image(&snapshot.image)?;
        self.tick = target;
        self.history.truncate_after(target);
        let resimulated = from_tick - target;
        // Buffers still describe the current tick's collision pass.
        if resimulated > 0 {
            collision::clear_collision_buffers(&mut self.world);
        }
        self.sync_time();

        for _ in 0..resimulated {
            self.step();
        }
        let resimulated_hash = self.world.state_hash();

        tracing::debug!(
            from_tick,
            to_tick = target,
            resimulated,
            restored = restore.restored,
            "rollback re-simulated"
        );
        Ok(RollbackReport {
            from_tick,
            to_tick: target,
            resimulated,
            restore,
            previous_hash,
            resimulated_hash,
        })
    }

    /// Mark everything up to `tick` as final. Snapshots and inputs older
    /// than it are dropped, and no rollback may go behind it. Clamped to the
    /// current tick; never moves backwards. Returns the confirmed tick.
    pub fn confirm_tick(&mut self, tick: u64) -> u64 {
        let tick = tick.min(self.tick);
        if tick > self.last_confirmed {
            self.last_confirmed = tick;
            self.sync_time();
            self.prune();
        }
        self.last_confirmed
    }

    pub fn last_confirmed_tick(&self) -> u64 {
        self.last_confirmed
    }

    // -- input --------------------------------------------------------------

    /// Input for the next tick.
    pub fn set_input(&mut self, input: InputFrame) {
        self.inputs.insert(self.tick + 1, input);
    }

    /// Store the input for `tick`. Past ticks only take effect through a
    /// rollback; see [`correct_input`](Self::correct_input).
    pub fn set_input_for_tick(&mut self, tick: u64, input: InputFrame) -> Result<(), RollbackError> {
        if tick <= self.last_confirmed {
            return Err(RollbackError::BeforeConfirmed {
                target: tick,
                confirmed: self.last_confirmed,
            });
        }
        self.inputs.insert(tick, input);
        Ok(())
    }

    /// Replace the input of an already simulated tick and request the
    /// rollback that replays it. Future ticks are simply stored.
    pub fn correct_input(&mut self, tick: u64, input: InputFrame) -> Result<(), RollbackError> {
        if tick > self.tick {
            return self.set_input_for_tick(tick, input);
        }
        if tick <= self.last_confirmed {
            return Err(RollbackError::BeforeConfirmed {
                target: tick,
                confirmed: self.last_confirmed,
            });
        }
        let target = tick - 1;
        self.can_rollback_to(target)?;
        self.set_input_for_tick(tick, input)?;
        self.request_rollback(target);
        Ok(())
    }

    pub fn input_for_tick(&self, tick: u64) -> Option<&InputFrame> {
        self.inputs.get(&tick)
    }

    // -- accessors ----------------------------------------------------------

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Simulation time in seconds, `tick * dt`.
    pub fn sim_time(&self) -> Fx {
        self.dt.mul_int(tick_as_i64(self.tick))
    }

    pub fn fixed_dt(&self) -> Fx {
        self.dt
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable world access for setup and tests. Changes made here between
    /// ticks are captured by the next tick's snapshot.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    /// Determinism hash of the current world.
    pub fn state_hash(&self) -> String {
        self.world.state_hash()
    }

    // -- internals ----------------------------------------------------------

    fn install_missing_singletons(&mut self) -> Vec<&'static str> {
        let mut installed = Vec::new();
        if !self.world.has_resource::<SimulationTime>() {
            self.world.insert_resource(SimulationTime::new(
                self.config.tick_rate,
                self.config.max_rollback_window,
            ));
            installed.push("simulation_time");
        }
        if !self.world.has_resource::<GlobalGravity>() {
            self.world.insert_resource(GlobalGravity::default());
            installed.push("global_gravity");
        }
        if !self.world.has_resource::<LayerMatrix>() {
            self.world.insert_resource(LayerMatrix::default());
            installed.push("layer_matrix");
        }
        installed
    }

    fn sync_time(&mut self) {
        let (rate, window) = (self.config.tick_rate, self.config.max_rollback_window);
        let elapsed = self.sim_time();
        let (tick, confirmed, dt) = (self.tick, self.last_confirmed, self.dt);
        let time = self
            .world
            .resource_or_insert_with(|| SimulationTime::new(rate, window));
        time.tick = tick;
        time.last_confirmed_tick = confirmed;
        time.delta = dt;
        time.elapsed = elapsed;
        time.tick_rate = rate;
        time.max_rollback_window = window;
    }

    /// Oldest tick a rollback may still reach.
    fn oldest_reachable(&self) -> u64 {
        self.tick
            .saturating_sub(u64::from(self.config.max_rollback_window))
            .max(self.last_confirmed)
    }

    fn prune(&mut self) {
        let oldest = self.oldest_reachable();
        self.history.prune_before(oldest);
        // Re-simulating from `oldest` replays ticks after it only.
        self.inputs = self.inputs.split_off(&(oldest + 1));
    }
}

fn tick_as_i64(tick: u64) -> i64 {
    i64::try_from(tick).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Movement, Physics, Transform};

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Score(u64);

    impl Snapshotable for Score {
        const PRIORITY: i32 = 100;
    }

    fn score_system(world: &mut World, ctx: &TickContext<'_>) {
        let bonus = ctx.input.player(0).map_or(1, |p| u64::from(p.buttons));
        let score = world.resource_or_insert_with(|| Score(0));
        score.0 += bonus;
    }

    fn double_system(world: &mut World, _ctx: &TickContext<'_>) {
        if let Some(score) = world.resource_mut::<Score>() {
            score.0 *= 2;
        }
    }

    fn scored_loop() -> TickLoop {
        let mut world = World::new();
        world.register_snapshotable_resource::<Score>("score").unwrap();
        world.insert_resource(Score(0));
        let mut tick_loop = TickLoop::new(world, EngineConfig::default()).unwrap();
        tick_loop.add_system("score", score_system).unwrap();
        tick_loop
    }

    fn score(tick_loop: &TickLoop) -> u64 {
        tick_loop.world().resource::<Score>().unwrap().0
    }

    // -- 1. Construction --

    #[test]
    fn new_installs_singletons_and_a_starting_snapshot() {
        let tick_loop = TickLoop::new(World::new(), EngineConfig::default()).unwrap();
        let world = tick_loop.world();
        assert!(world.has_resource::<SimulationTime>());
        assert!(world.has_resource::<GlobalGravity>());
        assert!(world.has_resource::<LayerMatrix>());
        assert_eq!(tick_loop.history().ticks().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            tick_rate: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            TickLoop::new(World::new(), config),
            Err(EngineError::Config(_))
        ));
    }

    // -- 2. Systems --

    #[test]
    fn systems_run_in_registration_order() {
        let mut tick_loop = scored_loop();
        tick_loop
            .add_system_after("double", &["score"], double_system)
            .unwrap();
        tick_loop.run_ticks(2);
        // (0 + 1) * 2 = 2, then (2 + 1) * 2 = 6.
        assert_eq!(score(&tick_loop), 6);
        assert_eq!(tick_loop.system_names(), vec!["score", "double"]);

        let names: Vec<_> = tick_loop
            .last_diagnostics()
            .system_times
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["score", "double", "physics", "movement", "collision"]);
    }

    #[test]
    fn bad_registrations_are_errors() {
        let mut tick_loop = scored_loop();
        assert_eq!(
            tick_loop.add_system("score", double_system),
            Err(ScheduleError::DuplicateSystem { name: "score".into() })
        );
        assert_eq!(
            tick_loop.add_system("physics", double_system),
            Err(ScheduleError::DuplicateSystem { name: "physics".into() })
        );
        assert!(matches!(
            tick_loop.add_system_after("late", &["nope"], double_system),
            Err(ScheduleError::MissingDependency { .. })
        ));
        assert_eq!(tick_loop.system_count(), 1);
    }

    // -- 3. Time --

    #[test]
    fn catch_up_is_capped() {
        let mut tick_loop = scored_loop();
        let report = tick_loop.advance(Duration::from_millis(500));
        assert_eq!(report.steps, 3);
        assert!(report.discarded > Duration::from_millis(440));
        assert_eq!(tick_loop.tick_count(), 3);

        // Nothing carried over.
        assert_eq!(tick_loop.advance(Duration::ZERO).steps, 0);
    }

    #[test]
    fn absurd_frame_delta_saturates_instead_of_panicking() {
        let mut tick_loop = scored_loop();
        tick_loop.advance(Duration::from_millis(10));
        let report = tick_loop.advance(Duration::MAX);
        assert_eq!(report.steps, 3);
        assert_eq!(tick_loop.tick_count(), 3);
    }

    #[test]
    fn partial_ticks_accumulate() {
        let mut tick_loop = scored_loop();
        assert_eq!(tick_loop.advance(Duration::from_millis(10)).steps, 0);
        assert_eq!(tick_loop.advance(Duration::from_millis(10)).steps, 1);
        assert_eq!(tick_loop.tick_count(), 1);
    }

    #[test]
    fn simulation_time_mirrors_the_counter() {
        let mut tick_loop = scored_loop();
        tick_loop.run_ticks(120);
        let time = *tick_loop.world().resource::<SimulationTime>().unwrap();
        assert_eq!(time.tick, 120);
        assert_eq!(time.elapsed, Fx::from_ratio(1, 60).mul_int(120));
        assert_eq!(tick_loop.sim_time(), time.elapsed);
    }

    #[test]
    fn missing_singletons_self_heal() {
        let mut tick_loop = scored_loop();
        tick_loop.world_mut().remove_resource::<GlobalGravity>();
        tick_loop.world_mut().remove_resource::<SimulationTime>();
        tick_loop.run_ticks(1);
        assert!(tick_loop.world().has_resource::<GlobalGravity>());
        assert_eq!(tick_loop.world().resource::<SimulationTime>().unwrap().tick, 1);
    }

    // -- 4. Rollback --

    #[test]
    fn rollback_window_boundary() {
        let mut tick_loop = scored_loop();
        tick_loop.run_ticks(20);
        let window = u64::from(tick_loop.config().max_rollback_window);

        let err = tick_loop.rollback_to(20 - window - 1).unwrap_err();
        assert!(matches!(err, RollbackError::OutsideWindow { .. }), "got {err:?}");
        assert_eq!(tick_loop.tick_count(), 20);

        let report = tick_loop.rollback_to(20 - window).unwrap();
        assert_eq!(report.resimulated, window);
        assert!(!report.diverged());
        assert_eq!(tick_loop.tick_count(), 20);
    }

    #[test]
    fn future_and_confirmed_targets_are_refused() {
        let mut tick_loop = scored_loop();
        tick_loop.run_ticks(10);
        assert!(matches!(
            tick_loop.rollback_to(11),
            Err(RollbackError::FutureTick { .. })
        ));

        assert_eq!(tick_loop.confirm_tick(6), 6);
        assert!(matches!(
            tick_loop.rollback_to(5),
            Err(RollbackError::BeforeConfirmed { .. })
        ));
        assert_eq!(tick_loop.history().oldest().unwrap().tick, 6);
        tick_loop.rollback_to(6).unwrap();

        // Confirmation never moves backwards.
        assert_eq!(tick_loop.confirm_tick(2), 6);
    }

    #[test]
    fn rollback_without_snapshots_is_refused() {
        let config = EngineConfig {
            snapshots_enabled: false,
            ..EngineConfig::default()
        };
        let mut tick_loop = TickLoop::new(World::new(), config).unwrap();
        tick_loop.run_ticks(3);
        assert!(tick_loop.history().is_empty());
        assert!(matches!(
            tick_loop.rollback_to(2),
            Err(RollbackError::SnapshotsDisabled)
        ));
    }

    #[test]
    fn refused_request_is_reported_and_harmless() {
        let mut tick_loop = scored_loop();
        tick_loop.run_ticks(30);
        let hash = tick_loop.state_hash();
        tick_loop.request_rollback(2);
        let report = tick_loop.advance(Duration::ZERO);
        assert!(matches!(report.rollback, Some(Err(RollbackError::OutsideWindow { .. }))));
        assert_eq!(tick_loop.state_hash(), hash);
        assert_eq!(tick_loop.pending_rollback(), None);
    }

    #[test]
    fn late_input_correction_replays_the_tick() {
        let mut tick_loop = scored_loop();
        tick_loop.run_ticks(5);
        assert_eq!(score(&tick_loop), 5);

        // Tick 3 should have scored 10 instead of 1.
        let input = InputFrame::new().with_player(
            0,
            PlayerInput {
                buttons: 10,
                ..PlayerInput::default()
            },
        );
        tick_loop.correct_input(3, input).unwrap();
        assert_eq!(tick_loop.pending_rollback(), Some(2));

        let report = tick_loop.advance(Duration::ZERO);
        let rollback = report.rollback.unwrap().unwrap();
        assert_eq!((rollback.from_tick, rollback.to_tick), (5, 2));
        assert!(rollback.diverged());
        assert_eq!(score(&tick_loop), 14);
        assert_eq!(tick_loop.tick_count(), 5);
    }

    #[test]
    fn corrections_behind_confirmation_are_refused() {
        let mut tick_loop = scored_loop();
        tick_loop.run_ticks(5);
        tick_loop.confirm_tick(4);
        assert!(matches!(
            tick_loop.correct_input(4, InputFrame::new()),
            Err(RollbackError::BeforeConfirmed { .. })
        ));
        assert!(tick_loop.correct_input(5, InputFrame::new()).is_ok());
        assert!(tick_loop.correct_input(9, InputFrame::new()).is_ok());
        assert_eq!(tick_loop.pending_rollback(), Some(4));
    }

    #[test]
    fn rollback_removes_too_new_entities_and_revives_despawned_ones() {
        let mut world = World::new();
        register_engine_types(&mut world).unwrap();
        let keeper = world.spawn();
        world.insert(keeper, Transform::default()).unwrap();
        world.insert(keeper, Movement::new(FxVec3::X)).unwrap();
        world.insert(keeper, Physics::default()).unwrap();
        let mut tick_loop = TickLoop::new(world, EngineConfig::default()).unwrap();
        tick_loop.run_ticks(4);
        let hash = tick_loop.state_hash();

        let extra = tick_loop.world_mut().spawn();
        tick_loop
            .world_mut()
            .insert(extra, Transform::default())
            .unwrap();
        tick_loop.world_mut().despawn(keeper).unwrap();

        tick_loop.rollback_to(4).unwrap();
        assert!(tick_loop.world().is_alive(keeper));
        assert!(!tick_loop.world().is_alive(extra));
        assert_eq!(tick_loop.state_hash(), hash);
    }

    #[test]
    fn history_stays_inside_the_window() {
        let mut tick_loop = scored_loop();
        tick_loop.run_ticks(50);
        let window = u64::from(tick_loop.config().max_rollback_window);
        let ticks: Vec<u64> = tick_loop.history().ticks().collect();
        assert_eq!(ticks, (50 - window..=50).collect::<Vec<_>>());
    }
}
