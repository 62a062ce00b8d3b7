//! Fixed-step lifecycle systems.
//!
//! Gameplay code does not touch the [`UnitManager`] directly while the
//! schedule runs. It queues [`UnitCommand`]s, which are applied in issue
//! order once per tick, and reads results back from [`CommandOutcomes`].
//!
//! ## Order (chained)
//! 1. `tick_clock_system` - advances [`SimTick`] and stamps the manager
//! 2. `command_apply_system` - drains [`CommandQueue`]
//! 3. `corpse_cleanup_system` - despawns units dead for `corpse_ticks`
//! 4. `stats_refresh_system` - refreshes [`StatsResource`] every `stats_interval`

use crate::components::{Position, UnitId, Velocity};
use crate::error::SpawnError;
use crate::manager::{PopulationStats, SpawnRequest, UnitManager};
use bevy_ecs::prelude::*;
use std::collections::VecDeque;

/// Configuration for the fixed-step driver.
#[derive(Resource, Debug, Clone)]
pub struct SimConfig {
    /// Fixed timestep in seconds (e.g., 1/30 = 0.0333 for 30 Hz).
    pub fixed_timestep: f32,
    /// Ticks a dead unit stays queryable before it is despawned.
    pub corpse_ticks: u64,
    /// Ticks between statistics refreshes. 0 refreshes every tick.
    pub stats_interval: u64,
    /// Outcomes retained between drains; the oldest are dropped past this.
    /// 0 disables outcome recording.
    pub outcome_capacity: usize,
    /// Time each fixed update with the profiler.
    pub profile: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0, // 30 Hz
            corpse_ticks: 1,
            stats_interval: 30, // ~1 second at 30 Hz
            outcome_capacity: 1024,
            profile: false,
        }
    }
}

/// Global simulation tick counter.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimTick(pub u64);

impl SimTick {
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// A deferred mutation of the population.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitCommand {
    Spawn(SpawnRequest),
    Despawn(UnitId),
    Move { id: UnitId, position: Position },
    SetVelocity { id: UnitId, velocity: Velocity },
    SetHeading { id: UnitId, yaw: f32 },
    Damage { id: UnitId, amount: f32 },
    Kill(UnitId),
}

/// Result of applying one [`UnitCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Spawned(UnitId),
    SpawnFailed { archetype: String, error: SpawnError },
    Applied(UnitId),
    /// The command had no effect (unknown, despawned or already dead unit).
    Rejected(UnitId),
}

/// Commands waiting for the next fixed update.
#[derive(Resource, Debug, Default)]
pub struct CommandQueue {
    pending: Vec<UnitCommand>,
}

impl CommandQueue {
    pub fn push(&mut self, command: UnitCommand) {
        self.pending.push(command);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn take(&mut self) -> Vec<UnitCommand> {
        std::mem::take(&mut self.pending)
    }
}

/// Outcomes of applied commands, in issue order, until drained.
#[derive(Resource, Debug, Default)]
pub struct CommandOutcomes {
    pending: VecDeque<CommandOutcome>,
    dropped: u64,
}

impl CommandOutcomes {
    /// Record an outcome, evicting the oldest once `capacity` is reached.
    pub fn push(&mut self, outcome: CommandOutcome, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.pending.len() >= capacity {
            self.pending.pop_front();
            self.dropped += 1;
        }
        self.pending.push_back(outcome);
    }

    /// Take all retained outcomes, oldest first.
    pub fn drain(&mut self) -> Vec<CommandOutcome> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.pending.iter()
    }

    /// Outcomes evicted before anyone drained them.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Most recent population statistics.
#[derive(Resource, Debug, Clone, Default)]
pub struct StatsResource {
    pub last: PopulationStats,
    /// Tick `last` was taken at.
    pub refreshed_at: u64,
}

/// Apply a single command to the manager.
pub fn apply_command(manager: &mut UnitManager, command: UnitCommand) -> CommandOutcome {
    let (id, applied) = match command {
        UnitCommand::Spawn(request) => {
            return match manager.spawn(&request.archetype, request.faction, request.position, request.heading) {
                Ok(id) => CommandOutcome::Spawned(id),
                Err(error) => CommandOutcome::SpawnFailed {
                    archetype: request.archetype,
                    error,
                },
            };
        }
        UnitCommand::Despawn(id) => (id, manager.despawn(id)),
        UnitCommand::Move { id, position } => (id, manager.update_position(id, position)),
        UnitCommand::SetVelocity { id, velocity } => (id, manager.set_velocity(id, velocity)),
        UnitCommand::SetHeading { id, yaw } => (id, manager.set_heading(id, yaw)),
        UnitCommand::Damage { id, amount } => (id, manager.apply_damage(id, amount).is_some()),
        UnitCommand::Kill(id) => (id, manager.kill(id)),
    };
    if applied {
        CommandOutcome::Applied(id)
    } else {
        CommandOutcome::Rejected(id)
    }
}

/// Advance the tick and propagate it to the manager.
///
/// ## Data Access
/// - Writes: SimTick, UnitManager
pub fn tick_clock_system(mut tick: ResMut<SimTick>, mut manager: ResMut<UnitManager>) {
    tick.increment();
    manager.set_tick(tick.0);
}

/// Apply every queued command in issue order.
///
/// ## Data Access
/// - Reads: SimConfig
/// - Writes: CommandQueue, UnitManager, CommandOutcomes
pub fn command_apply_system(
    config: Res<SimConfig>,
    mut queue: ResMut<CommandQueue>,
    mut manager: ResMut<UnitManager>,
    mut outcomes: ResMut<CommandOutcomes>,
) {
    let commands = queue.take();
    if commands.is_empty() {
        return;
    }
    let count = commands.len();
    let dropped_before = outcomes.dropped();
    for command in commands {
        let outcome = apply_command(&mut manager, command);
        outcomes.push(outcome, config.outcome_capacity);
    }
    let dropped = outcomes.dropped() - dropped_before;
    if dropped > 0 {
        tracing::debug!(dropped, retained = outcomes.len(), "undrained command outcomes evicted");
    }
    tracing::trace!(count, "unit commands applied");
}

/// Despawn units that have been dead for at least `corpse_ticks`.
///
/// ## Data Access
/// - Reads: SimConfig
/// - Writes: UnitManager
pub fn corpse_cleanup_system(config: Res<SimConfig>, mut manager: ResMut<UnitManager>) {
    if manager.corpse_count() == 0 {
        return;
    }
    let removed = manager.cleanup_corpses(config.corpse_ticks);
    if removed > 0 {
        tracing::debug!(removed, tick = manager.tick(), "corpses cleaned up");
    }
}

/// Refresh population statistics on the configured interval.
///
/// ## Data Access
/// - Reads: SimConfig, SimTick, UnitManager
/// - Writes: StatsResource
pub fn stats_refresh_system(
    config: Res<SimConfig>,
    tick: Res<SimTick>,
    manager: Res<UnitManager>,
    mut stats: ResMut<StatsResource>,
) {
    if config.stats_interval > 0 && tick.0 % config.stats_interval != 0 {
        return;
    }
    stats.last = manager.stats();
    stats.refreshed_at = tick.0;
    tracing::debug!(
        tick = tick.0,
        active = stats.last.active,
        peak = stats.last.peak_active,
        occupied_cells = stats.last.grid.occupied_cells,
        "population stats refreshed"
    );
}
