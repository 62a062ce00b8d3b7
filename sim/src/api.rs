//! Public API for the unit population.
//!
//! [`UnitWorld`] wraps a `bevy_ecs` world holding the [`UnitManager`] and
//! drives the lifecycle schedule at a fixed rate.
//!
//! ## Fixed Timestep
//!
//! `step(dt)` accumulates frame time and runs as many fixed updates as fit
//! (default 30 Hz). Commands queued between steps are applied at the start
//! of the next fixed update, in issue order.
//!
//! Queries do not go through the schedule: read them straight off
//! [`UnitWorld::manager`].

use crate::config::PopulationConfig;
use crate::error::ConfigError;
use crate::manager::{PopulationStats, UnitManager};
use crate::profiler::Profiler;
use crate::systems::lifecycle::{
    command_apply_system, corpse_cleanup_system, stats_refresh_system, tick_clock_system, CommandOutcome,
    CommandOutcomes, CommandQueue, SimConfig, SimTick, StatsResource, UnitCommand,
};
use crate::world::PopulationSnapshot;
use bevy_ecs::prelude::*;
use std::time::Instant;

/// Cap on fixed updates per `step` so a long hitch cannot spiral.
const MAX_UPDATES_PER_STEP: u32 = 8;

pub struct UnitWorld {
    world: World,
    schedule: Schedule,
    time: f32,
    /// Accumulated time for fixed timestep.
    time_accumulator: f32,
    profiler: Option<Profiler>,
}

impl UnitWorld {
    /// World with the default roster and default timing.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_config(&PopulationConfig::default(), SimConfig::default())
    }

    pub fn with_config(population: &PopulationConfig, config: SimConfig) -> Result<Self, ConfigError> {
        let manager = UnitManager::new(population)?;
        let profiler = config.profile.then(Profiler::new);

        let mut world = World::new();
        world.insert_resource(manager);
        world.insert_resource(config);
        world.insert_resource(SimTick(0));
        world.insert_resource(CommandQueue::default());
        world.insert_resource(CommandOutcomes::default());
        world.insert_resource(StatsResource::default());

        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                tick_clock_system,
                command_apply_system,
                corpse_cleanup_system,
                stats_refresh_system,
            )
                .chain(),
        );

        tracing::info!(
            archetypes = population.archetypes.len(),
            max_units = population.max_units,
            cell_size = population.cell_size,
            "unit world created"
        );

        Ok(Self {
            world,
            schedule,
            time: 0.0,
            time_accumulator: 0.0,
            profiler,
        })
    }

    /// Load the population config from JSON and build a world around it.
    pub fn from_json_config(json: &str, config: SimConfig) -> Result<Self, ConfigError> {
        let population = PopulationConfig::from_json_str(json)?;
        Self::with_config(&population, config)
    }

    /// Step the simulation forward by `dt` seconds. Returns the number of
    /// fixed updates that ran.
    pub fn step(&mut self, dt: f32) -> u32 {
        let fixed_dt = self.world.resource::<SimConfig>().fixed_timestep;
        if !(fixed_dt > 0.0) {
            tracing::warn!(fixed_dt, "non-positive fixed timestep, step ignored");
            return 0;
        }

        self.time_accumulator += dt.max(0.0);

        let mut updates = 0;
        while self.time_accumulator >= fixed_dt {
            if updates == MAX_UPDATES_PER_STEP {
                tracing::warn!(
                    dropped_seconds = self.time_accumulator,
                    "fixed update budget exceeded, dropping accumulated time"
                );
                self.time_accumulator = 0.0;
                break;
            }
            self.fixed_update(fixed_dt);
            self.time_accumulator -= fixed_dt;
            updates += 1;
        }
        updates
    }

    /// Run a single fixed timestep update.
    fn fixed_update(&mut self, dt: f32) {
        match self.profiler.as_mut() {
            Some(profiler) => {
                let start = Instant::now();
                self.schedule.run(&mut self.world);
                profiler.record("fixed_update", start.elapsed());
                profiler.tick();
            }
            None => self.schedule.run(&mut self.world),
        }
        self.time += dt;
    }

    /// Queue a command for the next fixed update.
    pub fn queue(&mut self, command: UnitCommand) {
        self.world.resource_mut::<CommandQueue>().push(command);
    }

    pub fn pending_commands(&self) -> usize {
        self.world.resource::<CommandQueue>().len()
    }

    /// Take the outcomes of every command applied since the last drain.
    pub fn drain_outcomes(&mut self) -> Vec<CommandOutcome> {
        self.world.resource_mut::<CommandOutcomes>().drain()
    }

    /// Outcomes evicted because they were not drained in time.
    pub fn dropped_outcomes(&self) -> u64 {
        self.world.resource::<CommandOutcomes>().dropped()
    }

    pub fn manager(&self) -> &UnitManager {
        self.world.resource::<UnitManager>()
    }

    /// Direct mutable access, bypassing the command queue.
    pub fn manager_mut(&mut self) -> Mut<'_, UnitManager> {
        self.world.resource_mut::<UnitManager>()
    }

    /// Statistics as of the last refresh.
    pub fn stats(&self) -> &PopulationStats {
        &self.world.resource::<StatsResource>().last
    }

    pub fn snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot::from_manager(self.manager())
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&self) -> String {
        self.snapshot().to_json().unwrap_or_else(|err| {
            tracing::error!(error = %err, "snapshot serialization failed");
            "{}".to_string()
        })
    }

    pub fn current_tick(&self) -> u64 {
        self.world.resource::<SimTick>().0
    }

    /// Elapsed simulation time in seconds.
    pub fn current_time(&self) -> f32 {
        self.time
    }

    pub fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Position, UnitId};
    use crate::config::{FACTION_BLUE, FACTION_RED};
    use crate::manager::SpawnRequest;

    fn spawn(archetype: &str, faction: crate::components::FactionId, x: f32, z: f32) -> UnitCommand {
        UnitCommand::Spawn(SpawnRequest::new(archetype, faction, Position::ground(x, z), 0.0))
    }

    #[test]
    fn test_new_world() {
        let world = UnitWorld::new().unwrap();
        assert_eq!(world.current_tick(), 0);
        assert_eq!(world.manager().archetypes().count(), 6);
    }

    #[test]
    fn test_step_advances_tick() {
        let mut world = UnitWorld::new().unwrap();
        assert_eq!(world.step(0.05), 1);
        assert_eq!(world.current_tick(), 1);
        assert_eq!(world.step(0.04), 1);
        assert_eq!(world.current_tick(), 2);
        assert_eq!(world.step(0.0), 0);
    }

    #[test]
    fn test_step_caps_updates() {
        let mut world = UnitWorld::new().unwrap();
        assert_eq!(world.step(10.0), MAX_UPDATES_PER_STEP);
        assert_eq!(world.step(0.0), 0);
    }

    #[test]
    fn test_queued_commands_apply_on_step() {
        let mut world = UnitWorld::new().unwrap();
        world.queue(spawn("blue_infantry", FACTION_BLUE, -50.0, 0.0));
        world.queue(spawn("red_infantry", FACTION_RED, 50.0, 0.0));
        assert_eq!(world.pending_commands(), 2);
        assert_eq!(world.manager().active_count(), 0);

        world.step(1.0 / 30.0);
        assert_eq!(world.pending_commands(), 0);
        assert_eq!(world.manager().active_count(), 2);
        assert_eq!(
            world.drain_outcomes(),
            vec![CommandOutcome::Spawned(UnitId(1)), CommandOutcome::Spawned(UnitId(2))]
        );
        assert!(world.drain_outcomes().is_empty());
    }

    #[test]
    fn test_outcomes_bounded_without_drain() {
        let mut world = UnitWorld::new().unwrap();
        let capacity = world.world().resource::<SimConfig>().outcome_capacity;
        for _ in 0..200 {
            for i in 0..100 {
                world.queue(UnitCommand::Despawn(UnitId(10_000 + i)));
            }
            world.step(1.0 / 30.0);
        }
        assert_eq!(world.world().resource::<CommandOutcomes>().len(), capacity);
        assert_eq!(world.dropped_outcomes(), 20_000 - capacity as u64);
        assert_eq!(world.drain_outcomes().len(), capacity);
    }

    #[test]
    fn test_kill_via_queue_cleans_up() {
        let mut world = UnitWorld::new().unwrap();
        world.queue(spawn("blue_scout", FACTION_BLUE, 0.0, 0.0));
        world.step(1.0 / 30.0);
        world.queue(UnitCommand::Kill(UnitId(1)));
        world.step(1.0 / 30.0);
        assert!(world.manager().contains(UnitId(1)));
        world.step(1.0 / 30.0);
        assert!(!world.manager().contains(UnitId(1)));
    }

    #[test]
    fn test_snapshot_json() {
        let mut world = UnitWorld::new().unwrap();
        world.queue(spawn("blue_infantry", FACTION_BLUE, 1.0, 2.0));
        world.queue(spawn("red_heavy", FACTION_RED, 3.0, 4.0));
        world.step(0.04);

        let json = world.snapshot_json();
        assert!(json.contains("blue_infantry"));
        assert!(json.contains("red_heavy"));
        assert_eq!(world.snapshot().units.len(), 2);
    }

    #[test]
    fn test_manager_mut_bypasses_queue() {
        let mut world = UnitWorld::new().unwrap();
        let id = world
            .manager_mut()
            .spawn("red_scout", FACTION_RED, Position::ORIGIN, 0.0)
            .unwrap();
        assert_eq!(world.manager().query_nearest(Position::ORIGIN, 1.0, None), Some(id));
    }

    #[test]
    fn test_profiling_enabled() {
        let config = SimConfig {
            profile: true,
            ..Default::default()
        };
        let mut world = UnitWorld::with_config(&PopulationConfig::default(), config).unwrap();
        world.step(0.11);
        let profiler = world.profiler().unwrap();
        assert_eq!(profiler.tick_count(), 3);
        assert_eq!(profiler.get_section("fixed_update").unwrap().call_count, 3);
        let sections: Vec<String> = profiler.summary().into_iter().map(|row| row.name).collect();
        assert_eq!(sections, vec!["fixed_update".to_string()]);
    }

    #[test]
    fn test_stats_refresh_through_world() {
        let config = SimConfig {
            stats_interval: 1,
            ..Default::default()
        };
        let mut world = UnitWorld::with_config(&PopulationConfig::default(), config).unwrap();
        for i in 0..10 {
            world.queue(spawn("blue_infantry", FACTION_BLUE, i as f32 * 25.0, 0.0));
        }
        world.step(1.0 / 30.0);
        assert_eq!(world.stats().active, 10);
        assert_eq!(world.stats().per_faction.get(&0), Some(&10));
    }

    #[test]
    fn test_invalid_json_config() {
        assert!(UnitWorld::from_json_config("{ \"max_units\": 0 }", SimConfig::default()).is_err());
    }
}
