//! Demonstration of the This Bitter Ground unit population core.
//!
//! Run with: cargo run --example population_demo
//! More detail: RUST_LOG=tbg_units=debug cargo run --example population_demo

use tbg_units::config::{FACTION_BLUE, FACTION_RED};
use tbg_units::{
    PopulationConfig, PopulationSnapshot, Position, SimConfig, SpawnRequest, UnitCommand, UnitManager, UnitWorld,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== This Bitter Ground - Population Demo ===\n");

    let config = SimConfig {
        stats_interval: 10,
        profile: true,
        ..Default::default()
    };
    let mut world = match UnitWorld::with_config(&PopulationConfig::default(), config) {
        Ok(world) => world,
        Err(err) => {
            eprintln!("bad config: {err}");
            return;
        }
    };
    world.manager_mut().warm_faction(FACTION_RED, 0.5);

    // Two lines facing each other across x = 0.
    for i in 0..40 {
        let z = -100.0 + i as f32 * 5.0;
        world.queue(UnitCommand::Spawn(SpawnRequest::new("blue_infantry", FACTION_BLUE, Position::ground(-60.0, z), 0.0)));
        world.queue(UnitCommand::Spawn(SpawnRequest::new(
            "red_infantry",
            FACTION_RED,
            Position::ground(60.0, z),
            std::f32::consts::PI,
        )));
    }
    for i in 0..5 {
        world.queue(UnitCommand::Spawn(SpawnRequest::new(
            "red_heavy",
            FACTION_RED,
            Position::ground(80.0, -20.0 + i as f32 * 10.0),
            std::f32::consts::PI,
        )));
    }
    world.step(1.0 / 30.0);
    let spawned = world.drain_outcomes().len();
    println!("Spawned {spawned} units");
    print_counts(world.manager());

    // Advance both lines toward each other; units that meet take damage.
    println!("\n--- Advancing for 60 ticks ---\n");
    for _ in 0..60 {
        let ids = world.manager().unit_ids();
        for id in ids {
            let Some(record) = world.manager().get(id) else { continue };
            if !record.alive {
                continue;
            }
            let dir = if record.faction == FACTION_BLUE { 1.0 } else { -1.0 };
            let pos = record.position;
            let faction = record.faction;
            world.queue(UnitCommand::Move {
                id,
                position: Position::ground(pos.x + dir, pos.z),
            });

            if let Some(enemy) = world.manager().query_nearest(pos, 3.0, Some(other(faction))) {
                world.queue(UnitCommand::Damage { id: enemy, amount: 15.0 });
            }
        }
        world.step(1.0 / 30.0);
        world.drain_outcomes();
    }

    print_counts(world.manager());
    let stats = world.stats();
    println!(
        "\nStats @ tick {}: active={} peak={} corpses={} occupied_cells={}",
        stats.tick, stats.active, stats.peak_active, stats.corpses, stats.grid.occupied_cells
    );
    for arch in &stats.archetypes {
        if arch.active > 0 || arch.peak_active > 0 {
            println!(
                "  {:<14} active={:>3} available={:>4} peak={:>3} exhausted={}",
                arch.name, arch.active, arch.available, arch.peak_active, arch.exhausted_count
            );
        }
    }

    // Snapshot and replay into a fresh manager.
    let snapshot = world.snapshot();
    match UnitManager::new(&PopulationConfig::default()) {
        Ok(mut copy) => {
            let report = snapshot.replay_into(&mut copy);
            println!("\nReplayed snapshot: {} restored, {} failed", report.restored, report.failed.len());
        }
        Err(err) => eprintln!("replay setup failed: {err}"),
    }

    if let Some(profiler) = world.profiler() {
        profiler.log_summary();
    }

    println!("\n=== Snapshot excerpt (JSON) ===\n");
    let excerpt = PopulationSnapshot {
        tick: snapshot.tick,
        units: snapshot.units.into_iter().take(2).collect(),
    };
    match excerpt.to_json_pretty() {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("snapshot serialization failed: {err}"),
    }
}

fn other(faction: tbg_units::FactionId) -> tbg_units::FactionId {
    if faction == FACTION_BLUE {
        FACTION_RED
    } else {
        FACTION_BLUE
    }
}

fn print_counts(manager: &UnitManager) {
    println!(
        "  Blue: {:>3} units   Red: {:>3} units   (total {})",
        manager.faction_count(FACTION_BLUE),
        manager.faction_count(FACTION_RED),
        manager.active_count()
    );
}
