//! Population snapshot types.
//!
//! `PopulationSnapshot` is a flat, serializable view of every active unit.
//! It is what clients (renderers, replays, save files) consume, and it can
//! be replayed into a fresh [`UnitManager`] to rebuild a population.

use crate::components::{FactionId, Position, UnitId, Velocity};
use crate::error::SpawnError;
use crate::manager::UnitManager;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Snapshot of a single unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: u64,
    /// Archetype name, so snapshots survive archetype re-registration order.
    pub archetype: String,
    pub faction: u8,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub health: f32,
    pub health_max: f32,
    pub alive: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, f32>,
}

/// Complete population snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    /// Simulation tick the snapshot was taken at.
    pub tick: u64,
    /// Units in ascending id order.
    pub units: Vec<UnitSnapshot>,
}

/// Outcome of replaying a snapshot into a manager.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored: usize,
    /// Snapshot id -> newly assigned id.
    pub id_map: HashMap<UnitId, UnitId>,
    /// Snapshot ids that could not be spawned, with the reason.
    pub failed: Vec<(UnitId, SpawnError)>,
}

impl PopulationSnapshot {
    /// Capture every active unit of `manager`.
    pub fn from_manager(manager: &UnitManager) -> Self {
        let units = manager
            .unit_ids()
            .into_iter()
            .filter_map(|id| {
                let record = manager.get(id)?;
                let archetype = manager.archetype(record.archetype)?.name.clone();
                Some(UnitSnapshot {
                    id: id.0,
                    archetype,
                    faction: record.faction.0,
                    x: record.position.x,
                    y: record.position.y,
                    z: record.position.z,
                    yaw: record.yaw,
                    vx: record.velocity.vx,
                    vy: record.velocity.vy,
                    vz: record.velocity.vz,
                    health: record.health.current,
                    health_max: record.health.max,
                    alive: record.alive,
                    fields: record.fields.iter().map(|(k, v)| (k.clone(), *v)).collect(),
                })
            })
            .collect();

        Self {
            tick: manager.tick(),
            units,
        }
    }

    /// Re-spawn every unit into `manager` in original id order and restore
    /// motion, health, fields and death state. Ids are reassigned; the
    /// mapping is returned in the report.
    pub fn replay_into(&self, manager: &mut UnitManager) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut ordered: Vec<&UnitSnapshot> = self.units.iter().collect();
        ordered.sort_by_key(|u| u.id);

        for unit in ordered {
            let old_id = UnitId(unit.id);
            let position = Position::new(unit.x, unit.y, unit.z);
            let id = match manager.spawn(&unit.archetype, FactionId(unit.faction), position, unit.yaw) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(id = %old_id, archetype = %unit.archetype, error = %err, "snapshot unit not restored");
                    report.failed.push((old_id, err));
                    continue;
                }
            };

            manager.set_velocity(id, Velocity::new(unit.vx, unit.vy, unit.vz));
            manager.set_health(id, unit.health);
            for (name, value) in &unit.fields {
                manager.set_field(id, name, *value);
            }
            if !unit.alive {
                manager.kill(id);
            }

            report.id_map.insert(old_id, id);
            report.restored += 1;
        }

        tracing::info!(
            restored = report.restored,
            failed = report.failed.len(),
            tick = self.tick,
            "snapshot replayed"
        );
        report
    }

    pub fn alive_count(&self) -> usize {
        self.units.iter().filter(|u| u.alive).count()
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a snapshot written by `to_json` or `to_json_pretty`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
