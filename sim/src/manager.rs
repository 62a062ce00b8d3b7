//! Unit manager: the single entry point for spawning, moving, killing,
//! despawning and querying units.
//!
//! Owns the [`UnitPool`] (authoritative records) and the [`SpatialGrid`],
//! and keeps three denormalized indices over unit ids:
//! id -> (archetype, faction), faction -> ids and archetype -> ids.
//!
//! ## Ordering
//!
//! Spawn writes pool -> indices -> grid. Despawn walks the same structures
//! in reverse (indices -> grid -> pool), so a reader that looks up grid
//! results in the id index never sees a half-removed unit.
//!
//! ## Failure policy
//!
//! Exhaustion and unknown ids never panic. Spawns report a [`SpawnError`],
//! everything else returns `bool`/`Option` and bumps a counter that shows up
//! in [`PopulationStats`].

use crate::components::{ArchetypeId, FactionId, Position, UnitId, UnitRecord, Velocity};
use crate::config::{ArchetypeSpec, PopulationConfig};
use crate::error::{ConfigError, SpawnError};
use crate::spatial::{GridStats, SpatialGrid};
use crate::unit_pool::{ArchetypeInfo, ArchetypeUtilization, UnitPool};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A spawn request, as used by batch spawning and the command queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub archetype: String,
    pub faction: FactionId,
    pub position: Position,
    /// Initial yaw in radians.
    pub heading: f32,
}

impl SpawnRequest {
    pub fn new(archetype: impl Into<String>, faction: FactionId, position: Position, heading: f32) -> Self {
        Self {
            archetype: archetype.into(),
            faction,
            position,
            heading,
        }
    }
}

/// Lifecycle notification for dependent systems (effects, loot, UI).
#[derive(Debug, Clone, PartialEq)]
pub enum UnitEvent {
    Spawned {
        id: UnitId,
        archetype: ArchetypeId,
        faction: FactionId,
    },
    Killed {
        id: UnitId,
        position: Position,
    },
    Despawned {
        id: UnitId,
        archetype: ArchetypeId,
        faction: FactionId,
    },
    SpawnRejected {
        archetype: String,
        reason: SpawnError,
    },
}

/// Index entry for an active unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    archetype: ArchetypeId,
    faction: FactionId,
}

/// Population summary for observability overlays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub tick: u64,
    pub active: usize,
    pub peak_active: usize,
    pub max_units: usize,
    pub corpses: usize,
    pub ceiling_rejections: u64,
    pub spawn_failures: u64,
    pub unknown_id_warnings: u64,
    pub dropped_events: u64,
    pub per_faction: BTreeMap<u8, usize>,
    pub archetypes: Vec<ArchetypeUtilization>,
    pub grid: GridStats,
}

/// Coordinates unit records, indices and the spatial grid.
#[derive(Resource)]
pub struct UnitManager {
    units: UnitPool,
    grid: SpatialGrid,
    by_id: HashMap<UnitId, IndexEntry>,
    by_faction: BTreeMap<FactionId, BTreeSet<UnitId>>,
    /// Indexed by `ArchetypeId`.
    by_archetype: Vec<BTreeSet<UnitId>>,
    /// Dead-but-not-despawned units and the tick they died.
    corpses: BTreeMap<UnitId, u64>,
    max_units: usize,
    peak_active: usize,
    tick: u64,
    ceiling_rejections: u64,
    spawn_failures: u64,
    unknown_id_warnings: u64,
    events: VecDeque<UnitEvent>,
    event_capacity: usize,
    dropped_events: u64,
}

impl UnitManager {
    /// Build a manager and register every archetype in `config`.
    pub fn new(config: &PopulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut manager = Self {
            units: UnitPool::new(config.auto_expand, config.expand_increment),
            grid: SpatialGrid::new(config.cell_size),
            by_id: HashMap::new(),
            by_faction: BTreeMap::new(),
            by_archetype: Vec::new(),
            corpses: BTreeMap::new(),
            max_units: config.max_units,
            peak_active: 0,
            tick: 0,
            ceiling_rejections: 0,
            spawn_failures: 0,
            unknown_id_warnings: 0,
            events: VecDeque::new(),
            event_capacity: config.event_capacity,
            dropped_events: 0,
        };
        for spec in &config.archetypes {
            manager.register_archetype(spec)?;
        }
        Ok(manager)
    }

    pub fn register_archetype(&mut self, spec: &ArchetypeSpec) -> Result<ArchetypeId, ConfigError> {
        let id = self.units.register_archetype(spec)?;
        if self.by_archetype.len() <= id.index() {
            self.by_archetype.resize_with(id.index() + 1, BTreeSet::new);
        }
        Ok(id)
    }

    pub fn archetype_id(&self, name: &str) -> Option<ArchetypeId> {
        self.units.archetype_id(name)
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&ArchetypeInfo> {
        self.units.archetype(id)
    }

    pub fn archetypes(&self) -> impl Iterator<Item = &ArchetypeInfo> {
        self.units.archetypes()
    }

    pub fn warm_faction(&mut self, faction: FactionId, multiplier: f32) -> usize {
        self.units.warm_faction(faction, multiplier)
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Set the simulation tick used for record timestamps and corpse ages.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
        self.units.set_tick(tick);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn a unit of a named archetype.
    pub fn spawn(
        &mut self,
        archetype: &str,
        faction: FactionId,
        position: Position,
        heading: f32,
    ) -> Result<UnitId, SpawnError> {
        match self.units.archetype_id(archetype) {
            Some(id) => self.spawn_archetype(id, faction, position, heading),
            None => {
                tracing::error!(archetype = %archetype, "spawn requested for unregistered archetype");
                let err = SpawnError::UnknownArchetype(archetype.to_string());
                self.reject(archetype, err.clone());
                Err(err)
            }
        }
    }

    /// Spawn by archetype id (skips the name lookup).
    pub fn spawn_archetype(
        &mut self,
        archetype: ArchetypeId,
        faction: FactionId,
        position: Position,
        heading: f32,
    ) -> Result<UnitId, SpawnError> {
        if self.by_id.len() >= self.max_units {
            self.ceiling_rejections += 1;
            tracing::warn!(limit = self.max_units, "unit ceiling reached, spawn dropped");
            let err = SpawnError::CapacityReached { limit: self.max_units };
            let name = self.archetype_name(archetype);
            self.reject(&name, err.clone());
            return Err(err);
        }

        let record = match self.units.acquire(archetype) {
            Ok(record) => record,
            Err(err) => {
                let name = self.archetype_name(archetype);
                self.reject(&name, err.clone());
                return Err(err);
            }
        };
        record.faction = faction;
        record.position = position;
        record.yaw = heading;
        let id = record.id;

        self.by_id.insert(id, IndexEntry { archetype, faction });
        self.by_faction.entry(faction).or_default().insert(id);
        if let Some(ids) = self.by_archetype.get_mut(archetype.index()) {
            ids.insert(id);
        }
        self.grid.add(id, position);

        self.peak_active = self.peak_active.max(self.by_id.len());
        self.push_event(UnitEvent::Spawned { id, archetype, faction });
        Ok(id)
    }

    fn archetype_name(&self, archetype: ArchetypeId) -> String {
        self.units
            .archetype(archetype)
            .map_or_else(|| format!("#{}", archetype.0), |info| info.name.clone())
    }

    fn reject(&mut self, archetype: &str, reason: SpawnError) {
        self.spawn_failures += 1;
        self.push_event(UnitEvent::SpawnRejected {
            archetype: archetype.to_string(),
            reason,
        });
    }

    /// Remove a unit from indices, grid and pool. Unknown ids are a no-op.
    pub fn despawn(&mut self, id: UnitId) -> bool {
        let Some(entry) = self.by_id.remove(&id) else {
            self.unknown_id_warnings += 1;
            tracing::warn!(id = %id, "despawn of unknown unit");
            return false;
        };

        if let Some(ids) = self.by_faction.get_mut(&entry.faction) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_faction.remove(&entry.faction);
            }
        }
        if let Some(ids) = self.by_archetype.get_mut(entry.archetype.index()) {
            ids.remove(&id);
        }
        self.corpses.remove(&id);
        self.grid.remove(id);
        self.units.release(id);

        self.push_event(UnitEvent::Despawned {
            id,
            archetype: entry.archetype,
            faction: entry.faction,
        });
        true
    }

    /// Spawn each request in order. Failures are reported per element;
    /// units spawned before a failure stay spawned.
    pub fn spawn_batch(&mut self, requests: &[SpawnRequest]) -> Vec<Result<UnitId, SpawnError>> {
        requests
            .iter()
            .map(|r| self.spawn(&r.archetype, r.faction, r.position, r.heading))
            .collect()
    }

    /// Despawn each id in order. Returns how many were actually removed.
    pub fn despawn_batch(&mut self, ids: &[UnitId]) -> usize {
        ids.iter().filter(|&&id| self.despawn(id)).count()
    }

    /// Despawn everything.
    pub fn despawn_all(&mut self) -> usize {
        let ids: Vec<UnitId> = self.by_id.keys().copied().collect();
        self.despawn_batch(&ids)
    }

    /// Mark a unit dead without removing it, so dependent systems can react
    /// for a frame before [`cleanup_dead`](Self::cleanup_dead) removes it.
    /// Returns false for unknown or already-dead units.
    pub fn kill(&mut self, id: UnitId) -> bool {
        let Some(record) = self.units.get_mut(id) else {
            self.unknown_id_warnings += 1;
            tracing::warn!(id = %id, "kill of unknown unit");
            return false;
        };
        if !record.alive {
            return false;
        }
        record.alive = false;
        record.updated_tick = self.tick;
        let position = record.position;

        self.corpses.insert(id, self.tick);
        self.push_event(UnitEvent::Killed { id, position });
        true
    }

    /// Despawn every dead unit. Returns how many were removed.
    pub fn cleanup_dead(&mut self) -> usize {
        let dead: Vec<UnitId> = self.corpses.keys().copied().collect();
        self.despawn_batch(&dead)
    }

    /// Despawn units that have been dead for at least `min_age` ticks.
    pub fn cleanup_corpses(&mut self, min_age: u64) -> usize {
        let now = self.tick;
        let expired: Vec<UnitId> = self
            .corpses
            .iter()
            .filter(|(_, &died)| now.saturating_sub(died) >= min_age)
            .map(|(&id, _)| id)
            .collect();
        self.despawn_batch(&expired)
    }

    pub fn corpse_count(&self) -> usize {
        self.corpses.len()
    }

    // ------------------------------------------------------------------
    // Record updates
    // ------------------------------------------------------------------

    fn record_mut(&mut self, id: UnitId, op: &'static str) -> Option<&mut UnitRecord> {
        if !self.units.contains(id) {
            self.unknown_id_warnings += 1;
            tracing::warn!(id = %id, op, "update of unknown unit");
            return None;
        }
        let tick = self.tick;
        let record = self.units.get_mut(id)?;
        record.updated_tick = tick;
        Some(record)
    }

    /// Move a unit and forward the position to the grid.
    pub fn update_position(&mut self, id: UnitId, position: Position) -> bool {
        let Some(record) = self.record_mut(id, "update_position") else {
            return false;
        };
        record.position = position;

        if !self.grid.update_position(id, position) {
            tracing::debug!(id = %id, "unit missing from grid, re-registering");
            self.grid.add(id, position);
        }
        true
    }

    pub fn set_heading(&mut self, id: UnitId, yaw: f32) -> bool {
        self.record_mut(id, "set_heading").map(|r| r.yaw = yaw).is_some()
    }

    pub fn set_velocity(&mut self, id: UnitId, velocity: Velocity) -> bool {
        self.record_mut(id, "set_velocity").map(|r| r.velocity = velocity).is_some()
    }

    /// Set a named per-archetype scalar.
    pub fn set_field(&mut self, id: UnitId, name: &str, value: f32) -> bool {
        match self.record_mut(id, "set_field") {
            Some(record) => {
                if let Some(slot) = record.fields.get_mut(name) {
                    *slot = value;
                } else {
                    record.fields.insert(name.to_string(), value);
                }
                true
            }
            None => false,
        }
    }

    pub fn field(&self, id: UnitId, name: &str) -> Option<f32> {
        self.units.get(id)?.field(name)
    }

    /// Damage a living unit, killing it when health runs out.
    /// Returns the remaining health, or `None` if the unit is unknown or dead.
    pub fn apply_damage(&mut self, id: UnitId, amount: f32) -> Option<f32> {
        let record = self.record_mut(id, "apply_damage")?;
        if !record.alive {
            return None;
        }
        record.health.damage(amount);
        let remaining = record.health.current;
        if record.health.is_depleted() {
            self.kill(id);
        }
        Some(remaining)
    }

    /// Heal a living unit. Returns the new health.
    pub fn heal(&mut self, id: UnitId, amount: f32) -> Option<f32> {
        let record = self.record_mut(id, "heal")?;
        if !record.alive {
            return None;
        }
        record.health.heal(amount);
        Some(record.health.current)
    }

    /// Overwrite current health (clamped to `[0, max]`) without killing.
    pub fn set_health(&mut self, id: UnitId, current: f32) -> bool {
        match self.record_mut(id, "set_health") {
            Some(record) => {
                record.health.current = current.clamp(0.0, record.health.max);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn get(&self, id: UnitId) -> Option<&UnitRecord> {
        self.units.get(id)
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn is_alive(&self, id: UnitId) -> bool {
        self.units.get(id).is_some_and(|r| r.alive)
    }

    pub fn active_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active
    }

    pub fn max_units(&self) -> usize {
        self.max_units
    }

    /// All active ids, ascending.
    pub fn unit_ids(&self) -> Vec<UnitId> {
        let mut ids: Vec<UnitId> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Ids tagged with `faction`, ascending.
    pub fn units_by_faction(&self, faction: FactionId) -> Vec<UnitId> {
        self.by_faction
            .get(&faction)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of one archetype, ascending.
    pub fn units_by_archetype(&self, archetype: &str) -> Vec<UnitId> {
        self.archetype_id(archetype)
            .and_then(|id| self.by_archetype.get(id.index()))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn faction_count(&self, faction: FactionId) -> usize {
        self.by_faction.get(&faction).map_or(0, |ids| ids.len())
    }

    pub fn archetype_count(&self, archetype: &str) -> usize {
        self.archetype_id(archetype)
            .and_then(|id| self.by_archetype.get(id.index()))
            .map_or(0, |ids| ids.len())
    }

    /// Factions with at least one active unit.
    pub fn factions(&self) -> Vec<FactionId> {
        self.by_faction.keys().copied().collect()
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn units(&self) -> &UnitPool {
        &self.units
    }

    // ------------------------------------------------------------------
    // Spatial queries
    // ------------------------------------------------------------------

    /// Keep ids that are still indexed and match the optional faction.
    /// Stale grid entries are dropped silently.
    fn filter_ids(&self, ids: Vec<UnitId>, faction: Option<FactionId>) -> Vec<UnitId> {
        ids.into_iter()
            .filter(|id| match self.by_id.get(id) {
                Some(entry) => faction.map_or(true, |f| entry.faction == f),
                None => false,
            })
            .collect()
    }

    /// Units within `radius` of `position`, optionally limited to one faction.
    pub fn query_radius(&self, position: Position, radius: f32, faction: Option<FactionId>) -> Vec<UnitId> {
        self.filter_ids(self.grid.query_radius(position, radius), faction)
    }

    /// Nearest unit within `max_radius`, optionally limited to one faction.
    pub fn query_nearest(&self, position: Position, max_radius: f32, faction: Option<FactionId>) -> Option<UnitId> {
        self.query_k_nearest(position, 1, max_radius, faction).into_iter().next()
    }

    /// Up to `k` nearest units, nearest first.
    pub fn query_k_nearest(
        &self,
        position: Position,
        k: usize,
        max_radius: f32,
        faction: Option<FactionId>,
    ) -> Vec<UnitId> {
        let candidates = self.grid.query_k_nearest(position, k, max_radius);
        let fetched = candidates.len();
        let mut ids = self.filter_ids(candidates, faction);
        if ids.len() < k && fetched == k {
            // Filtered-out entries may be shadowing farther matches.
            ids = self.filter_ids(self.grid.query_k_nearest(position, usize::MAX, max_radius), faction);
        }
        ids.truncate(k);
        ids
    }

    /// Units inside a ground-plane rectangle.
    pub fn query_rect(&self, min: Position, max: Position, faction: Option<FactionId>) -> Vec<UnitId> {
        self.filter_ids(self.grid.query_rect(min, max), faction)
    }

    /// Units within `radius` that do not belong to `my_faction`.
    pub fn query_enemies(&self, position: Position, radius: f32, my_faction: FactionId) -> Vec<UnitId> {
        self.grid
            .query_radius(position, radius)
            .into_iter()
            .filter(|id| self.by_id.get(id).is_some_and(|e| e.faction != my_faction))
            .collect()
    }

    /// Run many radius queries at once. Read-only, so with the `parallel`
    /// feature the queries are spread across the rayon pool.
    pub fn query_radius_many(&self, queries: &[(Position, f32)], faction: Option<FactionId>) -> Vec<Vec<UnitId>> {
        #[cfg(feature = "parallel")]
        {
            queries
                .par_iter()
                .map(|&(pos, radius)| self.query_radius(pos, radius, faction))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            queries
                .iter()
                .map(|&(pos, radius)| self.query_radius(pos, radius, faction))
                .collect()
        }
    }

    // ------------------------------------------------------------------
    // Events & stats
    // ------------------------------------------------------------------

    fn push_event(&mut self, event: UnitEvent) {
        if self.event_capacity == 0 {
            return;
        }
        if self.events.len() >= self.event_capacity {
            self.events.pop_front();
            self.dropped_events += 1;
        }
        self.events.push_back(event);
    }

    /// Take all pending events, oldest first.
    pub fn drain_events(&mut self) -> Vec<UnitEvent> {
        self.events.drain(..).collect()
    }

    pub fn stats(&self) -> PopulationStats {
        PopulationStats {
            tick: self.tick,
            active: self.by_id.len(),
            peak_active: self.peak_active,
            max_units: self.max_units,
            corpses: self.corpses.len(),
            ceiling_rejections: self.ceiling_rejections,
            spawn_failures: self.spawn_failures,
            unknown_id_warnings: self.unknown_id_warnings + self.units.unknown_releases(),
            dropped_events: self.dropped_events,
            per_faction: self.by_faction.iter().map(|(f, ids)| (f.0, ids.len())).collect(),
            archetypes: self.units.utilization(),
            grid: self.grid.stats(),
        }
    }

    /// Verify that pool, indices and grid agree. Intended for tests.
    pub fn is_consistent(&self) -> bool {
        if !self.units.is_consistent() || !self.grid.is_consistent() {
            return false;
        }
        if self.units.active_count() != self.by_id.len() || self.grid.len() != self.by_id.len() {
            return false;
        }

        let faction_total: usize = self.by_faction.values().map(|s| s.len()).sum();
        let archetype_total: usize = self.by_archetype.iter().map(|s| s.len()).sum();
        if faction_total != self.by_id.len() || archetype_total != self.by_id.len() {
            return false;
        }

        self.by_id.iter().all(|(id, entry)| {
            let Some(record) = self.units.get(*id) else {
                return false;
            };
            record.faction == entry.faction
                && record.archetype == entry.archetype
                && self.by_faction.get(&entry.faction).is_some_and(|s| s.contains(id))
                && self.by_archetype.get(entry.archetype.index()).is_some_and(|s| s.contains(id))
                && self.grid.position_of(*id) == Some(record.position)
        }) && self.corpses.keys().all(|id| self.by_id.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FACTION_BLUE, FACTION_RED};

    fn manager_with(specs: &[ArchetypeSpec]) -> UnitManager {
        let config = PopulationConfig {
            cell_size: 10.0,
            archetypes: specs.to_vec(),
            ..PopulationConfig::empty()
        };
        UnitManager::new(&config).unwrap()
    }

    fn two_faction_manager() -> UnitManager {
        manager_with(&[
            ArchetypeSpec::new("blue_infantry", FACTION_BLUE, 16),
            ArchetypeSpec::new("red_infantry", FACTION_RED, 16),
        ])
    }

    #[test]
    fn test_scout_exhaustion_scenario() {
        let mut mgr = manager_with(&[ArchetypeSpec::new("scout", FACTION_BLUE, 4).with_max_size(4)]);
        let scout = mgr.archetype_id("scout").unwrap();

        let ids: Vec<UnitId> = (0..4)
            .map(|_| mgr.spawn("scout", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap())
            .collect();

        let fifth = mgr.spawn("scout", FACTION_BLUE, Position::ORIGIN, 0.0);
        assert_eq!(fifth, Err(SpawnError::PoolExhausted { archetype: "scout".into() }));
        assert_eq!(mgr.units().pool_stats(scout).unwrap().exhausted_count, 1);
        assert_eq!(mgr.grid().len(), 4);

        assert!(mgr.despawn(ids[0]));
        let new_id = mgr.spawn("scout", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap();
        assert!(!ids.contains(&new_id));
        assert!(mgr.is_consistent());
    }

    #[test]
    fn test_batch_despawn_by_faction() {
        let mut mgr = two_faction_manager();
        let blue: Vec<UnitId> = (0..3)
            .map(|i| mgr.spawn("blue_infantry", FactionId(1), Position::ground(i as f32, 0.0), 0.0).unwrap())
            .collect();
        for i in 0..2 {
            mgr.spawn("red_infantry", FactionId(2), Position::ground(i as f32, 5.0), 0.0).unwrap();
        }

        assert_eq!(mgr.despawn_batch(&blue), 3);
        assert_eq!(mgr.faction_count(FactionId(1)), 0);
        assert_eq!(mgr.faction_count(FactionId(2)), 2);
        assert_eq!(mgr.active_count(), 2);
        assert!(mgr.is_consistent());
    }

    #[test]
    fn test_spawn_populates_every_index() {
        let mut mgr = two_faction_manager();
        let pos = Position::new(12.0, 1.0, -3.0);
        let id = mgr.spawn("red_infantry", FACTION_RED, pos, 1.5).unwrap();

        let record = mgr.get(id).unwrap();
        assert_eq!(record.position, pos);
        assert_eq!(record.yaw, 1.5);
        assert_eq!(record.faction, FACTION_RED);
        assert_eq!(mgr.units_by_faction(FACTION_RED), vec![id]);
        assert_eq!(mgr.units_by_archetype("red_infantry"), vec![id]);
        assert_eq!(mgr.grid().position_of(id), Some(pos));
        assert_eq!(
            mgr.drain_events(),
            vec![UnitEvent::Spawned {
                id,
                archetype: mgr.archetype_id("red_infantry").unwrap(),
                faction: FACTION_RED
            }]
        );
    }

    #[test]
    fn test_despawn_removes_everywhere() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(3.0, 3.0), 0.0).unwrap();
        assert!(mgr.despawn(id));

        assert!(!mgr.contains(id));
        assert!(mgr.get(id).is_none());
        assert!(!mgr.grid().contains(id));
        assert!(mgr.units_by_faction(FACTION_BLUE).is_empty());
        assert!(mgr.units_by_archetype("blue_infantry").is_empty());
        assert!(!mgr.units().contains(id));
        assert!(mgr.is_consistent());
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap();

        assert!(!mgr.despawn(UnitId(404)));
        assert!(!mgr.update_position(UnitId(404), Position::ORIGIN));
        assert!(!mgr.kill(UnitId(404)));
        assert!(mgr.apply_damage(UnitId(404), 5.0).is_none());

        assert_eq!(mgr.active_count(), 1);
        assert!(mgr.contains(id));
        assert_eq!(mgr.stats().unknown_id_warnings, 4);
        assert!(mgr.is_consistent());
    }

    #[test]
    fn test_unknown_archetype_fails_loudly() {
        let mut mgr = two_faction_manager();
        let err = mgr.spawn("ghost", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap_err();
        assert_eq!(err, SpawnError::UnknownArchetype("ghost".into()));
        assert!(!err.is_recoverable());
        assert_eq!(mgr.active_count(), 0);
        assert_eq!(mgr.grid().len(), 0);
    }

    #[test]
    fn test_global_ceiling() {
        let config = PopulationConfig {
            max_units: 3,
            archetypes: vec![ArchetypeSpec::new("a", FACTION_BLUE, 8)],
            ..PopulationConfig::empty()
        };
        let mut mgr = UnitManager::new(&config).unwrap();
        for _ in 0..3 {
            mgr.spawn("a", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap();
        }
        let err = mgr.spawn("a", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap_err();
        assert_eq!(err, SpawnError::CapacityReached { limit: 3 });

        let stats = mgr.stats();
        assert_eq!(stats.ceiling_rejections, 1);
        assert_eq!(stats.spawn_failures, 1);
        assert_eq!(stats.active, 3);
        assert_eq!(mgr.grid().len(), 3);
    }

    #[test]
    fn test_spawn_batch_partial_failure() {
        let mut mgr = manager_with(&[ArchetypeSpec::new("scout", FACTION_BLUE, 2).with_max_size(2)]);
        let requests: Vec<SpawnRequest> = (0..3)
            .map(|i| SpawnRequest::new("scout", FACTION_BLUE, Position::ground(i as f32, 0.0), 0.0))
            .collect();

        let results = mgr.spawn_batch(&requests);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(SpawnError::PoolExhausted { .. })));
        assert_eq!(mgr.active_count(), 2);
    }

    #[test]
    fn test_update_position_moves_grid_entry() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(1.0, 1.0), 0.0).unwrap();

        assert!(mgr.update_position(id, Position::ground(95.0, 1.0)));
        assert_eq!(mgr.get(id).unwrap().position, Position::ground(95.0, 1.0));
        assert_eq!(mgr.grid().cell_of(id), Some((9, 0)));
        assert!(mgr.query_radius(Position::ORIGIN, 10.0, None).is_empty());
        assert_eq!(mgr.query_radius(Position::ground(95.0, 0.0), 2.0, None), vec![id]);
    }

    #[test]
    fn test_faction_filtered_queries() {
        let mut mgr = two_faction_manager();
        let b1 = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(1.0, 0.0), 0.0).unwrap();
        let r1 = mgr.spawn("red_infantry", FACTION_RED, Position::ground(2.0, 0.0), 0.0).unwrap();
        let r2 = mgr.spawn("red_infantry", FACTION_RED, Position::ground(8.0, 0.0), 0.0).unwrap();

        let mut reds = mgr.query_radius(Position::ORIGIN, 10.0, Some(FACTION_RED));
        reds.sort();
        assert_eq!(reds, vec![r1, r2]);

        assert_eq!(mgr.query_nearest(Position::ORIGIN, 10.0, None), Some(b1));
        assert_eq!(mgr.query_nearest(Position::ORIGIN, 10.0, Some(FACTION_RED)), Some(r1));
        assert_eq!(mgr.query_k_nearest(Position::ORIGIN, 2, 10.0, Some(FACTION_RED)), vec![r1, r2]);
        assert_eq!(mgr.query_k_nearest(Position::ORIGIN, 2, 10.0, None), vec![b1, r1]);

        let mut enemies = mgr.query_enemies(Position::ORIGIN, 10.0, FACTION_BLUE);
        enemies.sort();
        assert_eq!(enemies, vec![r1, r2]);

        let rect = mgr.query_rect(Position::ORIGIN, Position::ground(5.0, 5.0), Some(FACTION_BLUE));
        assert_eq!(rect, vec![b1]);
    }

    #[test]
    fn test_kill_then_cleanup() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(4.0, 4.0), 0.0).unwrap();
        let other = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(5.0, 4.0), 0.0).unwrap();

        assert!(mgr.kill(id));
        assert!(!mgr.kill(id));
        // Corpse stays indexed and queryable until cleanup.
        assert!(mgr.contains(id));
        assert!(!mgr.is_alive(id));
        assert_eq!(mgr.query_radius(Position::ground(4.0, 4.0), 0.5, None), vec![id]);

        assert_eq!(mgr.cleanup_dead(), 1);
        assert!(!mgr.contains(id));
        assert!(mgr.contains(other));
        assert_eq!(mgr.cleanup_dead(), 0);
        assert!(mgr.is_consistent());
    }

    #[test]
    fn test_cleanup_corpses_by_age() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("red_infantry", FACTION_RED, Position::ORIGIN, 0.0).unwrap();
        mgr.set_tick(10);
        mgr.kill(id);

        mgr.set_tick(10);
        assert_eq!(mgr.cleanup_corpses(1), 0);
        mgr.set_tick(11);
        assert_eq!(mgr.cleanup_corpses(1), 1);
        assert_eq!(mgr.corpse_count(), 0);
    }

    #[test]
    fn test_apply_damage_kills() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("red_infantry", FACTION_RED, Position::ORIGIN, 0.0).unwrap();
        assert_eq!(mgr.apply_damage(id, 40.0), Some(60.0));
        assert_eq!(mgr.heal(id, 10.0), Some(70.0));
        assert_eq!(mgr.apply_damage(id, 100.0), Some(0.0));
        assert!(!mgr.is_alive(id));
        assert_eq!(mgr.apply_damage(id, 1.0), None);
        assert_eq!(mgr.corpse_count(), 1);
    }

    #[test]
    fn test_fields_and_heading() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap();
        mgr.set_tick(3);
        assert!(mgr.set_field(id, "ammo", 30.0));
        assert!(mgr.set_field(id, "ammo", 29.0));
        assert!(mgr.set_heading(id, 0.5));
        assert!(mgr.set_velocity(id, Velocity::new(1.0, 0.0, 0.0)));

        assert_eq!(mgr.field(id, "ammo"), Some(29.0));
        assert_eq!(mgr.field(id, "fuel"), None);
        let record = mgr.get(id).unwrap();
        assert_eq!(record.yaw, 0.5);
        assert_eq!(record.updated_tick, 3);
        assert_eq!(record.created_tick, 0);
    }

    #[test]
    fn test_event_queue_is_bounded() {
        let config = PopulationConfig {
            event_capacity: 2,
            archetypes: vec![ArchetypeSpec::new("a", FACTION_BLUE, 8)],
            ..PopulationConfig::empty()
        };
        let mut mgr = UnitManager::new(&config).unwrap();
        let ids: Vec<UnitId> = (0..3)
            .map(|_| mgr.spawn("a", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap())
            .collect();

        let events = mgr.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], UnitEvent::Spawned { id, .. } if id == ids[1]));
        assert_eq!(mgr.stats().dropped_events, 1);
        assert!(mgr.drain_events().is_empty());
    }

    #[test]
    fn test_stats_summary() {
        let mut mgr = two_faction_manager();
        for i in 0..3 {
            mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(i as f32 * 30.0, 0.0), 0.0).unwrap();
        }
        let r = mgr.spawn("red_infantry", FACTION_RED, Position::ORIGIN, 0.0).unwrap();
        mgr.despawn(r);

        let stats = mgr.stats();
        assert_eq!(stats.active, 3);
        assert_eq!(stats.peak_active, 4);
        assert_eq!(stats.per_faction.get(&0), Some(&3));
        assert_eq!(stats.per_faction.get(&1), None);
        assert_eq!(stats.grid.unit_count, 3);
        assert_eq!(stats.grid.occupied_cells, 3);
        let blue = stats.archetypes.iter().find(|a| a.name == "blue_infantry").unwrap();
        assert_eq!(blue.active, 3);
    }

    #[test]
    fn test_query_radius_many_matches_single() {
        let mut mgr = two_faction_manager();
        for i in 0..20 {
            mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(i as f32 * 3.0, 0.0), 0.0).unwrap();
        }
        let queries = [(Position::ORIGIN, 10.0), (Position::ground(30.0, 0.0), 5.0)];
        let batch = mgr.query_radius_many(&queries, None);
        for (result, (pos, radius)) in batch.iter().zip(queries.iter()) {
            let mut a = result.clone();
            let mut b = mgr.query_radius(*pos, *radius, None);
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_despawn_all() {
        let mut mgr = two_faction_manager();
        for _ in 0..5 {
            mgr.spawn("red_infantry", FACTION_RED, Position::ORIGIN, 0.0).unwrap();
        }
        assert_eq!(mgr.despawn_all(), 5);
        assert_eq!(mgr.active_count(), 0);
        assert!(mgr.grid().is_empty());
        assert!(mgr.is_consistent());
    }

    #[test]
    fn test_move_reregisters_unit_missing_from_grid() {
        let mut mgr = two_faction_manager();
        let id = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ORIGIN, 0.0).unwrap();
        assert!(mgr.grid.remove(id));
        assert!(!mgr.is_consistent());

        let target = Position::ground(42.0, -7.0);
        assert!(mgr.update_position(id, target));
        assert!(mgr.grid().contains(id));
        assert_eq!(mgr.grid().position_of(id), Some(target));
        assert_eq!(mgr.query_nearest(target, 1.0, None), Some(id));
        assert!(mgr.is_consistent());
    }

    #[test]
    fn test_queries_skip_ids_unknown_to_manager() {
        let mut mgr = two_faction_manager();
        let blue = mgr.spawn("blue_infantry", FACTION_BLUE, Position::ground(5.0, 0.0), 0.0).unwrap();
        let red = mgr.spawn("red_infantry", FACTION_RED, Position::ground(8.0, 0.0), 0.0).unwrap();
        // Closer to the origin than any live unit.
        let stale = UnitId(999);
        mgr.grid.add(stale, Position::ground(1.0, 0.0));

        let mut near = mgr.query_radius(Position::ORIGIN, 20.0, None);
        near.sort();
        assert_eq!(near, vec![blue, red]);
        assert_eq!(mgr.query_nearest(Position::ORIGIN, 20.0, None), Some(blue));
        assert_eq!(mgr.query_k_nearest(Position::ORIGIN, 1, 20.0, None), vec![blue]);
        assert_eq!(mgr.query_k_nearest(Position::ORIGIN, 2, 20.0, None), vec![blue, red]);
        assert_eq!(mgr.query_nearest(Position::ORIGIN, 20.0, Some(FACTION_RED)), Some(red));

        let mut boxed = mgr.query_rect(Position::ground(-10.0, -10.0), Position::ground(10.0, 10.0), None);
        boxed.sort();
        assert_eq!(boxed, vec![blue, red]);
        assert_eq!(mgr.query_enemies(Position::ORIGIN, 20.0, FACTION_BLUE), vec![red]);
        assert_eq!(mgr.query_radius_many(&[(Position::ORIGIN, 2.0)], None), vec![Vec::<UnitId>::new()]);
    }
}
