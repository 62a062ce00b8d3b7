//! Per-archetype pools of unit records.
//!
//! One [`ObjectPool`] per registered archetype, a single id counter shared
//! by all of them, and an active registry so a record can be found by id
//! without knowing its archetype.

use crate::components::{ArchetypeId, FactionId, Health, UnitId, UnitRecord};
use crate::config::ArchetypeSpec;
use crate::error::{ConfigError, SpawnError};
use crate::pool::{ObjectPool, PoolConfig, PoolHandle, PoolStats};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registered archetype metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeInfo {
    pub id: ArchetypeId,
    pub name: String,
    pub faction: FactionId,
    pub initial_capacity: usize,
    pub max_size: usize,
    pub max_health: f32,
}

/// Pool usage of one archetype, for debug overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeUtilization {
    pub name: String,
    pub faction: FactionId,
    pub active: usize,
    pub available: usize,
    pub max_size: usize,
    pub peak_active: usize,
    pub exhausted_count: u64,
    pub efficiency: f32,
}

struct ArchetypeEntry {
    info: ArchetypeInfo,
    pool: ObjectPool<UnitRecord>,
}

/// Where an active unit lives.
#[derive(Debug, Clone, Copy)]
struct ActiveSlot {
    archetype: ArchetypeId,
    handle: PoolHandle,
}

/// Archetype-keyed record pools with global id assignment.
pub struct UnitPool {
    archetypes: Vec<ArchetypeEntry>,
    by_name: HashMap<String, ArchetypeId>,
    active: HashMap<UnitId, ActiveSlot>,
    next_id: u64,
    auto_expand: bool,
    expand_increment: usize,
    tick: u64,
    unknown_releases: u64,
}

impl Default for UnitPool {
    fn default() -> Self {
        Self::new(true, PoolConfig::default().expand_increment)
    }
}

impl UnitPool {
    pub fn new(auto_expand: bool, expand_increment: usize) -> Self {
        Self {
            archetypes: Vec::new(),
            by_name: HashMap::new(),
            active: HashMap::new(),
            next_id: 1,
            auto_expand,
            expand_increment,
            tick: 0,
            unknown_releases: 0,
        }
    }

    /// Register a new archetype and warm its pool.
    ///
    /// Registering a name twice is logged and returns the existing id.
    pub fn register_archetype(&mut self, spec: &ArchetypeSpec) -> Result<ArchetypeId, ConfigError> {
        spec.validate()?;
        if let Some(&existing) = self.by_name.get(&spec.name) {
            tracing::warn!(archetype = %spec.name, "archetype already registered");
            return Ok(existing);
        }

        let id = next_archetype_id(self.archetypes.len())?;
        let faction = spec.faction;
        let max_health = spec.max_health;
        let config = PoolConfig {
            initial_size: spec.initial_capacity,
            max_size: spec.effective_max_size(),
            auto_expand: self.auto_expand,
            expand_increment: self.expand_increment,
        };
        let pool = ObjectPool::new(spec.name.clone(), config, move || {
            UnitRecord::blank(id, faction, max_health)
        })?
        .with_reset(move |record: &mut UnitRecord| record.reset(faction));

        let info = ArchetypeInfo {
            id,
            name: spec.name.clone(),
            faction,
            initial_capacity: spec.initial_capacity.min(config.max_size),
            max_size: config.max_size,
            max_health,
        };
        tracing::debug!(archetype = %info.name, capacity = info.initial_capacity, max = info.max_size, "archetype registered");
        self.by_name.insert(spec.name.clone(), id);
        self.archetypes.push(ArchetypeEntry { info, pool });
        Ok(id)
    }

    pub fn archetype_id(&self, name: &str) -> Option<ArchetypeId> {
        self.by_name.get(name).copied()
    }

    pub fn archetype(&self, id: ArchetypeId) -> Option<&ArchetypeInfo> {
        self.archetypes.get(id.index()).map(|e| &e.info)
    }

    pub fn archetypes(&self) -> impl Iterator<Item = &ArchetypeInfo> {
        self.archetypes.iter().map(|e| &e.info)
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Tick stamped into `created_tick`/`updated_tick` of acquired records.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Acquire a record by archetype name.
    pub fn acquire_named(&mut self, name: &str) -> Result<&mut UnitRecord, SpawnError> {
        match self.archetype_id(name) {
            Some(id) => self.acquire(id),
            None => {
                tracing::error!(archetype = %name, "acquire for unregistered archetype");
                Err(SpawnError::UnknownArchetype(name.to_string()))
            }
        }
    }

    /// Acquire a record, assign it the next unit id and mark it live.
    pub fn acquire(&mut self, archetype: ArchetypeId) -> Result<&mut UnitRecord, SpawnError> {
        let Some(entry) = self.archetypes.get_mut(archetype.index()) else {
            tracing::error!(archetype = archetype.0, "acquire for unregistered archetype id");
            return Err(SpawnError::UnknownArchetype(format!("#{}", archetype.0)));
        };

        let Some(handle) = entry.pool.acquire() else {
            return Err(SpawnError::PoolExhausted {
                archetype: entry.info.name.clone(),
            });
        };

        let max_health = entry.info.max_health;
        let Some(record) = entry.pool.get_mut(handle) else {
            return Err(SpawnError::PoolExhausted {
                archetype: entry.info.name.clone(),
            });
        };

        let id = UnitId(self.next_id);
        self.next_id += 1;
        self.active.insert(id, ActiveSlot { archetype, handle });

        let tick = self.tick;
        record.id = id;
        record.health = Health::new(max_health);
        record.alive = true;
        record.active = true;
        record.created_tick = tick;
        record.updated_tick = tick;
        Ok(record)
    }

    /// Return a unit's record to its pool. Unknown ids are logged and ignored.
    pub fn release(&mut self, id: UnitId) -> bool {
        let Some(slot) = self.active.remove(&id) else {
            self.unknown_releases += 1;
            tracing::warn!(id = %id, "release of unknown unit id");
            return false;
        };
        match self.archetypes.get_mut(slot.archetype.index()) {
            Some(entry) => entry.pool.release(slot.handle),
            None => false,
        }
    }

    /// Release every active record in every pool.
    pub fn release_all(&mut self) -> usize {
        self.active.clear();
        self.archetypes.iter_mut().map(|e| e.pool.release_all()).sum()
    }

    pub fn get(&self, id: UnitId) -> Option<&UnitRecord> {
        let slot = self.active.get(&id)?;
        self.archetypes.get(slot.archetype.index())?.pool.get(slot.handle)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut UnitRecord> {
        let slot = *self.active.get(&id)?;
        self.archetypes.get_mut(slot.archetype.index())?.pool.get_mut(slot.handle)
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.active.contains_key(&id)
    }

    /// Pre-warm every archetype of `faction` by `initial_capacity * multiplier`
    /// extra instances (bounded by each pool's `max_size`). Returns how many
    /// instances were created.
    pub fn warm_faction(&mut self, faction: FactionId, multiplier: f32) -> usize {
        if !(multiplier > 0.0) {
            return 0;
        }
        let mut created = 0;
        for entry in self.archetypes.iter_mut().filter(|e| e.info.faction == faction) {
            let target = (entry.info.initial_capacity as f32 * multiplier).ceil() as usize;
            created += entry.pool.warm(target);
        }
        tracing::debug!(faction = faction.0, multiplier, created, "faction pools warmed");
        created
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.active.keys().copied()
    }

    /// Active records of one archetype.
    pub fn active_by_archetype(&self, archetype: ArchetypeId) -> Vec<&UnitRecord> {
        self.archetypes
            .get(archetype.index())
            .map(|e| e.pool.iter_active().map(|(_, r)| r).collect())
            .unwrap_or_default()
    }

    /// Active records currently tagged with `faction`.
    pub fn active_by_faction(&self, faction: FactionId) -> Vec<&UnitRecord> {
        self.archetypes
            .iter()
            .flat_map(|e| e.pool.iter_active().map(|(_, r)| r))
            .filter(|r| r.faction == faction)
            .collect()
    }

    pub fn pool_stats(&self, archetype: ArchetypeId) -> Option<PoolStats> {
        self.archetypes.get(archetype.index()).map(|e| e.pool.stats())
    }

    pub fn unknown_releases(&self) -> u64 {
        self.unknown_releases
    }

    pub fn utilization(&self) -> Vec<ArchetypeUtilization> {
        self.archetypes
            .iter()
            .map(|e| {
                let stats = e.pool.stats();
                ArchetypeUtilization {
                    name: e.info.name.clone(),
                    faction: e.info.faction,
                    active: stats.current_active,
                    available: stats.available_count,
                    max_size: e.info.max_size,
                    peak_active: stats.peak_active,
                    exhausted_count: stats.exhausted_count,
                    efficiency: stats.efficiency(),
                }
            })
            .collect()
    }

    /// Every pool conserves its slots and the registry matches the pools.
    pub fn is_consistent(&self) -> bool {
        let pooled_active: usize = self.archetypes.iter().map(|e| e.pool.active_count()).sum();
        pooled_active == self.active.len()
            && self.archetypes.iter().all(|e| e.pool.is_consistent())
            && self.active.iter().all(|(id, slot)| {
                self.archetypes
                    .get(slot.archetype.index())
                    .and_then(|e| e.pool.get(slot.handle))
                    .is_some_and(|r| r.id == *id && r.active)
            })
    }
}

/// Dense id for the archetype registered at position `index`.
fn next_archetype_id(index: usize) -> Result<ArchetypeId, ConfigError> {
    u16::try_from(index)
        .map(ArchetypeId)
        .map_err(|_| ConfigError::TooManyArchetypes {
            limit: u16::MAX as usize + 1,
        })
}
