//! Population configuration.
//!
//! Loaded once at startup (JSON) and handed to [`UnitManager::new`].
//! Every field has a default so partial files are fine.
//!
//! [`UnitManager::new`]: crate::manager::UnitManager::new

use crate::components::FactionId;
use crate::error::ConfigError;
use crate::spatial::DEFAULT_CELL_SIZE;
use serde::{Deserialize, Serialize};

/// Hard ceiling on simultaneously active units.
pub const DEFAULT_MAX_UNITS: usize = 10_000;

/// `max_size = initial_capacity * DEFAULT_GROWTH_FACTOR` when an archetype
/// does not set one.
pub const DEFAULT_GROWTH_FACTOR: usize = 4;

/// Blue faction of the default roster.
pub const FACTION_BLUE: FactionId = FactionId(0);
/// Red faction of the default roster.
pub const FACTION_RED: FactionId = FactionId(1);

/// Static description of one archetype (one unit type within one faction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeSpec {
    pub name: String,
    /// Faction the archetype belongs to (used by faction pre-warming).
    pub faction: FactionId,
    /// Pool instances created at registration.
    pub initial_capacity: usize,
    /// Pool ceiling; 0 means `initial_capacity * DEFAULT_GROWTH_FACTOR`.
    /// Bounds the initial capacity too.
    #[serde(default)]
    pub max_size: usize,
    #[serde(default = "default_max_health")]
    pub max_health: f32,
}

fn default_max_health() -> f32 {
    100.0
}

impl ArchetypeSpec {
    pub fn new(name: impl Into<String>, faction: FactionId, initial_capacity: usize) -> Self {
        Self {
            name: name.into(),
            faction,
            initial_capacity,
            max_size: 0,
            max_health: default_max_health(),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_health(mut self, max_health: f32) -> Self {
        self.max_health = max_health;
        self
    }

    /// Pool ceiling after applying the growth-factor default.
    ///
    /// An explicit `max_size` always wins; an `initial_capacity` above it is
    /// clamped (with a warning) when the pool is built.
    pub fn effective_max_size(&self) -> usize {
        if self.max_size == 0 {
            self.initial_capacity.saturating_mul(DEFAULT_GROWTH_FACTOR)
        } else {
            self.max_size
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyArchetypeName);
        }
        if self.initial_capacity == 0 {
            return Err(ConfigError::ZeroCapacity { name: self.name.clone() });
        }
        Ok(())
    }
}

/// Top-level configuration for a unit population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Global ceiling on active units across all archetypes.
    pub max_units: usize,
    /// Spatial grid cell edge length.
    pub cell_size: f32,
    /// Let archetype pools grow on demand up to their `max_size`.
    pub auto_expand: bool,
    /// Instances added per pool expansion.
    pub expand_increment: usize,
    /// Pending unit events kept before the oldest are dropped.
    pub event_capacity: usize,
    pub archetypes: Vec<ArchetypeSpec>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            max_units: DEFAULT_MAX_UNITS,
            cell_size: DEFAULT_CELL_SIZE,
            auto_expand: true,
            expand_increment: 16,
            event_capacity: 1024,
            archetypes: Self::default_roster(),
        }
    }
}

impl PopulationConfig {
    /// Config with no archetypes; register them individually afterwards.
    pub fn empty() -> Self {
        Self {
            archetypes: Vec::new(),
            ..Default::default()
        }
    }

    /// Two factions with infantry, scouts and heavies each.
    pub fn default_roster() -> Vec<ArchetypeSpec> {
        let mut roster = Vec::new();
        for (prefix, faction) in [("blue", FACTION_BLUE), ("red", FACTION_RED)] {
            roster.push(ArchetypeSpec::new(format!("{prefix}_infantry"), faction, 512).with_max_size(4096));
            roster.push(ArchetypeSpec::new(format!("{prefix}_scout"), faction, 64).with_max_health(60.0));
            roster.push(ArchetypeSpec::new(format!("{prefix}_heavy"), faction, 32).with_max_health(250.0));
        }
        roster
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_units == 0 {
            return Err(ConfigError::ZeroUnitCeiling);
        }
        for spec in &self.archetypes {
            spec.validate()?;
        }
        Ok(())
    }
}
