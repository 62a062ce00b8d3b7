//! Value types that make up a pooled unit record.
//!
//! Records are plain data owned by a pool slot. Nothing here knows about
//! pools, indices or the grid; those layers only copy ids and positions out
//! of these types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// IDENTITY
// ============================================================================

/// Globally unique unit identifier.
///
/// Assigned from a single monotonically increasing counter and never reused
/// while the population lives. `UnitId(0)` marks a record that has never been
/// handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl UnitId {
    /// Id carried by records sitting in a pool's available list.
    pub const NONE: UnitId = UnitId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Faction/side identifier (0 = Blue, 1 = Red in the default roster).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FactionId(pub u8);

impl fmt::Display for FactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "faction {}", self.0)
    }
}

/// Dense index of a registered archetype.
///
/// Handed out in registration order so per-archetype tables can be plain
/// vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArchetypeId(pub u16);

impl ArchetypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// SPATIAL
// ============================================================================

/// 3D position. `x` and `z` span the ground plane, `y` is height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Position on the ground plane (height 0).
    pub fn ground(x: f32, z: f32) -> Self {
        Self { x, y: 0.0, z }
    }

    #[inline]
    pub fn distance_squared(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// Velocity vector in world units per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
}

impl Velocity {
    pub fn new(vx: f32, vy: f32, vz: f32) -> Self {
        Self { vx, vy, vz }
    }

    pub fn magnitude(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy + self.vz * self.vz).sqrt()
    }
}

// ============================================================================
// COMBAT STATE
// ============================================================================

/// Health of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn fraction(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            (self.current / self.max).clamp(0.0, 1.0)
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.current <= 0.0
    }

    pub fn damage(&mut self, amount: f32) {
        self.current = (self.current - amount).max(0.0);
    }

    pub fn heal(&mut self, amount: f32) {
        self.current = (self.current + amount).min(self.max);
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new(100.0)
    }
}

// ============================================================================
// UNIT RECORD
// ============================================================================

/// One pooled unit.
///
/// Created once by a pool factory and reused through acquire/release. While
/// active it is owned by its pool slot and referenced by id from the manager
/// indices and the spatial grid.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub id: UnitId,
    pub archetype: ArchetypeId,
    pub faction: FactionId,
    pub position: Position,
    pub velocity: Velocity,
    /// Heading around the vertical axis, radians.
    pub yaw: f32,
    pub health: Health,
    pub alive: bool,
    pub active: bool,
    /// Per-archetype scalar state (ammo, cooldowns, ability charges...).
    pub fields: HashMap<String, f32>,
    pub created_tick: u64,
    pub updated_tick: u64,
}

impl UnitRecord {
    /// A fresh, inactive record for the given archetype.
    pub fn blank(archetype: ArchetypeId, faction: FactionId, max_health: f32) -> Self {
        Self {
            id: UnitId::NONE,
            archetype,
            faction,
            position: Position::ORIGIN,
            velocity: Velocity::default(),
            yaw: 0.0,
            health: Health::new(max_health),
            alive: false,
            active: false,
            fields: HashMap::new(),
            created_tick: 0,
            updated_tick: 0,
        }
    }

    /// Restore pool defaults. Archetype, default faction and max health are
    /// properties of the slot and survive; the field map keeps its capacity.
    pub fn reset(&mut self, default_faction: FactionId) {
        self.id = UnitId::NONE;
        self.faction = default_faction;
        self.position = Position::ORIGIN;
        self.velocity = Velocity::default();
        self.yaw = 0.0;
        self.health.current = self.health.max;
        self.alive = false;
        self.active = false;
        self.fields.clear();
        self.created_tick = 0;
        self.updated_tick = 0;
    }

    pub fn field(&self, name: &str) -> Option<f32> {
        self.fields.get(name).copied()
    }
}
