//! This Bitter Ground - Unit Population Core
//!
//! Pooled unit records, a uniform spatial hash grid and a manager that keeps
//! both in sync, driven by a fixed-timestep `bevy_ecs` schedule.

pub mod api;
pub mod components;
pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod profiler;
pub mod spatial;
pub mod systems;
pub mod unit_pool;
pub mod world;

pub use api::UnitWorld;
pub use components::*;
pub use config::{ArchetypeSpec, PopulationConfig};
pub use error::{ConfigError, SpawnError};
pub use manager::{PopulationStats, SpawnRequest, UnitEvent, UnitManager};
pub use pool::{ObjectPool, PoolConfig, PoolHandle, PoolStats, SharedPool};
pub use spatial::{GridStats, SharedGrid, SpatialGrid};
pub use systems::*;
pub use unit_pool::{ArchetypeInfo, ArchetypeUtilization, UnitPool};
pub use world::{PopulationSnapshot, RestoreReport, UnitSnapshot};
