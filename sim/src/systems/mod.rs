//! ECS systems for the unit population.
//!
//! **Lifecycle** (chained, once per fixed update):
//! - `tick_clock_system` - advances the tick
//! - `command_apply_system` - applies queued unit commands
//! - `corpse_cleanup_system` - despawns expired corpses
//! - `stats_refresh_system` - refreshes population statistics

pub mod lifecycle;

pub use lifecycle::*;
