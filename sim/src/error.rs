//! Error types for the unit population core.
//!
//! Two families are kept apart: [`ConfigError`] is a setup bug and is
//! returned from constructors and registration, while [`SpawnError`] is
//! mostly a runtime load condition that callers are expected to absorb.

/// Misconfiguration detected while building pools, archetypes or the manager.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A pool was configured with a `max_size` of zero.
    #[error("pool '{pool}' has a max_size of 0")]
    ZeroPoolSize { pool: String },

    /// Auto-expansion was enabled with nothing to expand by.
    #[error("pool '{pool}' auto-expands but its expand_increment is 0")]
    ZeroExpandIncrement { pool: String },

    /// An archetype was registered with no initial capacity.
    #[error("archetype '{name}' has an initial capacity of 0")]
    ZeroCapacity { name: String },

    /// Archetype names are used as lookup keys and must not be blank.
    #[error("archetype name must not be empty")]
    EmptyArchetypeName,

    /// Archetype ids are dense `u16` indices.
    #[error("cannot register more than {limit} archetypes")]
    TooManyArchetypes { limit: usize },

    /// The global unit ceiling must admit at least one unit.
    #[error("max_units must be at least 1")]
    ZeroUnitCeiling,

    /// The population config could not be parsed.
    #[error("failed to parse population config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reasons a spawn (or pool acquire) request could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    /// The archetype was never registered. This is a caller bug.
    #[error("archetype '{0}' is not registered")]
    UnknownArchetype(String),

    /// The archetype's pool is at its `max_size` and has nothing available.
    #[error("pool for archetype '{archetype}' is exhausted")]
    PoolExhausted { archetype: String },

    /// The global active-unit ceiling has been reached.
    #[error("global unit ceiling of {limit} reached")]
    CapacityReached { limit: usize },
}

impl SpawnError {
    /// Whether the failure is a load condition (retry later / drop the
    /// spawn) rather than a setup bug.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SpawnError::UnknownArchetype(_))
    }
}
