//! Generic object pool.
//!
//! Reuses instances of one value type instead of allocating per spawn.
//! Instances are built by a factory when the pool is warmed or expands, move
//! between the *available* list and the *active* set through
//! [`ObjectPool::acquire`] / [`ObjectPool::release`], and are only dropped
//! together with the pool.
//!
//! `ObjectPool` itself is single-threaded. [`SharedPool`] wraps one in a
//! `parking_lot::Mutex` held for the whole of every call, for callers that
//! release from a worker thread.

use crate::error::ConfigError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Builds a new instance for the pool.
pub type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Restores an instance to a clean state before it is reused.
pub type ResetFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Sizing policy for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Instances created up front.
    pub initial_size: usize,
    /// Hard upper bound on instances ever created.
    pub max_size: usize,
    /// Grow on demand when the available list runs dry.
    pub auto_expand: bool,
    /// Instances added per expansion (bounded by `max_size`).
    pub expand_increment: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 16,
            max_size: 256,
            auto_expand: true,
            expand_increment: 16,
        }
    }
}

impl PoolConfig {
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        Self {
            initial_size,
            max_size,
            ..Default::default()
        }
    }

    /// Reject sizes that can never produce an instance.
    pub fn validate(&self, pool: &str) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroPoolSize { pool: pool.to_string() });
        }
        if self.auto_expand && self.expand_increment == 0 {
            return Err(ConfigError::ZeroExpandIncrement { pool: pool.to_string() });
        }
        Ok(())
    }
}

/// Handle to a slot in an [`ObjectPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    index: u32,
}

impl PoolHandle {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Cumulative pool statistics.
///
/// Everything except `current_active` and `available_count` only grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_created: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub peak_active: usize,
    pub exhausted_count: u64,
    /// Releases of handles that were not active (double release, stale).
    pub invalid_releases: u64,
    pub current_active: usize,
    pub available_count: usize,
}

impl PoolStats {
    /// Share of acquisitions served by reuse instead of a fresh instance.
    pub fn efficiency(&self) -> f32 {
        if self.total_acquired == 0 {
            return 0.0;
        }
        let reused = self.total_acquired.saturating_sub(self.total_created);
        reused as f32 / self.total_acquired as f32
    }

    /// Fraction of created instances currently in use.
    pub fn utilization(&self) -> f32 {
        let total = self.current_active + self.available_count;
        if total == 0 {
            0.0
        } else {
            self.current_active as f32 / total as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Available,
    Active,
}

struct Slot<T> {
    value: T,
    state: SlotState,
}

/// Pre-allocating pool for a single value type.
pub struct ObjectPool<T> {
    name: String,
    config: PoolConfig,
    slots: Vec<Slot<T>>,
    /// Stack of available slot indices.
    available: Vec<u32>,
    factory: Factory<T>,
    reset: Option<ResetFn<T>>,
    stats: PoolStats,
}

impl<T> ObjectPool<T> {
    /// Create a pool and warm it with `config.initial_size` instances.
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        config.validate(&name)?;

        let mut pool = Self {
            name,
            config,
            slots: Vec::with_capacity(config.initial_size.min(config.max_size)),
            available: Vec::with_capacity(config.initial_size.min(config.max_size)),
            factory: Box::new(factory),
            reset: None,
            stats: PoolStats::default(),
        };

        if config.initial_size > config.max_size {
            tracing::warn!(
                pool = %pool.name,
                initial = config.initial_size,
                max = config.max_size,
                "initial pool size exceeds max_size, clamping"
            );
        }
        pool.warm(config.initial_size);
        Ok(pool)
    }

    /// Install a reset function run on every release.
    pub fn with_reset(mut self, reset: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Total instances created (available + active).
    #[inline]
    pub fn total_size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.slots.len() - self.available.len()
    }

    #[inline]
    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    /// Eagerly create up to `n` instances, never exceeding `max_size`.
    /// Returns how many were created.
    pub fn warm(&mut self, n: usize) -> usize {
        let room = self.config.max_size.saturating_sub(self.slots.len());
        let count = n.min(room);
        self.slots.reserve(count);
        self.available.reserve(count);
        for _ in 0..count {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                value: (self.factory)(),
                state: SlotState::Available,
            });
            self.available.push(index);
        }
        self.stats.total_created += count as u64;
        count
    }

    fn expand(&mut self) -> usize {
        let added = self.warm(self.config.expand_increment);
        if added > 0 {
            tracing::debug!(pool = %self.name, added, total = self.slots.len(), "pool expanded");
        }
        added
    }

    /// Take an instance out of the pool.
    ///
    /// Returns `None` (and counts an exhaustion) when nothing is available
    /// and the pool cannot grow.
    pub fn acquire(&mut self) -> Option<PoolHandle> {
        if self.available.is_empty() && self.config.auto_expand {
            self.expand();
        }

        let Some(index) = self.available.pop() else {
            self.stats.exhausted_count += 1;
            tracing::warn!(pool = %self.name, max = self.config.max_size, "pool exhausted");
            return None;
        };

        self.slots[index as usize].state = SlotState::Active;
        self.stats.total_acquired += 1;
        self.stats.peak_active = self.stats.peak_active.max(self.active_count());
        Some(PoolHandle { index })
    }

    /// Return an instance to the pool.
    ///
    /// Releasing a handle that is not active is logged and ignored.
    pub fn release(&mut self, handle: PoolHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            self.stats.invalid_releases += 1;
            tracing::warn!(pool = %self.name, index = handle.index, "release of unknown pool slot");
            return false;
        };
        if slot.state != SlotState::Active {
            self.stats.invalid_releases += 1;
            tracing::warn!(pool = %self.name, index = handle.index, "release of slot that is not active");
            return false;
        }

        if let Some(reset) = &self.reset {
            reset(&mut slot.value);
        }
        slot.state = SlotState::Available;
        self.available.push(handle.index);
        self.stats.total_released += 1;
        true
    }

    /// Reset and free every active instance. Returns how many were freed.
    pub fn release_all(&mut self) -> usize {
        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state != SlotState::Active {
                continue;
            }
            if let Some(reset) = &self.reset {
                reset(&mut slot.value);
            }
            slot.state = SlotState::Available;
            self.available.push(index as u32);
            freed += 1;
        }
        self.stats.total_released += freed as u64;
        freed
    }

    #[inline]
    pub fn is_active(&self, handle: PoolHandle) -> bool {
        self.slots
            .get(handle.index())
            .is_some_and(|s| s.state == SlotState::Active)
    }

    /// Borrow an active instance.
    #[inline]
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|s| s.state == SlotState::Active)
            .map(|s| &s.value)
    }

    /// Mutably borrow an active instance.
    #[inline]
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|s| s.state == SlotState::Active)
            .map(|s| &mut s.value)
    }

    /// Iterate over active instances.
    pub fn iter_active(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            (slot.state == SlotState::Active).then_some((PoolHandle { index: index as u32 }, &slot.value))
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            current_active: self.active_count(),
            available_count: self.available.len(),
            ..self.stats
        }
    }

    /// Check the conservation invariant: every slot is in exactly one of
    /// available/active and the pool never exceeds `max_size`.
    pub fn is_consistent(&self) -> bool {
        let mut seen = vec![false; self.slots.len()];
        for &index in &self.available {
            let i = index as usize;
            if i >= self.slots.len() || seen[i] || self.slots[i].state != SlotState::Available {
                return false;
            }
            seen[i] = true;
        }
        let available_states = self
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Available)
            .count();
        available_states == self.available.len()
            && self.slots.len() <= self.config.max_size
            && self.stats.total_created == self.slots.len() as u64
    }
}

/// Thread-safe handle to an [`ObjectPool`].
///
/// Every method holds the lock for its full duration, so acquire, release
/// and reads are mutually exclusive.
pub struct SharedPool<T> {
    inner: Arc<Mutex<ObjectPool<T>>>,
}

impl<T> Clone for SharedPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedPool<T> {
    pub fn new(pool: ObjectPool<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    pub fn acquire(&self) -> Option<PoolHandle> {
        self.inner.lock().acquire()
    }

    pub fn release(&self, handle: PoolHandle) -> bool {
        self.inner.lock().release(handle)
    }

    pub fn release_all(&self) -> usize {
        self.inner.lock().release_all()
    }

    pub fn warm(&self, n: usize) -> usize {
        self.inner.lock().warm(n)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    /// Run `f` against an active instance while holding the lock.
    pub fn with<R>(&self, handle: PoolHandle, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.inner.lock().get(handle).map(f)
    }

    /// Run `f` against an active instance mutably while holding the lock.
    pub fn with_mut<R>(&self, handle: PoolHandle, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.lock().get_mut(handle).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_pool(initial: usize, max: usize) -> ObjectPool<u32> {
        ObjectPool::new("test", PoolConfig::new(initial, max), || 0u32).unwrap()
    }

    #[test]
    fn test_pool_warm_on_create() {
        let pool = counter_pool(4, 10);
        assert_eq!(pool.total_size(), 4);
        assert_eq!(pool.available_count(), 4);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.stats().total_created, 4);
    }

    #[test]
    fn test_pool_acquire_release() {
        let mut pool = counter_pool(2, 2);

        let h1 = pool.acquire().unwrap();
        *pool.get_mut(h1).unwrap() = 42;
        assert_eq!(*pool.get(h1).unwrap(), 42);
        assert_eq!(pool.active_count(), 1);

        assert!(pool.release(h1));
        assert_eq!(pool.active_count(), 0);
        assert!(pool.get(h1).is_none());
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_pool_reset_runs_on_release() {
        let mut pool = counter_pool(1, 1).with_reset(|v| *v = 0);
        let h = pool.acquire().unwrap();
        *pool.get_mut(h).unwrap() = 9;
        pool.release(h);

        let h = pool.acquire().unwrap();
        assert_eq!(*pool.get(h).unwrap(), 0);
    }

    #[test]
    fn test_pool_exhaustion_counts() {
        let mut pool = counter_pool(2, 2);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.stats().exhausted_count, 2);
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_pool_auto_expand_bounded_by_max() {
        let config = PoolConfig {
            initial_size: 1,
            max_size: 5,
            auto_expand: true,
            expand_increment: 3,
        };
        let mut pool = ObjectPool::new("grow", config, || 0u8).unwrap();

        let handles: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(handles.len(), 5);
        // 1 initial + 3 + 1 (clamped by max_size)
        assert_eq!(pool.total_size(), 5);
        assert!(pool.acquire().is_none());
        assert_eq!(pool.stats().exhausted_count, 1);
    }

    #[test]
    fn test_pool_without_auto_expand() {
        let config = PoolConfig {
            initial_size: 1,
            max_size: 5,
            auto_expand: false,
            expand_increment: 0,
        };
        let mut pool = ObjectPool::new("fixed", config, || 0u8).unwrap();
        assert!(pool.acquire().is_some());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.total_size(), 1);
    }

    #[test]
    fn test_pool_double_release_is_noop() {
        let mut pool = counter_pool(2, 2);
        let h = pool.acquire().unwrap();
        assert!(pool.release(h));
        assert!(!pool.release(h));

        let stats = pool.stats();
        assert_eq!(stats.invalid_releases, 1);
        assert_eq!(stats.total_released, 1);
        assert_eq!(pool.available_count(), 2);
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_pool_release_all() {
        let mut pool = counter_pool(3, 3).with_reset(|v| *v = 0);
        for _ in 0..3 {
            let h = pool.acquire().unwrap();
            *pool.get_mut(h).unwrap() = 1;
        }
        assert_eq!(pool.release_all(), 3);
        assert_eq!(pool.active_count(), 0);
        assert!(pool.iter_active().next().is_none());
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_pool_efficiency_tracks_reuse() {
        let mut pool = counter_pool(1, 1);
        for _ in 0..4 {
            let h = pool.acquire().unwrap();
            pool.release(h);
        }
        let stats = pool.stats();
        assert_eq!(stats.total_acquired, 4);
        assert_eq!(stats.total_created, 1);
        assert!((stats.efficiency() - 0.75).abs() < 1e-6);
        assert_eq!(stats.peak_active, 1);
    }

    #[test]
    fn test_pool_initial_clamped_to_max() {
        let pool = counter_pool(10, 3);
        assert_eq!(pool.total_size(), 3);
    }

    #[test]
    fn test_pool_rejects_zero_max() {
        let result = ObjectPool::new("empty", PoolConfig::new(0, 0), || 0u8);
        assert!(matches!(result, Err(ConfigError::ZeroPoolSize { .. })));
    }

    #[test]
    fn test_shared_pool_across_threads() {
        let shared = SharedPool::new(counter_pool(8, 8).with_reset(|v| *v = 0));
        let handles: Vec<_> = (0..8).map(|_| shared.acquire().unwrap()).collect();

        let workers: Vec<_> = handles
            .chunks(2)
            .map(|chunk| {
                let pool = shared.clone();
                let chunk = chunk.to_vec();
                std::thread::spawn(move || {
                    for h in chunk {
                        pool.with_mut(h, |v| *v += 1);
                        assert!(pool.release(h));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let stats = shared.stats();
        assert_eq!(stats.current_active, 0);
        assert_eq!(stats.available_count, 8);
        assert_eq!(stats.total_released, 8);
    }
}
