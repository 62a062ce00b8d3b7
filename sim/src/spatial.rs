//! Spatial partitioning for efficient neighbor queries.
//!
//! Units are bucketed on the ground plane (`x`, `z`) into square cells.
//! Height is ignored for bucketing but kept for exact distance checks, so a
//! query only has to look at the cells its search shape overlaps.
//!
//! Provides O(1) insert/move/remove and O(k) queries where k is the number
//! of units in the covered cells, rather than O(n) for brute force.

use crate::components::{Position, UnitId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Default cell edge length in world units.
pub const DEFAULT_CELL_SIZE: f32 = 20.0;

/// Smallest accepted cell edge; non-positive sizes are clamped to this.
pub const MIN_CELL_SIZE: f32 = 1.0;

/// Integer cell coordinates `(floor(x / size), floor(z / size))`.
pub type CellCoord = (i32, i32);

/// Uniform-grid spatial index keyed by unit id.
///
/// Invariants:
/// - an id is in at most one cell, and that cell is the one computed from
///   its last registered position;
/// - cells with no ids are removed immediately.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<CellCoord, HashSet<UnitId>>,
    /// Reverse lookup: unit to cell.
    unit_cells: HashMap<UnitId, CellCoord>,
    /// Exact positions for distance filtering.
    positions: HashMap<UnitId, Position>,
}

/// Occupancy summary for debug overlays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridStats {
    pub cell_size: f32,
    pub occupied_cells: usize,
    pub unit_count: usize,
    pub max_occupancy: usize,
    pub mean_occupancy: f32,
    /// Units-per-cell -> number of cells with that occupancy.
    pub occupancy_histogram: BTreeMap<usize, usize>,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialGrid {
    /// Create a grid. Cell sizes that are not positive and finite are
    /// clamped to [`MIN_CELL_SIZE`].
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size >= MIN_CELL_SIZE {
            cell_size
        } else {
            tracing::warn!(requested = cell_size, clamped = MIN_CELL_SIZE, "invalid grid cell size, clamping");
            MIN_CELL_SIZE
        };

        Self {
            cell_size,
            cells: HashMap::new(),
            unit_cells: HashMap::new(),
            positions: HashMap::new(),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Convert a world position to cell coordinates.
    #[inline]
    pub fn world_to_cell(&self, pos: &Position) -> CellCoord {
        self.coords_to_cell(pos.x, pos.z)
    }

    #[inline]
    fn coords_to_cell(&self, x: f32, z: f32) -> CellCoord {
        (
            (x / self.cell_size).floor() as i32,
            (z / self.cell_size).floor() as i32,
        )
    }

    /// Register a unit, or move it if already registered.
    pub fn add(&mut self, id: UnitId, pos: Position) {
        let cell = self.world_to_cell(&pos);

        if let Some(old_cell) = self.unit_cells.insert(id, cell) {
            if old_cell != cell {
                self.remove_from_cell(id, old_cell);
            }
        }
        self.cells.entry(cell).or_default().insert(id);
        self.positions.insert(id, pos);
    }

    /// Remove a unit. Returns false if it was not registered.
    pub fn remove(&mut self, id: UnitId) -> bool {
        self.positions.remove(&id);
        match self.unit_cells.remove(&id) {
            Some(cell) => {
                self.remove_from_cell(id, cell);
                true
            }
            None => false,
        }
    }

    fn remove_from_cell(&mut self, id: UnitId, cell: CellCoord) {
        if let Some(ids) = self.cells.get_mut(&cell) {
            ids.remove(&id);
            if ids.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Move a registered unit.
    ///
    /// Only touches cell sets when the cell actually changes. Returns false
    /// (and does nothing) if the unit is not registered.
    pub fn update_position(&mut self, id: UnitId, pos: Position) -> bool {
        let Some(&old_cell) = self.unit_cells.get(&id) else {
            return false;
        };
        let new_cell = self.world_to_cell(&pos);
        if new_cell != old_cell {
            self.remove_from_cell(id, old_cell);
            self.cells.entry(new_cell).or_default().insert(id);
            self.unit_cells.insert(id, new_cell);
        }
        self.positions.insert(id, pos);
        true
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.unit_cells.contains_key(&id)
    }

    pub fn position_of(&self, id: UnitId) -> Option<Position> {
        self.positions.get(&id).copied()
    }

    pub fn cell_of(&self, id: UnitId) -> Option<CellCoord> {
        self.unit_cells.get(&id).copied()
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.unit_cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unit_cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.unit_cells.clear();
        self.positions.clear();
    }

    /// Number of units in a cell.
    pub fn cell_count(&self, cell: CellCoord) -> usize {
        self.cells.get(&cell).map_or(0, |ids| ids.len())
    }

    /// All occupied cells (for debugging/visualization).
    pub fn all_cells(&self) -> impl Iterator<Item = (&CellCoord, &HashSet<UnitId>)> {
        self.cells.iter()
    }

    /// Visit every occupied cell inside the inclusive block `min..=max`.
    ///
    /// Walks the block when it is small and the occupied-cell map when the
    /// block is larger than the population, so huge search shapes stay
    /// bounded by the number of units.
    fn visit_block<F>(&self, min: CellCoord, max: CellCoord, mut visit: F)
    where
        F: FnMut(&HashSet<UnitId>),
    {
        let width = max.0 as i64 - min.0 as i64 + 1;
        let depth = max.1 as i64 - min.1 as i64 + 1;
        if width <= 0 || depth <= 0 {
            return;
        }

        if width.saturating_mul(depth) > self.cells.len() as i64 {
            for (&(cx, cz), ids) in &self.cells {
                if cx >= min.0 && cx <= max.0 && cz >= min.1 && cz <= max.1 {
                    visit(ids);
                }
            }
        } else {
            for cx in min.0..=max.0 {
                for cz in min.1..=max.1 {
                    if let Some(ids) = self.cells.get(&(cx, cz)) {
                        visit(ids);
                    }
                }
            }
        }
    }

    /// All units whose exact distance to `center` is at most `radius`.
    /// Order is unspecified; each id appears once.
    pub fn query_radius(&self, center: Position, radius: f32) -> Vec<UnitId> {
        let mut results = Vec::new();
        if self.is_empty() || !(radius >= 0.0) {
            return results;
        }

        let radius_sq = radius * radius;
        let min = self.coords_to_cell(center.x - radius, center.z - radius);
        let max = self.coords_to_cell(center.x + radius, center.z + radius);

        self.visit_block(min, max, |ids| {
            for id in ids {
                if let Some(pos) = self.positions.get(id) {
                    if pos.distance_squared(&center) <= radius_sq {
                        results.push(*id);
                    }
                }
            }
        });
        results
    }

    /// Nearest unit within `max_radius`, if any.
    ///
    /// Expanding ring search around the center cell. After ring `r` every
    /// unvisited cell is at least `r * cell_size` away horizontally, so the
    /// search stops as soon as that bound exceeds the best distance found.
    /// The result is exact; ties go to the lower id.
    pub fn query_nearest(&self, center: Position, max_radius: f32) -> Option<UnitId> {
        if self.is_empty() || !(max_radius >= 0.0) {
            return None;
        }

        let max_sq = max_radius * max_radius;
        let (cx, cz) = self.world_to_cell(&center);
        let max_ring = (max_radius / self.cell_size).ceil().min(i32::MAX as f32) as i32;
        let mut best: Option<(f32, UnitId)> = None;

        let consider = |ids: &HashSet<UnitId>, best: &mut Option<(f32, UnitId)>| {
            for id in ids {
                let Some(pos) = self.positions.get(id) else { continue };
                let dist_sq = pos.distance_squared(&center);
                if dist_sq > max_sq {
                    continue;
                }
                let better = match *best {
                    None => true,
                    Some((best_sq, best_id)) => dist_sq < best_sq || (dist_sq == best_sq && *id < best_id),
                };
                if better {
                    *best = Some((dist_sq, *id));
                }
            }
        };

        for ring in 0..=max_ring {
            if let Some((best_sq, _)) = best {
                let bound = (ring - 1).max(0) as f32 * self.cell_size;
                if bound * bound > best_sq {
                    break;
                }
            }

            // Sparse grid: the ring has more cells than the grid has occupied
            // cells, so finish with a scan of everything not yet visited.
            if ring > 0 && 8 * ring as usize > self.cells.len() {
                for (&(x, z), ids) in &self.cells {
                    let chebyshev = (x as i64 - cx as i64).abs().max((z as i64 - cz as i64).abs());
                    if chebyshev >= ring as i64 {
                        consider(ids, &mut best);
                    }
                }
                break;
            }

            if ring == 0 {
                if let Some(ids) = self.cells.get(&(cx, cz)) {
                    consider(ids, &mut best);
                }
                continue;
            }

            for dx in -ring..=ring {
                for dz in [-ring, ring] {
                    if let Some(ids) = self.cells.get(&(cx.wrapping_add(dx), cz.wrapping_add(dz))) {
                        consider(ids, &mut best);
                    }
                }
            }
            for dz in (-ring + 1)..ring {
                for dx in [-ring, ring] {
                    if let Some(ids) = self.cells.get(&(cx.wrapping_add(dx), cz.wrapping_add(dz))) {
                        consider(ids, &mut best);
                    }
                }
            }
        }

        best.map(|(_, id)| id)
    }

    /// Up to `k` units within `max_radius`, nearest first (ties by id).
    pub fn query_k_nearest(&self, center: Position, k: usize, max_radius: f32) -> Vec<UnitId> {
        if k == 0 {
            return Vec::new();
        }
        let mut candidates: Vec<(f32, UnitId)> = self
            .query_radius(center, max_radius)
            .into_iter()
            .filter_map(|id| self.positions.get(&id).map(|p| (p.distance_squared(&center), id)))
            .collect();

        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        candidates.truncate(k);
        candidates.into_iter().map(|(_, id)| id).collect()
    }

    /// All units inside the ground-plane rectangle spanned by `min` and `max`
    /// (inclusive, height ignored). Corners may be given in any order.
    pub fn query_rect(&self, min: Position, max: Position) -> Vec<UnitId> {
        let mut results = Vec::new();
        if self.is_empty() {
            return results;
        }

        let (x0, x1) = (min.x.min(max.x), min.x.max(max.x));
        let (z0, z1) = (min.z.min(max.z), min.z.max(max.z));
        let min_cell = self.coords_to_cell(x0, z0);
        let max_cell = self.coords_to_cell(x1, z1);

        self.visit_block(min_cell, max_cell, |ids| {
            for id in ids {
                if let Some(pos) = self.positions.get(id) {
                    if pos.x >= x0 && pos.x <= x1 && pos.z >= z0 && pos.z <= z1 {
                        results.push(*id);
                    }
                }
            }
        });
        results
    }

    /// Occupancy summary.
    pub fn stats(&self) -> GridStats {
        let mut histogram = BTreeMap::new();
        let mut max_occupancy = 0;
        for ids in self.cells.values() {
            *histogram.entry(ids.len()).or_insert(0) += 1;
            max_occupancy = max_occupancy.max(ids.len());
        }
        let mean_occupancy = if self.cells.is_empty() {
            0.0
        } else {
            self.len() as f32 / self.cells.len() as f32
        };

        GridStats {
            cell_size: self.cell_size,
            occupied_cells: self.cells.len(),
            unit_count: self.len(),
            max_occupancy,
            mean_occupancy,
            occupancy_histogram: histogram,
        }
    }

    /// Verify the grid invariants. Intended for tests and debug assertions.
    pub fn is_consistent(&self) -> bool {
        if self.unit_cells.len() != self.positions.len() {
            return false;
        }
        let mut total = 0;
        for (cell, ids) in &self.cells {
            if ids.is_empty() {
                return false;
            }
            for id in ids {
                if self.unit_cells.get(id) != Some(cell) {
                    return false;
                }
            }
            total += ids.len();
        }
        total == self.unit_cells.len()
            && self.unit_cells.iter().all(|(id, cell)| {
                self.positions
                    .get(id)
                    .is_some_and(|pos| self.world_to_cell(pos) == *cell)
            })
    }
}

/// Lock-guarded handle to a [`SpatialGrid`] for background workers.
///
/// Every call holds the lock for its whole duration; queries and mutations
/// are mutually exclusive.
#[derive(Clone, Default)]
pub struct SharedGrid {
    inner: Arc<Mutex<SpatialGrid>>,
}

impl SharedGrid {
    pub fn new(grid: SpatialGrid) -> Self {
        Self {
            inner: Arc::new(Mutex::new(grid)),
        }
    }

    pub fn add(&self, id: UnitId, pos: Position) {
        self.inner.lock().add(id, pos);
    }

    pub fn remove(&self, id: UnitId) -> bool {
        self.inner.lock().remove(id)
    }

    pub fn update_position(&self, id: UnitId, pos: Position) -> bool {
        self.inner.lock().update_position(id, pos)
    }

    pub fn query_radius(&self, center: Position, radius: f32) -> Vec<UnitId> {
        self.inner.lock().query_radius(center, radius)
    }

    pub fn query_nearest(&self, center: Position, max_radius: f32) -> Option<UnitId> {
        self.inner.lock().query_nearest(center, max_radius)
    }

    pub fn query_k_nearest(&self, center: Position, k: usize, max_radius: f32) -> Vec<UnitId> {
        self.inner.lock().query_k_nearest(center, k, max_radius)
    }

    pub fn query_rect(&self, min: Position, max: Position) -> Vec<UnitId> {
        self.inner.lock().query_rect(min, max)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn stats(&self) -> GridStats {
        self.inner.lock().stats()
    }

    /// Run `f` with exclusive access to the grid.
    pub fn with<R>(&self, f: impl FnOnce(&mut SpatialGrid) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
