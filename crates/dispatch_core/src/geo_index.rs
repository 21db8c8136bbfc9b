//! Concurrency-safe index over driver positions and availability.
//!
//! Drivers are bucketed by H3 cell for pruned radius queries; exact ordering
//! uses haversine distance on the stored coordinates. One `RwLock` guards the
//! whole index so readers never observe a torn record, and
//! [`GeoIndex::try_claim`] gives the matching engine its availability CAS.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use h3o::CellIndex;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::geo::{haversine_meters, Geocoordinate};
use crate::ride::UserId;

/// Conservative lower bound on center spacing per H3 grid step at resolution 9
/// (meters). Used to size grid disks so radius queries never miss a cell.
const MIN_RING_SPACING_M: f64 = 200.0;

/// Cached grid disks for popular origin cells (pickup hotspots repeat).
const RING_CACHE_SIZE: usize = 1_000;

#[derive(Debug, Clone, Copy)]
struct DriverEntry {
    position: Geocoordinate,
    cell: CellIndex,
    available: bool,
}

#[derive(Debug, Default)]
struct IndexState {
    drivers: HashMap<UserId, DriverEntry>,
    drivers_by_cell: HashMap<CellIndex, Vec<UserId>>,
}

impl IndexState {
    fn detach_from_cell(&mut self, driver: UserId, cell: CellIndex) {
        if let Some(ids) = self.drivers_by_cell.get_mut(&cell) {
            ids.retain(|&id| id != driver);
            if ids.is_empty() {
                self.drivers_by_cell.remove(&cell);
            }
        }
    }
}

/// Shared driver/location index. All methods are safe to call concurrently.
pub struct GeoIndex {
    state: RwLock<IndexState>,
    ring_cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            ring_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(RING_CACHE_SIZE).expect("cache size must be non-zero"),
            )),
        }
    }

    /// Set or refresh a driver's position. Availability is untouched; a driver
    /// seen for the first time starts unavailable until they flag on.
    pub fn upsert(&self, driver: UserId, position: Geocoordinate) {
        let cell = position.to_cell();
        let mut state = self.state.write();
        match state.drivers.get(&driver).copied() {
            Some(entry) => {
                if entry.cell != cell {
                    state.detach_from_cell(driver, entry.cell);
                    state.drivers_by_cell.entry(cell).or_default().push(driver);
                }
                let entry = state.drivers.get_mut(&driver).expect("entry present");
                entry.position = position;
                entry.cell = cell;
            }
            None => {
                state.drivers.insert(
                    driver,
                    DriverEntry {
                        position,
                        cell,
                        available: false,
                    },
                );
                state.drivers_by_cell.entry(cell).or_default().push(driver);
            }
        }
    }

    /// Idempotent availability flip. Unknown drivers are ignored; a driver
    /// must report a position before they can be offered rides.
    pub fn set_available(&self, driver: UserId, available: bool) {
        let mut state = self.state.write();
        if let Some(entry) = state.drivers.get_mut(&driver) {
            entry.available = available;
        }
    }

    /// Atomically claim an available driver: flips `available` true -> false
    /// and reports whether this caller won the claim.
    pub fn try_claim(&self, driver: UserId) -> bool {
        let mut state = self.state.write();
        match state.drivers.get_mut(&driver) {
            Some(entry) if entry.available => {
                entry.available = false;
                true
            }
            _ => false,
        }
    }

    /// Drop a driver from consideration (offline).
    pub fn remove(&self, driver: UserId) {
        let mut state = self.state.write();
        if let Some(entry) = state.drivers.remove(&driver) {
            state.detach_from_cell(driver, entry.cell);
        }
    }

    pub fn position(&self, driver: UserId) -> Option<Geocoordinate> {
        self.state.read().drivers.get(&driver).map(|e| e.position)
    }

    pub fn is_available(&self, driver: UserId) -> bool {
        self.state
            .read()
            .drivers
            .get(&driver)
            .is_some_and(|e| e.available)
    }

    /// Drivers within `max_radius_m` of `origin`, ascending by haversine
    /// distance, ties broken by driver id ascending, truncated to `limit`.
    pub fn query_nearest(
        &self,
        origin: Geocoordinate,
        max_radius_m: f64,
        limit: usize,
        only_available: bool,
    ) -> Vec<(UserId, f64)> {
        if limit == 0 || max_radius_m <= 0.0 {
            return Vec::new();
        }
        let origin_cell = origin.to_cell();
        let k = (max_radius_m / MIN_RING_SPACING_M).ceil() as u32 + 1;
        let cells = self.grid_disk_cached(origin_cell, k);

        let state = self.state.read();
        let mut hits: Vec<(UserId, f64)> = Vec::new();
        for cell in &cells {
            let Some(ids) = state.drivers_by_cell.get(cell) else {
                continue;
            };
            for &id in ids {
                let Some(entry) = state.drivers.get(&id) else {
                    continue;
                };
                if only_available && !entry.available {
                    continue;
                }
                let distance = haversine_meters(origin, entry.position);
                if distance <= max_radius_m {
                    hits.push((id, distance));
                }
            }
        }
        drop(state);

        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(limit);
        hits
    }

    fn grid_disk_cached(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = self.ring_cache.lock();
        cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

impl std::fmt::Debug for GeoIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("GeoIndex")
            .field("drivers", &state.drivers.len())
            .field("cells", &state.drivers_by_cell.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{coord, offset_north_m};

    fn index_with(drivers: &[(u64, Geocoordinate, bool)]) -> GeoIndex {
        let index = GeoIndex::new();
        for &(id, position, available) in drivers {
            index.upsert(UserId(id), position);
            index.set_available(UserId(id), available);
        }
        index
    }

    #[test]
    fn new_drivers_start_unavailable() {
        let index = GeoIndex::new();
        index.upsert(UserId(1), coord(37.77, -122.42));
        assert!(!index.is_available(UserId(1)));
    }

    #[test]
    fn upsert_preserves_availability() {
        let origin = coord(37.77, -122.42);
        let index = index_with(&[(1, origin, true)]);
        index.upsert(UserId(1), offset_north_m(origin, 500.0));
        assert!(index.is_available(UserId(1)));
        let moved = index.position(UserId(1)).expect("present");
        assert!(moved.lat > origin.lat);
    }

    #[test]
    fn query_orders_by_distance_and_respects_radius() {
        let origin = coord(37.77, -122.42);
        let index = index_with(&[
            (1, origin, true),
            (2, offset_north_m(origin, 2_000.0), true),
            (3, offset_north_m(origin, 4_900.0), true),
            (4, offset_north_m(origin, 6_000.0), true),
        ]);

        let hits = index.query_nearest(origin, 5_000.0, 5, true);
        let ids: Vec<u64> = hits.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1), "ascending distances");
        assert!(hits[2].1 > 4_800.0 && hits[2].1 < 5_000.0, "got {}", hits[2].1);
    }

    #[test]
    fn ties_break_by_driver_id_ascending() {
        let origin = coord(37.77, -122.42);
        let spot = offset_north_m(origin, 300.0);
        let index = index_with(&[(9, spot, true), (3, spot, true), (6, spot, true)]);

        let hits = index.query_nearest(origin, 1_000.0, 5, true);
        let ids: Vec<u64> = hits.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![3, 6, 9]);
    }

    #[test]
    fn unavailable_drivers_are_excluded_unless_requested() {
        let origin = coord(37.77, -122.42);
        let index = index_with(&[(1, origin, true), (2, origin, false)]);

        let available = index.query_nearest(origin, 1_000.0, 5, true);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].0, UserId(1));

        let everyone = index.query_nearest(origin, 1_000.0, 5, false);
        assert_eq!(everyone.len(), 2);
    }

    #[test]
    fn limit_truncates_results() {
        let origin = coord(37.77, -122.42);
        let index = index_with(&[
            (1, origin, true),
            (2, offset_north_m(origin, 100.0), true),
            (3, offset_north_m(origin, 200.0), true),
        ]);
        let hits = index.query_nearest(origin, 1_000.0, 1, true);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, UserId(1));
    }

    #[test]
    fn claim_succeeds_exactly_once() {
        let origin = coord(37.77, -122.42);
        let index = index_with(&[(1, origin, true)]);

        assert!(index.try_claim(UserId(1)));
        assert!(!index.try_claim(UserId(1)), "second claim must lose");
        assert!(!index.is_available(UserId(1)));

        index.set_available(UserId(1), true);
        assert!(index.try_claim(UserId(1)));
    }

    #[test]
    fn claim_fails_for_unknown_driver() {
        let index = GeoIndex::new();
        assert!(!index.try_claim(UserId(404)));
    }

    #[test]
    fn removed_drivers_disappear_from_queries() {
        let origin = coord(37.77, -122.42);
        let index = index_with(&[(1, origin, true)]);
        index.remove(UserId(1));
        assert!(index.query_nearest(origin, 1_000.0, 5, true).is_empty());
        assert_eq!(index.position(UserId(1)), None);
    }
}
