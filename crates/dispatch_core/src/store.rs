//! Authoritative in-memory ride state with per-ride mutation transactions.
//!
//! The outer map lock is held only for id lookup and insert; every mutation of
//! a ride (and its location log) runs inside that ride's own mutex via
//! [`RideStore::with_ride`], which is the narrow transaction the matching and
//! transition paths rely on for their compare-and-set discipline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::error::DispatchError;
use crate::geo::Geocoordinate;
use crate::ride::{Actor, LocationUpdate, Ride, RideId, RideStatus, Role, UserId};

#[derive(Debug)]
struct RideRecord {
    ride: Ride,
    /// Chronological append-only log; read back most recent first.
    locations: Vec<LocationUpdate>,
}

/// Shared ride store. All mutation goes through [`RideStore::with_ride`].
#[derive(Debug, Default)]
pub struct RideStore {
    rides: RwLock<HashMap<RideId, Arc<Mutex<RideRecord>>>>,
    next_id: AtomicU64,
}

impl RideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ride in Requested status with no driver; the current location
    /// starts at the pickup point.
    pub fn create_ride(&self, rider: UserId, pickup: Geocoordinate, dropoff: Geocoordinate) -> Ride {
        let id = RideId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let now = Utc::now();
        let ride = Ride {
            id,
            rider,
            driver: None,
            pickup,
            dropoff,
            current_location: pickup,
            status: RideStatus::Requested,
            created_at: now,
            updated_at: now,
        };
        let record = RideRecord {
            ride: ride.clone(),
            locations: Vec::new(),
        };
        self.rides.write().insert(id, Arc::new(Mutex::new(record)));
        ride
    }

    /// Snapshot a ride by id.
    pub fn get(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        let record = self.record(ride_id)?;
        let guard = record.lock();
        Ok(guard.ride.clone())
    }

    /// Run `f` under the ride's mutex. The closure sees the ride and its
    /// location log together; on success `updated_at` is bumped. Errors leave
    /// the record untouched only if the closure itself made no writes, so
    /// closures must validate before mutating.
    pub fn with_ride<T>(
        &self,
        ride_id: RideId,
        f: impl FnOnce(&mut Ride, &mut Vec<LocationUpdate>) -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let record = self.record(ride_id)?;
        let mut guard = record.lock();
        let record = &mut *guard;
        let out = f(&mut record.ride, &mut record.locations)?;
        record.ride.updated_at = Utc::now();
        Ok(out)
    }

    /// Location log for a ride, most recent first.
    pub fn list_locations(&self, ride_id: RideId) -> Result<Vec<LocationUpdate>, DispatchError> {
        let record = self.record(ride_id)?;
        let guard = record.lock();
        Ok(guard.locations.iter().rev().cloned().collect())
    }

    /// Rides visible to an actor: a rider sees their own rides; a driver sees
    /// their assigned rides plus unassigned Requested rides.
    pub fn rides_for(&self, actor: Actor) -> Vec<Ride> {
        let records: Vec<Arc<Mutex<RideRecord>>> = self.rides.read().values().cloned().collect();
        let mut rides: Vec<Ride> = records
            .iter()
            .filter_map(|record| {
                let guard = record.lock();
                let ride = &guard.ride;
                let visible = match actor.role {
                    Role::Rider => ride.rider == actor.id,
                    Role::Driver => {
                        ride.driver == Some(actor.id)
                            || (ride.status == RideStatus::Requested && ride.driver.is_none())
                    }
                };
                visible.then(|| ride.clone())
            })
            .collect();
        rides.sort_by_key(|ride| ride.id);
        rides
    }

    fn record(&self, ride_id: RideId) -> Result<Arc<Mutex<RideRecord>>, DispatchError> {
        self.rides
            .read()
            .get(&ride_id)
            .cloned()
            .ok_or(DispatchError::RideNotFound(ride_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::coord;

    #[test]
    fn create_ride_starts_requested_at_pickup() {
        let store = RideStore::new();
        let pickup = coord(37.77, -122.42);
        let dropoff = coord(37.80, -122.40);
        let ride = store.create_ride(UserId(1), pickup, dropoff);

        assert_eq!(ride.status, RideStatus::Requested);
        assert_eq!(ride.driver, None);
        assert_eq!(ride.current_location, pickup);
        assert_eq!(ride.dropoff, dropoff);
        assert_eq!(store.get(ride.id).expect("stored").id, ride.id);
    }

    #[test]
    fn ride_ids_are_unique() {
        let store = RideStore::new();
        let a = store.create_ride(UserId(1), coord(0.0, 0.0), coord(0.1, 0.1));
        let b = store.create_ride(UserId(1), coord(0.0, 0.0), coord(0.1, 0.1));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn get_unknown_ride_fails() {
        let store = RideStore::new();
        assert_eq!(
            store.get(RideId(99)),
            Err(DispatchError::RideNotFound(RideId(99)))
        );
    }

    #[test]
    fn with_ride_commits_mutations_and_bumps_updated_at() {
        let store = RideStore::new();
        let ride = store.create_ride(UserId(1), coord(0.0, 0.0), coord(0.1, 0.1));
        let before = ride.updated_at;

        store
            .with_ride(ride.id, |ride, _| {
                ride.status = RideStatus::Cancelled;
                Ok(())
            })
            .expect("update");

        let after = store.get(ride.id).expect("stored");
        assert_eq!(after.status, RideStatus::Cancelled);
        assert!(after.updated_at >= before);
    }

    #[test]
    fn list_locations_returns_most_recent_first() {
        let store = RideStore::new();
        let ride = store.create_ride(UserId(1), coord(0.0, 0.0), coord(0.1, 0.1));
        for i in 0..3 {
            store
                .with_ride(ride.id, |r, log| {
                    log.push(LocationUpdate {
                        ride: r.id,
                        location: coord(0.0, f64::from(i) * 0.01),
                        timestamp: Utc::now(),
                    });
                    Ok(())
                })
                .expect("append");
        }

        let log = store.list_locations(ride.id).expect("log");
        assert_eq!(log.len(), 3);
        assert!(log.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(log[0].location.lng, 0.02);
    }

    #[test]
    fn visibility_follows_actor_role() {
        let store = RideStore::new();
        let mine = store.create_ride(UserId(1), coord(0.0, 0.0), coord(0.1, 0.1));
        let theirs = store.create_ride(UserId(2), coord(0.0, 0.0), coord(0.1, 0.1));

        let rider_view = store.rides_for(Actor::rider(UserId(1)));
        assert_eq!(rider_view.len(), 1);
        assert_eq!(rider_view[0].id, mine.id);

        // Driver sees both open requests; once one is assigned elsewhere they
        // only see their own assignment plus the remaining open request.
        let driver_view = store.rides_for(Actor::driver(UserId(7)));
        assert_eq!(driver_view.len(), 2);

        store
            .with_ride(theirs.id, |ride, _| {
                ride.driver = Some(UserId(8));
                ride.status = RideStatus::Matched;
                Ok(())
            })
            .expect("assign");

        let driver_view = store.rides_for(Actor::driver(UserId(7)));
        assert_eq!(driver_view.len(), 1);
        assert_eq!(driver_view[0].id, mine.id);
    }
}
