//! Public-facing orchestrator wiring the state machine, matching engine, and
//! ride store. The API boundary maps its handlers onto these operations
//! one-to-one.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::geo::Geocoordinate;
use crate::geo_index::GeoIndex;
use crate::matching::MatchingEngine;
use crate::queue::{RideEvent, RideQueue};
use crate::ride::{Actor, LocationUpdate, Ride, RideId, RideStatus, Role, UserId};
use crate::store::RideStore;
use crate::transition;

#[derive(Debug)]
pub struct DispatchService {
    store: Arc<RideStore>,
    geo: Arc<GeoIndex>,
    matching: MatchingEngine,
    queue: Option<RideQueue>,
    config: DispatchConfig,
}

impl DispatchService {
    pub fn new(config: DispatchConfig) -> Self {
        let store = Arc::new(RideStore::new());
        let geo = Arc::new(GeoIndex::new());
        let matching = MatchingEngine::new(Arc::clone(&store), Arc::clone(&geo), config.clone());
        Self {
            store,
            geo,
            matching,
            queue: None,
            config,
        }
    }

    /// Attach an event queue; ride creation then publishes a
    /// [`RideEvent::RideRequested`] for the background match worker.
    pub fn with_queue(mut self, queue: RideQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<RideStore> {
        &self.store
    }

    pub fn geo_index(&self) -> &Arc<GeoIndex> {
        &self.geo
    }

    /// Create a ride for the requesting rider (status Requested, current
    /// location = pickup). Publishes a ride-requested event when a queue is
    /// attached; a publish failure is logged, not surfaced, since the ride is
    /// already committed.
    pub fn create_ride(
        &self,
        actor: Actor,
        pickup: Geocoordinate,
        dropoff: Geocoordinate,
    ) -> Result<Ride, DispatchError> {
        if actor.role != Role::Rider {
            return Err(DispatchError::NotAuthorized);
        }
        let ride = self.store.create_ride(actor.id, pickup, dropoff);
        info!(ride = %ride.id, rider = %actor.id, "ride requested");
        if let Some(queue) = &self.queue {
            if let Err(err) = queue.publish(&RideEvent::RideRequested { ride_id: ride.id }) {
                warn!(ride = %ride.id, %err, "failed to publish ride-requested event");
            }
        }
        Ok(ride)
    }

    /// Driver-initiated acceptance; see [`MatchingEngine::accept_ride`].
    pub fn accept_ride(&self, ride_id: RideId, actor: Actor) -> Result<Ride, DispatchError> {
        self.matching.accept_ride(ride_id, actor)
    }

    /// Match a Requested ride automatically; see [`MatchingEngine::auto_match`].
    pub fn auto_match(&self, ride_id: RideId) -> Result<UserId, DispatchError> {
        self.matching.auto_match(ride_id)
    }

    /// Transition a ride's status on behalf of an actor.
    ///
    /// The transition table is enforced under the ride's mutex. A driver
    /// moving a Requested ride to Matched goes through the same availability
    /// claim as [`DispatchService::accept_ride`]; a driver committing a
    /// terminal status is released back into the index as available within
    /// the same critical section.
    pub fn update_status(
        &self,
        ride_id: RideId,
        actor: Actor,
        target: RideStatus,
    ) -> Result<Ride, DispatchError> {
        let ride = self.store.with_ride(ride_id, |ride, _| {
            match actor.role {
                Role::Rider => {
                    if ride.rider != actor.id {
                        return Err(DispatchError::NotAuthorized);
                    }
                }
                Role::Driver => {
                    // Once a driver is assigned, only that driver may act.
                    if let Some(driver) = ride.driver {
                        if driver != actor.id {
                            return Err(DispatchError::NotAuthorized);
                        }
                    }
                }
            }
            transition::validate(ride.status, actor.role, target)?;

            if target == RideStatus::Matched {
                // Accept-by-status-update: claim the acting driver like any
                // other assignment.
                if !self.geo.try_claim(actor.id) {
                    return Err(DispatchError::DriverNotAvailable);
                }
                ride.driver = Some(actor.id);
            }

            ride.status = target;

            if actor.role == Role::Driver && target.is_terminal() && ride.driver == Some(actor.id) {
                self.geo.set_available(actor.id, true);
            }
            Ok(ride.clone())
        })?;
        info!(ride = %ride_id, actor = %actor.id, status = %target, "ride status updated");
        Ok(ride)
    }

    /// Record a position sample for an in-progress ride. Appends to the
    /// ride's location log and refreshes both the ride's current location and
    /// the driver's indexed position.
    pub fn record_location(
        &self,
        ride_id: RideId,
        actor: Actor,
        position: Geocoordinate,
    ) -> Result<(), DispatchError> {
        self.store.with_ride(ride_id, |ride, log| {
            if ride.driver != Some(actor.id) {
                return Err(DispatchError::NotAssignedDriver);
            }
            if ride.status != RideStatus::InProgress {
                return Err(DispatchError::RideNotInProgress);
            }
            log.push(LocationUpdate {
                ride: ride.id,
                location: position,
                timestamp: chrono::Utc::now(),
            });
            ride.current_location = position;
            self.geo.upsert(actor.id, position);
            Ok(())
        })
    }

    /// The ride's location log, most recent first.
    pub fn list_locations(&self, ride_id: RideId) -> Result<Vec<LocationUpdate>, DispatchError> {
        self.store.list_locations(ride_id)
    }

    /// Available drivers near a Requested ride's pickup point, visible only
    /// to the ride's rider or assigned driver.
    pub fn nearby_drivers(
        &self,
        ride_id: RideId,
        requester: Actor,
    ) -> Result<Vec<(UserId, f64)>, DispatchError> {
        let ride = self.store.get(ride_id)?;
        if requester.id != ride.rider && ride.driver != Some(requester.id) {
            return Err(DispatchError::NotAuthorized);
        }
        if ride.status != RideStatus::Requested {
            return Err(DispatchError::RideNotEligible);
        }
        Ok(self.geo.query_nearest(
            ride.pickup,
            self.config.nearby_radius_m,
            self.config.nearby_limit,
            true,
        ))
    }

    /// Rides visible to the actor; see [`RideStore::rides_for`].
    pub fn rides_for(&self, actor: Actor) -> Vec<Ride> {
        self.store.rides_for(actor)
    }

    /// Refresh a driver's indexed position outside any ride.
    pub fn update_driver_location(
        &self,
        actor: Actor,
        position: Geocoordinate,
    ) -> Result<(), DispatchError> {
        if actor.role != Role::Driver {
            return Err(DispatchError::NotADriver);
        }
        self.geo.upsert(actor.id, position);
        Ok(())
    }

    /// Flip a driver's availability flag.
    pub fn set_driver_available(&self, actor: Actor, available: bool) -> Result<(), DispatchError> {
        if actor.role != Role::Driver {
            return Err(DispatchError::NotADriver);
        }
        self.geo.set_available(actor.id, available);
        Ok(())
    }

    /// Take a driver offline, dropping them from matching consideration.
    pub fn driver_offline(&self, actor: Actor) -> Result<(), DispatchError> {
        if actor.role != Role::Driver {
            return Err(DispatchError::NotADriver);
        }
        self.geo.remove(actor.id);
        Ok(())
    }
}
