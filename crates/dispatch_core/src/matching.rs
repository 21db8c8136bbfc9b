//! Driver-ride assignment with compare-and-set discipline.
//!
//! Both the automatic path ([`MatchingEngine::auto_match`]) and the
//! driver-initiated path ([`MatchingEngine::accept_ride`]) funnel through one
//! assignment routine: under the ride's mutex the ride must still be
//! Requested, and the driver claim ([`GeoIndex::try_claim`]) must win, before
//! either side is committed. Two racing attempts on the same ride or the same
//! driver therefore produce exactly one winner.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::geo_index::GeoIndex;
use crate::ride::{Actor, Ride, RideId, RideStatus, Role, UserId};
use crate::store::RideStore;

pub struct MatchingEngine {
    store: Arc<RideStore>,
    geo: Arc<GeoIndex>,
    config: DispatchConfig,
}

impl MatchingEngine {
    pub fn new(store: Arc<RideStore>, geo: Arc<GeoIndex>, config: DispatchConfig) -> Self {
        Self { store, geo, config }
    }

    /// Match a Requested ride with the nearest available driver.
    ///
    /// Candidate selection is an optimistic read; each candidate is then
    /// claimed at commit time, moving on to the next-nearest when a claim
    /// loses a race. Attempts are bounded by `max_match_attempts`. Safe to
    /// re-invoke on redelivery: an already-matched ride fails fast with
    /// [`DispatchError::InvalidRideState`].
    pub fn auto_match(&self, ride_id: RideId) -> Result<UserId, DispatchError> {
        let ride = self.store.get(ride_id)?;
        if ride.status != RideStatus::Requested || ride.driver.is_some() {
            return Err(DispatchError::InvalidRideState);
        }

        let candidates = self.geo.query_nearest(
            ride.pickup,
            self.config.match_radius_m,
            self.config.max_match_attempts.max(1),
            true,
        );
        if candidates.is_empty() {
            debug!(ride = %ride_id, "no drivers within match radius");
            return Err(DispatchError::NoDriverAvailable);
        }

        for (driver, distance_m) in candidates {
            match self.try_assign(ride_id, driver) {
                Ok(_) => {
                    info!(ride = %ride_id, %driver, distance_m, "ride auto-matched");
                    return Ok(driver);
                }
                // Candidate was claimed elsewhere between read and commit.
                Err(DispatchError::DriverNotAvailable) => continue,
                // Ride itself changed underneath us; stop retrying.
                Err(DispatchError::RideNotRequested) => {
                    return Err(DispatchError::InvalidRideState)
                }
                Err(other) => return Err(other),
            }
        }
        Err(DispatchError::NoDriverAvailable)
    }

    /// Driver-initiated acceptance of a Requested ride.
    pub fn accept_ride(&self, ride_id: RideId, actor: Actor) -> Result<Ride, DispatchError> {
        if actor.role != Role::Driver {
            return Err(DispatchError::NotADriver);
        }
        let ride = self.try_assign(ride_id, actor.id)?;
        info!(ride = %ride_id, driver = %actor.id, "ride accepted");
        Ok(ride)
    }

    /// The shared assignment CAS: commit `driver` to `ride_id` only if the
    /// ride is still Requested and the driver claim wins. The driver claim
    /// happens inside the ride mutex so both sides commit as one unit.
    fn try_assign(&self, ride_id: RideId, driver: UserId) -> Result<Ride, DispatchError> {
        self.store.with_ride(ride_id, |ride, _| {
            if ride.status != RideStatus::Requested || ride.driver.is_some() {
                return Err(DispatchError::RideNotRequested);
            }
            if !self.geo.try_claim(driver) {
                return Err(DispatchError::DriverNotAvailable);
            }
            ride.driver = Some(driver);
            ride.status = RideStatus::Matched;
            Ok(ride.clone())
        })
    }
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("config", &self.config)
            .finish()
    }
}
