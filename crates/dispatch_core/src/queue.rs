//! Ride-lifecycle event queue and the background matching worker.
//!
//! The queue only decides *when* matching is attempted; the worker invokes
//! the same CAS-protected [`DispatchService::auto_match`] path as manual
//! acceptance, so redelivered events are safe (an already-matched ride fails
//! fast). Messages travel as JSON strings, matching the original wire format.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dispatch::DispatchService;
use crate::error::DispatchError;
use crate::ride::RideId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RideEvent {
    RideRequested { ride_id: RideId },
    /// Tells the worker to drain out; used for orderly teardown.
    Shutdown,
}

/// In-process at-least-once event queue (unbounded, multi-producer).
#[derive(Debug, Clone)]
pub struct RideQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl Default for RideQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RideQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn publish(&self, event: &RideEvent) -> Result<(), DispatchError> {
        let payload = serde_json::to_string(event)
            .map_err(|err| DispatchError::Backend(err.to_string()))?;
        self.tx
            .send(payload)
            .map_err(|err| DispatchError::Backend(err.to_string()))
    }

    /// Blocks until an event is available. A disconnected channel or a
    /// malformed payload surfaces as a transient backend error.
    pub fn consume(&self) -> Result<RideEvent, DispatchError> {
        let payload = self
            .rx
            .recv()
            .map_err(|err| DispatchError::Backend(err.to_string()))?;
        serde_json::from_str(&payload).map_err(|err| DispatchError::Backend(err.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Background worker consuming ride-requested events and triggering
/// auto-matching.
#[derive(Debug)]
pub struct MatchWorker;

impl MatchWorker {
    /// Spawn the worker thread. It runs until a [`RideEvent::Shutdown`] is
    /// consumed or every producer handle is dropped.
    pub fn spawn(service: Arc<DispatchService>, queue: RideQueue) -> JoinHandle<()> {
        // Hold only the consuming end so dropped producers disconnect us.
        let rx = queue.rx.clone();
        drop(queue);
        thread::spawn(move || loop {
            let payload = match rx.recv() {
                Ok(payload) => payload,
                Err(_) => {
                    debug!("queue disconnected, worker stopping");
                    return;
                }
            };
            let event: RideEvent = match serde_json::from_str(&payload) {
                Ok(event) => event,
                Err(err) => {
                    warn!(%err, "dropping malformed queue message");
                    continue;
                }
            };
            match event {
                RideEvent::Shutdown => {
                    info!("match worker shutting down");
                    return;
                }
                RideEvent::RideRequested { ride_id } => match service.auto_match(ride_id) {
                    Ok(driver) => info!(ride = %ride_id, %driver, "worker matched ride"),
                    // Expected business outcomes under at-least-once delivery.
                    Err(
                        DispatchError::NoDriverAvailable
                        | DispatchError::InvalidRideState
                        | DispatchError::RideNotFound(_),
                    ) => {
                        debug!(ride = %ride_id, "worker skipped ride")
                    }
                    Err(err) => warn!(ride = %ride_id, %err, "worker match attempt failed"),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::ride::{Actor, RideStatus, UserId};
    use crate::test_helpers::coord;

    #[test]
    fn events_round_trip_as_json() {
        let queue = RideQueue::new();
        let event = RideEvent::RideRequested { ride_id: RideId(7) };
        queue.publish(&event).expect("publish");
        assert_eq!(queue.consume().expect("consume"), event);
    }

    #[test]
    fn event_wire_format_is_tagged_snake_case() {
        let json = serde_json::to_string(&RideEvent::RideRequested { ride_id: RideId(3) })
            .expect("serialize");
        assert_eq!(json, r#"{"type":"ride_requested","ride_id":3}"#);
    }

    #[test]
    fn worker_matches_published_rides() {
        let queue = RideQueue::new();
        let service = Arc::new(
            DispatchService::new(DispatchConfig::default()).with_queue(queue.clone()),
        );

        let driver = Actor::driver(UserId(2));
        let pickup = coord(37.77, -122.42);
        service.update_driver_location(driver, pickup).expect("position");
        service.set_driver_available(driver, true).expect("available");

        let worker = MatchWorker::spawn(Arc::clone(&service), queue.clone());

        let ride = service
            .create_ride(Actor::rider(UserId(1)), pickup, coord(37.80, -122.40))
            .expect("create publishes the event");

        queue.publish(&RideEvent::Shutdown).expect("shutdown");
        worker.join().expect("worker exits");

        let matched = service.store().get(ride.id).expect("ride");
        assert_eq!(matched.status, RideStatus::Matched);
        assert_eq!(matched.driver, Some(driver.id));
    }

    #[test]
    fn worker_survives_rides_with_no_drivers() {
        let queue = RideQueue::new();
        let service = Arc::new(
            DispatchService::new(DispatchConfig::default()).with_queue(queue.clone()),
        );

        let worker = MatchWorker::spawn(Arc::clone(&service), queue.clone());

        let ride = service
            .create_ride(Actor::rider(UserId(1)), coord(0.0, 0.0), coord(0.1, 0.1))
            .expect("create");

        queue.publish(&RideEvent::Shutdown).expect("shutdown");
        worker.join().expect("worker exits");

        let untouched = service.store().get(ride.id).expect("ride");
        assert_eq!(untouched.status, RideStatus::Requested);
        assert_eq!(untouched.driver, None);
    }
}
