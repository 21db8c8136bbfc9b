//! Error taxonomy for dispatch operations.
//!
//! Every variant except [`DispatchError::Backend`] is an expected business
//! outcome reported to the caller; the API boundary maps them to client-facing
//! status codes. `Backend` signals a collaborator outage and is retryable.

use thiserror::Error;

use crate::ride::{RideId, RideStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("ride {0} not found")]
    RideNotFound(RideId),

    /// The ride is not in a state that permits matching.
    #[error("ride is not available for matching")]
    InvalidRideState,

    /// Normal business outcome: nobody within the match radius right now.
    #[error("no available drivers nearby")]
    NoDriverAvailable,

    #[error("this ride is not available for acceptance")]
    RideNotRequested,

    #[error("driver is not marked as available")]
    DriverNotAvailable,

    #[error("only drivers can perform this action")]
    NotADriver,

    #[error("not authorized for this ride")]
    NotAuthorized,

    /// Matching is final once a ride has progressed past Requested.
    #[error("cannot view nearby drivers for this ride")]
    RideNotEligible,

    #[error("only the assigned driver can update the ride location")]
    NotAssignedDriver,

    #[error("can only update location for in-progress rides")]
    RideNotInProgress,

    #[error("cannot transition from {from} to {to}")]
    InvalidTransition { from: RideStatus, to: RideStatus },

    /// Transient infrastructure failure; never conflated with a business
    /// rejection.
    #[error("backend unavailable: {0}")]
    Backend(String),
}

impl DispatchError {
    /// True for infrastructure failures that the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_errors_are_transient() {
        assert!(DispatchError::Backend("redis down".into()).is_transient());
        assert!(!DispatchError::NoDriverAvailable.is_transient());
        assert!(!DispatchError::InvalidRideState.is_transient());
        assert!(!DispatchError::RideNotFound(RideId(7)).is_transient());
    }

    #[test]
    fn transition_error_names_both_statuses() {
        let err = DispatchError::InvalidTransition {
            from: RideStatus::Requested,
            to: RideStatus::Completed,
        };
        assert_eq!(err.to_string(), "cannot transition from requested to completed");
    }
}
