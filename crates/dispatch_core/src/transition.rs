//! Role-aware ride status state machine.
//!
//! All transition rules live in this one table so permission logic is testable
//! independently of the service layer. Statuses: Requested (initial), Matched,
//! InProgress, Completed (terminal), Cancelled (terminal).

use crate::error::DispatchError;
use crate::ride::{RideStatus, Role};

/// Allowed target statuses for a (current status, role) pair.
pub fn allowed_targets(current: RideStatus, role: Role) -> &'static [RideStatus] {
    use RideStatus::{Cancelled, Completed, InProgress, Matched, Requested};
    match role {
        Role::Rider => match current {
            Requested => &[Cancelled],
            _ => &[],
        },
        Role::Driver => match current {
            Requested => &[Matched, Cancelled],
            Matched => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        },
    }
}

/// Validate a requested transition against the table.
///
/// Riders are barred from the privileged statuses (Matched, InProgress,
/// Completed) outright, independent of the table.
pub fn validate(current: RideStatus, role: Role, target: RideStatus) -> Result<(), DispatchError> {
    if role == Role::Rider
        && matches!(
            target,
            RideStatus::Matched | RideStatus::InProgress | RideStatus::Completed
        )
    {
        return Err(DispatchError::NotAuthorized);
    }
    if allowed_targets(current, role).contains(&target) {
        Ok(())
    } else {
        Err(DispatchError::InvalidTransition {
            from: current,
            to: target,
        })
    }
}
