//! Application status state machine.
//!
//! ```text
//! pending ──▶ deploying ──▶ deployed ──▶ updating ──▶ deployed
//!                 │                         │
//!                 └────────▶ failed ◀───────┘
//!                              │ retry: deploying | updating
//! any but deleting/removed ──▶ deleting ──▶ removed
//! ```

use keel_common::AppStatus;

use super::error::ApplicationError;

/// Whether `from → to` is a legal edge.
#[must_use]
pub fn can_transition(from: AppStatus, to: AppStatus) -> bool {
    use AppStatus::{Deleting, Deployed, Deploying, Failed, Pending, Removed, Updating};
    match (from, to) {
        (Pending, Deploying)
        | (Deploying, Deployed | Failed)
        | (Deployed, Updating)
        | (Updating, Deployed | Failed)
        | (Failed, Deploying | Updating)
        | (Deleting, Removed) => true,
        (Deleting | Removed, Deleting) => false,
        (_, Deleting) => true,
        _ => false,
    }
}

/// Validate `from → to` for application `id`.
pub fn transition(id: &str, from: AppStatus, to: AppStatus) -> Result<AppStatus, ApplicationError> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(ApplicationError::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        })
    }
}
