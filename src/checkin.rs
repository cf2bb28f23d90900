//! Check-in and listing operations on top of the registration runtime.
//!
//! Input validation happens here, before any command reaches the store, so a
//! rejected request never mutates state.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    core::store::StoreError,
    registration::{IdentityKey, Registration},
    runtime::handle::{RegistryHandle, RuntimeError},
    types::{CheckInOutcome, ListOptions, RescanPolicy},
};

/// Claimed attendee identity, as submitted by a scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInRequest {
    /// Claimed name.
    #[serde(default)]
    pub name: Option<String>,
    /// Claimed email.
    #[serde(default)]
    pub email: Option<String>,
}

impl CheckInRequest {
    /// Request with both fields present.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: Some(email.into()),
        }
    }

    /// Normalized identity, or `InvalidInput` when a field is missing or blank.
    pub fn identity(&self) -> Result<IdentityKey, CheckInError> {
        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        let email = self.email.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || email.is_empty() {
            return Err(CheckInError::InvalidInput);
        }
        Ok(IdentityKey::new(name, email))
    }
}

/// Why a check-in or listing request failed.
///
/// The display strings are the messages shown to scanner operators.
#[derive(Debug, Error)]
pub enum CheckInError {
    /// Name or email missing, blank, or not a string.
    #[error("Name and email are required")]
    InvalidInput,
    /// No registration carries the claimed name and email.
    #[error("Registration not found")]
    NotFound,
    /// Repeat scan under [`RescanPolicy::Reject`]; carries the existing record.
    #[error("Registration already checked in")]
    AlreadyCheckedIn(Box<Registration>),
    /// Storage or runtime failure.
    #[error("{0}")]
    Store(#[source] RuntimeError),
}

impl From<RuntimeError> for CheckInError {
    fn from(value: RuntimeError) -> Self {
        match value {
            RuntimeError::Store(StoreError::NoMatch) => Self::NotFound,
            RuntimeError::Store(StoreError::AlreadyCheckedIn(rec)) => Self::AlreadyCheckedIn(rec),
            other => Self::Store(other),
        }
    }
}

/// Successful check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedIn {
    /// Record after the update.
    pub registration: Registration,
    /// Whether this was the record's first check-in.
    pub outcome: CheckInOutcome,
}

/// Check-in operations bound to one registry and rescan policy.
#[derive(Clone)]
pub struct CheckInService {
    registry: RegistryHandle,
    policy: RescanPolicy,
}

impl CheckInService {
    /// Service that applies `policy` to repeat scans.
    pub fn new(registry: RegistryHandle, policy: RescanPolicy) -> Self {
        Self { registry, policy }
    }

    /// Configured rescan policy.
    pub fn policy(&self) -> RescanPolicy {
        self.policy
    }

    /// Underlying runtime handle.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Marks the registration matching `request` as checked in.
    pub async fn check_in(&self, request: &CheckInRequest) -> Result<CheckedIn, CheckInError> {
        let identity = request.identity()?;
        let email = identity.email.clone();

        match self.registry.check_in(identity, self.policy).await {
            Ok((registration, outcome)) => {
                info!(id = registration.id, %email, first = outcome.is_first(), "checked in");
                Ok(CheckedIn {
                    registration,
                    outcome,
                })
            }
            Err(err) => {
                let err = CheckInError::from(err);
                match &err {
                    CheckInError::NotFound => warn!(%email, "no registration for scanned badge"),
                    CheckInError::AlreadyCheckedIn(rec) => {
                        warn!(id = rec.id, %email, "rejected repeat check-in")
                    }
                    CheckInError::Store(source) => error!(%email, error = %source, "check-in failed"),
                    CheckInError::InvalidInput => {}
                }
                Err(err)
            }
        }
    }

    /// Every registration, in the requested order.
    pub async fn list(&self, options: ListOptions) -> Result<Vec<Registration>, CheckInError> {
        self.registry.list(options).await.map_err(|err| {
            error!(error = %err, "listing registrations failed");
            CheckInError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_fields_are_invalid_input() {
        for req in [
            CheckInRequest::default(),
            CheckInRequest::new("  ", "a@b.c"),
            CheckInRequest::new("Ann", "\t"),
            CheckInRequest {
                name: Some("Ann".into()),
                email: None,
            },
        ] {
            assert!(matches!(req.identity(), Err(CheckInError::InvalidInput)), "{req:?}");
        }
    }

    #[test]
    fn identity_is_normalized() {
        let key = CheckInRequest::new(" Alice ", "ALICE@EXAMPLE.COM").identity().unwrap();
        assert_eq!(key, IdentityKey::new("alice", "alice@example.com"));
    }

    #[test]
    fn store_errors_map_to_operation_errors() {
        assert!(matches!(
            CheckInError::from(RuntimeError::Store(StoreError::NoMatch)),
            CheckInError::NotFound
        ));
        assert!(matches!(
            CheckInError::from(RuntimeError::ChannelClosed),
            CheckInError::Store(_)
        ));
    }
}
