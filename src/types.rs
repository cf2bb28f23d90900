//! Shared primitive IDs, timestamps, and check-in policy enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic registration identifier.
pub type RegistrationId = u64;
/// Monotonic operation sequence number.
pub type OpSeq = u64;
/// Wall-clock instant stored on records.
pub type Timestamp = DateTime<Utc>;

/// What a check-in does when the registration was already scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescanPolicy {
    /// Re-scanning succeeds and moves `scanned_at` forward.
    #[default]
    Refresh,
    /// Re-scanning fails and leaves the record untouched.
    Reject,
}

/// Whether a successful check-in was the first for its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckInOutcome {
    /// Record went from unscanned to scanned.
    FirstScan,
    /// Record was already scanned; timestamp refreshed.
    Rescan,
}

impl CheckInOutcome {
    /// True for [`CheckInOutcome::FirstScan`].
    pub fn is_first(self) -> bool {
        matches!(self, Self::FirstScan)
    }
}

/// Field projection for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// Every stored field.
    #[default]
    Full,
    /// Display fields only.
    Summary,
}

/// Ordering for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOrder {
    /// Insertion order, oldest first.
    #[default]
    Created,
    /// Creation time descending.
    Newest,
}

/// Listing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListOptions {
    /// Field projection.
    #[serde(default)]
    pub projection: Projection,
    /// Row order.
    #[serde(default)]
    pub order: ListOrder,
}
