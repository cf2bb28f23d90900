//! Registration record, draft, patch, identity key, and listing projection.

use serde::{Deserialize, Serialize};

use crate::types::{RegistrationId, Timestamp};

/// Fully materialized, authoritative attendee record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Stable registration identifier.
    pub id: RegistrationId,
    /// Attendee name, trimmed.
    pub name: String,
    /// Attendee email, trimmed and lower-cased.
    pub email: String,
    /// Role or team the attendee registered under.
    pub role: String,
    /// Badge image URL, empty when none was uploaded.
    pub image: String,
    /// True once the attendee has been checked in.
    pub is_scanned: bool,
    /// Time of the latest successful check-in.
    pub scanned_at: Option<Timestamp>,
    /// Free-text profession.
    pub current_profession: String,
    /// Free-text investment field.
    pub investment_field: String,
    /// Time the record was created.
    pub created_at: Timestamp,
    /// Time of the latest mutation.
    pub updated_at: Timestamp,
}

impl Registration {
    /// Normalized identity used for check-in matching.
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.name, &self.email)
    }

    /// Display projection of this record.
    pub fn summary(&self) -> RegistrationSummary {
        RegistrationSummary {
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            image: self.image.clone(),
            is_scanned: self.is_scanned,
            scanned_at: self.scanned_at,
        }
    }
}

/// Subset of [`Registration`] shown on attendee lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSummary {
    /// Attendee name.
    pub name: String,
    /// Attendee email.
    pub email: String,
    /// Role or team.
    pub role: String,
    /// Badge image URL.
    pub image: String,
    /// Check-in flag.
    pub is_scanned: bool,
    /// Latest check-in time.
    pub scanned_at: Option<Timestamp>,
}

/// Insert payload used to create a new [`Registration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDraft {
    /// Attendee name.
    pub name: String,
    /// Attendee email.
    pub email: String,
    /// Role or team.
    pub role: String,
    /// Badge image URL.
    #[serde(default)]
    pub image: String,
    /// Free-text profession.
    #[serde(default)]
    pub current_profession: String,
    /// Free-text investment field.
    #[serde(default)]
    pub investment_field: String,
}

impl RegistrationDraft {
    /// Draft with only the required fields set.
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role: role.into(),
            image: String::new(),
            current_profession: String::new(),
            investment_field: String::new(),
        }
    }
}

/// Sparse patch where each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistrationPatch {
    /// Optional replacement for the check-in flag.
    pub is_scanned: Option<bool>,
    /// Optional replacement for the check-in time.
    pub scanned_at: Option<Timestamp>,
    /// Optional replacement for the last-mutation time.
    pub updated_at: Option<Timestamp>,
}

impl RegistrationPatch {
    /// Patch that marks a record checked in at `at`.
    pub fn check_in(at: Timestamp) -> Self {
        Self {
            is_scanned: Some(true),
            scanned_at: Some(at),
            updated_at: Some(at),
        }
    }

    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `rec`.
    pub fn apply_to(&self, rec: &mut Registration) {
        if let Some(v) = self.is_scanned {
            rec.is_scanned = v;
        }
        if let Some(v) = self.scanned_at {
            rec.scanned_at = Some(v);
        }
        if let Some(v) = self.updated_at {
            rec.updated_at = v;
        }
    }
}

/// Case- and whitespace-insensitive attendee identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    /// Trimmed, lower-cased name.
    pub name: String,
    /// Trimmed, lower-cased email.
    pub email: String,
}

impl IdentityKey {
    /// Normalizes a claimed name/email pair.
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: normalize_name(name),
            email: normalize_email(email),
        }
    }
}

/// Trims and lower-cases a name for comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Trims and lower-cases an email, matching how records store it.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
