//! Mutation operation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    registration::{Registration, RegistrationPatch},
    types::{OpSeq, RegistrationId},
};

/// Version number for serialized [`StoredOpEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Immutable operation appended to the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Insert a fully materialized registration.
    Insert {
        /// Inserted record.
        registration: Registration,
    },
    /// Patch a record.
    Patch {
        /// Registration id to mutate.
        id: RegistrationId,
        /// Forward patch.
        patch: RegistrationPatch,
    },
}

impl Op {
    /// Registration touched by this op.
    pub fn registration_id(&self) -> RegistrationId {
        match self {
            Op::Insert { registration } => registration.id,
            Op::Patch { id, .. } => *id,
        }
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOp {
    /// Monotonic operation sequence.
    pub seq: OpSeq,
    /// Operation timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: Op,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOpEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub stored: StoredOp,
}

impl StoredOpEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(stored: StoredOp) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            stored,
        }
    }
}
