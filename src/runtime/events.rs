//! Runtime event stream payloads.

use crate::types::{OpSeq, RegistrationId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// A new registration was imported.
    Registered {
        /// Inserted registration id.
        id: RegistrationId,
    },
    /// A registration was checked in.
    CheckedIn {
        /// Checked-in registration id.
        id: RegistrationId,
        /// False when this refreshed an earlier check-in.
        first: bool,
    },
    /// Persistence has reached at least this op sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        op_seq: OpSeq,
    },
}
