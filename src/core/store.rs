//! Authoritative in-memory registration store.
//!
//! Each successful mutation yields a [`StoredOp`] for the journal and is also
//! queued in `pending_ops` for callers that drain ops themselves.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::TimeDelta;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    op::{Op, StoredOp},
    registration::{
        IdentityKey, Registration, RegistrationDraft, RegistrationPatch, normalize_email,
        normalize_name,
    },
    types::{CheckInOutcome, ListOptions, ListOrder, OpSeq, RegistrationId, RescanPolicy, Timestamp},
};

use super::indices::EmailIndex;

/// Store-level rejection. A store that returns one of these is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Id is not in the store.
    #[error("registration {0} does not exist")]
    MissingRegistration(RegistrationId),
    /// Replayed insert reuses an id.
    #[error("registration {0} already exists")]
    AlreadyExists(RegistrationId),
    /// Normalized email is taken.
    #[error("email {0} is already registered")]
    DuplicateEmail(String),
    /// Required draft field is blank.
    #[error("registration field `{0}` is required")]
    InvalidDraft(&'static str),
    /// No record matches the claimed identity.
    #[error("no registration matches the claimed identity")]
    NoMatch,
    /// Rescan refused by [`RescanPolicy::Reject`].
    #[error("registration is already checked in")]
    AlreadyCheckedIn(Box<Registration>),
}

/// Serializable store image used for checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshotV1 {
    /// Id the next insert receives.
    pub next_registration_id: RegistrationId,
    /// Sequence the next op receives.
    pub next_op_seq: OpSeq,
    /// Insertion order.
    pub order: Vec<RegistrationId>,
    /// Records, in insertion order.
    pub records: Vec<Registration>,
}

/// Registrations keyed by id, with a unique normalized-email index.
#[derive(Debug, Default)]
pub struct RegistrationStore {
    records: HashMap<RegistrationId, Registration>,
    order: Vec<RegistrationId>,
    by_email: EmailIndex,
    pending_ops: Vec<StoredOp>,
    next_op_seq: OpSeq,
    next_registration_id: RegistrationId,
}

impl RegistrationStore {
    /// Empty store; ids and op sequences start at 1.
    pub fn new() -> Self {
        Self {
            next_op_seq: 1,
            next_registration_id: 1,
            ..Self::default()
        }
    }

    /// Restores a store from a checkpoint.
    pub fn from_snapshot(snapshot: StoreSnapshotV1) -> Result<Self, StoreError> {
        let mut store = Self {
            next_registration_id: snapshot.next_registration_id,
            next_op_seq: snapshot.next_op_seq,
            order: snapshot.order,
            ..Self::default()
        };

        for rec in snapshot.records {
            if store.by_email.contains_key(&rec.email) {
                return Err(StoreError::DuplicateEmail(rec.email));
            }
            store.by_email.insert(rec.email.clone(), rec.id);
            store.records.insert(rec.id, rec);
        }

        Ok(store)
    }

    /// Captures the current state for a checkpoint.
    pub fn export_snapshot(&self) -> StoreSnapshotV1 {
        let records = self
            .order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect();

        StoreSnapshotV1 {
            next_registration_id: self.next_registration_id,
            next_op_seq: self.next_op_seq,
            order: self.order.clone(),
            records,
        }
    }

    /// Validates and inserts a new, unscanned registration created at `now`.
    pub fn insert(
        &mut self,
        draft: RegistrationDraft,
        now: Timestamp,
    ) -> Result<(RegistrationId, StoredOp), StoreError> {
        let name = draft.name.trim();
        let email = normalize_email(&draft.email);
        let role = draft.role.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidDraft("name"));
        }
        if email.is_empty() {
            return Err(StoreError::InvalidDraft("email"));
        }
        if role.is_empty() {
            return Err(StoreError::InvalidDraft("role"));
        }
        if self.by_email.contains_key(&email) {
            return Err(StoreError::DuplicateEmail(email));
        }

        let id = self.next_registration_id;
        let registration = Registration {
            id,
            name: name.to_string(),
            email,
            role: role.to_string(),
            image: draft.image.trim().to_string(),
            is_scanned: false,
            scanned_at: None,
            current_profession: draft.current_profession,
            investment_field: draft.investment_field,
            created_at: now,
            updated_at: now,
        };

        let seq = self.take_next_op_seq();
        let stored = self.apply_insert_with_seq(registration, seq)?;
        self.pending_ops.push(stored.clone());
        Ok((id, stored))
    }

    /// Finds the record matching `identity` and marks it checked in.
    ///
    /// Lookup and update happen under the same `&mut self` borrow, so callers
    /// that serialize access get an atomic find-and-update per record.
    /// A re-scan always moves `scanned_at` strictly forward.
    pub fn check_in(
        &mut self,
        identity: &IdentityKey,
        policy: RescanPolicy,
        now: Timestamp,
    ) -> Result<(Registration, CheckInOutcome, StoredOp), StoreError> {
        let id = self.find_identity(identity).ok_or(StoreError::NoMatch)?;
        let rec = self
            .records
            .get(&id)
            .ok_or(StoreError::MissingRegistration(id))?;

        let outcome = if rec.is_scanned {
            CheckInOutcome::Rescan
        } else {
            CheckInOutcome::FirstScan
        };
        if outcome == CheckInOutcome::Rescan && policy == RescanPolicy::Reject {
            return Err(StoreError::AlreadyCheckedIn(Box::new(rec.clone())));
        }

        let at = match rec.scanned_at {
            Some(prev) if prev >= now => prev + TimeDelta::microseconds(1),
            _ => now,
        };

        let seq = self.take_next_op_seq();
        let stored = self.apply_patch_with_seq(id, RegistrationPatch::check_in(at), seq)?;
        self.pending_ops.push(stored.clone());

        let updated = self
            .get_cloned(id)
            .ok_or(StoreError::MissingRegistration(id))?;
        Ok((updated, outcome, stored))
    }

    /// Re-applies a journaled op, keeping its original sequence.
    pub fn apply_replayed_op(&mut self, stored: StoredOp) -> Result<(), StoreError> {
        let seq = stored.seq;
        match stored.op {
            Op::Insert { registration } => {
                self.apply_insert_with_seq(registration, seq)?;
            }
            Op::Patch { id, patch } => {
                self.apply_patch_with_seq(id, patch, seq)?;
            }
        }
        Ok(())
    }

    /// Record by id.
    pub fn get(&self, id: RegistrationId) -> Option<&Registration> {
        self.records.get(&id)
    }

    /// Owned copy of the record with `id`.
    pub fn get_cloned(&self, id: RegistrationId) -> Option<Registration> {
        self.get(id).cloned()
    }

    /// Record registered under `email`, compared after normalization.
    pub fn by_email(&self, email: &str) -> Option<&Registration> {
        self.by_email
            .get(&normalize_email(email))
            .and_then(|id| self.records.get(id))
    }

    /// Id of the record whose normalized email and name both equal `identity`.
    pub fn find_identity(&self, identity: &IdentityKey) -> Option<RegistrationId> {
        let id = *self.by_email.get(&identity.email)?;
        let rec = self.records.get(&id)?;
        (normalize_name(&rec.name) == identity.name).then_some(id)
    }

    /// Every record, in insertion order or newest first.
    pub fn list(&self, options: ListOptions) -> Vec<&Registration> {
        let mut out: Vec<&Registration> = self
            .order
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect();

        if options.order == ListOrder::Newest {
            out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        }
        out
    }

    /// Owned variant of [`Self::list`].
    pub fn list_cloned(&self, options: ListOptions) -> Vec<Registration> {
        self.list(options).into_iter().cloned().collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids in insertion order.
    pub fn ordered_ids(&self) -> &[RegistrationId] {
        &self.order
    }

    /// Takes the ops produced since the last drain.
    pub fn drain_pending_ops(&mut self) -> Vec<StoredOp> {
        std::mem::take(&mut self.pending_ops)
    }

    /// Sequence of the most recent op, or 0.
    pub fn latest_op_seq(&self) -> OpSeq {
        self.next_op_seq.saturating_sub(1)
    }

    fn apply_insert_with_seq(&mut self, registration: Registration, seq: OpSeq) -> Result<StoredOp, StoreError> {
        if self.records.contains_key(&registration.id) {
            return Err(StoreError::AlreadyExists(registration.id));
        }
        if self.by_email.contains_key(&registration.email) {
            return Err(StoreError::DuplicateEmail(registration.email));
        }

        let id = registration.id;
        self.next_registration_id = self.next_registration_id.max(id.saturating_add(1));
        self.by_email.insert(registration.email.clone(), id);
        self.order.push(id);
        self.records.insert(id, registration.clone());

        self.bump_next_seq_from(seq);
        Ok(StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Insert { registration },
        })
    }

    fn apply_patch_with_seq(
        &mut self,
        id: RegistrationId,
        patch: RegistrationPatch,
        seq: OpSeq,
    ) -> Result<StoredOp, StoreError> {
        let rec = self
            .records
            .get_mut(&id)
            .ok_or(StoreError::MissingRegistration(id))?;
        patch.apply_to(rec);

        self.bump_next_seq_from(seq);
        Ok(StoredOp {
            seq,
            ts_ms: now_ms(),
            op: Op::Patch { id, patch },
        })
    }

    fn take_next_op_seq(&mut self) -> OpSeq {
        let seq = self.next_op_seq;
        self.next_op_seq += 1;
        seq
    }

    fn bump_next_seq_from(&mut self, seq: OpSeq) {
        self.next_op_seq = self.next_op_seq.max(seq.saturating_add(1));
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
