//! SQLite registration journal.
//!
//! Every op becomes one `journal` row tagged with the attendee's normalized
//! email, so the history of a single badge can be read back without decoding
//! the whole log. The `attendees` table pins each registration id to its email
//! and is never compacted; a check-in for an id it does not know is refused at
//! write time.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    core::store::{RegistrationStore, StoreError, StoreSnapshotV1},
    op::{OP_FORMAT_VERSION, Op, StoredOp, StoredOpEnvelope},
    registration::normalize_email,
    types::{OpSeq, RegistrationId},
};

use super::{OpSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

const SELECT_OPS: &str = "SELECT seq, ts_ms, payload FROM journal";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: StoreSnapshotV1,
}

/// Journal action recorded alongside each op.
fn action(op: &Op) -> &'static str {
    match op {
        Op::Insert { .. } => "register",
        Op::Patch { patch, .. } if patch.is_scanned == Some(true) => "check_in",
        Op::Patch { .. } => "patch",
    }
}

/// SQLite implementation of [`OpSink`].
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates a journal at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        Self::prepare(Connection::open(path)?)
    }

    /// Opens a journal that lives only as long as the sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the store from the newest snapshot and the ops after it.
    pub fn load_store(&self) -> PersistResult<RegistrationStore> {
        let mut store = match self.latest_snapshot()? {
            Some(snapshot) => RegistrationStore::from_snapshot(snapshot)?,
            None => RegistrationStore::new(),
        };

        let start_seq = store.latest_op_seq();
        let tail = self.load_events_after(start_seq)?;
        debug!(start_seq, replayed = tail.len(), "replaying registration journal");
        for stored in tail {
            store.apply_replayed_op(stored)?;
        }
        Ok(store)
    }

    /// Ops with a sequence strictly greater than `seq`, oldest first.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_OPS} WHERE seq > ?1 ORDER BY seq ASC"))?;
        let ops = stmt
            .query_map(params![seq as i64], stored_op_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ops)
    }

    /// Every journaled op for the attendee registered under `email`, oldest
    /// first. Ops folded into a snapshot by compaction are no longer listed.
    pub fn attendee_history(&self, email: &str) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_OPS} WHERE email = ?1 ORDER BY seq ASC"))?;
        let ops = stmt
            .query_map(params![normalize_email(email)], stored_op_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ops)
    }

    /// Stores `snapshot` as covering every op up to `last_seq`.
    pub fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        let payload = serde_json::to_vec(&SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        })?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        Ok(())
    }

    /// Drops journal rows up to and including `seq`. Returns the number removed.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM journal WHERE seq <= ?1", params![seq as i64])?)
    }

    /// Highest sequence still present in the journal, or 0 when it is empty.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM journal", [], |row| row.get(0))?;
        Ok(seq.unwrap_or(0) as OpSeq)
    }

    fn latest_snapshot(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }
}

/// Email the journal row for `op` is filed under. Registrations claim their
/// email in `attendees`; later ops inherit it.
fn attendee_email(tx: &Transaction<'_>, op: &Op) -> PersistResult<String> {
    match op {
        Op::Insert { registration } => {
            tx.execute(
                "INSERT INTO attendees(registration_id, email) VALUES (?1, ?2)",
                params![registration.id as i64, registration.email],
            )?;
            Ok(registration.email.clone())
        }
        Op::Patch { id, .. } => tx
            .query_row(
                "SELECT email FROM attendees WHERE registration_id = ?1",
                params![*id as i64],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(PersistError::Replay(StoreError::MissingRegistration(*id))),
    }
}

impl OpSink for SqliteOpSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        let Some(last) = ops.last() else {
            return self.latest_seq();
        };

        let tx = self.conn.transaction()?;
        for stored in ops {
            let email = attendee_email(&tx, &stored.op)?;
            let scanned_at = match &stored.op {
                Op::Patch { patch, .. } => patch.scanned_at.map(|at| at.to_rfc3339()),
                Op::Insert { .. } => None,
            };
            let registration_id: RegistrationId = stored.op.registration_id();
            let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
            tx.execute(
                "INSERT INTO journal(seq, ts_ms, action, registration_id, email, scanned_at, payload) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    action(&stored.op),
                    registration_id as i64,
                    email,
                    scanned_at,
                    payload,
                ],
            )?;
        }
        tx.commit()?;

        Ok(last.seq)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }
}

fn stored_op_from_row(row: &Row<'_>) -> rusqlite::Result<StoredOp> {
    let seq: i64 = row.get(0)?;
    let ts_ms: i64 = row.get(1)?;
    let payload: Vec<u8> = row.get(2)?;

    let undecodable = |reason: String| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Blob,
            Box::new(std::io::Error::other(reason)),
        )
    };
    let envelope: StoredOpEnvelope = serde_json::from_slice(&payload)
        .map_err(|e| undecodable(format!("op payload decode failed: {e}")))?;
    if envelope.format_version != OP_FORMAT_VERSION {
        return Err(undecodable(format!(
            "unsupported op format version: {}",
            envelope.format_version
        )));
    }

    Ok(StoredOp {
        seq: seq as OpSeq,
        ts_ms: ts_ms as u64,
        ..envelope.stored
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
