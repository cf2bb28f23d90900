//! Journal abstraction for store mutations.

pub mod sqlite;

use thiserror::Error;

use crate::{
    core::store::{StoreError, StoreSnapshotV1},
    op::StoredOp,
    types::OpSeq,
};

/// Journal read or write failure.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Op or snapshot payload could not be (de)serialized.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Journal contents disagree with the store.
    #[error("replay: {0}")]
    Replay(#[from] StoreError),
    /// Anything else, including a full journal queue.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for journaled store mutations.
pub trait OpSink: Send {
    /// Appends `ops` atomically, in order. Returns the last persisted sequence.
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq>;
    /// Makes appended ops durable.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Records a snapshot covering every op through `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &StoreSnapshotV1, _last_seq: OpSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Drops ops through `seq`, returning how many were removed.
    fn compact_through(&mut self, _seq: OpSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
