//! Single-writer task owning the [`RegistrationStore`].
//!
//! Commands are processed one at a time, so a check-in's lookup and update
//! cannot interleave with another request. Journal queue capacity is claimed
//! before the store is touched: a command that cannot be journaled fails
//! without mutating anything.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    core::store::{RegistrationStore, StoreError, StoreSnapshotV1},
    op::{Op, StoredOp},
    persist::{OpSink, PersistError},
    registration::{IdentityKey, Registration, RegistrationDraft},
    types::{CheckInOutcome, ListOptions, OpSeq, RegistrationId, RescanPolicy},
};

use super::events::RegistrationEvent;

/// Error returned through a [`RegistryHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The store rejected the command.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The journal could not take or write the op.
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
    /// The runtime task has stopped.
    #[error("registration runtime is not running")]
    ChannelClosed,
}

/// Journal batching and checkpoint tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Write registrations to the journal as soon as they arrive.
    pub flush_on_insert: bool,
    /// Write check-ins to the journal as soon as they arrive.
    pub flush_on_check_in: bool,
    /// Ops buffered before a forced write.
    pub batch_max_ops: usize,
    /// Longest an op waits in the buffer.
    pub batch_max_latency_ms: u64,
    /// Capacity of the journal queue; a full queue fails new mutations.
    pub persist_queue_bound: usize,
    /// Automatic checkpoint interval in ops; 0 disables it.
    pub snapshot_every_ops: usize,
    /// Drop journaled ops covered by a checkpoint.
    pub compact_after_snapshot: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_insert: false,
            flush_on_check_in: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 256,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
        }
    }
}

/// Cloneable handle to the task that owns the [`RegistrationStore`].
#[derive(Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<RegistrationEvent>,
}

enum Command {
    Register {
        draft: RegistrationDraft,
        resp: oneshot::Sender<Result<RegistrationId, RuntimeError>>,
    },
    CheckIn {
        identity: IdentityKey,
        policy: RescanPolicy,
        resp: oneshot::Sender<Result<(Registration, CheckInOutcome), RuntimeError>>,
    },
    Get {
        id: RegistrationId,
        resp: oneshot::Sender<Option<Registration>>,
    },
    List {
        options: ListOptions,
        resp: oneshot::Sender<Vec<Registration>>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Op(StoredOp),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
}

/// Spawns the single-writer loop owning `store`; journals to `sink` when given.
pub fn spawn_registry(
    store: RegistrationStore,
    sink: Option<Box<dyn OpSink>>,
    config: RuntimeConfig,
) -> RegistryHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<RegistrationEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound.max(1));
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut store = store;
        let mut ops_since_snapshot = 0usize;

        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        let done = handle_command(
                            cmd,
                            &mut store,
                            &events_tx_loop,
                            persist_tx_opt.as_ref(),
                            &config,
                            &mut ops_since_snapshot,
                        ).await;

                        if done {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = events_tx_loop.send(RegistrationEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => warn!(error = %err, "journal append failed"),
                            None => {}
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                let done = handle_command(
                    cmd,
                    &mut store,
                    &events_tx_loop,
                    persist_tx_opt.as_ref(),
                    &config,
                    &mut ops_since_snapshot,
                ).await;
                if done {
                    break;
                }
            }
        }
        debug!("registration runtime stopped");
    });

    RegistryHandle { cmd_tx, events_tx }
}

impl RegistryHandle {
    /// New receiver for [`RegistrationEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events_tx.subscribe()
    }

    /// Inserts a new, unscanned registration.
    pub async fn register(&self, draft: RegistrationDraft) -> Result<RegistrationId, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Register { draft, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Atomically finds and checks in the registration matching `identity`.
    pub async fn check_in(
        &self,
        identity: IdentityKey,
        policy: RescanPolicy,
    ) -> Result<(Registration, CheckInOutcome), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::CheckIn {
            identity,
            policy,
            resp: tx,
        })
        .await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Registration by id.
    pub async fn get(&self, id: RegistrationId) -> Result<Option<Registration>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Get { id, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Snapshot of every registration.
    pub async fn list(&self, options: ListOptions) -> Result<Vec<Registration>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::List { options, resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Writes buffered ops and returns the highest durable sequence.
    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Writes a snapshot of the current store.
    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Checkpoint { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    /// Flushes the journal and stops the runtime. Fails if buffered ops could
    /// not be written.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown { resp: tx }).await?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    async fn send(&self, cmd: Command) -> Result<(), RuntimeError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }
}

async fn handle_command(
    cmd: Command,
    store: &mut RegistrationStore,
    events_tx: &broadcast::Sender<RegistrationEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) -> bool {
    match cmd {
        Command::Register { draft, resp } => {
            let res = reserve_journal_slot(persist_tx).and_then(|slot| {
                let (id, stored) = store.insert(draft, Utc::now())?;
                journal(store, stored, slot, events_tx);
                let _ = events_tx.send(RegistrationEvent::Registered { id });
                Ok(id)
            });
            if res.is_ok() {
                *ops_since_snapshot += 1;
                maybe_auto_checkpoint(store, persist_tx, config, ops_since_snapshot).await;
            }
            let _ = resp.send(res);
        }
        Command::CheckIn {
            identity,
            policy,
            resp,
        } => {
            let res = reserve_journal_slot(persist_tx).and_then(|slot| {
                let (rec, outcome, stored) = store.check_in(&identity, policy, Utc::now())?;
                journal(store, stored, slot, events_tx);
                let _ = events_tx.send(RegistrationEvent::CheckedIn {
                    id: rec.id,
                    first: outcome.is_first(),
                });
                Ok((rec, outcome))
            });
            if res.is_ok() {
                *ops_since_snapshot += 1;
                maybe_auto_checkpoint(store, persist_tx, config, ops_since_snapshot).await;
            }
            let _ = resp.send(res);
        }
        Command::Get { id, resp } => {
            let _ = resp.send(store.get_cloned(id));
        }
        Command::List { options, resp } => {
            let _ = resp.send(store.list_cloned(options));
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Flush { resp: flush_tx })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(store.latest_op_seq())
            };
            let _ = resp.send(out);
        }
        Command::Checkpoint { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (cp_tx, cp_rx) = oneshot::channel();
                if tx
                    .send(PersistMsg::Checkpoint {
                        snapshot: store.export_snapshot(),
                        last_seq: store.latest_op_seq(),
                        compact: config.compact_after_snapshot,
                        resp: cp_tx,
                    })
                    .await
                    .is_err()
                {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    cp_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            if out.is_ok() {
                *ops_since_snapshot = 0;
            }
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    done_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

/// Hands `stored` to the persistence worker through a slot reserved before the
/// store was mutated.
fn journal(
    store: &mut RegistrationStore,
    stored: StoredOp,
    slot: Option<mpsc::Permit<'_, PersistMsg>>,
    events_tx: &broadcast::Sender<RegistrationEvent>,
) {
    // The runtime forwards each op itself.
    store.drain_pending_ops();
    match slot {
        Some(permit) => permit.send(PersistMsg::Op(stored)),
        None => {
            let _ = events_tx.send(RegistrationEvent::DurableUpTo { op_seq: stored.seq });
        }
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let latency = Duration::from_millis(config.batch_max_latency_ms);
        let mut deadline = Instant::now() + latency;
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Op(stored) => {
                            let eager = match stored.op {
                                Op::Insert { .. } => config.flush_on_insert,
                                Op::Patch { .. } => config.flush_on_check_in,
                            };
                            buf.push(stored);

                            if buf.len() >= config.batch_max_ops || eager {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Err(err) => Err(err),
                                Ok(()) => {
                                    let sink_ref = Arc::clone(&sink);
                                    match tokio::task::spawn_blocking(move || {
                                        let mut sink = sink_ref.blocking_lock();
                                        sink.write_snapshot(&snapshot, last_seq)?;
                                        if compact {
                                            let removed = sink.compact_through(last_seq)?;
                                            debug!(removed, last_seq, "compacted journal");
                                        }
                                        Result::<(), PersistError>::Ok(())
                                    }).await {
                                        Ok(inner) => inner,
                                        Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                    }
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            if !buf.is_empty() {
                                warn!(unwritten = buf.len(), "stopping with ops the journal never accepted");
                            }
                            let _ = resp.send(result);
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    // `buf` is only cleared once the journal has accepted it; a failed batch is
    // retried ahead of anything queued later.
    let ops = buf.clone();
    let sink_ref = Arc::clone(sink);
    let (appended, flushed) = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let appended = sink.append_ops(&ops);
        let flushed = match appended {
            Ok(_) if call_flush => sink.flush(),
            _ => Ok(()),
        };
        (appended, flushed)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match appended {
        Ok(seq) => {
            buf.clear();
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            flushed
        }
        Err(err) => {
            warn!(error = %err, pending = buf.len(), "journal append failed, keeping batch for retry");
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}

async fn maybe_auto_checkpoint(
    store: &RegistrationStore,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
    config: &RuntimeConfig,
    ops_since_snapshot: &mut usize,
) {
    if config.snapshot_every_ops == 0 || *ops_since_snapshot < config.snapshot_every_ops {
        return;
    }

    let Some(tx) = persist_tx else {
        return;
    };

    let (cp_tx, cp_rx) = oneshot::channel();
    if tx
        .send(PersistMsg::Checkpoint {
            snapshot: store.export_snapshot(),
            last_seq: store.latest_op_seq(),
            compact: config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .is_ok()
    {
        match cp_rx.await {
            Ok(Err(err)) => warn!(error = %err, "automatic snapshot failed"),
            Ok(Ok(())) => debug!(last_seq = store.latest_op_seq(), "automatic snapshot written"),
            Err(_) => {}
        }
        *ops_since_snapshot = 0;
    }
}

/// Claims journal queue capacity, so a full queue fails the command before the
/// store changes.
fn reserve_journal_slot(
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) -> Result<Option<mpsc::Permit<'_, PersistMsg>>, RuntimeError> {
    persist_tx
        .map(|tx| {
            tx.try_reserve().map_err(|err| {
                warn!(error = %err, "journal queue full, rejecting mutation");
                RuntimeError::Persist(PersistError::Message(format!("persist queue error: {err}")))
            })
        })
        .transpose()
}
