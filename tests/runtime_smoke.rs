use std::{sync::{Arc, Mutex}, time::Duration};

use tempfile::TempDir;

use checkin::{
    core::store::{RegistrationStore, StoreError},
    op::StoredOp,
    persist::{OpSink, PersistError, PersistResult, sqlite::SqliteOpSink},
    registration::{IdentityKey, RegistrationDraft},
    runtime::{
        events::RegistrationEvent,
        handle::{RuntimeConfig, RuntimeError, spawn_registry},
    },
    types::{CheckInOutcome, ListOptions, OpSeq, RescanPolicy},
};

fn draft(name: &str) -> RegistrationDraft {
    RegistrationDraft::new(name, format!("{}@event.test", name.to_lowercase()), "Team")
}

struct SlowSink {
    seen: Arc<Mutex<Vec<OpSeq>>>,
    delay: Duration,
}

impl OpSink for SlowSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        std::thread::sleep(self.delay);
        let mut seen = self.seen.lock().expect("lock");
        for op in ops {
            seen.push(op.seq);
        }
        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }
}

/// SQLite journal that stalls on every append and can refuse the first few.
struct StallingSqlite {
    inner: SqliteOpSink,
    delay: Duration,
    refuse_first: usize,
}

impl OpSink for StallingSqlite {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        std::thread::sleep(self.delay);
        if self.refuse_first > 0 {
            self.refuse_first -= 1;
            return Err(PersistError::Message("disk unavailable".to_string()));
        }
        self.inner.append_ops(ops)
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.inner.flush()
    }
}

fn eager_config(persist_queue_bound: usize) -> RuntimeConfig {
    RuntimeConfig {
        flush_on_insert: true,
        flush_on_check_in: true,
        batch_max_ops: 16,
        batch_max_latency_ms: 500,
        persist_queue_bound,
        snapshot_every_ops: 0,
        compact_after_snapshot: false,
    }
}

#[tokio::test]
async fn runtime_register_check_in_and_events_ordered() {
    let handle = spawn_registry(RegistrationStore::new(), None, RuntimeConfig::default());
    let mut sub = handle.subscribe();

    let id = handle.register(draft("Ann")).await.expect("register");
    let (rec, outcome) = handle
        .check_in(IdentityKey::new("ANN", "ann@event.test"), RescanPolicy::Refresh)
        .await
        .expect("check in");
    assert_eq!(rec.id, id);
    assert_eq!(outcome, CheckInOutcome::FirstScan);

    let stored = handle.get(id).await.expect("get").expect("record");
    assert!(stored.is_scanned);

    let mut seen = Vec::new();
    for _ in 0..6 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event")
            .expect("recv");
        if !matches!(evt, RegistrationEvent::DurableUpTo { .. }) {
            seen.push(evt);
        }
        if seen.len() == 2 {
            break;
        }
    }

    assert_eq!(seen[0], RegistrationEvent::Registered { id });
    assert_eq!(seen[1], RegistrationEvent::CheckedIn { id, first: true });

    handle.shutdown().await.expect("shutdown");
    assert!(matches!(handle.get(id).await, Err(RuntimeError::ChannelClosed)));
}

#[tokio::test]
async fn concurrent_scans_of_one_badge_report_a_single_first_check_in() {
    let handle = spawn_registry(RegistrationStore::new(), None, RuntimeConfig::default());
    let id = handle.register(draft("Cho")).await.expect("register");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle
                .check_in(IdentityKey::new("cho", "cho@event.test"), RescanPolicy::Refresh)
                .await
        }));
    }

    let mut firsts = 0;
    let mut stamps = Vec::new();
    for task in tasks {
        let (rec, outcome) = task.await.expect("join").expect("check in");
        assert_eq!(rec.id, id);
        if outcome.is_first() {
            firsts += 1;
        }
        stamps.push(rec.scanned_at.expect("scanned_at"));
    }
    assert_eq!(firsts, 1);

    stamps.sort();
    stamps.dedup();
    assert_eq!(stamps.len(), 16, "every scan got its own timestamp");

    let latest = handle.get(id).await.expect("get").expect("record");
    assert_eq!(latest.scanned_at, stamps.last().copied());

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn concurrent_scans_under_reject_policy_admit_exactly_one() {
    let handle = spawn_registry(RegistrationStore::new(), None, RuntimeConfig::default());
    handle.register(draft("Dee")).await.expect("register");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle
                .check_in(IdentityKey::new("Dee", "dee@event.test"), RescanPolicy::Reject)
                .await
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.expect("join") {
            Ok(_) => admitted += 1,
            Err(RuntimeError::Store(StoreError::AlreadyCheckedIn(_))) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!((admitted, rejected), (1, 7));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn journal_survives_restart() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("runtime.db");

    let sink = SqliteOpSink::open(&db_path).expect("open");
    let handle = spawn_registry(sink.load_store().expect("load"), Some(Box::new(sink)), RuntimeConfig::default());
    let id = handle.register(draft("Eve")).await.expect("register");
    handle
        .check_in(IdentityKey::new("eve", "eve@event.test"), RescanPolicy::Refresh)
        .await
        .expect("check in");
    handle.checkpoint().await.expect("checkpoint");
    handle.shutdown().await.expect("shutdown");

    let sink = SqliteOpSink::open(&db_path).expect("reopen");
    let store = sink.load_store().expect("replay");
    let rec = store.get(id).expect("record");
    assert!(rec.is_scanned);
    assert!(rec.scanned_at.is_some());
}

#[tokio::test]
async fn durable_event_advances_and_slow_sink_surfaces_queue_pressure() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = SlowSink {
        seen: Arc::clone(&seen),
        delay: Duration::from_millis(250),
    };

    let handle = spawn_registry(RegistrationStore::new(), Some(Box::new(sink)), eager_config(1));
    let mut sub = handle.subscribe();

    let id = handle.register(draft("Fay")).await.expect("register");
    assert_eq!(id, 1);

    let mut durable_seen = false;
    for _ in 0..5 {
        let evt = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("recv timeout")
            .expect("recv");
        if matches!(evt, RegistrationEvent::DurableUpTo { .. }) {
            durable_seen = true;
            break;
        }
    }
    assert!(durable_seen, "expected DurableUpTo event");

    let mut queue_error_seen = false;
    for i in 0..12u64 {
        let r = handle.register(draft(&format!("Guest{i}"))).await;
        if let Err(RuntimeError::Persist(_)) = r {
            queue_error_seen = true;
            break;
        }
    }
    assert!(queue_error_seen, "expected persistence queue pressure to surface as error");

    handle.shutdown().await.expect("shutdown");
    assert!(!seen.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn queue_pressure_leaves_no_unjournaled_registrations() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("pressure.db");

    let sink = StallingSqlite {
        inner: SqliteOpSink::open(&db_path).expect("open"),
        delay: Duration::from_millis(200),
        refuse_first: 0,
    };
    let handle = spawn_registry(RegistrationStore::new(), Some(Box::new(sink)), eager_config(1));

    let mut accepted = Vec::new();
    let mut refused = Vec::new();
    for i in 0..12u64 {
        let guest = draft(&format!("Guest{i}"));
        let email = guest.email.clone();
        match handle.register(guest).await {
            Ok(_) => accepted.push(email),
            Err(RuntimeError::Persist(_)) => refused.push((format!("Guest{i}"), email)),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(!refused.is_empty(), "expected the journal queue to fill up");

    let live: Vec<String> = handle
        .list(ListOptions::default())
        .await
        .expect("list")
        .into_iter()
        .map(|r| r.email)
        .collect();
    assert_eq!(live, accepted, "refused registrations must not be live");

    handle.flush().await.expect("flush");
    for (name, email) in &refused {
        let res = handle
            .check_in(IdentityKey::new(name, email), RescanPolicy::Refresh)
            .await;
        assert!(matches!(res, Err(RuntimeError::Store(StoreError::NoMatch))), "{res:?}");
    }
    handle
        .check_in(IdentityKey::new("guest0", &accepted[0]), RescanPolicy::Refresh)
        .await
        .expect("check in");

    let before = handle.list(ListOptions::default()).await.expect("list");
    handle.shutdown().await.expect("shutdown");

    let reopened = SqliteOpSink::open(&db_path).expect("reopen");
    let store = reopened.load_store().expect("journal replays after queue pressure");
    assert_eq!(store.list_cloned(ListOptions::default()), before);
    assert!(store.by_email(&accepted[0]).expect("record").is_scanned);
}

#[tokio::test]
async fn failed_journal_append_is_retried_in_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("retry.db");

    let sink = StallingSqlite {
        inner: SqliteOpSink::open(&db_path).expect("open"),
        delay: Duration::ZERO,
        refuse_first: 1,
    };
    let handle = spawn_registry(RegistrationStore::new(), Some(Box::new(sink)), eager_config(64));

    for name in ["Gil", "Hal", "Ivy"] {
        handle.register(draft(name)).await.expect("register");
    }
    let durable = handle.flush().await.expect("flush retries the refused batch");
    assert_eq!(durable, 3);

    let before = handle.list(ListOptions::default()).await.expect("list");
    handle.shutdown().await.expect("shutdown");

    let store = SqliteOpSink::open(&db_path)
        .expect("reopen")
        .load_store()
        .expect("replay");
    assert_eq!(store.list_cloned(ListOptions::default()), before);
    assert_eq!(store.len(), 3);
}
