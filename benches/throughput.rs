use chrono::Utc;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use checkin::{
    core::store::RegistrationStore,
    registration::{IdentityKey, RegistrationDraft},
    types::{ListOptions, ListOrder, RescanPolicy},
};

fn draft(i: u64) -> RegistrationDraft {
    RegistrationDraft::new(format!("Guest {i}"), format!("guest{i}@event.test"), "Team")
}

fn seeded(n: u64) -> RegistrationStore {
    let mut store = RegistrationStore::new();
    for i in 0..n {
        let _ = store.insert(draft(i), Utc::now()).expect("insert");
    }
    store
}

fn bench_inserts(c: &mut Criterion) {
    c.bench_function("store_insert_50k", |b| {
        b.iter(|| seeded(50_000));
    });
}

fn bench_check_ins(c: &mut Criterion) {
    c.bench_function("store_check_in_10k", |b| {
        b.iter(|| {
            let mut store = seeded(10_000);
            for i in 0..10_000u64 {
                let identity = IdentityKey::new(&format!("GUEST {i}"), &format!("Guest{i}@Event.test"));
                let _ = store
                    .check_in(&identity, RescanPolicy::Refresh, Utc::now())
                    .expect("check in");
            }
        });
    });
}

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list");
    let store = seeded(50_000);

    for order in [ListOrder::Created, ListOrder::Newest] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{order:?}")), &order, |b, &order| {
            b.iter(|| {
                let _ = store.list(ListOptions {
                    order,
                    ..ListOptions::default()
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_inserts, bench_check_ins, bench_list);
criterion_main!(benches);
