use chrono::{TimeDelta, Utc};
use hashbrown::HashMap;
use proptest::prelude::*;

use checkin::{
    core::store::{RegistrationStore, StoreError},
    registration::{IdentityKey, Registration, RegistrationDraft},
    types::{CheckInOutcome, RegistrationId, RescanPolicy},
};

#[derive(Debug, Clone)]
enum Action {
    Insert { who: u8 },
    CheckIn { who: u8, shout: bool, pad: bool, clock: i8 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..16).prop_map(|who| Action::Insert { who }),
        (0u8..20, any::<bool>(), any::<bool>(), -3i8..3)
            .prop_map(|(who, shout, pad, clock)| Action::CheckIn { who, shout, pad, clock }),
    ]
}

fn name_of(who: u8) -> String {
    format!("Guest{who}")
}

fn email_of(who: u8) -> String {
    format!("guest{who}@event.test")
}

fn claimed(who: u8, shout: bool, pad: bool) -> IdentityKey {
    let (mut name, mut email) = (name_of(who), email_of(who));
    if shout {
        name = name.to_uppercase();
        email = email.to_uppercase();
    }
    if pad {
        name = format!("  {name}\t");
        email = format!(" {email} ");
    }
    IdentityKey::new(&name, &email)
}

fn records(store: &RegistrationStore) -> Vec<Registration> {
    store
        .ordered_ids()
        .iter()
        .filter_map(|id| store.get(*id).cloned())
        .collect()
}

proptest! {
    #[test]
    fn random_sequences_keep_scan_state_monotonic_and_replayable(
        actions in prop::collection::vec(action_strategy(), 1..150),
        reject in any::<bool>(),
    ) {
        let policy = if reject { RescanPolicy::Reject } else { RescanPolicy::Refresh };
        let mut store = RegistrationStore::new();
        let mut registered = HashMap::<u8, RegistrationId>::new();
        let base = Utc::now();
        let mut tick = 0i64;

        for action in actions {
            tick += 1;
            match action {
                Action::Insert { who } => {
                    let res = store.insert(
                        RegistrationDraft::new(name_of(who), email_of(who), "Team"),
                        base + TimeDelta::milliseconds(tick),
                    );
                    match res {
                        Ok((id, _)) => {
                            prop_assert!(registered.insert(who, id).is_none());
                        }
                        Err(StoreError::DuplicateEmail(_)) => {
                            prop_assert!(registered.contains_key(&who));
                        }
                        Err(other) => prop_assert!(false, "unexpected insert error: {other:?}"),
                    }
                }
                Action::CheckIn { who, shout, pad, clock } => {
                    let before = registered.get(&who).and_then(|id| store.get_cloned(*id));
                    let now = base + TimeDelta::milliseconds(tick + i64::from(clock));
                    let res = store.check_in(&claimed(who, shout, pad), policy, now);

                    match (before, res) {
                        (None, Err(StoreError::NoMatch)) => {}
                        (Some(prev), Ok((rec, outcome, _))) => {
                            prop_assert_eq!(rec.id, prev.id);
                            prop_assert!(rec.is_scanned);
                            prop_assert!(rec.scanned_at.unwrap() >= now);
                            prop_assert_eq!(outcome == CheckInOutcome::FirstScan, !prev.is_scanned);
                            if let Some(prev_at) = prev.scanned_at {
                                prop_assert!(rec.scanned_at.unwrap() > prev_at);
                            }
                        }
                        (Some(prev), Err(StoreError::AlreadyCheckedIn(rec))) => {
                            prop_assert_eq!(policy, RescanPolicy::Reject);
                            prop_assert!(prev.is_scanned);
                            prop_assert_eq!(*rec, prev.clone());
                            prop_assert_eq!(store.get_cloned(prev.id), Some(prev));
                        }
                        (before, res) => prop_assert!(false, "unexpected: {before:?} -> {res:?}"),
                    }
                }
            }

            for (who, id) in &registered {
                prop_assert_eq!(store.by_email(&email_of(*who)).map(|r| r.id), Some(*id));
            }
        }

        let mut replayed = RegistrationStore::new();
        for op in store.drain_pending_ops() {
            replayed.apply_replayed_op(op).expect("replay");
        }
        prop_assert_eq!(records(&replayed), records(&store));
        prop_assert_eq!(replayed.latest_op_seq(), store.latest_op_seq());
    }
}
