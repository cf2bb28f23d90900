//! Event check-in: attendee registrations, QR badge scanning, and an atomic
//! unscanned → scanned transition journaled to SQLite.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::RegistrationStore`]:
//! ```
//! use checkin::{
//!     core::store::RegistrationStore,
//!     registration::{IdentityKey, RegistrationDraft},
//!     types::{CheckInOutcome, RescanPolicy},
//! };
//!
//! let mut store = RegistrationStore::new();
//! let now = chrono::Utc::now();
//! let (id, _op) = store
//!     .insert(RegistrationDraft::new("Bob", "bob@x.com", "Team 7"), now)
//!     .expect("insert");
//!
//! let identity = IdentityKey::new("bob", " BOB@X.COM ");
//! let (rec, outcome, _op) = store
//!     .check_in(&identity, RescanPolicy::Refresh, chrono::Utc::now())
//!     .expect("check in");
//! assert_eq!(rec.id, id);
//! assert!(rec.is_scanned);
//! assert_eq!(outcome, CheckInOutcome::FirstScan);
//! ```
//!
//! Runtime usage with SQLite journal:
//! ```no_run
//! use checkin::{
//!     core::store::RegistrationStore,
//!     persist::sqlite::SqliteOpSink,
//!     registration::{IdentityKey, RegistrationDraft},
//!     runtime::handle::{spawn_registry, RuntimeConfig},
//!     types::RescanPolicy,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteOpSink::open("checkin.db").expect("open sqlite");
//! let store = sink.load_store().expect("replay");
//! let handle = spawn_registry(store, Some(Box::new(sink)), RuntimeConfig::default());
//! handle
//!     .register(RegistrationDraft::new("Bob", "bob@x.com", "Team 7"))
//!     .await
//!     .expect("register");
//! let (rec, _) = handle
//!     .check_in(IdentityKey::new("Bob", "bob@x.com"), RescanPolicy::Refresh)
//!     .await
//!     .expect("check in");
//! assert!(rec.is_scanned);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Check-in and listing operations.
pub mod checkin;
/// Scanner-side submit client.
pub mod client;
/// Layered configuration.
pub mod config;
/// Core in-memory store and index helpers.
pub mod core;
/// Bulk registration import.
pub mod import;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// QR badge payload parsing.
pub mod qr;
/// Registration domain records and patches.
pub mod registration;
/// Single-writer runtime handle and events.
pub mod runtime;
/// HTTP routes and server bootstrap.
pub mod server;
/// Shared primitive types and enums.
pub mod types;
