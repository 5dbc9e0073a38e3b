//! # sayldb-live
//!
//! Per-connection live sync on top of `sayldb-store`:
//!
//! - `SyncSession`: usage ledger, entity feed router, outbound sink (`session`,
//!   `usage`)
//! - `ReactiveQuery`: sub-query providers feeding `$in` parameters
//!   (`reactive`)
//! - `LiveCollection` and the `FindOptions` builder: materialized, paginated
//!   result sets with serialized re-queries (`collection`)
//! - `LiveCount`: incrementally maintained result counts (`count`)
//!
//! # Architecture
//!
//! One `SyncSession` exists per client connection. Collections and subjects
//! opened through it register interest in the usage ledger; the session holds
//! one bus subscription per entity type in use and pushes entity channel
//! messages gated to at-most-once per version. Collections additionally hold
//! their own bus subscription to run the membership state machine, funnelling
//! anything page-shaped into one serialized re-query per collection.

pub mod collection;
pub mod config;
pub mod count;
pub mod reactive;
pub mod session;
pub mod usage;

pub use collection::{FindOptions, LiveCollection};
pub use config::LiveSyncConfig;
pub use count::LiveCount;
pub use reactive::{CompiledQuery, ReactiveQuery};
pub use session::{EntitySubject, SyncSession};
pub use usage::{DecreaseOutcome, SentState, UsageLedger};
