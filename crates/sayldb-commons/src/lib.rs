//! # sayldb-commons
//!
//! Shared types, constants, and utilities for SaylDB live sync.
//!
//! This crate provides the foundational types used across the sync crates
//! (sayldb-store, sayldb-live): type-safe identifier wrappers, the `Row`
//! model, entity lifecycle events, the outbound client protocol, and the
//! common error type. It has no dependency on the other workspace crates to
//! prevent circular dependencies.
//!
//! ## Type-Safe Wrappers
//!
//! - `EntityTypeId`: named entity type (analogous to a table)
//! - `EntityId`: primary key of one row, as its canonical string form
//! - `SessionId`: one client connection
//! - `CollectionId`: one live collection within a session

pub mod errors;
pub mod events;
pub mod models;
pub mod outbound;

pub use errors::{Result, SaylDbError, StoreError};
pub use events::{EntityEvent, Version};
pub use models::{CollectionId, EntityId, EntityTypeId, Row, SessionId};
pub use outbound::{CapturingSink, ChannelSink, ClientSink, SyncMessage};
