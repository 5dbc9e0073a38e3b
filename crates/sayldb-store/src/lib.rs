//! # sayldb-store
//!
//! Storage-facing half of the SaylDB live sync subsystem:
//!
//! - Declarative filter trees with row matching, parameter substitution and
//!   sub-query extraction (`filter`)
//! - Schema metadata with reference properties and on-delete actions
//!   (`schema`)
//! - The entity event bus connecting store mutations to sync sessions (`bus`)
//! - The abstract `QueryStore` facade and the in-memory reference store
//!   (`store`, `memory`)
//! - `VirtualForeignKeyConstraint`: CASCADE / SET NULL / SET DEFAULT side
//!   effects for backends without native foreign keys (`constraint`)
//! - The `Database` facade that wires store, schemas and constraints
//!   (`database`)

pub mod bus;
pub mod constraint;
pub mod database;
pub mod filter;
pub mod memory;
pub mod schema;
pub mod store;

pub use bus::{EntityEventBus, EntityEventHandler, EntitySubscription, FieldSubscription};
pub use constraint::VirtualForeignKeyConstraint;
pub use database::Database;
pub use filter::{Filter, ProviderSpec, SortDirection, SortOrder, SubQuery};
pub use memory::{MemoryStore, PatchedKey};
pub use schema::{EntitySchema, IncomingReference, OnDeleteAction, ReferenceProperty, SchemaRegistry};
pub use store::{ReadOptions, QueryStore, VersionedRow};
