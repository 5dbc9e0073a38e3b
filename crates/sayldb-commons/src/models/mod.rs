//! Model definitions shared across the sync crates.

mod collection_id;
mod entity_id;
mod entity_type_id;
mod row;
mod session_id;

pub use collection_id::CollectionId;
pub use entity_id::EntityId;
pub use entity_type_id::EntityTypeId;
pub use row::Row;
pub use session_id::SessionId;
