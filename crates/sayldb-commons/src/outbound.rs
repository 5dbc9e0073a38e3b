//! Outbound client protocol for live sync sessions.
//!
//! This module defines the messages a session pushes to its client and the
//! sink abstraction they travel through. No concrete transport is mandated:
//! `ChannelSink` feeds a tokio channel a WebSocket task can drain, and
//! `CapturingSink` records messages for tests.
//!
//! # Protocol
//!
//! Entity channel (single-entity tracking, version-gated):
//! ```json
//! {"type": "entity/patch", "entityName": "tasks", "id": "t1", "version": 4, "patch": {"status": "closed"}}
//! {"type": "entity/update", "entityName": "tasks", "id": "t1", "version": 5, "data": {...}}
//! {"type": "entity/remove", "entityName": "tasks", "id": "t1", "version": 6}
//! {"type": "entity/removeMany", "entityName": "tasks", "ids": ["t1", "t2"]}
//! ```
//!
//! Collection channel (live query result sets, addressed by collection id):
//! set, add, remove, removeMany, sort order and pagination total updates.

use crate::events::Version;
use crate::models::{CollectionId, EntityId, EntityTypeId, Row};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One message pushed from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "entity/patch")]
    EntityPatch {
        #[serde(rename = "entityName")]
        entity_name: EntityTypeId,
        id: EntityId,
        version: Version,
        patch: Row,
    },

    #[serde(rename = "entity/update")]
    EntityUpdate {
        #[serde(rename = "entityName")]
        entity_name: EntityTypeId,
        id: EntityId,
        version: Version,
        data: Row,
    },

    #[serde(rename = "entity/remove")]
    EntityRemove {
        #[serde(rename = "entityName")]
        entity_name: EntityTypeId,
        id: EntityId,
        version: Version,
    },

    #[serde(rename = "entity/removeMany")]
    EntityRemoveMany {
        #[serde(rename = "entityName")]
        entity_name: EntityTypeId,
        ids: Vec<EntityId>,
    },

    #[serde(rename = "collection/set")]
    CollectionSet {
        collection: CollectionId,
        items: Vec<Row>,
        total: usize,
    },

    #[serde(rename = "collection/add")]
    CollectionAdd { collection: CollectionId, item: Row },

    #[serde(rename = "collection/remove")]
    CollectionRemove {
        collection: CollectionId,
        id: EntityId,
    },

    #[serde(rename = "collection/removeMany")]
    CollectionRemoveMany {
        collection: CollectionId,
        ids: Vec<EntityId>,
    },

    #[serde(rename = "collection/sort")]
    CollectionSort {
        collection: CollectionId,
        ids: Vec<EntityId>,
    },

    #[serde(rename = "collection/total")]
    CollectionTotal {
        collection: CollectionId,
        total: usize,
    },
}

/// Outbound sink for one session. Implementations must be cheap and
/// non-blocking; sessions push from within event bus callbacks.
pub trait ClientSink: Send + Sync {
    fn send(&self, message: SyncMessage);
}

/// Sink backed by an unbounded tokio channel. The receiving half is drained
/// by whatever transport task owns the connection.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SyncMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ClientSink for ChannelSink {
    fn send(&self, message: SyncMessage) {
        // A closed receiver means the connection is gone; the session is torn
        // down separately, so dropped messages here are expected.
        let _ = self.tx.send(message);
    }
}

/// Sink that records every message, for assertions in tests.
#[derive(Default)]
pub struct CapturingSink {
    messages: Mutex<Vec<SyncMessage>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SyncMessage> {
        self.messages.lock().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl ClientSink for CapturingSink {
    fn send(&self, message: SyncMessage) {
        self.messages.lock().push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_patch_wire_format() {
        let message = SyncMessage::EntityPatch {
            entity_name: EntityTypeId::new("tasks"),
            id: EntityId::new("t1"),
            version: 4,
            patch: Row::from_json(json!({"status": "closed"})),
        };
        let wire = serde_json::to_value(&message).unwrap();
        assert_eq!(wire["type"], "entity/patch");
        assert_eq!(wire["entityName"], "tasks");
        assert_eq!(wire["patch"]["status"], "closed");
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.send(SyncMessage::EntityRemoveMany {
            entity_name: EntityTypeId::new("tasks"),
            ids: vec![EntityId::new("t1")],
        });
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, SyncMessage::EntityRemoveMany { .. }));
    }

    #[test]
    fn test_capturing_sink_records() {
        let sink = CapturingSink::new();
        assert!(sink.is_empty());
        sink.send(SyncMessage::CollectionTotal {
            collection: CollectionId::next(),
            total: 7,
        });
        assert_eq!(sink.len(), 1);
    }
}
