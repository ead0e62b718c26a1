//! Mutation events published by the graph store.

use super::entity::{Entity, EntityId};
use super::relation::{Relation, RelationId};
use super::temporal;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Shared event metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Component that emitted the event.
    pub source: &'static str,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    /// Creates new event metadata using the current time.
    #[must_use]
    pub fn new(source: &'static str) -> Self {
        Self::with_timestamp(source, temporal::now())
    }

    /// Creates new event metadata with a specified timestamp.
    #[must_use]
    pub fn with_timestamp(source: &'static str, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            source,
            timestamp,
        }
    }
}

/// Events emitted after a graph mutation commits.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// An entity was created.
    EntityCreated {
        /// Event metadata.
        meta: EventMeta,
        /// The stored record.
        entity: Box<Entity>,
    },
    /// An entity was updated.
    EntityUpdated {
        /// Event metadata.
        meta: EventMeta,
        /// The record after the update.
        entity: Box<Entity>,
    },
    /// An entity and its incident relations were deleted.
    EntityDeleted {
        /// Event metadata.
        meta: EventMeta,
        /// The deleted id.
        entity_id: EntityId,
    },
    /// An entity was soft-deleted.
    EntityInvalidated {
        /// Event metadata.
        meta: EventMeta,
        /// The invalidated id.
        entity_id: EntityId,
    },
    /// A relation was created.
    RelationCreated {
        /// Event metadata.
        meta: EventMeta,
        /// The stored record.
        relation: Box<Relation>,
    },
    /// A relation was updated.
    RelationUpdated {
        /// Event metadata.
        meta: EventMeta,
        /// The record after the update.
        relation: Box<Relation>,
    },
    /// A relation was deleted.
    RelationDeleted {
        /// Event metadata.
        meta: EventMeta,
        /// The deleted id.
        relation_id: RelationId,
    },
    /// Storage was compacted.
    GraphCompacted {
        /// Event metadata.
        meta: EventMeta,
    },
    /// The graph was cleared and rebuilt.
    GraphRebuilt {
        /// Event metadata.
        meta: EventMeta,
    },
}

impl GraphEvent {
    /// Returns the event type string, e.g. `entity:created`.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::EntityCreated { .. } => "entity:created",
            Self::EntityUpdated { .. } => "entity:updated",
            Self::EntityDeleted { .. } => "entity:deleted",
            Self::EntityInvalidated { .. } => "entity:invalidated",
            Self::RelationCreated { .. } => "relation:created",
            Self::RelationUpdated { .. } => "relation:updated",
            Self::RelationDeleted { .. } => "relation:deleted",
            Self::GraphCompacted { .. } => "graph:compacted",
            Self::GraphRebuilt { .. } => "graph:rebuilt",
        }
    }

    /// Returns the event metadata.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::EntityCreated { meta, .. }
            | Self::EntityUpdated { meta, .. }
            | Self::EntityDeleted { meta, .. }
            | Self::EntityInvalidated { meta, .. }
            | Self::RelationCreated { meta, .. }
            | Self::RelationUpdated { meta, .. }
            | Self::RelationDeleted { meta, .. }
            | Self::GraphCompacted { meta }
            | Self::GraphRebuilt { meta } => meta,
        }
    }

    /// Returns the entity id the event concerns, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Self::EntityCreated { entity, .. } | Self::EntityUpdated { entity, .. } => {
                Some(&entity.id)
            },
            Self::EntityDeleted { entity_id, .. } | Self::EntityInvalidated { entity_id, .. } => {
                Some(entity_id)
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let deleted = GraphEvent::EntityDeleted {
            meta: EventMeta::new("test"),
            entity_id: EntityId::new("e1"),
        };
        assert_eq!(deleted.event_type(), "entity:deleted");
        assert_eq!(deleted.entity_id().map(EntityId::as_str), Some("e1"));

        let rebuilt = GraphEvent::GraphRebuilt {
            meta: EventMeta::new("test"),
        };
        assert_eq!(rebuilt.event_type(), "graph:rebuilt");
        assert!(rebuilt.entity_id().is_none());
        assert_eq!(rebuilt.meta().source, "test");
    }

    #[test]
    fn test_event_ids_unique() {
        assert_ne!(EventMeta::new("a").event_id, EventMeta::new("a").event_id);
    }
}
