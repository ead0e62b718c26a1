//! Data models for the memory graph.
//!
//! Entities and relations are plain records keyed by id. Relations refer to
//! their endpoints by [`EntityId`] only.

mod entity;
mod events;
mod query;
mod relation;
pub mod temporal;

pub use entity::{
    ClassInfo, Entity, EntityCategory, EntityId, EntityType, EntityUpdate, FunctionSignature,
    Location, Metadata, NewEntity, PREVIEW_MAX_CHARS, Parameter, Source, clamp_unit,
    content_preview,
};
pub use events::{EventMeta, GraphEvent};
pub use query::{
    DEFAULT_MAX_NODES, Direction, EntityFilter, EntitySort, GraphPath, MAX_PATHS, Neighborhood,
    NeighborhoodQuery, Page, PathQuery, RelationFilter, SortField,
};
pub use relation::{
    NewRelation, Relation, RelationCategory, RelationId, RelationType, RelationUpdate,
};
