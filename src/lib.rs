//! # relink - version-group relation propagation
//!
//! When a record belongs to a *version group* (draft, published and historical
//! copies sharing one version-group identifier), other records may hold
//! relations pointing at any of those copies. After a write, relink repoints
//! every such relation at the version just written.
//!
//! ## Core Concepts
//!
//! - **Version group**: records of one type sharing a version-group identifier
//! - **Canonical identifier**: the record just written; stale links move here
//! - **Match descriptor**: a type plus the relation fields aimed at the written type
//! - **Link patch**: per-field disconnect/connect instruction, never a full replace
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relink::{InMemoryEntityStore, RelationPropagator, StaticSchemaRegistry, TypeKey, RecordId};
//!
//! let schemas = Arc::new(StaticSchemaRegistry::from_json(SCHEMA_JSON)?);
//! let store = Arc::new(InMemoryEntityStore::new(schemas.clone()));
//! let propagator = RelationPropagator::new(store, schemas);
//!
//! // after persisting record 5 of a versioned type:
//! let report = propagator.on_write(&TypeKey::new("api::article.article"), RecordId::new(5)).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod propagation;
pub mod resolver;
pub mod rewriter;
pub mod scanner;
pub mod schema;
pub mod storage;
pub mod value;

// Re-export primary types at crate root for convenience
pub use config::PropagationConfig;
pub use error::{
    ConfigError, PropagationError, QueryFailure, RelinkError, SchemaError,
    StorageError, UpdateFailure,
};
pub use propagation::{PropagationId, PropagationOutcome, PropagationReport, RelationPropagator};
pub use resolver::{VersionGroup, VersionGroupResolver};
pub use rewriter::{compute_patch, LinkRewriter, RewriteReport, ShapeMismatch};
pub use scanner::{scan, ExclusionFilter, MatchDescriptor, MatchedField, ScanCache};
pub use schema::{
    is_relation_attribute, is_versioned_content_type, targets_type, AttributeDef, AttributeKind,
    RelationMultiplicity, SchemaKind, SchemaOptions, SchemaProvider, StaticSchemaRegistry,
    TypeSchema,
};
pub use storage::{
    EntityStore, Filter, FindQuery, InMemoryEntityStore, LinkPatch, Populate, RecordPatch,
    StoreStats,
};
pub use value::{Record, RecordId, RelationValue, TypeKey, VersionGroupId};
