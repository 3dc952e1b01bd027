//! Storage seam for relink.
//!
//! `EntityStore` is the contract with the external entity service;
//! `InMemoryEntityStore` is the reference backend used for embedding and tests.

mod memory;
mod query;
mod traits;

pub use memory::{InMemoryEntityStore, StoreStats};
pub use query::{Filter, FindQuery, LinkPatch, Populate, RecordPatch};
pub use traits::EntityStore;
