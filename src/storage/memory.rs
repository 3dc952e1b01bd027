//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! `EntityStore`. It is intended for embedded usage, tests, and as a reference
//! for how a backend is expected to interpret queries and relation patches.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{RelationMultiplicity, SchemaProvider};
use crate::storage::query::{FindQuery, LinkPatch, RecordPatch};
use crate::storage::traits::EntityStore;
use crate::value::{Record, RecordId, RelationValue, TypeKey};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Operation counters, for asserting how much work a caller did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// `find_one` calls.
    pub find_one: usize,
    /// `find_many` calls.
    pub find_many: usize,
    /// `update` calls (including failed ones).
    pub update: usize,
}

impl StoreStats {
    /// Total number of calls.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.find_one + self.find_many + self.update
    }
}

#[derive(Debug, Default)]
struct Counters {
    find_one: AtomicUsize,
    find_many: AtomicUsize,
    update: AtomicUsize,
}

/// In-memory `EntityStore`.
///
/// Relation multiplicities come from the schema registry handed to `new`, so
/// patches are applied the same way a schema-aware backend would.
pub struct InMemoryEntityStore {
    schemas: Arc<dyn SchemaProvider>,
    records: RwLock<HashMap<TypeKey, BTreeMap<RecordId, Record>>>,
    failing_updates: RwLock<HashSet<(TypeKey, RecordId)>>,
    counters: Counters,
}

impl std::fmt::Debug for InMemoryEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEntityStore")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl InMemoryEntityStore {
    /// Creates an empty store backed by `schemas`.
    #[must_use]
    pub fn new(schemas: Arc<dyn SchemaProvider>) -> Self {
        Self {
            schemas,
            records: RwLock::new(HashMap::new()),
            failing_updates: RwLock::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    /// Inserts a record. Returns error if the type is unknown or the ID exists.
    ///
    /// # Errors
    ///
    /// `UnknownType`, `DuplicateKey`, or `Backend` on a poisoned lock.
    pub fn insert(&self, type_key: &TypeKey, record: Record) -> Result<(), StorageError> {
        if self.schemas.schema(type_key).is_none() {
            return Err(StorageError::UnknownType(type_key.clone()));
        }
        let mut records = self.records.write().map_err(|_| lock_err("records"))?;
        let table = records.entry(type_key.clone()).or_default();
        if table.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey(format!("{type_key}#{}", record.id)));
        }
        table.insert(record.id, record);
        Ok(())
    }

    /// Returns a stored record as is (no projection, every relation).
    ///
    /// # Errors
    ///
    /// `Backend` on a poisoned lock.
    pub fn get(&self, type_key: &TypeKey, id: RecordId) -> Result<Option<Record>, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("records"))?;
        Ok(records.get(type_key).and_then(|t| t.get(&id)).cloned())
    }

    /// Removes a record, returning it if it existed.
    ///
    /// # Errors
    ///
    /// `Backend` on a poisoned lock.
    pub fn remove(&self, type_key: &TypeKey, id: RecordId) -> Result<Option<Record>, StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("records"))?;
        Ok(records.get_mut(type_key).and_then(|t| t.remove(&id)))
    }

    /// Makes every future `update` of this record fail with a backend error.
    ///
    /// # Errors
    ///
    /// `Backend` on a poisoned lock.
    pub fn fail_updates_for(&self, type_key: &TypeKey, id: RecordId) -> Result<(), StorageError> {
        let mut failing = self.failing_updates.write().map_err(|_| lock_err("failing_updates"))?;
        failing.insert((type_key.clone(), id));
        Ok(())
    }

    /// Current operation counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            find_one: self.counters.find_one.load(Ordering::Relaxed),
            find_many: self.counters.find_many.load(Ordering::Relaxed),
            update: self.counters.update.load(Ordering::Relaxed),
        }
    }

    fn multiplicity(&self, type_key: &TypeKey, field: &str) -> Result<RelationMultiplicity, StorageError> {
        let schema = self
            .schemas
            .schema(type_key)
            .ok_or_else(|| StorageError::UnknownType(type_key.clone()))?;
        schema
            .attribute(field)
            .and_then(|attr| attr.relation_target())
            .map(|(_, multiplicity)| multiplicity)
            .ok_or_else(|| StorageError::UnknownField {
                type_key: type_key.clone(),
                field: field.to_string(),
            })
    }
}

fn apply_link_patch(current: &RelationValue, patch: &LinkPatch, multiplicity: RelationMultiplicity) -> RelationValue {
    if multiplicity.is_collection() {
        let mut ids: Vec<RecordId> = current
            .ids()
            .into_iter()
            .filter(|id| !patch.disconnect.contains(id))
            .collect();
        for id in &patch.connect {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        return RelationValue::Many(ids);
    }

    let remaining = current.retain(|id| !patch.disconnect.contains(&id));
    match patch.connect.last() {
        Some(id) => RelationValue::One(*id),
        None => remaining,
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_one(&self, type_key: &TypeKey, id: RecordId) -> Result<Record, StorageError> {
        self.counters.find_one.fetch_add(1, Ordering::Relaxed);
        self.get(type_key, id)?.ok_or_else(|| StorageError::RecordNotFound {
            type_key: type_key.clone(),
            id,
        })
    }

    async fn find_many(
        &self,
        type_key: &TypeKey,
        query: &FindQuery,
    ) -> Result<Vec<Record>, StorageError> {
        self.counters.find_many.fetch_add(1, Ordering::Relaxed);
        if self.schemas.schema(type_key).is_none() {
            return Err(StorageError::UnknownType(type_key.clone()));
        }
        let records = self.records.read().map_err(|_| lock_err("records"))?;
        let Some(table) = records.get(type_key) else {
            return Ok(Vec::new());
        };
        Ok(table
            .values()
            .filter(|record| query.filter.as_ref().is_none_or(|f| f.matches(record)))
            .map(|record| query.project(record))
            .collect())
    }

    async fn update(
        &self,
        type_key: &TypeKey,
        id: RecordId,
        patch: &RecordPatch,
    ) -> Result<Record, StorageError> {
        self.counters.update.fetch_add(1, Ordering::Relaxed);
        {
            let failing = self.failing_updates.read().map_err(|_| lock_err("failing_updates"))?;
            if failing.contains(&(type_key.clone(), id)) {
                return Err(StorageError::Backend(format!("injected update failure for {type_key}#{id}")));
            }
        }

        let mut multiplicities = Vec::with_capacity(patch.len());
        for field in patch.keys() {
            multiplicities.push(self.multiplicity(type_key, field)?);
        }

        let mut records = self.records.write().map_err(|_| lock_err("records"))?;
        let record = records
            .get_mut(type_key)
            .and_then(|t| t.get_mut(&id))
            .ok_or_else(|| StorageError::RecordNotFound {
                type_key: type_key.clone(),
                id,
            })?;

        for ((field, link_patch), multiplicity) in patch.iter().zip(multiplicities) {
            let current = record.relations.get(field).cloned().unwrap_or_default();
            let next = apply_link_patch(&current, link_patch, multiplicity);
            record.relations.insert(field.clone(), next);
        }
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::schema::{AttributeDef, StaticSchemaRegistry, TypeSchema};
    use crate::storage::query::{Filter, Populate};

    fn id(raw: u64) -> RecordId {
        RecordId::new(raw)
    }

    fn author_key() -> TypeKey {
        TypeKey::new("shared.author")
    }

    fn store() -> InMemoryEntityStore {
        let registry = StaticSchemaRegistry::new()
            .with(TypeSchema::entity("api::article.article").versioned())
            .unwrap()
            .with(
                TypeSchema::component("shared.author")
                    .with_attribute(AttributeDef::scalar("name"))
                    .with_attribute(AttributeDef::relation(
                        "articles",
                        "api::article.article",
                        RelationMultiplicity::ManyToMany,
                    ))
                    .with_attribute(AttributeDef::relation(
                        "featured",
                        "api::article.article",
                        RelationMultiplicity::ManyToOne,
                    )),
            )
            .unwrap();
        InMemoryEntityStore::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn insert_find_and_not_found() {
        let store = store();
        let key = author_key();
        store.insert(&key, Record::new(1)).unwrap();
        assert!(matches!(store.insert(&key, Record::new(1)), Err(StorageError::DuplicateKey(_))));
        assert!(matches!(
            store.insert(&TypeKey::new("nope"), Record::new(1)),
            Err(StorageError::UnknownType(_))
        ));

        assert_eq!(store.find_one(&key, id(1)).await.unwrap().id, id(1));
        let err = store.find_one(&key, id(2)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.stats().find_one, 2);
    }

    #[tokio::test]
    async fn find_many_filters_and_populates() {
        let store = store();
        let key = author_key();
        store
            .insert(&key, Record::new(1).with_relation("articles", RelationValue::Many(vec![id(6), id(9)])))
            .unwrap();
        store
            .insert(&key, Record::new(2).with_relation("articles", RelationValue::Many(vec![id(9)])))
            .unwrap();

        let members = [id(5), id(6), id(7)];
        let query = FindQuery::new()
            .filter(Filter::RelationIn {
                field: "articles".into(),
                ids: members.into_iter().collect(),
            })
            .populate("articles", Populate::only(members));
        let found = store.find_many(&key, &query).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relation("articles"), Some(&RelationValue::Many(vec![id(6)])));
    }

    #[tokio::test]
    async fn collection_update_is_idempotent() {
        let store = store();
        let key = author_key();
        store
            .insert(&key, Record::new(1).with_relation("articles", RelationValue::Many(vec![id(6), id(5)])))
            .unwrap();

        let mut patch = RecordPatch::new();
        patch.insert(
            "articles".to_string(),
            LinkPatch { disconnect: vec![id(6)], connect: vec![id(5)] },
        );
        let first = store.update(&key, id(1), &patch).await.unwrap();
        let second = store.update(&key, id(1), &patch).await.unwrap();
        assert_eq!(first.relation("articles"), Some(&RelationValue::Many(vec![id(5)])));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn singular_update_replaces_link() {
        let store = store();
        let key = author_key();
        store
            .insert(&key, Record::new(1).with_relation("featured", RelationValue::One(id(7))))
            .unwrap();

        let mut patch = RecordPatch::new();
        patch.insert(
            "featured".to_string(),
            LinkPatch { disconnect: vec![id(7)], connect: vec![id(5)] },
        );
        let updated = store.update(&key, id(1), &patch).await.unwrap();
        assert_eq!(updated.relation("featured"), Some(&RelationValue::One(id(5))));
    }

    #[tokio::test]
    async fn update_rejects_unknown_fields_and_injected_failures() {
        let store = store();
        let key = author_key();
        store.insert(&key, Record::new(1)).unwrap();

        let mut patch = RecordPatch::new();
        patch.insert("name".to_string(), LinkPatch { disconnect: vec![], connect: vec![id(5)] });
        assert!(matches!(
            store.update(&key, id(1), &patch).await,
            Err(StorageError::UnknownField { .. })
        ));

        store.fail_updates_for(&key, id(1)).unwrap();
        let patch = RecordPatch::new();
        assert!(matches!(store.update(&key, id(1), &patch).await, Err(StorageError::Backend(_))));
        assert_eq!(store.stats().update, 2);
    }
}
