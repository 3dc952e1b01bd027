//! Version-group resolver.
//!
//! Decides whether a written record shares its version group with at least one
//! other record. Only then is there anything to repoint.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{EntityStore, Filter, FindQuery};
use crate::value::{RecordId, TypeKey, VersionGroupId};

/// Every version of one logical content item, plus the one just written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionGroup {
    /// Version just written; stale links are repointed here.
    pub canonical: RecordId,
    /// Shared version-group identifier.
    pub group_id: VersionGroupId,
    /// All member IDs, canonical included. Sorted, no duplicates.
    pub members: Vec<RecordId>,
}

impl VersionGroup {
    /// Builds a group; the canonical ID is always a member.
    #[must_use]
    pub fn new(
        canonical: RecordId,
        group_id: VersionGroupId,
        members: impl IntoIterator<Item = RecordId>,
    ) -> Self {
        let mut set: BTreeSet<RecordId> = members.into_iter().collect();
        set.insert(canonical);
        Self {
            canonical,
            group_id,
            members: set.into_iter().collect(),
        }
    }

    /// Returns true if `id` is a member.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.members.binary_search(&id).is_ok()
    }

    /// Members other than the canonical one.
    pub fn stale(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.members.iter().copied().filter(move |id| *id != self.canonical)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; a group has at least its canonical member.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Looks up the version group of a written record.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionGroupResolver;

impl VersionGroupResolver {
    /// Returns the record's version group, or `None` when it has fewer than
    /// two members (nothing to repoint).
    ///
    /// # Errors
    ///
    /// A missing record surfaces as `StorageError::RecordNotFound`; any other
    /// storage failure is returned unchanged.
    pub async fn resolve<S>(
        &self,
        store: &S,
        type_key: &TypeKey,
        id: RecordId,
    ) -> Result<Option<VersionGroup>, StorageError>
    where
        S: EntityStore + ?Sized,
    {
        let record = store.find_one(type_key, id).await?;
        let Some(group_id) = record.version_group else {
            debug!(%type_key, %id, "record has no version group");
            return Ok(None);
        };

        let query = FindQuery::ids_only().filter(Filter::VersionGroup(group_id.clone()));
        let siblings = store.find_many(type_key, &query).await?;
        if siblings.len() < 2 {
            debug!(%type_key, %id, %group_id, found = siblings.len(), "single version, nothing to propagate");
            return Ok(None);
        }

        Ok(Some(VersionGroup::new(
            id,
            group_id,
            siblings.into_iter().map(|r| r.id),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::schema::{StaticSchemaRegistry, TypeSchema};
    use crate::storage::InMemoryEntityStore;
    use crate::value::Record;

    const ARTICLE: &str = "api::article.article";

    fn id(raw: u64) -> RecordId {
        RecordId::new(raw)
    }

    fn store() -> InMemoryEntityStore {
        let registry = StaticSchemaRegistry::new()
            .with(TypeSchema::entity(ARTICLE).versioned())
            .unwrap();
        InMemoryEntityStore::new(Arc::new(registry))
    }

    #[test]
    fn group_always_contains_canonical() {
        let group = VersionGroup::new(id(5), "vg".into(), [id(7), id(6), id(7)]);
        assert_eq!(group.members, vec![id(5), id(6), id(7)]);
        assert!(group.contains(id(5)));
        assert_eq!(group.stale().collect::<Vec<_>>(), vec![id(6), id(7)]);
    }

    #[tokio::test]
    async fn resolves_multi_member_group() {
        let store = store();
        let key = TypeKey::new(ARTICLE);
        for raw in [5, 6, 7] {
            store.insert(&key, Record::new(raw).with_version_group("vg-a")).unwrap();
        }
        store.insert(&key, Record::new(8).with_version_group("vg-b")).unwrap();

        let group = VersionGroupResolver.resolve(&store, &key, id(5)).await.unwrap().unwrap();
        assert_eq!(group.canonical, id(5));
        assert_eq!(group.group_id.as_str(), "vg-a");
        assert_eq!(group.members, vec![id(5), id(6), id(7)]);
    }

    #[tokio::test]
    async fn single_member_group_is_skipped() {
        let store = store();
        let key = TypeKey::new(ARTICLE);
        store.insert(&key, Record::new(5).with_version_group("vg-a")).unwrap();

        assert!(VersionGroupResolver.resolve(&store, &key, id(5)).await.unwrap().is_none());
        assert_eq!(store.stats().find_one, 1);
        assert_eq!(store.stats().find_many, 1);
    }

    #[tokio::test]
    async fn record_without_group_is_skipped() {
        let store = store();
        let key = TypeKey::new(ARTICLE);
        store.insert(&key, Record::new(5)).unwrap();

        assert!(VersionGroupResolver.resolve(&store, &key, id(5)).await.unwrap().is_none());
        assert_eq!(store.stats().find_many, 0);
    }

    #[tokio::test]
    async fn missing_record_is_not_swallowed() {
        let store = store();
        let err = VersionGroupResolver
            .resolve(&store, &TypeKey::new(ARTICLE), id(42))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
