//! Relation-schema scanner.
//!
//! Walks every registered component and entity schema and reports, per type,
//! the relation fields that point at a given target type. Matching is purely
//! structural on static schema metadata, so results are deterministic for a
//! given registry and can be memoised with `ScanCache`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::schema::{
    is_relation_attribute, targets_type, AttributeDef, RelationMultiplicity, SchemaKind,
    SchemaProvider, TypeSchema,
};
use crate::value::TypeKey;

/// One relation field that points at the scanned target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatchedField {
    /// Field name.
    pub name: String,
    /// Declared cardinality.
    pub multiplicity: RelationMultiplicity,
}

/// A type holding at least one relation field aimed at the scanned target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchDescriptor {
    /// Type whose records may need rewriting.
    pub type_key: TypeKey,
    /// Entity or component.
    pub schema_kind: SchemaKind,
    /// Matched fields in declaration order. Never empty.
    pub fields: Vec<MatchedField>,
}

/// Predicate removing entity types (and relation fields) from a scan.
#[derive(Clone, Default)]
pub enum ExclusionFilter {
    /// Nothing is excluded.
    #[default]
    None,
    /// Exclude exactly these names.
    Names(BTreeSet<String>),
    /// Exclude names for which the predicate returns false.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for ExclusionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Names(names) => f.debug_tuple("Names").field(names).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl ExclusionFilter {
    /// Excludes the given names.
    #[must_use]
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }

    /// Excludes the localization and versioning bookkeeping types.
    #[must_use]
    pub fn bookkeeping() -> Self {
        Self::names(crate::config::BOOKKEEPING_TYPE_NAMES)
    }

    /// Keeps names for which `accept` returns true.
    #[must_use]
    pub fn predicate(accept: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(accept))
    }

    /// Returns true if `name` survives the filter.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        match self {
            Self::None => true,
            Self::Names(names) => !names.contains(name),
            Self::Predicate(accept) => accept(name),
        }
    }

    fn cache_key(&self) -> Option<Vec<String>> {
        match self {
            Self::None => Some(Vec::new()),
            Self::Names(names) => Some(names.iter().cloned().collect()),
            Self::Predicate(_) => None,
        }
    }
}

fn matched_fields<'a>(
    schema: &'a TypeSchema,
    target: &'a TypeKey,
) -> impl Iterator<Item = &'a AttributeDef> + 'a {
    let targets_target = targets_type(target);
    schema
        .attributes
        .iter()
        .filter(move |attr| is_relation_attribute(attr) && targets_target(attr))
}

fn describe(
    schema: &TypeSchema,
    target: &TypeKey,
    exclusion: Option<&ExclusionFilter>,
) -> Option<MatchDescriptor> {
    if let Some(filter) = exclusion {
        if !filter.accepts(schema.key.as_str()) {
            return None;
        }
    }

    let fields: Vec<MatchedField> = matched_fields(schema, target)
        .filter(|attr| exclusion.is_none_or(|filter| filter.accepts(&attr.name)))
        .filter_map(|attr| {
            attr.relation_target().map(|(_, multiplicity)| MatchedField {
                name: attr.name.clone(),
                multiplicity,
            })
        })
        .collect();

    if fields.is_empty() {
        return None;
    }
    Some(MatchDescriptor {
        type_key: schema.key.clone(),
        schema_kind: schema.kind,
        fields,
    })
}

/// Lists every type with a relation field targeting `target`.
///
/// Components come first, then entity types, each in provider order. Only
/// entity types are run through `exclusion`; it is applied to the type name
/// and to each matched field name.
#[must_use]
pub fn scan(
    target: &TypeKey,
    provider: &dyn SchemaProvider,
    exclusion: &ExclusionFilter,
) -> Vec<MatchDescriptor> {
    let components = provider
        .components()
        .into_iter()
        .filter_map(|schema| describe(schema, target, None));
    let entities = provider
        .entity_types()
        .into_iter()
        .filter_map(|schema| describe(schema, target, Some(exclusion)));
    components.chain(entities).collect()
}

type ScanEntries = HashMap<(TypeKey, Vec<String>), Arc<Vec<MatchDescriptor>>>;

/// Memoised `scan` keyed by target type and excluded names.
///
/// The registry is assumed immutable for the lifetime of the cache.
/// Predicate exclusions cannot be keyed and always bypass the cache.
#[derive(Debug, Default)]
pub struct ScanCache {
    entries: RwLock<ScanEntries>,
}

impl ScanCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns cached descriptors or scans and caches them.
    pub fn get_or_scan(
        &self,
        target: &TypeKey,
        provider: &dyn SchemaProvider,
        exclusion: &ExclusionFilter,
    ) -> Arc<Vec<MatchDescriptor>> {
        let Some(names) = exclusion.cache_key() else {
            return Arc::new(scan(target, provider, exclusion));
        };
        let key = (target.clone(), names);

        // A poisoned cache only loses memoisation, never correctness.
        if let Ok(entries) = self.entries.read() {
            if let Some(hit) = entries.get(&key) {
                return Arc::clone(hit);
            }
        }

        let fresh = Arc::new(scan(target, provider, exclusion));
        if let Ok(mut entries) = self.entries.write() {
            entries.entry(key).or_insert_with(|| Arc::clone(&fresh));
        }
        fresh
    }

    /// Number of cached scans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached scan (call after the registry changes).
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}
