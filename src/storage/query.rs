//! Query and patch shapes understood by every `EntityStore`.
//!
//! A `FindQuery` carries three independent parts: a projection of scalar
//! attributes, a filter tree over the record, and a populate map naming the
//! relation fields to return (optionally trimmed to a set of related IDs).
//! Relations that are not populated are not returned.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::{Record, RecordId, VersionGroupId};

/// Record filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Primary key is one of `ids`.
    IdIn(BTreeSet<RecordId>),
    /// Record belongs to the version group.
    VersionGroup(VersionGroupId),
    /// Relation `field` links to at least one of `ids`.
    RelationIn {
        /// Relation field name.
        field: String,
        /// Accepted related IDs.
        ids: BTreeSet<RecordId>,
    },
    /// Every sub-filter matches.
    All(Vec<Filter>),
    /// At least one sub-filter matches.
    Any(Vec<Filter>),
}

impl Filter {
    /// Evaluates the filter against a stored record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::IdIn(ids) => ids.contains(&record.id),
            Self::VersionGroup(group) => record.version_group.as_ref() == Some(group),
            Self::RelationIn { field, ids } => record
                .relation(field)
                .is_some_and(|value| value.ids().iter().any(|id| ids.contains(id))),
            Self::All(filters) => filters.iter().all(|f| f.matches(record)),
            Self::Any(filters) => filters.iter().any(|f| f.matches(record)),
        }
    }
}

/// Populate directive for one relation field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Populate {
    /// Only return related records whose ID is in this set.
    pub ids: Option<BTreeSet<RecordId>>,
}

impl Populate {
    /// Populate only related records whose ID is in `ids`.
    #[must_use]
    pub fn only(ids: impl IntoIterator<Item = RecordId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
        }
    }

    fn keeps(&self, id: RecordId) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&id))
    }
}

/// Arguments of `EntityStore::find_many`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindQuery {
    /// Scalar attributes to return; `None` returns all of them.
    pub fields: Option<Vec<String>>,
    /// Record filter; `None` matches every record.
    pub filter: Option<Filter>,
    /// Relation fields to return.
    pub populate: BTreeMap<String, Populate>,
}

impl FindQuery {
    /// Matches every record, returns attributes only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns only primary keys (and version-group membership).
    #[must_use]
    pub fn ids_only() -> Self {
        Self {
            fields: Some(vec!["id".to_string()]),
            ..Self::default()
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Adds a populate directive.
    #[must_use]
    pub fn populate(mut self, field: impl Into<String>, populate: Populate) -> Self {
        self.populate.insert(field.into(), populate);
        self
    }

    /// Shapes a stored record into what this query returns.
    ///
    /// Backends that cannot push projection down can call this after
    /// filtering.
    #[must_use]
    pub fn project(&self, record: &Record) -> Record {
        let attributes = match &self.fields {
            None => record.attributes.clone(),
            Some(fields) => record
                .attributes
                .iter()
                .filter(|(name, _)| fields.iter().any(|f| f == *name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        };
        let relations = self
            .populate
            .iter()
            .filter_map(|(field, populate)| {
                record
                    .relation(field)
                    .map(|value| (field.clone(), value.retain(|id| populate.keeps(id))))
            })
            .collect();

        Record {
            id: record.id,
            version_group: record.version_group.clone(),
            attributes,
            relations,
        }
    }
}

/// Disconnect/connect instruction for one relation field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPatch {
    /// Links to remove.
    pub disconnect: Vec<RecordId>,
    /// Links to add. Connecting an already linked ID is a no-op.
    pub connect: Vec<RecordId>,
}

impl LinkPatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.disconnect.is_empty() && self.connect.is_empty()
    }
}

/// Partial update of a record's relation fields, keyed by field name.
pub type RecordPatch = BTreeMap<String, LinkPatch>;
