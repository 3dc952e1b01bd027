//! Record identifiers and record values.
//!
//! Records are the unit the storage seam reads and patches. Scalar attributes
//! are opaque JSON; relation fields are typed so that the rewriter never has
//! to guess whether a field holds one link or many.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Primary key of a stored record.
///
/// # Examples
///
/// ```
/// use relink::RecordId;
///
/// let id = RecordId::new(5);
/// assert_eq!(id.get(), 5);
/// assert_eq!(id.to_string(), "5");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Creates a record ID from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<RecordId> for u64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Name of an entity type or a reusable component type
/// (for example `api::article.article` or `shared.author`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeKey(String);

impl TypeKey {
    /// Creates a type key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for TypeKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Identifier shared by every version of the same logical content item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionGroupId(String);

impl VersionGroupId {
    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionGroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Current value of a relation field on a record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum RelationValue {
    /// No related record.
    #[default]
    Empty,
    /// Singular relation.
    One(RecordId),
    /// Collection relation. Order carries no meaning.
    Many(Vec<RecordId>),
}

impl RelationValue {
    /// Returns true if no record is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::One(_) => false,
            Self::Many(ids) => ids.is_empty(),
        }
    }

    /// Returns every linked ID.
    #[must_use]
    pub fn ids(&self) -> Vec<RecordId> {
        match self {
            Self::Empty => Vec::new(),
            Self::One(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }

    /// Returns true if `id` is linked.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        match self {
            Self::Empty => false,
            Self::One(current) => *current == id,
            Self::Many(ids) => ids.contains(&id),
        }
    }

    /// Keeps only the IDs accepted by `keep`.
    ///
    /// A singular value that is rejected becomes `Empty`; a collection stays
    /// a collection even when it ends up empty.
    #[must_use]
    pub fn retain(&self, keep: impl Fn(RecordId) -> bool) -> Self {
        match self {
            Self::One(id) if keep(*id) => Self::One(*id),
            Self::Empty | Self::One(_) => Self::Empty,
            Self::Many(ids) => Self::Many(ids.iter().copied().filter(|id| keep(*id)).collect()),
        }
    }
}

/// A stored record of some entity or component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key.
    pub id: RecordId,

    /// Version group this record belongs to, if its type is versioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_group: Option<VersionGroupId>,

    /// Scalar attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    /// Relation fields.
    #[serde(default)]
    pub relations: BTreeMap<String, RelationValue>,
}

impl Record {
    /// Creates an empty record with the given raw ID.
    #[must_use]
    pub fn new(raw_id: u64) -> Self {
        Self {
            id: RecordId::new(raw_id),
            version_group: None,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Sets the version group.
    #[must_use]
    pub fn with_version_group(mut self, group: impl Into<VersionGroupId>) -> Self {
        self.version_group = Some(group.into());
        self
    }

    /// Sets a scalar attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Sets a relation field.
    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, value: RelationValue) -> Self {
        self.relations.insert(name.into(), value);
        self
    }

    /// Returns the relation value stored under `field`, if any.
    #[must_use]
    pub fn relation(&self, field: &str) -> Option<&RelationValue> {
        self.relations.get(field)
    }
}
