//! Type schemas and the schema-provider seam.
//!
//! A schema registry describes every entity type and every reusable
//! component type together with their attribute definitions. The scanner only
//! ever reads it; nothing in this crate mutates a schema at request time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::value::TypeKey;

/// Whether a schema describes a top-level entity type or a reusable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// Ordinary entity (content) type.
    Entity,
    /// Reusable component embedded into other types.
    Component,
}

/// Cardinality of a relation as declared in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationMultiplicity {
    /// `oneToOne`
    OneToOne,
    /// `manyToOne`
    ManyToOne,
    /// `oneToMany`
    OneToMany,
    /// `manyToMany`
    ManyToMany,
}

impl RelationMultiplicity {
    /// Returns true if the owning side stores a collection of links.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// Returns true if the owning side stores at most one link.
    #[must_use]
    pub const fn is_singular(self) -> bool {
        !self.is_collection()
    }
}

/// Kind tag of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeKind {
    /// Link to records of `target`.
    Relation {
        /// Type the relation points at.
        target: TypeKey,
        /// Declared cardinality.
        #[serde(rename = "relation")]
        multiplicity: RelationMultiplicity,
    },
    /// Plain value (string, number, boolean, JSON, ...).
    Scalar,
    /// Embedded component.
    Component {
        /// Component type key.
        component: TypeKey,
    },
    /// Uploaded media.
    Media,
}

/// One attribute of a type schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name.
    pub name: String,
    /// Attribute kind.
    #[serde(flatten)]
    pub kind: AttributeKind,
}

impl AttributeDef {
    /// Creates a relation attribute.
    #[must_use]
    pub fn relation(
        name: impl Into<String>,
        target: impl Into<TypeKey>,
        multiplicity: RelationMultiplicity,
    ) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Relation {
                target: target.into(),
                multiplicity,
            },
        }
    }

    /// Creates a scalar attribute.
    #[must_use]
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Scalar,
        }
    }

    /// Returns the relation target and multiplicity, if this is a relation.
    #[must_use]
    pub fn relation_target(&self) -> Option<(&TypeKey, RelationMultiplicity)> {
        match &self.kind {
            AttributeKind::Relation {
                target,
                multiplicity,
            } => Some((target, *multiplicity)),
            _ => None,
        }
    }
}

/// Returns true if the attribute is a relation.
#[must_use]
pub fn is_relation_attribute(attr: &AttributeDef) -> bool {
    matches!(attr.kind, AttributeKind::Relation { .. })
}

/// Builds a predicate accepting relation attributes whose target is `target`.
pub fn targets_type(target: &TypeKey) -> impl Fn(&AttributeDef) -> bool + '_ {
    move |attr| attr.relation_target().is_some_and(|(t, _)| t == target)
}

/// Per-type capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOptions {
    /// Records of this type carry a version-group identifier.
    pub versioned: bool,
    /// Records of this type are localized.
    pub localized: bool,
}

/// Schema of one entity or component type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Type key.
    pub key: TypeKey,
    /// Entity or component.
    pub kind: SchemaKind,
    /// Attributes in declaration order.
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    /// Capability flags.
    #[serde(default)]
    pub options: SchemaOptions,
}

impl TypeSchema {
    /// Creates an entity type schema with no attributes.
    #[must_use]
    pub fn entity(key: impl Into<TypeKey>) -> Self {
        Self {
            key: key.into(),
            kind: SchemaKind::Entity,
            attributes: Vec::new(),
            options: SchemaOptions::default(),
        }
    }

    /// Creates a component type schema with no attributes.
    #[must_use]
    pub fn component(key: impl Into<TypeKey>) -> Self {
        Self {
            key: key.into(),
            kind: SchemaKind::Component,
            attributes: Vec::new(),
            options: SchemaOptions::default(),
        }
    }

    /// Appends an attribute.
    #[must_use]
    pub fn with_attribute(mut self, attr: AttributeDef) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Marks the type as versioned.
    #[must_use]
    pub fn versioned(mut self) -> Self {
        self.options.versioned = true;
        self
    }

    /// Marks the type as localized.
    #[must_use]
    pub fn localized(mut self) -> Self {
        self.options.localized = true;
        self
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Capability predicate: does this type take part in version groups?
#[must_use]
pub fn is_versioned_content_type(schema: &TypeSchema) -> bool {
    schema.options.versioned
}

/// Read-only access to the registered type schemas.
pub trait SchemaProvider: Send + Sync {
    /// All ordinary entity types.
    fn entity_types(&self) -> Vec<&TypeSchema>;

    /// All reusable component types.
    fn components(&self) -> Vec<&TypeSchema>;

    /// Looks up one schema (entity or component) by key.
    fn schema(&self, key: &TypeKey) -> Option<&TypeSchema>;
}

/// Immutable in-memory schema registry.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaRegistry {
    entities: BTreeMap<TypeKey, TypeSchema>,
    components: BTreeMap<TypeKey, TypeSchema>,
}

impl StaticSchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema. Keys are unique across entities and components.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::DuplicateType` if the key is already registered.
    pub fn register(&mut self, schema: TypeSchema) -> Result<(), SchemaError> {
        if self.entities.contains_key(&schema.key) || self.components.contains_key(&schema.key) {
            return Err(SchemaError::DuplicateType(schema.key));
        }
        let slot = match schema.kind {
            SchemaKind::Entity => &mut self.entities,
            SchemaKind::Component => &mut self.components,
        };
        slot.insert(schema.key.clone(), schema);
        Ok(())
    }

    /// Builder-style `register`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::DuplicateType` if the key is already registered.
    pub fn with(mut self, schema: TypeSchema) -> Result<Self, SchemaError> {
        self.register(schema)?;
        Ok(self)
    }

    /// Builds a registry from a JSON array of schemas.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Parse` for malformed JSON and
    /// `SchemaError::DuplicateType` for repeated keys.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let schemas: Vec<TypeSchema> =
            serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;
        let mut registry = Self::new();
        for schema in schemas {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len() + self.components.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchemaProvider for StaticSchemaRegistry {
    fn entity_types(&self) -> Vec<&TypeSchema> {
        self.entities.values().collect()
    }

    fn components(&self) -> Vec<&TypeSchema> {
        self.components.values().collect()
    }

    fn schema(&self, key: &TypeKey) -> Option<&TypeSchema> {
        self.entities.get(key).or_else(|| self.components.get(key))
    }
}
