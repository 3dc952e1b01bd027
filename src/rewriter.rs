//! Link rewriter.
//!
//! For one matched type: find every record whose matched relation fields link
//! to a member of the version group, compute a minimal disconnect/connect
//! patch per field, and apply one partial update per record.
//!
//! Singular vs collection handling is decided by the multiplicity declared in
//! the schema, never by the runtime shape of the fetched value. A value whose
//! shape contradicts its declaration is skipped and reported.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StorageError, UpdateFailure};
use crate::resolver::VersionGroup;
use crate::scanner::{MatchDescriptor, MatchedField};
use crate::schema::SchemaKind;
use crate::storage::{EntityStore, Filter, FindQuery, LinkPatch, Populate, RecordPatch};
use crate::value::{Record, RecordId, RelationValue, TypeKey};

/// A relation value whose shape did not match its declared multiplicity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeMismatch {
    /// Record holding the value.
    pub record_id: RecordId,
    /// Field name.
    pub field: String,
    /// True if the schema declares a collection.
    pub declared_collection: bool,
}

/// Outcome of rewriting one matched type.
#[derive(Debug, Clone, Serialize)]
pub struct RewriteReport {
    /// Type that was rewritten.
    pub type_key: TypeKey,
    /// Entity or component.
    pub schema_kind: SchemaKind,
    /// Records returned by the link query.
    pub matched_records: usize,
    /// Records whose update succeeded.
    pub updated: Vec<RecordId>,
    /// Fields skipped because of a shape mismatch.
    pub mismatches: Vec<ShapeMismatch>,
    /// Updates that failed.
    #[serde(skip)]
    pub failures: Vec<UpdateFailure>,
}

impl RewriteReport {
    fn new(descriptor: &MatchDescriptor) -> Self {
        Self {
            type_key: descriptor.type_key.clone(),
            schema_kind: descriptor.schema_kind,
            matched_records: 0,
            updated: Vec::new(),
            mismatches: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Number of update calls issued.
    #[must_use]
    pub fn attempted_updates(&self) -> usize {
        self.updated.len() + self.failures.len()
    }
}

/// Query returning records of `descriptor`'s type whose matched fields link
/// to any group member, with those fields populated with members only.
#[must_use]
pub fn build_link_query(descriptor: &MatchDescriptor, group: &VersionGroup) -> FindQuery {
    let filters = descriptor
        .fields
        .iter()
        .map(|field| Filter::RelationIn {
            field: field.name.clone(),
            ids: group.members.iter().copied().collect(),
        })
        .collect();

    descriptor.fields.iter().fold(
        FindQuery::new().filter(Filter::Any(filters)),
        |query, field| query.populate(field.name.clone(), Populate::only(group.members.iter().copied())),
    )
}

enum FieldOutcome {
    Patch(LinkPatch),
    Unchanged,
    Mismatch,
}

fn field_patch(field: &MatchedField, value: &RelationValue, group: &VersionGroup) -> FieldOutcome {
    let canonical = group.canonical;
    match (field.multiplicity.is_collection(), value) {
        (_, RelationValue::Empty) => FieldOutcome::Unchanged,
        (false, RelationValue::One(current)) => {
            if *current == canonical || !group.contains(*current) {
                return FieldOutcome::Unchanged;
            }
            FieldOutcome::Patch(LinkPatch {
                disconnect: vec![*current],
                connect: vec![canonical],
            })
        }
        (true, RelationValue::Many(current)) => {
            let disconnect: Vec<RecordId> = current
                .iter()
                .copied()
                .filter(|id| *id != canonical && group.contains(*id))
                .collect();
            if disconnect.is_empty() {
                return FieldOutcome::Unchanged;
            }
            // Disconnect runs before connect, so `canonical` ends up linked once.
            FieldOutcome::Patch(LinkPatch {
                disconnect,
                connect: vec![canonical],
            })
        }
        (false, RelationValue::Many(_)) | (true, RelationValue::One(_)) => FieldOutcome::Mismatch,
    }
}

/// Computes the combined patch for one record.
///
/// Absent and empty fields are skipped; fields already pointing only at the
/// canonical version produce no entry. Links to records outside the group are
/// never disconnected.
#[must_use]
pub fn compute_patch(
    record: &Record,
    descriptor: &MatchDescriptor,
    group: &VersionGroup,
) -> (RecordPatch, Vec<ShapeMismatch>) {
    let mut patch = RecordPatch::new();
    let mut mismatches = Vec::new();

    for field in &descriptor.fields {
        let Some(value) = record.relation(&field.name) else {
            continue;
        };
        match field_patch(field, value, group) {
            FieldOutcome::Patch(link_patch) => {
                patch.insert(field.name.clone(), link_patch);
            }
            FieldOutcome::Unchanged => {}
            FieldOutcome::Mismatch => mismatches.push(ShapeMismatch {
                record_id: record.id,
                field: field.name.clone(),
                declared_collection: field.multiplicity.is_collection(),
            }),
        }
    }
    (patch, mismatches)
}

/// Applies link patches for one matched type.
#[derive(Debug, Clone, Copy)]
pub struct LinkRewriter {
    max_concurrent_updates: usize,
}

impl Default for LinkRewriter {
    fn default() -> Self {
        Self::new(16)
    }
}

impl LinkRewriter {
    /// Creates a rewriter with at most `max_concurrent_updates` updates in flight.
    #[must_use]
    pub fn new(max_concurrent_updates: usize) -> Self {
        Self {
            max_concurrent_updates: max_concurrent_updates.max(1),
        }
    }

    /// Repoints every stale link of `descriptor`'s type at `group.canonical`.
    ///
    /// Per-record updates run concurrently and are all awaited; their failures
    /// are collected in the report rather than aborting the others.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the link query itself fails.
    pub async fn rewrite<S>(
        &self,
        store: &S,
        group: &VersionGroup,
        descriptor: &MatchDescriptor,
    ) -> Result<RewriteReport, StorageError>
    where
        S: EntityStore + ?Sized,
    {
        let mut report = RewriteReport::new(descriptor);
        let query = build_link_query(descriptor, group);
        let records = store.find_many(&descriptor.type_key, &query).await?;
        report.matched_records = records.len();

        let mut pending = Vec::with_capacity(records.len());
        for record in &records {
            let (patch, mismatches) = compute_patch(record, descriptor, group);
            for mismatch in &mismatches {
                warn!(
                    type_key = %descriptor.type_key,
                    record_id = %mismatch.record_id,
                    field = %mismatch.field,
                    declared_collection = mismatch.declared_collection,
                    "relation value shape does not match schema, field skipped"
                );
            }
            report.mismatches.extend(mismatches);
            if !patch.is_empty() {
                pending.push((record.id, patch));
            }
        }

        let type_key = &descriptor.type_key;
        let outcomes: Vec<(RecordId, Result<Record, StorageError>)> = stream::iter(pending)
            .map(|(id, patch)| async move { (id, store.update(type_key, id, &patch).await) })
            .buffer_unordered(self.max_concurrent_updates)
            .collect()
            .await;

        for (record_id, outcome) in outcomes {
            match outcome {
                Ok(_) => report.updated.push(record_id),
                Err(error) => {
                    warn!(%type_key, %record_id, %error, "relation update failed");
                    report.failures.push(UpdateFailure {
                        type_key: type_key.clone(),
                        record_id,
                        error,
                    });
                }
            }
        }
        report.updated.sort_unstable();

        debug!(
            %type_key,
            matched = report.matched_records,
            updated = report.updated.len(),
            failed = report.failures.len(),
            "rewrote relations"
        );
        Ok(report)
    }
}
