//! Relation propagation pipeline.
//!
//! `RelationPropagator::on_write` is meant to run as a request-pipeline step
//! after every write to a versioned type:
//!
//! 1. capability check (`is_versioned_content_type`)
//! 2. version-group resolution
//! 3. relation-schema scan
//! 4. link rewrite per matched type
//!
//! Matched types are rewritten concurrently, and per-record updates within a
//! type are too. The returned future resolves only once every dispatched
//! update has settled, so failures are reported instead of lost.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PropagationConfig;
use crate::error::{PropagationError, QueryFailure, SchemaError, UpdateFailure};
use crate::resolver::{VersionGroup, VersionGroupResolver};
use crate::rewriter::{LinkRewriter, RewriteReport};
use crate::scanner::{scan, ExclusionFilter, MatchDescriptor, ScanCache};
use crate::schema::{is_versioned_content_type, SchemaProvider};
use crate::storage::EntityStore;
use crate::value::{RecordId, TypeKey};

/// Unique identifier of one propagation run (for log correlation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropagationId(Uuid);

impl PropagationId {
    /// Creates a new random ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PropagationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PropagationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a propagation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationOutcome {
    /// The written type does not take part in versioning.
    NotVersioned,
    /// The version group has fewer than two members.
    SingleVersion,
    /// No schema declares a relation to the written type.
    NoMatchingRelations,
    /// Link rewrites were attempted for at least one matched type.
    Rewritten,
}

/// Everything one `on_write` call did.
#[derive(Debug, Clone, Serialize)]
pub struct PropagationReport {
    /// Run identifier.
    pub id: PropagationId,
    /// Type of the written record.
    pub type_key: TypeKey,
    /// The written (canonical) record.
    pub record_id: RecordId,
    /// How the run ended.
    pub outcome: PropagationOutcome,
    /// Resolved version group, if any.
    pub group: Option<VersionGroup>,
    /// One report per matched type whose link query succeeded.
    pub rewrites: Vec<RewriteReport>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl PropagationReport {
    pub(crate) fn begin(type_key: TypeKey, record_id: RecordId) -> Self {
        let now = Utc::now();
        Self {
            id: PropagationId::new(),
            type_key,
            record_id,
            outcome: PropagationOutcome::NotVersioned,
            group: None,
            rewrites: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    fn finish(mut self, outcome: PropagationOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        self
    }

    /// Number of update calls issued across all matched types.
    #[must_use]
    pub fn attempted_updates(&self) -> usize {
        self.rewrites.iter().map(RewriteReport::attempted_updates).sum()
    }

    /// Number of records successfully repointed.
    #[must_use]
    pub fn updated_records(&self) -> usize {
        self.rewrites.iter().map(|r| r.updated.len()).sum()
    }

    /// Records of `type_key` that were repointed.
    #[must_use]
    pub fn updated_in(&self, type_key: &TypeKey) -> Vec<RecordId> {
        self.rewrites
            .iter()
            .filter(|r| &r.type_key == type_key)
            .flat_map(|r| r.updated.iter().copied())
            .collect()
    }
}

/// Keeps relations pointing at the latest written version of a record.
pub struct RelationPropagator {
    store: Arc<dyn EntityStore>,
    schemas: Arc<dyn SchemaProvider>,
    config: PropagationConfig,
    exclusion: ExclusionFilter,
    resolver: VersionGroupResolver,
    rewriter: LinkRewriter,
    scans: ScanCache,
}

impl fmt::Debug for RelationPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationPropagator")
            .field("config", &self.config)
            .field("exclusion", &self.exclusion)
            .field("cached_scans", &self.scans.len())
            .finish_non_exhaustive()
    }
}

impl RelationPropagator {
    /// Creates a propagator with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, schemas: Arc<dyn SchemaProvider>) -> Self {
        Self::with_config(store, schemas, PropagationConfig::default())
    }

    /// Creates a propagator with an explicit configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn EntityStore>,
        schemas: Arc<dyn SchemaProvider>,
        config: PropagationConfig,
    ) -> Self {
        Self {
            store,
            schemas,
            exclusion: config.exclusion(),
            resolver: VersionGroupResolver,
            rewriter: LinkRewriter::new(config.max_concurrent_updates),
            scans: ScanCache::new(),
            config,
        }
    }

    /// Replaces the exclusion filter derived from the configuration.
    #[must_use]
    pub fn with_exclusion(mut self, exclusion: ExclusionFilter) -> Self {
        self.exclusion = exclusion;
        self.scans.clear();
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    /// Types (and fields) that hold relations to `target`.
    #[must_use]
    pub fn matches_for(&self, target: &TypeKey) -> Arc<Vec<MatchDescriptor>> {
        if self.config.cache_scans {
            self.scans.get_or_scan(target, self.schemas.as_ref(), &self.exclusion)
        } else {
            Arc::new(scan(target, self.schemas.as_ref(), &self.exclusion))
        }
    }

    /// Repoints every relation aimed at a sibling version of `id` to `id`.
    ///
    /// # Errors
    ///
    /// - `Schema(UnknownType)` if `type_key` is not registered
    /// - `Storage` if the written record is missing or the group lookup fails
    /// - `Partial` if any link query or record update failed; the boxed report
    ///   lists what did apply
    pub async fn on_write(
        &self,
        type_key: &TypeKey,
        id: RecordId,
    ) -> Result<PropagationReport, PropagationError> {
        let report = PropagationReport::begin(type_key.clone(), id);
        let span = info_span!("propagate", propagation_id = %report.id, %type_key, %id);
        self.run(report).instrument(span).await
    }

    async fn run(&self, mut report: PropagationReport) -> Result<PropagationReport, PropagationError> {
        let type_key = report.type_key.clone();
        let id = report.record_id;

        let schema = self
            .schemas
            .schema(&type_key)
            .ok_or_else(|| SchemaError::UnknownType(type_key.clone()))?;
        if !is_versioned_content_type(schema) {
            debug!("type is not versioned, skipping");
            return Ok(report.finish(PropagationOutcome::NotVersioned));
        }

        let Some(group) = self.resolver.resolve(self.store.as_ref(), &type_key, id).await? else {
            return Ok(report.finish(PropagationOutcome::SingleVersion));
        };

        let descriptors = self.matches_for(&type_key);
        if descriptors.is_empty() {
            debug!(members = group.len(), "no relations target this type");
            report.group = Some(group);
            return Ok(report.finish(PropagationOutcome::NoMatchingRelations));
        }

        let store = self.store.as_ref();
        let results = join_all(
            descriptors
                .iter()
                .map(|descriptor| self.rewriter.rewrite(store, &group, descriptor)),
        )
        .await;

        let mut failures: Vec<UpdateFailure> = Vec::new();
        let mut query_failures: Vec<QueryFailure> = Vec::new();
        for (descriptor, result) in descriptors.iter().zip(results) {
            match result {
                Ok(rewrite) => {
                    failures.extend(rewrite.failures.iter().cloned());
                    report.rewrites.push(rewrite);
                }
                Err(error) => {
                    warn!(type_key = %descriptor.type_key, %error, "link query failed");
                    query_failures.push(QueryFailure {
                        type_key: descriptor.type_key.clone(),
                        error,
                    });
                }
            }
        }

        report.group = Some(group);
        let report = report.finish(PropagationOutcome::Rewritten);
        info!(
            matched_types = descriptors.len(),
            updated = report.updated_records(),
            failed_updates = failures.len(),
            failed_queries = query_failures.len(),
            "relation propagation finished"
        );

        if failures.is_empty() && query_failures.is_empty() {
            Ok(report)
        } else {
            Err(PropagationError::Partial {
                report: Box::new(report),
                failures,
                query_failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counters_sum_rewrites() {
        let mut report = PropagationReport::begin(TypeKey::new("api::article.article"), RecordId::new(5));
        assert_eq!(report.attempted_updates(), 0);
        assert_eq!(report.outcome, PropagationOutcome::NotVersioned);

        report.rewrites.push(RewriteReport {
            type_key: TypeKey::new("shared.author"),
            schema_kind: crate::schema::SchemaKind::Component,
            matched_records: 2,
            updated: vec![RecordId::new(1), RecordId::new(2)],
            mismatches: Vec::new(),
            failures: Vec::new(),
        });
        let report = report.finish(PropagationOutcome::Rewritten);

        assert_eq!(report.updated_records(), 2);
        assert_eq!(report.attempted_updates(), 2);
        assert_eq!(
            report.updated_in(&TypeKey::new("shared.author")),
            vec![RecordId::new(1), RecordId::new(2)]
        );
        assert!(report.updated_in(&TypeKey::new("api::page.page")).is_empty());
        assert!(report.finished_at >= report.started_at);
    }

    #[test]
    fn report_serializes_outcome() {
        let report = PropagationReport::begin(TypeKey::new("api::article.article"), RecordId::new(5))
            .finish(PropagationOutcome::SingleVersion);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "single_version");
        assert_eq!(json["record_id"], 5);
    }
}
