//! Propagation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scanner::ExclusionFilter;

/// Type names that belong to the localization/versioning machinery itself.
pub const BOOKKEEPING_TYPE_NAMES: [&str; 2] = ["localizations", "versions"];

/// Knobs for one `RelationPropagator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Entity type (and relation field) names never rewritten.
    pub excluded_type_names: Vec<String>,
    /// Upper bound on per-record updates in flight for one matched type.
    pub max_concurrent_updates: usize,
    /// Memoise scanner results per target type.
    pub cache_scans: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            excluded_type_names: BOOKKEEPING_TYPE_NAMES.iter().map(ToString::to_string).collect(),
            max_concurrent_updates: 16,
            cache_scans: true,
        }
    }
}

impl PropagationConfig {
    /// Parses a JSON document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// `from_json_str`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_updates == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_updates".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.excluded_type_names.iter().any(|n| n.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "excluded_type_names".to_string(),
                reason: "names cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Exclusion filter applied to entity types during scanning.
    #[must_use]
    pub fn exclusion(&self) -> ExclusionFilter {
        if self.excluded_type_names.is_empty() {
            ExclusionFilter::None
        } else {
            ExclusionFilter::names(self.excluded_type_names.iter().cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_exclude_bookkeeping_types() {
        let config = PropagationConfig::default();
        assert_eq!(config.excluded_type_names, vec!["localizations", "versions"]);
        assert!(config.validate().is_ok());

        let filter = config.exclusion();
        assert!(!filter.accepts("localizations"));
        assert!(!filter.accepts("versions"));
        assert!(filter.accepts("api::article.article"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PropagationConfig::from_json_str(r#"{ "max_concurrent_updates": 4 }"#).unwrap();
        assert_eq!(config.max_concurrent_updates, 4);
        assert!(config.cache_scans);
        assert_eq!(config.excluded_type_names.len(), 2);
    }

    #[test]
    fn empty_exclusion_list_disables_filter() {
        let config = PropagationConfig::from_json_str(r#"{ "excluded_type_names": [] }"#).unwrap();
        assert!(matches!(config.exclusion(), ExclusionFilter::None));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = PropagationConfig::from_json_str(r#"{ "max_concurrent_updates": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "max_concurrent_updates"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = PropagationConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
