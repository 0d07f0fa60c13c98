//! Serializable configuration of an experimental dataset definition

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::exds::RowSelection;
use crate::lock::LockMode;

/// Default lock name, giving the marker `locked_exds`.
pub const DEFAULT_LOCK_NAME: &str = "exds";

/// Size of the training partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingSubsetSize {
    /// Exact number of training rows.
    Count(usize),
    /// Fraction of all rows, rounded down.
    Proportion(f64),
}

impl Default for TrainingSubsetSize {
    fn default() -> Self {
        Self::Proportion(1.0)
    }
}

impl TrainingSubsetSize {
    /// Number of training rows out of `total`.
    ///
    /// `None` if a count exceeds `total`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn training_count(self, total: usize) -> Option<usize> {
        match self {
            Self::Count(c) => (c <= total).then_some(c),
            Self::Proportion(p) => Some(((total as f64 * p).floor() as usize).min(total)),
        }
    }
}

/// Inclusive band `[min, max]` for the fraction `sum(column) / rows`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityThresholds {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl Default for ProbabilityThresholds {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl ProbabilityThresholds {
    /// Band `[min, max]`.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True if `probability` lies in the band.
    #[must_use]
    pub fn contains(&self, probability: f64) -> bool {
        probability >= self.min && probability <= self.max
    }

    /// True if the band cannot exclude any column of non-negative 0/1 data.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.min <= 0.0 && self.max >= 1.0
    }
}

/// On-disk form of an [`ExperimentalDatasetDefinition`](super::ExperimentalDatasetDefinition).
///
/// ```json
/// {
///   "name": "synthetic_small",
///   "exds_folder": "/data/exds",
///   "source_configuration": { "corpus": "rcv1v2", "topics": ["C11"] },
///   "random_seed": 42,
///   "training_subset_size": { "proportion": 0.8 },
///   "lock_type": { "mode": "blocking", "timeout": 30 },
///   "trim_prob_features": { "min": 0.01, "max": 0.99 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionConfig {
    /// Machine name; also the folder name under `exds_folder`.
    pub name: String,
    /// Repository folder holding one subfolder per dataset.
    pub exds_folder: PathBuf,
    /// Passed verbatim to the dataset source.
    #[serde(default)]
    pub source_configuration: serde_json::Value,
    /// Seed of the train/test split. Required.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Size of the training partition.
    #[serde(default)]
    pub training_subset_size: TrainingSubsetSize,
    /// Keep the folder locked (sealed) after a successful build.
    #[serde(default = "enabled")]
    pub auto_lock_after_build: bool,
    /// Finalize and save as the last step of a build.
    #[serde(default = "enabled")]
    pub after_build_finalize_and_save: bool,
    /// Contention handling.
    #[serde(default)]
    pub lock_type: LockMode,
    /// Marker name suffix (`locked_<lock_name>`).
    #[serde(default = "default_lock_name")]
    pub lock_name: String,
    /// Age after which a building lock counts as abandoned.
    #[serde(default)]
    pub stale_lock_after_secs: Option<u64>,
    /// Band for feature (`X`) columns.
    #[serde(default)]
    pub trim_prob_features: ProbabilityThresholds,
    /// Band for objective (`Y`) columns.
    #[serde(default)]
    pub trim_prob_objectives: ProbabilityThresholds,
    /// Rows requested from the source.
    #[serde(default)]
    pub row_selection: RowSelection,
    /// Free-form categories.
    #[serde(default)]
    pub tags: Vec<String>,
}

const fn enabled() -> bool {
    true
}

fn default_lock_name() -> String {
    DEFAULT_LOCK_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: DefinitionConfig =
            serde_json::from_str(r#"{"name": "ds", "exds_folder": "/tmp/exds"}"#).unwrap();
        assert_eq!(config.training_subset_size, TrainingSubsetSize::Proportion(1.0));
        assert!(config.auto_lock_after_build);
        assert!(config.after_build_finalize_and_save);
        assert_eq!(config.lock_type, LockMode::FailFast);
        assert_eq!(config.lock_name, "exds");
        assert_eq!(config.random_seed, None);
        assert_eq!(config.row_selection, RowSelection::All);
        assert!(config.source_configuration.is_null());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_json::from_str::<DefinitionConfig>(
            r#"{"name": "ds", "exds_folder": "/tmp", "seed": 3}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_training_count() {
        assert_eq!(TrainingSubsetSize::Count(4).training_count(6), Some(4));
        assert_eq!(TrainingSubsetSize::Count(7).training_count(6), None);
        assert_eq!(TrainingSubsetSize::Proportion(0.5).training_count(7), Some(3));
        assert_eq!(TrainingSubsetSize::Proportion(1.0).training_count(7), Some(7));
    }

    #[test]
    fn test_threshold_band_is_inclusive() {
        let band = ProbabilityThresholds::new(0.1, 0.9);
        assert!(band.contains(0.1));
        assert!(band.contains(0.9));
        assert!(!band.contains(0.95));
        assert!(!band.is_unbounded());
        assert!(ProbabilityThresholds::default().is_unbounded());
    }
}
