//! Experimental dataset definitions
//!
//! An [`ExperimentalDatasetDefinition`] says how to build one experimental
//! dataset (source configuration, split parameters, trimming bands) and owns
//! the folder it lives in:
//!
//! ```text
//! <exds_folder>/<name>/
//!     locked_exds        lock marker (see `crate::lock`)
//!     split.json         train/test row labels of the last build
//!     dataset/           full matrix
//!     dataset_train/     training matrix
//!     dataset_test/      test matrix
//! ```

mod config;

pub use config::{DefinitionConfig, ProbabilityThresholds, TrainingSubsetSize, DEFAULT_LOCK_NAME};

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::exds::{ExperimentalDataset, RowSelection};
use crate::lock::{FileLockProvider, LockMode, LockProvider, LockSentinel, LockStatus};
use crate::{Error, Result};

/// Parameters of one experimental dataset plus exclusive access to its
/// folder.
#[derive(Debug)]
pub struct ExperimentalDatasetDefinition {
    name: String,
    exds_folder: PathBuf,
    source_configuration: Value,
    random_seed: Option<u64>,
    training_subset_size: TrainingSubsetSize,
    auto_lock_after_build: bool,
    after_build_finalize_and_save: bool,
    lock_mode: LockMode,
    lock_name: String,
    stale_lock_after: Option<Duration>,
    trim_prob_features: ProbabilityThresholds,
    trim_prob_objectives: ProbabilityThresholds,
    row_selection: RowSelection,
    tags: Vec<String>,
    lock_provider: Box<dyn LockProvider>,
}

impl ExperimentalDatasetDefinition {
    /// Start a definition for `<exds_folder>/<name>`.
    #[must_use]
    pub fn builder(
        exds_folder: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> ExperimentalDatasetDefinitionBuilder {
        ExperimentalDatasetDefinitionBuilder::new(exds_folder, name)
    }

    /// Create a definition from its configuration and validate it.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] listing every violated constraint.
    pub fn from_config(config: DefinitionConfig) -> Result<Self> {
        let mut builder = Self::builder(config.exds_folder, config.name)
            .source_configuration(config.source_configuration)
            .training_subset_size(config.training_subset_size)
            .auto_lock_after_build(config.auto_lock_after_build)
            .after_build_finalize_and_save(config.after_build_finalize_and_save)
            .lock_mode(config.lock_type)
            .lock_name(config.lock_name)
            .trim_prob_features(config.trim_prob_features)
            .trim_prob_objectives(config.trim_prob_objectives)
            .row_selection(config.row_selection)
            .tags(config.tags);
        if let Some(seed) = config.random_seed {
            builder = builder.random_seed(seed);
        }
        if let Some(secs) = config.stale_lock_after_secs {
            builder = builder.stale_lock_after(Duration::from_secs(secs));
        }
        let definition = builder.build();
        definition.validate()?;
        Ok(definition)
    }

    /// Read a JSON [`DefinitionConfig`] and validate it.
    ///
    /// # Errors
    ///
    /// I/O or JSON errors, then [`Error::Configuration`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: DefinitionConfig = serde_json::from_str(&contents)?;
        Self::from_config(config)
    }

    /// Configuration equivalent to this definition.
    #[must_use]
    pub fn to_config(&self) -> DefinitionConfig {
        DefinitionConfig {
            name: self.name.clone(),
            exds_folder: self.exds_folder.clone(),
            source_configuration: self.source_configuration.clone(),
            random_seed: self.random_seed,
            training_subset_size: self.training_subset_size,
            auto_lock_after_build: self.auto_lock_after_build,
            after_build_finalize_and_save: self.after_build_finalize_and_save,
            lock_type: self.lock_mode,
            lock_name: self.lock_name.clone(),
            stale_lock_after_secs: self.stale_lock_after.map(|d| d.as_secs()),
            trim_prob_features: self.trim_prob_features,
            trim_prob_objectives: self.trim_prob_objectives,
            row_selection: self.row_selection.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Replace the lock provider (the default is a [`FileLockProvider`]).
    #[must_use]
    pub fn with_lock_provider(mut self, provider: Box<dyn LockProvider>) -> Self {
        self.lock_provider = provider;
        self
    }

    /// Check that the parameters are coherent.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] with one entry per violated constraint.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if self.name.is_empty() {
            violations.push("name must not be empty".to_string());
        } else if !is_plain_name(&self.name) {
            violations.push(format!("name '{}' must be a single path component", self.name));
        }
        if self.exds_folder.as_os_str().is_empty() {
            violations.push("exds_folder must be set".to_string());
        }
        if self.random_seed.is_none() {
            violations.push("random_seed must be set".to_string());
        }
        match self.training_subset_size {
            TrainingSubsetSize::Count(0) => {
                violations.push("training_subset_size count must be at least 1".to_string());
            }
            TrainingSubsetSize::Proportion(p) if !(p > 0.0 && p <= 1.0) => {
                violations.push(format!(
                    "training_subset_size proportion {p} must be in (0, 1]"
                ));
            }
            _ => {}
        }
        for (field, band) in [
            ("trim_prob_features", self.trim_prob_features),
            ("trim_prob_objectives", self.trim_prob_objectives),
        ] {
            check_band(field, band, &mut violations);
        }
        if self.lock_name.is_empty() || !is_plain_name(&self.lock_name) {
            violations.push(format!(
                "lock_name '{}' must be a non-empty single path component",
                self.lock_name
            ));
        }
        if let LockMode::Blocking { timeout, .. } = self.lock_mode {
            if timeout.is_zero() {
                violations.push("blocking lock timeout must be positive".to_string());
            }
        }
        if self.stale_lock_after.is_some_and(|d| d.is_zero()) {
            violations.push("stale_lock_after must be positive".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration(violations))
        }
    }

    /// Machine name of the dataset.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository folder.
    #[must_use]
    pub fn exds_folder(&self) -> &Path {
        &self.exds_folder
    }

    /// Folder of this dataset: `<exds_folder>/<name>`.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.exds_folder.join(&self.name)
    }

    /// Opaque source configuration.
    #[must_use]
    pub const fn source_configuration(&self) -> &Value {
        &self.source_configuration
    }

    /// Seed of the split.
    #[must_use]
    pub const fn random_seed(&self) -> Option<u64> {
        self.random_seed
    }

    /// Size of the training partition.
    #[must_use]
    pub const fn training_subset_size(&self) -> TrainingSubsetSize {
        self.training_subset_size
    }

    /// Seal and keep the lock after a successful build.
    #[must_use]
    pub const fn auto_lock_after_build(&self) -> bool {
        self.auto_lock_after_build
    }

    /// Finalize and save at the end of a build.
    #[must_use]
    pub const fn after_build_finalize_and_save(&self) -> bool {
        self.after_build_finalize_and_save
    }

    /// Contention handling.
    #[must_use]
    pub const fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// Band for feature columns.
    #[must_use]
    pub const fn trim_prob_features(&self) -> ProbabilityThresholds {
        self.trim_prob_features
    }

    /// Band for objective columns.
    #[must_use]
    pub const fn trim_prob_objectives(&self) -> ProbabilityThresholds {
        self.trim_prob_objectives
    }

    /// Rows requested from the source.
    #[must_use]
    pub const fn row_selection(&self) -> &RowSelection {
        &self.row_selection
    }

    /// Free-form categories.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    // ------------------------------------------------------------------
    // Folder lifecycle
    // ------------------------------------------------------------------

    /// True if the dataset folder exists.
    #[must_use]
    pub fn folder_exists(&self) -> bool {
        self.path().is_dir()
    }

    /// Create the dataset folder if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the folder cannot be created.
    pub fn ensure_folder(&self) -> Result<PathBuf> {
        let path = self.path();
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove the dataset folder. Does nothing if it is absent.
    ///
    /// The contents are removed while holding the lock, so a process that
    /// locks the folder concurrently either makes this call fail or finds
    /// the folder empty. The emptied folder itself is removed after the lock
    /// is given back, unless someone has started using it again.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] while anyone (this definition included) holds
    /// the lock.
    pub fn delete_folder(&self) -> Result<()> {
        let path = self.path();
        if !path.is_dir() {
            return Ok(());
        }
        let marker = self.get_lock();
        self.while_locked(|| {
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                if entry.path() == marker {
                    continue;
                }
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
            Ok(())
        })?;

        match fs::remove_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) if path.is_dir() => {
                if !self.folder_is_locked()? {
                    return Err(e.into());
                }
                debug!(path = %path.display(), error = %e, "Dataset folder reused during deletion");
            }
            Err(e) => return Err(e.into()),
        }
        info!(path = %path.display(), "Deleted experimental dataset folder");
        Ok(())
    }

    /// Path of a named child area, e.g. `dataset_train`.
    #[must_use]
    pub fn subfolder(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    /// True if the child area exists.
    #[must_use]
    pub fn subfolder_exists(&self, name: &str) -> bool {
        self.subfolder(name).is_dir()
    }

    /// Create the child area (and the dataset folder) if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the folder cannot be created.
    pub fn ensure_subfolder(&self, name: &str) -> Result<PathBuf> {
        let path = self.subfolder(name);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Remove the child area, holding the lock meanwhile. Does nothing if
    /// it is absent.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] while the dataset folder is locked.
    pub fn delete_subfolder(&self, name: &str) -> Result<()> {
        if !self.subfolder_exists(name) {
            return Ok(());
        }
        self.while_locked(|| match fs::remove_dir_all(self.subfolder(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })?;
        debug!(subfolder = name, "Deleted subfolder");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------

    /// Path of the lock marker: `<path>/locked_<lock_name>`.
    #[must_use]
    pub fn get_lock(&self) -> PathBuf {
        self.path().join(format!("locked_{}", self.lock_name))
    }

    /// Take the build/write lock, creating the folder if needed.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLocked`] (fail-fast) or [`Error::LockTimeout`]
    /// (blocking) on contention.
    pub fn lock_folder(&self) -> Result<LockSentinel> {
        self.ensure_folder()?;
        self.lock_provider
            .acquire(&self.get_lock(), &self.holder(), self.lock_mode)
    }

    /// Give the lock back.
    ///
    /// # Errors
    ///
    /// [`Error::NotLocked`] unless this definition holds the lock.
    pub fn unlock_folder(&self) -> Result<()> {
        self.lock_provider.release(&self.get_lock())
    }

    /// Remove the lock marker whoever holds it. Returns whether there was
    /// one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the marker cannot be removed.
    pub fn force_unlock_folder(&self) -> Result<bool> {
        self.lock_provider.force_release(&self.get_lock())
    }

    /// True if a live lock exists, whoever holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be read.
    pub fn folder_is_locked(&self) -> Result<bool> {
        self.lock_provider.is_locked(&self.get_lock())
    }

    /// True if this definition holds the lock.
    #[must_use]
    pub fn holds_lock(&self) -> bool {
        self.lock_provider.holds(&self.get_lock())
    }

    /// Detailed lock state.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be read.
    pub fn lock_status(&self) -> Result<LockStatus> {
        self.lock_provider.status(&self.get_lock())
    }

    /// Turn the held building lock into a sealed one.
    ///
    /// # Errors
    ///
    /// [`Error::NotLocked`] unless this definition holds the lock.
    pub fn seal_lock(&self) -> Result<LockSentinel> {
        self.lock_provider.seal(&self.get_lock())
    }

    /// Turn the held sealed lock back into a building one before rewriting
    /// the folder.
    ///
    /// # Errors
    ///
    /// [`Error::NotLocked`] unless this definition holds the lock.
    pub fn unseal_lock(&self) -> Result<LockSentinel> {
        self.lock_provider.unseal(&self.get_lock())
    }

    // ------------------------------------------------------------------
    // Datasets
    // ------------------------------------------------------------------

    /// Prepare a dataset instance for a build.
    ///
    /// Validates the definition, creates the folder and, with
    /// `auto_lock_after_build`, takes the lock up front. The caller then runs
    /// [`ExperimentalDataset::build`] or
    /// [`ExperimentalDataset::run_build`].
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`], I/O errors, or lock contention errors.
    pub fn create_exds(&self) -> Result<ExperimentalDataset<'_>> {
        self.validate()?;
        self.ensure_folder()?;
        let acquired = self.auto_lock_after_build && !self.holds_lock();
        if acquired {
            self.lock_folder()?;
        }
        Ok(ExperimentalDataset::new(self).owning_lock(acquired))
    }

    /// Dataset instance without touching the folder, e.g. for `load`.
    #[must_use]
    pub fn exds(&self) -> ExperimentalDataset<'_> {
        ExperimentalDataset::new(self)
    }

    fn holder(&self) -> String {
        format!("exds:{}", self.name)
    }

    /// Run `work` holding the lock, fail-fast whatever the lock mode.
    fn while_locked(&self, work: impl FnOnce() -> Result<()>) -> Result<()> {
        let marker = self.get_lock();
        self.lock_provider.try_acquire(&marker, &self.holder())?;
        let result = work();
        let released = self.lock_provider.release(&marker);
        result.and(released)
    }
}

/// Builder for [`ExperimentalDatasetDefinition`].
#[derive(Debug)]
pub struct ExperimentalDatasetDefinitionBuilder {
    definition: ExperimentalDatasetDefinition,
    custom_provider: bool,
}

impl ExperimentalDatasetDefinitionBuilder {
    /// Builder with every optional parameter at its default.
    #[must_use]
    pub fn new(exds_folder: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            definition: ExperimentalDatasetDefinition {
                name: name.into(),
                exds_folder: exds_folder.into(),
                source_configuration: Value::Null,
                random_seed: None,
                training_subset_size: TrainingSubsetSize::default(),
                auto_lock_after_build: true,
                after_build_finalize_and_save: true,
                lock_mode: LockMode::default(),
                lock_name: DEFAULT_LOCK_NAME.to_string(),
                stale_lock_after: None,
                trim_prob_features: ProbabilityThresholds::default(),
                trim_prob_objectives: ProbabilityThresholds::default(),
                row_selection: RowSelection::All,
                tags: Vec::new(),
                lock_provider: Box::new(FileLockProvider::new()),
            },
            custom_provider: false,
        }
    }

    /// Configuration handed to the dataset source.
    #[must_use]
    pub fn source_configuration(mut self, configuration: Value) -> Self {
        self.definition.source_configuration = configuration;
        self
    }

    /// Seed of the split.
    #[must_use]
    pub const fn random_seed(mut self, seed: u64) -> Self {
        self.definition.random_seed = Some(seed);
        self
    }

    /// Size of the training partition.
    #[must_use]
    pub const fn training_subset_size(mut self, size: TrainingSubsetSize) -> Self {
        self.definition.training_subset_size = size;
        self
    }

    /// Seal and keep the lock after a successful build.
    #[must_use]
    pub const fn auto_lock_after_build(mut self, enabled: bool) -> Self {
        self.definition.auto_lock_after_build = enabled;
        self
    }

    /// Finalize and save at the end of a build.
    #[must_use]
    pub const fn after_build_finalize_and_save(mut self, enabled: bool) -> Self {
        self.definition.after_build_finalize_and_save = enabled;
        self
    }

    /// Contention handling.
    #[must_use]
    pub const fn lock_mode(mut self, mode: LockMode) -> Self {
        self.definition.lock_mode = mode;
        self
    }

    /// Marker name suffix.
    #[must_use]
    pub fn lock_name(mut self, name: impl Into<String>) -> Self {
        self.definition.lock_name = name.into();
        self
    }

    /// Age after which building locks count as abandoned.
    #[must_use]
    pub const fn stale_lock_after(mut self, after: Duration) -> Self {
        self.definition.stale_lock_after = Some(after);
        self
    }

    /// Band for feature columns.
    #[must_use]
    pub const fn trim_prob_features(mut self, band: ProbabilityThresholds) -> Self {
        self.definition.trim_prob_features = band;
        self
    }

    /// Band for objective columns.
    #[must_use]
    pub const fn trim_prob_objectives(mut self, band: ProbabilityThresholds) -> Self {
        self.definition.trim_prob_objectives = band;
        self
    }

    /// Rows requested from the source.
    #[must_use]
    pub fn row_selection(mut self, selection: RowSelection) -> Self {
        self.definition.row_selection = selection;
        self
    }

    /// Free-form categories.
    #[must_use]
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.definition.tags = tags;
        self
    }

    /// Custom lock provider.
    #[must_use]
    pub fn lock_provider(mut self, provider: Box<dyn LockProvider>) -> Self {
        self.definition.lock_provider = provider;
        self.custom_provider = true;
        self
    }

    /// Build the definition. Call
    /// [`validate`](ExperimentalDatasetDefinition::validate) before use.
    #[must_use]
    pub fn build(mut self) -> ExperimentalDatasetDefinition {
        if let Some(after) = self.definition.stale_lock_after {
            if !self.custom_provider && !after.is_zero() {
                self.definition.lock_provider =
                    Box::new(FileLockProvider::new().with_stale_after(after));
            }
        }
        self.definition
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

fn check_band(field: &str, band: ProbabilityThresholds, violations: &mut Vec<String>) {
    let in_unit = |v: f64| (0.0..=1.0).contains(&v);
    if !in_unit(band.min) || !in_unit(band.max) {
        violations.push(format!(
            "{field} bounds [{}, {}] must lie within [0, 1]",
            band.min, band.max
        ));
    } else if band.min > band.max {
        violations.push(format!(
            "{field} minimum {} exceeds maximum {}",
            band.min, band.max
        ));
    }
}
