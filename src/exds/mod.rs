//! Experimental datasets: build, split, finalize, save and load
//!
//! ```text
//!            build()         split        finalize()
//! Unbuilt ──────────> Built ──────> Split ──────────> Finalized
//!    │                                                    ^
//!    └──────────────────────── load() ────────────────────┘
//! ```
//!
//! A build holds the definition's write lock from the moment the source is
//! asked for data until the matrices are on disk. Afterwards the lock is
//! sealed (`auto_lock_after_build`) or released, so readers either see no
//! dataset or a complete one. Rebuilding under a sealed lock first turns it
//! back into a building lock.

mod hooks;
mod source;
mod split;

pub use hooks::{NoProcessing, PartitionsMut, ProcessingHooks, ThresholdTrimming};
pub use source::{DatasetSource, RowSelection};
pub use split::{split_indices, SplitRecord, SPLIT_FILE};

use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::definition::ExperimentalDatasetDefinition;
use crate::error::Phase;
use crate::lock::{LockSentinel, LockState, LockStatus};
use crate::matrix::DatasetMatrix;
use crate::{Error, Result};

/// Label of the full matrix.
pub const FULL_LABEL: &str = "dataset";
/// Label of the training matrix.
pub const TRAIN_LABEL: &str = "dataset_train";
/// Label of the test matrix.
pub const TEST_LABEL: &str = "dataset_test";

/// Lifecycle state of an [`ExperimentalDataset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExdsState {
    /// Nothing materialized yet.
    Unbuilt,
    /// Full matrix available.
    Built,
    /// Train and test matrices available.
    Split,
    /// All matrices frozen (built, or loaded from disk).
    Finalized,
}

/// Which matrix to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// All rows.
    Full,
    /// Training rows.
    Train,
    /// Test rows.
    Test,
}

impl Partition {
    /// Label (and folder name) of the partition's matrix.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => FULL_LABEL,
            Self::Train => TRAIN_LABEL,
            Self::Test => TEST_LABEL,
        }
    }
}

/// One build/split/finalize lifecycle tied to a definition's folder.
pub struct ExperimentalDataset<'d> {
    definition: &'d ExperimentalDatasetDefinition,
    hooks: Box<dyn ProcessingHooks + 'd>,
    state: ExdsState,
    loaded: bool,
    acquired_lock: bool,
    unsealed_lock: bool,
    matrix: Option<DatasetMatrix>,
    matrix_train: Option<DatasetMatrix>,
    matrix_test: Option<DatasetMatrix>,
    split: Option<SplitRecord>,
    total_row_count: usize,
}

impl<'d> ExperimentalDataset<'d> {
    /// Unbuilt dataset of `definition`, trimming with the definition's
    /// probability bands.
    #[must_use]
    pub fn new(definition: &'d ExperimentalDatasetDefinition) -> Self {
        Self {
            definition,
            hooks: Box::new(ThresholdTrimming::from_definition(definition)),
            state: ExdsState::Unbuilt,
            loaded: false,
            acquired_lock: false,
            unsealed_lock: false,
            matrix: None,
            matrix_train: None,
            matrix_test: None,
            split: None,
            total_row_count: 0,
        }
    }

    pub(crate) const fn owning_lock(mut self, acquired: bool) -> Self {
        self.acquired_lock = acquired;
        self
    }

    /// Replace the processing hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: impl ProcessingHooks + 'd) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// The definition this dataset belongs to.
    #[must_use]
    pub const fn definition(&self) -> &'d ExperimentalDatasetDefinition {
        self.definition
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ExdsState {
        self.state
    }

    /// True if the matrices were read from disk rather than built.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Rows of the full matrix.
    #[must_use]
    pub const fn total_row_count(&self) -> usize {
        self.total_row_count
    }

    /// Record of the split, once there is one.
    #[must_use]
    pub const fn split_record(&self) -> Option<&SplitRecord> {
        self.split.as_ref()
    }

    /// Training row labels, once split.
    #[must_use]
    pub fn train_rows(&self) -> Option<&[String]> {
        self.split.as_ref().map(|s| s.train_rows.as_slice())
    }

    /// Test row labels, once split.
    #[must_use]
    pub fn test_rows(&self) -> Option<&[String]> {
        self.split.as_ref().map(|s| s.test_rows.as_slice())
    }

    /// One of the matrices.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the partition does not exist yet: `Full`
    /// needs a build or load, `Train`/`Test` a split or load.
    pub fn get_datasetmatrix(&self, which: Partition) -> Result<&DatasetMatrix> {
        let matrix = match which {
            Partition::Full => self.matrix.as_ref(),
            Partition::Train => self.matrix_train.as_ref(),
            Partition::Test => self.matrix_test.as_ref(),
        };
        matrix.ok_or_else(|| {
            Error::InvalidState(format!(
                "Experimental dataset '{}' has no {} matrix in state {:?}",
                self.definition.name(),
                which.label(),
                self.state
            ))
        })
    }

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------

    /// Run the whole build: materialize, process, split, process and, if
    /// the definition says so, finalize and save.
    ///
    /// On failure a lock taken by this build is released.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an invalid definition, otherwise
    /// [`Error::ExperimentalDataset`] naming the failed phase.
    pub fn run_build(&mut self, source: &dyn DatasetSource) -> Result<()> {
        let result = self.run_build_steps(source);
        if result.is_err() {
            self.abandon_lock();
        }
        result
    }

    fn run_build_steps(&mut self, source: &dyn DatasetSource) -> Result<()> {
        self.build(source)?;
        self.process_before_split()?;
        self.perform_random_dataset_split(None)?;
        self.process_after_split()?;
        if self.definition.after_build_finalize_and_save() {
            self.finalize_and_save()?;
        }
        Ok(())
    }

    /// Ask `source` for the full matrix.
    ///
    /// Takes the definition's write lock unless it is already held, so no
    /// other process can build or delete the folder meanwhile. A held sealed
    /// lock is turned back into a building one, so readers wait for the
    /// rebuilt folder.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an invalid definition, otherwise
    /// [`Error::ExperimentalDataset`] in the build phase: not unbuilt, lock
    /// contention, source failure, or a matrix violating its invariants.
    pub fn build(&mut self, source: &dyn DatasetSource) -> Result<()> {
        self.definition.validate()?;
        self.expect_state(ExdsState::Unbuilt, Phase::Build)?;

        if self.definition.holds_lock() {
            self.reopen_sealed_lock()
                .map_err(|e| Error::in_phase(Phase::Build, e))?;
        } else {
            self.definition
                .lock_folder()
                .map_err(|e| Error::in_phase(Phase::Build, e))?;
            self.acquired_lock = true;
        }

        let matrix = source
            .create_dataset_matrix(
                FULL_LABEL,
                self.definition.row_selection(),
                self.definition.source_configuration(),
            )
            .map_err(|e| Error::in_phase(Phase::Build, e))
            .and_then(|m| {
                m.check_invariants()
                    .map_err(|e| Error::in_phase(Phase::Build, e))?;
                Ok(m.with_label(FULL_LABEL))
            });
        let matrix = match matrix {
            Ok(matrix) => matrix,
            Err(e) => {
                self.abandon_lock();
                return Err(e);
            }
        };

        self.total_row_count = matrix.row_count();
        info!(
            exds = self.definition.name(),
            summary = %matrix.info(),
            "Built experimental dataset"
        );
        self.matrix = Some(matrix);
        self.state = ExdsState::Built;
        Ok(())
    }

    /// Run the before-split hook on the full matrix.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentalDataset`] in the process phase.
    pub fn process_before_split(&mut self) -> Result<()> {
        self.expect_state(ExdsState::Built, Phase::Process)?;
        let full = self.matrix.as_mut().ok_or_else(|| missing(Phase::Process))?;
        self.hooks
            .before_split(full)
            .map_err(|e| Error::in_phase(Phase::Process, e))?;
        self.total_row_count = full.row_count();
        Ok(())
    }

    /// Split the full matrix into training and test matrices.
    ///
    /// Uses `seed` if given, otherwise the definition's `random_seed`; see
    /// [`split_indices`] for the exact algorithm.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentalDataset`] in the split phase: not built, no seed,
    /// or a training size larger than the matrix.
    pub fn perform_random_dataset_split(&mut self, seed: Option<u64>) -> Result<()> {
        self.expect_state(ExdsState::Built, Phase::Split)?;
        let seed = seed.or(self.definition.random_seed()).ok_or_else(|| {
            Error::in_phase(
                Phase::Split,
                Error::Configuration(vec!["random_seed must be set".to_string()]),
            )
        })?;
        let full = self.matrix.as_ref().ok_or_else(|| missing(Phase::Split))?;
        let size = self.definition.training_subset_size();

        let split = || -> Result<(DatasetMatrix, DatasetMatrix, SplitRecord)> {
            let (train_idx, test_idx) = split_indices(full.row_count(), size, seed)?;
            let train = full.select_row_indices(&train_idx)?.with_label(TRAIN_LABEL);
            let test = full.select_row_indices(&test_idx)?.with_label(TEST_LABEL);
            let record = SplitRecord {
                seed,
                training_subset_size: size,
                total_row_count: full.row_count(),
                train_rows: train.row_labels().to_vec(),
                test_rows: test.row_labels().to_vec(),
                created_at: Utc::now(),
            };
            Ok((train, test, record))
        };
        let (train, test, record) = split().map_err(|e| Error::in_phase(Phase::Split, e))?;

        info!(
            exds = self.definition.name(),
            seed,
            train = train.row_count(),
            test = test.row_count(),
            "Split experimental dataset"
        );
        self.matrix_train = Some(train);
        self.matrix_test = Some(test);
        self.split = Some(record);
        self.state = ExdsState::Split;
        Ok(())
    }

    /// Run the after-split hook on all three matrices.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentalDataset`] in the process phase.
    pub fn process_after_split(&mut self) -> Result<()> {
        self.expect_state(ExdsState::Split, Phase::Process)?;
        let partitions = partitions_mut(
            &mut self.matrix,
            &mut self.matrix_train,
            &mut self.matrix_test,
        )?;
        self.hooks
            .after_split(partitions)
            .map_err(|e| Error::in_phase(Phase::Process, e))
    }

    /// Run the before-finalize-and-save hook on all three matrices.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentalDataset`] in the process phase.
    pub fn process_before_finalize_and_save(&mut self) -> Result<()> {
        self.expect_state(ExdsState::Split, Phase::Process)?;
        let partitions = partitions_mut(
            &mut self.matrix,
            &mut self.matrix_train,
            &mut self.matrix_test,
        )?;
        self.hooks
            .before_finalize_and_save(partitions)
            .map_err(|e| Error::in_phase(Phase::Process, e))
    }

    /// Freeze all three matrices.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentalDataset`] in the finalize phase unless split.
    pub fn finalize(&mut self) -> Result<()> {
        self.expect_state(ExdsState::Split, Phase::Finalize)?;
        for matrix in [
            &mut self.matrix,
            &mut self.matrix_train,
            &mut self.matrix_test,
        ]
        .into_iter()
        .flatten()
        {
            matrix.finalize();
        }
        self.state = ExdsState::Finalized;
        debug!(exds = self.definition.name(), "Finalized matrices");
        Ok(())
    }

    /// Write the three matrices and the split record to the dataset folder.
    ///
    /// Requires this definition to hold the write lock. The split record is
    /// written last and marks the folder as complete.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentalDataset`] in the save phase: not finalized, lock
    /// not held, or a write failure.
    pub fn save(&self) -> Result<()> {
        self.expect_state(ExdsState::Finalized, Phase::Save)?;
        self.save_steps()
            .map_err(|e| Error::in_phase(Phase::Save, e))
    }

    fn save_steps(&self) -> Result<()> {
        if !self.definition.holds_lock() {
            return Err(Error::NotLocked(self.definition.get_lock()));
        }
        let folder = self.definition.ensure_folder()?;
        let record = self.split.as_ref().ok_or_else(|| missing(Phase::Save))?;

        let marker = folder.join(SPLIT_FILE);
        if marker.exists() {
            fs::remove_file(&marker)?;
        }
        for which in [Partition::Full, Partition::Train, Partition::Test] {
            self.get_datasetmatrix(which)?.save(&folder)?;
        }
        write_json_atomically(&marker, record)?;

        info!(
            exds = self.definition.name(),
            path = %folder.display(),
            "Saved experimental dataset"
        );
        Ok(())
    }

    /// Hook, finalize, save, then seal or release the lock.
    ///
    /// # Errors
    ///
    /// Errors of the individual steps.
    pub fn finalize_and_save(&mut self) -> Result<()> {
        self.process_before_finalize_and_save()?;
        self.finalize()?;
        self.save()?;

        let lock_result = if self.definition.auto_lock_after_build() {
            self.definition.seal_lock().map(|_| ())
        } else {
            self.definition.unlock_folder()
        };
        lock_result.map_err(|e| Error::in_phase(Phase::Save, e))?;
        self.acquired_lock = false;
        self.unsealed_lock = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    /// Read previously saved matrices, going straight to `Finalized`.
    ///
    /// Does not need the write lock, but refuses a folder another live
    /// process is still building.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentalDataset`] in the load phase: folder absent or
    /// incomplete, build in progress, or stored matrices that are not
    /// finalized or violate their invariants.
    pub fn load(&mut self) -> Result<()> {
        self.expect_state(ExdsState::Unbuilt, Phase::Load)?;
        let (record, matrices) = self
            .load_steps()
            .map_err(|e| Error::in_phase(Phase::Load, e))?;
        let [full, train, test] = matrices;

        self.total_row_count = record.total_row_count;
        self.matrix = Some(full);
        self.matrix_train = Some(train);
        self.matrix_test = Some(test);
        self.split = Some(record);
        self.state = ExdsState::Finalized;
        self.loaded = true;
        info!(exds = self.definition.name(), "Loaded experimental dataset");
        Ok(())
    }

    fn load_steps(&self) -> Result<(SplitRecord, [DatasetMatrix; 3])> {
        let folder = self.definition.path();
        if !folder.is_dir() {
            return Err(Error::InvalidState(format!(
                "Experimental dataset folder {} does not exist",
                folder.display()
            )));
        }
        let status = self.definition.lock_status()?;
        if status.blocks_readers() {
            let holder = status
                .sentinel()
                .map(LockSentinel::describe)
                .unwrap_or_default();
            return Err(Error::AlreadyLocked {
                path: self.definition.get_lock(),
                holder,
            });
        }
        if let LockStatus::Stale(s) = &status {
            warn!(holder = %s.describe(), "Loading folder with a stale build lock");
        }

        let marker = folder.join(SPLIT_FILE);
        if !marker.is_file() {
            return Err(Error::InvalidState(format!(
                "Experimental dataset folder {} contains no finished build",
                folder.display()
            )));
        }
        let record: SplitRecord = serde_json::from_reader(File::open(&marker)?)?;

        let load = |which: Partition| -> Result<DatasetMatrix> {
            let matrix = DatasetMatrix::load(&folder, which.label())?;
            if !matrix.is_finalized() {
                return Err(Error::InvalidState(format!(
                    "Stored matrix '{}' is not finalized",
                    which.label()
                )));
            }
            Ok(matrix)
        };
        let full = load(Partition::Full)?;
        let train = load(Partition::Train)?;
        let test = load(Partition::Test)?;

        if train.row_labels() != record.train_rows.as_slice()
            || test.row_labels() != record.test_rows.as_slice()
        {
            return Err(Error::InvalidMatrix(format!(
                "Stored matrices in {} do not match {SPLIT_FILE}",
                folder.display()
            )));
        }
        Ok((record, [full, train, test]))
    }

    /// Shape summary of every available matrix.
    #[must_use]
    pub fn info(&self) -> String {
        let mut lines = vec![format!(
            "{} ({:?}{})",
            self.definition.name(),
            self.state,
            if self.loaded { ", loaded" } else { "" }
        )];
        lines.extend(
            [&self.matrix, &self.matrix_train, &self.matrix_test]
                .into_iter()
                .flatten()
                .map(|m| format!("  {}", m.info())),
        );
        lines.join("\n")
    }

    fn expect_state(&self, expected: ExdsState, phase: Phase) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        Err(Error::in_phase(
            phase,
            Error::InvalidState(format!(
                "Experimental dataset '{}' is {:?}, expected {expected:?}",
                self.definition.name(),
                self.state
            )),
        ))
    }

    fn reopen_sealed_lock(&mut self) -> Result<()> {
        if let LockStatus::HeldByUs(held) = self.definition.lock_status()? {
            if held.state == LockState::Sealed {
                self.definition.unseal_lock()?;
                self.unsealed_lock = true;
                debug!(exds = self.definition.name(), "Reopened sealed lock for rebuild");
            }
        }
        Ok(())
    }

    /// Give back a lock taken by a failed build, or seal again a lock it
    /// reopened. The folder stays readable only if `split.json` survived.
    fn abandon_lock(&mut self) {
        let result = if self.acquired_lock {
            self.definition.unlock_folder()
        } else if self.unsealed_lock {
            self.definition.seal_lock().map(|_| ())
        } else {
            return;
        };
        self.acquired_lock = false;
        self.unsealed_lock = false;
        if let Err(e) = result {
            warn!(
                exds = self.definition.name(),
                error = %e,
                "Could not release lock of failed build"
            );
        }
    }
}

impl fmt::Debug for ExperimentalDataset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentalDataset")
            .field("name", &self.definition.name())
            .field("state", &self.state)
            .field("loaded", &self.loaded)
            .field("hooks", &self.hooks)
            .field("total_row_count", &self.total_row_count)
            .finish_non_exhaustive()
    }
}

fn missing(phase: Phase) -> Error {
    Error::in_phase(
        phase,
        Error::InvalidState("matrices are missing for the current state".to_string()),
    )
}

fn partitions_mut<'a>(
    full: &'a mut Option<DatasetMatrix>,
    train: &'a mut Option<DatasetMatrix>,
    test: &'a mut Option<DatasetMatrix>,
) -> Result<PartitionsMut<'a>> {
    match (full, train, test) {
        (Some(full), Some(train), Some(test)) => Ok(PartitionsMut { full, train, test }),
        _ => Err(missing(Phase::Process)),
    }
}

fn write_json_atomically<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    let file = File::create(&temp)?;
    serde_json::to_writer_pretty(&file, value)?;
    file.sync_all()?;
    fs::rename(&temp, path)?;
    Ok(())
}
