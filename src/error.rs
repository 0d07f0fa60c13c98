//! Error types for exds
//!
//! Every fallible operation in the crate returns [`Result`]. Failures of an
//! experimental-dataset phase are wrapped in [`Error::ExperimentalDataset`]
//! together with the [`Phase`] they happened in.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error carried by [`Error::ExperimentalDataset`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Phase of the experimental-dataset lifecycle in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Materializing the full matrix from a `DatasetSource`.
    Build,
    /// Pre/post processing hooks.
    Process,
    /// Random train/test split.
    Split,
    /// Finalizing the matrices.
    Finalize,
    /// Persisting the matrices.
    Save,
    /// Reading persisted matrices back.
    Load,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Build => "build",
            Self::Process => "process",
            Self::Split => "split",
            Self::Finalize => "finalize",
            Self::Save => "save",
            Self::Load => "load",
        };
        f.write_str(name)
    }
}

/// exds error types
#[derive(Error, Debug)]
pub enum Error {
    /// Operation not allowed in the current state (e.g. editing a finalized matrix)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Column label absent from the given axis
    #[error("Label not found: column '{label}' does not exist in {axis}")]
    LabelNotFound {
        /// Axis that was searched (`X` or `Y`)
        axis: String,
        /// Missing label
        label: String,
    },

    /// Row label or row index absent from the matrix
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// Matrix violating its shape/label invariants
    #[error("Invalid dataset matrix: {0}")]
    InvalidMatrix(String),

    /// Malformed argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The lock is held by another holder
    #[error("Folder {} is already locked by {holder}", .path.display())]
    AlreadyLocked {
        /// Lock marker path
        path: PathBuf,
        /// Description of the current holder
        holder: String,
    },

    /// Release attempted without holding the lock
    #[error("Folder lock {} is not held by this process", .0.display())]
    NotLocked(PathBuf),

    /// Blocking acquisition gave up
    #[error("Timed out after {waited:?} waiting for folder lock {}", .path.display())]
    LockTimeout {
        /// Lock marker path
        path: PathBuf,
        /// How long the caller waited
        waited: Duration,
    },

    /// Invalid definition parameters, one entry per violated constraint
    #[error("Configuration error: {}", .0.join("; "))]
    Configuration(Vec<String>),

    /// Failure during one phase of an experimental dataset
    #[error("Experimental dataset {phase} failed: {source}")]
    ExperimentalDataset {
        /// Lifecycle phase
        phase: Phase,
        /// Underlying failure (a core [`Error`] or a source-specific error)
        #[source]
        source: BoxError,
    },

    /// Storage error (layout or content of persisted matrices)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (manifest, sentinel, config) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap `source` as a failure of `phase`.
    ///
    /// Errors that are already phase-wrapped are passed through unchanged.
    pub fn in_phase<E>(phase: Phase, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        let source = source.into();
        match source.downcast::<Self>() {
            Ok(inner) => match *inner {
                already @ Self::ExperimentalDataset { .. } => already,
                other => Self::ExperimentalDataset {
                    phase,
                    source: Box::new(other),
                },
            },
            Err(source) => Self::ExperimentalDataset { phase, source },
        }
    }

    /// Phase of a wrapped experimental-dataset failure.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::ExperimentalDataset { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The core error wrapped by [`Error::ExperimentalDataset`], if any.
    #[must_use]
    pub fn inner(&self) -> Option<&Self> {
        match self {
            Self::ExperimentalDataset { source, .. } => source.downcast_ref::<Self>(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_phase_wraps_core_error() {
        let err = Error::in_phase(Phase::Split, Error::InvalidState("not built".into()));
        assert_eq!(err.phase(), Some(Phase::Split));
        assert!(matches!(err.inner(), Some(Error::InvalidState(_))));
    }

    #[test]
    fn test_in_phase_does_not_double_wrap() {
        let once = Error::in_phase(Phase::Save, Error::NotLocked(PathBuf::from("/tmp/x")));
        let twice = Error::in_phase(Phase::Build, once);
        assert_eq!(twice.phase(), Some(Phase::Save));
    }

    #[test]
    fn test_in_phase_keeps_foreign_error() {
        let err = Error::in_phase(Phase::Build, anyhow::anyhow!("corpus missing"));
        assert!(err.inner().is_none());
        assert!(err.to_string().contains("corpus missing"));
        assert!(err.to_string().contains("build"));
    }
}
