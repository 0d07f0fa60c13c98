//! The dataset source capability

use serde::{Deserialize, Serialize};

use crate::matrix::DatasetMatrix;

/// Rows a source is asked to materialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSelection {
    /// Every row the source knows.
    #[default]
    All,
    /// Rows with these labels, in this order.
    Labels(Vec<String>),
    /// Rows by position, `start..end`.
    Range {
        /// First row.
        start: usize,
        /// One past the last row.
        end: usize,
    },
}

impl RowSelection {
    /// Whether the row at `index` labelled `label` is selected.
    ///
    /// For [`RowSelection::Labels`] only membership is checked; sources that
    /// honour the requested order should iterate the labels themselves.
    #[must_use]
    pub fn includes(&self, index: usize, label: &str) -> bool {
        match self {
            Self::All => true,
            Self::Labels(labels) => labels.iter().any(|l| l == label),
            Self::Range { start, end } => (*start..*end).contains(&index),
        }
    }
}

/// Produces the full [`DatasetMatrix`] of an experimental dataset.
///
/// Concrete sources (corpora, synthetic generators, samplers of Bayesian
/// networks) live outside this crate. Their failures are opaque to the core
/// and come back wrapped in [`Error::ExperimentalDataset`](crate::Error).
pub trait DatasetSource {
    /// Materialize the rows in `rows`, labelling the matrix `label`.
    ///
    /// # Errors
    ///
    /// Any source-specific failure.
    fn create_dataset_matrix(
        &self,
        label: &str,
        rows: &RowSelection,
        configuration: &serde_json::Value,
    ) -> anyhow::Result<DatasetMatrix>;
}

/// Closures are sources too, which keeps ad-hoc sources short.
impl<F> DatasetSource for F
where
    F: Fn(&str, &RowSelection, &serde_json::Value) -> anyhow::Result<DatasetMatrix>,
{
    fn create_dataset_matrix(
        &self,
        label: &str,
        rows: &RowSelection,
        configuration: &serde_json::Value,
    ) -> anyhow::Result<DatasetMatrix> {
        self(label, rows, configuration)
    }
}
