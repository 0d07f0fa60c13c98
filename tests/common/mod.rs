//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::Path;

use anyhow::{bail, Context};
use exds::definition::{ExperimentalDatasetDefinition, TrainingSubsetSize};
use exds::exds::{DatasetSource, RowSelection};
use exds::matrix::{DatasetMatrix, SparseMatrix};

/// Deterministic binary source: `rows` rows labelled `r0..`, `features`
/// columns `f0..` and `objectives` columns `t0..`.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSource {
    pub rows: usize,
    pub features: usize,
    pub objectives: usize,
}

impl SyntheticSource {
    pub const fn new(rows: usize, features: usize, objectives: usize) -> Self {
        Self {
            rows,
            features,
            objectives,
        }
    }
}

fn cell(row: usize, col: usize, salt: usize) -> f64 {
    if (row * 7 + col * 3 + salt) % 4 < 2 {
        1.0
    } else {
        0.0
    }
}

impl DatasetSource for SyntheticSource {
    fn create_dataset_matrix(
        &self,
        label: &str,
        rows: &RowSelection,
        configuration: &serde_json::Value,
    ) -> anyhow::Result<DatasetMatrix> {
        let salt = configuration
            .get("salt")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as usize;
        let selected: Vec<usize> = (0..self.rows)
            .filter(|&i| rows.includes(i, &format!("r{i}")))
            .collect();

        let x: Vec<Vec<f64>> = selected
            .iter()
            .map(|&i| (0..self.features).map(|j| cell(i, j, salt)).collect())
            .collect();
        let y: Vec<Vec<f64>> = selected
            .iter()
            .map(|&i| (0..self.objectives).map(|j| cell(i, j, salt + 1)).collect())
            .collect();

        let matrix_x = if x.is_empty() {
            SparseMatrix::zeros(0, self.features)
        } else {
            SparseMatrix::from_dense(&x)?
        };
        let matrix_y = if y.is_empty() {
            SparseMatrix::zeros(0, self.objectives)
        } else {
            SparseMatrix::from_dense(&y)?
        };

        DatasetMatrix::new(
            label,
            matrix_x,
            matrix_y,
            selected.iter().map(|i| format!("r{i}")).collect(),
            (0..self.features).map(|j| format!("f{j}")).collect(),
            (0..self.objectives).map(|j| format!("t{j}")).collect(),
        )
        .context("synthetic matrix")
    }
}

/// Source that always fails.
#[derive(Debug, Clone, Copy)]
pub struct FailingSource;

impl DatasetSource for FailingSource {
    fn create_dataset_matrix(
        &self,
        _label: &str,
        _rows: &RowSelection,
        _configuration: &serde_json::Value,
    ) -> anyhow::Result<DatasetMatrix> {
        bail!("corpus file missing")
    }
}

/// Definition of the 6-row dataset used throughout the tests.
pub fn definition(folder: &Path, name: &str) -> ExperimentalDatasetDefinition {
    ExperimentalDatasetDefinition::builder(folder, name)
        .random_seed(42)
        .training_subset_size(TrainingSubsetSize::Count(4))
        .build()
}

/// Small labelled matrix from dense rows.
pub fn dense(x: &[Vec<f64>], y: &[Vec<f64>]) -> DatasetMatrix {
    DatasetMatrix::new(
        "dataset",
        SparseMatrix::from_dense(x).unwrap(),
        SparseMatrix::from_dense(y).unwrap(),
        (0..x.len()).map(|i| format!("r{i}")).collect(),
        (0..x[0].len()).map(|j| format!("f{j}")).collect(),
        (0..y[0].len()).map(|j| format!("t{j}")).collect(),
    )
    .unwrap()
}
