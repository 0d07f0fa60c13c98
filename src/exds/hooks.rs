//! Build-specific processing around the split

use std::collections::HashSet;
use std::fmt;

use tracing::info;

use crate::definition::{ExperimentalDatasetDefinition, ProbabilityThresholds};
use crate::matrix::{Axis, DatasetMatrix};
use crate::Result;

/// The three matrices of a split dataset, mutably borrowed.
#[derive(Debug)]
pub struct PartitionsMut<'a> {
    /// Full matrix.
    pub full: &'a mut DatasetMatrix,
    /// Training matrix.
    pub train: &'a mut DatasetMatrix,
    /// Test matrix.
    pub test: &'a mut DatasetMatrix,
}

impl PartitionsMut<'_> {
    /// Delete the given columns from all three matrices.
    ///
    /// # Errors
    ///
    /// Lookup or state errors of [`DatasetMatrix::delete_rows_cols`].
    pub fn delete_columns(&mut self, columns_x: &[String], columns_y: &[String]) -> Result<()> {
        let no_rows: &[&str] = &[];
        for matrix in [&mut *self.full, &mut *self.train, &mut *self.test] {
            matrix.delete_rows_cols(no_rows, columns_x, columns_y)?;
        }
        Ok(())
    }
}

/// Policy hooks run by [`ExperimentalDataset`](super::ExperimentalDataset)
/// at fixed points of a build. Every hook defaults to doing nothing.
pub trait ProcessingHooks: fmt::Debug {
    /// Runs on the full matrix right before the split.
    ///
    /// # Errors
    ///
    /// Any failure aborts the build.
    fn before_split(&self, _full: &mut DatasetMatrix) -> Result<()> {
        Ok(())
    }

    /// Runs right after the split.
    ///
    /// # Errors
    ///
    /// Any failure aborts the build.
    fn after_split(&self, _partitions: PartitionsMut<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs right before the matrices are finalized and saved.
    ///
    /// # Errors
    ///
    /// Any failure aborts the build.
    fn before_finalize_and_save(&self, _partitions: PartitionsMut<'_>) -> Result<()> {
        Ok(())
    }
}

/// Hooks that leave the data untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProcessing;

impl ProcessingHooks for NoProcessing {}

/// Drops columns whose probability `sum(column) / rows` falls outside a band.
///
/// Meant for binary data, where that fraction is the empirical probability
/// of the variable being set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdTrimming {
    /// Band for feature (`X`) columns.
    pub features: ProbabilityThresholds,
    /// Band for objective (`Y`) columns.
    pub objectives: ProbabilityThresholds,
    /// Also drop feature columns without any entry in the training matrix.
    pub drop_empty_training_features: bool,
}

impl ThresholdTrimming {
    /// Bands taken from `definition`.
    #[must_use]
    pub const fn from_definition(definition: &ExperimentalDatasetDefinition) -> Self {
        Self {
            features: definition.trim_prob_features(),
            objectives: definition.trim_prob_objectives(),
            drop_empty_training_features: false,
        }
    }

    /// Enable or disable dropping empty training features.
    #[must_use]
    pub const fn drop_empty_training_features(mut self, enabled: bool) -> Self {
        self.drop_empty_training_features = enabled;
        self
    }

    fn band(&self, axis: Axis) -> ProbabilityThresholds {
        match axis {
            Axis::X => self.features,
            Axis::Y => self.objectives,
        }
    }

    /// Labels of the columns of `matrix` on `axis` outside the band.
    #[must_use]
    pub fn columns_outside_band(&self, matrix: &DatasetMatrix, axis: Axis) -> Vec<String> {
        let band = self.band(axis);
        let rows = matrix.row_count();
        if rows == 0 || band.is_unbounded() {
            return Vec::new();
        }
        #[allow(clippy::cast_precision_loss)]
        let rows = rows as f64;
        matrix
            .matrix(axis)
            .column_sums()
            .iter()
            .zip(matrix.column_labels(axis))
            .filter(|(sum, _)| !band.contains(**sum / rows))
            .map(|(_, label)| label.clone())
            .collect()
    }
}

impl ProcessingHooks for ThresholdTrimming {
    fn before_split(&self, full: &mut DatasetMatrix) -> Result<()> {
        let columns_x = self.columns_outside_band(full, Axis::X);
        let columns_y = self.columns_outside_band(full, Axis::Y);
        if columns_x.is_empty() && columns_y.is_empty() {
            return Ok(());
        }
        let no_rows: &[&str] = &[];
        full.delete_rows_cols(no_rows, &columns_x, &columns_y)?;
        info!(
            matrix = full.label(),
            features = columns_x.len(),
            objectives = columns_y.len(),
            "Trimmed columns outside probability thresholds"
        );
        Ok(())
    }

    fn after_split(&self, mut partitions: PartitionsMut<'_>) -> Result<()> {
        let mut columns_x = union(
            self.columns_outside_band(&*partitions.train, Axis::X),
            self.columns_outside_band(&*partitions.test, Axis::X),
        );
        let columns_y = union(
            self.columns_outside_band(&*partitions.train, Axis::Y),
            self.columns_outside_band(&*partitions.test, Axis::Y),
        );
        if self.drop_empty_training_features {
            columns_x = union(columns_x, empty_columns(&*partitions.train, Axis::X));
        }
        if columns_x.is_empty() && columns_y.is_empty() {
            return Ok(());
        }

        // Keep the order of the full matrix so every matrix sees the same edit.
        let order = |axis: Axis, set: &[String]| -> Vec<String> {
            let set: HashSet<&str> = set.iter().map(String::as_str).collect();
            partitions
                .full
                .column_labels(axis)
                .iter()
                .filter(|l| set.contains(l.as_str()))
                .cloned()
                .collect()
        };
        let columns_x = order(Axis::X, &columns_x);
        let columns_y = order(Axis::Y, &columns_y);

        partitions.delete_columns(&columns_x, &columns_y)?;
        info!(
            features = columns_x.len(),
            objectives = columns_y.len(),
            "Trimmed columns after split"
        );
        Ok(())
    }
}

fn union(mut left: Vec<String>, right: Vec<String>) -> Vec<String> {
    let seen: HashSet<String> = left.iter().cloned().collect();
    left.extend(right.into_iter().filter(|l| !seen.contains(l)));
    left
}

fn empty_columns(matrix: &DatasetMatrix, axis: Axis) -> Vec<String> {
    let mut occupied = vec![false; matrix.column_count(axis)];
    for (_, col, value) in matrix.matrix(axis).triplets() {
        if value != 0.0 {
            occupied[col] = true;
        }
    }
    matrix
        .column_labels(axis)
        .iter()
        .zip(occupied)
        .filter(|(_, occupied)| !occupied)
        .map(|(label, _)| label.clone())
        .collect()
}
