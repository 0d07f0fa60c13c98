//! Labeled dataset matrices
//!
//! A [`DatasetMatrix`] pairs two sparse matrices that share their rows: the
//! feature matrix `X` (samples × features) and the objective matrix `Y`
//! (samples × objective variables). Rows and columns are addressed by label,
//! independent of their position.
//!
//! ## Lifecycle
//!
//! ```text
//! DatasetSource ──> mutable ──finalize()──> finalized ──save()──> folder
//!                      ^                        │
//!                      └──────unfinalize()──────┘
//! ```
//!
//! Structural edits (`delete_*`, `select_*`, `keep_rows`) are only accepted
//! while the matrix is not finalized. Multi-step edits validate every label
//! before touching the matrix, so a failed edit leaves it unchanged.
//!
//! ## Usage
//!
//! ```rust
//! use exds::matrix::{Axis, DatasetMatrix, SparseMatrix};
//!
//! let x = SparseMatrix::from_dense(&[vec![1.0, 0.0], vec![0.0, 1.0]])?;
//! let y = SparseMatrix::from_dense(&[vec![1.0], vec![0.0]])?;
//! let mut m = DatasetMatrix::new(
//!     "dataset",
//!     x,
//!     y,
//!     vec!["r0".into(), "r1".into()],
//!     vec!["f0".into(), "f1".into()],
//!     vec!["t0".into()],
//! )?;
//!
//! m.delete_column_x("f1")?;
//! m.finalize();
//! assert!(m.delete_row("r0").is_err());
//! assert_eq!(m.get_column(Axis::X, "f0")?.to_dense(), vec![1.0, 0.0]);
//! # Ok::<(), exds::Error>(())
//! ```

mod diff;
mod sparse;

pub use diff::{CellMismatch, LabelDiff, MatrixDiff};
pub use sparse::{SparseMatrix, SparseVector};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Selects one of the two matrices of a [`DatasetMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Feature variables.
    X,
    /// Objective variables.
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => f.write_str("X"),
            Self::Y => f.write_str("Y"),
        }
    }
}

/// A pair of row-aligned sparse matrices with row and column labels.
///
/// Invariants (checked by [`new`](Self::new) and on load):
/// - `X` and `Y` have exactly `row_labels.len()` rows;
/// - `X` has `column_labels_x.len()` columns, `Y` has `column_labels_y.len()`;
/// - labels are unique within each axis.
#[derive(Debug, Clone)]
pub struct DatasetMatrix {
    label: String,
    matrix_x: SparseMatrix,
    matrix_y: SparseMatrix,
    row_labels: Vec<String>,
    column_labels_x: Vec<String>,
    column_labels_y: Vec<String>,
    finalized: bool,
}

impl DatasetMatrix {
    /// Create a mutable (not finalized) matrix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMatrix`] if shapes and labels disagree or a
    /// label is duplicated.
    pub fn new(
        label: impl Into<String>,
        matrix_x: SparseMatrix,
        matrix_y: SparseMatrix,
        row_labels: Vec<String>,
        column_labels_x: Vec<String>,
        column_labels_y: Vec<String>,
    ) -> Result<Self> {
        let matrix = Self {
            label: label.into(),
            matrix_x,
            matrix_y,
            row_labels,
            column_labels_x,
            column_labels_y,
            finalized: false,
        };
        matrix.check_invariants()?;
        Ok(matrix)
    }

    pub(crate) fn with_finalized(mut self, finalized: bool) -> Self {
        self.finalized = finalized;
        self
    }

    /// Verify the shape and label invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMatrix`] describing the first violation.
    pub fn check_invariants(&self) -> Result<()> {
        let rows = self.row_labels.len();
        for axis in [Axis::X, Axis::Y] {
            let (r, c) = self.matrix(axis).shape();
            if r != rows {
                return Err(Error::InvalidMatrix(format!(
                    "{axis} has {r} rows but there are {rows} row labels"
                )));
            }
            let labels = self.column_labels(axis).len();
            if c != labels {
                return Err(Error::InvalidMatrix(format!(
                    "{axis} has {c} columns but there are {labels} column labels"
                )));
            }
        }
        check_unique("row", &self.row_labels)?;
        check_unique("X column", &self.column_labels_x)?;
        check_unique("Y column", &self.column_labels_y)?;
        Ok(())
    }

    /// Name of this matrix; also the name of its folder when saved.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Rename the matrix.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The feature matrix.
    #[must_use]
    pub const fn matrix_x(&self) -> &SparseMatrix {
        &self.matrix_x
    }

    /// The objective matrix.
    #[must_use]
    pub const fn matrix_y(&self) -> &SparseMatrix {
        &self.matrix_y
    }

    /// `X` or `Y`.
    #[must_use]
    pub const fn matrix(&self, axis: Axis) -> &SparseMatrix {
        match axis {
            Axis::X => &self.matrix_x,
            Axis::Y => &self.matrix_y,
        }
    }

    /// Row labels, in row order.
    #[must_use]
    pub fn row_labels(&self) -> &[String] {
        &self.row_labels
    }

    /// Column labels of `X`, in column order.
    #[must_use]
    pub fn column_labels_x(&self) -> &[String] {
        &self.column_labels_x
    }

    /// Column labels of `Y`, in column order.
    #[must_use]
    pub fn column_labels_y(&self) -> &[String] {
        &self.column_labels_y
    }

    /// Column labels of `X` or `Y`.
    #[must_use]
    pub fn column_labels(&self, axis: Axis) -> &[String] {
        match axis {
            Axis::X => &self.column_labels_x,
            Axis::Y => &self.column_labels_y,
        }
    }

    /// Number of rows (samples).
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_labels.len()
    }

    /// Number of columns of `X` or `Y`.
    #[must_use]
    pub fn column_count(&self, axis: Axis) -> usize {
        self.column_labels(axis).len()
    }

    /// Whether structural edits are currently rejected.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Position of a row label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowNotFound`] if the label is absent.
    pub fn row_position(&self, label: &str) -> Result<usize> {
        self.row_labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| Error::RowNotFound(label.to_string()))
    }

    /// Position of a column label in `X` or `Y`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LabelNotFound`] if the label is absent.
    pub fn column_position(&self, axis: Axis, label: &str) -> Result<usize> {
        self.column_labels(axis)
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| Error::LabelNotFound {
                axis: axis.to_string(),
                label: label.to_string(),
            })
    }

    /// Value of one cell, addressed by labels.
    ///
    /// # Errors
    ///
    /// Returns a lookup error if the row or column label is absent.
    pub fn value(&self, axis: Axis, row: &str, column: &str) -> Result<f64> {
        let r = self.row_position(row)?;
        let c = self.column_position(axis, column)?;
        Ok(self.matrix(axis).get(r, c))
    }

    /// The column with the given label, as a sparse vector over the rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LabelNotFound`] if the label is absent from `axis`.
    pub fn get_column(&self, axis: Axis, label: &str) -> Result<SparseVector> {
        let c = self.column_position(axis, label)?;
        self.matrix(axis).column(c)
    }

    /// A column of `X`; see [`get_column`](Self::get_column).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LabelNotFound`] if the label is absent from `X`.
    pub fn get_column_x(&self, label: &str) -> Result<SparseVector> {
        self.get_column(Axis::X, label)
    }

    /// A column of `Y`; see [`get_column`](Self::get_column).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LabelNotFound`] if the label is absent from `Y`.
    pub fn get_column_y(&self, label: &str) -> Result<SparseVector> {
        self.get_column(Axis::Y, label)
    }

    /// New matrix keeping only the given columns of `axis`, in the given
    /// order. The other matrix and the rows are unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::LabelNotFound`] for an
    /// unknown label, [`Error::InvalidInput`] for a duplicated label.
    pub fn select_columns<S: AsRef<str>>(&self, axis: Axis, labels: &[S]) -> Result<Self> {
        self.ensure_mutable(&format!("Cannot select {axis} columns."))?;
        let positions = self.column_positions(axis, labels)?;
        reject_duplicates(&positions, "column")?;

        let selected = self.matrix(axis).select_columns(&positions)?;
        let selected_labels: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        let mut result = self.clone();
        match axis {
            Axis::X => {
                result.matrix_x = selected;
                result.column_labels_x = selected_labels;
            }
            Axis::Y => {
                result.matrix_y = selected;
                result.column_labels_y = selected_labels;
            }
        }
        Ok(result)
    }

    /// New matrix keeping only the given `X` columns, in the given order.
    ///
    /// # Errors
    ///
    /// See [`select_columns`](Self::select_columns).
    pub fn select_columns_x<S: AsRef<str>>(&self, labels: &[S]) -> Result<Self> {
        self.select_columns(Axis::X, labels)
    }

    /// New matrix made of the given rows of both `X` and `Y`, in the order
    /// of `labels`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::RowNotFound`] for an
    /// unknown label, [`Error::InvalidInput`] for a duplicated label.
    pub fn select_rows<S: AsRef<str>>(&self, labels: &[S]) -> Result<Self> {
        self.ensure_mutable("Cannot select rows.")?;
        let positions = self.row_positions(labels)?;
        self.select_row_indices(&positions)
    }

    /// New matrix made of the rows at the given positions, in that order.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::RowNotFound`] for an
    /// index out of range, [`Error::InvalidInput`] for a duplicated index.
    pub fn select_row_indices(&self, indices: &[usize]) -> Result<Self> {
        self.ensure_mutable("Cannot select rows.")?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.row_count()) {
            return Err(Error::RowNotFound(format!(
                "index {bad} (matrix has {} rows)",
                self.row_count()
            )));
        }
        reject_duplicates(indices, "row")?;

        Ok(Self {
            label: self.label.clone(),
            matrix_x: self.matrix_x.select_rows(indices)?,
            matrix_y: self.matrix_y.select_rows(indices)?,
            row_labels: indices.iter().map(|&i| self.row_labels[i].clone()).collect(),
            column_labels_x: self.column_labels_x.clone(),
            column_labels_y: self.column_labels_y.clone(),
            finalized: false,
        })
    }

    /// Keep only the given rows, in place, in the order of `labels`.
    ///
    /// # Errors
    ///
    /// Same as [`select_rows`](Self::select_rows); nothing changes on error.
    pub fn keep_rows<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<()> {
        let kept = self.select_rows(labels)?;
        *self = kept;
        Ok(())
    }

    /// Delete one row from both `X` and `Y`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::RowNotFound`] if absent.
    pub fn delete_row(&mut self, label: &str) -> Result<()> {
        self.delete_rows_cols(&[label], &[] as &[&str], &[] as &[&str])
    }

    /// Delete the row at `index` from both `X` and `Y`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::RowNotFound`] if out of range.
    pub fn delete_row_at(&mut self, index: usize) -> Result<()> {
        self.ensure_mutable("Cannot delete any row.")?;
        let label = self
            .row_labels
            .get(index)
            .cloned()
            .ok_or_else(|| Error::RowNotFound(format!("index {index}")))?;
        self.delete_row(&label)
    }

    /// Delete several rows from both `X` and `Y`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::RowNotFound`] if any is absent.
    pub fn delete_rows<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<()> {
        self.delete_rows_cols(labels, &[] as &[&str], &[] as &[&str])
    }

    /// Delete one column of `X`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::LabelNotFound`] if absent.
    pub fn delete_column_x(&mut self, label: &str) -> Result<()> {
        self.delete_columns(Axis::X, &[label])
    }

    /// Delete one column of `Y`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::LabelNotFound`] if absent.
    pub fn delete_column_y(&mut self, label: &str) -> Result<()> {
        self.delete_columns(Axis::Y, &[label])
    }

    /// Delete several columns of `X`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::LabelNotFound`] if any is absent.
    pub fn delete_columns_x<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<()> {
        self.delete_columns(Axis::X, labels)
    }

    /// Delete several columns of `Y`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::LabelNotFound`] if any is absent.
    pub fn delete_columns_y<S: AsRef<str>>(&mut self, labels: &[S]) -> Result<()> {
        self.delete_columns(Axis::Y, labels)
    }

    /// Delete several columns of `X` or `Y`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, [`Error::LabelNotFound`] if any is absent.
    pub fn delete_columns<S: AsRef<str>>(&mut self, axis: Axis, labels: &[S]) -> Result<()> {
        let none: &[&str] = &[];
        match axis {
            Axis::X => self.delete_rows_cols(none, labels, none),
            Axis::Y => self.delete_rows_cols(none, none, labels),
        }
    }

    /// Delete rows, `X` columns and `Y` columns in one edit.
    ///
    /// Equivalent to deleting the rows, then the `X` columns, then the `Y`
    /// columns. All labels are resolved first: if any is missing or listed
    /// twice nothing is changed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if finalized, the lookup error of the first
    /// unknown label, or [`Error::InvalidInput`] for a repeated label.
    pub fn delete_rows_cols<R, CX, CY>(
        &mut self,
        rows: &[R],
        columns_x: &[CX],
        columns_y: &[CY],
    ) -> Result<()>
    where
        R: AsRef<str>,
        CX: AsRef<str>,
        CY: AsRef<str>,
    {
        self.ensure_mutable("Cannot delete rows or columns.")?;

        let row_positions = self.row_positions(rows)?;
        let x_positions = self.column_positions(Axis::X, columns_x)?;
        let y_positions = self.column_positions(Axis::Y, columns_y)?;
        reject_duplicates(&row_positions, "row")?;
        reject_duplicates(&x_positions, "X column")?;
        reject_duplicates(&y_positions, "Y column")?;

        let drop_rows = mask(self.row_count(), &row_positions);
        let drop_x = mask(self.column_count(Axis::X), &x_positions);
        let drop_y = mask(self.column_count(Axis::Y), &y_positions);

        let matrix_x = self.matrix_x.drop_masked(&drop_rows, &drop_x)?;
        let matrix_y = self.matrix_y.drop_masked(&drop_rows, &drop_y)?;

        debug!(
            matrix = %self.label,
            rows = rows.len(),
            columns_x = columns_x.len(),
            columns_y = columns_y.len(),
            "Deleting rows and columns"
        );

        self.matrix_x = matrix_x;
        self.matrix_y = matrix_y;
        retain_unmasked(&mut self.row_labels, &drop_rows);
        retain_unmasked(&mut self.column_labels_x, &drop_x);
        retain_unmasked(&mut self.column_labels_y, &drop_y);
        Ok(())
    }

    /// Freeze the matrix against structural edits.
    ///
    /// Explicitly stored zeros are removed from `X` and `Y`. Finalizing an
    /// already finalized matrix does nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.matrix_x.eliminate_zeros();
        self.matrix_y.eliminate_zeros();
        self.finalized = true;
        debug!(matrix = %self.label, "Finalized");
    }

    /// Allow structural edits again.
    pub fn unfinalize(&mut self) {
        self.finalized = false;
        debug!(matrix = %self.label, "Unfinalized");
    }

    /// Describe how `other` differs from `self`.
    #[must_use]
    pub fn diff(&self, other: &Self) -> MatrixDiff {
        MatrixDiff::compute(self, other)
    }

    /// Tolerant comparison of the matrix contents.
    ///
    /// True if `X` and `Y` have the same shapes and the same cell values,
    /// whatever zeros are stored explicitly. Labels are not compared; use
    /// `==` for that.
    #[must_use]
    pub fn sparse_equal(&self, other: &Self) -> bool {
        self.matrix_x.sparse_equal(&other.matrix_x) && self.matrix_y.sparse_equal(&other.matrix_y)
    }

    /// Persist into `folder/<label>/`, replacing any previous copy.
    ///
    /// Returns the directory the matrix was written to.
    ///
    /// # Errors
    ///
    /// Returns an I/O, Parquet or JSON error if writing fails.
    pub fn save(&self, folder: impl AsRef<Path>) -> Result<PathBuf> {
        crate::storage::save_matrix(self, folder.as_ref())
    }

    /// Read the matrix saved as `folder/<label>/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the files are missing or unreadable, or if the
    /// stored matrix violates the invariants.
    pub fn load(folder: impl AsRef<Path>, label: &str) -> Result<Self> {
        crate::storage::load_matrix(folder.as_ref(), label)
    }

    /// One-line shape summary.
    #[must_use]
    pub fn info(&self) -> String {
        format!(
            "{}: {} rows, X {} cols ({} nnz), Y {} cols ({} nnz){}",
            self.label,
            self.row_count(),
            self.column_count(Axis::X),
            self.matrix_x.nnz(),
            self.column_count(Axis::Y),
            self.matrix_y.nnz(),
            if self.finalized { ", finalized" } else { "" }
        )
    }

    fn ensure_mutable(&self, attempt: &str) -> Result<()> {
        if self.finalized {
            return Err(Error::InvalidState(format!(
                "DatasetMatrix '{}' already finalized. {attempt}",
                self.label
            )));
        }
        Ok(())
    }

    fn row_positions<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        let index = positions(&self.row_labels);
        labels
            .iter()
            .map(|l| {
                let l = l.as_ref();
                index
                    .get(l)
                    .copied()
                    .ok_or_else(|| Error::RowNotFound(l.to_string()))
            })
            .collect()
    }

    fn column_positions<S: AsRef<str>>(&self, axis: Axis, labels: &[S]) -> Result<Vec<usize>> {
        let index = positions(self.column_labels(axis));
        labels
            .iter()
            .map(|l| {
                let l = l.as_ref();
                index.get(l).copied().ok_or_else(|| Error::LabelNotFound {
                    axis: axis.to_string(),
                    label: l.to_string(),
                })
            })
            .collect()
    }
}

/// Exact equality: identical labels on every axis, in the same order, and
/// identical cell values in `X` and `Y`.
impl PartialEq for DatasetMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.row_labels == other.row_labels
            && self.column_labels_x == other.column_labels_x
            && self.column_labels_y == other.column_labels_y
            && self.sparse_equal(other)
    }
}

impl fmt::Display for DatasetMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.info())
    }
}

fn positions(labels: &[String]) -> HashMap<&str, usize> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect()
}

fn mask(len: usize, flagged: &[usize]) -> Vec<bool> {
    let mut mask = vec![false; len];
    for &i in flagged {
        mask[i] = true;
    }
    mask
}

fn retain_unmasked(labels: &mut Vec<String>, drop: &[bool]) {
    let mut i = 0;
    labels.retain(|_| {
        let keep = !drop[i];
        i += 1;
        keep
    });
}

fn check_unique(what: &str, labels: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label.as_str()) {
            return Err(Error::InvalidMatrix(format!("duplicate {what} label '{label}'")));
        }
    }
    Ok(())
}

fn reject_duplicates(positions: &[usize], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(positions.len());
    if positions.iter().any(|p| !seen.insert(*p)) {
        return Err(Error::InvalidInput(format!(
            "the same {what} is listed more than once"
        )));
    }
    Ok(())
}
