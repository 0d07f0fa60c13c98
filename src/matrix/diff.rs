//! Structural comparison of two `DatasetMatrix` instances.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Axis, DatasetMatrix};

/// Differences between two label sequences, seen from `left` towards `right`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelDiff {
    /// Labels present only on the right.
    pub added: Vec<String>,
    /// Labels present only on the left.
    pub removed: Vec<String>,
    /// True if the shared labels appear in a different relative order.
    pub reordered: bool,
}

impl LabelDiff {
    pub(crate) fn between(left: &[String], right: &[String]) -> Self {
        let left_set: HashSet<&str> = left.iter().map(String::as_str).collect();
        let right_set: HashSet<&str> = right.iter().map(String::as_str).collect();

        let added = right
            .iter()
            .filter(|l| !left_set.contains(l.as_str()))
            .cloned()
            .collect();
        let removed = left
            .iter()
            .filter(|l| !right_set.contains(l.as_str()))
            .cloned()
            .collect();

        let shared_left = left.iter().filter(|l| right_set.contains(l.as_str()));
        let shared_right = right.iter().filter(|l| left_set.contains(l.as_str()));
        let reordered = !shared_left.eq(shared_right);

        Self {
            added,
            removed,
            reordered,
        }
    }

    /// True if both sequences are identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.reordered
    }
}

/// A cell whose value differs between the two matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMismatch {
    /// Matrix the cell belongs to.
    pub axis: Axis,
    /// Row label.
    pub row: String,
    /// Column label.
    pub column: String,
    /// Value on the left.
    pub left: f64,
    /// Value on the right.
    pub right: f64,
}

/// Result of [`DatasetMatrix::diff`].
///
/// Values are only compared for rows and columns present in both matrices,
/// matched by label rather than by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixDiff {
    /// Row label differences.
    pub rows: LabelDiff,
    /// Column label differences of X.
    pub columns_x: LabelDiff,
    /// Column label differences of Y.
    pub columns_y: LabelDiff,
    /// Cells with different values, X first, in row order of the left matrix.
    pub value_mismatches: Vec<CellMismatch>,
}

impl MatrixDiff {
    pub(crate) fn compute(left: &DatasetMatrix, right: &DatasetMatrix) -> Self {
        let mut value_mismatches = Vec::new();
        for axis in [Axis::X, Axis::Y] {
            collect_mismatches(left, right, axis, &mut value_mismatches);
        }
        Self {
            rows: LabelDiff::between(left.row_labels(), right.row_labels()),
            columns_x: LabelDiff::between(left.column_labels_x(), right.column_labels_x()),
            columns_y: LabelDiff::between(left.column_labels_y(), right.column_labels_y()),
            value_mismatches,
        }
    }

    /// True if no discrepancy of any kind was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
            && self.columns_x.is_empty()
            && self.columns_y.is_empty()
            && self.value_mismatches.is_empty()
    }

    /// Column label differences of one matrix.
    #[must_use]
    pub const fn columns(&self, axis: Axis) -> &LabelDiff {
        match axis {
            Axis::X => &self.columns_x,
            Axis::Y => &self.columns_y,
        }
    }
}

fn collect_mismatches(
    left: &DatasetMatrix,
    right: &DatasetMatrix,
    axis: Axis,
    out: &mut Vec<CellMismatch>,
) {
    let right_rows = positions(right.row_labels());
    let right_cols = positions(right.column_labels(axis));
    let left_cols = positions(left.column_labels(axis));
    let left_labels = left.column_labels(axis);
    let right_labels = right.column_labels(axis);
    let (lm, rm) = (left.matrix(axis), right.matrix(axis));

    for (lr, row_label) in left.row_labels().iter().enumerate() {
        let Some(&rr) = right_rows.get(row_label.as_str()) else {
            continue;
        };
        let mut seen = HashSet::new();
        for (lc, lv) in lm.row_entries(lr) {
            let column = &left_labels[lc];
            let Some(&rc) = right_cols.get(column.as_str()) else {
                continue;
            };
            seen.insert(rc);
            let rv = rm.get(rr, rc);
            if lv != rv {
                out.push(mismatch(axis, row_label, column, lv, rv));
            }
        }
        for (rc, rv) in rm.row_entries(rr) {
            if seen.contains(&rc) || rv == 0.0 {
                continue;
            }
            let column = &right_labels[rc];
            if left_cols.contains_key(column.as_str()) {
                out.push(mismatch(axis, row_label, column, 0.0, rv));
            }
        }
    }
}

fn positions(labels: &[String]) -> HashMap<&str, usize> {
    labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect()
}

fn mismatch(axis: Axis, row: &str, column: &str, left: f64, right: f64) -> CellMismatch {
    CellMismatch {
        axis,
        row: row.to_string(),
        column: column.to_string(),
        left,
        right,
    }
}

impl fmt::Display for MatrixDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no differences");
        }
        let sections = [
            ("rows", &self.rows),
            ("columns X", &self.columns_x),
            ("columns Y", &self.columns_y),
        ];
        for (name, diff) in sections {
            if !diff.added.is_empty() {
                writeln!(f, "{name} added: {}", diff.added.join(", "))?;
            }
            if !diff.removed.is_empty() {
                writeln!(f, "{name} removed: {}", diff.removed.join(", "))?;
            }
            if diff.reordered {
                writeln!(f, "{name} reordered")?;
            }
        }
        for m in &self.value_mismatches {
            writeln!(
                f,
                "{}[{}, {}]: {} != {}",
                m.axis, m.row, m.column, m.left, m.right
            )?;
        }
        Ok(())
    }
}
