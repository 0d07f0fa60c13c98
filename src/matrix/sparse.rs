//! Compressed sparse row (CSR) storage for `f64` matrices.

use crate::{Error, Result};

/// A sparse `f64` matrix in CSR layout.
///
/// Row `r` owns the entries `indptr[r]..indptr[r + 1]` of `indices`/`data`.
/// Column indices are strictly increasing within a row. Explicitly stored
/// zeros are allowed until [`eliminate_zeros`](Self::eliminate_zeros).
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

/// A sparse vector: a column (or row) of a [`SparseMatrix`].
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    len: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseVector {
    /// Logical length of the vector.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if the vector has logical length zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of stored entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Positions of stored entries, ascending.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Values of stored entries, aligned with [`indices`](Self::indices).
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value at position `i` (zero if not stored or out of range).
    #[must_use]
    pub fn get(&self, i: usize) -> f64 {
        self.indices
            .binary_search(&i)
            .map_or(0.0, |pos| self.values[pos])
    }

    /// Sum of all stored values.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Dense copy of the vector.
    #[must_use]
    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.len];
        for (&i, &v) in self.indices.iter().zip(&self.values) {
            dense[i] = v;
        }
        dense
    }
}

impl SparseMatrix {
    /// An all-zero matrix of the given shape.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            indptr: vec![0; rows + 1],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Build from `(row, col, value)` triplets.
    ///
    /// Duplicate coordinates are summed. Zero values are kept as explicit
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a coordinate lies outside the shape.
    pub fn from_triplets<I>(rows: usize, cols: usize, triplets: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut entries: Vec<(usize, usize, f64)> = triplets.into_iter().collect();
        if let Some(&(r, c, _)) = entries.iter().find(|&&(r, c, _)| r >= rows || c >= cols) {
            return Err(Error::InvalidInput(format!(
                "entry ({r}, {c}) outside matrix shape {rows}x{cols}"
            )));
        }
        entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut indptr = vec![0usize; rows + 1];
        let mut indices = Vec::with_capacity(entries.len());
        let mut data: Vec<f64> = Vec::with_capacity(entries.len());
        let mut last: Option<(usize, usize)> = None;
        for (r, c, v) in entries {
            if last == Some((r, c)) {
                if let Some(slot) = data.last_mut() {
                    *slot += v;
                }
                continue;
            }
            indices.push(c);
            data.push(v);
            indptr[r + 1] += 1;
            last = Some((r, c));
        }
        for r in 0..rows {
            indptr[r + 1] += indptr[r];
        }

        Ok(Self {
            rows,
            cols,
            indptr,
            indices,
            data,
        })
    }

    /// Build from dense rows, storing only non-zero values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the rows are ragged.
    pub fn from_dense(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut triplets = Vec::new();
        for (r, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::InvalidInput(format!(
                    "row {r} has {} values, expected {cols}",
                    row.len()
                )));
            }
            triplets.extend(
                row.iter()
                    .enumerate()
                    .filter(|&(_, &v)| v != 0.0)
                    .map(|(c, &v)| (r, c, v)),
            );
        }
        Self::from_triplets(rows.len(), cols, triplets)
    }

    /// Number of rows.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of stored entries, explicit zeros included.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Value at `(row, col)`; zero when not stored or out of range.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.rows {
            return 0.0;
        }
        let range = self.indptr[row]..self.indptr[row + 1];
        self.indices[range.clone()]
            .binary_search(&col)
            .map_or(0.0, |pos| self.data[range.start + pos])
    }

    /// Stored entries of one row as `(col, value)` pairs.
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = if row < self.rows {
            self.indptr[row]..self.indptr[row + 1]
        } else {
            0..0
        };
        self.indices[range.clone()]
            .iter()
            .copied()
            .zip(self.data[range].iter().copied())
    }

    /// All stored entries as `(row, col, value)`, in row-major order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.rows).flat_map(move |r| self.row_entries(r).map(move |(c, v)| (r, c, v)))
    }

    /// Extract one column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `col` is out of range.
    pub fn column(&self, col: usize) -> Result<SparseVector> {
        if col >= self.cols {
            return Err(Error::InvalidInput(format!(
                "column {col} out of range for {} columns",
                self.cols
            )));
        }
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for r in 0..self.rows {
            let range = self.indptr[r]..self.indptr[r + 1];
            if let Ok(pos) = self.indices[range.clone()].binary_search(&col) {
                indices.push(r);
                values.push(self.data[range.start + pos]);
            }
        }
        Ok(SparseVector {
            len: self.rows,
            indices,
            values,
        })
    }

    /// Sum of the stored values of every column.
    #[must_use]
    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.cols];
        for (&c, &v) in self.indices.iter().zip(&self.data) {
            sums[c] += v;
        }
        sums
    }

    /// New matrix made of the given rows, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an index is out of range.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        indptr.push(0);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        for &r in rows {
            if r >= self.rows {
                return Err(Error::InvalidInput(format!(
                    "row {r} out of range for {} rows",
                    self.rows
                )));
            }
            let range = self.indptr[r]..self.indptr[r + 1];
            indices.extend_from_slice(&self.indices[range.clone()]);
            data.extend_from_slice(&self.data[range]);
            indptr.push(indices.len());
        }
        Ok(Self {
            rows: rows.len(),
            cols: self.cols,
            indptr,
            indices,
            data,
        })
    }

    /// New matrix made of the given columns, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if an index is out of range.
    pub fn select_columns(&self, cols: &[usize]) -> Result<Self> {
        // old column -> positions in the new matrix (a column may be picked twice)
        let mut mapping: Vec<Vec<usize>> = vec![Vec::new(); self.cols];
        for (new, &old) in cols.iter().enumerate() {
            if old >= self.cols {
                return Err(Error::InvalidInput(format!(
                    "column {old} out of range for {} columns",
                    self.cols
                )));
            }
            mapping[old].push(new);
        }

        let mut triplets = Vec::new();
        for (r, c, v) in self.triplets() {
            triplets.extend(mapping[c].iter().map(|&new| (r, new, v)));
        }
        Self::from_triplets(self.rows, cols.len(), triplets)
    }

    /// New matrix without the rows and columns flagged in the masks.
    ///
    /// Surviving rows and columns keep their relative order; indices of
    /// both axes are renumbered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a mask length does not match the shape.
    pub fn drop_masked(&self, drop_rows: &[bool], drop_cols: &[bool]) -> Result<Self> {
        if drop_rows.len() != self.rows || drop_cols.len() != self.cols {
            return Err(Error::InvalidInput(format!(
                "mask shape {}x{} does not match matrix shape {}x{}",
                drop_rows.len(),
                drop_cols.len(),
                self.rows,
                self.cols
            )));
        }
        let new_col = renumber(drop_cols);
        let kept_rows = drop_rows.iter().filter(|&&d| !d).count();

        let mut indptr = Vec::with_capacity(kept_rows + 1);
        indptr.push(0);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        for r in (0..self.rows).filter(|&r| !drop_rows[r]) {
            for (c, v) in self.row_entries(r) {
                if let Some(nc) = new_col[c] {
                    indices.push(nc);
                    data.push(v);
                }
            }
            indptr.push(indices.len());
        }
        Ok(Self {
            rows: kept_rows,
            cols: new_col.iter().flatten().count(),
            indptr,
            indices,
            data,
        })
    }

    /// Remove explicitly stored zeros.
    pub fn eliminate_zeros(&mut self) {
        let mut indptr = Vec::with_capacity(self.rows + 1);
        indptr.push(0);
        let mut indices = Vec::with_capacity(self.indices.len());
        let mut data = Vec::with_capacity(self.data.len());
        for r in 0..self.rows {
            for k in self.indptr[r]..self.indptr[r + 1] {
                if self.data[k] != 0.0 {
                    indices.push(self.indices[k]);
                    data.push(self.data[k]);
                }
            }
            indptr.push(indices.len());
        }
        self.indptr = indptr;
        self.indices = indices;
        self.data = data;
    }

    /// Copy without explicitly stored zeros.
    #[must_use]
    pub fn without_zeros(&self) -> Self {
        let mut copy = self.clone();
        copy.eliminate_zeros();
        copy
    }

    /// Value-wise equality: same shape and `a[r, c] == b[r, c]` for every
    /// cell, regardless of which zeros happen to be stored explicitly.
    #[must_use]
    pub fn sparse_equal(&self, other: &Self) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        (0..self.rows).all(|r| {
            let mut left = self.row_entries(r).filter(|&(_, v)| v != 0.0);
            let mut right = other.row_entries(r).filter(|&(_, v)| v != 0.0);
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return true,
                    (Some((lc, lv)), Some((rc, rv))) if lc == rc && lv == rv => {}
                    _ => return false,
                }
            }
        })
    }

    /// Dense copy of the matrix, row-major.
    #[must_use]
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.cols]; self.rows];
        for (r, c, v) in self.triplets() {
            dense[r][c] = v;
        }
        dense
    }
}

/// Map each old index to its new position, or `None` if it is dropped.
fn renumber(drop: &[bool]) -> Vec<Option<usize>> {
    let mut next = 0;
    drop.iter()
        .map(|&d| {
            if d {
                None
            } else {
                next += 1;
                Some(next - 1)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SparseMatrix {
        SparseMatrix::from_dense(&[
            vec![1.0, 0.0, 2.0],
            vec![0.0, 0.0, 3.0],
            vec![4.0, 5.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_from_dense_stores_nonzeros_only() {
        let m = sample();
        assert_eq!(m.shape(), (3, 3));
        assert_eq!(m.nnz(), 5);
        assert_eq!(m.get(2, 1), 5.0);
        assert_eq!(m.get(1, 0), 0.0);
    }

    #[test]
    fn test_from_triplets_sums_duplicates() {
        let m = SparseMatrix::from_triplets(2, 2, vec![(0, 1, 1.5), (0, 1, 2.0), (1, 0, 1.0)])
            .unwrap();
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(0, 1), 3.5);
    }

    #[test]
    fn test_from_triplets_rejects_out_of_range() {
        let err = SparseMatrix::from_triplets(2, 2, vec![(2, 0, 1.0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_column_extraction() {
        let col = sample().column(2).unwrap();
        assert_eq!(col.len(), 3);
        assert_eq!(col.indices(), &[0, 1]);
        assert_eq!(col.to_dense(), vec![2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_select_rows_reorders() {
        let m = sample().select_rows(&[2, 0]).unwrap();
        assert_eq!(m.to_dense(), vec![vec![4.0, 5.0, 0.0], vec![1.0, 0.0, 2.0]]);
    }

    #[test]
    fn test_select_columns_reorders() {
        let m = sample().select_columns(&[2, 0]).unwrap();
        assert_eq!(
            m.to_dense(),
            vec![vec![2.0, 1.0], vec![3.0, 0.0], vec![0.0, 4.0]]
        );
    }

    #[test]
    fn test_drop_masked() {
        let m = sample()
            .drop_masked(&[false, true, false], &[false, true, false])
            .unwrap();
        assert_eq!(m.to_dense(), vec![vec![1.0, 2.0], vec![4.0, 0.0]]);
    }

    #[test]
    fn test_explicit_zeros_and_sparse_equal() {
        let explicit = SparseMatrix::from_triplets(2, 2, vec![(0, 0, 0.0), (1, 1, 7.0)]).unwrap();
        let implicit = SparseMatrix::from_triplets(2, 2, vec![(1, 1, 7.0)]).unwrap();
        assert_ne!(explicit, implicit);
        assert!(explicit.sparse_equal(&implicit));
        assert_eq!(explicit.without_zeros(), implicit);
    }

    #[test]
    fn test_column_sums() {
        assert_eq!(sample().column_sums(), vec![5.0, 5.0, 5.0]);
    }
}
