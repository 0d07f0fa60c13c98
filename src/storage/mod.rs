//! Persistence of `DatasetMatrix` instances (Arrow/Parquet)
//!
//! Layout of one saved matrix:
//!
//! ```text
//! <folder>/<label>/
//!     manifest.json   labels of all axes, finalized flag, format version
//!     X.parquet       COO triplets of X: row u64, col u64, value f64
//!     Y.parquet       COO triplets of Y
//! ```
//!
//! Only stored entries are written; shapes follow from the label counts in
//! the manifest. A matrix is written into a hidden staging directory next to
//! its final location and renamed into place afterwards, so a reader never
//! sees a half-written matrix under `<folder>/<label>/`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, Float64Array, RecordBatch, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::matrix::{DatasetMatrix, SparseMatrix};
use crate::{Error, Result};

/// Version of the on-disk layout written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Manifest file name inside a matrix folder.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Parquet file holding the triplets of `X`.
pub const X_FILE: &str = "X.parquet";

/// Parquet file holding the triplets of `Y`.
pub const Y_FILE: &str = "Y.parquet";

/// Everything about a saved matrix except its cell values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixManifest {
    /// Layout version, see [`FORMAT_VERSION`].
    pub format_version: u32,
    /// Matrix label (also the folder name).
    pub label: String,
    /// Row labels, in row order.
    pub row_labels: Vec<String>,
    /// Column labels of `X`.
    pub column_labels_x: Vec<String>,
    /// Column labels of `Y`.
    pub column_labels_y: Vec<String>,
    /// Whether the matrix was finalized when saved.
    pub finalized: bool,
    /// Stored entries of `X`.
    pub nnz_x: usize,
    /// Stored entries of `Y`.
    pub nnz_y: usize,
    /// When the matrix was written.
    pub saved_at: DateTime<Utc>,
}

/// Folder a matrix with `label` is saved to under `folder`.
#[must_use]
pub fn matrix_dir(folder: &Path, label: &str) -> PathBuf {
    folder.join(label)
}

/// True if `folder` contains a saved matrix named `label`.
#[must_use]
pub fn matrix_exists(folder: &Path, label: &str) -> bool {
    matrix_dir(folder, label).join(MANIFEST_FILE).is_file()
}

/// Read only the manifest of a saved matrix.
///
/// # Errors
///
/// Returns error if the manifest is missing or malformed.
pub fn read_manifest(folder: &Path, label: &str) -> Result<MatrixManifest> {
    let path = matrix_dir(folder, label).join(MANIFEST_FILE);
    let file = File::open(&path).map_err(|e| {
        Error::StorageError(format!("Failed to open manifest {}: {e}", path.display()))
    })?;
    let manifest: MatrixManifest = serde_json::from_reader(file)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::StorageError(format!(
            "Unsupported format version {} in {} (expected {FORMAT_VERSION})",
            manifest.format_version,
            path.display()
        )));
    }
    Ok(manifest)
}

pub(crate) fn save_matrix(matrix: &DatasetMatrix, folder: &Path) -> Result<PathBuf> {
    fs::create_dir_all(folder)?;
    let target = matrix_dir(folder, matrix.label());
    let staging = folder.join(format!(".{}.staging-{}", matrix.label(), std::process::id()));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    write_triplets(&staging.join(X_FILE), matrix.matrix_x())?;
    write_triplets(&staging.join(Y_FILE), matrix.matrix_y())?;

    let manifest = MatrixManifest {
        format_version: FORMAT_VERSION,
        label: matrix.label().to_string(),
        row_labels: matrix.row_labels().to_vec(),
        column_labels_x: matrix.column_labels_x().to_vec(),
        column_labels_y: matrix.column_labels_y().to_vec(),
        finalized: matrix.is_finalized(),
        nnz_x: matrix.matrix_x().nnz(),
        nnz_y: matrix.matrix_y().nnz(),
        saved_at: Utc::now(),
    };
    let file = File::create(staging.join(MANIFEST_FILE))?;
    serde_json::to_writer_pretty(&file, &manifest)?;
    file.sync_all()?;

    publish(&staging, &target)?;
    info!(
        matrix = matrix.label(),
        path = %target.display(),
        rows = matrix.row_count(),
        "Saved dataset matrix"
    );
    Ok(target)
}

pub(crate) fn load_matrix(folder: &Path, label: &str) -> Result<DatasetMatrix> {
    let dir = matrix_dir(folder, label);
    if !dir.is_dir() {
        return Err(Error::StorageError(format!(
            "No saved matrix '{label}' in {}",
            folder.display()
        )));
    }
    let manifest = read_manifest(folder, label)?;
    let rows = manifest.row_labels.len();

    let x = read_sparse(&dir.join(X_FILE), rows, manifest.column_labels_x.len())?;
    let y = read_sparse(&dir.join(Y_FILE), rows, manifest.column_labels_y.len())?;
    if x.nnz() != manifest.nnz_x || y.nnz() != manifest.nnz_y {
        return Err(Error::StorageError(format!(
            "Entry count of '{label}' does not match its manifest"
        )));
    }

    let matrix = DatasetMatrix::new(
        manifest.label,
        x,
        y,
        manifest.row_labels,
        manifest.column_labels_x,
        manifest.column_labels_y,
    )?
    .with_finalized(manifest.finalized);
    debug!(matrix = label, path = %dir.display(), "Loaded dataset matrix");
    Ok(matrix)
}

/// Move a fully written staging directory to `target`, replacing it.
fn publish(staging: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        let mut retired = target.as_os_str().to_owned();
        retired.push(format!(".retired-{}", std::process::id()));
        let retired = PathBuf::from(retired);
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        fs::rename(target, &retired)?;
        fs::rename(staging, target)?;
        fs::remove_dir_all(&retired)?;
    } else {
        fs::rename(staging, target)?;
    }
    Ok(())
}

fn triplet_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("row", DataType::UInt64, false),
        Field::new("col", DataType::UInt64, false),
        Field::new("value", DataType::Float64, false),
    ]))
}

fn write_triplets(path: &Path, matrix: &SparseMatrix) -> Result<()> {
    let mut rows = Vec::with_capacity(matrix.nnz());
    let mut cols = Vec::with_capacity(matrix.nnz());
    let mut values = Vec::with_capacity(matrix.nnz());
    for (r, c, v) in matrix.triplets() {
        rows.push(r as u64);
        cols.push(c as u64);
        values.push(v);
    }

    let schema = triplet_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(UInt64Array::from(rows)),
            Arc::new(UInt64Array::from(cols)),
            Arc::new(Float64Array::from(values)),
        ],
    )?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file.try_clone()?, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    file.sync_all()?;
    Ok(())
}

fn read_sparse(path: &Path, rows: usize, cols: usize) -> Result<SparseMatrix> {
    let file = File::open(path).map_err(|e| {
        Error::StorageError(format!("Failed to open Parquet file {}: {e}", path.display()))
    })?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
        Error::StorageError(format!("Failed to parse Parquet file: {e}"))
    })?;

    let reader = builder.build().map_err(|e| {
        Error::StorageError(format!("Failed to create Parquet reader: {e}"))
    })?;

    let mut triplets = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| {
            Error::StorageError(format!("Failed to read record batch: {e}"))
        })?;
        let row = u64_column(&batch, 0)?;
        let col = u64_column(&batch, 1)?;
        let value = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::StorageError("Column 'value' is not Float64".to_string()))?;
        for i in 0..batch.num_rows() {
            triplets.push((to_index(row.value(i))?, to_index(col.value(i))?, value.value(i)));
        }
    }

    SparseMatrix::from_triplets(rows, cols, triplets).map_err(|e| {
        Error::InvalidMatrix(format!("{} does not fit its labels: {e}", path.display()))
    })
}

fn u64_column(batch: &RecordBatch, index: usize) -> Result<&UInt64Array> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| Error::StorageError(format!("Column {index} is not UInt64")))
}

fn to_index(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::StorageError(format!("Index {value} does not fit in usize")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(label: &str) -> DatasetMatrix {
        let x = SparseMatrix::from_dense(&[vec![1.0, 0.0, 0.5], vec![0.0, 2.0, 0.0]]).unwrap();
        let y = SparseMatrix::from_dense(&[vec![0.0], vec![1.0]]).unwrap();
        DatasetMatrix::new(
            label,
            x,
            y,
            vec!["a".into(), "b".into()],
            vec!["f0".into(), "f1".into(), "f2".into()],
            vec!["t0".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_save_creates_layout() {
        let dir = tempdir().unwrap();
        let mut m = sample("dataset");
        m.finalize();
        let path = m.save(dir.path()).unwrap();

        assert_eq!(path, dir.path().join("dataset"));
        assert!(path.join(MANIFEST_FILE).is_file());
        assert!(path.join(X_FILE).is_file());
        assert!(path.join(Y_FILE).is_file());
        assert!(matrix_exists(dir.path(), "dataset"));

        let manifest = read_manifest(dir.path(), "dataset").unwrap();
        assert!(manifest.finalized);
        assert_eq!(manifest.nnz_x, 3);
    }

    #[test]
    fn test_round_trip_keeps_flag() {
        let dir = tempdir().unwrap();
        let m = sample("draft");
        m.save(dir.path()).unwrap();
        let loaded = DatasetMatrix::load(dir.path(), "draft").unwrap();
        assert_eq!(loaded, m);
        assert!(!loaded.is_finalized());
        assert_eq!(loaded.label(), "draft");
    }

    #[test]
    fn test_save_replaces_previous_copy() {
        let dir = tempdir().unwrap();
        let mut m = sample("dataset");
        m.save(dir.path()).unwrap();
        m.delete_column_x("f0").unwrap();
        m.save(dir.path()).unwrap();

        let loaded = DatasetMatrix::load(dir.path(), "dataset").unwrap();
        assert_eq!(loaded.column_labels_x(), &["f1", "f2"]);
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_load_missing_matrix() {
        let dir = tempdir().unwrap();
        let err = DatasetMatrix::load(dir.path(), "nothing").unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
    }

    #[test]
    fn test_load_rejects_tampered_manifest() {
        let dir = tempdir().unwrap();
        sample("dataset").save(dir.path()).unwrap();

        let mut manifest = read_manifest(dir.path(), "dataset").unwrap();
        manifest.row_labels.pop();
        let file = File::create(dir.path().join("dataset").join(MANIFEST_FILE)).unwrap();
        serde_json::to_writer(file, &manifest).unwrap();

        let err = DatasetMatrix::load(dir.path(), "dataset").unwrap_err();
        assert!(matches!(err, Error::InvalidMatrix(_)));
    }
}
