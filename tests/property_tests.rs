//! Property-based tests for exds
//!
//! - Matrix edits keep rows, labels and values aligned
//! - Equality is insensitive to explicitly stored zeros
//! - The split is a deterministic partition of the rows
//! - Run with ProptestConfig::with_cases(100)

mod common;

use common::dense;
use exds::definition::TrainingSubsetSize;
use exds::exds::split_indices;
use exds::matrix::{Axis, DatasetMatrix, SparseMatrix};
use proptest::prelude::*;
use tempfile::tempdir;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Binary-ish cell values, zero-heavy like the datasets this crate stores.
fn arb_cell() -> impl Strategy<Value = f64> {
    prop_oneof![3 => Just(0.0), 2 => Just(1.0), 1 => Just(2.5)]
}

/// Dense `(X, Y)` rows with 1..8 rows, 1..5 features and 1..3 objectives.
fn arb_dense() -> impl Strategy<Value = (Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    (1usize..8, 1usize..5, 1usize..3).prop_flat_map(|(rows, features, objectives)| {
        (
            prop::collection::vec(prop::collection::vec(arb_cell(), features), rows),
            prop::collection::vec(prop::collection::vec(arb_cell(), objectives), rows),
        )
    })
}

fn arb_matrix() -> impl Strategy<Value = DatasetMatrix> {
    arb_dense().prop_map(|(x, y)| dense(&x, &y))
}

/// A matrix plus a mask for each of its rows, X columns and Y columns.
fn arb_matrix_with_masks() -> impl Strategy<Value = (DatasetMatrix, Vec<bool>, Vec<bool>, Vec<bool>)>
{
    arb_matrix().prop_flat_map(|m| {
        let rows = m.row_count();
        let cols_x = m.column_count(Axis::X);
        let cols_y = m.column_count(Axis::Y);
        (
            Just(m),
            prop::collection::vec(any::<bool>(), rows),
            prop::collection::vec(any::<bool>(), cols_x),
            prop::collection::vec(any::<bool>(), cols_y),
        )
    })
}

fn masked(labels: &[String], mask: &[bool]) -> Vec<String> {
    labels
        .iter()
        .zip(mask)
        .filter(|(_, keep)| **keep)
        .map(|(l, _)| l.clone())
        .collect()
}

/// Same cells as `m`, with an explicit zero stored in every empty `X` cell.
fn with_explicit_zeros(m: &DatasetMatrix) -> DatasetMatrix {
    let x = m.matrix_x();
    let triplets: Vec<_> = (0..x.rows())
        .flat_map(|r| (0..x.cols()).map(move |c| (r, c)))
        .map(|(r, c)| (r, c, x.get(r, c)))
        .collect();
    DatasetMatrix::new(
        m.label(),
        SparseMatrix::from_triplets(x.rows(), x.cols(), triplets).unwrap(),
        m.matrix_y().clone(),
        m.row_labels().to_vec(),
        m.column_labels_x().to_vec(),
        m.column_labels_y().to_vec(),
    )
    .unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ========================================================================
    // DatasetMatrix Properties
    // ========================================================================

    /// Property: selected rows carry their original values
    #[test]
    fn prop_select_rows_keeps_values((m, mask, _, _) in arb_matrix_with_masks()) {
        let mut wanted = masked(m.row_labels(), &mask);
        wanted.reverse();
        let selected = m.select_rows(&wanted).unwrap();

        prop_assert_eq!(selected.row_labels(), wanted.as_slice());
        prop_assert_eq!(selected.column_labels_x(), m.column_labels_x());
        for row in &wanted {
            for axis in [Axis::X, Axis::Y] {
                for col in m.column_labels(axis) {
                    prop_assert_eq!(
                        selected.value(axis, row, col).unwrap(),
                        m.value(axis, row, col).unwrap()
                    );
                }
            }
        }
    }

    /// Property: combined deletion equals deleting rows, then X, then Y
    #[test]
    fn prop_delete_rows_cols_matches_sequential(
        (m, rows, cols_x, cols_y) in arb_matrix_with_masks()
    ) {
        let rows = masked(m.row_labels(), &rows);
        let cols_x = masked(m.column_labels_x(), &cols_x);
        let cols_y = masked(m.column_labels_y(), &cols_y);

        let mut combined = m.clone();
        combined.delete_rows_cols(&rows, &cols_x, &cols_y).unwrap();

        let mut sequential = m.clone();
        sequential.delete_rows(&rows).unwrap();
        sequential.delete_columns_x(&cols_x).unwrap();
        sequential.delete_columns_y(&cols_y).unwrap();

        prop_assert_eq!(&combined, &sequential);
        prop_assert_eq!(combined.row_count(), m.row_count() - rows.len());
        prop_assert_eq!(combined.matrix_x().shape(), (combined.row_count(), combined.column_count(Axis::X)));
        prop_assert!(combined.check_invariants().is_ok());
    }

    /// Property: finalize freezes without changing contents, unfinalize thaws
    #[test]
    fn prop_finalize_cycle(m in arb_matrix()) {
        let mut frozen = with_explicit_zeros(&m);
        frozen.finalize();
        prop_assert_eq!(&frozen, &m);
        prop_assert_eq!(frozen.matrix_x().nnz(), m.matrix_x().nnz());
        prop_assert!(frozen.delete_row_at(0).is_err());

        frozen.unfinalize();
        prop_assert!(frozen.delete_row_at(0).is_ok());
        prop_assert_eq!(frozen.row_count(), m.row_count() - 1);
    }

    /// Property: sparse equality is reflexive, symmetric and ignores stored zeros
    #[test]
    fn prop_sparse_equal_laws(a in arb_matrix(), b in arb_matrix()) {
        let padded = with_explicit_zeros(&a);
        prop_assert!(a.sparse_equal(&a));
        prop_assert!(a.sparse_equal(&padded));
        prop_assert!(padded.sparse_equal(&a));
        prop_assert_eq!(a.sparse_equal(&b), b.sparse_equal(&a));
        if a == b {
            prop_assert!(a.sparse_equal(&b));
        }
    }

    // ========================================================================
    // Split Properties
    // ========================================================================

    /// Property: the split is a sorted partition of 0..total
    #[test]
    fn prop_split_partitions_rows(total in 0usize..200, k_frac in 0.0f64..=1.0, seed in any::<u64>()) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let k = (total as f64 * k_frac) as usize;
        let (train, test) = split_indices(total, TrainingSubsetSize::Count(k), seed).unwrap();

        prop_assert_eq!(train.len(), k);
        prop_assert_eq!(test.len(), total - k);
        prop_assert!(train.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(test.windows(2).all(|w| w[0] < w[1]));
        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        prop_assert_eq!(all, (0..total).collect::<Vec<_>>());
    }

    /// Property: same inputs, same split
    #[test]
    fn prop_split_is_deterministic(total in 1usize..200, p in 0.0f64..=1.0, seed in any::<u64>()) {
        let size = TrainingSubsetSize::Proportion(p);
        let first = split_indices(total, size, seed).unwrap();
        let second = split_indices(total, size, seed).unwrap();
        prop_assert_eq!(first, second);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: a saved matrix loads back equal and finalized
    #[test]
    fn prop_save_load_round_trip(m in arb_matrix()) {
        let dir = tempdir().unwrap();
        let mut m = m.with_label("dataset_train");
        m.finalize();
        m.save(dir.path()).unwrap();

        let loaded = DatasetMatrix::load(dir.path(), "dataset_train").unwrap();
        prop_assert_eq!(&loaded, &m);
        prop_assert!(loaded.is_finalized());
    }
}
