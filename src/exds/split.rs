//! Seeded train/test partition of row positions

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::definition::TrainingSubsetSize;
use crate::{Error, Result};

/// File recording the split inside the dataset folder.
pub const SPLIT_FILE: &str = "split.json";

/// Partition `0..total` into sorted training and test positions.
///
/// The positions are shuffled with a descending Fisher–Yates pass driven by
/// `ChaCha8Rng::seed_from_u64(seed)`: for `i` from `total - 1` down to `1`,
/// `j = (next_u64() * (i + 1)) >> 64` on a 128-bit product, then swap `i`
/// and `j`. The first `k` shuffled positions are the training rows.
/// The result only depends on `total`, `size` and `seed`.
///
/// # Errors
///
/// [`Error::InvalidInput`] if a count exceeds `total`.
pub fn split_indices(
    total: usize,
    size: TrainingSubsetSize,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let k = size.training_count(total).ok_or_else(|| {
        Error::InvalidInput(format!(
            "training subset size {size:?} exceeds the {total} available rows"
        ))
    })?;

    let mut order: Vec<usize> = (0..total).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for i in (1..total).rev() {
        let x = u128::from(rng.next_u64());
        #[allow(clippy::cast_possible_truncation)]
        let j = ((x * (i as u128 + 1)) >> 64) as usize;
        order.swap(i, j);
    }

    let mut test = order.split_off(k);
    let mut train = order;
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// What a build split, saved next to the matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRecord {
    /// Seed actually used.
    pub seed: u64,
    /// Requested training size.
    pub training_subset_size: TrainingSubsetSize,
    /// Rows of the full matrix.
    pub total_row_count: usize,
    /// Training row labels, in matrix order.
    pub train_rows: Vec<String>,
    /// Test row labels, in matrix order.
    pub test_rows: Vec<String>,
    /// When the split was made.
    pub created_at: DateTime<Utc>,
}
