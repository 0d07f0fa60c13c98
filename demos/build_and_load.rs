//! Build and Load Example
//!
//! Builds a small synthetic experimental dataset, splits it, saves it under
//! a temporary folder and reads it back the way a later experiment would.
//!
//! Run with: cargo run --example build_and_load
//! Set RUST_LOG=exds=debug to see every step.

use exds::definition::{ExperimentalDatasetDefinition, ProbabilityThresholds, TrainingSubsetSize};
use exds::exds::{Partition, RowSelection};
use exds::lock::LockStatus;
use exds::matrix::{DatasetMatrix, SparseMatrix};

/// Documents with three words each present with a fixed pattern, and one
/// topic set on every other document. `w_rare` is never set.
fn synthetic_corpus(
    label: &str,
    rows: &RowSelection,
    configuration: &serde_json::Value,
) -> anyhow::Result<DatasetMatrix> {
    let documents = configuration
        .get("documents")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(20);
    let selected: Vec<usize> = (0..usize::try_from(documents)?)
        .filter(|&i| rows.includes(i, &format!("doc{i}")))
        .collect();

    let mut x = Vec::new();
    let mut y = Vec::new();
    for (r, &doc) in selected.iter().enumerate() {
        for (c, modulus) in [2, 3, 5].into_iter().enumerate() {
            if doc % modulus == 0 {
                x.push((r, c, 1.0));
            }
        }
        if doc % 2 == 1 {
            y.push((r, 0, 1.0));
        }
    }

    Ok(DatasetMatrix::new(
        label,
        SparseMatrix::from_triplets(selected.len(), 4, x)?,
        SparseMatrix::from_triplets(selected.len(), 1, y)?,
        selected.iter().map(|i| format!("doc{i}")).collect(),
        vec![
            "w_even".to_string(),
            "w_three".to_string(),
            "w_five".to_string(),
            "w_rare".to_string(),
        ],
        vec!["topic_odd".to_string()],
    )?)
}

fn main() -> anyhow::Result<()> {
    exds::logging::init();
    println!("=== exds Build and Load ===\n");

    let workspace = tempfile::tempdir()?;

    // -------------------------------------------------------------------------
    // 1. Define the dataset
    // -------------------------------------------------------------------------
    println!("1. Defining dataset...");

    let definition = ExperimentalDatasetDefinition::builder(workspace.path(), "synthetic_corpus")
        .source_configuration(serde_json::json!({ "documents": 20 }))
        .random_seed(42)
        .training_subset_size(TrainingSubsetSize::Proportion(0.75))
        .trim_prob_features(ProbabilityThresholds::new(0.01, 1.0))
        .build();
    definition.validate()?;
    println!("   Folder: {}", definition.path().display());
    println!("   Lock:   {}", definition.get_lock().display());

    // -------------------------------------------------------------------------
    // 2. Build, split, finalize and save
    // -------------------------------------------------------------------------
    println!("\n2. Building...");

    let mut built = definition.create_exds()?;
    built.run_build(&synthetic_corpus)?;
    println!("{}", built.info());
    println!("   Lock after build: {}", definition.lock_status()?);

    // -------------------------------------------------------------------------
    // 3. Load from another definition instance
    // -------------------------------------------------------------------------
    println!("\n3. Loading...");

    let reader = ExperimentalDatasetDefinition::builder(workspace.path(), "synthetic_corpus")
        .random_seed(42)
        .build();
    let mut loaded = reader.exds();
    loaded.load()?;

    for which in [Partition::Full, Partition::Train, Partition::Test] {
        let same = loaded.get_datasetmatrix(which)? == built.get_datasetmatrix(which)?;
        println!("   {:<14} identical: {same}", which.label());
    }
    if let LockStatus::HeldByOther(sentinel) = reader.lock_status()? {
        println!("   Sealed by {}", sentinel.describe());
    }

    let train = loaded.get_datasetmatrix(Partition::Train)?;
    println!("\n   Training rows: {}", train.row_labels().join(", "));
    println!("   Features kept: {}", train.column_labels_x().join(", "));

    // -------------------------------------------------------------------------
    // 4. Clean up
    // -------------------------------------------------------------------------
    println!("\n4. Releasing the sealed folder...");
    definition.force_unlock_folder()?;
    definition.delete_folder()?;
    println!("   Folder exists: {}", definition.folder_exists());

    println!("\n=== Done ===");
    Ok(())
}
