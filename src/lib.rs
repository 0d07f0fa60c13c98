//! # exds: Experimental Datasets for Feature Selection
//!
//! **Version**: 0.1.0
//!
//! exds prepares labeled, sparse, tabular datasets for feature-selection
//! experiments and manages their lifecycle on disk: build from a source,
//! deterministic train/test split, finalize, save, and reload by any number
//! of later processes.
//!
//! ## Design Principles
//!
//! - **Label alignment**: rows and columns are addressed by label; `X` and `Y`
//!   always share their rows
//! - **Freeze before sharing**: finalized matrices reject structural edits
//! - **Reproducible splits**: one seed in, one row partition out, on every
//!   platform
//! - **Write, publish, unlock**: a folder lock covers the whole build, so
//!   readers never see a half-written dataset
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use exds::definition::{ExperimentalDatasetDefinition, TrainingSubsetSize};
//! use exds::exds::{DatasetSource, Partition, RowSelection};
//! use exds::matrix::{DatasetMatrix, SparseMatrix};
//!
//! struct Tiny;
//!
//! impl DatasetSource for Tiny {
//!     fn create_dataset_matrix(
//!         &self,
//!         label: &str,
//!         _rows: &RowSelection,
//!         _configuration: &serde_json::Value,
//!     ) -> anyhow::Result<DatasetMatrix> {
//!         let x = SparseMatrix::from_dense(&[vec![1.0], vec![0.0], vec![1.0]])?;
//!         let y = SparseMatrix::from_dense(&[vec![0.0], vec![1.0], vec![1.0]])?;
//!         Ok(DatasetMatrix::new(
//!             label,
//!             x,
//!             y,
//!             vec!["a".into(), "b".into(), "c".into()],
//!             vec!["word".into()],
//!             vec!["topic".into()],
//!         )?)
//!     }
//! }
//!
//! let definition = ExperimentalDatasetDefinition::builder("/data/exds", "tiny")
//!     .random_seed(42)
//!     .training_subset_size(TrainingSubsetSize::Count(2))
//!     .build();
//!
//! let mut exds = definition.create_exds()?;
//! exds.run_build(&Tiny)?;
//!
//! // Later, in any process:
//! let mut reloaded = definition.exds();
//! reloaded.load()?;
//! println!("{}", reloaded.get_datasetmatrix(Partition::Train)?.info());
//! # Ok::<(), exds::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod definition;
pub mod error;
pub mod exds;
pub mod lock;
pub mod logging;
pub mod matrix;
pub mod storage;

pub use definition::{ExperimentalDatasetDefinition, TrainingSubsetSize};
pub use error::{Error, Phase, Result};
pub use exds::{DatasetSource, ExperimentalDataset, Partition};
pub use matrix::DatasetMatrix;
