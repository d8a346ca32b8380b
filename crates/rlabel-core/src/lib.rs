//! Training and evaluation engine for pairwise graph labeling models.
//!
//! The crate is organized around three layers:
//!
//! - [`input`]: composable record sources over JSONL streams (file,
//!   caching/shuffled replay, fold selection), all safe to drain from
//!   multiple worker threads through one shared reader.
//! - [`parallel`]: the per-pass execution model (one reader, N OS threads).
//! - [`trainer`] / [`evaluate`] / [`cv`]: the multi-pass structured-SVM
//!   control loop with rollback on regression, the prediction-vs-reference
//!   evaluation pass, and k-fold cross-validation on top of both.
//!
//! The model being trained is abstracted behind [`model::ScoringModel`];
//! [`pairwise::PairwiseModel`] is the concrete implementation shipped here.

pub mod cv;
pub mod error;
pub mod evaluate;
pub mod input;
pub mod model;
pub mod pairwise;
pub mod parallel;
pub mod stats;
pub mod trainer;
pub mod types;

pub use error::{InputError, ModelError};
pub use model::ScoringModel;
pub use pairwise::PairwiseModel;
pub use stats::PrecisionStats;
pub use types::TrainOptions;
