//! Contract between the training engine and the model being trained.

use serde_json::Value;

use crate::error::ModelError;
use crate::stats::PrecisionStats;

/// A structured scoring model drivable by the training/evaluation engine.
///
/// The engine shares one model instance across all worker threads of a
/// pass, so everything callable during a pass takes `&self`:
///
/// - [`ssvm_learn`](Self::ssvm_learn) must tolerate concurrent
///   unsynchronized invocation: in Hogwild mode, numeric parameter updates
///   from different workers may race and occasionally be lost.
/// - [`add_query`](Self::add_query) mutates structural state and must be
///   serialized by the caller; the engine wraps it in an explicit lock
///   around the whole callback body.
///
/// Everything taking `&mut self` is only called between passes, when the
/// engine holds the model exclusively.
pub trait ScoringModel: Send + Sync + Sized {
    type Query: Send + Sync;
    type Assignment: Send + Sync;
    type Snapshot;

    /// Build a query from the raw `"query"` value of one record.
    fn parse_query(&self, raw: &Value) -> Result<Self::Query, ModelError>;

    /// Build an assignment for `query` from the raw `"assign"` value.
    fn parse_assignment(
        &self,
        query: &Self::Query,
        raw: &Value,
    ) -> Result<Self::Assignment, ModelError>;

    /// Fold one training record into the model's structural state.
    /// Callers must hold an external lock across the call.
    fn add_query(&self, query: &Self::Query, assign: &Self::Assignment);

    /// Finalize/precompute state after structural mutation. Called once
    /// after the initial load and again after every training pass.
    fn prepare_for_inference(&mut self);

    /// Set the structured-SVM hyperparameters. Called once before the
    /// first training pass.
    fn ssvm_init(&mut self, regularization: f64, margin: f64);

    /// One structured-SVM gradient step against the shared parameters,
    /// accumulating per-label agreement into `stats`.
    fn ssvm_learn(
        &self,
        query: &Self::Query,
        assign: &Self::Assignment,
        learning_rate: f64,
        stats: &PrecisionStats,
    );

    /// Total score of `assign` under the current parameters.
    fn assignment_score(&self, assign: &Self::Assignment) -> f64;

    /// Fill in the best-scoring labels for the inferred positions.
    fn map_inference(&self, query: &Self::Query, assign: &mut Self::Assignment);

    /// Reset all inferred (non-given) labels.
    fn clear_inferred(&self, assign: &mut Self::Assignment);

    /// Count per-position agreement of `assign` against `reference` into
    /// `stats`. Must not mutate either assignment.
    fn compare_assignments(
        &self,
        assign: &Self::Assignment,
        reference: &Self::Assignment,
        stats: &PrecisionStats,
    );

    /// Deep copy of the trainable state, used as a rollback point.
    fn snapshot(&self) -> Self::Snapshot;

    /// Restore a snapshot taken before a rejected pass.
    fn restore(&mut self, snapshot: Self::Snapshot);

    /// Persist the model under `prefix`. A saved model must round-trip:
    /// scores and inference behave identically after `load`.
    fn save(&self, prefix: &str) -> Result<(), ModelError>;

    /// Load a model previously written by [`save`](Self::save).
    fn load(&mut self, prefix: &str) -> Result<(), ModelError>;
}
