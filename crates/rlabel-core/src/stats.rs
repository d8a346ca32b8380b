//! Label-precision counters shared across worker threads and folds.

use std::sync::atomic::{AtomicU64, Ordering};

/// Correct/incorrect label counters for one training or evaluation pass.
///
/// Counters are relaxed atomics so Hogwild workers can accumulate into one
/// shared instance without a lock. Merging is associative and commutative,
/// so fold or thread completion order does not affect the aggregate.
#[derive(Debug, Default)]
pub struct PrecisionStats {
    correct_labels: AtomicU64,
    incorrect_labels: AtomicU64,
}

impl PrecisionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, correct: u64, incorrect: u64) {
        self.correct_labels.fetch_add(correct, Ordering::Relaxed);
        self.incorrect_labels.fetch_add(incorrect, Ordering::Relaxed);
    }

    pub fn merge(&self, other: &PrecisionStats) {
        self.record(other.correct(), other.incorrect());
    }

    pub fn correct(&self) -> u64 {
        self.correct_labels.load(Ordering::Relaxed)
    }

    pub fn incorrect(&self) -> u64 {
        self.incorrect_labels.load(Ordering::Relaxed)
    }

    /// Fraction of incorrect labels, or `None` when nothing was counted.
    ///
    /// The `None` case must be handled explicitly by callers; a 0/0 pass
    /// must never feed NaN into an accept-or-revert decision.
    pub fn error_rate(&self) -> Option<f64> {
        let correct = self.correct();
        let incorrect = self.incorrect();
        let total = correct + incorrect;
        if total == 0 {
            return None;
        }
        Some(incorrect as f64 / total as f64)
    }
}
