//! Composable record inputs over JSONL streams.
//!
//! A [`RecordInput`] is a factory of [`RecordReader`]s; readers are cursors
//! that many worker threads drain concurrently. Inputs compose as a strict
//! ownership tree: each decorator owns its child and hands out readers that
//! borrow from it for the duration of one pass.

mod cache;
mod file;
mod fold;

pub use cache::ShuffledCacheInput;
pub use file::FileInput;
pub use fold::FoldInput;

use std::sync::{Mutex, MutexGuard};

use crate::error::InputError;

/// Thread-shared cursor over a stream of text records.
///
/// All methods may be called concurrently. `read` returns a complete record
/// or `None` (the empty sentinel); it never splits a record across callers
/// and never hands the same record to two callers. `None` means "no data
/// available right now"; a worker that raced another worker for the last
/// record re-checks `at_end` rather than treating it as an error.
pub trait RecordReader: Send + Sync {
    fn read(&self) -> Option<String>;
    fn at_end(&self) -> bool;
}

/// Factory producing a fresh reader per pass.
pub trait RecordInput {
    fn create_reader(&mut self) -> Result<Box<dyn RecordReader + '_>, InputError>;
}

/// Lock a mutex, recovering the guard if a worker panicked while holding it.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
