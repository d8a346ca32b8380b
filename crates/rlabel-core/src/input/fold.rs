//! Fold selection for k-fold cross-validation.

use std::sync::Mutex;

use super::{RecordInput, RecordReader, lock_or_recover};
use crate::error::InputError;

/// Input that admits records of the underlying stream by position modulo
/// the fold count. For a given `(fold_id, fold_count)` the training split
/// and the held-out split partition the stream: a row lands in exactly one
/// of the two.
pub struct FoldInput<I> {
    underlying: I,
    fold_id: u32,
    fold_count: u32,
    training: bool,
}

impl<I: RecordInput> FoldInput<I> {
    pub fn new(underlying: I, fold_id: u32, fold_count: u32, training: bool) -> Self {
        debug_assert!(fold_count > 1 && fold_id < fold_count);
        Self { underlying, fold_id, fold_count, training }
    }
}

impl<I: RecordInput> RecordInput for FoldInput<I> {
    fn create_reader(&mut self) -> Result<Box<dyn RecordReader + '_>, InputError> {
        Ok(Box::new(FoldReader {
            inner: self.underlying.create_reader()?,
            fold_id: self.fold_id,
            fold_count: self.fold_count,
            training: self.training,
            row: Mutex::new(0),
        }))
    }
}

struct FoldReader<'a> {
    inner: Box<dyn RecordReader + 'a>,
    fold_id: u32,
    fold_count: u32,
    training: bool,
    row: Mutex<u64>,
}

impl FoldReader<'_> {
    fn admits(&self, row: u64) -> bool {
        let in_fold = row % self.fold_count as u64 == self.fold_id as u64;
        in_fold != self.training
    }
}

impl RecordReader for FoldReader<'_> {
    fn read(&self) -> Option<String> {
        // The row counter advances on every underlying read attempt,
        // including discarded ones, so both splits see the same positions.
        let mut row = lock_or_recover(&self.row);
        loop {
            *row += 1;
            if self.admits(*row) {
                return self.inner.read();
            }
            // Skipped row: consume and discard. At most fold_count - 1
            // rows are discarded before an admitted one, so exhaustion of
            // the underlying reader terminates the loop.
            let _ = self.inner.read();
        }
    }

    fn at_end(&self) -> bool {
        let _row = lock_or_recover(&self.row);
        self.inner.at_end()
    }
}
