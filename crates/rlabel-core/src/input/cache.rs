//! Capture-then-shuffled-replay input.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::{RecordInput, RecordReader, lock_or_recover};
use crate::error::InputError;

/// Input whose first reader streams the underlying records while capturing
/// them in memory. Every later reader replays the captured records in a
/// freshly shuffled order, so each training pass after the first sees the
/// same data in a different random order without touching the file again.
///
/// The shuffle RNG is owned and seeded explicitly so replay order is
/// reproducible for a given seed.
///
/// Concurrency contract: a created reader may be drained by many threads,
/// but only one reader may be outstanding at a time. The first reader must
/// be driven to exhaustion before the next one is requested, otherwise the
/// capture is incomplete. This is a caller obligation, not enforced here.
pub struct ShuffledCacheInput<I> {
    underlying: I,
    cache: Mutex<Vec<String>>,
    has_recorded: bool,
    rng: ChaCha8Rng,
}

impl<I: RecordInput> ShuffledCacheInput<I> {
    pub fn new(underlying: I, seed: u64) -> Self {
        Self {
            underlying,
            cache: Mutex::new(Vec::new()),
            has_recorded: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl<I: RecordInput> RecordInput for ShuffledCacheInput<I> {
    fn create_reader(&mut self) -> Result<Box<dyn RecordReader + '_>, InputError> {
        let Self { underlying, cache, has_recorded, rng } = self;
        if !*has_recorded {
            *has_recorded = true;
            let inner = underlying.create_reader()?;
            return Ok(Box::new(CachingReader { inner, log: cache }));
        }

        let log = lock_into_mut(cache);
        log.shuffle(rng);
        Ok(Box::new(ReplayReader { log: &*log, pos: AtomicUsize::new(0) }))
    }
}

fn lock_into_mut<T>(mutex: &mut Mutex<T>) -> &mut T {
    match mutex.get_mut() {
        Ok(v) => v,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Recording pass-through reader. Reads are served by the underlying
/// reader; the append is the only part under this reader's lock, so callers
/// are not serialized beyond what the underlying cursor already enforces.
struct CachingReader<'a> {
    inner: Box<dyn RecordReader + 'a>,
    log: &'a Mutex<Vec<String>>,
}

impl RecordReader for CachingReader<'_> {
    fn read(&self) -> Option<String> {
        let record = self.inner.read();
        if let Some(ref s) = record {
            lock_or_recover(self.log).push(s.clone());
        }
        record
    }

    fn at_end(&self) -> bool {
        self.inner.at_end()
    }
}

/// Replay over a captured (shuffled) snapshot. The cursor is a single
/// atomic fetch-add, so each position is handed to exactly one caller.
struct ReplayReader<'a> {
    log: &'a [String],
    pos: AtomicUsize,
}

impl RecordReader for ReplayReader<'_> {
    fn read(&self) -> Option<String> {
        let idx = self.pos.fetch_add(1, Ordering::Relaxed);
        self.log.get(idx).cloned()
    }

    fn at_end(&self) -> bool {
        self.pos.load(Ordering::Relaxed) >= self.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecInput(Vec<String>);

    impl RecordInput for VecInput {
        fn create_reader(&mut self) -> Result<Box<dyn RecordReader + '_>, InputError> {
            Ok(Box::new(ReplayReader { log: &self.0, pos: AtomicUsize::new(0) }))
        }
    }

    fn records(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("rec-{i}")).collect()
    }

    fn drain(reader: &dyn RecordReader) -> Vec<String> {
        let mut out = Vec::new();
        while !reader.at_end() {
            if let Some(rec) = reader.read() {
                out.push(rec);
            }
        }
        out
    }

    #[test]
    fn first_reader_passes_through_in_order() {
        let mut input = ShuffledCacheInput::new(VecInput(records(5)), 7);
        let first = drain(&*input.create_reader().unwrap());
        assert_eq!(first, records(5));
    }

    #[test]
    fn replays_are_permutations_of_the_capture() {
        let mut input = ShuffledCacheInput::new(VecInput(records(32)), 7);
        let captured = drain(&*input.create_reader().unwrap());

        for _ in 0..3 {
            let mut replay = drain(&*input.create_reader().unwrap());
            assert_eq!(replay.len(), captured.len());
            let mut expected = captured.clone();
            expected.sort();
            replay.sort();
            assert_eq!(replay, expected);
        }
    }

    #[test]
    fn shuffle_actually_reorders() {
        let mut input = ShuffledCacheInput::new(VecInput(records(64)), 7);
        let captured = drain(&*input.create_reader().unwrap());
        let replay = drain(&*input.create_reader().unwrap());
        // With 64 records, an identity shuffle from ChaCha8 would be
        // astronomically unlikely; a mismatch proves the reorder happened.
        assert_ne!(replay, captured);
    }

    #[test]
    fn same_seed_gives_same_replay_order() {
        let run = |seed: u64| {
            let mut input = ShuffledCacheInput::new(VecInput(records(16)), seed);
            drain(&*input.create_reader().unwrap());
            drain(&*input.create_reader().unwrap())
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn replay_reader_hands_each_position_once() {
        let data = records(500);
        let reader = ReplayReader { log: &data, pos: AtomicUsize::new(0) };
        let chunks: Vec<Vec<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| drain(&reader))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let mut all: Vec<String> = chunks.into_iter().flatten().collect();
        all.sort();
        let mut expected = data.clone();
        expected.sort();
        assert_eq!(all, expected);
    }
}
