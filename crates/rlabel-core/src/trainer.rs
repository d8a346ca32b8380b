//! Multi-pass structured-SVM training loop with rollback on regression.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::InputError;
use crate::input::RecordInput;
use crate::model::ScoringModel;
use crate::parallel::for_each_record;
use crate::stats::PrecisionStats;
use crate::types::TrainOptions;

/// Build the model's structural state from the training data, then
/// finalize it for inference.
///
/// `add_query` mutates shared structure, so the callback body runs under
/// one explicit lock. Unlike the learning step, this phase must not race.
pub fn init_model<I, M>(input: &mut I, model: &mut M, opts: &TrainOptions) -> Result<(), InputError>
where
    I: RecordInput + ?Sized,
    M: ScoringModel,
{
    let count = AtomicU64::new(0);
    let add_lock = Mutex::new(());
    {
        let model: &M = model;
        for_each_record(input, &opts.exec(), |raw_query, raw_assign| {
            let (query, assign) = match parse_record(model, raw_query, raw_assign) {
                Some(parsed) => parsed,
                None => return,
            };
            let _guard = add_lock.lock().unwrap_or_else(|p| p.into_inner());
            model.add_query(&query, &assign);
            count.fetch_add(1, Ordering::Relaxed);
        })?;
    }
    log::info!("loaded {} training data samples", count.load(Ordering::Relaxed));
    model.prepare_for_inference();
    Ok(())
}

/// Run the adaptive training loop.
///
/// Per pass: snapshot the model, run one (optionally Hogwild-parallel)
/// learning pass, then accept or revert. A pass whose error rate regresses
/// is rolled back and retried at half the learning rate; once the rate
/// decays below the stop threshold, training ends with the last accepted
/// model. Improvement or a tie keeps the pass.
pub fn train<I, M>(input: &mut I, model: &mut M, opts: &TrainOptions) -> Result<(), InputError>
where
    I: RecordInput + ?Sized,
    M: ScoringModel,
{
    model.ssvm_init(opts.regularization, opts.svm_margin);
    let mut learning_rate = opts.start_learning_rate;
    let mut last_error_rate = 1.0f64;
    log::info!(
        "starting training with start_learning_rate={}, regularization={} and svm_margin={}",
        opts.start_learning_rate,
        opts.regularization,
        opts.svm_margin
    );

    for pass in 0..opts.num_passes {
        let backup = model.snapshot();
        let stats = PrecisionStats::new();
        let started = Instant::now();
        {
            let model: &M = model;
            for_each_record(input, &opts.exec(), |raw_query, raw_assign| {
                let (query, assign) = match parse_record(model, raw_query, raw_assign) {
                    Some(parsed) => parsed,
                    None => return,
                };
                model.ssvm_learn(&query, &assign, learning_rate, &stats);
            })?;
        }
        log::info!("training pass took {}ms", started.elapsed().as_millis());
        log::info!("correct {} vs {} incorrect labels", stats.correct(), stats.incorrect());

        match stats.error_rate() {
            Some(error_rate) => {
                log::info!(
                    "pass {pass} with learning rate {learning_rate} has error rate of {error_rate}"
                );
                if error_rate > last_error_rate {
                    log::info!("reverting last pass");
                    learning_rate *= 0.5;
                    model.restore(backup);
                    if learning_rate < opts.stop_learning_rate {
                        // The restored snapshot was already prepared before
                        // this rejected pass.
                        break;
                    }
                } else {
                    last_error_rate = error_rate;
                }
            }
            None => {
                // No labeled records in this pass; nothing to compare, so
                // keep the pass rather than divide by zero.
                log::warn!("pass {pass} produced no labeled records");
            }
        }
        model.prepare_for_inference();
    }
    Ok(())
}

pub(crate) fn parse_record<M: ScoringModel>(
    model: &M,
    raw_query: &serde_json::Value,
    raw_assign: &serde_json::Value,
) -> Option<(M::Query, M::Assignment)> {
    let query = match model.parse_query(raw_query) {
        Ok(q) => q,
        Err(e) => {
            log::warn!("skipping record: {e}");
            return None;
        }
    };
    let assign = match model.parse_assignment(&query, raw_assign) {
        Ok(a) => a,
        Err(e) => {
            log::warn!("skipping record: {e}");
            return None;
        }
    };
    Some((query, assign))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::input::{RecordReader, lock_or_recover};
    use serde_json::Value;
    use std::sync::Mutex;

    /// Input yielding `{"query": null, "assign": null}` records.
    struct CountedInput {
        records: usize,
    }

    struct CountedReader {
        remaining: Mutex<usize>,
    }

    impl RecordInput for CountedInput {
        fn create_reader(&mut self) -> Result<Box<dyn RecordReader + '_>, InputError> {
            Ok(Box::new(CountedReader { remaining: Mutex::new(self.records) }))
        }
    }

    impl RecordReader for CountedReader {
        fn read(&self) -> Option<String> {
            let mut remaining = lock_or_recover(&self.remaining);
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
            Some("{\"query\": null, \"assign\": null}".to_string())
        }

        fn at_end(&self) -> bool {
            *lock_or_recover(&self.remaining) == 0
        }
    }

    /// Scripted model double: each learning pass reports the next error
    /// profile from the script, and the "trainable state" is one counter
    /// bumped per pass so rollbacks are observable.
    struct ScriptedModel {
        // (correct, incorrect) per upcoming pass
        script: Mutex<Vec<(u64, u64)>>,
        version: AtomicU64,
        learning_rates: Mutex<Vec<f64>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<(u64, u64)>) -> Self {
            Self {
                script: Mutex::new(script),
                version: AtomicU64::new(0),
                learning_rates: Mutex::new(Vec::new()),
            }
        }

        fn version(&self) -> u64 {
            self.version.load(Ordering::Relaxed)
        }
    }

    impl ScoringModel for ScriptedModel {
        type Query = ();
        type Assignment = ();
        type Snapshot = u64;

        fn parse_query(&self, _raw: &Value) -> Result<(), ModelError> {
            Ok(())
        }

        fn parse_assignment(&self, _q: &(), _raw: &Value) -> Result<(), ModelError> {
            Ok(())
        }

        fn add_query(&self, _q: &(), _a: &()) {}
        fn prepare_for_inference(&mut self) {}
        fn ssvm_init(&mut self, _reg: f64, _margin: f64) {}

        fn ssvm_learn(&self, _q: &(), _a: &(), learning_rate: f64, stats: &PrecisionStats) {
            // One record per pass drives the scripted outcome.
            let (correct, incorrect) = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() { (1, 0) } else { script.remove(0) }
            };
            stats.record(correct, incorrect);
            self.version.fetch_add(1, Ordering::Relaxed);
            self.learning_rates.lock().unwrap().push(learning_rate);
        }

        fn assignment_score(&self, _a: &()) -> f64 {
            self.version() as f64
        }

        fn map_inference(&self, _q: &(), _a: &mut ()) {}
        fn clear_inferred(&self, _a: &mut ()) {}
        fn compare_assignments(&self, _a: &(), _r: &(), _stats: &PrecisionStats) {}

        fn snapshot(&self) -> u64 {
            self.version()
        }

        fn restore(&mut self, snapshot: u64) {
            self.version.store(snapshot, Ordering::Relaxed);
        }

        fn save(&self, _prefix: &str) -> Result<(), ModelError> {
            Ok(())
        }

        fn load(&mut self, _prefix: &str) -> Result<(), ModelError> {
            Ok(())
        }
    }

    fn serial_opts(passes: u32) -> TrainOptions {
        TrainOptions {
            parallel: false,
            num_threads: 1,
            num_passes: passes,
            ..TrainOptions::default()
        }
    }

    #[test]
    fn regression_rolls_back_and_halves_the_rate() {
        // Pass 0 improves (25% error), pass 1 regresses (50%), pass 2
        // runs at half the rate.
        let mut model = ScriptedModel::new(vec![(3, 1), (1, 1), (1, 1)]);
        let mut input = CountedInput { records: 1 };
        train(&mut input, &mut model, &serial_opts(3)).unwrap();

        let rates = model.learning_rates.lock().unwrap().clone();
        assert_eq!(rates, vec![0.1, 0.1, 0.05]);
        // Pass 1's mutation (version 2) was rolled back to pass 0's state;
        // pass 2 regressed against 25% again and was rolled back too.
        assert_eq!(model.version(), 1);
    }

    #[test]
    fn rate_floor_stops_training_on_restored_model() {
        let mut model = ScriptedModel::new(vec![(3, 1), (1, 1)]);
        let mut input = CountedInput { records: 1 };
        let opts = TrainOptions {
            // First regression halves 0.1 to 0.05, below the floor.
            stop_learning_rate: 0.06,
            ..serial_opts(10)
        };
        train(&mut input, &mut model, &opts).unwrap();

        let rates = model.learning_rates.lock().unwrap().clone();
        assert_eq!(rates, vec![0.1, 0.1]);
        // The rejected pass was rolled back before stopping.
        assert_eq!(model.version(), 1);
    }

    #[test]
    fn tie_is_accepted() {
        let mut model = ScriptedModel::new(vec![(1, 1), (1, 1), (1, 1)]);
        let mut input = CountedInput { records: 1 };
        train(&mut input, &mut model, &serial_opts(3)).unwrap();
        let rates = model.learning_rates.lock().unwrap().clone();
        assert_eq!(rates, vec![0.1, 0.1, 0.1]);
        assert_eq!(model.version(), 3);
    }

    #[test]
    fn empty_pass_keeps_model_and_rate() {
        let mut model = ScriptedModel::new(vec![(0, 0), (3, 1)]);
        let mut input = CountedInput { records: 1 };
        train(&mut input, &mut model, &serial_opts(2)).unwrap();
        let rates = model.learning_rates.lock().unwrap().clone();
        assert_eq!(rates, vec![0.1, 0.1]);
        assert_eq!(model.version(), 2);
    }

    #[test]
    fn init_counts_records_and_prepares() {
        let mut model = ScriptedModel::new(Vec::new());
        let mut input = CountedInput { records: 5 };
        init_model(&mut input, &mut model, &serial_opts(1)).unwrap();
        // add_query is a no-op for the double; the point is that init
        // drains the input without error.
        assert_eq!(model.version(), 0);
    }
}
