//! Prediction-vs-reference evaluation passes.

use std::sync::Mutex;
use std::time::Instant;

use crate::error::InputError;
use crate::input::RecordInput;
use crate::model::ScoringModel;
use crate::parallel::{ExecOptions, for_each_record};
use crate::stats::PrecisionStats;
use crate::trainer::parse_record;
use crate::types::TrainOptions;

/// Run one evaluation pass: per record, infer labels from scratch and
/// count agreement with the stored reference assignment. Merges the pass's
/// counters into `total_stats`.
///
/// Records are independent; the only shared mutable state is the stats
/// accumulator, so the pass is parallel by default.
pub fn evaluate<I, M>(
    input: &mut I,
    model: &M,
    opts: &TrainOptions,
    total_stats: &PrecisionStats,
) -> Result<(), InputError>
where
    I: RecordInput + ?Sized,
    M: ScoringModel,
{
    let stats = PrecisionStats::new();
    let started = Instant::now();
    for_each_record(input, &opts.exec(), |raw_query, raw_assign| {
        let Some((query, mut working)) = parse_record(model, raw_query, raw_assign) else {
            return;
        };
        let reference = match model.parse_assignment(&query, raw_assign) {
            Ok(a) => a,
            Err(e) => {
                log::warn!("skipping record: {e}");
                return;
            }
        };
        model.clear_inferred(&mut working);
        model.map_inference(&query, &mut working);
        model.compare_assignments(&working, &reference, &stats);
    })?;
    log::info!("evaluation pass took {}ms", started.elapsed().as_millis());
    log::info!("correct {} vs {} incorrect labels", stats.correct(), stats.incorrect());
    match stats.error_rate() {
        Some(rate) => log::info!("error rate of {rate}"),
        None => log::warn!("no labels were evaluated"),
    }

    total_stats.merge(&stats);
    Ok(())
}

/// Sequential diagnostic pass: rerun inference per record and report the
/// total score gain over the stored assignments.
pub fn score_inference_gain<I, M>(input: &mut I, model: &M) -> Result<f64, InputError>
where
    I: RecordInput + ?Sized,
    M: ScoringModel,
{
    let gain = Mutex::new(0.0f64);
    let started = Instant::now();
    let opts = ExecOptions { parallel: false, num_threads: 1 };
    for_each_record(input, &opts, |raw_query, raw_assign| {
        let Some((query, mut assign)) = parse_record(model, raw_query, raw_assign) else {
            return;
        };
        let start_score = model.assignment_score(&assign);
        model.map_inference(&query, &mut assign);
        *gain.lock().unwrap_or_else(|p| p.into_inner()) +=
            model.assignment_score(&assign) - start_score;
    })?;
    let total = gain.into_inner().unwrap_or_else(|p| p.into_inner());
    log::info!(
        "inference took {}ms for gain of {total}",
        started.elapsed().as_millis()
    );
    Ok(total)
}
