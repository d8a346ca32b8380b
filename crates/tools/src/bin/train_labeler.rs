//! Trainer for the pairwise graph labeling model.
//!
//! Reads JSON records (one `{"query": ..., "assign": ...}` object per line)
//! and either trains a model, evaluates an existing one, or runs k-fold
//! cross-validation.

use std::path::Path;

use anyhow::Context;
use clap::{ArgAction, Command, arg, value_parser};

use rlabel_core::evaluate::{evaluate, score_inference_gain};
use rlabel_core::input::{FileInput, ShuffledCacheInput};
use rlabel_core::trainer::{init_model, train};
use rlabel_core::{PairwiseModel, PrecisionStats, ScoringModel, TrainOptions, cv};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let matches = Command::new("train_labeler")
        .about("Train a graph labeling model from JSONL data")
        .arg(
            arg!(-i --input <FILE> "Input file with JSON objects regarding training data")
                .default_value("testdata"),
        )
        .arg(arg!(-o --"out-model" <PREFIX> "File prefix for output models").default_value("model"))
        .arg(
            arg!(--hogwild <BOOL> "Whether to use Hogwild parallel training")
                .value_parser(value_parser!(bool))
                .default_value("true"),
        )
        .arg(
            arg!(--"num-threads" <N> "Number of threads to use")
                .value_parser(value_parser!(usize))
                .default_value("8"),
        )
        .arg(
            arg!(--"num-training-passes" <N> "Number of passes in training")
                .value_parser(value_parser!(u32))
                .default_value("24"),
        )
        .arg(
            arg!(--"start-learning-rate" <RATE> "Initial learning rate")
                .value_parser(value_parser!(f64))
                .default_value("0.1"),
        )
        .arg(
            arg!(--"stop-learning-rate" <RATE> "Stop learning if the rate falls below this value")
                .value_parser(value_parser!(f64))
                .default_value("0.0001"),
        )
        .arg(
            arg!(--"regularization-const" <C> "Regularization constant. The higher, the more regularization")
                .value_parser(value_parser!(f64))
                .default_value("2.0"),
        )
        .arg(
            arg!(--"svm-margin" <M> "Penalty for keeping labels equal to the training data during training")
                .value_parser(value_parser!(f64))
                .default_value("0.1"),
        )
        .arg(
            arg!(--"cross-validation-folds" <N> "If more than 1, cross-validation is performed with this many folds")
                .value_parser(value_parser!(u32))
                .default_value("0"),
        )
        .arg(
            arg!(--evaluate "Evaluate an existing model instead of training; --input then holds evaluation data")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--"score-gain" "Report the inference score gain over the input and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(--seed <N> "Seed for the pass shuffling RNG")
                .value_parser(value_parser!(u64))
                .default_value("42"),
        )
        .get_matches();

    let input_path = matches.get_one::<String>("input").expect("has default").clone();
    let model_prefix = matches.get_one::<String>("out-model").expect("has default").clone();
    let folds = *matches.get_one::<u32>("cross-validation-folds").expect("has default");
    let seed = *matches.get_one::<u64>("seed").expect("has default");
    let opts = TrainOptions {
        parallel: *matches.get_one::<bool>("hogwild").expect("has default"),
        num_threads: *matches.get_one::<usize>("num-threads").expect("has default"),
        num_passes: *matches.get_one::<u32>("num-training-passes").expect("has default"),
        start_learning_rate: *matches.get_one::<f64>("start-learning-rate").expect("has default"),
        stop_learning_rate: *matches.get_one::<f64>("stop-learning-rate").expect("has default"),
        regularization: *matches.get_one::<f64>("regularization-const").expect("has default"),
        svm_margin: *matches.get_one::<f64>("svm-margin").expect("has default"),
    };

    if folds > 1 {
        let total = cv::cross_validate(
            Path::new(&input_path),
            folds,
            &opts,
            seed,
            PairwiseModel::new,
        )
        .context("cross-validation failed")?;
        log::info!("========================================");
        log::info!("cross-validation done");
        log::info!(
            "correct {} vs {} incorrect labels for the whole dataset",
            total.correct(),
            total.incorrect()
        );
        match total.error_rate() {
            Some(rate) => log::info!("error rate of {rate}"),
            None => log::warn!("no labels were evaluated"),
        }
        return Ok(());
    }

    if matches.get_flag("evaluate") {
        let mut model = PairwiseModel::new();
        model
            .load(&model_prefix)
            .with_context(|| format!("loading model {model_prefix}"))?;
        let total = PrecisionStats::new();
        evaluate(&mut FileInput::new(&input_path), &model, &opts, &total)
            .context("evaluation failed")?;
        return Ok(());
    }

    if matches.get_flag("score-gain") {
        let mut model = PairwiseModel::new();
        model
            .load(&model_prefix)
            .with_context(|| format!("loading model {model_prefix}"))?;
        score_inference_gain(&mut FileInput::new(&input_path), &model)
            .context("inference scoring failed")?;
        return Ok(());
    }

    // Regular training: capture the file once, then shuffled passes.
    let mut model = PairwiseModel::new();
    let mut input = ShuffledCacheInput::new(FileInput::new(&input_path), seed);
    init_model(&mut input, &mut model, &opts).context("loading training data")?;
    train(&mut input, &mut model, &opts).context("training failed")?;
    model
        .save(&model_prefix)
        .with_context(|| format!("saving model {model_prefix}"))?;
    log::info!("saved model to {model_prefix}.json");
    Ok(())
}
