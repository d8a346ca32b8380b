/// Knobs for one full training or evaluation run.
///
/// Values come from the CLI; the defaults here match the binary's defaults.
#[derive(Clone, Debug)]
pub struct TrainOptions {
    /// Run passes with Hogwild worker threads instead of a single thread.
    pub parallel: bool,
    /// Worker thread count for parallel passes.
    pub num_threads: usize,
    /// Maximum number of training passes.
    pub num_passes: u32,
    /// Learning rate for the first pass.
    pub start_learning_rate: f64,
    /// Training stops once the decayed learning rate falls below this.
    pub stop_learning_rate: f64,
    /// Regularization constant. The higher, the more regularization.
    pub regularization: f64,
    /// SVM margin: penalty for keeping labels equal to the training data
    /// during the loss-augmented inference step.
    pub svm_margin: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            num_threads: 8,
            num_passes: 24,
            start_learning_rate: 0.1,
            stop_learning_rate: 0.0001,
            regularization: 2.0,
            svm_margin: 0.1,
        }
    }
}

impl TrainOptions {
    pub(crate) fn exec(&self) -> crate::parallel::ExecOptions {
        crate::parallel::ExecOptions {
            parallel: self.parallel,
            num_threads: self.num_threads,
        }
    }
}
