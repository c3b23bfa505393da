//! Tunables for a `replay`/`replay_iter` call.

/// Controls batching, parallelism, trimming, and filtering for a replay run.
///
/// The defaults match a single-threaded, untrimmed, unfiltered replay that
/// streams the whole dataset through in one logical pass.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Maximum number of rows pulled from a dataset per `DatasetSource::batches` call.
    pub batch_size: usize,
    /// Number of datasets to replay concurrently, when replaying more than one.
    pub n_data_jobs: usize,
    /// Number of worker threads used to evaluate factors within one dataset's batches.
    pub n_factor_jobs: usize,
    /// Drop the leading `max(ready_offset)` rows of output so every kept row is fully warmed up.
    pub trim: bool,
    /// An optional column to echo through to the output table unchanged.
    pub index_col: Option<String>,
    /// Emit progress logging via the `log` facade.
    pub verbose: bool,
    /// When replaying multiple datasets, allow results to arrive out of submission order.
    pub unordered: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            batch_size: 40960,
            n_data_jobs: 1,
            n_factor_jobs: 1,
            trim: false,
            index_col: None,
            verbose: false,
            unordered: false,
        }
    }
}
