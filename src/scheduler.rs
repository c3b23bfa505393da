//! Concurrency fabric: a small fixed thread pool plus the `replay`/
//! `replay_iter` facade that drives it (spec §5).
//!
//! Every worker is fully synchronous: a batch goes in, a finished slice of
//! output comes out. There is no async runtime here, only a heap of pending
//! closures and a condvar, the same shape the reference executor uses for
//! fanning out independent analysis passes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;

use crate::column::DatasetSource;
use crate::error::ReplayError;
use crate::eval::{self, ReplayOutcome};
use crate::factor::Factor;
use crate::options::ReplayOptions;

/// Wraps a heap-allocated closure with a cost estimate so the busiest job is
/// always dispatched first.
struct Job(usize, Box<dyn FnMut() + Send>);

impl PartialEq for Job {
    fn eq(&self, other: &Job) -> bool {
        self.0 == other.0
    }
}
impl Eq for Job {}
impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Job) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Job {
    fn cmp(&self, other: &Job) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// A fixed pool of worker threads backed by a priority work queue.
///
/// `concurrency <= 1` degenerates to running every job inline on the calling
/// thread, so the single-threaded default configuration never pays for
/// threads it does not use.
#[derive(Clone)]
pub struct Executor {
    concurrency: usize,
    queue: Arc<Mutex<BinaryHeap<Job>>>,
    work_cv: Arc<Condvar>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queued = self.queue.lock().unwrap().len();
        write!(f, "Executor(concurrency={}, queued={})", self.concurrency, queued)
    }
}

fn queue_work(exec: &Executor, estimate: usize, mut f: Box<dyn FnMut() + Send>) {
    if exec.concurrency <= 1 {
        f();
        return;
    }
    let mut q = exec.queue.lock().unwrap();
    q.push(Job(estimate, f));
    exec.work_cv.notify_one();
}

impl Executor {
    pub fn new(concurrency: usize) -> Executor {
        let queue = Arc::new(Mutex::new(BinaryHeap::<Job>::new()));
        let cv = Arc::new(Condvar::new());

        if concurrency > 1 {
            for _ in 0..concurrency {
                let queue = queue.clone();
                let cv = cv.clone();
                thread::spawn(move || loop {
                    let mut job = {
                        let mut guard = queue.lock().unwrap();
                        while guard.is_empty() {
                            guard = cv.wait(guard).unwrap();
                        }
                        guard.pop().unwrap()
                    };
                    (job.1)();
                });
            }
        }

        Executor { concurrency, queue, work_cv: cv }
    }

    /// Queues `task`, returning a `Promise` for its result. `estimate` ranks
    /// jobs already in the queue against each other; larger runs first.
    pub fn exec<TASK, RV>(&self, estimate: usize, task: TASK) -> Promise<RV>
    where
        TASK: FnOnce() -> RV + Send + 'static,
        RV: Send + 'static,
    {
        let slot = Arc::new((Mutex::new(None), Condvar::new()));
        let slot2 = slot.clone();
        let mut task = Some(task);
        queue_work(
            self,
            estimate,
            Box::new(move || {
                let mut g = slot2.0.lock().unwrap();
                let f = panic::AssertUnwindSafe(task.take().expect("job runs exactly once"));
                *g = Some(panic::catch_unwind(f));
                slot2.1.notify_one();
            }),
        );

        Promise(Box::new(move || {
            let mut g = slot.0.lock().unwrap();
            while g.is_none() {
                g = slot.1.wait(g).unwrap();
            }
            g.take().unwrap().unwrap()
        }))
    }
}

/// A handle for a value a worker is computing. `wait` blocks the calling
/// thread until it is ready, re-raising a worker panic if one occurred.
pub struct Promise<T>(Box<dyn FnOnce() -> T + Send>);

impl<T> Promise<T> {
    pub fn wait(self) -> T {
        (self.0)()
    }
}

/// The outcome of replaying one dataset: its name and either a finished
/// table (with any non-fatal per-factor failures attached) or a dataset-fatal error.
pub struct DatasetReplay {
    pub name: String,
    pub result: Result<ReplayOutcome, ReplayError>,
}

fn run_one(
    factors: &[(String, Factor)],
    predicate: Option<&Factor>,
    dataset: &mut dyn DatasetSource,
    options: &ReplayOptions,
    factor_exec: Option<&Executor>,
) -> DatasetReplay {
    let name = dataset.name().to_string();
    let result = eval::replay_dataset(factors, predicate, dataset, options, factor_exec);
    DatasetReplay { name, result }
}

/// Replays every dataset against `factors`, blocking until all have
/// completed, and returns results in submission order.
pub fn replay(
    factors: Vec<(String, Factor)>,
    predicate: Option<Factor>,
    datasets: Vec<Box<dyn DatasetSource + Send>>,
    options: ReplayOptions,
) -> Vec<DatasetReplay> {
    replay_iter(factors, predicate, datasets, options).collect()
}

/// Streaming form of `replay`. With `options.unordered` set, results are
/// yielded as datasets finish rather than in submission order; otherwise the
/// work is still dispatched eagerly across `n_data_jobs` workers, but results
/// are drained in the order the datasets were given.
pub fn replay_iter(
    factors: Vec<(String, Factor)>,
    predicate: Option<Factor>,
    mut datasets: Vec<Box<dyn DatasetSource + Send>>,
    options: ReplayOptions,
) -> Box<dyn Iterator<Item = DatasetReplay>> {
    let data_exec = Executor::new(options.n_data_jobs.max(1));
    let factor_exec = if options.n_factor_jobs > 1 { Some(Executor::new(options.n_factor_jobs)) } else { None };

    if options.unordered {
        let (tx, rx) = mpsc::channel();
        for mut dataset in datasets.drain(..) {
            let factors = factors.clone();
            let predicate = predicate.clone();
            let options = options.clone();
            let factor_exec = factor_exec.clone();
            let tx = tx.clone();
            data_exec.exec(1, move || {
                let outcome = run_one(&factors, predicate.as_ref(), &mut *dataset, &options, factor_exec.as_ref());
                let _ = tx.send(outcome);
            });
        }
        drop(tx);
        Box::new(rx.into_iter())
    } else {
        let mut promises = Vec::with_capacity(datasets.len());
        for mut dataset in datasets.drain(..) {
            let factors = factors.clone();
            let predicate = predicate.clone();
            let options = options.clone();
            let factor_exec = factor_exec.clone();
            promises.push(data_exec.exec(1, move || {
                run_one(&factors, predicate.as_ref(), &mut *dataset, &options, factor_exec.as_ref())
            }));
        }
        Box::new(promises.into_iter().map(Promise::wait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, InMemoryDataset};

    #[test]
    fn executor_runs_job_inline_at_concurrency_one() {
        let exec = Executor::new(1);
        let p = exec.exec(1, || 2 + 2);
        assert_eq!(p.wait(), 4);
    }

    #[test]
    fn executor_runs_jobs_on_worker_threads() {
        let exec = Executor::new(4);
        let promises: Vec<_> = (0..8).map(|i| exec.exec(1, move || i * i)).collect();
        let results: Vec<i32> = promises.into_iter().map(Promise::wait).collect();
        assert_eq!(results, (0..8).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn replay_runs_factors_across_datasets() {
        let f = Factor::parse("(TSSum 2 :x)").unwrap();
        let factors = vec![("s".to_string(), f)];
        let ds1: Box<dyn DatasetSource + Send> =
            Box::new(InMemoryDataset::new("d1", vec![Column::new("x", vec![1.0, 2.0, 3.0])]));
        let ds2: Box<dyn DatasetSource + Send> =
            Box::new(InMemoryDataset::new("d2", vec![Column::new("x", vec![4.0, 5.0, 6.0])]));
        let results = replay(factors, None, vec![ds1, ds2], ReplayOptions::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "d1");
        assert_eq!(results[1].name, "d2");
        assert!(results[0].result.is_ok());
    }
}
