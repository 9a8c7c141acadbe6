//! Parallel batch execution.
//!
//! Jobs run on a bounded rayon pool. Each result is merged into the caller's
//! output under one lock as soon as its job finishes, so the merge rule must
//! not depend on completion order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::job::JobError;
use crate::settings::EngineSettings;

/// One independent unit of work.
pub trait BatchJob: Send + Sync {
    type Output: Send;

    fn execute(&self, settings: &EngineSettings) -> Result<Self::Output, JobError>;

    /// Stable human-readable identity used in diagnostics.
    fn describe(&self) -> String;

    /// Solve limit in milliseconds; `0` is unlimited.
    fn timeout_ms(&self, settings: &EngineSettings) -> u64 {
        settings.job_timeout_ms
    }
}

/// How one job result folds into the batch output. Implementations must be
/// commutative and associative.
pub trait MergeInto<O> {
    fn merge_into(self, output: &mut O);
}

impl<T: Ord> MergeInto<BTreeSet<T>> for BTreeSet<T> {
    fn merge_into(self, output: &mut BTreeSet<T>) {
        output.extend(self);
    }
}

impl<K: Ord, V> MergeInto<BTreeMap<K, V>> for (K, V) {
    fn merge_into(self, output: &mut BTreeMap<K, V>) {
        output.insert(self.0, self.1);
    }
}

/// Batch diagnostics sink.
pub trait AnswerElement: Send {
    fn record_success(&mut self, job: &str, elapsed: Duration);
    fn record_failure(&mut self, job: &str, error: &JobError, elapsed: Duration);
    fn record_skipped(&mut self, job: &str);
    fn record_warning(&mut self, warning: String);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: String,
    pub elapsed_ms: u64,
    pub status: JobStatus,
}

/// Stock answer element: one record per job plus batch warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAnswerElement {
    pub jobs: Vec<JobRecord>,
    pub warnings: Vec<String>,
}

impl BatchAnswerElement {
    pub fn failures(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs
            .iter()
            .filter(|r| matches!(r.status, JobStatus::Failed(_)))
    }

    pub fn succeeded(&self) -> usize {
        self.jobs
            .iter()
            .filter(|r| r.status == JobStatus::Succeeded)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.jobs
            .iter()
            .filter(|r| r.status == JobStatus::Skipped)
            .count()
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        self.jobs.iter().map(|r| r.elapsed_ms).sum()
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl AnswerElement for BatchAnswerElement {
    fn record_success(&mut self, job: &str, elapsed: Duration) {
        self.jobs.push(JobRecord {
            job: job.to_string(),
            elapsed_ms: millis(elapsed),
            status: JobStatus::Succeeded,
        });
    }

    fn record_failure(&mut self, job: &str, error: &JobError, elapsed: Duration) {
        self.jobs.push(JobRecord {
            job: job.to_string(),
            elapsed_ms: millis(elapsed),
            status: JobStatus::Failed(error.to_string()),
        });
    }

    fn record_skipped(&mut self, job: &str) {
        self.jobs.push(JobRecord {
            job: job.to_string(),
            elapsed_ms: 0,
            status: JobStatus::Skipped,
        });
    }

    fn record_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub job: String,
    pub error: String,
    pub timeout: bool,
}

/// What happened to a batch. Results of completed jobs are in the caller's
/// output whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub description: String,
    pub total: usize,
    pub completed: usize,
    pub failures: Vec<JobFailure>,
    pub skipped: usize,
    /// Stopped early by the halt-on-failure policy.
    pub aborted: bool,
    /// Stopped early by the batch runtime limit.
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

struct BatchState<'o, O, A> {
    output: &'o mut O,
    answer: &'o mut A,
    completed: usize,
    failures: Vec<JobFailure>,
    skipped: usize,
    timed_out: bool,
}

fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn shuffle<J>(jobs: &mut [J], settings: &EngineSettings) {
    let mut rng = match settings.shuffle_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    jobs.shuffle(&mut rng);
}

/// Run `jobs` on a pool of `settings.workers` threads, merging every
/// successful result into `output`.
///
/// Individual failures are recorded and the batch continues, unless
/// `halt_on_job_failure` is set: then no further job starts and the call
/// returns [`EngineError::BatchAborted`]. Once `max_runtime_ms` has elapsed
/// the remaining jobs are skipped and the summary is flagged `timed_out`.
pub fn run_jobs<J, O, A>(
    settings: &EngineSettings,
    mut jobs: Vec<J>,
    output: &mut O,
    answer: &mut A,
    description: &str,
) -> Result<BatchSummary, EngineError>
where
    J: BatchJob,
    J::Output: MergeInto<O>,
    O: Send,
    A: AnswerElement,
{
    let started = Instant::now();
    if settings.shuffle_jobs {
        shuffle(&mut jobs, settings);
    }
    let total = jobs.len();
    let workers = settings.effective_workers();
    info!(batch = description, jobs = total, workers, "Starting batch");

    let deadline = settings.max_runtime().and_then(|d| started.checked_add(d));
    let halted = AtomicBool::new(false);
    let state = Mutex::new(BatchState {
        output,
        answer,
        completed: 0,
        failures: Vec::new(),
        skipped: 0,
        timed_out: false,
    });

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("nodal-worker-{i}"))
        .build()
        .map_err(|e| EngineError::Pool(e.to_string()))?;

    pool.install(|| {
        jobs.par_iter().for_each(|job| {
            let name = job.describe();
            let expired = deadline_exceeded(deadline);
            if halted.load(Ordering::Acquire) || expired {
                let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
                s.timed_out |= expired;
                s.skipped += 1;
                s.answer.record_skipped(&name);
                return;
            }

            let job_started = Instant::now();
            let result = job.execute(settings);
            let elapsed = job_started.elapsed();
            let limit_ms = job.timeout_ms(settings);
            let result = match result {
                Ok(_) if limit_ms > 0 && elapsed > Duration::from_millis(limit_ms) => {
                    Err(JobError::Timeout {
                        job: name.clone(),
                        limit_ms,
                    })
                }
                other => other,
            };

            let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok(out) => {
                    out.merge_into(&mut *s.output);
                    s.answer.record_success(&name, elapsed);
                    s.completed += 1;
                    debug!(job = %name, elapsed_ms = millis(elapsed), "Job finished");
                }
                Err(error) => {
                    warn!(job = %name, error = %error, "Job failed");
                    s.answer.record_failure(&name, &error, elapsed);
                    s.failures.push(JobFailure {
                        job: name,
                        error: error.to_string(),
                        timeout: error.is_timeout(),
                    });
                    if settings.halt_on_job_failure {
                        halted.store(true, Ordering::Release);
                    }
                }
            }
        });
    });

    let mut state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
    let aborted = halted.load(Ordering::Acquire);
    if state.timed_out {
        let warning = format!(
            "batch '{description}' hit its runtime limit; {} job(s) skipped",
            state.skipped
        );
        warn!("{warning}");
        state.answer.record_warning(warning);
    }
    let summary = BatchSummary {
        description: description.to_string(),
        total,
        completed: state.completed,
        failures: state.failures,
        skipped: state.skipped,
        aborted,
        timed_out: state.timed_out,
        elapsed_ms: millis(started.elapsed()),
    };
    info!(
        batch = description,
        completed = summary.completed,
        failed = summary.failures.len(),
        skipped = summary.skipped,
        elapsed_ms = summary.elapsed_ms,
        "Batch finished"
    );
    if aborted {
        return Err(EngineError::BatchAborted(Box::new(summary)));
    }
    Ok(summary)
}

/// Fold a halted batch back into `Ok`: results merged before the failure
/// stay in the caller's output and the summary is flagged `aborted`.
pub fn keep_partial<A: AnswerElement>(
    result: Result<BatchSummary, EngineError>,
    answer: &mut A,
) -> Result<BatchSummary, EngineError> {
    match result {
        Err(EngineError::BatchAborted(summary)) => {
            answer.record_warning(format!(
                "batch '{}' aborted after {} failure(s); kept {} of {} result(s)",
                summary.description,
                summary.failures.len(),
                summary.completed,
                summary.total
            ));
            Ok(*summary)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Square(u64);

    impl BatchJob for Square {
        type Output = (u64, u64);

        fn execute(&self, _: &EngineSettings) -> Result<(u64, u64), JobError> {
            if self.0 == 3 {
                return Err(JobError::Solver {
                    job: self.describe(),
                    message: "boom".into(),
                });
            }
            Ok((self.0, self.0 * self.0))
        }

        fn describe(&self) -> String {
            format!("square-{}", self.0)
        }
    }

    fn settings(workers: usize, halt: bool) -> EngineSettings {
        EngineSettings {
            workers,
            shuffle_seed: Some(7),
            halt_on_job_failure: halt,
            ..EngineSettings::default()
        }
    }

    #[test]
    fn failures_are_recorded_and_siblings_merge() {
        let mut output = BTreeMap::new();
        let mut answer = BatchAnswerElement::default();
        let jobs = (1..=5).map(Square).collect();
        let summary = run_jobs(&settings(3, false), jobs, &mut output, &mut answer, "squares").unwrap();
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].job, "square-3");
        assert!(!summary.failures[0].timeout);
        assert_eq!(output.get(&5), Some(&25));
        assert!(!output.contains_key(&3));
        assert_eq!(answer.succeeded(), 4);
        assert_eq!(answer.failures().count(), 1);
    }

    #[test]
    fn halting_policy_aborts_batch() {
        let mut output = BTreeMap::new();
        let mut answer = BatchAnswerElement::default();
        let jobs = (1..=5).map(Square).collect();
        let err = run_jobs(&settings(1, true), jobs, &mut output, &mut answer, "squares").unwrap_err();
        match err {
            EngineError::BatchAborted(summary) => {
                assert!(summary.aborted);
                assert_eq!(summary.failures.len(), 1);
                assert_eq!(summary.completed + summary.skipped + 1, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn halted_batch_keeps_merged_results() {
        let mut output = BTreeMap::new();
        let mut answer = BatchAnswerElement::default();
        let jobs = (1..=5).map(Square).collect();
        let outcome = run_jobs(&settings(1, true), jobs, &mut output, &mut answer, "squares");
        let summary = keep_partial(outcome, &mut answer).unwrap();
        assert!(summary.aborted);
        assert_eq!(output.len(), summary.completed);
        assert!(output.iter().all(|(k, v)| *v == k * k));
        assert!(answer.warnings.iter().any(|w| w.contains("'squares' aborted")));
    }

    #[test]
    fn set_results_merge_by_union() {
        let mut out: BTreeSet<u8> = [1, 2].into();
        BTreeSet::from([2, 3]).merge_into(&mut out);
        assert_eq!(out, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn empty_batch_is_complete() {
        let mut output: BTreeMap<u64, u64> = BTreeMap::new();
        let mut answer = BatchAnswerElement::default();
        let summary = run_jobs(&settings(2, true), Vec::<Square>::new(), &mut output, &mut answer, "none").unwrap();
        assert!(summary.is_complete());
        assert_eq!(summary.total, 0);
    }
}
