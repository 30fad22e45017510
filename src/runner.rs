//! Bounded worker pool for independent diagnostic jobs.
//!
//! ```text
//!   jobs (FIFO) ──► job channel ──► worker 1 ─┐
//!                                 ├► worker 2 ─┼──► result channel ──► RunReport
//!                                 └► worker n ─┘
//! ```
//!
//! At most `max_parallel` workers exist, so at most that many jobs run at
//! once; the next queued job starts as soon as a worker frees up. Errors and
//! panics stay inside their job and are collected once the batch resolves.

use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::unbounded;
use serde::Serialize;

type Work<'a, T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send + 'a>;

/// One unit of work and the key its output is stored under.
pub struct Job<'a, T> {
    key: String,
    work: Work<'a, T>,
}

impl<'a, T> Job<'a, T> {
    pub fn new(
        key: impl Into<String>,
        work: impl FnOnce() -> anyhow::Result<T> + Send + 'a,
    ) -> Self {
        Self {
            key: key.into(),
            work: Box::new(work),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub key: String,
    pub message: String,
}

/// Outputs in submission order, plus every failed job.
#[derive(Debug)]
pub struct RunReport<T> {
    pub outputs: Vec<(String, T)>,
    pub failures: Vec<JobFailure>,
}

impl<T> RunReport<T> {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedTaskRunner {
    max_parallel: usize,
}

impl BoundedTaskRunner {
    /// `max_parallel` is clamped to at least one worker.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Run every job and wait for all of them.
    pub fn run<'a, T: Send>(&self, jobs: Vec<Job<'a, T>>) -> RunReport<T> {
        let total = jobs.len();
        let workers = self.max_parallel.min(total);
        let (job_tx, job_rx) = unbounded::<(usize, Job<'a, T>)>();
        let (result_tx, result_rx) = unbounded();

        for queued in jobs.into_iter().enumerate() {
            // The receiver is alive until the end of this function.
            let _ = job_tx.send(queued);
        }
        drop(job_tx);

        std::thread::scope(|s| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move || {
                    while let Ok((index, job)) = job_rx.recv() {
                        log::debug!("worker {worker} starts job {index} ({})", job.key);
                        let Job { key, work } = job;
                        let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(err)) => Err(format!("{err:#}")),
                            Err(payload) => Err(panic_message(payload.as_ref())),
                        };
                        log::debug!("worker {worker} finished job {index} ({key})");
                        if result_tx.send((index, key, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<_> = result_rx.try_iter().collect();
        results.sort_by_key(|(index, _, _)| *index);

        let mut report = RunReport {
            outputs: Vec::with_capacity(total),
            failures: Vec::new(),
        };
        for (_, key, outcome) in results {
            match outcome {
                Ok(value) => report.outputs.push((key, value)),
                Err(message) => {
                    log::warn!("job {key} failed: {message}");
                    report.failures.push(JobFailure { key, message });
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn never_exceeds_the_cap() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let runs = Mutex::new(Vec::new());

        let jobs = (0..5)
            .map(|i| {
                let (active, peak, runs) = (&active, &peak, &runs);
                Job::new(format!("job-{i}"), move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    runs.lock().unwrap().push(i);
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(i * 10)
                })
            })
            .collect();

        let report = BoundedTaskRunner::new(2).run(jobs);
        assert!(report.is_clean());
        assert!(peak.load(Ordering::SeqCst) <= 2);

        let mut ran = runs.into_inner().unwrap();
        ran.sort_unstable();
        assert_eq!(ran, vec![0, 1, 2, 3, 4]);
        let outputs: Vec<_> = report.outputs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(
            outputs,
            vec![("job-0", 0), ("job-1", 10), ("job-2", 20), ("job-3", 30), ("job-4", 40)]
        );
    }

    #[test]
    fn failures_do_not_stop_siblings() {
        let jobs: Vec<Job<'_, u32>> = vec![
            Job::new("ok-a", || Ok(1)),
            Job::new("err", || anyhow::bail!("no pass events")),
            Job::new("panic", || panic!("boom")),
            Job::new("ok-b", || Ok(2)),
        ];
        let report = BoundedTaskRunner::new(1).run(jobs);
        assert_eq!(
            report.outputs,
            vec![("ok-a".to_string(), 1), ("ok-b".to_string(), 2)]
        );
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].key, "err");
        assert!(report.failures[0].message.contains("no pass events"));
        assert_eq!(report.failures[1].key, "panic");
        assert!(report.failures[1].message.contains("boom"));
    }

    #[test]
    fn empty_batch_and_zero_cap() {
        let report = BoundedTaskRunner::new(0).run(Vec::<Job<'_, ()>>::new());
        assert!(report.outputs.is_empty() && report.is_clean());
        assert_eq!(BoundedTaskRunner::new(0).max_parallel(), 1);
    }

    #[test]
    fn jobs_borrow_shared_input() {
        let data: Vec<f64> = (0..100).map(f64::from).collect();
        let jobs = (0..4)
            .map(|k| {
                let data = &data;
                Job::new(format!("q{k}"), move || {
                    Ok(data.iter().skip(k * 25).take(25).sum::<f64>())
                })
            })
            .collect();
        let report = BoundedTaskRunner::new(3).run(jobs);
        let total: f64 = report.outputs.iter().map(|(_, v)| v).sum();
        assert_eq!(total, 4950.0);
    }
}
