//! Bounded fan-out of independent fetch jobs.
//!
//! A fixed set of scoped worker threads pulls job inputs from a shared
//! queue; a worker that finishes a job immediately takes the next pending
//! one, so at most `max_concurrency` jobs run at any moment. Results travel
//! back over a single channel and are concatenated by the calling thread.
//!
//! # Failure
//!
//! The first job error wins. Once it has been observed no further jobs are
//! started; jobs already running are allowed to finish, but their results
//! are discarded and the call returns the error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;

use tracing::debug;

/// Default ceiling on simultaneously running jobs.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Run `job` once per input with at most `max_concurrency` jobs in flight.
///
/// The returned items are in no particular order; callers re-sort.
/// A `max_concurrency` of zero is treated as one.
///
/// # Errors
///
/// Returns the first error produced by any job.
pub fn fan_out<I, T, E, F>(inputs: Vec<I>, max_concurrency: usize, job: F) -> Result<Vec<T>, E>
where
    I: Send,
    T: Send,
    E: Send,
    F: Fn(I) -> Result<Vec<T>, E> + Sync,
{
    if inputs.is_empty() {
        return Ok(Vec::new());
    }

    let job_count = inputs.len();
    let workers = max_concurrency.max(1).min(job_count);
    debug!(jobs = job_count, workers, "starting fan-out");

    let queue = Mutex::new(inputs.into_iter());
    let failed = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<Result<Vec<T>, E>>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let failed = &failed;
            let job = &job;

            scope.spawn(move || {
                while !failed.load(Ordering::Acquire) {
                    let next = queue.lock().ok().and_then(|mut pending| pending.next());
                    let Some(input) = next else {
                        break;
                    };

                    let result = job(input);
                    if result.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut collected = Vec::new();
        let mut first_error = None;
        for result in rx {
            match result {
                Ok(items) => {
                    if first_error.is_none() {
                        collected.extend(items);
                    }
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        first_error.map_or(Ok(collected), Err)
    })
}
