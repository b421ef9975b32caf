//! Fan-out behavior under uneven job latency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use dwell_core::pool::{DEFAULT_MAX_CONCURRENCY, fan_out};

/// Latencies that make completion order differ from submission order.
fn latency(job: u64) -> Duration {
    Duration::from_millis((job * 7) % 11)
}

#[test]
fn twenty_three_jobs_under_a_cap_of_ten() {
    let running = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let mut results = fan_out((0..23).collect(), DEFAULT_MAX_CONCURRENCY, |job: u64| {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(latency(job));
        running.fetch_sub(1, Ordering::SeqCst);
        Ok::<_, String>(vec![job])
    })
    .expect("every job succeeds");

    results.sort_unstable();
    assert_eq!(results, (0..23).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= DEFAULT_MAX_CONCURRENCY);
}

#[test]
fn one_failing_job_fails_the_whole_fan_out() {
    let result = fan_out((0..23).collect(), DEFAULT_MAX_CONCURRENCY, |job: u64| {
        thread::sleep(latency(job));
        if job == 17 {
            Err(format!("job {job} failed"))
        } else {
            Ok(vec![job, job])
        }
    });

    assert_eq!(result, Err("job 17 failed".to_string()));
}

#[test]
fn results_flatten_across_jobs() {
    let results = fan_out(vec![3_usize, 0, 5], 2, |n| {
        Ok::<_, ()>((0..n).map(|i| (n, i)).collect::<Vec<_>>())
    })
    .expect("fan-out");
    assert_eq!(results.len(), 8);
}
