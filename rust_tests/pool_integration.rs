//! Worker Pool Integration Tests
//!
//! Exercises both pool variants against the capacity and drain contracts:
//! capacity bounds concurrent execution, submission never blocks, close()
//! drains every running and queued job before returning.

use relay_core::dispatch::DispatchStats;
use relay_core::pool::{PendingWork, WorkerPool};
use relay_core::process_pool::ProcessPool;
use relay_core::protocol::WorkReport;
use relay_core::reporter::Reporter;
use relay_core::thread_pool::ThreadPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct CountingReporter {
    finished: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl CountingReporter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            finished: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
        })
    }
}

impl Reporter for CountingReporter {
    fn on_server_start(&self, _: &str, _: &str, _: usize) {}
    fn on_request_finished(&self, _: &WorkReport) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
    fn on_rejected(&self, _: &str) {}
    fn on_drain_start(&self) {}
    fn on_force_stop(&self) {}
    fn on_drained(&self, _: &DispatchStats, _: u64) {}
    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

/// Scenario: capacity 2, five ~100ms handlers. All five complete, and at
/// no point do more than two execute concurrently.
#[test]
fn thread_pool_capacity_two_five_tasks() {
    let reporter = CountingReporter::new();
    let mut pool = ThreadPool::new(2, reporter.clone()).unwrap();

    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..5u64 {
        let current = Arc::clone(&current);
        let max_seen = Arc::clone(&max_seen);
        let completed = Arc::clone(&completed);
        let pending = pool
            .submit(Box::new(move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                current.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
                WorkReport::completed(i, String::new(), 100)
            }))
            .unwrap();
        handles.push(pending);
    }

    pool.close();

    assert_eq!(completed.load(Ordering::SeqCst), 5);
    assert!(max_seen.load(Ordering::SeqCst) <= 2);
    assert!(handles.iter().all(PendingWork::is_complete));
    assert_eq!(reporter.finished.load(Ordering::SeqCst), 5);
}

/// Drain correctness: K tasks submitted before close; close blocks until
/// all K report completion.
#[test]
fn thread_pool_close_blocks_for_full_drain() {
    let reporter = CountingReporter::new();
    let mut pool = ThreadPool::new(2, reporter.clone()).unwrap();

    const K: usize = 8;
    let completed = Arc::new(AtomicUsize::new(0));
    for i in 0..K as u64 {
        let completed = Arc::clone(&completed);
        pool.submit(Box::new(move || {
            std::thread::sleep(Duration::from_millis(50));
            completed.fetch_add(1, Ordering::SeqCst);
            WorkReport::completed(i, String::new(), 50)
        }))
        .unwrap();
    }

    // 8 tasks x 50ms over 2 workers: the drain cannot finish before ~200ms
    let drain_started = Instant::now();
    pool.close();
    let drain = drain_started.elapsed();

    assert_eq!(completed.load(Ordering::SeqCst), K);
    assert!(drain >= Duration::from_millis(150), "drain took {:?}", drain);
}

#[test]
fn process_pool_serializes_at_capacity_one() {
    let reporter = CountingReporter::new();
    let mut pool = ProcessPool::new(1, reporter.clone()).unwrap();

    for i in 0..3u64 {
        pool.submit(Box::new(move || {
            std::thread::sleep(Duration::from_millis(100));
            WorkReport::completed(i, String::new(), 100)
        }))
        .unwrap();
    }

    let drain_started = Instant::now();
    pool.close();
    let drain = drain_started.elapsed();

    // Three 100ms jobs through one worker slot cannot overlap
    assert!(drain >= Duration::from_millis(250), "drain took {:?}", drain);
    assert_eq!(reporter.finished.load(Ordering::SeqCst), 3);
}

#[test]
fn process_pool_runs_workers_concurrently_up_to_capacity() {
    let reporter = CountingReporter::new();
    let mut pool = ProcessPool::new(3, reporter.clone()).unwrap();

    let submit_started = Instant::now();
    for i in 0..3u64 {
        pool.submit(Box::new(move || {
            std::thread::sleep(Duration::from_millis(100));
            WorkReport::completed(i, String::new(), 100)
        }))
        .unwrap();
    }
    // Submission itself never blocks on busy workers
    assert!(submit_started.elapsed() < Duration::from_millis(80));

    let drain_started = Instant::now();
    pool.close();
    let drain = drain_started.elapsed();

    // Three slots: the jobs overlap instead of running back to back
    assert!(drain < Duration::from_millis(280), "drain took {:?}", drain);
    assert_eq!(reporter.finished.load(Ordering::SeqCst), 3);
}

#[test]
fn process_pool_drains_queued_backlog_on_close() {
    let reporter = CountingReporter::new();
    let mut pool = ProcessPool::new(2, reporter.clone()).unwrap();

    let mut handles = Vec::new();
    for i in 0..6u64 {
        handles.push(
            pool.submit(Box::new(move || {
                std::thread::sleep(Duration::from_millis(20));
                WorkReport::completed(i, String::new(), 20)
            }))
            .unwrap(),
        );
    }
    pool.close();

    assert!(handles.iter().all(PendingWork::is_complete));
    assert_eq!(reporter.finished.load(Ordering::SeqCst), 6);
    assert!(reporter.errors.lock().unwrap().is_empty());
}
