//! Thread-based worker pool
//!
//! `capacity` worker threads pull jobs off one unbounded channel. Drain
//! comes from the channel itself: dropping the sender lets each worker
//! finish the remaining queue before `recv` disconnects, so `close()` is
//! just drop-and-join.

use crate::pool::{Job, PendingWork, WorkerPool};
use crate::reporter::Reporter;
use anyhow::{ensure, Context, Result};
use crossbeam_channel::{unbounded, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct Submission {
    job: Job,
    done: Arc<AtomicBool>,
}

pub struct ThreadPool {
    tx: Option<Sender<Submission>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl ThreadPool {
    pub fn new(capacity: usize, reporter: Arc<dyn Reporter>) -> Result<Self> {
        ensure!(capacity > 0, "worker capacity must be positive");

        let (tx, rx) = unbounded::<Submission>();
        let mut workers = Vec::with_capacity(capacity);

        for i in 0..capacity {
            let rx = rx.clone();
            let reporter = Arc::clone(&reporter);
            let handle = std::thread::Builder::new()
                .name(format!("relay-worker-{}", i))
                .spawn(move || {
                    // recv drains queued jobs before reporting disconnect
                    while let Ok(sub) = rx.recv() {
                        let report = (sub.job)();
                        reporter.on_request_finished(&report);
                        sub.done.store(true, Ordering::SeqCst);
                    }
                })
                .context("spawn pool worker")?;
            workers.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers,
            capacity,
            next_id: AtomicU64::new(0),
        })
    }
}

impl WorkerPool for ThreadPool {
    fn submit(&self, job: Job) -> Result<PendingWork> {
        let tx = self.tx.as_ref().context("pool is closed")?;

        let pending = PendingWork::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let sub = Submission {
            job,
            done: pending.completion_flag(),
        };
        // Unbounded send: never blocks. On disconnect the submission (and
        // the connection captured in it) drops, closing the socket.
        tx.send(sub).map_err(|_| anyhow::anyhow!("pool is closed"))?;
        Ok(pending)
    }

    fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            drop(tx);
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
