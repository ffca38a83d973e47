//! Bounded worker pool abstraction
//!
//! Capacity bounds concurrently *running* jobs only. Submission queues
//! internally without bound and never blocks the caller - sustained overload
//! grows the queue; making depth a bounded, configurable policy is a known
//! open item, deliberately not smuggled in here.

use crate::config::PoolMode;
use crate::process_pool::ProcessPool;
use crate::protocol::WorkReport;
use crate::reporter::Reporter;
use crate::thread_pool::ThreadPool;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A unit of work: runs one connection to completion and reports the outcome.
pub type Job = Box<dyn FnOnce() -> WorkReport + Send + 'static>;

/// Handle to a submitted, possibly still-running execution.
#[derive(Clone)]
pub struct PendingWork {
    id: u64,
    done: Arc<AtomicBool>,
}

impl PendingWork {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub(crate) fn completion_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.done)
    }
}

/// Bounded concurrent execution resource.
pub trait WorkerPool: Send {
    /// Enqueue a job. Returns immediately, even when all workers are busy.
    /// Fails only once the pool has been closed.
    fn submit(&self, job: Job) -> Result<PendingWork>;

    /// Stop accepting submissions and block until every running and queued
    /// job has completed. Full drain, not cancellation. Idempotent.
    fn close(&mut self);

    /// Fixed concurrency bound set at construction.
    fn capacity(&self) -> usize;
}

/// Construct the pool variant for the configured deployment mode.
pub fn build_pool(
    mode: PoolMode,
    capacity: usize,
    reporter: Arc<dyn Reporter>,
) -> Result<Box<dyn WorkerPool>> {
    Ok(match mode {
        PoolMode::Thread => Box::new(ThreadPool::new(capacity, reporter)?),
        PoolMode::Process => Box::new(ProcessPool::new(capacity, reporter)?),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_work_completion_flag() {
        let pending = PendingWork::new(42);
        assert_eq!(pending.id(), 42);
        assert!(!pending.is_complete());

        pending.completion_flag().store(true, Ordering::SeqCst);
        assert!(pending.is_complete());
    }

    #[test]
    fn test_clones_share_completion() {
        let pending = PendingWork::new(1);
        let clone = pending.clone();
        pending.completion_flag().store(true, Ordering::SeqCst);
        assert!(clone.is_complete());
    }
}
