//! Shutdown state machine and signal-escalation counter
//!
//! One atomic count drives everything: 0 signals = Running, 1 = Draining,
//! 2+ = ForceStop. Deriving the state from the count makes the transitions
//! forward-only and keeps concurrent signal delivery race-free without a
//! separate flag.
//!
//! Two backings, chosen once at construction:
//! - Thread mode: a plain in-process `AtomicU32`.
//! - Process mode: an `AtomicU32` on a `memfd` page mapped `MAP_SHARED`, so
//!   the count stays visible to workers forked after construction.

use crate::config::PoolMode;
use anyhow::Result;
use std::ffi::CString;
use std::sync::atomic::{AtomicU32, Ordering};

/// Lifecycle phase of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accepting and dispatching new connections.
    Running,
    /// Rejecting new connections; submitted work runs to completion.
    Draining,
    /// Terminal. Manifested as immediate process exit, never observed by
    /// the dispatch loop.
    ForceStop,
}

/// Escalation decision returned from [`ShutdownController::signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// First signal: stop accepting, finish what's running.
    BeginDrain,
    /// Second signal: the caller must terminate the process now.
    ForceStop,
    /// Third and later. Unreachable in a live process (it already exited),
    /// reachable in tests.
    Ignored,
}

pub struct ShutdownController {
    cell: CounterCell,
}

enum CounterCell {
    Local(AtomicU32),
    Shared(SharedCounter),
}

impl ShutdownController {
    /// Deployment mode is a construction-time choice, never probed at
    /// runtime: thread pools share an address space, process pools do not.
    pub fn new(mode: PoolMode) -> Result<Self> {
        let cell = match mode {
            PoolMode::Thread => CounterCell::Local(AtomicU32::new(0)),
            PoolMode::Process => CounterCell::Shared(SharedCounter::new()?),
        };
        Ok(Self { cell })
    }

    fn counter(&self) -> &AtomicU32 {
        match &self.cell {
            CounterCell::Local(counter) => counter,
            CounterCell::Shared(shared) => shared.cell(),
        }
    }

    /// Record one interrupt signal and return the escalation decision.
    ///
    /// Called from the signal-handling path only. The process-exit side
    /// effect of `ForceStop` belongs to that path (see `signals.rs`), which
    /// keeps the state machine itself observable in tests.
    pub fn signal(&self) -> SignalOutcome {
        match self.counter().fetch_add(1, Ordering::SeqCst) + 1 {
            1 => SignalOutcome::BeginDrain,
            2 => SignalOutcome::ForceStop,
            _ => SignalOutcome::Ignored,
        }
    }

    /// Current state. Side-effect-free, safe from any thread and, in
    /// process mode, from forked workers.
    pub fn state(&self) -> ShutdownState {
        match self.counter().load(Ordering::SeqCst) {
            0 => ShutdownState::Running,
            1 => ShutdownState::Draining,
            _ => ShutdownState::ForceStop,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }
}

// =============================================================================
// Shared counter page (process mode)
// =============================================================================

/// Counter on an anonymous shared page, inherited across fork.
///
/// memfd WITHOUT MFD_CLOEXEC plus MAP_SHARED: parent and children see the
/// same physical page, so a store on either side is a load on the other.
struct SharedCounter {
    page: *mut libc::c_void,
}

// The page holds a single AtomicU32; all access goes through it.
unsafe impl Send for SharedCounter {}
unsafe impl Sync for SharedCounter {}

impl SharedCounter {
    fn new() -> Result<Self> {
        let c_name = CString::new("relay_shutdown")?;

        // NO MFD_CLOEXEC - the mapping must survive into forked workers
        let fd = unsafe { libc::syscall(libc::SYS_memfd_create, c_name.as_ptr(), 0) as libc::c_int };
        if fd < 0 {
            return Err(anyhow::anyhow!(
                "memfd_create failed: {}",
                std::io::Error::last_os_error()
            ));
        }

        let page_size = std::mem::size_of::<AtomicU32>().max(8);
        unsafe {
            if libc::ftruncate(fd, page_size as i64) != 0 {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(anyhow::anyhow!("ftruncate failed: {}", err));
            }
        }

        let page = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                page_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // The mapping keeps the memfd alive; the descriptor itself is done.
        unsafe { libc::close(fd) };

        if page == libc::MAP_FAILED {
            return Err(anyhow::anyhow!(
                "mmap failed: {}",
                std::io::Error::last_os_error()
            ));
        }

        // Fresh memfd pages are zero-filled: count starts at 0 = Running.
        Ok(Self { page })
    }

    fn cell(&self) -> &AtomicU32 {
        unsafe { &*(self.page as *const AtomicU32) }
    }
}

impl Drop for SharedCounter {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.page, std::mem::size_of::<AtomicU32>().max(8));
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    #[test]
    fn test_starts_running() {
        let ctl = ShutdownController::new(PoolMode::Thread).unwrap();
        assert_eq!(ctl.state(), ShutdownState::Running);
        assert!(ctl.is_running());
    }

    #[test]
    fn test_escalation_sequence() {
        let ctl = ShutdownController::new(PoolMode::Thread).unwrap();

        assert_eq!(ctl.signal(), SignalOutcome::BeginDrain);
        assert_eq!(ctl.state(), ShutdownState::Draining);

        assert_eq!(ctl.signal(), SignalOutcome::ForceStop);
        assert_eq!(ctl.state(), ShutdownState::ForceStop);

        // A live process would have exited; the state machine stays put
        assert_eq!(ctl.signal(), SignalOutcome::Ignored);
        assert_eq!(ctl.state(), ShutdownState::ForceStop);
    }

    #[test]
    fn test_transitions_never_reverse() {
        let ctl = ShutdownController::new(PoolMode::Thread).unwrap();
        for _ in 0..10 {
            ctl.signal();
        }
        assert_eq!(ctl.state(), ShutdownState::ForceStop);
    }

    #[test]
    fn test_concurrent_signals_counted_once_each() {
        use std::sync::Arc;
        let ctl = Arc::new(ShutdownController::new(PoolMode::Thread).unwrap());

        let mut handles = Vec::new();
        let mut outcomes = Vec::new();
        for _ in 0..8 {
            let ctl = Arc::clone(&ctl);
            handles.push(std::thread::spawn(move || ctl.signal()));
        }
        for h in handles {
            outcomes.push(h.join().unwrap());
        }

        // Exactly one BeginDrain and one ForceStop among concurrent deliveries
        let drains = outcomes
            .iter()
            .filter(|o| **o == SignalOutcome::BeginDrain)
            .count();
        let stops = outcomes
            .iter()
            .filter(|o| **o == SignalOutcome::ForceStop)
            .count();
        assert_eq!(drains, 1);
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_shared_counter_in_process_mode() {
        let ctl = ShutdownController::new(PoolMode::Process).unwrap();
        assert_eq!(ctl.state(), ShutdownState::Running);
        ctl.signal();
        assert_eq!(ctl.state(), ShutdownState::Draining);
    }

    #[test]
    fn test_shared_counter_visible_across_fork() {
        let ctl = ShutdownController::new(PoolMode::Process).unwrap();
        ctl.signal(); // Draining, before the fork

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                // Child must see the parent's pre-fork transition, and a
                // post-fork child-side bump must escalate from there.
                let ok = ctl.state() == ShutdownState::Draining
                    && ctl.signal() == SignalOutcome::ForceStop;
                unsafe { libc::_exit(if ok { 0 } else { 1 }) };
            }
            ForkResult::Parent { child } => {
                match waitpid(child, None).unwrap() {
                    WaitStatus::Exited(_, code) => assert_eq!(code, 0),
                    status => panic!("unexpected child status: {:?}", status),
                }
                // And the child's bump is visible back in the parent
                assert_eq!(ctl.state(), ShutdownState::ForceStop);
            }
        }
    }
}
