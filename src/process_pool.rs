//! Process-based worker pool
//!
//! A manager thread forks one worker process per job, bounded by capacity
//! via waitpid reaping. Workers inherit the accepted socket across the fork,
//! run the job in their own address space, ship a `WorkReport` frame back
//! over an inherited Unix socket, and `_exit`. A collector thread in the
//! parent decodes frames and forwards them to the reporter, keeping all
//! event output on the parent's streams.

use crate::pool::{Job, PendingWork, WorkerPool};
use crate::protocol;
use crate::reporter::Reporter;
use anyhow::{ensure, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use nix::errno::Errno;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct Submission {
    job: Job,
    done: Arc<AtomicBool>,
}

pub struct ProcessPool {
    tx: Option<Sender<Submission>>,
    manager: Option<JoinHandle<()>>,
    collector: Option<JoinHandle<()>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl ProcessPool {
    pub fn new(capacity: usize, reporter: Arc<dyn Reporter>) -> Result<Self> {
        ensure!(capacity > 0, "worker capacity must be positive");

        let (tx, rx) = unbounded::<Submission>();
        let (parent_sock, worker_sock) = UnixStream::pair().context("result socketpair")?;

        let collector_reporter = Arc::clone(&reporter);
        let collector = std::thread::Builder::new()
            .name("relay-pool-collector".to_string())
            .spawn(move || {
                let mut sock = parent_sock;
                loop {
                    match protocol::read_frame(&mut sock) {
                        Ok(Some(payload)) => match protocol::decode_report(&payload) {
                            Ok(report) => collector_reporter.on_request_finished(&report),
                            Err(e) => {
                                collector_reporter.on_error(&format!("bad worker report: {:#}", e))
                            }
                        },
                        // EOF: manager and every worker dropped the write end
                        Ok(None) => break,
                        Err(e) => {
                            collector_reporter.on_error(&format!("result channel: {:#}", e));
                            break;
                        }
                    }
                }
            })
            .context("spawn pool collector")?;

        let manager = std::thread::Builder::new()
            .name("relay-pool-manager".to_string())
            .spawn(move || manager_loop(rx, worker_sock, capacity, reporter))
            .context("spawn pool manager")?;

        Ok(Self {
            tx: Some(tx),
            manager: Some(manager),
            collector: Some(collector),
            capacity,
            next_id: AtomicU64::new(0),
        })
    }
}

impl WorkerPool for ProcessPool {
    fn submit(&self, job: Job) -> Result<PendingWork> {
        let tx = self.tx.as_ref().context("pool is closed")?;

        let pending = PendingWork::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let sub = Submission {
            job,
            done: pending.completion_flag(),
        };
        tx.send(sub).map_err(|_| anyhow::anyhow!("pool is closed"))?;
        Ok(pending)
    }

    fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            drop(tx);
        }
        if let Some(manager) = self.manager.take() {
            let _ = manager.join();
        }
        if let Some(collector) = self.collector.take() {
            let _ = collector.join();
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Manager: fork, bound, reap
// =============================================================================

fn manager_loop(
    rx: Receiver<Submission>,
    mut result_sock: UnixStream,
    capacity: usize,
    reporter: Arc<dyn Reporter>,
) {
    let mut active: Vec<(Pid, Arc<AtomicBool>)> = Vec::new();

    while let Ok(sub) = rx.recv() {
        // Capacity bounds running workers; the queue itself is unbounded
        while active.len() >= capacity {
            wait_one(&mut active, reporter.as_ref());
        }

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                // Worker process. Run the job, ship the report, vanish.
                // _exit, not exit: the child must not run the parent's
                // atexit handlers or flush its cloned stdio buffers.
                //
                // A terminal Ctrl+C signals the whole foreground group;
                // workers must stay deaf to it so the parent's drain
                // decides their fate.
                unsafe {
                    let _ = signal(Signal::SIGINT, SigHandler::SigIgn);
                    let _ = signal(Signal::SIGTERM, SigHandler::SigIgn);
                    let _ = signal(Signal::SIGQUIT, SigHandler::SigIgn);
                }
                let report = (sub.job)();
                match protocol::encode_with_length(&report) {
                    Ok(frame) => {
                        let _ = result_sock.write_all(&frame);
                    }
                    Err(_) => unsafe { libc::_exit(2) },
                }
                unsafe { libc::_exit(0) };
            }
            Ok(ForkResult::Parent { child }) => {
                active.push((child, sub.done));
                sweep(&mut active, reporter.as_ref());
                // sub.job drops here: the parent's descriptor for the
                // connection closes, leaving the worker's copy as the
                // last holder.
            }
            Err(e) => {
                reporter.on_error(&format!("fork failed: {}", e));
                sub.done.store(true, Ordering::SeqCst);
            }
        }
    }

    // Channel disconnected: full drain of everything still running
    while !active.is_empty() {
        wait_one(&mut active, reporter.as_ref());
    }
    // Last write end in the parent; dropping it gives the collector EOF
    drop(result_sock);
}

/// Block until one of our workers exits.
fn wait_one(active: &mut Vec<(Pid, Arc<AtomicBool>)>, reporter: &dyn Reporter) {
    // Wait on the oldest worker specifically, never pid -1: this pool must
    // not reap children it did not fork.
    let oldest = active[0].0;
    loop {
        match waitpid(oldest, None) {
            Ok(WaitStatus::Exited(pid, code)) => {
                finish(active, pid);
                if code != 0 {
                    reporter.on_error(&format!("worker {} exited with status {}", pid, code));
                }
                break;
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                finish(active, pid);
                reporter.on_error(&format!("worker {} killed by {:?}", pid, sig));
                break;
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(_) => {
                finish(active, oldest);
                break;
            }
        }
    }
    // Younger workers may have finished first; pick them up now
    sweep(active, reporter);
}

/// Non-blocking pass over every active worker.
fn sweep(active: &mut Vec<(Pid, Arc<AtomicBool>)>, reporter: &dyn Reporter) {
    let pids: Vec<Pid> = active.iter().map(|(pid, _)| *pid).collect();
    for pid in pids {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(WaitStatus::Exited(pid, code)) => {
                finish(active, pid);
                if code != 0 {
                    reporter.on_error(&format!("worker {} exited with status {}", pid, code));
                }
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                finish(active, pid);
                reporter.on_error(&format!("worker {} killed by {:?}", pid, sig));
            }
            Ok(_) => {}
            Err(Errno::ECHILD) => finish(active, pid),
            Err(Errno::EINTR) => {}
            Err(e) => reporter.on_error(&format!("waitpid {}: {}", pid, e)),
        }
    }
}

fn finish(active: &mut Vec<(Pid, Arc<AtomicBool>)>, pid: Pid) {
    if let Some(i) = active.iter().position(|(p, _)| *p == pid) {
        let (_, done) = active.swap_remove(i);
        done.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
