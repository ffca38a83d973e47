//! Accept-and-route loop
//!
//! Polls the listener, consults the shutdown state, and either submits the
//! connection to the worker pool or rejects it. Two layers of rejection:
//! the loop stops calling accept at all once Draining is observed, and a
//! connection that was already accepted when the signal landed is rejected
//! at submission time, so no Draining work ever reaches the pool.

use crate::executor::RequestExecutor;
use crate::listener::Listener;
use crate::pool::{Job, WorkerPool};
use crate::reporter::Reporter;
use crate::shutdown::ShutdownController;
use std::sync::Arc;
use std::time::Duration;

/// Tally of one dispatch loop run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: usize,
    pub submitted: usize,
    pub rejected: usize,
}

pub struct Dispatcher {
    controller: Arc<ShutdownController>,
    executor: Arc<RequestExecutor>,
    reporter: Arc<dyn Reporter>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        controller: Arc<ShutdownController>,
        executor: Arc<RequestExecutor>,
        reporter: Arc<dyn Reporter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            controller,
            executor,
            reporter,
            poll_interval,
        }
    }

    /// Run until Draining is observed. Never calls `WorkerPool::close()`
    /// itself; the caller performs the blocking drain after this returns.
    /// ForceStop is never seen here - it exits the process from the signal
    /// path directly.
    pub fn run(&self, listener: &dyn Listener, pool: &dyn WorkerPool) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let mut next_work_id: u64 = 0;

        loop {
            // Draining stops the accept calls entirely
            if !self.controller.is_running() {
                break;
            }

            match listener.accept(self.poll_interval) {
                // Poll interval elapsed; go around and re-check state
                Ok(None) => continue,
                Ok(Some(conn)) => {
                    stats.accepted += 1;

                    // Reject is decided at submission time, not accept time:
                    // a signal may have landed while accept was completing.
                    if !self.controller.is_running() {
                        stats.rejected += 1;
                        self.reporter.on_rejected(&conn.peer_addr().to_string());
                        drop(conn); // closed without being handled
                        continue;
                    }

                    next_work_id += 1;
                    let work_id = next_work_id;
                    let executor = Arc::clone(&self.executor);
                    let job: Job = Box::new(move || executor.run_to_report(work_id, conn));

                    match pool.submit(job) {
                        Ok(_pending) => stats.submitted += 1,
                        Err(e) => {
                            // Submission failed; the job (and its connection)
                            // dropped inside the pool, which closes it.
                            stats.rejected += 1;
                            self.reporter.on_error(&format!("submit failed: {:#}", e));
                        }
                    }
                }
                // Accept failures other than the timeout never terminate
                // the loop; only a shutdown state change does.
                Err(e) => self.reporter.on_error(&format!("accept failed: {:#}", e)),
            }
        }

        stats
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolMode;
    use crate::connection::ConnectionContext;
    use crate::handler::ConnectionHandler;
    use crate::protocol::WorkReport;
    use crate::thread_pool::ThreadPool;
    use anyhow::Result;
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NullReporter;

    impl Reporter for NullReporter {
        fn on_server_start(&self, _: &str, _: &str, _: usize) {}
        fn on_request_finished(&self, _: &WorkReport) {}
        fn on_rejected(&self, _: &str) {}
        fn on_drain_start(&self) {}
        fn on_force_stop(&self) {}
        fn on_drained(&self, _: &DispatchStats, _: u64) {}
        fn on_error(&self, _: &str) {}
    }

    struct NoopHandler;

    impl ConnectionHandler for NoopHandler {
        fn handle(&self, _: &mut ConnectionContext) -> Result<()> {
            Ok(())
        }
    }

    /// Hands out a scripted sequence of connections, then times out forever.
    /// Optionally fires the shutdown signal at a chosen accept call,
    /// modelling the signal-vs-accept race.
    struct ScriptedListener {
        conns: Mutex<Vec<ConnectionContext>>,
        accept_calls: AtomicUsize,
        signal_on_call: Option<usize>,
        controller: Arc<ShutdownController>,
    }

    impl ScriptedListener {
        fn new(
            count: usize,
            controller: Arc<ShutdownController>,
            signal_on_call: Option<usize>,
        ) -> (Self, Vec<TcpStream>) {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let mut conns = Vec::new();
            let mut clients = Vec::new();
            for _ in 0..count {
                clients.push(TcpStream::connect(addr).unwrap());
                let (stream, peer) = listener.accept().unwrap();
                conns.push(ConnectionContext::new(stream, peer));
            }
            conns.reverse(); // pop() hands them out in connect order
            (
                Self {
                    conns: Mutex::new(conns),
                    accept_calls: AtomicUsize::new(0),
                    signal_on_call,
                    controller,
                },
                clients,
            )
        }

        fn calls(&self) -> usize {
            self.accept_calls.load(Ordering::SeqCst)
        }
    }

    impl Listener for ScriptedListener {
        fn accept(&self, _timeout: Duration) -> Result<Option<ConnectionContext>> {
            let call = self.accept_calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.signal_on_call {
                // Signal lands while this accept is completing
                self.controller.signal();
            }
            Ok(self.conns.lock().unwrap().pop())
        }
    }

    fn fixture() -> (Arc<ShutdownController>, Arc<RequestExecutor>, Arc<NullReporter>) {
        (
            Arc::new(ShutdownController::new(PoolMode::Thread).unwrap()),
            Arc::new(RequestExecutor::new(Arc::new(NoopHandler))),
            Arc::new(NullReporter),
        )
    }

    #[test]
    fn test_submissions_match_accepted_while_running() {
        let (controller, executor, reporter) = fixture();
        // 4 connections, then the 5th accept call delivers the signal
        let (listener, _clients) = ScriptedListener::new(4, Arc::clone(&controller), Some(4));
        let mut pool = ThreadPool::new(2, Arc::new(NullReporter)).unwrap();

        let dispatcher = Dispatcher::new(
            controller,
            executor,
            reporter,
            Duration::from_millis(10),
        );
        let stats = dispatcher.run(&listener, &pool);
        pool.close();

        assert_eq!(stats.accepted, 4);
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.rejected, 0);
    }

    #[test]
    fn test_race_connection_rejected_at_submission_time() {
        let (controller, executor, reporter) = fixture();
        // Signal fires inside the accept that yields the 3rd connection:
        // it was accepted while Running but must not be submitted.
        let (listener, mut clients) = ScriptedListener::new(3, Arc::clone(&controller), Some(2));
        let mut pool = ThreadPool::new(2, Arc::new(NullReporter)).unwrap();

        let dispatcher = Dispatcher::new(
            controller,
            executor,
            reporter,
            Duration::from_millis(10),
        );
        let stats = dispatcher.run(&listener, &pool);
        pool.close();

        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.rejected, 1);

        // The rejected connection was closed without being handled
        use std::io::Read;
        let mut buf = [0u8; 8];
        assert_eq!(clients[2].read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_no_accept_calls_after_draining_observed() {
        let (controller, executor, reporter) = fixture();
        let (listener, _clients) = ScriptedListener::new(2, Arc::clone(&controller), Some(2));
        let mut pool = ThreadPool::new(1, Arc::new(NullReporter)).unwrap();

        let dispatcher = Dispatcher::new(
            controller,
            executor,
            reporter,
            Duration::from_millis(10),
        );
        dispatcher.run(&listener, &pool);
        let calls_at_exit = listener.calls();
        pool.close();

        // The loop broke without touching accept again
        assert_eq!(calls_at_exit, 3);
    }

    #[test]
    fn test_draining_before_run_accepts_nothing() {
        let (controller, executor, reporter) = fixture();
        controller.signal();
        let (listener, _clients) = ScriptedListener::new(2, Arc::clone(&controller), None);
        let mut pool = ThreadPool::new(1, Arc::new(NullReporter)).unwrap();

        let dispatcher = Dispatcher::new(
            controller,
            executor,
            reporter,
            Duration::from_millis(10),
        );
        let stats = dispatcher.run(&listener, &pool);
        pool.close();

        assert_eq!(stats, DispatchStats::default());
        assert_eq!(listener.calls(), 0);
    }

    #[test]
    fn test_accept_error_does_not_terminate_loop() {
        struct FlakyListener {
            fails_left: AtomicUsize,
            controller: Arc<ShutdownController>,
        }

        impl Listener for FlakyListener {
            fn accept(&self, _: Duration) -> Result<Option<ConnectionContext>> {
                if self.fails_left.fetch_sub(1, Ordering::SeqCst) > 1 {
                    anyhow::bail!("transient accept failure");
                }
                // Last call: give the loop its exit
                self.controller.signal();
                Ok(None)
            }
        }

        let (controller, executor, reporter) = fixture();
        let listener = FlakyListener {
            fails_left: AtomicUsize::new(3),
            controller: Arc::clone(&controller),
        };
        let mut pool = ThreadPool::new(1, Arc::new(NullReporter)).unwrap();

        let dispatcher = Dispatcher::new(
            controller,
            executor,
            reporter,
            Duration::from_millis(10),
        );
        let stats = dispatcher.run(&listener, &pool);
        pool.close();

        // Survived two errors, exited only on the state change
        assert_eq!(stats, DispatchStats::default());
    }
}
