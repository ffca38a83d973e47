//! Reporter Module: Trait-based output for Human (CLI) and Machine (JSON) formats
//!
//! ## Architecture
//!
//! - `Reporter` trait defines the lifecycle event callbacks
//! - `JsonReporter` outputs NDJSON to stdout (for --format=json)
//! - `HumanReporter` outputs human-readable text to stderr
//!
//! ## Stdout Purity
//!
//! When JsonReporter is active, ONLY valid JSON goes to stdout. All other
//! output (notices, errors, debug) must go to stderr. Worker processes never
//! print events themselves; their reports travel back over the result
//! channel and are emitted here, in the parent, on one stream.

use crate::dispatch::DispatchStats;
use crate::protocol::WorkReport;
use serde::Serialize;

/// Machine-readable events for JSON output
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MachineEvent<'a> {
    /// Emitted once the listener is bound
    ServerStart {
        addr: &'a str,
        mode: &'a str,
        workers: usize,
    },
    /// Emitted when a dispatched connection completes
    RequestFinished {
        id: u64,
        peer: &'a str,
        status: &'a str, // "ok", "failed"
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<&'a str>,
    },
    /// Emitted when a connection is closed unhandled during drain
    ConnectionRejected { peer: &'a str },
    /// Emitted on the first interrupt signal
    DrainStart,
    /// Emitted on the second interrupt signal, just before exit
    ForceStop,
    /// Emitted after the pool drain completes
    Drained {
        accepted: usize,
        submitted: usize,
        rejected: usize,
        drain_ms: u64,
    },
    /// Emitted on a non-fatal error
    Error { message: &'a str },
}

/// Reporter trait for output abstraction
pub trait Reporter: Send + Sync {
    /// Called once the listener is bound and the pool is up
    fn on_server_start(&self, addr: &str, mode: &str, workers: usize);

    /// Called when a dispatched connection completes (either outcome)
    fn on_request_finished(&self, report: &WorkReport);

    /// Called when a connection is rejected during drain
    fn on_rejected(&self, peer: &str);

    /// Called on the first interrupt signal
    fn on_drain_start(&self);

    /// Called on the second interrupt signal
    fn on_force_stop(&self);

    /// Called after WorkerPool.close() returns
    fn on_drained(&self, stats: &DispatchStats, drain_ms: u64);

    /// Called on a non-fatal error (accept failure, worker crash, ...)
    fn on_error(&self, message: &str);
}

/// JSON Reporter - outputs NDJSON to stdout
pub struct JsonReporter;

impl JsonReporter {
    fn emit(&self, event: &MachineEvent) {
        // ONLY JsonReporter touches stdout
        println!("{}", serde_json::to_string(event).unwrap());
    }
}

impl Reporter for JsonReporter {
    fn on_server_start(&self, addr: &str, mode: &str, workers: usize) {
        self.emit(&MachineEvent::ServerStart {
            addr,
            mode,
            workers,
        });
    }

    fn on_request_finished(&self, report: &WorkReport) {
        self.emit(&MachineEvent::RequestFinished {
            id: report.work_id,
            peer: &report.peer,
            status: report.status_str(),
            duration_ms: report.duration_ms,
            message: if report.message.is_empty() {
                None
            } else {
                Some(&report.message)
            },
        });
    }

    fn on_rejected(&self, peer: &str) {
        self.emit(&MachineEvent::ConnectionRejected { peer });
    }

    fn on_drain_start(&self) {
        self.emit(&MachineEvent::DrainStart);
    }

    fn on_force_stop(&self) {
        self.emit(&MachineEvent::ForceStop);
    }

    fn on_drained(&self, stats: &DispatchStats, drain_ms: u64) {
        self.emit(&MachineEvent::Drained {
            accepted: stats.accepted,
            submitted: stats.submitted,
            rejected: stats.rejected,
            drain_ms,
        });
    }

    fn on_error(&self, message: &str) {
        self.emit(&MachineEvent::Error { message });
    }
}

/// Human Reporter - outputs text to stderr
pub struct HumanReporter;

impl Reporter for HumanReporter {
    fn on_server_start(&self, addr: &str, mode: &str, workers: usize) {
        eprintln!(
            "[relay] listening on http://{} ({} mode, {} workers)",
            addr, mode, workers
        );
        eprintln!("[relay] press Ctrl+C once for graceful shutdown, twice to force");
    }

    fn on_request_finished(&self, report: &WorkReport) {
        if report.is_ok() {
            eprintln!(
                "[relay] {} {} ({}ms)",
                report.peer,
                report.status_str(),
                report.duration_ms
            );
        } else {
            eprintln!(
                "[relay] {} failed ({}ms)\n{}",
                report.peer, report.duration_ms, report.message
            );
        }
    }

    fn on_rejected(&self, peer: &str) {
        eprintln!("[relay] rejected {} (draining)", peer);
    }

    fn on_drain_start(&self) {
        eprintln!("[relay] INFO: interrupt received: draining, press Ctrl+C again to force stop");
    }

    fn on_force_stop(&self) {
        eprintln!("[relay] WARN: second interrupt: cold shutdown, abandoning in-flight work");
    }

    fn on_drained(&self, stats: &DispatchStats, drain_ms: u64) {
        eprintln!(
            "[relay] drained: {} accepted, {} handled, {} rejected ({}ms)",
            stats.accepted, stats.submitted, stats.rejected, drain_ms
        );
    }

    fn on_error(&self, message: &str) {
        eprintln!("[relay] ERROR: {}", message);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
