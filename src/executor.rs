//! Per-connection execution wrapper
//!
//! Runs exactly one request/response cycle through the handler collaborator
//! and guarantees the connection is released on every exit path. Failures -
//! `Err` returns and panics alike - are captured into an explicit outcome
//! with the full diagnostic chain, never propagated to the caller. Shutdown
//! policy lives elsewhere; this component only executes what it is handed.

use crate::connection::ConnectionContext;
use crate::handler::ConnectionHandler;
use crate::protocol::WorkReport;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one execution.
#[derive(Debug)]
pub enum ExecOutcome {
    Completed { duration_ms: u64 },
    Failed(FailureRecord),
}

/// Diagnostic record for a failed execution, retained for external logging.
#[derive(Debug)]
pub struct FailureRecord {
    pub peer: String,
    pub duration_ms: u64,
    /// Full error chain (or panic payload).
    pub trace: String,
}

pub struct RequestExecutor {
    handler: Arc<dyn ConnectionHandler>,
}

impl RequestExecutor {
    pub fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self { handler }
    }

    pub fn execute(&self, mut conn: ConnectionContext) -> ExecOutcome {
        let peer = conn.peer_addr().to_string();
        let start = Instant::now();

        let result = catch_unwind(AssertUnwindSafe(|| self.handler.handle(&mut conn)));

        // Every path releases the connection, including a handler panic.
        conn.close();
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(())) => ExecOutcome::Completed { duration_ms },
            Ok(Err(e)) => ExecOutcome::Failed(FailureRecord {
                peer,
                duration_ms,
                // anyhow's alternate Debug carries the whole context chain
                trace: format!("{:?}", e),
            }),
            Err(payload) => ExecOutcome::Failed(FailureRecord {
                peer,
                duration_ms,
                trace: format!("handler panicked: {}", panic_message(&payload)),
            }),
        }
    }

    /// Execute and fold the outcome into the wire/report form used by the
    /// worker pools.
    pub fn run_to_report(&self, work_id: u64, conn: ConnectionContext) -> WorkReport {
        let peer = conn.peer_addr().to_string();
        match self.execute(conn) {
            ExecOutcome::Completed { duration_ms } => {
                WorkReport::completed(work_id, peer, duration_ms)
            }
            ExecOutcome::Failed(record) => {
                WorkReport::failed(work_id, peer, record.duration_ms, record.trace)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
