//! Signal Handling for Two-Stage Shutdown
//!
//! Routes interrupt signals into the shutdown state machine:
//! - First SIGINT/SIGTERM/SIGQUIT: begin draining (stop accepting, finish
//!   what's running)
//! - Second: cold shutdown, immediate non-zero exit
//!
//! ## Architecture
//!
//! Signal thread is spawned as a daemon - it will automatically die when
//! the main thread exits. Signals only ever write into the controller;
//! the dispatch loop observes the state on its own poll schedule.

use crate::reporter::Reporter;
use crate::shutdown::{ShutdownController, SignalOutcome};
use anyhow::Result;
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::thread;

/// Exit status used for a forced (second-signal) shutdown.
pub const FORCE_STOP_EXIT_CODE: i32 = 1;

/// Install signal handlers for two-stage shutdown
///
/// Spawns a daemon thread that listens for SIGINT, SIGTERM and SIGQUIT and
/// feeds each delivery into the escalation counter. The ForceStop outcome
/// terminates the process right here, bypassing any in-progress drain.
pub fn install_signal_handlers(
    controller: Arc<ShutdownController>,
    reporter: Arc<dyn Reporter>,
) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;

    // Spawn daemon thread - will die when main exits
    thread::spawn(move || {
        for _sig in signals.forever() {
            match controller.signal() {
                SignalOutcome::BeginDrain => reporter.on_drain_start(),
                SignalOutcome::ForceStop => {
                    reporter.on_force_stop();
                    std::process::exit(FORCE_STOP_EXIT_CODE);
                }
                SignalOutcome::Ignored => {}
            }
        }
    });

    Ok(())
}
