//! Binary result protocol for worker process -> parent communication
//! Uses bincode frames with a u32 length prefix.
//!
//! Only the process pool puts these on a wire; the thread pool hands the
//! same `WorkReport` struct to the reporter in-memory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};

// Outcome status codes
pub const STATUS_OK: u8 = 0;
pub const STATUS_FAILED: u8 = 1;

/// Completion record for one dispatched connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkReport {
    pub work_id: u64,
    pub status: u8,
    pub duration_ms: u64,
    pub peer: String,
    /// Diagnostic trace on failure, empty on success. Truncated to 4KB.
    pub message: String,
}

impl WorkReport {
    pub fn completed(work_id: u64, peer: String, duration_ms: u64) -> Self {
        Self {
            work_id,
            status: STATUS_OK,
            duration_ms,
            peer,
            message: String::new(),
        }
    }

    pub fn failed(work_id: u64, peer: String, duration_ms: u64, message: String) -> Self {
        Self {
            work_id,
            status: STATUS_FAILED,
            duration_ms,
            peer,
            message: truncate_message(message),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn status_str(&self) -> &'static str {
        match self.status {
            STATUS_OK => "ok",
            STATUS_FAILED => "failed",
            _ => "unknown",
        }
    }
}

fn truncate_message(msg: String) -> String {
    const MAX_LEN: usize = 4096;
    if msg.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &msg[..end])
    } else {
        msg
    }
}

/// Encode a struct to bincode bytes with length prefix
pub fn encode_with_length<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value).context("bincode encode")?;
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read one length-prefixed frame. `Ok(None)` on clean EOF (all writers
/// closed), `Err` on a torn frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("read frame length"),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).context("read frame payload")?;
    Ok(Some(payload))
}

pub fn decode_report(payload: &[u8]) -> Result<WorkReport> {
    bincode::deserialize(payload).context("bincode decode WorkReport")
}

// =============================================================================
// Unit Tests
// =============================================================================
