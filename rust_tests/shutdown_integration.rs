//! Shutdown Escalation Tests
//!
//! These tests spawn the actual relay-core binary and verify the two-stage
//! signal contract end to end: one SIGINT drains to an orderly zero exit,
//! two SIGINTs terminate immediately with a non-zero status even while a
//! drain is blocked on in-flight work.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;
use wait_timeout::ChildExt;

fn binary_path() -> &'static str {
    env!("CARGO_BIN_EXE_relay-core")
}

/// Spawn the server and wait for its listening banner on stderr.
fn spawn_server(extra_args: &[&str]) -> (Child, SocketAddr) {
    let mut child = Command::new(binary_path())
        .args(["run", "--host", "127.0.0.1", "--port", "0", "--poll-interval-ms", "50"])
        .args(extra_args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn relay-core");

    let stderr = child.stderr.take().unwrap();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            // Keep draining so the child never blocks on a full pipe;
            // only the banner matters to the test
            let _ = tx.send(line);
        }
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    let addr = loop {
        let remaining = deadline
            .checked_duration_since(std::time::Instant::now())
            .expect("server never printed its listening banner");
        let line = rx.recv_timeout(remaining).expect("stderr closed early");
        if let Some(rest) = line.split("listening on http://").nth(1) {
            let addr = rest.split_whitespace().next().unwrap();
            break addr.parse().unwrap();
        }
    };

    (child, addr)
}

fn sigint(child: &Child) {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();
}

/// Start a request against the slow demo app without waiting for the
/// response, leaving the worker occupied.
fn occupy_worker(addr: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"GET /hold HTTP/1.0\r\n\r\n").unwrap();
    std::thread::sleep(Duration::from_millis(300)); // let it reach a worker
    client
}

#[test]
fn one_signal_drains_to_exit_zero() {
    let (mut child, _addr) = spawn_server(&["--app", "demo:hello", "--workers", "2"]);

    sigint(&child);

    match child.wait_timeout(Duration::from_secs(5)).unwrap() {
        Some(status) => assert_eq!(status.code(), Some(0)),
        None => {
            let _ = child.kill();
            panic!("server did not exit after one signal");
        }
    }
}

#[test]
fn one_signal_waits_for_in_flight_work() {
    // demo:slow holds each request for 5s; the drain must outlast it
    let (mut child, addr) = spawn_server(&["--app", "demo:slow", "--workers", "2"]);
    let _client = occupy_worker(addr);

    sigint(&child);

    // Still draining: the slow request has ~4.7s to go
    assert!(child.wait_timeout(Duration::from_secs(1)).unwrap().is_none());

    match child.wait_timeout(Duration::from_secs(10)).unwrap() {
        Some(status) => assert_eq!(status.code(), Some(0)),
        None => {
            let _ = child.kill();
            panic!("drain never completed");
        }
    }
}

/// Scenario: two signals in quick succession. Non-zero exit within about a
/// poll interval, with no guarantee for in-flight work.
#[test]
fn two_signals_force_nonzero_exit() {
    let (mut child, addr) = spawn_server(&["--app", "demo:slow", "--workers", "1"]);
    let mut client = occupy_worker(addr);

    sigint(&child);
    // Both signals land inside one 50ms poll interval
    std::thread::sleep(Duration::from_millis(20));
    sigint(&child);

    match child.wait_timeout(Duration::from_secs(2)).unwrap() {
        Some(status) => assert_eq!(status.code(), Some(1)),
        None => {
            let _ = child.kill();
            panic!("second signal did not terminate the process");
        }
    }

    // The in-flight request was abandoned, not answered
    let mut response = String::new();
    let _ = client.read_to_string(&mut response);
    assert!(!response.contains("HTTP/1.0 200"));
}

/// The second signal works even when it arrives mid-drain, while
/// WorkerPool.close() is blocked on a running worker.
#[test]
fn second_signal_interrupts_a_blocked_drain() {
    let (mut child, addr) = spawn_server(&["--app", "demo:slow", "--workers", "1"]);
    let _client = occupy_worker(addr);

    sigint(&child);
    // Well inside the 5s drain window
    std::thread::sleep(Duration::from_millis(800));
    sigint(&child);

    match child.wait_timeout(Duration::from_secs(2)).unwrap() {
        Some(status) => assert_eq!(status.code(), Some(1)),
        None => {
            let _ = child.kill();
            panic!("force stop did not bypass the drain");
        }
    }
}

#[test]
fn unknown_app_locator_fails_fast() {
    let output = Command::new(binary_path())
        .args(["run", "--app", "no:such"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown app"), "stderr: {}", stderr);
}

#[test]
fn process_mode_shutdown_is_identical() {
    let (mut child, _addr) = spawn_server(&["--app", "demo:hello", "--mode", "process"]);

    sigint(&child);

    match child.wait_timeout(Duration::from_secs(5)).unwrap() {
        Some(status) => assert_eq!(status.code(), Some(0)),
        None => {
            let _ = child.kill();
            panic!("process-mode server did not drain out");
        }
    }
}
