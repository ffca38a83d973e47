//! Server End-to-End Tests
//!
//! Full request/response cycles through a bound server: loader-resolved
//! demo app, HTTP handler, worker pool, graceful exit. Runs the same cycle
//! in both deployment modes.

use relay_core::config::PoolMode;
use relay_core::dispatch::DispatchStats;
use relay_core::loader;
use relay_core::protocol::WorkReport;
use relay_core::reporter::Reporter;
use relay_core::server::{Server, ServerConfig};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingReporter {
    reports: Mutex<Vec<WorkReport>>,
    rejected: Mutex<Vec<String>>,
}

impl RecordingReporter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reports: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
        })
    }
}

impl Reporter for RecordingReporter {
    fn on_server_start(&self, _: &str, _: &str, _: usize) {}
    fn on_request_finished(&self, report: &WorkReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
    fn on_rejected(&self, peer: &str) {
        self.rejected.lock().unwrap().push(peer.to_string());
    }
    fn on_drain_start(&self) {}
    fn on_force_stop(&self) {}
    fn on_drained(&self, _: &DispatchStats, _: u64) {}
    fn on_error(&self, _: &str) {}
}

fn serve(mode: PoolMode, reporter: Arc<dyn Reporter>) -> (SocketAddr, impl FnOnce() -> DispatchStats) {
    let server = Server::bind(
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 2,
            mode,
            poll_interval: Duration::from_millis(20),
        },
        loader::resolve("demo:hello").unwrap(),
        reporter,
    )
    .unwrap();

    let addr = server.local_addr().unwrap();
    let controller = server.controller();
    let handle = std::thread::spawn(move || server.run().unwrap());

    let finish = move || {
        controller.signal();
        handle.join().unwrap()
    };
    (addr, finish)
}

fn get(addr: SocketAddr, path: &str) -> String {
    let mut client = TcpStream::connect(addr).unwrap();
    client
        .write_all(format!("GET {} HTTP/1.0\r\nHost: test\r\n\r\n", path).as_bytes())
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn thread_mode_serves_hello() {
    let reporter = RecordingReporter::new();
    let (addr, finish) = serve(PoolMode::Thread, reporter.clone());

    let response = get(addr, "/ping");
    assert!(response.starts_with("HTTP/1.0 200 OK"));
    assert!(response.contains("hello from relay-core"));
    assert!(response.contains("path: /ping"));

    let stats = finish();
    assert_eq!(stats.submitted, 1);

    let reports = reporter.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_ok());
    assert!(reporter.rejected.lock().unwrap().is_empty());
}

#[test]
fn process_mode_serves_hello() {
    let reporter = RecordingReporter::new();
    let (addr, finish) = serve(PoolMode::Process, reporter.clone());

    // The handler runs in a forked worker; the response still flows back
    // over the inherited connection descriptor
    let response = get(addr, "/forked");
    assert!(response.starts_with("HTTP/1.0 200 OK"));
    assert!(response.contains("path: /forked"));

    let stats = finish();
    assert_eq!(stats.submitted, 1);

    // The worker's report crossed the process boundary to the collector
    let reports = reporter.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_ok());
}

#[test]
fn sequential_requests_reuse_the_pool() {
    let reporter = RecordingReporter::new();
    let (addr, finish) = serve(PoolMode::Thread, reporter.clone());

    for i in 0..5 {
        let response = get(addr, &format!("/req/{}", i));
        assert!(response.starts_with("HTTP/1.0 200 OK"));
    }

    let stats = finish();
    assert_eq!(stats.accepted, 5);
    assert_eq!(stats.submitted, 5);
    assert_eq!(reporter.reports.lock().unwrap().len(), 5);
}

#[test]
fn malformed_request_is_reported_failed_and_closed() {
    let reporter = RecordingReporter::new();
    let (addr, finish) = serve(PoolMode::Thread, reporter.clone());

    // No request line at all: the handler fails, the executor captures it,
    // and the connection still closes
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"\r\n\r\n").unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();
    assert_eq!(response, "");

    let stats = finish();
    assert_eq!(stats.submitted, 1);

    let reports = reporter.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].is_ok());
    assert!(reports[0].message.contains("method"));
}
