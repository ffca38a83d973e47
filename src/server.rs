//! Server assembly and lifecycle
//!
//! Ties the listener, shutdown controller, worker pool and dispatcher
//! together and owns the run sequence: dispatch until Draining, then the
//! blocking pool drain, then release the listener. Signal installation is
//! the binary's job (see `signals.rs`) so tests can drive the controller
//! directly.

use crate::app::SharedApp;
use crate::config::PoolMode;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::executor::RequestExecutor;
use crate::handler::HttpConnectionHandler;
use crate::listener::TcpBoundListener;
use crate::pool::{build_pool, WorkerPool};
use crate::reporter::Reporter;
use crate::shutdown::ShutdownController;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub mode: PoolMode,
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            workers: num_cpus::get().max(1),
            mode: PoolMode::Thread,
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct Server {
    listener: TcpBoundListener,
    pool: Box<dyn WorkerPool>,
    controller: Arc<ShutdownController>,
    dispatcher: Dispatcher,
    reporter: Arc<dyn Reporter>,
    config: ServerConfig,
}

impl Server {
    /// Bind the listener and stand up the pool for the configured mode.
    /// The app arrives already resolved; locator handling lives in the
    /// loader collaborator.
    pub fn bind(config: ServerConfig, app: SharedApp, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let listener = TcpBoundListener::bind(&config.host, config.port)?;
        let controller =
            Arc::new(ShutdownController::new(config.mode).context("shutdown controller")?);
        let pool = build_pool(config.mode, config.workers, Arc::clone(&reporter))
            .context("worker pool")?;

        let executor = Arc::new(RequestExecutor::new(Arc::new(HttpConnectionHandler::new(
            app,
        ))));
        let dispatcher = Dispatcher::new(
            Arc::clone(&controller),
            executor,
            Arc::clone(&reporter),
            config.poll_interval,
        );

        Ok(Self {
            listener,
            pool,
            controller,
            dispatcher,
            reporter,
            config,
        })
    }

    /// Shared handle for wiring up signal handlers or driving shutdown
    /// from tests.
    pub fn controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.controller)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the first shutdown signal, then drain.
    ///
    /// Consumes the server: after the drain the pool is spent and the
    /// listening socket is released on drop.
    pub fn run(mut self) -> Result<DispatchStats> {
        let addr = self.local_addr()?;
        self.reporter.on_server_start(
            &addr.to_string(),
            self.config.mode.as_str(),
            self.pool.capacity(),
        );

        let stats = self.dispatcher.run(&self.listener, self.pool.as_ref());

        // Blocking drain: every submitted connection runs to completion.
        // A second signal skips all of this via the signal path's exit.
        let drain_started = Instant::now();
        self.pool.close();
        self.reporter
            .on_drained(&stats, drain_started.elapsed().as_millis() as u64);

        Ok(stats)
        // listener drops here, releasing the socket after the drain
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use crate::dispatch::DispatchStats;
    use crate::protocol::WorkReport;

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

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 2,
            mode: PoolMode::Thread,
            poll_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_bind_assigns_ephemeral_port() {
        let server = Server::bind(test_config(), demo::hello(), Arc::new(NullReporter)).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_run_exits_on_drain_signal() {
        let server = Server::bind(test_config(), demo::hello(), Arc::new(NullReporter)).unwrap();
        let controller = server.controller();

        let handle = std::thread::spawn(move || server.run().unwrap());
        std::thread::sleep(Duration::from_millis(60));
        controller.signal();

        let stats = handle.join().unwrap();
        assert_eq!(stats, DispatchStats::default());
    }

    #[test]
    fn test_default_config_is_sane() {
        let config = ServerConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.port, 5000);
    }
}
