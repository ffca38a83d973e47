//! Configuration Loader
//! - Reads relay.toml for environment variables
//! - Provides CLI argument parsing with clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// CLI Configuration
// =============================================================================

/// Output format for server events
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable CLI output (to stderr)
    #[default]
    Human,
    /// Machine-readable NDJSON (to stdout)
    Json,
}

/// Worker pool deployment mode, fixed at construction
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PoolMode {
    /// In-process worker threads sharing memory
    #[default]
    Thread,
    /// Independent worker processes forked per connection
    Process,
}

impl PoolMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolMode::Thread => "thread",
            PoolMode::Process => "process",
        }
    }
}

/// Relay CLI - Pooled Gateway Server
#[derive(Parser)]
#[command(name = "relay", version, about = "Pooled gateway server with two-stage shutdown")]
pub struct Cli {
    /// Output format (also: RELAY_FORMAT env var)
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, env = "RELAY_FORMAT")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Serve an application
    Run(RunArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Application locator, `module:object` (also: RELAY_APP env var)
    #[arg(long, default_value = "demo:hello", env = "RELAY_APP")]
    pub app: String,

    /// Bind host (also: RELAY_HOST env var)
    #[arg(long, default_value = "127.0.0.1", env = "RELAY_HOST")]
    pub host: String,

    /// Bind port, 0 picks an ephemeral port (also: RELAY_PORT env var)
    #[arg(long, default_value_t = 5000, env = "RELAY_PORT")]
    pub port: u16,

    /// Worker capacity, defaults to the CPU count (also: RELAY_WORKERS env var)
    #[arg(long, env = "RELAY_WORKERS")]
    pub workers: Option<usize>,

    /// Pool deployment mode (also: RELAY_MODE env var)
    #[arg(long, value_enum, default_value_t = PoolMode::Thread, env = "RELAY_MODE")]
    pub mode: PoolMode,

    /// Accept poll interval in milliseconds (also: RELAY_POLL_INTERVAL_MS env var)
    #[arg(long, default_value_t = 500, env = "RELAY_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,
}

impl RunArgs {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// =============================================================================
// relay.toml Configuration
// =============================================================================

#[derive(Deserialize, Default)]
struct RelayToml {
    env: Option<HashMap<String, String>>,
}

/// Load environment variables from relay.toml and apply to current process.
///
/// This function reads the `[env]` table from relay.toml and sets each
/// key-value pair as an environment variable, so the clap `env` fallbacks
/// above pick them up. Must be called BEFORE parsing the CLI.
pub fn load_env_from_config(root: &Path) {
    let config_path = root.join("relay.toml");
    if !config_path.exists() {
        return;
    }

    let contents = match fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[config] Failed to read relay.toml: {}", e);
            return;
        }
    };

    let parsed: RelayToml = match toml::from_str(&contents) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[config] Failed to parse relay.toml: {}", e);
            return;
        }
    };

    if let Some(env_vars) = parsed.env {
        for (key, value) in env_vars {
            std::env::set_var(&key, &value);
            eprintln!("[config] Set env: {}={}", key, value);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
