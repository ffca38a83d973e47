use anyhow::Result;
use clap::Parser;
use relay_core::config::{self, Cli, Commands, OutputFormat};
use relay_core::loader;
use relay_core::reporter::{HumanReporter, JsonReporter, Reporter};
use relay_core::server::{Server, ServerConfig};
use relay_core::signals;
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    // relay.toml [env] feeds the clap env fallbacks, so it must be applied
    // before parsing
    config::load_env_from_config(Path::new("."));
    let cli = Cli::parse();

    let reporter: Arc<dyn Reporter> = match cli.format {
        OutputFormat::Human => Arc::new(HumanReporter),
        OutputFormat::Json => Arc::new(JsonReporter),
    };

    let Commands::Run(args) = cli.command;

    let app = loader::resolve(&args.app)?;
    let server = Server::bind(
        ServerConfig {
            host: args.host.clone(),
            port: args.port,
            workers: args.worker_count(),
            mode: args.mode,
            poll_interval: args.poll_interval(),
        },
        app,
        Arc::clone(&reporter),
    )?;

    signals::install_signal_handlers(server.controller(), Arc::clone(&reporter))?;

    // Orderly drain-to-completion exits 0; a second signal exits 1 from
    // the signal path without ever returning here.
    server.run()?;
    Ok(())
}
