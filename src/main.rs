use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use viewgate::bridge::{self, GateRegistry};
use viewgate::config::GateConfig;
use viewgate::logging::init_logging;
use viewgate::{GateHost, HttpMediaBackend};

/// Local bridge that hosts one-time-view gates for a webview.
#[derive(Debug, Parser)]
#[command(name = "viewgate", version)]
struct Args {
    /// JSON config file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the bridge port from the config.
    #[arg(long, short)]
    port: Option<u16>,

    /// Override the backend base URL from the config.
    #[arg(long)]
    backend_url: Option<String>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = match &args.config {
        Some(path) => match GateConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "[Main] could not load config");
                return ExitCode::FAILURE;
            }
        },
        None => GateConfig::default(),
    };
    if let Some(port) = args.port {
        config.bridge.port = port;
    }
    if let Some(url) = args.backend_url {
        config.backend.base_url = url;
        if let Err(e) = config.validate() {
            error!(error = %e, "[Main] invalid backend url");
            return ExitCode::FAILURE;
        }
    }

    let backend = match HttpMediaBackend::new(&config.backend) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "[Main] could not build backend client");
            return ExitCode::FAILURE;
        }
    };

    let port = config.bridge.port;
    info!(backend = %config.backend.base_url, port, "[Main] viewgate starting");
    let host = GateHost::new(config, Arc::new(backend));
    bridge::serve(GateRegistry::new(host), port).await;
    ExitCode::SUCCESS
}
