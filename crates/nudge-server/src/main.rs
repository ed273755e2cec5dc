//! nudge-server: SimplePush-style push notification server.
//!
//! Accepts WebSocket connections, binds each to a user-agent identity via
//! the `hello` handshake, and delivers pending notifications over the open
//! socket.

use clap::Parser;
use nudge_server::config::ServerConfig;
use nudge_server::locator::{Locator, LocatorRegistry, StaticLocator};
use nudge_server::metrics;
use nudge_server::server::PushServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// nudge-server: SimplePush-style push server
#[derive(Parser, Debug)]
#[command(name = "nudge-server", version, about = "SimplePush-style push server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Public hostname used in minted endpoint URLs
    #[arg(long)]
    host: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.nudge/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting nudge-server"
    );

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(Some(&config_path), cli.port, cli.host.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Locator flavors are wired here, in the composition root.
    let mut locators = LocatorRegistry::new();
    locators.register("static", |section| {
        let locator: Arc<dyn Locator> = Arc::new(StaticLocator::new(section.static_conf.clone()));
        Ok(locator)
    });
    let locator = match locators.build(&config.locator.name, &config.locator) {
        Ok(locator) => locator,
        Err(e) => {
            error!(error = %e, "failed to build locator");
            std::process::exit(1);
        }
    };
    info!(
        locator = %config.locator.name,
        max_parallel = locator.max_parallel(),
        "locator ready"
    );

    let _metrics = metrics::install_recorder();

    let server = PushServer::new(config, locator);

    // Run until shutdown signal
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {}
    }

    info!("nudge-server stopped");
}

/// Block until the process is told to stop: Ctrl+C anywhere, SIGTERM on
/// Unix. On other platforms the SIGTERM arm never fires.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!(signal = "interrupt", "stop requested"),
        _ = terminate => info!(signal = "terminate", "stop requested"),
    }
}
