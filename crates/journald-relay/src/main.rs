#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use journald_relay_core::driver::LogDriver;
use journald_relay_core::journal::sink::journal_available;
use journald_relay_core::logger::Formatter;
use journald_relay_core::server;

const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/journald-relay.sock";

#[tokio::main]
async fn main() -> ExitCode {
    let log_level = env::var("LOG_LEVEL")
        .map(|level| level.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());

    let env_filter = match EnvFilter::try_new(&log_level) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("journald-relay: invalid LOG_LEVEL {log_level:?}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("journald-relay: setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    journald_relay_core::log_build_info();

    if !journal_available() {
        warn!("systemd journal does not appear to be available on this host");
    }

    let socket_path = env::var("PLUGIN_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH));

    // A failure to bind the lifecycle endpoint is the only fatal error;
    // individual stream failures never terminate the process.
    let listener = match server::bind_plugin_socket(&socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind plugin socket {}: {e}", socket_path.display());
            return ExitCode::FAILURE;
        }
    };
    info!("plugin server listening on {}", socket_path.display());

    let driver = Arc::new(LogDriver::new());
    match server::serve(driver, listener).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("plugin server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
