//! Stream supervision.
//!
//! The driver keeps a registry of active pipelines keyed by FIFO path,
//! starts one on every `StartLogging` and tears it down, waiting for the
//! drain, on `StopLogging`. Failures inside a stream never escape the
//! stream's own task.

pub mod reporter;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::unix::pipe;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, ConfigError};
use crate::journal::{ContainerInfo, EmitterError, JournalEmitter, JournalSink, SystemdJournalSink};
use crate::logs::pipeline::run_pipeline;
use self::reporter::ErrorReporter;

/// Errors surfaced as `StartLogging` failures.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid log options: {0}")]
    Config(#[from] ConfigError),

    #[error("building journal fields: {0}")]
    Emitter(#[from] EmitterError),

    #[error("opening log stream {path}: {source}")]
    OpenStream {
        path: String,
        source: std::io::Error,
    },
}

struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The log driver: a registry of per-container pipelines.
pub struct LogDriver {
    streams: Mutex<HashMap<String, StreamHandle>>,
    sink: Arc<dyn JournalSink>,
}

impl LogDriver {
    /// A driver that sends to the host journal.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(SystemdJournalSink))
    }

    /// A driver with a custom sink, used by tests.
    pub fn with_sink(sink: Arc<dyn JournalSink>) -> Self {
        LogDriver {
            streams: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Starts consuming the container's log stream.
    ///
    /// Validates options and renders the base journal fields before the
    /// FIFO is opened; any failure is returned to the host and nothing is
    /// registered.
    pub async fn start_logging(
        &self,
        fifo_path: &str,
        info: &ContainerInfo,
    ) -> Result<(), DriverError> {
        let cfg = Arc::new(Config::parse(&info.config)?);
        let emitter = Arc::new(JournalEmitter::new(
            Arc::clone(&cfg),
            info,
            Arc::clone(&self.sink),
        )?);

        let fifo = pipe::OpenOptions::new()
            .open_receiver(fifo_path)
            .map_err(|source| DriverError::OpenStream {
                path: fifo_path.to_string(),
                source,
            })?;

        let cancel = CancellationToken::new();
        let reporter = Arc::new(ErrorReporter::new());
        let task = tokio::spawn(run_pipeline(
            fifo,
            cfg,
            emitter,
            reporter,
            cancel.clone(),
        ));

        let previous = {
            let mut streams = self.streams.lock().await;
            streams.insert(fifo_path.to_string(), StreamHandle { cancel, task })
        };
        if let Some(previous) = previous {
            // The host should never start the same stream twice, but if it
            // does the older pipeline must not linger on the FIFO.
            warn!("LOG_DRIVER | replacing existing pipeline for {fifo_path}");
            previous.cancel.cancel();
        }

        debug!("LOG_DRIVER | started logging for {fifo_path}");
        Ok(())
    }

    /// Stops a stream and waits for its pipeline to drain. Unknown paths
    /// succeed silently, so the call is idempotent.
    pub async fn stop_logging(&self, fifo_path: &str) {
        let handle = {
            let mut streams = self.streams.lock().await;
            streams.remove(fifo_path)
        };

        let Some(handle) = handle else {
            debug!("LOG_DRIVER | stop for unknown stream {fifo_path}");
            return;
        };

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!("LOG_DRIVER | pipeline task for {fifo_path} failed: {e}");
        }
        debug!("LOG_DRIVER | stopped logging for {fifo_path}");
    }

    /// Number of currently registered streams.
    pub async fn active_streams(&self) -> usize {
        self.streams.lock().await.len()
    }
}

impl Default for LogDriver {
    fn default() -> Self {
        Self::new()
    }
}
