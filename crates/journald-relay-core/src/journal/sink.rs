//! The journal send primitive.
//!
//! The pipeline treats the journal as an opaque sink; production code sends
//! through the native systemd datagram socket, tests substitute a capturing
//! implementation.

use std::collections::HashMap;
use std::path::Path;

use crate::config::Priority;

/// Error from a journal send. Never fatal to a pipeline; reported through
/// the rate limiter and the message is dropped.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("journal send failed: {0}")]
    Send(String),
}

/// A destination for finished journal records.
pub trait JournalSink: Send + Sync {
    fn send(
        &self,
        message: &str,
        priority: Priority,
        fields: &HashMap<String, String>,
    ) -> Result<(), SinkError>;
}

/// Sends records to systemd-journald over its native socket protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdJournalSink;

impl JournalSink for SystemdJournalSink {
    fn send(
        &self,
        message: &str,
        priority: Priority,
        fields: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        libsystemd::logging::journal_send(
            priority.into(),
            message,
            fields.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
        .map_err(|e| SinkError::Send(e.to_string()))
    }
}

/// Whether the journald socket appears to exist on this host. Advisory
/// only; sends still surface their own errors.
pub fn journal_available() -> bool {
    Path::new("/run/systemd/journal/socket").exists()
}
