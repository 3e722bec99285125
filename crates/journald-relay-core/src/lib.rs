//! # journald-relay-core
//!
//! Core of the journald-relay container log driver: a plugin that consumes
//! the runtime's framed per-container log streams and emits enriched,
//! severity-classified records to the systemd journal.
//!
//! ## Architecture
//!
//! - [`server`]: the plugin protocol endpoint (HTTP over a Unix socket)
//! - [`driver`]: the supervisor holding one pipeline per active container
//! - [`logs`]: the processing pipeline: framed decode, fragment
//!   reassembly, multiline merging, JSON extraction, timestamp stripping,
//!   severity classification
//! - [`journal`]: journal record construction and the send primitive
//! - [`config`]: per-container option parsing and validation
//!
//! A log driver must never crash or block the producer: stream-level
//! failures are rate-limit reported and end only the affected stream, and
//! journal backpressure propagates to the container's stdout rather than
//! dropping records.

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod driver;
pub mod journal;
pub mod logger;
pub mod logs;
pub mod server;

/// Version reported in startup diagnostics.
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs version information at startup.
pub fn log_build_info() {
    tracing::info!("journald-relay version: {}", PLUGIN_VERSION);
}
