//! The per-container log-processing pipeline.
//!
//! ```text
//!   [framed record stream]
//!          │
//!          v
//!   ┌──────────────┐
//!   │  FrameReader │  (length-prefixed protobuf decode)
//!   └──────┬───────┘
//!          v
//!   ┌──────────────┐
//!   │ Reassembler  │  (fragment groups → whole lines)
//!   └──────┬───────┘
//!          v
//!   ┌──────────────┐
//!   │    Merger    │  (time-bounded multiline merge)
//!   └──────┬───────┘
//!          v
//!   ┌──────────────┐
//!   │  Classifier  │  (JSON body, timestamp strip, severity)
//!   └──────┬───────┘
//!          v
//!   ┌──────────────┐
//!   │   Emitter    │  (journal record per message)
//!   └──────────────┘
//! ```
//!
//! Each active container owns exactly one pipeline; all intermediate state
//! lives inside that pipeline instance.

pub mod decoder;
pub mod json;
pub mod merger;
pub mod pipeline;
pub mod reassembler;
pub mod severity;
pub mod timestamp;

/// Which container stream a record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    /// Parses the wire-format source string. Anything other than `stderr`
    /// (including the empty string) is stdout.
    pub fn from_wire(source: &str) -> Self {
        if source == "stderr" {
            StreamSource::Stderr
        } else {
            StreamSource::Stdout
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamSource::Stdout => "stdout",
            StreamSource::Stderr => "stderr",
        }
    }
}
