//! The per-stream processing task.
//!
//! One task per active container: it reads framed records until EOF,
//! cancellation or a decode error, pushes them through reassembly and
//! multiline merging, and classifies + emits every merged message. The
//! journal send happens inline, so a slow journal back-pressures the
//! reader and, through the FIFO, the producer.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::driver::reporter::ErrorReporter;
use crate::journal::JournalEmitter;
use crate::logs::decoder::{FrameReader, LogRecord};
use crate::logs::json::{level_to_priority, parse_json_log};
use crate::logs::merger::{MergedMessage, MessageHandler, MultilineMerger};
use crate::logs::reassembler::Reassembler;
use crate::logs::severity::classify;
use crate::logs::timestamp::strip_timestamp;

/// Runs one container's log pipeline to completion.
///
/// Returns when the stream reaches EOF, the token is cancelled, or a decode
/// error ends the stream. Whatever the merger still buffers is flushed
/// before returning.
pub async fn run_pipeline<R: AsyncRead + Unpin>(
    reader: R,
    cfg: Arc<Config>,
    emitter: Arc<JournalEmitter>,
    reporter: Arc<ErrorReporter>,
    cancel: CancellationToken,
) {
    let handler = message_handler(Arc::clone(&cfg), emitter, Arc::clone(&reporter));
    let merger = MultilineMerger::new(&cfg, handler);

    let mut frames = FrameReader::new(reader);
    let mut reassembler = Reassembler::new();
    let mut record = LogRecord::default();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("LOG_PIPELINE | cancelled, draining");
                break;
            }
            next = frames.read_record(&mut record) => {
                match next {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("LOG_PIPELINE | stream closed");
                        break;
                    }
                    Err(e) => {
                        reporter.report(&format!("error decoding log entry: {e}"));
                        break;
                    }
                }
                if let Some(line) = reassembler.push(&record) {
                    merger.add_line(&line.line, line.source, line.time_nano).await;
                }
            }
        }
    }

    // The FIFO reader is dropped on return, which closes the producer
    // stream; the merger is flushed first so nothing buffered is lost.
    merger.flush().await;
}

/// Builds the post-merge stage: JSON extraction, timestamp stripping,
/// severity classification and journal emission, in that order.
fn message_handler(
    cfg: Arc<Config>,
    emitter: Arc<JournalEmitter>,
    reporter: Arc<ErrorReporter>,
) -> MessageHandler {
    Arc::new(move |msg: MergedMessage| {
        process_message(&cfg, &emitter, &reporter, msg);
    })
}

fn process_message(
    cfg: &Config,
    emitter: &JournalEmitter,
    reporter: &ErrorReporter,
    msg: MergedMessage,
) {
    let mut body = msg.line.clone();
    let mut json_fields = None;
    let mut json_priority = None;

    if let Some(parsed) = parse_json_log(cfg, &msg.line) {
        body = parsed.message.into_bytes();
        json_fields = Some(parsed.extra_fields);
        if let Some(level) = &parsed.level {
            json_priority = level_to_priority(level);
        }
    }

    // Strip before classification so severity keywords anchor at byte 0.
    if cfg.strip_timestamp {
        body = strip_timestamp(&body, &cfg.strip_timestamp_patterns).to_vec();
    }

    let (priority, line) = match json_priority {
        Some(priority) => (priority, &body[..]),
        None => classify(cfg, &body, msg.source),
    };

    if let Err(e) = emitter.emit(&msg, priority, line, json_fields.as_ref()) {
        reporter.report(&format!("error writing to journal: {e}"));
    }
}
