//! Time-bounded multiline merging.
//!
//! Consecutive lines classified as continuations are folded into the
//! preceding message. A merge is bounded three ways: by a wall-clock flush
//! timeout, by a line-count cap and by a byte cap. The flush timer runs on
//! its own task and competes for the merger lock with `add_line` and
//! `flush`.

use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex as BytesRegex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::logs::StreamSource;

/// A complete message after multiline merging. Source and time are those of
/// the first contributing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedMessage {
    pub line: Vec<u8>,
    pub source: StreamSource,
    pub time_nano: i64,
}

/// Downstream consumer of merged messages. Called with the merger lock held,
/// so emission order matches merge order.
pub type MessageHandler = Arc<dyn Fn(MergedMessage) + Send + Sync>;

struct MergeState {
    buf: Vec<u8>,
    line_count: usize,
    source: StreamSource,
    time_nano: i64,
    has_data: bool,
    timer: Option<JoinHandle<()>>,
}

impl MergeState {
    fn seed(&mut self, line: &[u8], source: StreamSource, time_nano: i64) {
        self.buf.clear();
        self.buf.extend_from_slice(line);
        self.line_count = 1;
        self.source = source;
        self.time_nano = time_nano;
        self.has_data = true;
    }
}

/// Merges sequential continuation lines into single messages.
pub struct MultilineMerger {
    continuation: Option<BytesRegex>,
    timeout: Duration,
    max_lines: usize,
    max_bytes: usize,
    separator: Vec<u8>,
    output: MessageHandler,
    state: Arc<Mutex<MergeState>>,
}

impl MultilineMerger {
    pub fn new(cfg: &Config, output: MessageHandler) -> Self {
        MultilineMerger {
            continuation: cfg.multiline_regex.clone(),
            timeout: cfg.multiline_timeout,
            max_lines: cfg.multiline_max_lines,
            max_bytes: cfg.multiline_max_bytes,
            separator: cfg.multiline_separator.clone().into_bytes(),
            output,
            state: Arc::new(Mutex::new(MergeState {
                buf: Vec::new(),
                line_count: 0,
                source: StreamSource::Stdout,
                time_nano: 0,
                has_data: false,
                timer: None,
            })),
        }
    }

    /// Feeds one reassembled line through the merger.
    pub async fn add_line(&self, line: &[u8], source: StreamSource, time_nano: i64) {
        let Some(continuation) = &self.continuation else {
            // Merging disabled: every line is its own message, no buffering.
            (self.output)(MergedMessage {
                line: line.to_vec(),
                source,
                time_nano,
            });
            return;
        };

        let mut state = self.state.lock().await;

        if !continuation.is_match(line) {
            // A new message: whatever is buffered is complete.
            flush_locked(&mut state, &self.output);
            state.seed(line, source, time_nano);
            self.rearm_timer(&mut state);
            return;
        }

        if !state.has_data {
            // A continuation with nothing to continue becomes a new seed.
            state.seed(line, source, time_nano);
            self.rearm_timer(&mut state);
            return;
        }

        // Caps are evaluated before appending so an oversized merge is
        // flushed whole and the new line starts fresh.
        if state.line_count >= self.max_lines
            || state.buf.len() + self.separator.len() + line.len() > self.max_bytes
        {
            flush_locked(&mut state, &self.output);
            state.seed(line, source, time_nano);
            self.rearm_timer(&mut state);
            return;
        }

        state.buf.extend_from_slice(&self.separator);
        state.buf.extend_from_slice(line);
        state.line_count += 1;
        self.rearm_timer(&mut state);
    }

    /// Emits any buffered message immediately.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        flush_locked(&mut state, &self.output);
    }

    fn rearm_timer(&self, state: &mut MergeState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let shared = Arc::clone(&self.state);
        let output = Arc::clone(&self.output);
        let timeout = self.timeout;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // The buffer may have been flushed by another path while this
            // timer was pending; flush_locked re-checks has_data.
            let mut state = shared.lock().await;
            flush_locked(&mut state, &output);
        }));
    }
}

fn flush_locked(state: &mut MergeState, output: &MessageHandler) {
    if !state.has_data {
        return;
    }
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }

    let message = MergedMessage {
        line: state.buf.clone(),
        source: state.source,
        time_nano: state.time_nano,
    };
    state.buf.clear();
    state.line_count = 0;
    state.has_data = false;

    output(message);
}
