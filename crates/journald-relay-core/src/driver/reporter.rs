//! Rate-limited error reporting.
//!
//! A broken stream or an unreachable journal can produce an error per
//! record; the reporter caps output at one line per window per pipeline and
//! accounts for everything it swallowed.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::error;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

struct ReporterState {
    last_emit: Option<Instant>,
    suppressed: u64,
}

/// Per-pipeline rate limiter for error lines.
pub struct ErrorReporter {
    window: Duration,
    state: Mutex<ReporterState>,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        ErrorReporter {
            window,
            state: Mutex::new(ReporterState {
                last_emit: None,
                suppressed: 0,
            }),
        }
    }

    /// Logs `message` unless one was already logged inside the current
    /// window. The first message after a window boundary also reports how
    /// many were suppressed before it.
    pub fn report(&self, message: &str) {
        if let Some(suppressed) = self.begin_emission(Instant::now()) {
            if suppressed > 0 {
                error!(
                    "suppressed {} errors in the last {}s",
                    suppressed,
                    self.window.as_secs()
                );
            }
            error!("{message}");
        }
    }

    /// Returns `Some(previously_suppressed)` when a message may be emitted
    /// now, `None` when it must be suppressed. Counters reset on emission.
    fn begin_emission(&self, now: Instant) -> Option<u64> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let due = state
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.window);
        if due {
            let suppressed = state.suppressed;
            state.suppressed = 0;
            state.last_emit = Some(now);
            Some(suppressed)
        } else {
            state.suppressed += 1;
            None
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}
