//! Output aggregation.
//!
//! Folds the ordered [`OutputEvent`] sequence of one submission into an
//! immutable [`Execution`]. Stdout fragments concatenate into `text` and
//! `logs.stdout`, stderr into `logs.stderr`, rich payloads keep arrival order
//! in `results`. The first error event becomes `Execution.error` and stops
//! normal aggregation; everything collected before it is preserved.

use chrono::{DateTime, Utc};
use cellbox_protocol::{Execution, Logs, OutputEvent, RichResult, StdStream};

/// Incremental aggregator for one submission's event stream.
#[derive(Debug)]
pub struct OutputAggregator {
    exec_id: String,
    started_at: DateTime<Utc>,
    events: Vec<OutputEvent>,
    stdout: Vec<String>,
    stderr: Vec<String>,
    text: String,
    results: Vec<RichResult>,
    error: Option<cellbox_protocol::ExecutionError>,
}

impl OutputAggregator {
    /// Start aggregating for the given execution id.
    pub fn new(exec_id: impl Into<String>) -> Self {
        Self {
            exec_id: exec_id.into(),
            started_at: Utc::now(),
            events: Vec::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            text: String::new(),
            results: Vec::new(),
            error: None,
        }
    }

    /// Fold one event in.
    ///
    /// Every event is recorded in arrival order. After an error event, later
    /// fragments are no longer folded into logs or results; the error freezes
    /// the aggregate view while the raw event list stays complete.
    pub fn push(&mut self, event: OutputEvent) {
        if self.error.is_none() {
            match &event {
                OutputEvent::Stream { stream, text } => match stream {
                    StdStream::Stdout => {
                        self.text.push_str(text);
                        self.stdout.push(text.clone());
                    }
                    StdStream::Stderr => self.stderr.push(text.clone()),
                },
                OutputEvent::Result { rich } => self.results.push(rich.clone()),
                OutputEvent::Error { error } => self.error = Some(error.clone()),
            }
        }
        self.events.push(event);
    }

    /// Whether an error event has been seen.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Seal the aggregate into an immutable execution record.
    pub fn finish(self) -> Execution {
        Execution {
            id: self.exec_id,
            events: self.events,
            text: self.text,
            logs: Logs {
                stdout: self.stdout,
                stderr: self.stderr,
            },
            results: self.results,
            error: self.error,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Aggregate a complete event sequence in one call.
pub fn collect(
    exec_id: impl Into<String>,
    events: impl IntoIterator<Item = OutputEvent>,
) -> Execution {
    let mut agg = OutputAggregator::new(exec_id);
    for event in events {
        agg.push(event);
    }
    agg.finish()
}
