//! Interpreter wire protocol.
//!
//! Frames exchanged between the host and the interpreter runner over the
//! execution channel. The protocol uses newline-delimited JSON: each frame is
//! one JSON object on one line, tagged by a `type` field.
//!
//! End of execution is signalled by an explicit [`InterpreterEvent::ExecutionEnd`]
//! sentinel rather than by closing the connection, so that one connection can
//! carry many sequential executions. A closed or malformed stream before the
//! sentinel is a channel fault, not a completion.

use serde::{Deserialize, Serialize};

use crate::exec::{ExecutionError, RichResult, StdStream};

/// Frame sent from the host to the interpreter runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterpreterRequest {
    /// Execute a code unit. Output events carry the same `exec_id`.
    Exec { exec_id: String, code: String },

    /// Interrupt the currently running execution (best-effort).
    Interrupt,

    /// Liveness probe.
    Ping,

    /// Ask the runner to exit gracefully.
    Shutdown,
}

/// Frame sent from the interpreter runner to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterpreterEvent {
    /// Emitted once after startup, when the interpreter is ready for input.
    Ready,

    /// A text fragment from one of the standard streams.
    Stream {
        exec_id: String,
        stream: StdStream,
        text: String,
    },

    /// A rich display payload.
    Result { exec_id: String, rich: RichResult },

    /// A runtime error raised by the submitted code.
    Error {
        exec_id: String,
        error: ExecutionError,
    },

    /// End-of-execution sentinel for `exec_id`.
    ExecutionEnd { exec_id: String },

    /// Response to a ping.
    Pong,
}

/// Serialize a frame as one newline-terminated JSON line.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line into a frame.
pub fn decode_frame<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}
