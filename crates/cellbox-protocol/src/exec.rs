//! Execution result model.
//!
//! These types describe what one code submission produced: stream fragments,
//! rich display payloads, and an optional terminal error. An [`Execution`] is
//! immutable once returned; partial output collected before an error or fault
//! is always preserved in it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Which standard stream a text fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdStream {
    Stdout,
    Stderr,
}

/// One unit of streamed output produced during execution.
///
/// Events are ordered within their own stream. Cross-stream ordering reflects
/// arrival order at the channel only; interpreters do not guarantee a strict
/// global order between stdout and stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// A text fragment from stdout or stderr.
    Stream { stream: StdStream, text: String },

    /// A rich display payload (image, table, structured data).
    Result { rich: RichResult },

    /// A runtime error raised by the submitted code.
    Error { error: ExecutionError },
}

/// A rich display payload keyed by declared content type.
///
/// The content type is an open string (e.g. `image/png`, `text/html`,
/// `application/json`), never a closed enumeration; the payload is opaque
/// bytes, base64-encoded on the wire for binary safety.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RichResult {
    /// Declared content type of the payload.
    pub content_type: String,

    /// Base64-encoded payload bytes.
    pub data: String,

    /// Optional backend-specific metadata (dimensions, dtype, etc.).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl RichResult {
    /// Build a rich result from raw payload bytes.
    pub fn new(content_type: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        Self {
            content_type: content_type.into(),
            data: BASE64.encode(data.as_ref()),
            metadata: HashMap::new(),
        }
    }

    /// Decode the payload bytes.
    pub fn data_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }
}

/// A runtime error raised inside the interpreter by the submitted code.
///
/// Not fatal to the session: the interpreter survives it and the session
/// returns to idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Error class as reported by the interpreter (e.g. `ZeroDivisionError`).
    pub kind: String,

    /// Human-readable message.
    pub message: String,

    /// Stack trace lines, innermost frame last.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceback: Vec<String>,
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Collected stream fragments, in arrival order per stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Logs {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// The aggregate result of one code submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique id of this execution.
    pub id: String,

    /// All output events in arrival order.
    #[serde(default)]
    pub events: Vec<OutputEvent>,

    /// Convenience concatenation of all stdout fragments.
    pub text: String,

    /// Stream fragments in arrival order.
    pub logs: Logs,

    /// Rich display payloads in arrival order.
    pub results: Vec<RichResult>,

    /// Terminal error, if the submitted code raised one.
    pub error: Option<ExecutionError>,

    /// When the submission was sent to the interpreter.
    pub started_at: DateTime<Utc>,

    /// When the end-of-execution sentinel (or the error) arrived.
    pub finished_at: DateTime<Utc>,
}

impl Execution {
    /// Whether the submission completed without a runtime error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rich_result_roundtrip() {
        let rich = RichResult::new("image/png", b"\x89PNG\r\n");
        assert_eq!(rich.content_type, "image/png");
        assert_eq!(rich.data_bytes().unwrap(), b"\x89PNG\r\n");
    }

    #[test]
    fn test_output_event_tagging() {
        let event = OutputEvent::Stream {
            stream: StdStream::Stdout,
            text: "hello\n".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stream");
        assert_eq!(json["stream"], "stdout");
        assert_eq!(json["text"], "hello\n");
    }

    #[test]
    fn test_error_event_shape() {
        let json = r#"{"type":"error","error":{"kind":"ZeroDivisionError","message":"division by zero","traceback":["File \"<cell>\", line 1"]}}"#;
        let event: OutputEvent = serde_json::from_str(json).unwrap();
        match event {
            OutputEvent::Error { error } => {
                assert_eq!(error.kind, "ZeroDivisionError");
                assert_eq!(error.traceback.len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_rich_result_metadata_omitted_when_empty() {
        let rich = RichResult::new("text/plain", b"42");
        let json = serde_json::to_value(&rich).unwrap();
        assert!(json.get("metadata").is_none());
    }
}
