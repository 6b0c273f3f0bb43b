//! Execution channel.
//!
//! One logical connection between a session and its running interpreter.
//! Frames are newline-delimited JSON ([`cellbox_protocol::wire`]); the channel
//! sends code units and turns incoming frames into [`OutputEvent`]s.
//!
//! End of execution is detected via the explicit `execution_end` sentinel, not
//! via connection closure, so one channel carries many sequential executions.
//! EOF or a malformed frame before the sentinel is a [`ChannelFault`] and the
//! owning session escalates it to termination.
//!
//! Within one stream (stdout or stderr) fragment order is preserved. Across
//! the two streams only arrival order is guaranteed; interpreters flush them
//! independently.

use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use cellbox_protocol::wire::{self, InterpreterEvent, InterpreterRequest};
use cellbox_protocol::OutputEvent;

/// Boxed read/write halves of the conduit to one interpreter process.
pub struct ChannelIo {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl std::fmt::Debug for ChannelIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelIo").finish_non_exhaustive()
    }
}

/// A transport-level fault. Always fatal to the owning session: interpreter
/// state after a fault cannot be trusted, so faults are never retried here.
#[derive(Debug, Error)]
pub enum ChannelFault {
    /// The interpreter closed the connection before the sentinel.
    #[error("channel closed by interpreter")]
    Closed,

    /// A frame failed to parse.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Underlying IO failed.
    #[error("channel io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The conduit between one session and one interpreter.
pub struct ExecutionChannel {
    reader: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl std::fmt::Debug for ExecutionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionChannel").finish_non_exhaustive()
    }
}

impl ExecutionChannel {
    /// Wrap the backend's IO halves.
    pub fn new(io: ChannelIo) -> Self {
        Self {
            reader: BufReader::new(io.reader),
            writer: io.writer,
        }
    }

    /// Read one frame. `Ok(None)` means clean EOF. Blank lines are
    /// tolerated as keepalives.
    async fn read_frame(&mut self) -> Result<Option<InterpreterEvent>, ChannelFault> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            let event = wire::decode_frame(&line)
                .map_err(|e| ChannelFault::Malformed(format!("{e}: {}", line.trim_end())))?;
            return Ok(Some(event));
        }
    }

    async fn write_frame(&mut self, frame: &InterpreterRequest) -> Result<(), ChannelFault> {
        let line = wire::encode_frame(frame)
            .map_err(|e| ChannelFault::Malformed(e.to_string()))?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Consume frames until the interpreter signals readiness.
    ///
    /// Called once per session, right after provisioning. Any frame other
    /// than `ready` or `pong` this early is a protocol violation.
    pub async fn wait_ready(&mut self) -> Result<(), ChannelFault> {
        loop {
            match self.read_frame().await? {
                Some(InterpreterEvent::Ready) => {
                    debug!("interpreter signalled ready");
                    return Ok(());
                }
                Some(InterpreterEvent::Pong) => continue,
                Some(other) => {
                    return Err(ChannelFault::Malformed(format!(
                        "expected ready, got {other:?}"
                    )));
                }
                None => return Err(ChannelFault::Closed),
            }
        }
    }

    /// Transmit a code unit. Does not wait for completion.
    pub async fn send(&mut self, exec_id: &str, code: &str) -> Result<(), ChannelFault> {
        self.write_frame(&InterpreterRequest::Exec {
            exec_id: exec_id.to_string(),
            code: code.to_string(),
        })
        .await
    }

    /// Ask the interpreter to interrupt the running execution. Best-effort:
    /// a runaway interpreter may never read the frame, so callers bound this
    /// with a grace period and escalate through the backend.
    pub async fn interrupt(&mut self) -> Result<(), ChannelFault> {
        self.write_frame(&InterpreterRequest::Interrupt).await
    }

    /// Send a liveness probe frame.
    pub async fn ping(&mut self) -> Result<(), ChannelFault> {
        self.write_frame(&InterpreterRequest::Ping).await
    }

    /// Ask the interpreter to exit gracefully. First rung of the teardown
    /// escalation; the backend's kill policy handles the rest.
    pub async fn send_shutdown(&mut self) -> Result<(), ChannelFault> {
        self.write_frame(&InterpreterRequest::Shutdown).await
    }

    /// The event stream for one submission.
    ///
    /// Lazy and finite: yields `Some(event)` until the `execution_end`
    /// sentinel for `exec_id` arrives, then `None`. Consumed exactly once per
    /// submission; it is not restartable. Frames tagged with a different
    /// exec id (stragglers from an interrupted predecessor) are skipped.
    pub fn events<'a>(&'a mut self, exec_id: &'a str) -> EventStream<'a> {
        EventStream {
            channel: self,
            exec_id,
            done: false,
        }
    }
}

/// Lazy, finite sequence of output events for one submission.
pub struct EventStream<'a> {
    channel: &'a mut ExecutionChannel,
    exec_id: &'a str,
    done: bool,
}

impl EventStream<'_> {
    /// Next output event, or `None` after the end-of-execution sentinel.
    pub async fn next(&mut self) -> Result<Option<OutputEvent>, ChannelFault> {
        if self.done {
            return Ok(None);
        }
        loop {
            let frame = match self.channel.read_frame().await? {
                Some(frame) => frame,
                None => {
                    self.done = true;
                    return Err(ChannelFault::Closed);
                }
            };
            match frame {
                InterpreterEvent::Stream {
                    exec_id,
                    stream,
                    text,
                } if exec_id == self.exec_id => {
                    return Ok(Some(OutputEvent::Stream { stream, text }));
                }
                InterpreterEvent::Result { exec_id, rich } if exec_id == self.exec_id => {
                    return Ok(Some(OutputEvent::Result { rich }));
                }
                InterpreterEvent::Error { exec_id, error } if exec_id == self.exec_id => {
                    return Ok(Some(OutputEvent::Error { error }));
                }
                InterpreterEvent::ExecutionEnd { exec_id } if exec_id == self.exec_id => {
                    self.done = true;
                    return Ok(None);
                }
                InterpreterEvent::Pong => continue,
                other => {
                    warn!("skipping frame for another execution: {other:?}");
                    continue;
                }
            }
        }
    }

    /// Drain the remaining events into a vector.
    pub async fn collect_remaining(&mut self) -> Result<Vec<OutputEvent>, ChannelFault> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await? {
            events.push(event);
        }
        Ok(events)
    }
}
