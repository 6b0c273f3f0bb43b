//! Shared test backend: an in-memory interpreter speaking the wire protocol
//! over duplex pipes.
//!
//! The scripted interpreter keeps integer variables across submissions, so
//! state-continuity behavior is observable without a real language runtime.
//! Recognized code forms:
//!
//! - `<ident> = <int>` — assign, no output
//! - `print(<expr>)` — `<expr>` is an int, an ident, or `<term> + <term>`;
//!   prints the value plus newline to stdout
//! - `echo <text>` — prints `<text>` plus newline to stdout
//! - `warn <text>` — prints `<text>` plus newline to stderr
//! - `1/0` — raises `ZeroDivisionError`
//! - `rich` — emits a `image/png` rich result
//! - `slow` — sleeps 300ms, then prints `done`
//! - `hang` — produces one fragment and never sends the sentinel
//! - `die` — closes the connection mid-execution (transport fault)

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use cellbox::{BackendHandle, ChannelIo, IsolationBackend, ProvisionError, SandboxInstance, SessionConfig};
use cellbox_protocol::wire::{decode_frame, encode_frame, InterpreterEvent, InterpreterRequest};
use cellbox_protocol::{ExecutionError, RichResult, StdStream};

/// Route interpreter log output through the test harness.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Backend provisioning scripted in-memory interpreters.
pub struct ScriptedBackend {
    /// The only template name `start` accepts.
    template: String,
    /// When set, the interpreter never sends `ready`.
    silent: bool,
    stops: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            template: "scripted".to_string(),
            silent: false,
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend whose interpreter never signals readiness.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::new()
        }
    }

    /// How many instances have been stopped.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn config() -> SessionConfig {
        SessionConfig::for_template("scripted")
    }
}

#[async_trait]
impl IsolationBackend for ScriptedBackend {
    async fn start(
        &self,
        config: &SessionConfig,
    ) -> Result<Box<dyn SandboxInstance>, ProvisionError> {
        if config.template != self.template {
            return Err(ProvisionError::ImageNotFound(config.template.clone()));
        }

        let (host_read, peer_write) = tokio::io::duplex(16 * 1024);
        let (peer_read, host_write) = tokio::io::duplex(16 * 1024);
        let silent = self.silent;
        let task = tokio::spawn(async move {
            run_interpreter(peer_read, peer_write, silent).await;
        });

        Ok(Box::new(ScriptedInstance {
            handle: BackendHandle::Remote {
                descriptor: "duplex:scripted".to_string(),
            },
            io: Some(ChannelIo {
                reader: Box::new(host_read),
                writer: Box::new(host_write),
            }),
            task,
            stopped: false,
            stops: Arc::clone(&self.stops),
        }))
    }
}

struct ScriptedInstance {
    handle: BackendHandle,
    io: Option<ChannelIo>,
    task: tokio::task::JoinHandle<()>,
    stopped: bool,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl SandboxInstance for ScriptedInstance {
    fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    fn take_io(&mut self) -> Option<ChannelIo> {
        self.io.take()
    }

    fn healthcheck(&mut self) -> bool {
        !self.stopped && !self.task.is_finished()
    }

    async fn interrupt(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.task.abort();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

async fn send(writer: &mut DuplexStream, event: &InterpreterEvent) -> bool {
    let line = encode_frame(event).expect("frame encodes");
    writer.write_all(line.as_bytes()).await.is_ok()
}

async fn run_interpreter(reader: DuplexStream, mut writer: DuplexStream, silent: bool) {
    let mut lines = BufReader::new(reader).lines();

    if silent {
        // Swallow input until the host gives up.
        while let Ok(Some(_)) = lines.next_line().await {}
        return;
    }

    if !send(&mut writer, &InterpreterEvent::Ready).await {
        return;
    }

    let mut vars: HashMap<String, i64> = HashMap::new();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = decode_frame::<InterpreterRequest>(&line) else {
            continue;
        };
        match request {
            InterpreterRequest::Exec { exec_id, code } => {
                if !execute(&mut writer, &mut vars, &exec_id, &code).await {
                    return;
                }
            }
            InterpreterRequest::Interrupt => {}
            InterpreterRequest::Ping => {
                if !send(&mut writer, &InterpreterEvent::Pong).await {
                    return;
                }
            }
            InterpreterRequest::Shutdown => return,
        }
    }
}

/// Returns `false` when the connection should be torn down.
async fn execute(
    writer: &mut DuplexStream,
    vars: &mut HashMap<String, i64>,
    exec_id: &str,
    code: &str,
) -> bool {
    let stdout = |text: String| InterpreterEvent::Stream {
        exec_id: exec_id.to_string(),
        stream: StdStream::Stdout,
        text,
    };
    let end = InterpreterEvent::ExecutionEnd {
        exec_id: exec_id.to_string(),
    };

    match code.trim() {
        "die" => return false,
        "hang" => {
            return send(writer, &stdout("started\n".to_string())).await;
        }
        "slow" => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            return send(writer, &stdout("done\n".to_string())).await && send(writer, &end).await;
        }
        "rich" => {
            let event = InterpreterEvent::Result {
                exec_id: exec_id.to_string(),
                rich: RichResult::new("image/png", b"\x89PNG\r\n\x1a\n"),
            };
            return send(writer, &event).await && send(writer, &end).await;
        }
        "1/0" => {
            let event = InterpreterEvent::Error {
                exec_id: exec_id.to_string(),
                error: ExecutionError {
                    kind: "ZeroDivisionError".to_string(),
                    message: "division by zero".to_string(),
                    traceback: vec!["  cell line 1, in <module>".to_string()],
                },
            };
            return send(writer, &event).await && send(writer, &end).await;
        }
        trimmed => {
            if let Some(text) = trimmed.strip_prefix("echo ") {
                return send(writer, &stdout(format!("{text}\n"))).await
                    && send(writer, &end).await;
            }
            if let Some(text) = trimmed.strip_prefix("warn ") {
                let event = InterpreterEvent::Stream {
                    exec_id: exec_id.to_string(),
                    stream: StdStream::Stderr,
                    text: format!("{text}\n"),
                };
                return send(writer, &event).await && send(writer, &end).await;
            }
            if let Some((name, value)) = trimmed.split_once(" = ") {
                if let Ok(value) = value.trim().parse::<i64>() {
                    vars.insert(name.trim().to_string(), value);
                    return send(writer, &end).await;
                }
            }
            if let Some(expr) = trimmed
                .strip_prefix("print(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                return match eval_expr(vars, expr) {
                    Ok(value) => {
                        send(writer, &stdout(format!("{value}\n"))).await
                            && send(writer, &end).await
                    }
                    Err(error) => {
                        let event = InterpreterEvent::Error {
                            exec_id: exec_id.to_string(),
                            error,
                        };
                        send(writer, &event).await && send(writer, &end).await
                    }
                };
            }
            // Anything else: a statement with no output.
            send(writer, &end).await
        }
    }
}

fn eval_expr(vars: &HashMap<String, i64>, expr: &str) -> Result<i64, ExecutionError> {
    let term = |t: &str| -> Result<i64, ExecutionError> {
        let t = t.trim();
        if let Ok(value) = t.parse::<i64>() {
            return Ok(value);
        }
        vars.get(t).copied().ok_or_else(|| ExecutionError {
            kind: "NameError".to_string(),
            message: format!("name '{t}' is not defined"),
            traceback: vec![],
        })
    };
    match expr.split_once('+') {
        Some((a, b)) => Ok(term(a)? + term(b)?),
        None => term(expr),
    }
}
