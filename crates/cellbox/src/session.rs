//! Session lifecycle and submission serialization.
//!
//! A [`Session`] owns one isolated environment for its whole life: it
//! provisions a backend instance, opens the execution channel, serializes
//! code submissions against the single interpreter, and guarantees teardown
//! of the backend handle on every exit path.
//!
//! State machine:
//!
//! ```text
//! provisioning -> ready -> executing <-> idle -> terminated
//! ```
//!
//! `provisioning -> terminated` on provisioning failure or timeout, and any
//! state `-> terminated` on an unrecoverable transport fault, forced
//! cancellation, or explicit close. The terminal state accepts no further
//! submissions.

use log::{debug, info, warn};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use cellbox_protocol::Execution;

use crate::aggregate::OutputAggregator;
use crate::backend::{IsolationBackend, SandboxInstance};
use crate::channel::{ChannelFault, ExecutionChannel};
use crate::config::SessionConfig;
use crate::error::{ProvisionError, SessionError, SessionResult};

/// Upper bound on the graceful shutdown frame during teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Provisioning,
    Ready,
    Executing,
    Idle,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Provisioning => "provisioning",
            SessionState::Ready => "ready",
            SessionState::Executing => "executing",
            SessionState::Idle => "idle",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

struct Inner {
    channel: ExecutionChannel,
    instance: Box<dyn SandboxInstance>,
}

/// A stateful handle to one isolated interpreter.
///
/// Interpreter state (variables, imports) persists across [`run`](Session::run)
/// calls and is wiped only on termination. Submissions are strictly
/// sequential: a second `run` while one is in flight fails with
/// [`SessionError::Busy`]. Independent sessions share nothing and run fully
/// in parallel.
pub struct Session {
    id: String,
    config: SessionConfig,
    state: StdMutex<SessionState>,
    inner: Mutex<Option<Inner>>,
}

enum RunFailure {
    Fault(ChannelFault),
    TimedOut,
}

impl Session {
    /// Provision an isolated environment and wait until its interpreter is
    /// ready, bounded by `config.timeout_ms`.
    ///
    /// On any failure the partially provisioned backend instance is stopped
    /// before the error propagates; no handle leaks.
    pub async fn create(
        config: SessionConfig,
        backend: &dyn IsolationBackend,
    ) -> Result<Self, ProvisionError> {
        let id = Uuid::new_v4().to_string();
        let budget = Duration::from_millis(config.timeout_ms);
        let started = Instant::now();
        debug!("session {id}: provisioning template '{}'", config.template);

        let mut instance = tokio::time::timeout(budget, backend.start(&config))
            .await
            .map_err(|_| ProvisionError::Timeout(config.timeout_ms))??;

        let io = match instance.take_io() {
            Some(io) => io,
            None => {
                instance.stop().await;
                return Err(ProvisionError::Io(std::io::Error::other(
                    "backend yielded no channel io",
                )));
            }
        };
        let mut channel = ExecutionChannel::new(io);

        let remaining = budget.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, channel.wait_ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(fault)) => {
                instance.stop().await;
                return Err(ProvisionError::Io(std::io::Error::other(fault.to_string())));
            }
            Err(_) => {
                instance.stop().await;
                return Err(ProvisionError::Timeout(config.timeout_ms));
            }
        }

        info!("session {id}: ready on {}", instance.handle());
        Ok(Self {
            id,
            config,
            state: StdMutex::new(SessionState::Ready),
            inner: Mutex::new(Some(Inner { channel, instance })),
        })
    }

    /// Unique id of this session.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Non-blocking liveness probe of the backing interpreter.
    ///
    /// Returns `true` while a submission is in flight (the interpreter is
    /// busy, not dead) and `false` once the session is terminated.
    pub fn healthcheck(&self) -> bool {
        match self.inner.try_lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(inner) => inner.instance.healthcheck(),
                None => false,
            },
            Err(_) => self.state() == SessionState::Executing,
        }
    }

    /// Submit one code unit and collect its output into an [`Execution`].
    ///
    /// A runtime error raised by the code is not an `Err`: it is reported in
    /// `Execution.error` and the session stays usable. `Err` values are
    /// operational: [`Busy`](SessionError::Busy) for a concurrent call,
    /// [`Closed`](SessionError::Closed) after termination,
    /// [`Lost`](SessionError::Lost) on a transport fault (the session
    /// terminates), and [`Timeout`](SessionError::Timeout) when the deadline
    /// forces a cancellation (the session terminates, since interpreter state
    /// after a forced interrupt is not trusted).
    pub async fn run(&self, code: &str) -> SessionResult<Execution> {
        let mut guard = self.inner.try_lock().map_err(|_| SessionError::Busy)?;
        let inner = guard.as_mut().ok_or(SessionError::Closed)?;

        if !inner.instance.healthcheck() {
            let reason = "interpreter process died between submissions";
            self.terminate(&mut guard, reason).await;
            return Err(SessionError::Lost(reason.to_string()));
        }

        let exec_id = Uuid::new_v4().to_string();
        debug!(
            "session {}: executing {} ({} bytes)",
            self.id,
            exec_id,
            code.len()
        );
        self.set_state(SessionState::Executing);

        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        if let Err(fault) = inner.channel.send(&exec_id, code).await {
            let reason = fault.to_string();
            self.terminate(&mut guard, &reason).await;
            return Err(SessionError::Lost(reason));
        }

        let mut agg = OutputAggregator::new(&exec_id);
        match collect_events(&mut inner.channel, &exec_id, deadline, &mut agg).await {
            Ok(()) => {
                self.set_state(SessionState::Idle);
                let execution = agg.finish();
                debug!(
                    "session {}: {} finished, error={}",
                    self.id,
                    execution.id,
                    execution.error.is_some()
                );
                Ok(execution)
            }
            Err(RunFailure::TimedOut) => {
                warn!(
                    "session {}: {} exceeded {}ms, force-cancelling",
                    self.id, exec_id, self.config.timeout_ms
                );
                // Interrupt first; terminate() escalates to forced teardown
                // if the interrupt is not honored within its bounded grace.
                let _ = inner.channel.interrupt().await;
                let _ = inner.instance.interrupt().await;
                self.terminate(&mut guard, "execution force-cancelled").await;
                Err(SessionError::Timeout(self.config.timeout_ms))
            }
            Err(RunFailure::Fault(fault)) => {
                let reason = fault.to_string();
                self.terminate(&mut guard, &reason).await;
                Err(SessionError::Lost(reason))
            }
        }
    }

    /// Tear down the backend instance and mark the session terminated.
    ///
    /// Idempotent: the second and later calls are no-ops. Waits for an
    /// in-flight submission to settle first, then releases the handle.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        self.terminate(&mut guard, "closed by caller").await;
    }

    async fn terminate(&self, guard: &mut Option<Inner>, reason: &str) {
        if let Some(mut inner) = guard.take() {
            info!("session {}: terminating ({reason})", self.id);
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, inner.channel.send_shutdown()).await;
            inner.instance.stop().await;
        }
        self.set_state(SessionState::Terminated);
    }
}

/// Drain the event stream for one submission into the aggregator, bounded by
/// the run deadline.
async fn collect_events(
    channel: &mut ExecutionChannel,
    exec_id: &str,
    deadline: Instant,
    agg: &mut OutputAggregator,
) -> Result<(), RunFailure> {
    let mut stream = channel.events(exec_id);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RunFailure::TimedOut);
        }
        match tokio::time::timeout(remaining, stream.next()).await {
            Ok(Ok(Some(event))) => agg.push(event),
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(fault)) => return Err(RunFailure::Fault(fault)),
            Err(_) => return Err(RunFailure::TimedOut),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Backend instances reap their environment on drop (kill_on_drop),
        // so an un-closed session cannot leak the interpreter. Explicit
        // close() is still the polite path.
        if let Ok(guard) = self.inner.try_lock() {
            if guard.is_some() {
                warn!("session {}: dropped without close(), reaping on drop", self.id);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("template", &self.config.template)
            .field("state", &self.state())
            .finish()
    }
}
