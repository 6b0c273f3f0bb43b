//! Isolation backends.
//!
//! A backend provisions the actual isolated environment that runs exactly one
//! interpreter instance. Process-level isolation ships here
//! ([`process::ProcessBackend`]); container- and microVM-level backends plug
//! in behind the same trait.

mod process;

pub use process::ProcessBackend;

use async_trait::async_trait;

use crate::channel::ChannelIo;
use crate::config::SessionConfig;
use crate::error::ProvisionError;

/// Opaque reference to a provisioned environment.
///
/// Exclusively owned by the session that provisioned it; meaningless after
/// teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendHandle {
    /// A local interpreter process.
    Process { pid: u32 },
    /// A container managed by an external runtime.
    Container { id: String },
    /// A remote environment reached over a connection descriptor.
    Remote { descriptor: String },
}

impl std::fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendHandle::Process { pid } => write!(f, "process:{pid}"),
            BackendHandle::Container { id } => write!(f, "container:{id}"),
            BackendHandle::Remote { descriptor } => write!(f, "remote:{descriptor}"),
        }
    }
}

/// Provisions isolated environments.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Provision one environment for the given configuration.
    ///
    /// On failure nothing may leak: the implementation tears down anything it
    /// partially provisioned before returning the error.
    async fn start(
        &self,
        config: &SessionConfig,
    ) -> Result<Box<dyn SandboxInstance>, ProvisionError>;
}

/// One provisioned isolated environment running one interpreter.
#[async_trait]
pub trait SandboxInstance: Send {
    /// The opaque handle for this environment.
    fn handle(&self) -> &BackendHandle;

    /// Take the channel IO halves. Yields `Some` exactly once; the session
    /// that provisioned the instance is the sole consumer.
    fn take_io(&mut self) -> Option<ChannelIo>;

    /// Non-blocking liveness probe. Detects silent crashes between
    /// submissions.
    fn healthcheck(&mut self) -> bool;

    /// Deliver an out-of-band interrupt to the environment. Best-effort;
    /// callers escalate to [`stop`](Self::stop) if it is not honored.
    async fn interrupt(&mut self) -> std::io::Result<()>;

    /// Tear the environment down. Escalates from graceful to forced
    /// termination, each step bounded by a fixed timeout, and never blocks
    /// indefinitely. Idempotent and infallible: teardown must succeed
    /// best-effort even against an unresponsive environment.
    async fn stop(&mut self);
}
