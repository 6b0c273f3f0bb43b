//! Error types for session and backend operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors from provisioning an isolation backend instance.
///
/// Fatal to the `create` call. The core does not retry; callers may retry
/// `create` themselves.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The host refused to provision another environment.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The requested template does not exist in the catalog.
    #[error("template not found: {0}")]
    ImageNotFound(String),

    /// The backend did not signal readiness within the deadline.
    #[error("provisioning timed out after {0}ms")]
    Timeout(u64),

    /// The environment process failed to spawn.
    #[error("failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    /// Generic IO error during provisioning.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operational errors on an established session.
///
/// Runtime errors raised by the submitted code are not here: those are data,
/// reported inside `Execution.error`, and leave the session usable.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Another submission is already in flight on this session.
    #[error("session busy: a code unit is already executing")]
    Busy,

    /// The session is terminated; no further submissions are accepted.
    #[error("session closed")]
    Closed,

    /// The transport or interpreter failed mid-session. Interpreter state can
    /// no longer be trusted; the session is terminated.
    #[error("session lost: {0}")]
    Lost(String),

    /// The submission exceeded the configured deadline and was force-cancelled.
    /// The session is terminated, since interpreter state after a forced
    /// interrupt is not trusted to be consistent.
    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// Provisioning failed before the session became ready.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Errors from capability registry dispatch.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// No capability registered under this name.
    #[error("unknown capability: {0}")]
    Unknown(String),

    /// The handler rejected the arguments or failed while running.
    #[error("capability '{name}' failed: {message}")]
    Invocation { name: String, message: String },
}
