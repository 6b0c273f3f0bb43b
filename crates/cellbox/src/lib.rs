//! Stateful, isolated code-execution sessions.
//!
//! Cellbox runs untrusted code inside an isolated environment and returns
//! structured results, while preserving interpreter state across successive
//! submissions — a persistent notebook-kernel primitive behind a small API:
//!
//! ```ignore
//! use cellbox::{ProcessBackend, Session, SessionConfig, TemplateCatalog};
//!
//! let backend = ProcessBackend::new(TemplateCatalog::load("templates.toml")?);
//! let session = Session::create(SessionConfig::default(), &backend).await?;
//!
//! session.run("x = 1").await?;
//! let execution = session.run("print(x + 1)").await?;
//! assert_eq!(execution.logs.stdout, vec!["2\n"]);
//!
//! session.close().await;
//! ```
//!
//! One session serializes all submissions against its single interpreter;
//! independent sessions run fully in parallel and share nothing. A runtime
//! error in submitted code is reported inside the `Execution` result and the
//! session stays usable; transport faults and forced cancellations terminate
//! the session, because interpreter state can no longer be trusted.

pub mod aggregate;
pub mod backend;
pub mod channel;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;

pub use backend::{BackendHandle, IsolationBackend, ProcessBackend, SandboxInstance};
pub use channel::{ChannelFault, ChannelIo, EventStream, ExecutionChannel};
pub use config::{SessionConfig, TemplateCatalog, TemplateSpec, DEFAULT_TIMEOUT_MS};
pub use error::{CapabilityError, ProvisionError, SessionError, SessionResult};
pub use registry::{
    run_code_capability, Capability, CapabilityDescriptor, CapabilityHandler, CapabilityRegistry,
};
pub use session::{Session, SessionState};

pub use cellbox_protocol::{Execution, ExecutionError, Logs, OutputEvent, RichResult, StdStream};
