//! Shared protocol types for Cellbox.
//!
//! Two layers live here:
//!
//! - [`exec`]: the execution result model returned to callers — [`Execution`],
//!   [`OutputEvent`], [`RichResult`], [`ExecutionError`]. This is the external
//!   data contract and is stable across isolation backends.
//! - [`wire`]: the frames exchanged between the host and the interpreter
//!   runner over the execution channel. The framing is newline-delimited JSON,
//!   one message per line.

pub mod exec;
pub mod wire;

pub use exec::{Execution, ExecutionError, Logs, OutputEvent, RichResult, StdStream};
pub use wire::{InterpreterEvent, InterpreterRequest};
