//! Capability registry.
//!
//! LLM callers direct the sandbox through declared capabilities rather than
//! per-vendor branching: each capability is a record of `{ name, description,
//! parameter schema, handler }`, and dispatch is a tagged lookup by name. The
//! descriptors serialize directly into the tool-definition shape the provider
//! APIs expect.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CapabilityError;
use crate::session::Session;

/// Async handler invoked with the caller-supplied JSON arguments.
pub type CapabilityHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// What an external caller sees of a capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameters: Value,
}

/// A capability record: descriptor plus invocation handler.
#[derive(Clone)]
pub struct Capability {
    descriptor: CapabilityDescriptor,
    handler: CapabilityHandler,
}

impl Capability {
    /// Build a capability from its descriptor parts and handler.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: CapabilityHandler,
    ) -> Self {
        Self {
            descriptor: CapabilityDescriptor {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.descriptor.name)
            .finish_non_exhaustive()
    }
}

/// Registry of capability records, dispatched by name.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Capability>,
}

impl CapabilityRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any existing one with the same name.
    pub fn register(&mut self, capability: Capability) {
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    /// Whether a capability is registered under this name.
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Descriptors of all registered capabilities.
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities
            .values()
            .map(|c| c.descriptor.clone())
            .collect()
    }

    /// Invoke a capability by name with JSON arguments.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value, CapabilityError> {
        let capability = self
            .capabilities
            .get(name)
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))?;
        (capability.handler)(args)
            .await
            .map_err(|message| CapabilityError::Invocation {
                name: name.to_string(),
                message,
            })
    }
}

/// The canonical `run_code` capability: executes a code string in the given
/// session and returns the serialized [`Execution`](cellbox_protocol::Execution).
pub fn run_code_capability(session: Arc<Session>) -> Capability {
    let parameters = json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": "Source code to execute in the session interpreter"
            }
        },
        "required": ["code"]
    });

    let handler: CapabilityHandler = Arc::new(move |args: Value| {
        let session = Arc::clone(&session);
        Box::pin(async move {
            let code = args
                .get("code")
                .and_then(Value::as_str)
                .ok_or_else(|| "missing required string argument 'code'".to_string())?;
            let execution = session.run(code).await.map_err(|e| e.to_string())?;
            serde_json::to_value(&execution).map_err(|e| e.to_string())
        })
    });

    Capability::new(
        "run_code",
        "Execute code in a persistent, isolated interpreter session. \
         Variables and imports persist across calls.",
        parameters,
        handler,
    )
}
