//! Session configuration and the interpreter template catalog.
//!
//! A template names an interpreter environment image: the command line that
//! starts an interpreter runner speaking the wire protocol on stdio, plus its
//! base environment. Catalogs are defined programmatically or parsed from
//! TOML. Unrecognized keys are ignored rather than rejected, so configs
//! written for newer backends still load.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default deadline applied to provisioning and to each submission.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Options recognized when creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Which interpreter template to provision.
    pub template: String,

    /// Deadline in milliseconds for provisioning and for each `run` call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra environment variables for the interpreter process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            template: "python".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            env: HashMap::new(),
        }
    }
}

impl SessionConfig {
    /// Config for a named template with default deadlines.
    pub fn for_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Self::default()
        }
    }

    /// Override the provisioning/run deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// How to launch one interpreter environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Binary to execute.
    pub command: String,

    /// Arguments passed to the binary.
    #[serde(default)]
    pub args: Vec<String>,

    /// Base environment variables. Session-level `env` entries override these.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the interpreter process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

/// Named interpreter templates available to the process backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateCatalog {
    #[serde(default)]
    templates: HashMap<String, TemplateSpec>,
}

impl TemplateCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any existing one with the same name.
    pub fn with_template(mut self, name: impl Into<String>, spec: TemplateSpec) -> Self {
        self.templates.insert(name.into(), spec);
        self
    }

    /// Look up a template by name.
    pub fn resolve(&self, name: &str) -> Option<&TemplateSpec> {
        self.templates.get(name)
    }

    /// Names of all registered templates.
    pub fn template_names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a catalog from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text).map_err(std::io::Error::other)
    }
}
