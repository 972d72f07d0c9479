//! Console configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `DPCONSOLE__SECTION__KEY` environment variables. The resulting
//! [`ConsoleConfig`] is passed explicitly to every collaborator at
//! construction time; nothing reads a global base URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConsoleResult;
use crate::timeout::TimeoutConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DPCONSOLE";

/// Default debounce quantum for preview channels.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Collaborator endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every collaborator path is joined onto.
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Live preview settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Quiet period a channel must observe before its latest request is dispatched.
    pub debounce_ms: u64,
    pub timeout_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            timeout_ms: 15_000,
        }
    }
}

/// Job submission settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub commit_timeout_ms: u64,
    /// Organisation-wide cap on epsilon for a single job (unset = no cap).
    pub max_epsilon_per_job: Option<f64>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            commit_timeout_ms: 120_000,
            max_epsilon_per_job: None,
        }
    }
}

/// Local ledger storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory for scope snapshots and the audit trail; in-memory only when unset.
    pub data_dir: Option<PathBuf>,
}

/// Local ledger service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Complete console configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub api: ApiConfig,
    pub preview: PreviewConfig,
    pub jobs: JobsConfig,
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
}

impl ConsoleConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from an optional TOML file plus the environment.
    ///
    /// A missing file is not an error when `path` is `None`; an explicitly
    /// named file must exist.
    pub fn load(path: Option<&Path>) -> ConsoleResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        } else {
            builder = builder.add_source(File::new("dpconsole", FileFormat::Toml).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from a TOML string (no environment layer).
    pub fn from_toml_str(content: &str) -> ConsoleResult<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Set the collaborator base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api.base_url = url.into();
        self
    }

    /// Set the preview debounce quantum.
    pub fn with_debounce(mut self, quantum: Duration) -> Self {
        self.preview.debounce_ms = quantum.as_millis() as u64;
        self
    }

    /// Set the per-job epsilon cap.
    pub fn with_max_epsilon_per_job(mut self, cap: Option<f64>) -> Self {
        self.jobs.max_epsilon_per_job = cap;
        self
    }

    /// Set the ledger data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ledger.data_dir = Some(dir.into());
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api.base_url.trim_end_matches('/')
    }

    /// Debounce quantum as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.preview.debounce_ms)
    }

    /// Deadlines derived from the configured millisecond values.
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::new()
            .with_request_timeout(Duration::from_millis(self.api.request_timeout_ms))
            .with_preview_timeout(Duration::from_millis(self.preview.timeout_ms))
            .with_commit_timeout(Duration::from_millis(self.jobs.commit_timeout_ms))
    }
}
