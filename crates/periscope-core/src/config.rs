//! Agent configuration.
//!
//! Validated at load time with defaults for every field, so an empty TOML
//! document yields a usable configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShimError};

/// Agent configuration consumed by shims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Application name reported with every transaction.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Master switch. When false every wrap is a no-op.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum segments recorded per transaction (root included).
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,

    /// Whether starting a transaction inside another one nests it as a
    /// subordinate unit instead of replacing the ambient transaction.
    #[serde(default = "default_true")]
    pub nest_transactions: bool,

    /// Number of diagnostics retained in memory.
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,

    /// Data-access specific settings.
    #[serde(default)]
    pub datastore: DatastoreConfig,

    /// Per-module switches keyed by module name.
    #[serde(default)]
    pub instrumentation: HashMap<String, ModuleConfig>,
}

fn default_app_name() -> String {
    "periscope-app".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_max_segments() -> usize {
    900
}

const fn default_diagnostics_capacity() -> usize {
    100
}

impl AgentConfig {
    /// Creates a configuration with defaults and the given app name.
    #[must_use]
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            enabled: true,
            max_segments: default_max_segments(),
            nest_transactions: true,
            diagnostics_capacity: default_diagnostics_capacity(),
            datastore: DatastoreConfig::default(),
            instrumentation: HashMap::new(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(ShimError::config("app_name cannot be empty"));
        }
        if self.max_segments == 0 {
            return Err(ShimError::config("max_segments must be at least 1"));
        }
        self.datastore.validate()?;
        Ok(())
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document cannot be parsed or is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ShimError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Returns true if instrumentation for `module` should run.
    #[must_use]
    pub fn is_module_enabled(&self, module: &str) -> bool {
        self.enabled
            && self
                .instrumentation
                .get(module)
                .is_none_or(|m| m.enabled)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(default_app_name())
    }
}

/// Data-access instrumentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Attach the query text to datastore segments.
    #[serde(default = "default_true")]
    pub record_queries: bool,

    /// Replace literals in recorded queries with `?`.
    #[serde(default = "default_true")]
    pub obfuscate_queries: bool,

    /// Recorded queries are truncated to this many bytes.
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
}

const fn default_max_query_length() -> usize {
    2000
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            record_queries: true,
            obfuscate_queries: true,
            max_query_length: default_max_query_length(),
        }
    }
}

impl DatastoreConfig {
    /// Validates datastore settings.
    ///
    /// # Errors
    /// Returns an error if `max_query_length` is too small to be useful.
    pub fn validate(&self) -> Result<()> {
        if self.max_query_length < 16 {
            return Err(ShimError::config("max_query_length must be at least 16"));
        }
        Ok(())
    }
}

/// Per-module instrumentation switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Whether the module's shim wraps anything.
    #[serde(default = "default_true")]
    pub enabled: bool,
}
