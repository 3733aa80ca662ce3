//! Engine configuration
//!
//! Config is stored in `~/.config/nodestep/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`NODESTEP_*`, `.env` is loaded by the CLI)
//! 2. Config file (`~/.config/nodestep/config.toml`)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, NodestepError};
use crate::node::{NodeEntry, OsFamily};

/// Name of the built-in local transport providers
pub const LOCAL_PROVIDER: &str = "local";

pub const ENV_FILE_COPIER: &str = "NODESTEP_FILE_COPIER";
pub const ENV_NODE_EXECUTOR: &str = "NODESTEP_NODE_EXECUTOR";
pub const ENV_UNKNOWN_OS: &str = "NODESTEP_UNKNOWN_OS";
pub const ENV_TEMP_DIR: &str = "NODESTEP_TEMP_DIR";
pub const ENV_THREADS: &str = "NODESTEP_THREADS";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Provider names used when a node carries no selection attribute
    #[serde(default)]
    pub providers: ProviderDefaults,

    /// Branch taken for nodes whose OS family is missing or unrecognized
    #[serde(default)]
    pub unknown_os_family: UnknownOsPolicy,

    /// Built-in local transport settings
    #[serde(default)]
    pub local: LocalSettings,

    /// Worker count for parallel node dispatch
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: ProviderDefaults::default(),
            unknown_os_family: UnknownOsPolicy::default(),
            local: LocalSettings::default(),
            thread_count: default_thread_count(),
        }
    }
}

/// Default provider names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderDefaults {
    #[serde(default = "local_provider")]
    pub file_copier: String,
    #[serde(default = "local_provider")]
    pub node_executor: String,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            file_copier: local_provider(),
            node_executor: local_provider(),
        }
    }
}

/// Which protocol branch unrecognized OS families take
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownOsPolicy {
    Posix,
    #[default]
    NonPosix,
}

impl std::str::FromStr for UnknownOsPolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "posix" | "unix" => Ok(Self::Posix),
            "non-posix" | "nonposix" | "windows" => Ok(Self::NonPosix),
            other => Err(ConfigurationError::InvalidConfig {
                reason: format!("unknown OS policy '{}' (expected posix or non-posix)", other),
            }),
        }
    }
}

/// Local transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalSettings {
    /// Directory delivered scripts are written to (default: `<tmp>/nodestep`)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Name of the node representing this machine
    #[serde(default = "default_local_node_name")]
    pub node_name: String,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            temp_dir: None,
            node_name: default_local_node_name(),
        }
    }
}

fn local_provider() -> String {
    LOCAL_PROVIDER.to_string()
}

fn default_thread_count() -> usize {
    1
}

fn default_local_node_name() -> String {
    "localhost".to_string()
}

impl EngineConfig {
    /// Get the config directory path
    ///
    /// Returns `~/.config/nodestep/` on Unix, `%APPDATA%/nodestep/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nodestep")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from the default location.
    ///
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Self, NodestepError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, NodestepError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| NodestepError::ConfigFile {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, NodestepError> {
        toml::from_str(content).map_err(|e| NodestepError::ConfigFile {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Merge with process environment variables
    pub fn with_env(self) -> Result<Self, ConfigurationError> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Merge with variables from an arbitrary lookup (env takes precedence)
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(name) = get(ENV_FILE_COPIER) {
            self.providers.file_copier = name;
        }
        if let Some(name) = get(ENV_NODE_EXECUTOR) {
            self.providers.node_executor = name;
        }
        if let Some(policy) = get(ENV_UNKNOWN_OS) {
            self.unknown_os_family = policy.parse()?;
        }
        if let Some(dir) = get(ENV_TEMP_DIR) {
            self.local.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(threads) = get(ENV_THREADS) {
            self.thread_count = threads.trim().parse().map_err(|_| ConfigurationError::InvalidConfig {
                reason: format!("{} must be a positive integer, got '{}'", ENV_THREADS, threads),
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.thread_count == 0 {
            return Err(ConfigurationError::InvalidConfig {
                reason: "thread_count must be at least 1".to_string(),
            });
        }
        if self.providers.file_copier.is_empty() || self.providers.node_executor.is_empty() {
            return Err(ConfigurationError::InvalidConfig {
                reason: "default provider names must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Protocol branch for a node, applying the unknown-OS policy
    pub fn os_family_for(&self, node: &NodeEntry) -> OsFamily {
        node.os_family_kind().unwrap_or(match self.unknown_os_family {
            UnknownOsPolicy::Posix => OsFamily::Posix,
            UnknownOsPolicy::NonPosix => OsFamily::NonPosix,
        })
    }

    /// Directory the local file copier writes into
    pub fn script_temp_dir(&self) -> PathBuf {
        self.local
            .temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("nodestep"))
    }

    /// Node entry describing this machine
    pub fn local_node(&self) -> NodeEntry {
        NodeEntry::local(self.local.node_name.clone())
    }
}
