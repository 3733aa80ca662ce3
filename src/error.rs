//! Error types with fix suggestions
//!
//! Every type here describes an operation that could not be completed.
//! A script that ran and exited non-zero is never an error, it is a
//! `NodeExecutorResult` with `success = false`.
//!
//! Error code ranges:
//! - NODESTEP-010-019: Configuration errors (provider lookup, step definition)
//! - NODESTEP-020-029: Transport errors (file copy, command execution)
//! - NODESTEP-030-039: Step execution errors
//! - NODESTEP-040-049: CLI errors

use thiserror::Error;

/// Boxed error used as the underlying source of transport faults
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

// ═══════════════════════════════════════════
// CONFIGURATION ERRORS (010-019)
// ═══════════════════════════════════════════

/// A step or provider selection that cannot be satisfied by the current setup.
///
/// Always fatal to the invocation, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error(
        "NODESTEP-010: No {service} provider registered as '{name}' (available: {})",
        .available.join(", ")
    )]
    ProviderNotFound {
        service: &'static str,
        name: String,
        available: Vec<String>,
    },

    #[error("NODESTEP-011: Script command has no source (inline content, stream or server file)")]
    MissingScriptSource,

    #[error("NODESTEP-012: Step '{step}' dispatches to nodes but no nodes were given")]
    NoTargetNodes { step: String },

    #[error("NODESTEP-013: Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

// ═══════════════════════════════════════════
// TRANSPORT ERRORS (020-029)
// ═══════════════════════════════════════════

/// Which capability raised a transport fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    FileCopy,
    Execution,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::FileCopy => write!(f, "file-copy"),
            TransportKind::Execution => write!(f, "execution"),
        }
    }
}

/// A capability could not complete (connectivity, IO, launch failure).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("NODESTEP-020: File copy failed: {message}")]
    FileCopy {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("NODESTEP-021: Command execution failed: {message}")]
    Execution {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl TransportError {
    pub fn file_copy(message: impl Into<String>) -> Self {
        Self::FileCopy {
            message: message.into(),
            source: None,
        }
    }

    pub fn file_copy_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::FileCopy {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            source: None,
        }
    }

    pub fn execution_caused(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Execution {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::FileCopy { .. } => TransportKind::FileCopy,
            Self::Execution { .. } => TransportKind::Execution,
        }
    }

    /// Message given by the transport, without the error code prefix
    pub fn message(&self) -> &str {
        match self {
            Self::FileCopy { message, .. } | Self::Execution { message, .. } => message,
        }
    }
}

// ═══════════════════════════════════════════
// STEP EXECUTION ERRORS (030-039)
// ═══════════════════════════════════════════

/// The fault wrapped by a [`StepExecutionError`]
#[derive(Error, Debug)]
pub enum StepFailureCause {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Uniform outward-facing error of the step executors.
///
/// Carries the node it happened on and the untouched cause.
#[derive(Error, Debug)]
#[error("NODESTEP-030: Step failed on node '{node}': {cause}")]
pub struct StepExecutionError {
    node: String,
    #[source]
    cause: StepFailureCause,
}

impl StepExecutionError {
    pub fn new(node: impl Into<String>, cause: impl Into<StepFailureCause>) -> Self {
        Self {
            node: node.into(),
            cause: cause.into(),
        }
    }

    /// Name of the node the failing invocation targeted
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn cause(&self) -> &StepFailureCause {
        &self.cause
    }

    pub fn into_cause(self) -> StepFailureCause {
        self.cause
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match &self.cause {
            StepFailureCause::Transport(e) => Some(e),
            StepFailureCause::Configuration(_) => None,
        }
    }

    pub fn configuration_error(&self) -> Option<&ConfigurationError> {
        match &self.cause {
            StepFailureCause::Configuration(e) => Some(e),
            StepFailureCause::Transport(_) => None,
        }
    }
}

// ═══════════════════════════════════════════
// CLI ERRORS (040-049)
// ═══════════════════════════════════════════

/// Top-level error of the `nodestep` binary and config loading
#[derive(Error, Debug)]
pub enum NodestepError {
    #[error(transparent)]
    Step(#[from] StepExecutionError),

    /// A node fault taken out of a step result
    #[error(transparent)]
    NodeFaulted(std::sync::Arc<StepExecutionError>),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("NODESTEP-040: YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("NODESTEP-041: Config file error: {reason}")]
    ConfigFile { reason: String },

    #[error("NODESTEP-042: IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NODESTEP-043: Script exited with failure (exit code: {})", .exit_code.map_or("none".to_string(), |c| c.to_string()))]
    ScriptFailed { exit_code: Option<i32> },
}

impl FixSuggestion for ConfigurationError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ConfigurationError::ProviderNotFound { .. } => Some(
                "Register the provider on the framework or fix the node's file-copier/node-executor attribute",
            ),
            ConfigurationError::MissingScriptSource => {
                Some("Set one of: inline script content, a script stream, or a server script file")
            }
            ConfigurationError::NoTargetNodes { .. } => {
                Some("Add at least one node to the step, or make it a local step")
            }
            ConfigurationError::InvalidConfig { .. } => Some("Check ~/.config/nodestep/config.toml and NODESTEP_* env vars"),
        }
    }
}

impl FixSuggestion for TransportError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TransportError::FileCopy { .. } => Some("Check the destination directory exists and is writable on the node"),
            TransportError::Execution { .. } => Some("Check the command exists on the node and the transport is reachable"),
        }
    }
}

impl FixSuggestion for StepExecutionError {
    fn fix_suggestion(&self) -> Option<&str> {
        match &self.cause {
            StepFailureCause::Configuration(e) => e.fix_suggestion(),
            StepFailureCause::Transport(e) => e.fix_suggestion(),
        }
    }
}

impl FixSuggestion for NodestepError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            NodestepError::Step(e) => e.fix_suggestion(),
            NodestepError::NodeFaulted(e) => e.fix_suggestion(),
            NodestepError::Configuration(e) => e.fix_suggestion(),
            NodestepError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            NodestepError::ConfigFile { .. } => Some("Fix or remove ~/.config/nodestep/config.toml"),
            NodestepError::Io(_) => Some("Check file path and permissions"),
            NodestepError::ScriptFailed { .. } => None,
        }
    }
}
