//! nodestep - node-targeted script delivery and execution
//!
//! Copies a script to a node through a pluggable [`FileCopier`], grants it
//! execute permission on POSIX nodes and runs it through a pluggable
//! [`NodeExecutor`]. Transports are looked up by name in the registries of
//! a [`Framework`].

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event_log;
pub mod framework;
pub mod node;
pub mod provider;
pub mod registry;
pub mod result;
pub mod step;

pub use config::EngineConfig;
pub use context::{ContextBuilder, ExecutionContext};
pub use dispatch::{NodeDispatcher, ParallelDispatcher, SequentialDispatcher};
pub use error::{
    ConfigurationError, FixSuggestion, NodestepError, StepExecutionError, StepFailureCause,
    TransportError,
};
pub use event_log::{Event, EventKind, EventLog};
pub use framework::Framework;
pub use node::{NodeEntry, OsFamily};
pub use provider::{FileCopier, NodeExecutor};
pub use registry::ProviderRegistry;
pub use result::{NodeExecutorResult, NodeStepResult};
pub use step::{
    NodeOutcome, NodeResult, NodeStepExecutor, ScriptCommand, ScriptNodeStepExecutor,
    ScriptStepExecutor, StepDefinition, StepExecutionItem, StepExecutor, StepResult, StepTarget,
};
