//! Step-executor contract
//!
//! A workflow step either dispatches to a list of nodes (once per node) or
//! runs once on this machine. [`ScriptStepExecutor`] fans dispatch steps out
//! through a [`NodeDispatcher`] and gathers every per-node outcome.

pub mod script;

pub use script::{NodeStepExecutor, ScriptCommand, ScriptNodeStepExecutor, ScriptSource};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::context::ExecutionContext;
use crate::dispatch::{NodeDispatcher, SequentialDispatcher};
use crate::error::{ConfigurationError, StepExecutionError};
use crate::event_log::EventKind;
use crate::node::NodeEntry;
use crate::result::NodeStepResult;

/// Node name reported by step-level faults that precede any node
pub const NO_NODE: &str = "(none)";

/// Where a step runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    /// Once per listed node
    Nodes(Vec<NodeEntry>),
    /// Once, on the framework's local node
    Local,
}

/// A step as handed over by the workflow engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepExecutionItem {
    label: String,
    command: ScriptCommand,
    target: StepTarget,
}

impl StepExecutionItem {
    pub fn new(label: impl Into<String>, command: ScriptCommand, target: StepTarget) -> Self {
        Self {
            label: label.into(),
            command,
            target,
        }
    }

    /// Step dispatched to `nodes`
    pub fn dispatch(label: impl Into<String>, command: ScriptCommand, nodes: Vec<NodeEntry>) -> Self {
        Self::new(label, command, StepTarget::Nodes(nodes))
    }

    /// Step run once locally
    pub fn local(label: impl Into<String>, command: ScriptCommand) -> Self {
        Self::new(label, command, StepTarget::Local)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn command(&self) -> &ScriptCommand {
        &self.command
    }

    pub fn target(&self) -> &StepTarget {
        &self.target
    }
}

/// YAML form of a step, as read by `nodestep step`
///
/// ```yaml
/// label: deploy
/// script: |
///   echo "deploying $1"
/// args: [v2]
/// nodes:
///   - name: web1
///     hostname: web1.example.com
///     os-family: unix
/// ```
///
/// A definition without `nodes` runs locally.
#[derive(Debug, Clone, Deserialize)]
pub struct StepDefinition {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(flatten)]
    pub command: ScriptCommand,
    #[serde(default)]
    pub nodes: Option<Vec<NodeEntry>>,
}

fn default_label() -> String {
    "step".to_string()
}

impl From<StepDefinition> for StepExecutionItem {
    fn from(def: StepDefinition) -> Self {
        let target = match def.nodes {
            Some(nodes) => StepTarget::Nodes(nodes),
            None => StepTarget::Local,
        };
        Self::new(def.label, def.command, target)
    }
}

/// What happened on one node
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// The invocation completed; the result may still report failure
    Completed(NodeStepResult),
    /// The invocation could not be completed
    Faulted(Arc<StepExecutionError>),
}

impl NodeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Completed(result) if result.is_success())
    }

    pub fn result(&self) -> Option<&NodeStepResult> {
        match self {
            NodeOutcome::Completed(result) => Some(result),
            NodeOutcome::Faulted(_) => None,
        }
    }

    pub fn error(&self) -> Option<&StepExecutionError> {
        match self {
            NodeOutcome::Faulted(err) => Some(err),
            NodeOutcome::Completed(_) => None,
        }
    }
}

impl From<Result<NodeStepResult, StepExecutionError>> for NodeOutcome {
    fn from(res: Result<NodeStepResult, StepExecutionError>) -> Self {
        match res {
            Ok(result) => NodeOutcome::Completed(result),
            Err(err) => NodeOutcome::Faulted(Arc::new(err)),
        }
    }
}

/// Outcome for one named node
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub node: String,
    pub outcome: NodeOutcome,
}

/// Aggregate of one step run, node results in node order
#[derive(Debug, Clone)]
pub struct StepResult {
    label: String,
    node_results: Vec<NodeResult>,
    duration: Duration,
}

impl StepResult {
    pub fn new(label: impl Into<String>, node_results: Vec<NodeResult>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            node_results,
            duration,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn node_results(&self) -> &[NodeResult] {
        &self.node_results
    }

    /// True only when at least one node ran and every node succeeded
    pub fn is_success(&self) -> bool {
        !self.node_results.is_empty() && self.node_results.iter().all(|r| r.outcome.is_success())
    }

    /// Outcome for a node by name
    pub fn get(&self, node: &str) -> Option<&NodeOutcome> {
        self.node_results
            .iter()
            .find(|r| r.node == node)
            .map(|r| &r.outcome)
    }

    /// Names of nodes that faulted or reported failure
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.node_results
            .iter()
            .filter(|r| !r.outcome.is_success())
            .map(|r| r.node.as_str())
            .collect()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Contract between the workflow engine and a step implementation
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Whether the item runs once per node (as opposed to once locally)
    fn is_node_dispatch_step(&self, item: &StepExecutionItem) -> bool;

    async fn execute_workflow_step(
        &self,
        ctx: &ExecutionContext,
        item: &StepExecutionItem,
    ) -> Result<StepResult, StepExecutionError>;
}

/// Step executor for script steps
#[derive(Clone)]
pub struct ScriptStepExecutor {
    node_step: Arc<dyn NodeStepExecutor>,
    dispatcher: Arc<dyn NodeDispatcher>,
}

impl ScriptStepExecutor {
    /// Script node steps, dispatched sequentially with keepgoing
    pub fn new() -> Self {
        Self {
            node_step: Arc::new(ScriptNodeStepExecutor::new()),
            dispatcher: Arc::new(SequentialDispatcher::new(true)),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NodeDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_node_step_executor(mut self, node_step: Arc<dyn NodeStepExecutor>) -> Self {
        self.node_step = node_step;
        self
    }

    async fn run_target(
        &self,
        ctx: &ExecutionContext,
        item: &StepExecutionItem,
    ) -> Result<Vec<NodeResult>, StepExecutionError> {
        match item.target() {
            StepTarget::Nodes(nodes) if nodes.is_empty() => Err(StepExecutionError::new(
                NO_NODE,
                ConfigurationError::NoTargetNodes {
                    step: item.label().to_string(),
                },
            )),
            StepTarget::Nodes(nodes) => Ok(self
                .dispatcher
                .dispatch(ctx, Arc::clone(&self.node_step), item.command(), nodes)
                .await),
            StepTarget::Local => {
                let node = ctx.framework().local_node();
                let result = self
                    .node_step
                    .execute_node_step(ctx, item.command(), &node)
                    .await?;
                Ok(vec![NodeResult {
                    node: node.name,
                    outcome: NodeOutcome::Completed(result),
                }])
            }
        }
    }
}

impl Default for ScriptStepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptStepExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for ScriptStepExecutor {
    fn is_node_dispatch_step(&self, item: &StepExecutionItem) -> bool {
        matches!(item.target(), StepTarget::Nodes(_))
    }

    #[instrument(
        name = "workflow_step",
        skip_all,
        fields(step = %item.label(), user = %ctx.user(), project = %ctx.project())
    )]
    async fn execute_workflow_step(
        &self,
        ctx: &ExecutionContext,
        item: &StepExecutionItem,
    ) -> Result<StepResult, StepExecutionError> {
        let start = Instant::now();
        let step: Arc<str> = Arc::from(item.label());
        let node_count = match item.target() {
            StepTarget::Nodes(nodes) => nodes.len(),
            StepTarget::Local => 1,
        };

        // EMIT: StepStarted
        ctx.listener().emit(EventKind::StepStarted {
            step: Arc::clone(&step),
            node_count,
        });

        let outcome = self.run_target(ctx, item).await;
        let duration = start.elapsed();
        let success = matches!(&outcome, Ok(results) if results.iter().all(|r| r.outcome.is_success()));

        // EMIT: StepCompleted
        ctx.listener().emit(EventKind::StepCompleted {
            step,
            success,
            duration_ms: duration.as_millis() as u64,
        });

        let node_results = outcome?;
        info!(nodes = node_results.len(), success, "step finished");
        Ok(StepResult::new(item.label(), node_results, duration))
    }
}
