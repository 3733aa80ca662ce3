//! Node dispatchers: how a dispatch step fans out over its nodes
//!
//! - [`SequentialDispatcher`]: node order, optionally stopping at the first
//!   failure
//! - [`ParallelDispatcher`]: up to `ctx.thread_count()` nodes at once
//!
//! Both return one [`NodeResult`] per node that ran, in node order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::error::{StepExecutionError, TransportError};
use crate::node::NodeEntry;
use crate::step::{NodeOutcome, NodeResult, NodeStepExecutor, ScriptCommand};

/// Fan-out policy for dispatch steps
#[async_trait]
pub trait NodeDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        executor: Arc<dyn NodeStepExecutor>,
        command: &ScriptCommand,
        nodes: &[NodeEntry],
    ) -> Vec<NodeResult>;
}

/// Runs nodes one after another
#[derive(Debug, Clone, Copy)]
pub struct SequentialDispatcher {
    keepgoing: bool,
}

impl SequentialDispatcher {
    /// With `keepgoing = false`, nodes after the first failed or faulted one are not run
    pub fn new(keepgoing: bool) -> Self {
        Self { keepgoing }
    }
}

#[async_trait]
impl NodeDispatcher for SequentialDispatcher {
    async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        executor: Arc<dyn NodeStepExecutor>,
        command: &ScriptCommand,
        nodes: &[NodeEntry],
    ) -> Vec<NodeResult> {
        let mut results = Vec::with_capacity(nodes.len());

        for node in nodes {
            let outcome = NodeOutcome::from(executor.execute_node_step(ctx, command, node).await);
            let stop = !self.keepgoing && !outcome.is_success();
            results.push(NodeResult {
                node: node.name.clone(),
                outcome,
            });

            if stop {
                debug!(node = %node.name, skipped = nodes.len() - results.len(), "stopping after failure");
                break;
            }
        }

        results
    }
}

/// Runs nodes concurrently, bounded by the context's thread count
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelDispatcher;

impl ParallelDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeDispatcher for ParallelDispatcher {
    async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        executor: Arc<dyn NodeStepExecutor>,
        command: &ScriptCommand,
        nodes: &[NodeEntry],
    ) -> Vec<NodeResult> {
        let permits = Arc::new(Semaphore::new(ctx.thread_count()));
        let mut tasks = JoinSet::new();

        for (index, node) in nodes.iter().cloned().enumerate() {
            let permits = Arc::clone(&permits);
            let executor = Arc::clone(&executor);
            let ctx = ctx.clone();
            let command = command.clone();

            tasks.spawn(async move {
                // semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let outcome = NodeOutcome::from(executor.execute_node_step(&ctx, &command, &node).await);
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<NodeOutcome>> = vec![None; nodes.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!(error = %e, "node task aborted"),
            }
        }

        nodes
            .iter()
            .zip(slots)
            .map(|(node, slot)| NodeResult {
                node: node.name.clone(),
                outcome: slot.unwrap_or_else(|| {
                    NodeOutcome::Faulted(Arc::new(StepExecutionError::new(
                        node.name.clone(),
                        TransportError::execution("node invocation aborted"),
                    )))
                }),
            })
            .collect()
    }
}
