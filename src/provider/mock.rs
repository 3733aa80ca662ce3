//! Recording transports for testing
//!
//! Return configured outcomes without touching any node and record every
//! call for assertions.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use super::{FileCopier, NodeExecutor, ScriptStream};
use crate::context::ExecutionContext;
use crate::error::TransportError;
use crate::node::NodeEntry;
use crate::result::NodeExecutorResult;

/// What a [`RecordingFileCopier`] was asked to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyRequest {
    Stream(Vec<u8>),
    File(PathBuf),
    Content(String),
}

/// One recorded copier call
#[derive(Debug, Clone)]
pub struct CopyCall {
    pub request: CopyRequest,
    pub node: NodeEntry,
    pub project: String,
}

/// File copier that records calls and answers with a fixed path or fault
pub struct RecordingFileCopier {
    remote_path: String,
    failure: Option<String>,
    calls: Mutex<Vec<CopyCall>>,
}

impl RecordingFileCopier {
    /// Every copy succeeds and reports `remote_path`
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every copy fails with a file-copy fault carrying `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            remote_path: String::new(),
            failure: Some(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CopyCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn stream_calls(&self) -> usize {
        self.count(|r| matches!(r, CopyRequest::Stream(_)))
    }

    pub fn file_calls(&self) -> usize {
        self.count(|r| matches!(r, CopyRequest::File(_)))
    }

    pub fn content_calls(&self) -> usize {
        self.count(|r| matches!(r, CopyRequest::Content(_)))
    }

    fn count(&self, pred: impl Fn(&CopyRequest) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(&c.request)).count()
    }

    fn record(
        &self,
        ctx: &ExecutionContext,
        request: CopyRequest,
        node: &NodeEntry,
    ) -> Result<String, TransportError> {
        self.calls.lock().push(CopyCall {
            request,
            node: node.clone(),
            project: ctx.project().to_string(),
        });
        match &self.failure {
            Some(message) => Err(TransportError::file_copy(message.clone())),
            None => Ok(self.remote_path.clone()),
        }
    }
}

#[async_trait]
impl FileCopier for RecordingFileCopier {
    async fn copy_file_stream(
        &self,
        ctx: &ExecutionContext,
        input: &mut ScriptStream<'_>,
        node: &NodeEntry,
    ) -> Result<String, TransportError> {
        let mut bytes = Vec::new();
        input
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| TransportError::file_copy_caused("cannot read script stream", e))?;
        self.record(ctx, CopyRequest::Stream(bytes), node)
    }

    async fn copy_file(
        &self,
        ctx: &ExecutionContext,
        file: &Path,
        node: &NodeEntry,
    ) -> Result<String, TransportError> {
        self.record(ctx, CopyRequest::File(file.to_path_buf()), node)
    }

    async fn copy_script_content(
        &self,
        ctx: &ExecutionContext,
        content: &str,
        node: &NodeEntry,
    ) -> Result<String, TransportError> {
        self.record(ctx, CopyRequest::Content(content.to_string()), node)
    }
}

/// One recorded executor call
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub command: Vec<String>,
    pub node: NodeEntry,
    pub project: String,
}

enum Scripted {
    Result(NodeExecutorResult),
    Fault(String),
}

/// Node executor answering from a queue of scripted outcomes.
///
/// When the queue is empty every call succeeds with exit code 0.
#[derive(Default)]
pub struct ScriptedNodeExecutor {
    queue: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<ExecCall>>,
}

impl ScriptedNodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results returned in order by subsequent calls
    pub fn with_results(results: impl IntoIterator<Item = NodeExecutorResult>) -> Self {
        let executor = Self::new();
        for result in results {
            executor.push_result(result);
        }
        executor
    }

    pub fn push_result(&self, result: NodeExecutorResult) {
        self.queue.lock().push_back(Scripted::Result(result));
    }

    /// Queue an execution fault
    pub fn push_fault(&self, message: impl Into<String>) {
        self.queue.lock().push_back(Scripted::Fault(message.into()));
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl NodeExecutor for ScriptedNodeExecutor {
    async fn execute_command(
        &self,
        ctx: &ExecutionContext,
        command: &[String],
        node: &NodeEntry,
    ) -> Result<NodeExecutorResult, TransportError> {
        self.calls.lock().push(ExecCall {
            command: command.to_vec(),
            node: node.clone(),
            project: ctx.project().to_string(),
        });

        let next = self.queue.lock().pop_front();
        match next {
            Some(Scripted::Result(result)) => Ok(result),
            Some(Scripted::Fault(message)) => Err(TransportError::execution(message)),
            None => Ok(NodeExecutorResult::success(0)),
        }
    }
}
