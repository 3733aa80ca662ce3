//! Script node-step executor
//!
//! Delivers a script to one node and runs it there:
//! copy → `chmod +x` (POSIX nodes only) → run with arguments.
//! Every fault comes back as a [`StepExecutionError`] naming the node.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::{ConfigurationError, StepExecutionError, StepFailureCause, TransportError};
use crate::event_log::EventKind;
use crate::node::{NodeEntry, OsFamily};
use crate::provider::NodeExecutor;
use crate::result::{NodeExecutorResult, NodeStepResult};

/// Script to deliver plus its arguments.
///
/// Several sources may be set; the server file wins over the stream, which
/// wins over inline content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScriptCommand {
    /// Inline script text
    #[serde(default, rename = "script")]
    content: Option<String>,
    /// Script bytes supplied by the caller
    #[serde(skip)]
    stream: Option<Bytes>,
    /// Script file that lives on the controller
    #[serde(default, rename = "file")]
    server_file: Option<PathBuf>,
    #[serde(default, deserialize_with = "scalar_args")]
    args: Vec<String>,
}

/// Arguments may be written as any YAML scalar; each keeps its text form
fn scalar_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<serde_yaml::Value>::deserialize(deserializer)?
        .into_iter()
        .map(|value| match value {
            serde_yaml::Value::String(s) => Ok(s),
            serde_yaml::Value::Number(n) => Ok(n.to_string()),
            serde_yaml::Value::Bool(b) => Ok(b.to_string()),
            other => Err(de::Error::custom(format!(
                "script argument must be a string, number or boolean, got {:?}",
                other
            ))),
        })
        .collect()
}

/// The source a command resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSource<'a> {
    ServerFile(&'a Path),
    Stream(&'a Bytes),
    Content(&'a str),
}

impl ScriptCommand {
    pub fn content(content: impl Into<String>) -> Self {
        Self::default().with_content(content)
    }

    pub fn stream(bytes: impl Into<Bytes>) -> Self {
        Self::default().with_stream(bytes)
    }

    pub fn server_file(path: impl Into<PathBuf>) -> Self {
        Self::default().with_server_file(path)
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_stream(mut self, bytes: impl Into<Bytes>) -> Self {
        self.stream = Some(bytes.into());
        self
    }

    pub fn with_server_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_file = Some(path.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Pick the source to deliver: server file, else stream, else content
    pub fn source(&self) -> Result<ScriptSource<'_>, ConfigurationError> {
        if let Some(path) = &self.server_file {
            Ok(ScriptSource::ServerFile(path))
        } else if let Some(bytes) = &self.stream {
            Ok(ScriptSource::Stream(bytes))
        } else if let Some(content) = &self.content {
            Ok(ScriptSource::Content(content))
        } else {
            Err(ConfigurationError::MissingScriptSource)
        }
    }
}

/// Runs one step on one node
#[async_trait]
pub trait NodeStepExecutor: Send + Sync {
    async fn execute_node_step(
        &self,
        ctx: &ExecutionContext,
        command: &ScriptCommand,
        node: &NodeEntry,
    ) -> Result<NodeStepResult, StepExecutionError>;
}

/// Node-step executor for script commands
#[derive(Debug, Clone, Default)]
pub struct ScriptNodeStepExecutor;

impl ScriptNodeStepExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        command: &ScriptCommand,
        node: &NodeEntry,
        node_name: &Arc<str>,
    ) -> Result<NodeStepResult, StepFailureCause> {
        let framework = ctx.framework();
        let source = command.source()?;

        let copier = framework.file_copier_for(node)?;

        let remote_path = match source {
            ScriptSource::ServerFile(path) => copier.copy_file(ctx, path, node).await?,
            ScriptSource::Stream(bytes) => {
                let mut reader: &[u8] = bytes.as_ref();
                copier.copy_file_stream(ctx, &mut reader, node).await?
            }
            ScriptSource::Content(text) => copier.copy_script_content(ctx, text, node).await?,
        };

        // EMIT: ScriptCopied
        ctx.listener().emit(EventKind::ScriptCopied {
            node: Arc::clone(node_name),
            provider: framework.file_copier_name(node).to_string(),
            remote_path: remote_path.clone(),
        });

        let executor = framework.node_executor_for(node)?;
        let runner = Invocation {
            ctx,
            executor: executor.as_ref(),
            provider: framework.node_executor_name(node),
            node,
            node_name,
        };

        if framework.os_family_for(node) == OsFamily::Posix {
            let grant = vec!["chmod".to_string(), "+x".to_string(), remote_path.clone()];
            let granted = runner.call(&grant).await?;
            if !granted.is_success() {
                debug!(node = %node.name, "permission grant failed, script not run");
                return Ok(granted);
            }
        }

        let mut script = Vec::with_capacity(command.args().len() + 1);
        script.push(remote_path);
        script.extend(command.args().iter().cloned());

        Ok(runner.call(&script).await?)
    }
}

/// One executor bound to one node, emitting command events around each call
struct Invocation<'a> {
    ctx: &'a ExecutionContext,
    executor: &'a dyn NodeExecutor,
    provider: &'a str,
    node: &'a NodeEntry,
    node_name: &'a Arc<str>,
}

impl Invocation<'_> {
    async fn call(&self, command: &[String]) -> Result<NodeExecutorResult, TransportError> {
        // EMIT: CommandStarted
        self.ctx.listener().emit(EventKind::CommandStarted {
            node: Arc::clone(self.node_name),
            provider: self.provider.to_string(),
            command: command.to_vec(),
        });

        let result = self
            .executor
            .execute_command(self.ctx, command, self.node)
            .await?;

        // EMIT: CommandFinished
        self.ctx.listener().emit(EventKind::CommandFinished {
            node: Arc::clone(self.node_name),
            success: result.is_success(),
            exit_code: result.exit_code(),
        });

        Ok(result)
    }
}

#[async_trait]
impl NodeStepExecutor for ScriptNodeStepExecutor {
    #[instrument(
        name = "node_step",
        skip_all,
        fields(node = %node.name, user = %ctx.user(), project = %ctx.project())
    )]
    async fn execute_node_step(
        &self,
        ctx: &ExecutionContext,
        command: &ScriptCommand,
        node: &NodeEntry,
    ) -> Result<NodeStepResult, StepExecutionError> {
        let node_name: Arc<str> = Arc::from(node.name.as_str());

        // EMIT: NodeStepStarted
        ctx.listener().emit(EventKind::NodeStepStarted {
            node: Arc::clone(&node_name),
        });

        match self.run(ctx, command, node, &node_name).await {
            Ok(result) => Ok(result),
            Err(cause) => {
                warn!(error = %cause, "node step failed");

                // EMIT: NodeStepFailed
                ctx.listener().emit(EventKind::NodeStepFailed {
                    node: node_name,
                    error: cause.to_string(),
                });

                Err(StepExecutionError::new(node.name.clone(), cause))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_precedence() {
        let all = ScriptCommand::content("echo")
            .with_stream(&b"bytes"[..])
            .with_server_file("/srv/run.sh");
        assert_eq!(all.source().unwrap(), ScriptSource::ServerFile(Path::new("/srv/run.sh")));

        let no_file = ScriptCommand::content("echo").with_stream(&b"bytes"[..]);
        assert!(matches!(
            no_file.source().unwrap(),
            ScriptSource::Stream(b) if *b == Bytes::from_static(b"bytes")
        ));

        let content = ScriptCommand::content("echo");
        assert_eq!(content.source().unwrap(), ScriptSource::Content("echo"));
    }

    #[test]
    fn empty_command_has_no_source() {
        let err = ScriptCommand::default().with_args(["a"]).source().unwrap_err();
        assert_eq!(err, ConfigurationError::MissingScriptSource);
    }

    #[test]
    fn args_keep_order() {
        let cmd = ScriptCommand::content("echo").with_args(["a", "b"]).with_args(vec!["c".to_string()]);
        assert_eq!(cmd.args(), ["a", "b", "c"]);
    }

    #[test]
    fn deserializes_inline_and_file_forms() {
        let inline: ScriptCommand =
            serde_yaml::from_str("script: \"echo hi\"\nargs: [\"x\"]").unwrap();
        assert_eq!(inline.source().unwrap(), ScriptSource::Content("echo hi"));
        assert_eq!(inline.args(), ["x"]);

        let file: ScriptCommand = serde_yaml::from_str("file: /srv/deploy.sh").unwrap();
        assert_eq!(
            file.source().unwrap(),
            ScriptSource::ServerFile(Path::new("/srv/deploy.sh"))
        );
    }
}
