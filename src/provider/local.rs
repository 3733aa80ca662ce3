//! Local transport: scripts are written to a directory on this machine and
//! run with `tokio::process`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FileCopier, NodeExecutor, ScriptStream};
use crate::context::ExecutionContext;
use crate::error::TransportError;
use crate::event_log::{EventKind, EventLog, OutputStream};
use crate::node::{NodeEntry, OsFamily};
use crate::result::NodeExecutorResult;

/// Writes delivered scripts under a local directory
#[derive(Debug, Clone)]
pub struct LocalFileCopier {
    dir: PathBuf,
}

impl LocalFileCopier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh destination path; `.bat` for Windows nodes, `.sh` otherwise
    fn destination(&self, node: &NodeEntry) -> PathBuf {
        let ext = match node.os_family_kind() {
            Some(OsFamily::NonPosix) => "bat",
            _ => "sh",
        };
        self.dir
            .join(format!("dispatch-{}.{}", Uuid::new_v4().simple(), ext))
    }

    async fn prepare(&self, node: &NodeEntry) -> Result<PathBuf, TransportError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            TransportError::file_copy_caused(
                format!("cannot create {}", self.dir.display()),
                e,
            )
        })?;
        Ok(self.destination(node))
    }
}

fn delivered(dest: &Path, node: &NodeEntry) -> String {
    debug!(node = %node.name, path = %dest.display(), "script delivered");
    dest.to_string_lossy().into_owned()
}

#[async_trait]
impl FileCopier for LocalFileCopier {
    async fn copy_file_stream(
        &self,
        _ctx: &ExecutionContext,
        input: &mut ScriptStream<'_>,
        node: &NodeEntry,
    ) -> Result<String, TransportError> {
        let dest = self.prepare(node).await?;
        let write_failed =
            |e: std::io::Error| TransportError::file_copy_caused(format!("cannot write {}", dest.display()), e);

        let mut file = tokio::fs::File::create(&dest).await.map_err(write_failed)?;
        tokio::io::copy(input, &mut file).await.map_err(write_failed)?;
        file.flush().await.map_err(write_failed)?;

        Ok(delivered(&dest, node))
    }

    async fn copy_file(
        &self,
        _ctx: &ExecutionContext,
        file: &Path,
        node: &NodeEntry,
    ) -> Result<String, TransportError> {
        let dest = self.prepare(node).await?;
        tokio::fs::copy(file, &dest).await.map_err(|e| {
            TransportError::file_copy_caused(format!("cannot copy {}", file.display()), e)
        })?;

        Ok(delivered(&dest, node))
    }

    async fn copy_script_content(
        &self,
        _ctx: &ExecutionContext,
        content: &str,
        node: &NodeEntry,
    ) -> Result<String, TransportError> {
        let dest = self.prepare(node).await?;
        tokio::fs::write(&dest, content).await.map_err(|e| {
            TransportError::file_copy_caused(format!("cannot write {}", dest.display()), e)
        })?;

        Ok(delivered(&dest, node))
    }
}

/// Upper bound on reading leftover output once the command itself has exited.
///
/// Background processes started by a script inherit its pipes and may hold
/// them open indefinitely.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Interpreter for delivered files the kernel refuses to execute directly
const POSIX_SHELL: &str = "/bin/sh";

#[cfg(unix)]
const ENOEXEC: i32 = 8;

/// Runs commands as child processes of this one
#[derive(Debug, Clone, Default)]
pub struct LocalNodeExecutor {
    script_dir: Option<PathBuf>,
}

impl LocalNodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete delivered scripts under `dir` once the command running them finishes
    pub fn removing_scripts_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = Some(dir.into());
        self
    }

    fn delivered_script<'a>(&self, program: &'a str) -> Option<&'a Path> {
        let dir = self.script_dir.as_deref()?;
        let path = Path::new(program);
        (path.starts_with(dir) && path != dir).then_some(path)
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        program: &str,
        args: &[String],
        node: &NodeEntry,
    ) -> Result<NodeExecutorResult, TransportError> {
        let mut child = launch(program, args)
            .map_err(|e| TransportError::execution_caused(format!("cannot launch '{}'", program), e))?;

        let node_name: Arc<str> = Arc::from(node.name.as_str());
        let readers: Vec<JoinHandle<()>> = [
            capture_lines(
                child.stdout.take(),
                ctx.listener().clone(),
                Arc::clone(&node_name),
                OutputStream::Stdout,
            ),
            capture_lines(
                child.stderr.take(),
                ctx.listener().clone(),
                Arc::clone(&node_name),
                OutputStream::Stderr,
            ),
        ]
        .into_iter()
        .flatten()
        .collect();
        let aborts: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();
        let cancelled = || {
            aborts.iter().for_each(AbortHandle::abort);
            TransportError::execution(format!("'{}' cancelled", program))
        };

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| TransportError::execution_caused(format!("cannot wait on '{}'", program), e))?,
            _ = ctx.cancellation_token().cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(node = %node.name, error = %e, "failed to kill cancelled command");
                }
                return Err(cancelled());
            }
        };

        tokio::select! {
            drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, join_readers(readers, &node.name)) => {
                if drained.is_err() {
                    debug!(node = %node.name, "output still open after exit, detaching readers");
                    aborts.iter().for_each(AbortHandle::abort);
                }
            }
            _ = ctx.cancellation_token().cancelled() => return Err(cancelled()),
        }

        let result = match status.code() {
            Some(0) => NodeExecutorResult::success(0),
            Some(code) => NodeExecutorResult::failure(code),
            None => NodeExecutorResult::failure_with_cause(None, "terminated by signal"),
        };

        debug!(
            node = %node.name,
            success = result.is_success(),
            exit_code = ?result.exit_code(),
            "command finished"
        );
        Ok(result)
    }
}

/// Spawn with piped output, falling back to `/bin/sh` for files without an
/// interpreter line (the `execvp` convention)
fn launch(program: &str, args: &[String]) -> std::io::Result<Child> {
    let mut direct = Command::new(program);
    direct.args(args);
    match spawn_piped(direct) {
        Err(e) if is_exec_format_error(&e) => {
            debug!(program, "not directly executable, running through {}", POSIX_SHELL);
            let mut shell = Command::new(POSIX_SHELL);
            shell.arg(program).args(args);
            spawn_piped(shell)
        }
        other => other,
    }
}

fn spawn_piped(mut command: Command) -> std::io::Result<Child> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

#[cfg(unix)]
fn is_exec_format_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(ENOEXEC)
}

#[cfg(not(unix))]
fn is_exec_format_error(_e: &std::io::Error) -> bool {
    false
}

/// Forward each line of a child pipe into the listener
fn capture_lines<R>(
    pipe: Option<R>,
    listener: EventLog,
    node: Arc<str>,
    stream: OutputStream,
) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let pipe = pipe?;
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    listener.emit(EventKind::CommandOutput {
                        node: Arc::clone(&node),
                        stream,
                        line,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(node = %node, error = %e, "stopped reading command output");
                    break;
                }
            }
        }
    }))
}

async fn join_readers(readers: Vec<JoinHandle<()>>, node: &str) {
    for reader in readers {
        if let Err(e) = reader.await {
            if !e.is_cancelled() {
                warn!(node = %node, error = %e, "output reader task failed");
            }
        }
    }
}

#[async_trait]
impl NodeExecutor for LocalNodeExecutor {
    async fn execute_command(
        &self,
        ctx: &ExecutionContext,
        command: &[String],
        node: &NodeEntry,
    ) -> Result<NodeExecutorResult, TransportError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| TransportError::execution("empty command"))?;

        let outcome = self.run(ctx, program, args, node).await;

        if let Some(script) = self.delivered_script(program) {
            match tokio::fs::remove_file(script).await {
                Ok(()) => debug!(node = %node.name, path = %script.display(), "script removed"),
                Err(e) => warn!(node = %node.name, path = %script.display(), error = %e, "failed to remove script"),
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::Framework;

    fn ctx() -> ExecutionContext {
        ExecutionContext::builder(Arc::new(Framework::default())).build()
    }

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn copy_script_content_writes_unique_file() {
        let dir = tempfile::tempdir().unwrap();
        let copier = LocalFileCopier::new(dir.path().join("scripts"));
        let node = NodeEntry::new("n1", "localhost").with_os_family("unix");

        let first = copier
            .copy_script_content(&ctx(), "echo hi\n", &node)
            .await
            .unwrap();
        let second = copier
            .copy_script_content(&ctx(), "echo hi\n", &node)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(first.ends_with(".sh"));
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "echo hi\n");
    }

    #[tokio::test]
    async fn windows_nodes_get_batch_files() {
        let dir = tempfile::tempdir().unwrap();
        let copier = LocalFileCopier::new(dir.path());
        let node = NodeEntry::new("w1", "localhost").with_os_family("Windows");

        let path = copier
            .copy_script_content(&ctx(), "echo hi", &node)
            .await
            .unwrap();
        assert!(path.ends_with(".bat"));
    }

    #[tokio::test]
    async fn copy_file_stream_and_copy_file() {
        let dir = tempfile::tempdir().unwrap();
        let copier = LocalFileCopier::new(dir.path());
        let node = NodeEntry::new("n1", "localhost");

        let mut stream: &[u8] = b"from stream";
        let streamed = copier
            .copy_file_stream(&ctx(), &mut stream, &node)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&streamed).unwrap(), "from stream");

        let copied = copier
            .copy_file(&ctx(), Path::new(&streamed), &node)
            .await
            .unwrap();
        assert_ne!(copied, streamed);
        assert_eq!(std::fs::read_to_string(&copied).unwrap(), "from stream");
    }

    #[tokio::test]
    async fn copy_missing_file_is_file_copy_error() {
        let dir = tempfile::tempdir().unwrap();
        let copier = LocalFileCopier::new(dir.path());

        let err = copier
            .copy_file(&ctx(), &dir.path().join("absent.sh"), &NodeEntry::new("n", "h"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::TransportKind::FileCopy);
    }

    #[tokio::test]
    async fn empty_command_is_execution_error() {
        let err = LocalNodeExecutor::new()
            .execute_command(&ctx(), &[], &NodeEntry::new("n", "h"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::TransportKind::Execution);
    }

    #[tokio::test]
    async fn unknown_program_is_execution_error() {
        let err = LocalNodeExecutor::new()
            .execute_command(
                &ctx(),
                &cmd(&["/definitely/not/a/program"]),
                &NodeEntry::new("n", "h"),
            )
            .await
            .unwrap_err();
        assert!(err.message().contains("cannot launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_maps_to_result_and_output_is_captured() {
        let ctx = ctx();
        let node = NodeEntry::new("n1", "localhost");

        let ok = LocalNodeExecutor::new()
            .execute_command(&ctx, &cmd(&["sh", "-c", "echo out; echo err >&2"]), &node)
            .await
            .unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.exit_code(), Some(0));
        assert_eq!(ctx.listener().output_lines("n1", OutputStream::Stdout), vec!["out"]);
        assert_eq!(ctx.listener().output_lines("n1", OutputStream::Stderr), vec!["err"]);

        let failed = LocalNodeExecutor::new()
            .execute_command(&ctx, &cmd(&["sh", "-c", "exit 3"]), &node)
            .await
            .unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.exit_code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_command() {
        let ctx = ctx();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = LocalNodeExecutor::new()
            .execute_command(&ctx, &cmd(&["sleep", "30"]), &NodeEntry::new("n", "h"))
            .await
            .unwrap_err();
        assert!(err.message().contains("cancelled"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_process_does_not_hold_the_command_open() {
        let ctx = ctx();
        let started = std::time::Instant::now();

        let result = LocalNodeExecutor::new()
            .execute_command(&ctx, &cmd(&["sh", "-c", "sleep 5 & echo started"]), &NodeEntry::new("n", "h"))
            .await
            .unwrap();

        assert!(result.is_success());
        assert!(started.elapsed() < OUTPUT_DRAIN_TIMEOUT + std::time::Duration::from_secs(2));
        assert_eq!(ctx.listener().output_lines("n", OutputStream::Stdout), vec!["started"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_while_output_is_still_open() {
        let ctx = ctx();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let err = LocalNodeExecutor::new()
            .execute_command(&ctx, &cmd(&["sh", "-c", "sleep 5 & echo started"]), &NodeEntry::new("n", "h"))
            .await
            .unwrap_err();

        assert!(err.message().contains("cancelled"));
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_without_interpreter_line_runs_through_sh() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("plain.sh");
        std::fs::write(&script, "echo \"plain $1\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = ctx();
        let result = LocalNodeExecutor::new()
            .execute_command(
                &ctx,
                &cmd(&[script.to_str().unwrap(), "text"]),
                &NodeEntry::new("n", "h"),
            )
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(ctx.listener().output_lines("n", OutputStream::Stdout), vec!["plain text"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delivered_scripts_are_removed_after_running() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts");
        let ctx = ctx();
        let node = NodeEntry::new("n", "h").with_os_family("linux");

        let copier = LocalFileCopier::new(&scripts);
        let executor = LocalNodeExecutor::new().removing_scripts_in(&scripts);
        let delivered = copier.copy_script_content(&ctx, "exit 0\n", &node).await.unwrap();

        // the permission grant does not run the script, so it stays
        executor
            .execute_command(&ctx, &cmd(&["chmod", "+x", delivered.as_str()]), &node)
            .await
            .unwrap();
        assert!(Path::new(&delivered).exists());

        let result = executor.execute_command(&ctx, &cmd(&[delivered.as_str()]), &node).await.unwrap();
        assert!(result.is_success());
        assert!(!Path::new(&delivered).exists());

        // files outside the script directory are never touched
        let outside = dir.path().join("keep.sh");
        std::fs::write(&outside, "exit 0\n").unwrap();
        executor
            .execute_command(&ctx, &cmd(&["sh", outside.to_str().unwrap()]), &node)
            .await
            .unwrap();
        assert!(outside.exists());
    }
}
