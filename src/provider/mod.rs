//! # Transport Provider Layer
//!
//! Capability traits that move a script onto a node and run commands there.
//!
//! - [`FileCopier`] - delivers a script (stream, controller file or inline text)
//!   and returns the path it landed at on the node
//! - [`NodeExecutor`] - runs a command vector on a node
//!
//! Providers are registered by name on a [`Framework`](crate::framework::Framework)
//! and picked per node through its `file-copier` / `node-executor` attributes.
//!
//! ## Available Providers
//!
//! | Provider | Use Case | Capabilities |
//! |----------|----------|--------------|
//! | `local` | This machine | copy + execute (registered by default) |
//! | `mock` | Testing | recording copier, scripted executor |
//!
//! ## Registering a transport
//!
//! ```rust
//! use std::sync::Arc;
//! use nodestep::framework::Framework;
//! use nodestep::provider::mock::{RecordingFileCopier, ScriptedNodeExecutor};
//!
//! let framework = Framework::default();
//! framework
//!     .file_copiers()
//!     .register("stub", Arc::new(RecordingFileCopier::new("/tmp/stub.sh")));
//! framework
//!     .node_executors()
//!     .register("stub", Arc::new(ScriptedNodeExecutor::new()));
//!
//! assert!(framework.file_copiers().contains("stub"));
//! ```

pub mod local;
pub mod mock;

pub use local::{LocalFileCopier, LocalNodeExecutor};

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::context::ExecutionContext;
use crate::error::TransportError;
use crate::node::NodeEntry;
use crate::result::NodeExecutorResult;

/// Byte stream handed to [`FileCopier::copy_file_stream`]
pub type ScriptStream<'a> = dyn AsyncRead + Send + Unpin + 'a;

/// Delivers script files to a node.
///
/// Every method returns the path of the delivered file on the node. Failures
/// are [`TransportError::FileCopy`].
#[async_trait]
pub trait FileCopier: Send + Sync {
    /// Copy the contents of a byte stream
    async fn copy_file_stream(
        &self,
        ctx: &ExecutionContext,
        input: &mut ScriptStream<'_>,
        node: &NodeEntry,
    ) -> Result<String, TransportError>;

    /// Copy a file that lives on the controller
    async fn copy_file(
        &self,
        ctx: &ExecutionContext,
        file: &Path,
        node: &NodeEntry,
    ) -> Result<String, TransportError>;

    /// Write inline script text
    async fn copy_script_content(
        &self,
        ctx: &ExecutionContext,
        content: &str,
        node: &NodeEntry,
    ) -> Result<String, TransportError>;
}

/// Runs commands on a node.
///
/// A command that ran and exited non-zero is `Ok` with `success = false`;
/// only launch or transport faults are `Err(TransportError::Execution)`.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute_command(
        &self,
        ctx: &ExecutionContext,
        command: &[String],
        node: &NodeEntry,
    ) -> Result<NodeExecutorResult, TransportError>;
}
