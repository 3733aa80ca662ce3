//! Framework scope: configuration plus the provider registries
//!
//! Registries are created lazily on first access and then live as long as
//! the framework. Two frameworks never share a registry.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::{EngineConfig, LOCAL_PROVIDER};
use crate::error::ConfigurationError;
use crate::node::{NodeEntry, OsFamily};
use crate::provider::{FileCopier, LocalFileCopier, LocalNodeExecutor, NodeExecutor};
use crate::registry::ProviderRegistry;

pub type FileCopierRegistry = ProviderRegistry<dyn FileCopier>;
pub type NodeExecutorRegistry = ProviderRegistry<dyn NodeExecutor>;

/// Environment instance owning provider registries and configuration
#[derive(Debug)]
pub struct Framework {
    config: EngineConfig,
    file_copiers: OnceCell<Arc<FileCopierRegistry>>,
    node_executors: OnceCell<Arc<NodeExecutorRegistry>>,
}

impl Framework {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            file_copiers: OnceCell::new(),
            node_executors: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// File copier registry of this framework (same instance on every call)
    pub fn file_copiers(&self) -> Arc<FileCopierRegistry> {
        let registry = self.file_copiers.get_or_init(|| {
            let registry = FileCopierRegistry::new("file copier");
            registry.register(
                LOCAL_PROVIDER,
                Arc::new(LocalFileCopier::new(self.config.script_temp_dir())),
            );
            Arc::new(registry)
        });
        Arc::clone(registry)
    }

    /// Node executor registry of this framework (same instance on every call)
    pub fn node_executors(&self) -> Arc<NodeExecutorRegistry> {
        let registry = self.node_executors.get_or_init(|| {
            let registry = NodeExecutorRegistry::new("node executor");
            registry.register(
                LOCAL_PROVIDER,
                Arc::new(LocalNodeExecutor::new().removing_scripts_in(self.config.script_temp_dir())),
            );
            Arc::new(registry)
        });
        Arc::clone(registry)
    }

    /// Copier name for a node: its `file-copier` attribute, else the configured default
    pub fn file_copier_name<'a>(&'a self, node: &'a NodeEntry) -> &'a str {
        node.file_copier_name()
            .unwrap_or(&self.config.providers.file_copier)
    }

    /// Executor name for a node: its `node-executor` attribute, else the configured default
    pub fn node_executor_name<'a>(&'a self, node: &'a NodeEntry) -> &'a str {
        node.node_executor_name()
            .unwrap_or(&self.config.providers.node_executor)
    }

    pub fn file_copier_for(&self, node: &NodeEntry) -> Result<Arc<dyn FileCopier>, ConfigurationError> {
        self.file_copiers().resolve(self.file_copier_name(node))
    }

    pub fn node_executor_for(&self, node: &NodeEntry) -> Result<Arc<dyn NodeExecutor>, ConfigurationError> {
        self.node_executors().resolve(self.node_executor_name(node))
    }

    /// Protocol branch for a node
    pub fn os_family_for(&self, node: &NodeEntry) -> OsFamily {
        self.config.os_family_for(node)
    }

    /// Node representing this machine, used by local steps
    pub fn local_node(&self) -> NodeEntry {
        self.config.local_node()
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
