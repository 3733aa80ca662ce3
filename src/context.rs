//! Execution context handed to every step, executor and transport call
//!
//! Built once with [`ContextBuilder`] and read-only afterwards. Cloning is
//! cheap: clones share the framework, listener and cancellation token.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::event_log::EventLog;
use crate::framework::Framework;

struct ContextInner {
    project: String,
    user: String,
    framework: Arc<Framework>,
    thread_count: usize,
    listener: EventLog,
    cancel: CancellationToken,
}

/// Ambient execution information for one step run
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    pub fn builder(framework: Arc<Framework>) -> ContextBuilder {
        ContextBuilder::new(framework)
    }

    pub fn project(&self) -> &str {
        &self.inner.project
    }

    /// User the step runs on behalf of
    pub fn user(&self) -> &str {
        &self.inner.user
    }

    pub fn framework(&self) -> &Arc<Framework> {
        &self.inner.framework
    }

    /// Upper bound on nodes dispatched concurrently (always >= 1)
    pub fn thread_count(&self) -> usize {
        self.inner.thread_count
    }

    /// Listener receiving execution events
    pub fn listener(&self) -> &EventLog {
        &self.inner.listener
    }

    /// Token transports watch to abandon running commands
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("project", &self.inner.project)
            .field("user", &self.inner.user)
            .field("thread_count", &self.inner.thread_count)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

/// Builder for [`ExecutionContext`]
pub struct ContextBuilder {
    framework: Arc<Framework>,
    project: String,
    user: Option<String>,
    thread_count: Option<usize>,
    listener: Option<EventLog>,
    cancel: Option<CancellationToken>,
}

impl ContextBuilder {
    fn new(framework: Arc<Framework>) -> Self {
        Self {
            framework,
            project: "default".to_string(),
            user: None,
            thread_count: None,
            listener: None,
            cancel: None,
        }
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Override the framework's configured thread count
    pub fn thread_count(mut self, threads: usize) -> Self {
        self.thread_count = Some(threads);
        self
    }

    pub fn listener(mut self, listener: EventLog) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> ExecutionContext {
        let thread_count = self
            .thread_count
            .unwrap_or(self.framework.config().thread_count)
            .max(1);
        let user = self.user.unwrap_or_else(current_user);

        ExecutionContext {
            inner: Arc::new(ContextInner {
                project: self.project,
                user,
                framework: self.framework,
                thread_count,
                listener: self.listener.unwrap_or_default(),
                cancel: self.cancel.unwrap_or_default(),
            }),
        }
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
