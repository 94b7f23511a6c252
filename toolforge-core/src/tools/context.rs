//! Execution context threaded through every invocation

use super::capability::CapabilitySet;
use super::host::{FileSystem, LocalFileSystem, LocalTerminal, Terminal, confine_path};
use super::result::ToolError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context passed to tools, executors and the composite scheduler
#[derive(Clone)]
pub struct ToolExecutionContext {
    /// Root every file path must stay under
    pub workspace_root: PathBuf,

    /// Directory relative paths are resolved against
    pub cwd: PathBuf,

    /// Cancellation token for this invocation
    pub cancellation: CancellationToken,

    /// Session the call belongs to
    pub session_id: Option<String>,

    /// Agent run the call belongs to
    pub run_id: Option<String>,

    /// Trace ID for correlation
    pub trace_id: Option<String>,

    /// Skip confirmation for moderate-risk tools
    pub yolo_mode: bool,

    /// Capabilities granted to the session
    pub capabilities: CapabilitySet,

    pub file_system: Arc<dyn FileSystem>,

    pub terminal: Arc<dyn Terminal>,

    /// Composite nesting depth (0 for a top-level call)
    pub depth: usize,
}

impl std::fmt::Debug for ToolExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutionContext")
            .field("workspace_root", &self.workspace_root)
            .field("cwd", &self.cwd)
            .field("session_id", &self.session_id)
            .field("run_id", &self.run_id)
            .field("yolo_mode", &self.yolo_mode)
            .field("capabilities", &self.capabilities)
            .field("depth", &self.depth)
            .finish()
    }
}

impl ToolExecutionContext {
    /// Context for a workspace with local collaborators and no capabilities
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cwd: root.clone(),
            file_system: Arc::new(LocalFileSystem::new(root.clone())),
            terminal: Arc::new(LocalTerminal::default()),
            workspace_root: root,
            cancellation: CancellationToken::new(),
            session_id: None,
            run_id: None,
            trace_id: None,
            yolo_mode: false,
            capabilities: CapabilitySet::new(),
            depth: 0,
        }
    }

    /// Set session ID
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set run ID
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Set trace ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_yolo_mode(mut self, yolo: bool) -> Self {
        self.yolo_mode = yolo;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystem>) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn Terminal>) -> Self {
        self.terminal = terminal;
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Context for a nested composite step
    ///
    /// The child token is cancelled with the parent, but cancelling the
    /// child leaves the parent untouched.
    pub fn child(&self) -> Self {
        let mut child = self.clone();
        child.cancellation = self.cancellation.child_token();
        child.depth = self.depth + 1;
        child
    }

    /// Same context with a different cancellation token
    pub fn scoped(&self, token: CancellationToken) -> Self {
        let mut scoped = self.clone();
        scoped.cancellation = token;
        scoped
    }

    /// Resolve a path against the cwd, confined to the workspace root
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ToolError> {
        confine_path(&self.workspace_root, &self.cwd, path.as_ref())
            .map_err(|e| ToolError::execution(e.to_string()).with_code("PATH_OUTSIDE_WORKSPACE"))
    }
}

#[cfg(test)]
mod context_tests {
    use super::*;

    #[test]
    fn test_child_context() {
        let parent = ToolExecutionContext::for_workspace("/work").with_session_id("s1");
        let child = parent.child();

        assert_eq!(child.depth, 1);
        assert_eq!(child.session_id.as_deref(), Some("s1"));

        child.cancellation.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancellation.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_resolve_path() {
        let ctx = ToolExecutionContext::for_workspace("/work").with_cwd("/work/src");
        assert_eq!(ctx.resolve_path("lib.rs").unwrap(), PathBuf::from("/work/src/lib.rs"));

        let err = ctx.resolve_path("../../etc/passwd").unwrap_err();
        assert_eq!(err.code.as_deref(), Some("PATH_OUTSIDE_WORKSPACE"));
    }
}
