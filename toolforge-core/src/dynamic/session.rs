//! Tool sessions
//!
//! A [`ToolSession`] owns the dynamic registry for one agent session and
//! hands out execution contexts carrying its grants. Ending the session
//! expires every tool it synthesized and cancels in-flight invocations.

use super::approval::{ApprovalHandler, AutoReject};
use super::registry::DynamicToolRegistry;
use super::router::ExecutionRouter;
use super::spec::{CreatedBy, ToolSpecification, ToolSpecificationDraft};
use crate::config::ForgeConfig;
use crate::error::Result;
use crate::tools::{
    BuiltinRegistry, CapabilitySet, LocalTerminal, ToolExecutionContext, ToolExecutionResult,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct ToolSession {
    id: String,
    workspace_root: PathBuf,
    capabilities: CapabilitySet,
    yolo_mode: bool,
    max_output_bytes: usize,
    router: Arc<ExecutionRouter>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for ToolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSession")
            .field("id", &self.id)
            .field("workspace_root", &self.workspace_root)
            .field("capabilities", &self.capabilities)
            .field("yolo_mode", &self.yolo_mode)
            .finish()
    }
}

impl ToolSession {
    /// Start a session whose confirmations are all rejected
    pub fn start(config: &ForgeConfig, workspace_root: impl Into<PathBuf>) -> Result<Self> {
        Self::start_with(config, workspace_root, Arc::new(AutoReject))
    }

    /// Start a session with an approval handler
    ///
    /// # Errors
    ///
    /// Fails if the configured default capabilities are invalid.
    pub fn start_with(
        config: &ForgeConfig,
        workspace_root: impl Into<PathBuf>,
        approvals: Arc<dyn ApprovalHandler>,
    ) -> Result<Self> {
        let capabilities = config.session.capabilities()?;
        let registry = Arc::new(DynamicToolRegistry::with_ttl(config.registry.entry_ttl));
        let router = ExecutionRouter::new(registry, Arc::new(BuiltinRegistry::with_defaults()))
            .with_config(config)
            .with_approval_handler(approvals);

        let id = Uuid::new_v4().to_string();
        tracing::info!(session = %id, %capabilities, yolo = config.session.yolo_mode, "tool session started");

        Ok(Self {
            id,
            workspace_root: workspace_root.into(),
            capabilities,
            yolo_mode: config.session.yolo_mode,
            max_output_bytes: config.sandbox.max_output_bytes,
            router: Arc::new(router),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn router(&self) -> &Arc<ExecutionRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<DynamicToolRegistry> {
        self.router.registry()
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Replace the granted capabilities
    pub fn set_capabilities(&mut self, capabilities: CapabilitySet) {
        tracing::info!(session = %self.id, %capabilities, "session capabilities changed");
        self.capabilities = capabilities;
    }

    pub fn set_yolo_mode(&mut self, yolo: bool) {
        self.yolo_mode = yolo;
    }

    /// Fresh top-level context for one invocation
    pub fn context(&self) -> ToolExecutionContext {
        ToolExecutionContext::for_workspace(self.workspace_root.clone())
            .with_session_id(self.id.clone())
            .with_trace_id(Uuid::new_v4().to_string())
            .with_capabilities(self.capabilities.clone())
            .with_yolo_mode(self.yolo_mode)
            .with_terminal(Arc::new(LocalTerminal::new(self.max_output_bytes)))
            .with_cancellation(self.cancellation.child_token())
    }

    /// Register a tool synthesized in this session
    ///
    /// Attribution defaults to this session when the draft carries none.
    pub fn register(&self, mut draft: ToolSpecificationDraft) -> Result<Arc<ToolSpecification>> {
        let created_by = draft.created_by.get_or_insert_with(CreatedBy::default);
        if created_by.session_id.is_none() {
            created_by.session_id = Some(self.id.clone());
        }
        self.router.register(draft)
    }

    pub async fn invoke(&self, name: &str, args: Value) -> ToolExecutionResult {
        self.router.invoke(name, args, &self.context()).await
    }

    /// Descriptors of the tools callable with the current grants
    pub fn callable_tools(&self) -> Vec<Value> {
        self.router.callable_tools(&self.context())
    }

    /// Cancel in-flight work and expire this session's tools
    pub fn end(self) -> usize {
        self.cancellation.cancel();
        let expired = self.registry().expire_session(&self.id);
        tracing::info!(session = %self.id, expired, "tool session ended");
        expired
    }
}
