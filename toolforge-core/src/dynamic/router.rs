//! Execution router
//!
//! The single entry point for tool calls. For every invocation:
//!
//! 1. Resolve the name: dynamic tools first, then built-ins
//! 2. Validate arguments against the input schema
//! 3. Ask the capability gate; obtain confirmation if required
//! 4. Dispatch to the template, code or composite executor (or the
//!    built-in tool)
//! 5. Record the outcome on the registry entry exactly once
//! 6. Return a uniform [`ToolExecutionResult`]
//!
//! Errors never escape as panics or `Err`: every failure becomes a
//! `success: false` result. Composite invocations are not transactional;
//! side effects of completed steps are kept when a later step fails.

use super::approval::{ApprovalDecision, ApprovalHandler, ApprovalRequest, AutoReject};
use super::code::CodeExecutor;
use super::composite::{CompositeScheduler, ToolInvoker};
use super::gate::{GateDecision, authorize, authorize_builtin};
use super::registry::{DynamicToolRegistry, EntryHandle, InvocationOutcome};
use super::spec::{ExecutionPayload, ToolSpecification, ToolSpecificationDraft};
use super::template::TemplateExecutor;
use crate::config::{ForgeConfig, RouterConfig};
use crate::error::{ForgeError, Result};
use crate::tools::{
    BoxedTool, BuiltinRegistry, ExecutionMetadata, PolicyDecision, RiskLevel, ToolError,
    ToolErrorKind, ToolExecutionContext, ToolExecutionResult, ToolOrigin, run_bounded,
    run_with_deadline, tool_descriptor,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Records the invocation outcome once, or `cancelled` if dropped first
struct InvocationGuard {
    handle: Option<EntryHandle>,
    tool: String,
}

impl InvocationGuard {
    fn new(handle: EntryHandle, tool: &str) -> Self {
        Self {
            handle: Some(handle),
            tool: tool.to_string(),
        }
    }

    fn finish(mut self, result: &std::result::Result<Value, ToolError>) {
        if let Some(handle) = self.handle.take() {
            let outcome = match result {
                Ok(_) => InvocationOutcome::Success,
                Err(e) if e.kind == ToolErrorKind::Cancelled => InvocationOutcome::Cancelled,
                Err(e) => InvocationOutcome::Failure {
                    message: e.message.clone(),
                },
            };
            handle.record(&outcome);
        }
    }
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(tool = %self.tool, "invocation dropped before completion");
            handle.record(&InvocationOutcome::Cancelled);
        }
    }
}

/// Routes tool calls to built-in tools and dynamic executors
pub struct ExecutionRouter {
    registry: Arc<DynamicToolRegistry>,
    builtins: Arc<BuiltinRegistry>,
    approvals: Arc<dyn ApprovalHandler>,
    templates: TemplateExecutor,
    code: CodeExecutor,
    scheduler: CompositeScheduler,
    config: RouterConfig,
}

impl std::fmt::Debug for ExecutionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRouter")
            .field("registry", &self.registry)
            .field("builtins", &self.builtins)
            .field("config", &self.config)
            .finish()
    }
}

impl ExecutionRouter {
    /// Router with default limits that rejects every confirmation request
    pub fn new(registry: Arc<DynamicToolRegistry>, builtins: Arc<BuiltinRegistry>) -> Self {
        Self {
            registry,
            builtins,
            approvals: Arc::new(AutoReject),
            templates: TemplateExecutor::new(),
            code: CodeExecutor::default(),
            scheduler: CompositeScheduler::default(),
            config: RouterConfig::default(),
        }
    }

    /// Apply router, scheduler and sandbox settings
    pub fn with_config(mut self, config: &ForgeConfig) -> Self {
        self.config = config.router.clone();
        self.scheduler = CompositeScheduler::new(config.scheduler.max_concurrent_steps);
        self.code = CodeExecutor::new(config.sandbox.clone());
        self
    }

    pub fn with_approval_handler(mut self, approvals: Arc<dyn ApprovalHandler>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn registry(&self) -> &Arc<DynamicToolRegistry> {
        &self.registry
    }

    pub fn builtins(&self) -> &Arc<BuiltinRegistry> {
        &self.builtins
    }

    pub fn templates(&self) -> &TemplateExecutor {
        &self.templates
    }

    /// Validate a draft and register it
    ///
    /// # Errors
    ///
    /// Fails if the draft is invalid or its name belongs to a built-in tool.
    pub fn register(&self, draft: ToolSpecificationDraft) -> Result<Arc<ToolSpecification>> {
        let spec = draft.validate()?;
        if self.builtins.contains(&spec.name) {
            return Err(ForgeError::ReservedName(spec.name));
        }
        Ok(self.registry.register(spec))
    }

    /// Parse, validate and register a JSON specification
    pub fn register_json(&self, json: &str) -> Result<Arc<ToolSpecification>> {
        self.register(ToolSpecificationDraft::from_json(json)?)
    }

    /// Descriptors of every tool the LLM may call in a context
    ///
    /// Built-ins whose capabilities are not granted are left out.
    pub fn callable_tools(&self, ctx: &ToolExecutionContext) -> Vec<Value> {
        let mut tools: Vec<Value> = self
            .builtins
            .available_to(&ctx.capabilities)
            .into_iter()
            .map(|tool| tool_descriptor(tool.name(), tool.description(), &tool.input_schema()))
            .collect();
        tools.extend(self.registry.callable_tools());
        tools
    }

    /// Invoke a tool by name
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolExecutionContext) -> ToolExecutionResult {
        let started = Instant::now();
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };

        if let Some(callable) = self.registry.resolve_callable(name) {
            let guard = InvocationGuard::new(callable.handle.clone(), name);
            let mut metadata = self.metadata(name, ToolOrigin::Dynamic, &args, ctx);
            metadata.tool_version = Some(callable.spec.version);

            let result = self.invoke_dynamic(&callable.spec, args, ctx, &mut metadata).await;
            guard.finish(&result);
            return self.finish(name, result, metadata, started);
        }

        if let Some(tool) = self.builtins.get(name) {
            let mut metadata = self.metadata(name, ToolOrigin::Builtin, &args, ctx);
            let result = self.invoke_builtin(tool, args, ctx, &mut metadata).await;
            return self.finish(name, result, metadata, started);
        }

        tracing::debug!(tool = name, "no callable tool");
        ToolExecutionResult::failed(ToolError::not_found(name))
    }

    fn metadata(&self, name: &str, origin: ToolOrigin, args: &Value, ctx: &ToolExecutionContext) -> ExecutionMetadata {
        let mut metadata = ExecutionMetadata::new(name, origin, args);
        metadata.session_id = ctx.session_id.clone();
        metadata.trace_id = ctx.trace_id.clone();
        metadata
    }

    fn finish(
        &self,
        name: &str,
        result: std::result::Result<Value, ToolError>,
        metadata: ExecutionMetadata,
        started: Instant,
    ) -> ToolExecutionResult {
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => tracing::info!(tool = name, ?elapsed, "tool invocation succeeded"),
            Err(e) => tracing::info!(tool = name, ?elapsed, kind = ?e.kind, error = %e.message, "tool invocation failed"),
        }
        ToolExecutionResult::from(result).with_metadata(metadata.with_duration(elapsed))
    }

    async fn invoke_dynamic(
        &self,
        spec: &ToolSpecification,
        args: Value,
        ctx: &ToolExecutionContext,
        metadata: &mut ExecutionMetadata,
    ) -> std::result::Result<Value, ToolError> {
        if ctx.depth > self.config.max_nesting_depth {
            return Err(ToolError::depth_exceeded(self.config.max_nesting_depth));
        }

        spec.input_schema
            .validate_args(&args)
            .map_err(ToolError::schema_violation)?;

        let decision = authorize(spec, &ctx.capabilities, ctx.yolo_mode);
        self.confirm(decision, &spec.name, ToolOrigin::Dynamic, spec.risk_level, &args, ctx, metadata)
            .await?;

        tracing::debug!(tool = %spec.name, execution_type = %spec.execution_type(), "dispatching dynamic tool");
        match &spec.payload {
            ExecutionPayload::Template { template_id } => self.templates.run(template_id, &args, ctx),

            ExecutionPayload::Code { execution_code } => {
                self.code
                    .run(&spec.name, execution_code, &args, &spec.required_capabilities, ctx)
                    .await
            }

            ExecutionPayload::Composite(plan) => {
                let token = ctx.cancellation.child_token();
                let scoped = ctx.scoped(token.clone());
                let mut steps = Vec::new();

                let result = run_with_deadline(
                    async {
                        let outcome = self.scheduler.run(plan, &args, &scoped, self).await;
                        steps = outcome.steps;
                        outcome.result
                    },
                    self.config.composite_timeout,
                    &token,
                )
                .await;

                metadata.steps = steps;
                result
            }
        }
    }

    async fn invoke_builtin(
        &self,
        tool: &BoxedTool,
        args: Value,
        ctx: &ToolExecutionContext,
        metadata: &mut ExecutionMetadata,
    ) -> std::result::Result<Value, ToolError> {
        tool.input_schema()
            .validate_args(&args)
            .map_err(ToolError::schema_violation)?;

        let decision = authorize_builtin(tool.as_ref(), &args, &ctx.capabilities, ctx.yolo_mode);
        self.confirm(decision, tool.name(), ToolOrigin::Builtin, tool.risk_level(), &args, ctx, metadata)
            .await?;

        run_bounded(tool.execute(args, ctx), self.config.builtin_timeout, &ctx.cancellation).await
    }

    /// Turn a gate decision into permission to proceed
    #[allow(clippy::too_many_arguments)]
    async fn confirm(
        &self,
        decision: GateDecision,
        tool: &str,
        origin: ToolOrigin,
        risk_level: RiskLevel,
        args: &Value,
        ctx: &ToolExecutionContext,
        metadata: &mut ExecutionMetadata,
    ) -> std::result::Result<(), ToolError> {
        metadata.policy_decisions.push(decision.to_policy_decision());

        let reason = match decision {
            GateDecision::Allow => return Ok(()),
            GateDecision::Deny { reason, missing } => {
                tracing::warn!(tool, %missing, "capability gate denied invocation");
                return Err(ToolError::capability_denied(reason, &missing));
            }
            GateDecision::RequireConfirmation { reason } => reason,
        };

        let request = ApprovalRequest::new(tool, origin, risk_level, reason, args.clone())
            .with_attribution(ctx.session_id.clone(), ctx.run_id.clone());
        let pending = self.approvals.request_approval(request);
        let answer = async {
            match self.config.approval_timeout {
                Some(limit) => tokio::time::timeout(limit, pending)
                    .await
                    .unwrap_or_else(|_| ApprovalDecision::reject(format!("no answer within {:?}", limit))),
                None => pending.await,
            }
        };

        let decision = tokio::select! {
            biased;
            _ = ctx.cancellation.cancelled() => {
                return Err(ToolError::cancelled("Cancelled while awaiting approval"));
            }
            decision = answer => decision,
        };

        match decision {
            ApprovalDecision::Approve => {
                metadata
                    .policy_decisions
                    .push(PolicyDecision::new("approval", true));
                Ok(())
            }
            ApprovalDecision::Reject { reason } => {
                let mut record = PolicyDecision::new("approval", false);
                if let Some(reason) = &reason {
                    record = record.with_reason(reason.clone());
                }
                metadata.policy_decisions.push(record);
                Err(ToolError::approval_rejected(tool, reason.as_deref()))
            }
        }
    }
}

#[async_trait]
impl ToolInvoker for ExecutionRouter {
    async fn invoke(&self, name: &str, args: Value, ctx: &ToolExecutionContext) -> ToolExecutionResult {
        ExecutionRouter::invoke(self, name, args, ctx).await
    }
}
