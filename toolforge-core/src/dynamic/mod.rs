//! Dynamic tool system
//!
//! Tools synthesized at runtime from a declarative [`ToolSpecification`]:
//!
//! - [`validator`]: draft → accepted specification, or a reason why not
//! - [`DynamicToolRegistry`]: session-scoped store with lifecycle and counters
//! - [`gate`]: capability and risk checks before every invocation
//! - [`TemplateExecutor`] / [`CodeExecutor`]: the two leaf executors
//! - [`CompositeScheduler`]: dependency-ordered step execution
//! - [`ExecutionRouter`]: the single entry point tying the above together
//! - [`ToolSession`]: owns a registry and router for one agent session
//!
//! ## Example
//!
//! ```rust,no_run
//! use toolforge_core::config::ForgeConfig;
//! use toolforge_core::dynamic::{ToolSession, ToolSpecificationDraft};
//! use serde_json::json;
//!
//! # async fn example() -> toolforge_core::error::Result<()> {
//! let session = ToolSession::start(&ForgeConfig::default(), ".")?;
//! let draft: ToolSpecificationDraft = serde_json::from_value(json!({
//!     "name": "shout",
//!     "description": "Upper-case some text",
//!     "inputSchema": {
//!         "type": "object",
//!         "properties": { "text": { "type": "string" } },
//!         "required": ["text"]
//!     },
//!     "executionType": "code",
//!     "executionCode": "return string.upper(args.text)",
//!     "requiredCapabilities": ["none"],
//!     "riskLevel": "safe"
//! }))?;
//! session.register(draft)?;
//!
//! let result = session.invoke("shout", json!({"text": "hi"})).await;
//! assert_eq!(result.output, json!("HI"));
//! # Ok(())
//! # }
//! ```

mod approval;
mod code;
mod composite;
pub mod gate;
mod graph;
pub mod reference;
mod registry;
mod router;
mod sandbox;
mod session;
mod spec;
mod template;
pub mod validator;

pub use approval::{
    ApprovalDecision, ApprovalError, ApprovalHandler, ApprovalQueue, ApprovalRequest,
    AutoApprove, AutoReject,
};
pub use code::CodeExecutor;
pub use composite::{CompositeOutcome, CompositeScheduler, StepStatus, StepTrace, ToolInvoker};
pub use gate::{GateDecision, authorize, authorize_builtin};
pub use graph::StepGraph;
pub use registry::{
    CallableTool, DynamicToolRegistry, DynamicToolRegistryEntry, EntryHandle, InvocationOutcome,
    ListFilter, RegistryError, RegistryStats, ToolState, ToolStatus,
};
pub use router::ExecutionRouter;
pub use sandbox::HostBinding;
pub use session::ToolSession;
pub use spec::{
    CompiledStep, CompositePlan, CompositionStep, CreatedBy, ExecutionPayload, ExecutionType,
    ToolSpecification, ToolSpecificationDraft,
};
pub use template::{TemplateDescriptor, TemplateExecutor, TemplateParam};
pub use validator::ValidationError;
