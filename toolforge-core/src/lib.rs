//! # Toolforge - Runtime tool synthesis for coding agents
//!
//! Toolforge lets an LLM-driven agent define new tools at runtime from a
//! declarative specification and invoke them like the built-in ones:
//! - Validation of synthesized specifications before they become callable
//! - A session-scoped registry with lifecycle, versioning and usage counters
//! - A capability gate with risk-based confirmation
//! - Template, sandboxed-code and composite execution strategies
//! - A dependency-aware composite scheduler with cancellation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolforge_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let session = ToolSession::start(&ForgeConfig::load()?, ".")?;
//!
//!     let draft: ToolSpecificationDraft = serde_json::from_value(json!({
//!         "name": "slugify",
//!         "description": "Kebab-case a title",
//!         "inputSchema": {
//!             "type": "object",
//!             "properties": { "text": { "type": "string" } },
//!             "required": ["text"]
//!         },
//!         "executionType": "template",
//!         "templateId": "text_transform",
//!         "requiredCapabilities": ["none"],
//!         "riskLevel": "safe"
//!     }))?;
//!     session.register(draft)?;
//!
//!     let result = session
//!         .invoke("slugify", json!({"text": "Hello World", "operation": "kebab_case"}))
//!         .await;
//!     println!("{}", result.output);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`tools`]: capabilities, schemas, the [`tools::Tool`] trait, built-ins
//!   and the result envelope shared by every tool
//! - [`dynamic`]: specifications, registry, gate, executors and the router
//! - [`config`]: layered configuration via figment

pub mod config;
pub mod dynamic;
pub mod error;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        ForgeConfig, RegistryConfig, RouterConfig, SandboxConfig, SchedulerConfig, SessionConfig,
    };
    pub use crate::error::{ForgeError, Result};

    pub use crate::dynamic::{
        ApprovalDecision, ApprovalHandler, ApprovalQueue, ApprovalRequest, AutoApprove,
        AutoReject, CompositionStep, DynamicToolRegistry, DynamicToolRegistryEntry,
        ExecutionRouter, ExecutionType, ListFilter, StepStatus, StepTrace, TemplateExecutor,
        ToolSession, ToolSpecification, ToolSpecificationDraft, ToolStatus, ValidationError,
    };

    pub use crate::tools::{
        BoxedTool, BuiltinRegistry, Capability, CapabilitySet, ExecutionMetadata, InputSchema,
        PolicyDecision, RiskLevel, Tool, ToolError, ToolErrorKind, ToolExecutionContext,
        ToolExecutionResult, ToolMetadata, ToolOrigin,
    };
}
