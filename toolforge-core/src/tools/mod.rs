//! Static tool layer
//!
//! Everything a tool needs regardless of where it came from:
//! - Capability tokens and sets
//! - The input schema subset and argument validation
//! - The [`Tool`] trait and the shipped built-in tools
//! - The execution context and its filesystem/terminal collaborators
//! - The result envelope and error taxonomy
//!
//! Dynamic (synthesized) tools live in [`crate::dynamic`] and share all of
//! the above.

mod builtin;
mod capability;
mod context;
mod host;
mod registry;
mod result;
mod runtime;
mod schema;
mod tool;

pub use builtin::{ListDirectoryTool, ReadFileTool, RunCommandTool, WriteFileTool};
pub use capability::{
    Capability, CapabilitySet, CapabilityTokenError, NO_CAPABILITIES, UnknownCapability,
};
pub use context::ToolExecutionContext;
pub use host::{
    CommandOutput, DirEntryInfo, FileSystem, LocalFileSystem, LocalTerminal, Terminal,
    confine_path,
};
pub use registry::{BuiltinRegistry, BuiltinRegistryError, ToolSummary};
pub use result::{
    ArgumentIssue, ExecutionMetadata, PolicyDecision, ToolError, ToolErrorKind,
    ToolExecutionResult, ToolOrigin, hash_args,
};
pub use runtime::{run_bounded, run_with_deadline};
pub use schema::{InputSchema, MAX_SCHEMA_DEPTH, PropertySchema, PropertyType};
pub use tool::{BoxedTool, RiskLevel, Tool, ToolMetadata, tool_descriptor};

#[cfg(test)]
mod tests;
