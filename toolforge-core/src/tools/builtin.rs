//! Shipped built-in tools
//!
//! Each tool reaches the filesystem or processes only through the
//! collaborators on [`ToolExecutionContext`].

use super::capability::{Capability, CapabilitySet};
use super::context::ToolExecutionContext;
use super::result::ToolError;
use super::schema::{InputSchema, PropertySchema};
use super::tool::{RiskLevel, Tool, ToolMetadata};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

static DESTRUCTIVE_COMMANDS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\brm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r)\b",
        r"\bgit\s+push\b.*(--force|\s-f\b)",
        r"\bsudo\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::execution(format!("argument '{}' must be a string", name)))
}

fn io_error(action: &str, path: &str, err: std::io::Error) -> ToolError {
    ToolError::execution(format!("{} '{}': {}", action, path, err))
        .with_context(json!({ "path": path, "io_kind": format!("{:?}", err.kind()) }))
}

/// Read a UTF-8 file from the workspace
pub struct ReadFileTool {
    metadata: ToolMetadata,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata::new("read_file", "Read a UTF-8 text file from the workspace")
                .with_returns("{ path, content, bytes }")
                .with_category("filesystem"),
        }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new().property(
            "path",
            PropertySchema::string("Path relative to the working directory"),
            true,
        )
    }

    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_capabilities([Capability::FileRead])
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let resolved = ctx.resolve_path(path)?;
        let content = ctx
            .file_system
            .read_to_string(&resolved)
            .await
            .map_err(|e| io_error("cannot read", path, e))?;

        Ok(json!({
            "path": path,
            "bytes": content.len(),
            "content": content,
        }))
    }
}

/// Write a text file inside the workspace
pub struct WriteFileTool {
    metadata: ToolMetadata,
}

impl WriteFileTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata::new(
                "write_file",
                "Create or overwrite a text file in the workspace",
            )
            .with_returns("{ path, bytes_written }")
            .with_category("filesystem"),
        }
    }
}

impl Default for WriteFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .property(
                "path",
                PropertySchema::string("Path relative to the working directory"),
                true,
            )
            .property("content", PropertySchema::string("Full file content"), true)
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Moderate
    }

    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_capabilities([Capability::FileWrite])
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value, ToolError> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let resolved = ctx.resolve_path(path)?;

        ctx.file_system
            .write(&resolved, content)
            .await
            .map_err(|e| io_error("cannot write", path, e))?;

        tracing::info!(path, bytes = content.len(), "file written");
        Ok(json!({ "path": path, "bytes_written": content.len() }))
    }
}

/// List a directory inside the workspace
pub struct ListDirectoryTool {
    metadata: ToolMetadata,
}

impl ListDirectoryTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata::new("list_directory", "List the entries of a directory")
                .with_returns("{ path, entries: [{ name, is_dir, size }] }")
                .with_category("filesystem"),
        }
    }
}

impl Default for ListDirectoryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new().property(
            "path",
            PropertySchema::string("Directory path; defaults to the working directory"),
            false,
        )
    }

    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_capabilities([Capability::FileRead])
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let resolved = ctx.resolve_path(path)?;
        let entries = ctx
            .file_system
            .list_dir(&resolved)
            .await
            .map_err(|e| io_error("cannot list", path, e))?;

        Ok(json!({ "path": path, "entries": entries }))
    }
}

/// Run a program in the workspace
pub struct RunCommandTool {
    metadata: ToolMetadata,
}

impl RunCommandTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata::new(
                "run_command",
                "Run a program with arguments in the working directory",
            )
            .with_returns("{ status, stdout, stderr }")
            .with_category("process"),
        }
    }
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .property("program", PropertySchema::string("Executable to run"), true)
            .property(
                "args",
                PropertySchema::array_of(PropertySchema::string("argument"), "Arguments"),
                false,
            )
            .property(
                "timeout_secs",
                PropertySchema::integer("Kill the process after this many seconds"),
                false,
            )
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Dangerous
    }

    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::from_capabilities([Capability::ProcessSpawn])
    }

    fn always_confirm_patterns(&self) -> &[Regex] {
        DESTRUCTIVE_COMMANDS.as_slice()
    }

    fn confirmation_subject(&self, args: &Value) -> String {
        let mut line = args
            .get("program")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        for arg in args.get("args").and_then(Value::as_array).into_iter().flatten() {
            line.push(' ');
            line.push_str(arg.as_str().unwrap_or_default());
        }
        line
    }

    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value, ToolError> {
        let program = str_arg(&args, "program")?;
        let argv: Vec<String> = args
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let timeout = args
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT);

        let output = ctx
            .terminal
            .run(program, &argv, &ctx.cwd, timeout)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::TimedOut => ToolError::timeout(timeout),
                _ => ToolError::execution(format!("cannot run '{}': {}", program, e)),
            })?;

        serde_json::to_value(output).map_err(|e| ToolError::internal(e.to_string()))
    }
}
