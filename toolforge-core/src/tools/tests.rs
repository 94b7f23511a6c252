//! Cross-module tests for the static tool layer

use super::*;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// A tool that sleeps before answering
struct SlowTool {
    metadata: ToolMetadata,
    delay: Duration,
}

impl SlowTool {
    fn new(delay: Duration) -> Self {
        Self {
            metadata: ToolMetadata::new("slow_tool", "A deliberately slow tool"),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
    }

    async fn execute(&self, _args: Value, _ctx: &ToolExecutionContext) -> Result<Value, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({"completed": true}))
    }
}

#[test]
fn test_builtin_schemas_reject_bad_args() {
    let registry = BuiltinRegistry::with_defaults();

    let read = registry.get("read_file").unwrap();
    assert!(read.input_schema().validate_args(&json!({"path": "a.txt"})).is_ok());

    let issues = read.input_schema().validate_args(&json!({})).unwrap_err();
    assert_eq!(issues, vec![ArgumentIssue::new("path", "is required")]);

    let run = registry.get("run_command").unwrap();
    let issues = run
        .input_schema()
        .validate_args(&json!({"program": "ls", "args": "-la"}))
        .unwrap_err();
    assert_eq!(issues[0].field, "args");
}

#[tokio::test]
async fn test_registered_tool_runs_bounded() {
    let mut registry = BuiltinRegistry::new();
    registry
        .register(Arc::new(SlowTool::new(Duration::from_secs(5))))
        .unwrap();

    let tool = registry.get("slow_tool").unwrap().clone();
    let ctx = ToolExecutionContext::for_workspace(std::env::temp_dir());
    let result = run_bounded(
        tool.execute(Value::Null, &ctx),
        Some(Duration::from_millis(20)),
        &ctx.cancellation,
    )
    .await;

    let result = ToolExecutionResult::from(result);
    assert!(!result.success);
    assert!(result.is_retryable());
}

#[tokio::test]
async fn test_result_conversion_round_trip() {
    let ctx = ToolExecutionContext::for_workspace(std::env::temp_dir());
    let tool = SlowTool::new(Duration::from_millis(1));
    let result = ToolExecutionResult::from(tool.execute(Value::Null, &ctx).await);

    assert!(result.success);
    assert_eq!(result.into_result().unwrap(), json!({"completed": true}));
}

#[tokio::test]
async fn test_file_tools_share_workspace_confinement() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ToolExecutionContext::for_workspace(dir.path())
        .with_cwd(dir.path().join("sub"));

    let registry = BuiltinRegistry::with_defaults();
    let write = registry.get("write_file").unwrap();
    write
        .execute(json!({"path": "../top.txt", "content": "x"}), &ctx)
        .await
        .unwrap();
    assert!(dir.path().join("top.txt").exists());

    let err = write
        .execute(json!({"path": "../../escape.txt", "content": "x"}), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code.as_deref(), Some("PATH_OUTSIDE_WORKSPACE"));
}
