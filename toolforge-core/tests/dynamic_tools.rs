//! End-to-end tests for synthesized tools
//!
//! These drive a [`ToolSession`] the way an agent would: register
//! specifications emitted as JSON, invoke them alongside the built-in tools
//! and inspect the registry afterwards.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use toolforge_core::dynamic::{ListFilter, ValidationError};
use toolforge_core::prelude::*;

fn draft(value: Value) -> ToolSpecificationDraft {
    serde_json::from_value(value).expect("draft should deserialize")
}

fn workspace() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let root = dir.path().canonicalize().expect("temp dir should resolve");
    (dir, root)
}

fn session_with(root: &Path, capabilities: &[&str], yolo: bool) -> ToolSession {
    let mut config = ForgeConfig::default();
    config.session.default_capabilities = capabilities.iter().map(|c| c.to_string()).collect();
    config.session.yolo_mode = yolo;
    ToolSession::start(&config, root).expect("session should start")
}

fn sha256_tool() -> ToolSpecificationDraft {
    draft(json!({
        "name": "sha256_hash",
        "description": "Hex digest of a string",
        "inputSchema": {
            "type": "object",
            "properties": {
                "input": { "type": "string", "description": "Text to hash" },
                "algorithm": { "type": "string", "enum": ["sha256", "sha512"] }
            },
            "required": ["input", "algorithm"]
        },
        "executionType": "code",
        "executionCode": "return host.hash(args.algorithm, args.input)",
        "requiredCapabilities": ["none"],
        "riskLevel": "safe",
        "category": "crypto"
    }))
}

fn analyze_tool() -> ToolSpecificationDraft {
    draft(json!({
        "name": "find_trailing_whitespace",
        "description": "Report and strip trailing whitespace",
        "inputSchema": {
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        },
        "executionType": "code",
        "executionCode": r#"
            local issues = {}
            local n = 0
            for line in string.gmatch(args.text, "([^\n]*)\n") do
                n = n + 1
                if string.find(line, "%s+$") then
                    issues[#issues + 1] = "line " .. n .. ": trailing whitespace"
                end
            end
            local fixed = string.gsub(args.text, "[ \t]+\n", "\n")
            return { count = #issues, issues = issues, fixed = fixed }
        "#,
        "requiredCapabilities": ["none"],
        "riskLevel": "safe"
    }))
}

fn lint_file_tool() -> ToolSpecificationDraft {
    draft(json!({
        "name": "lint_file",
        "description": "Read a file, analyze it and optionally write the fix",
        "inputSchema": {
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "autoFix": { "type": "boolean" }
            },
            "required": ["path"]
        },
        "executionType": "composite",
        "compositionSteps": [
            {
                "id": "read",
                "toolName": "read_file",
                "arguments": { "path": "$.path" }
            },
            {
                "id": "analyze",
                "toolName": "find_trailing_whitespace",
                "arguments": { "text": "$.steps.read.output.content" },
                "outputAs": "analysis"
            },
            {
                "id": "fix",
                "toolName": "write_file",
                "arguments": { "path": "$.path", "content": "$.analysis.fixed" },
                "condition": "$.autoFix == true && $.analysis.count > 0"
            }
        ],
        "requiredCapabilities": ["file_read"],
        "riskLevel": "safe"
    }))
}

const DIRTY: &str = "let x = 1;   \nlet y = 2;\n";
const CLEAN: &str = "let x = 1;\nlet y = 2;\n";

#[test]
fn test_specification_round_trip() {
    let mut original = serde_json::to_value(lint_file_tool()).unwrap();
    original["id"] = json!("0d6c1c9e-5a0b-4d7e-9f55-2f7f3d1a8b10");
    original["inputSchema"]["additionalProperties"] = json!(false);
    original["inputSchema"]["description"] = json!("Lint arguments");
    original["createdBy"] = json!({"sessionId": "s-42"});
    original["createdAt"] = json!("2026-03-04T05:06:07Z");
    original["version"] = json!(1);

    let spec = draft(original.clone()).validate().unwrap();
    let encoded = serde_json::to_value(&spec).unwrap();
    assert_eq!(encoded, original);
    assert_eq!(encoded["compositionSteps"][1]["outputAs"], "analysis");

    let decoded: ToolSpecification = serde_json::from_value(encoded).unwrap();
    assert_eq!(decoded, spec);
}

#[test]
fn test_cyclic_composite_is_rejected() {
    let cyclic = draft(json!({
        "name": "loop",
        "description": "a waits for b waits for a",
        "inputSchema": { "type": "object" },
        "executionType": "composite",
        "compositionSteps": [
            { "id": "a", "toolName": "read_file", "dependsOn": ["b"] },
            { "id": "b", "toolName": "read_file", "dependsOn": ["a"] }
        ],
        "requiredCapabilities": ["none"],
        "riskLevel": "safe"
    }));
    assert!(matches!(cyclic.validate(), Err(ValidationError::Cycle(_))));
}

#[test]
fn test_exactly_one_payload() {
    let mut value = serde_json::to_value(sha256_tool()).unwrap();
    value["templateId"] = json!("hash_text");
    assert!(matches!(
        draft(value).validate(),
        Err(ValidationError::UnexpectedPayload { field: "templateId", .. })
    ));

    let mut value = serde_json::to_value(sha256_tool()).unwrap();
    value.as_object_mut().unwrap().remove("executionCode");
    assert!(matches!(
        draft(value).validate(),
        Err(ValidationError::MissingPayload { field: "executionCode", .. })
    ));
}

#[tokio::test]
async fn test_code_tool_hashes_input() {
    let (_dir, root) = workspace();
    let session = session_with(&root, &["none"], false);
    session.register(sha256_tool()).unwrap();

    let result = session
        .invoke("sha256_hash", json!({"input": "abc", "algorithm": "sha256"}))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(
        result.output,
        json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );

    let result = session
        .invoke("sha256_hash", json!({"input": "abc", "algorithm": "md5"}))
        .await;
    assert_eq!(result.error.unwrap().kind, ToolErrorKind::SchemaViolation);
    assert_eq!(
        session.registry().list(&ListFilter::category("crypto")).len(),
        1
    );
}

#[tokio::test]
async fn test_gate_denies_process_spawn() {
    let (_dir, root) = workspace();
    let session = session_with(&root, &["file_read"], true);
    session
        .register(draft(json!({
            "name": "list_processes",
            "description": "Run ps",
            "inputSchema": { "type": "object" },
            "executionType": "code",
            "executionCode": "return host.exec('ps', {}).stdout",
            "requiredCapabilities": ["process_spawn"],
            "riskLevel": "moderate"
        })))
        .unwrap();

    let result = session.invoke("list_processes", json!({})).await;
    let err = result.error.expect("gate should deny");
    assert_eq!(err.kind, ToolErrorKind::CapabilityDenied);
    assert!(err.message.contains("process_spawn"));
}

#[tokio::test]
async fn test_composite_without_auto_fix_returns_analysis() {
    let (_dir, root) = workspace();
    std::fs::write(root.join("main.rs"), DIRTY).unwrap();
    let session = session_with(&root, &["file_read", "file_write"], true);
    session.register(analyze_tool()).unwrap();
    session.register(lint_file_tool()).unwrap();

    let result = session
        .invoke("lint_file", json!({"path": "main.rs", "autoFix": false}))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output["count"], 1);
    assert_eq!(result.output["fixed"], CLEAN);
    assert_eq!(std::fs::read_to_string(root.join("main.rs")).unwrap(), DIRTY);

    let steps = result.metadata.unwrap().steps;
    let statuses: Vec<_> = steps.iter().map(|s| (s.step_id.as_str(), s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("read", StepStatus::Completed),
            ("analyze", StepStatus::Completed),
            ("fix", StepStatus::Skipped),
        ]
    );
}

#[tokio::test]
async fn test_composite_with_auto_fix_writes_file() {
    let (_dir, root) = workspace();
    std::fs::write(root.join("main.rs"), DIRTY).unwrap();
    let session = session_with(&root, &["file_read", "file_write"], true);
    session.register(analyze_tool()).unwrap();
    session.register(lint_file_tool()).unwrap();

    let result = session
        .invoke("lint_file", json!({"path": "main.rs", "autoFix": true}))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output["bytes_written"], CLEAN.len());
    assert_eq!(std::fs::read_to_string(root.join("main.rs")).unwrap(), CLEAN);
}

#[tokio::test]
async fn test_composite_step_denied_keeps_earlier_steps() {
    let (_dir, root) = workspace();
    std::fs::write(root.join("main.rs"), DIRTY).unwrap();
    let session = session_with(&root, &["file_read"], true);
    session.register(analyze_tool()).unwrap();
    session.register(lint_file_tool()).unwrap();

    let result = session
        .invoke("lint_file", json!({"path": "main.rs", "autoFix": true}))
        .await;
    let err = result.error.clone().expect("write step should be denied");
    assert_eq!(err.kind, ToolErrorKind::StepFailure);
    assert_eq!(err.root_cause().kind, ToolErrorKind::CapabilityDenied);

    let steps = result.metadata.unwrap().steps;
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[2].status, StepStatus::Failed);
    assert_eq!(std::fs::read_to_string(root.join("main.rs")).unwrap(), DIRTY);

    let analyze = session.registry().get("find_trailing_whitespace").unwrap();
    assert_eq!(analyze.state.usage_count, 1);
    assert_eq!(analyze.state.error_count, 0);
    let lint = session.registry().get("lint_file").unwrap();
    assert_eq!(lint.state.error_count, 1);
}

#[tokio::test]
async fn test_counters_after_mixed_invocations() {
    let (_dir, root) = workspace();
    let session = session_with(&root, &["none"], false);
    session.register(sha256_tool()).unwrap();

    let n = 7;
    let k = 3;
    for i in 0..n {
        let args = if i < k {
            json!({"algorithm": "sha256"})
        } else {
            json!({"input": format!("v{}", i), "algorithm": "sha256"})
        };
        session.invoke("sha256_hash", args).await;
    }

    let state = session.registry().get("sha256_hash").unwrap().state;
    assert_eq!(state.usage_count, n as u64);
    assert_eq!(state.error_count, k as u64);
    assert!(state.last_error.unwrap().contains("input"));
}

#[tokio::test]
async fn test_reregistration_supersedes_previous_version() {
    let (_dir, root) = workspace();
    let session = session_with(&root, &["none"], false);
    let first = session.register(sha256_tool()).unwrap();

    let mut value = serde_json::to_value(sha256_tool()).unwrap();
    value["executionCode"] = json!("return string.upper(host.hash(args.algorithm, args.input))");
    let second = session.register(draft(value)).unwrap();

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    let history = session.registry().history("sha256_hash");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].state.status, ToolStatus::Expired);
    assert_eq!(history[1].state.status, ToolStatus::Active);

    let result = session
        .invoke("sha256_hash", json!({"input": "abc", "algorithm": "sha256"}))
        .await;
    assert_eq!(
        result.output,
        json!("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD")
    );
    assert_eq!(result.metadata.unwrap().tool_version, Some(2));
}

#[tokio::test]
async fn test_builtin_name_cannot_be_shadowed() {
    let (_dir, root) = workspace();
    let session = session_with(&root, &["file_read"], false);
    let mut value = serde_json::to_value(sha256_tool()).unwrap();
    value["name"] = json!("read_file");

    let err = session.register(draft(value)).unwrap_err();
    assert!(matches!(err, ForgeError::ReservedName(_)));
    assert!(session.registry().is_empty());
}

#[tokio::test]
async fn test_ending_session_expires_its_tools() {
    let (_dir, root) = workspace();
    let session = session_with(&root, &["none"], false);
    session.register(sha256_tool()).unwrap();
    let registry = session.registry().clone();

    assert_eq!(session.end(), 1);
    assert_eq!(registry.stats().expired, 1);
    assert!(registry.resolve_callable("sha256_hash").is_none());
}
