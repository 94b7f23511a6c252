//! Code executor
//!
//! Runs a specification's `executionCode` in the Lua sandbox on a blocking
//! thread. The instruction hook stops the VM on deadline or cancellation;
//! an outer timeout covers a thread stuck inside a host call.

use super::sandbox::{AbortFlag, AbortReason, HostBinding, HostEnv, VmLimits, create_vm};
use crate::config::SandboxConfig;
use crate::tools::{CapabilitySet, ToolError, ToolExecutionContext};
use mlua::{LuaSerdeExt, Value as LuaValue};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Extra time given to the blocking thread after the deadline
const HOST_GRACE: Duration = Duration::from_secs(2);

/// Runs synthesized Lua code
#[derive(Debug, Clone, Default)]
pub struct CodeExecutor {
    config: SandboxConfig,
}

impl CodeExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Evaluate `code` with `args` and host bindings for `granted`
    ///
    /// The chunk's return value, converted to JSON, is the output.
    pub async fn run(
        &self,
        tool_name: &str,
        code: &str,
        args: &Value,
        granted: &CapabilitySet,
        ctx: &ToolExecutionContext,
    ) -> Result<Value, ToolError> {
        if ctx.is_cancelled() {
            return Err(ToolError::cancelled("Cancelled before execution"));
        }

        let bindings = HostBinding::for_capabilities(granted);
        let abort = AbortFlag::default();
        let env = Arc::new(HostEnv {
            tool: tool_name.to_string(),
            ctx: ctx.clone(),
            handle: tokio::runtime::Handle::current(),
            deadline: Instant::now() + self.config.timeout,
            abort: abort.clone(),
        });
        let limits = VmLimits {
            memory_limit_bytes: self.config.memory_limit_bytes,
            instruction_interval: self.config.instruction_interval,
        };

        tracing::debug!(
            tool = tool_name,
            bindings = ?bindings.iter().map(HostBinding::name).collect::<Vec<_>>(),
            timeout = ?self.config.timeout,
            "starting sandbox"
        );

        let code = code.to_string();
        let args = args.clone();
        let chunk_name = format!("={}", tool_name);
        let task = tokio::task::spawn_blocking(move || -> mlua::Result<Value> {
            let lua = create_vm(env, &bindings, &args, limits)?;
            let returned: LuaValue = lua.load(code.as_str()).set_name(chunk_name).eval()?;
            lua.from_value(returned)
        });

        let outcome = match tokio::time::timeout(self.config.timeout + HOST_GRACE, task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(tool = tool_name, "sandbox thread did not stop after deadline");
                return Err(self.timeout_error(tool_name));
            }
        };

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => match abort.reason() {
                Some(AbortReason::Deadline) => {
                    tracing::warn!(tool = tool_name, "sandbox deadline exceeded");
                    Err(self.timeout_error(tool_name))
                }
                Some(AbortReason::Cancelled) => Err(ToolError::cancelled("Execution cancelled")),
                None => {
                    let message = truncate(&describe(&error), self.config.max_error_chars);
                    tracing::debug!(tool = tool_name, error = %message, "sandboxed code failed");
                    Err(ToolError::code_execution(message).with_context(json!({ "tool": tool_name })))
                }
            },
            Err(join_error) => Err(ToolError::internal(format!(
                "sandbox thread failed: {}",
                join_error
            ))),
        }
    }

    fn timeout_error(&self, tool_name: &str) -> ToolError {
        ToolError::timeout(self.config.timeout)
            .with_code("SANDBOX_TIMEOUT")
            .with_context(json!({ "tool": tool_name }))
    }
}

fn describe(error: &mlua::Error) -> String {
    match error {
        mlua::Error::CallbackError { cause, .. } => describe(cause),
        mlua::Error::MemoryError(_) => "memory limit exceeded".to_string(),
        mlua::Error::SyntaxError { message, .. } => format!("syntax error: {}", message),
        mlua::Error::RuntimeError(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Cut `message` to at most `max_chars` characters
fn truncate(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... ({} chars truncated)", &message[..cut], message[cut..].chars().count()),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod code_tests {
    use super::*;
    use crate::tools::{Capability, ToolErrorKind};

    fn executor() -> CodeExecutor {
        CodeExecutor::new(SandboxConfig {
            timeout: Duration::from_millis(500),
            instruction_interval: 1_000,
            ..SandboxConfig::default()
        })
    }

    async fn run(code: &str, args: Value) -> Result<Value, ToolError> {
        let ctx = ToolExecutionContext::for_workspace(std::env::temp_dir());
        executor().run("test_tool", code, &args, &CapabilitySet::new(), &ctx).await
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc... (3 chars truncated)");
        assert_eq!(truncate("ééé", 1), "é... (2 chars truncated)");
    }

    #[tokio::test]
    async fn test_returns_json() {
        let out = run(
            "return { sum = args.a + args.b, items = { 1, 2, 3 }, name = context.tool }",
            json!({"a": 2, "b": 3}),
        )
        .await
        .unwrap();
        assert_eq!(out["sum"], 5);
        assert_eq!(out["items"], json!([1, 2, 3]));
        assert_eq!(out["name"], "test_tool");
    }

    #[tokio::test]
    async fn test_hash_binding() {
        let out = run(
            "return host.hash(args.algorithm or 'sha256', args.input)",
            json!({"input": "abc"}),
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[tokio::test]
    async fn test_json_and_regex_bindings() {
        let out = run(
            r#"
            local doc = host.json_decode(args.text)
            local m = host.regex_match("(\\d+)-(\\d+)", "range 10-20")
            return { count = #doc.items, low = m[2], high = m[3], encoded = host.json_encode({ ok = true }) }
            "#,
            json!({"text": "{\"items\": [1, 2]}"}),
        )
        .await
        .unwrap();
        assert_eq!(out["count"], 2);
        assert_eq!(out["low"], "10");
        assert_eq!(out["high"], "20");
        assert_eq!(out["encoded"], "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_no_ambient_privileges() {
        for code in [
            "return io.open('/etc/passwd')",
            "return os.execute('ls')",
            "return require('os')",
            "return dofile('/etc/passwd')",
            "return load('return 1')()",
            "return host.read_file('x')",
        ] {
            let err = run(code, json!({})).await.unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::CodeExecution, "{}", code);
        }
    }

    #[tokio::test]
    async fn test_runtime_error_is_truncated() {
        let executor = CodeExecutor::new(SandboxConfig {
            max_error_chars: 20,
            ..SandboxConfig::default()
        });
        let ctx = ToolExecutionContext::for_workspace(std::env::temp_dir());
        let err = executor
            .run("t", &format!("error('{}')", "x".repeat(200)), &json!({}), &CapabilitySet::new(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::CodeExecution);
        assert!(err.message.contains("chars truncated"));
        assert!(err.message.len() < 80);
    }

    #[tokio::test]
    async fn test_syntax_error() {
        let err = run("return (", json!({})).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::CodeExecution);
        assert!(err.message.starts_with("syntax error"));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let err = run("while true do end", json!({})).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Timeout);
        assert!(err.kind.is_retryable());
    }

    #[tokio::test]
    async fn test_memory_limit() {
        let executor = CodeExecutor::new(SandboxConfig {
            memory_limit_bytes: 2 * 1024 * 1024,
            ..SandboxConfig::default()
        });
        let ctx = ToolExecutionContext::for_workspace(std::env::temp_dir());
        let err = executor
            .run(
                "t",
                "local t = {} for i = 1, 10000000 do t[i] = string.rep('x', 64) .. i end return #t",
                &json!({}),
                &CapabilitySet::new(),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::CodeExecution);
        assert!(err.message.contains("memory"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_vm() {
        let ctx = ToolExecutionContext::for_workspace(std::env::temp_dir());
        let token = ctx.cancellation.clone();
        let executor = CodeExecutor::new(SandboxConfig {
            timeout: Duration::from_secs(30),
            ..SandboxConfig::default()
        });

        let handle = tokio::spawn(async move {
            executor
                .run("t", "while true do end", &json!({}), &CapabilitySet::new(), &ctx)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_bindings_stay_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), "hello").unwrap();
        let ctx = ToolExecutionContext::for_workspace(dir.path());
        let granted = CapabilitySet::from_capabilities([Capability::FileRead, Capability::FileWrite]);

        let out = executor()
            .run(
                "t",
                r#"
                local text = host.read_file("input.txt")
                host.write_file("out/upper.txt", string.upper(text))
                local names = {}
                for _, entry in ipairs(host.list_dir(".")) do names[#names + 1] = entry.name end
                return { text = text, names = names }
                "#,
                &json!({}),
                &granted,
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out["text"], "hello");
        assert_eq!(out["names"], json!(["input.txt", "out"]));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/upper.txt")).unwrap(),
            "HELLO"
        );

        let err = executor()
            .run("t", "return host.read_file('../../etc/passwd')", &json!({}), &granted, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::CodeExecution);
        assert!(err.message.contains("outside"));
    }
}
