//! Capability gate
//!
//! Decides, before anything runs, whether a call may proceed, needs the
//! user's confirmation, or is denied outright. Dynamic and built-in tools go
//! through the same decision so the confirmation model is shared.

use super::spec::ToolSpecification;
use crate::tools::{CapabilitySet, PolicyDecision, RiskLevel, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    RequireConfirmation { reason: String },
    Deny { reason: String, missing: CapabilitySet },
}

impl GateDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, GateDecision::Deny { .. })
    }

    /// Record for result metadata
    pub fn to_policy_decision(&self) -> PolicyDecision {
        match self {
            GateDecision::Allow => PolicyDecision::new("capability_gate", true),
            GateDecision::RequireConfirmation { reason } => {
                PolicyDecision::new("capability_gate", true)
                    .with_reason(format!("confirmation required: {}", reason))
            }
            GateDecision::Deny { reason, .. } => {
                PolicyDecision::new("capability_gate", false).with_reason(reason.clone())
            }
        }
    }
}

/// Authorize a dynamic tool
pub fn authorize(spec: &ToolSpecification, session: &CapabilitySet, yolo: bool) -> GateDecision {
    decide(
        &spec.name,
        spec.risk_level,
        &spec.required_capabilities,
        session,
        yolo,
        None,
    )
}

/// Authorize a built-in tool for a concrete set of arguments
pub fn authorize_builtin(
    tool: &dyn Tool,
    args: &Value,
    session: &CapabilitySet,
    yolo: bool,
) -> GateDecision {
    let patterns = tool.always_confirm_patterns();
    let forced = if patterns.is_empty() {
        None
    } else {
        let subject = tool.confirmation_subject(args);
        patterns
            .iter()
            .find(|p| p.is_match(&subject))
            .map(|p| format!("arguments match always-confirm pattern '{}'", p.as_str()))
    };

    decide(
        tool.name(),
        tool.risk_level(),
        &tool.required_capabilities(),
        session,
        yolo,
        forced,
    )
}

fn decide(
    name: &str,
    risk_level: RiskLevel,
    required: &CapabilitySet,
    session: &CapabilitySet,
    yolo: bool,
    forced: Option<String>,
) -> GateDecision {
    let missing = session.missing(required);
    let decision = if !missing.is_empty() {
        GateDecision::Deny {
            reason: format!("'{}' requires capabilities not granted to this session: {}", name, missing),
            missing,
        }
    } else if let Some(reason) = forced {
        GateDecision::RequireConfirmation { reason }
    } else {
        match risk_level {
            RiskLevel::Dangerous => GateDecision::RequireConfirmation {
                reason: format!("'{}' is a dangerous tool", name),
            },
            RiskLevel::Moderate if !yolo => GateDecision::RequireConfirmation {
                reason: format!("'{}' is a moderate-risk tool", name),
            },
            _ => GateDecision::Allow,
        }
    };

    tracing::debug!(tool = name, %risk_level, yolo, ?decision, "capability gate");
    decision
}

#[cfg(test)]
mod gate_tests {
    use super::*;
    use crate::dynamic::ToolSpecificationDraft;
    use crate::tools::{Capability, RunCommandTool, WriteFileTool};
    use serde_json::json;

    fn spec(risk: &str, capabilities: &[&str]) -> ToolSpecification {
        let draft: ToolSpecificationDraft = serde_json::from_value(json!({
            "name": "gated",
            "description": "gated tool",
            "inputSchema": {"type": "object"},
            "executionType": "code",
            "executionCode": "return 1",
            "requiredCapabilities": capabilities,
            "riskLevel": risk
        }))
        .unwrap();
        draft.validate().unwrap()
    }

    #[test]
    fn test_missing_capability_always_denies() {
        let session = CapabilitySet::from_capabilities([Capability::FileRead, Capability::FileWrite]);
        for risk in ["safe", "moderate", "dangerous"] {
            for yolo in [false, true] {
                let decision = authorize(&spec(risk, &["process_spawn"]), &session, yolo);
                match decision {
                    GateDecision::Deny { missing, .. } => {
                        assert!(missing.contains(Capability::ProcessSpawn));
                        assert_eq!(missing.len(), 1);
                    }
                    other => panic!("expected deny for {risk}/{yolo}, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_risk_levels() {
        let none = CapabilitySet::new();

        assert_eq!(authorize(&spec("safe", &["none"]), &none, false), GateDecision::Allow);
        assert_eq!(authorize(&spec("safe", &["none"]), &none, true), GateDecision::Allow);

        assert!(matches!(
            authorize(&spec("moderate", &["none"]), &none, false),
            GateDecision::RequireConfirmation { .. }
        ));
        assert_eq!(authorize(&spec("moderate", &["none"]), &none, true), GateDecision::Allow);

        for yolo in [false, true] {
            assert!(matches!(
                authorize(&spec("dangerous", &["none"]), &none, yolo),
                GateDecision::RequireConfirmation { .. }
            ));
        }
    }

    #[test]
    fn test_builtin_uses_same_rules() {
        let session = CapabilitySet::from_capabilities([Capability::FileWrite]);
        let write = WriteFileTool::new();
        let args = json!({"path": "a", "content": "b"});

        assert!(matches!(
            authorize_builtin(&write, &args, &session, false),
            GateDecision::RequireConfirmation { .. }
        ));
        assert_eq!(authorize_builtin(&write, &args, &session, true), GateDecision::Allow);
        assert!(authorize_builtin(&write, &args, &CapabilitySet::new(), true).is_deny());
    }

    #[test]
    fn test_always_confirm_patterns_override_yolo() {
        let session = CapabilitySet::from_capabilities([Capability::ProcessSpawn]);
        let run = RunCommandTool::new();

        let decision = authorize_builtin(&run, &json!({"program": "rm", "args": ["-rf", "target"]}), &session, true);
        match decision {
            GateDecision::RequireConfirmation { reason } => assert!(reason.contains("always-confirm")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_policy_decision_record() {
        let deny = GateDecision::Deny {
            reason: "nope".to_string(),
            missing: CapabilitySet::new(),
        };
        let record = deny.to_policy_decision();
        assert!(!record.allowed);
        assert_eq!(record.reason.as_deref(), Some("nope"));
        assert!(GateDecision::Allow.to_policy_decision().allowed);
    }
}
