//! Specification validator
//!
//! Turns a [`ToolSpecificationDraft`] into a [`ToolSpecification`] or
//! explains why it cannot. Checks run in a fixed order and stop at the
//! first problem:
//!
//! 1. name, description and input schema
//! 2. execution type
//! 3. payload matching the execution type, and nothing else
//! 4. composite structure: step ids, references, conditions, acyclicity
//! 5. risk level and required capabilities
//!
//! Validation is pure and never panics on malformed input.

use super::graph::StepGraph;
use super::reference::{ArgumentTemplate, Condition, Reference, ReferenceError};
use super::spec::{
    CompiledStep, CompositePlan, CompositionStep, ExecutionPayload, ExecutionType,
    ToolSpecification, ToolSpecificationDraft,
};
use crate::tools::{CapabilitySet, CapabilityTokenError, InputSchema, RiskLevel};
use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;

static TOOL_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_\-]{0,63}$").ok());

/// Why a specification was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid tool name '{0}': must start with a letter and contain only letters, digits, '_' or '-' (max 64)")]
    InvalidName(String),

    #[error("invalid inputSchema: {0}")]
    InvalidSchema(String),

    #[error("unknown executionType '{0}' (expected template, code or composite)")]
    UnknownExecutionType(String),

    #[error("{execution_type} tools require a non-empty '{field}'")]
    MissingPayload {
        execution_type: ExecutionType,
        field: &'static str,
    },

    #[error("'{field}' is not allowed for {execution_type} tools")]
    UnexpectedPayload {
        execution_type: ExecutionType,
        field: &'static str,
    },

    #[error("composition step #{0} has no id")]
    MissingStepId(usize),

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("output name '{0}' is used by more than one step")]
    DuplicateOutputName(String),

    #[error("step '{0}' has no toolName")]
    MissingToolName(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownStepReference { step: String, reference: String },

    #[error("step '{step}': {source}")]
    InvalidReference {
        step: String,
        #[source]
        source: ReferenceError,
    },

    #[error("finalOutput '{0}' does not name a step")]
    UnknownFinalOutput(String),

    #[error("composition steps form a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("unknown riskLevel '{0}' (expected safe, moderate or dangerous)")]
    UnknownRiskLevel(String),

    #[error("invalid requiredCapabilities: {0}")]
    InvalidCapabilities(#[from] CapabilityTokenError),
}

/// Non-blank value, returned as written
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Validate a draft
pub fn validate(draft: ToolSpecificationDraft) -> Result<ToolSpecification, ValidationError> {
    // 1. identity and schema
    let name = present(&draft.name).ok_or(ValidationError::MissingField("name"))?;
    let name_ok = TOOL_NAME.as_ref().is_some_and(|re| re.is_match(name));
    if !name_ok {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    let description =
        present(&draft.description).ok_or(ValidationError::MissingField("description"))?;
    let raw_schema = draft
        .input_schema
        .as_ref()
        .ok_or(ValidationError::MissingField("inputSchema"))?;
    let input_schema = InputSchema::from_value(raw_schema).map_err(ValidationError::InvalidSchema)?;

    // 2. execution type
    let execution_type_name =
        present(&draft.execution_type).ok_or(ValidationError::MissingField("executionType"))?;
    let execution_type = ExecutionType::parse(execution_type_name)
        .ok_or_else(|| ValidationError::UnknownExecutionType(execution_type_name.to_string()))?;

    // 3. payload
    check_payload_fields(&draft, execution_type)?;

    // 4. payload contents
    let payload = match execution_type {
        ExecutionType::Template => ExecutionPayload::Template {
            template_id: present(&draft.template_id).unwrap_or_default().to_string(),
        },
        ExecutionType::Code => ExecutionPayload::Code {
            execution_code: draft.execution_code.clone().unwrap_or_default(),
        },
        ExecutionType::Composite => ExecutionPayload::Composite(build_plan(
            draft.composition_steps.clone().unwrap_or_default(),
            draft.final_output.clone(),
            &input_schema,
        )?),
    };

    // 5. risk and capabilities
    let risk_name = present(&draft.risk_level).ok_or(ValidationError::MissingField("riskLevel"))?;
    let risk_level: RiskLevel = risk_name
        .parse()
        .map_err(|_| ValidationError::UnknownRiskLevel(risk_name.to_string()))?;
    let tokens = draft
        .required_capabilities
        .as_ref()
        .ok_or(ValidationError::MissingField("requiredCapabilities"))?;
    let required_capabilities = CapabilitySet::from_tokens(tokens)?;

    Ok(ToolSpecification {
        id: present(&draft.id)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
        payload,
        required_capabilities,
        risk_level,
        category: draft.category,
        created_by: draft.created_by.unwrap_or_default(),
        created_at: draft.created_at.unwrap_or_else(Utc::now),
        version: draft.version.unwrap_or(1),
    })
}

fn check_payload_fields(
    draft: &ToolSpecificationDraft,
    execution_type: ExecutionType,
) -> Result<(), ValidationError> {
    let has_template = draft.template_id.is_some();
    let has_code = draft.execution_code.is_some();
    let has_steps = draft.composition_steps.is_some();

    let (expected_field, expected_ok) = match execution_type {
        ExecutionType::Template => ("templateId", present(&draft.template_id).is_some()),
        ExecutionType::Code => ("executionCode", present(&draft.execution_code).is_some()),
        ExecutionType::Composite => (
            "compositionSteps",
            draft.composition_steps.as_ref().is_some_and(|s| !s.is_empty()),
        ),
    };
    if !expected_ok {
        return Err(ValidationError::MissingPayload {
            execution_type,
            field: expected_field,
        });
    }

    let unexpected = [
        ("templateId", has_template, ExecutionType::Template),
        ("executionCode", has_code, ExecutionType::Code),
        ("compositionSteps", has_steps, ExecutionType::Composite),
        ("finalOutput", draft.final_output.is_some(), ExecutionType::Composite),
    ];
    for (field, is_set, owner) in unexpected {
        if is_set && owner != execution_type {
            return Err(ValidationError::UnexpectedPayload {
                execution_type,
                field,
            });
        }
    }
    Ok(())
}

fn build_plan(
    steps: Vec<CompositionStep>,
    final_output: Option<String>,
    input_schema: &InputSchema,
) -> Result<CompositePlan, ValidationError> {
    let mut ids = HashSet::new();
    for (index, step) in steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(ValidationError::MissingStepId(index));
        }
        if !ids.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStepId(step.id.clone()));
        }
        if step.tool_name.trim().is_empty() {
            return Err(ValidationError::MissingToolName(step.id.clone()));
        }
    }

    let mut names: HashSet<&str> = ids.clone();
    for step in &steps {
        if let Some(alias) = step.output_as.as_deref()
            && alias != step.id
            && !names.insert(alias)
        {
            return Err(ValidationError::DuplicateOutputName(alias.to_string()));
        }
    }

    let lookup = |name: &str| {
        steps
            .iter()
            .position(|s| s.id == name)
            .or_else(|| steps.iter().position(|s| s.output_name() == name))
    };

    let mut edges = Vec::new();
    let mut compiled = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        for dependency in &step.depends_on {
            let from = lookup(dependency).ok_or_else(|| ValidationError::UnknownDependency {
                step: step.id.clone(),
                dependency: dependency.clone(),
            })?;
            edges.push((from, index));
        }

        let invalid = |source| ValidationError::InvalidReference {
            step: step.id.clone(),
            source,
        };
        let arguments = ArgumentTemplate::compile(&step.arguments).map_err(invalid)?;
        let condition = step
            .condition
            .as_deref()
            .map(Condition::parse)
            .transpose()
            .map_err(invalid)?;

        let references = arguments
            .references()
            .into_iter()
            .chain(condition.iter().flat_map(Condition::references));
        for reference in references {
            match reference {
                Reference::Step { step: target, .. } => {
                    let from = lookup(target).ok_or_else(|| ValidationError::UnknownStepReference {
                        step: step.id.clone(),
                        reference: target.clone(),
                    })?;
                    edges.push((from, index));
                }
                Reference::Argument { name, .. } => {
                    if !input_schema.properties.contains_key(name)
                        && let Some(from) = lookup(name)
                    {
                        edges.push((from, index));
                    }
                }
            }
        }

        compiled.push(CompiledStep {
            arguments,
            condition,
        });
    }

    if let Some(target) = final_output.as_deref()
        && lookup(target).is_none()
    {
        return Err(ValidationError::UnknownFinalOutput(target.to_string()));
    }

    let graph = StepGraph::build(steps.len(), &edges).map_err(|residual| {
        ValidationError::Cycle(residual.into_iter().map(|i| steps[i].id.clone()).collect())
    })?;

    tracing::debug!(
        steps = steps.len(),
        edges = edges.len(),
        "composite plan validated"
    );

    Ok(CompositePlan::new(steps, compiled, final_output, graph))
}

#[cfg(test)]
mod validator_tests {
    use super::*;
    use serde_json::{Value, json};

    fn base(execution_type: &str) -> Value {
        json!({
            "name": "tool_a",
            "description": "A tool",
            "inputSchema": {
                "type": "object",
                "properties": { "path": { "type": "string" } }
            },
            "executionType": execution_type,
            "requiredCapabilities": ["none"],
            "riskLevel": "safe"
        })
    }

    fn draft(value: Value) -> ToolSpecificationDraft {
        serde_json::from_value(value).unwrap()
    }

    fn composite(steps: Value) -> ToolSpecificationDraft {
        let mut value = base("composite");
        value["compositionSteps"] = steps;
        draft(value)
    }

    #[test]
    fn test_template_accepted_with_defaults() {
        let mut value = base("template");
        value["templateId"] = json!("format_json");
        let spec = validate(draft(value)).unwrap();

        assert_eq!(spec.version, 1);
        assert!(uuid::Uuid::parse_str(&spec.id).is_ok());
        assert!(spec.required_capabilities.is_empty());
        assert_eq!(
            spec.payload,
            ExecutionPayload::Template {
                template_id: "format_json".to_string()
            }
        );
    }

    #[test]
    fn test_check_order() {
        // name is checked before everything else
        assert_eq!(
            validate(ToolSpecificationDraft::default()),
            Err(ValidationError::MissingField("name"))
        );

        let mut value = base("code");
        value["name"] = json!("9lives");
        assert!(matches!(validate(draft(value)), Err(ValidationError::InvalidName(_))));

        let mut value = base("code");
        value.as_object_mut().unwrap().remove("description");
        assert_eq!(validate(draft(value)), Err(ValidationError::MissingField("description")));

        let mut value = base("code");
        value["inputSchema"] = json!({"type": "string"});
        assert!(matches!(validate(draft(value)), Err(ValidationError::InvalidSchema(_))));

        let value = base("shell");
        assert_eq!(
            validate(draft(value)),
            Err(ValidationError::UnknownExecutionType("shell".to_string()))
        );

        // payload before risk level
        let mut value = base("code");
        value["riskLevel"] = json!("extreme");
        assert!(matches!(validate(draft(value)), Err(ValidationError::MissingPayload { .. })));
    }

    #[test]
    fn test_exactly_one_payload() {
        // zero
        assert_eq!(
            validate(draft(base("code"))),
            Err(ValidationError::MissingPayload {
                execution_type: ExecutionType::Code,
                field: "executionCode"
            })
        );

        // two
        let mut value = base("code");
        value["executionCode"] = json!("return 1");
        value["templateId"] = json!("format_json");
        assert_eq!(
            validate(draft(value)),
            Err(ValidationError::UnexpectedPayload {
                execution_type: ExecutionType::Code,
                field: "templateId"
            })
        );

        // empty payload counts as missing
        let mut value = base("composite");
        value["compositionSteps"] = json!([]);
        assert!(matches!(validate(draft(value)), Err(ValidationError::MissingPayload { .. })));

        let mut value = base("template");
        value["templateId"] = json!("   ");
        assert!(matches!(validate(draft(value)), Err(ValidationError::MissingPayload { .. })));

        // finalOutput belongs to composites only
        let mut value = base("code");
        value["executionCode"] = json!("return 1");
        value["finalOutput"] = json!("x");
        assert!(matches!(validate(draft(value)), Err(ValidationError::UnexpectedPayload { field: "finalOutput", .. })));
    }

    #[test]
    fn test_risk_and_capabilities() {
        let mut value = base("code");
        value["executionCode"] = json!("return 1");
        value["riskLevel"] = json!("extreme");
        assert_eq!(
            validate(draft(value)),
            Err(ValidationError::UnknownRiskLevel("extreme".to_string()))
        );

        for (tokens, expected) in [
            (json!([]), CapabilityTokenError::Empty),
            (json!(["none", "network"]), CapabilityTokenError::NoneMixed),
        ] {
            let mut value = base("code");
            value["executionCode"] = json!("return 1");
            value["requiredCapabilities"] = tokens;
            assert_eq!(
                validate(draft(value)),
                Err(ValidationError::InvalidCapabilities(expected))
            );
        }

        let mut value = base("code");
        value["executionCode"] = json!("return 1");
        value["requiredCapabilities"] = json!(["file_read", "teleport"]);
        assert!(matches!(
            validate(draft(value)),
            Err(ValidationError::InvalidCapabilities(CapabilityTokenError::Unknown(_)))
        ));
    }

    #[test]
    fn test_composite_accepted() {
        let spec = validate(composite(json!([
            {"id": "read", "toolName": "read_file", "arguments": {"path": "$.path"}, "outputAs": "source"},
            {"id": "analyze", "toolName": "analyzer", "arguments": {"code": "$.steps.source.output.content"}},
            {"id": "fix", "toolName": "fixer", "arguments": {"issues": "$.steps.analyze.output.issues"},
             "dependsOn": ["analyze"], "condition": "$.steps.analyze.output.issues.length > 0"}
        ])))
        .unwrap();

        let plan = spec.composite().unwrap();
        assert_eq!(plan.graph().order(), &[0, 1, 2]);
        // implicit edge from the data reference
        assert_eq!(plan.graph().dependencies(1), &[0]);
        assert_eq!(plan.index_of("source"), Some(0));
        assert_eq!(plan.aliases().get("source").map(String::as_str), Some("read"));
    }

    #[test]
    fn test_output_as_fallback_adds_edge() {
        let spec = validate(composite(json!([
            {"id": "b", "toolName": "t", "arguments": {"x": "$.first"}},
            {"id": "a", "toolName": "t", "outputAs": "first"}
        ])))
        .unwrap();
        assert_eq!(spec.composite().unwrap().graph().order(), &[1, 0]);
    }

    #[test]
    fn test_composite_structure_errors() {
        let cases = [
            (json!([{"toolName": "t"}]), "has no id"),
            (json!([{"id": "a", "toolName": "t"}, {"id": "a", "toolName": "t"}]), "duplicate step id"),
            (json!([{"id": "a", "toolName": ""}]), "no toolName"),
            (
                json!([{"id": "a", "toolName": "t", "outputAs": "x"}, {"id": "b", "toolName": "t", "outputAs": "x"}]),
                "more than one step",
            ),
            (
                json!([{"id": "a", "toolName": "t", "outputAs": "b"}, {"id": "b", "toolName": "t"}]),
                "more than one step",
            ),
            (json!([{"id": "a", "toolName": "t", "dependsOn": ["ghost"]}]), "unknown step 'ghost'"),
            (json!([{"id": "a", "toolName": "t", "arguments": {"x": "$.steps.ghost.output"}}]), "references unknown step"),
            (json!([{"id": "a", "toolName": "t", "arguments": {"x": "$.a..b"}}]), "invalid reference"),
            (json!([{"id": "a", "toolName": "t", "condition": "$.x =="}]), "invalid condition"),
        ];

        for (steps, expected) in cases {
            let err = validate(composite(steps.clone())).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{} -> {} (expected '{}')",
                steps,
                err,
                expected
            );
        }
    }

    #[test]
    fn test_unknown_final_output() {
        let mut value = base("composite");
        value["compositionSteps"] = json!([{"id": "a", "toolName": "t"}]);
        value["finalOutput"] = json!("b");
        assert_eq!(
            validate(draft(value)),
            Err(ValidationError::UnknownFinalOutput("b".to_string()))
        );
    }

    #[test]
    fn test_cycles_rejected() {
        let explicit = composite(json!([
            {"id": "a", "toolName": "t", "dependsOn": ["c"]},
            {"id": "b", "toolName": "t", "dependsOn": ["a"]},
            {"id": "c", "toolName": "t", "dependsOn": ["b"]}
        ]));
        assert_eq!(
            validate(explicit),
            Err(ValidationError::Cycle(vec!["a".into(), "b".into(), "c".into()]))
        );

        let implicit = composite(json!([
            {"id": "a", "toolName": "t", "arguments": {"x": "$.steps.b.output"}},
            {"id": "b", "toolName": "t", "dependsOn": ["a"]}
        ]));
        assert!(matches!(validate(implicit), Err(ValidationError::Cycle(_))));

        let self_ref = composite(json!([
            {"id": "a", "toolName": "t", "condition": "$.steps.a.output"}
        ]));
        assert!(matches!(validate(self_ref), Err(ValidationError::Cycle(_))));
    }

    #[test]
    fn test_large_cycle_terminates() {
        let n = 5_000;
        let steps: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "id": format!("s{}", i),
                    "toolName": "t",
                    "dependsOn": [format!("s{}", (i + 1) % n)]
                })
            })
            .collect();
        let err = validate(composite(Value::Array(steps))).unwrap_err();
        assert!(matches!(err, ValidationError::Cycle(ids) if ids.len() == n));
    }
}
