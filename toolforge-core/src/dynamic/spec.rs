//! Tool specifications
//!
//! A [`ToolSpecificationDraft`] is what an LLM emits: camelCase JSON with
//! every field optional, so that malformed input reaches the validator
//! instead of failing deserialization. A [`ToolSpecification`] is the
//! accepted form; its payload is a closed sum type and composite plans carry
//! their pre-parsed references and cached dependency graph.
//!
//! `ToolSpecification` serializes as a draft and deserializes through the
//! validator, so a stored specification can never bypass validation.

use super::graph::StepGraph;
use super::reference::{ArgumentTemplate, Condition};
use super::validator::{ValidationError, validate};
use crate::tools::{CapabilitySet, InputSchema, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How a dynamic tool is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    Template,
    Code,
    Composite,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Template => "template",
            ExecutionType::Code => "code",
            ExecutionType::Composite => "composite",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "template" => Some(ExecutionType::Template),
            "code" => Some(ExecutionType::Code),
            "composite" => Some(ExecutionType::Composite),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session and run that synthesized a tool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// One step of a composite tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionStep {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub tool_name: String,

    /// Literal JSON; strings starting with `$.` are references
    #[serde(default = "empty_object")]
    pub arguments: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_as: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl CompositionStep {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn output_as(mut self, name: impl Into<String>) -> Self {
        self.output_as = Some(name.into());
        self
    }

    /// Name the output is stored under
    pub fn output_name(&self) -> &str {
        self.output_as.as_deref().unwrap_or(&self.id)
    }
}

/// Unvalidated specification as emitted by an LLM
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecificationDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_steps: Option<Vec<CompositionStep>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capabilities: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<CreatedBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl ToolSpecificationDraft {
    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Validate into an accepted specification
    pub fn validate(self) -> Result<ToolSpecification, ValidationError> {
        validate(self)
    }
}

/// A composite step with its references already parsed
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStep {
    pub arguments: ArgumentTemplate,
    pub condition: Option<Condition>,
}

/// Accepted composite payload
#[derive(Debug, Clone, PartialEq)]
pub struct CompositePlan {
    steps: Vec<CompositionStep>,
    compiled: Vec<CompiledStep>,
    final_output: Option<String>,
    graph: StepGraph,
}

impl CompositePlan {
    pub(crate) fn new(
        steps: Vec<CompositionStep>,
        compiled: Vec<CompiledStep>,
        final_output: Option<String>,
        graph: StepGraph,
    ) -> Self {
        Self {
            steps,
            compiled,
            final_output,
            graph,
        }
    }

    pub fn steps(&self) -> &[CompositionStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> &CompositionStep {
        &self.steps[index]
    }

    pub fn compiled(&self, index: usize) -> &CompiledStep {
        &self.compiled[index]
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Step (id or `outputAs`) whose output is the composite's result
    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    /// Find a step by id or `outputAs` name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.id == name)
            .or_else(|| self.steps.iter().position(|s| s.output_name() == name))
    }

    /// `outputAs -> step id` aliases for the output table
    pub fn aliases(&self) -> HashMap<String, String> {
        self.steps
            .iter()
            .filter(|s| s.output_name() != s.id)
            .map(|s| (s.output_name().to_string(), s.id.clone()))
            .collect()
    }
}

/// What an accepted specification runs
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionPayload {
    Template { template_id: String },
    Code { execution_code: String },
    Composite(CompositePlan),
}

impl ExecutionPayload {
    pub fn execution_type(&self) -> ExecutionType {
        match self {
            ExecutionPayload::Template { .. } => ExecutionType::Template,
            ExecutionPayload::Code { .. } => ExecutionType::Code,
            ExecutionPayload::Composite(_) => ExecutionType::Composite,
        }
    }
}

/// A validated, immutable tool specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ToolSpecificationDraft", into = "ToolSpecificationDraft")]
pub struct ToolSpecification {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub payload: ExecutionPayload,
    pub required_capabilities: CapabilitySet,
    pub risk_level: RiskLevel,
    pub category: Option<String>,
    pub created_by: CreatedBy,
    pub created_at: DateTime<Utc>,
    pub version: u32,
}

impl ToolSpecification {
    pub fn execution_type(&self) -> ExecutionType {
        self.payload.execution_type()
    }

    /// Composite plan, if this is a composite tool
    pub fn composite(&self) -> Option<&CompositePlan> {
        match &self.payload {
            ExecutionPayload::Composite(plan) => Some(plan),
            _ => None,
        }
    }

    /// Tool descriptor handed to the LLM
    pub fn descriptor(&self) -> Value {
        crate::tools::tool_descriptor(&self.name, &self.description, &self.input_schema)
    }

    /// Copy with a different version
    pub(crate) fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl TryFrom<ToolSpecificationDraft> for ToolSpecification {
    type Error = ValidationError;

    fn try_from(draft: ToolSpecificationDraft) -> Result<Self, Self::Error> {
        validate(draft)
    }
}

impl From<ToolSpecification> for ToolSpecificationDraft {
    fn from(spec: ToolSpecification) -> Self {
        let execution_type = Some(spec.execution_type().as_str().to_string());
        let (template_id, execution_code, composition_steps, final_output) = match spec.payload {
            ExecutionPayload::Template { template_id } => (Some(template_id), None, None, None),
            ExecutionPayload::Code { execution_code } => (None, Some(execution_code), None, None),
            ExecutionPayload::Composite(plan) => {
                (None, None, Some(plan.steps), plan.final_output)
            }
        };

        ToolSpecificationDraft {
            id: Some(spec.id),
            name: Some(spec.name),
            description: Some(spec.description),
            input_schema: Some(spec.input_schema.to_json_schema()),
            execution_type,
            template_id,
            execution_code,
            composition_steps,
            final_output,
            required_capabilities: Some(spec.required_capabilities.to_tokens()),
            risk_level: Some(spec.risk_level.as_str().to_string()),
            category: spec.category,
            created_by: Some(spec.created_by),
            created_at: Some(spec.created_at),
            version: Some(spec.version),
        }
    }
}

#[cfg(test)]
mod spec_tests {
    use super::*;
    use serde_json::json;

    fn code_draft() -> ToolSpecificationDraft {
        serde_json::from_value(json!({
            "id": "b7a4c1f2-0000-4000-8000-000000000001",
            "name": "hash_calculator",
            "description": "Hash a string",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "input": { "type": "string" },
                    "algorithm": { "type": "string" }
                },
                "required": ["input"]
            },
            "executionType": "code",
            "executionCode": "return host.hash(args.algorithm or 'sha256', args.input)",
            "requiredCapabilities": ["none"],
            "riskLevel": "safe",
            "category": "crypto",
            "createdBy": { "sessionId": "s-1", "runId": "r-1" },
            "createdAt": "2026-01-02T03:04:05Z",
            "version": 3
        }))
        .unwrap()
    }

    #[test]
    fn test_draft_accepts_partial_input() {
        let draft: ToolSpecificationDraft = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(draft.name.as_deref(), Some("x"));
        assert!(draft.execution_type.is_none());
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let draft = code_draft();
        let spec = draft.clone().validate().unwrap();
        assert_eq!(spec.execution_type(), ExecutionType::Code);
        assert_eq!(spec.version, 3);

        let back = ToolSpecificationDraft::from(spec.clone());
        assert_eq!(back, draft);

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["executionCode"], draft.execution_code.clone().unwrap());
        let reparsed: ToolSpecification = serde_json::from_value(json).unwrap();
        assert_eq!(reparsed, spec);
    }

    #[test]
    fn test_accepted_json_is_unchanged() {
        let original = json!({
            "id": "b7a4c1f2-0000-4000-8000-000000000002",
            "name": "pretty",
            "description": "  Pretty-print JSON  ",
            "inputSchema": {
                "type": "object",
                "description": "args",
                "additionalProperties": false
            },
            "executionType": "template",
            "templateId": "format_json",
            "requiredCapabilities": ["none"],
            "riskLevel": "safe",
            "createdBy": {},
            "createdAt": "2026-01-02T03:04:05Z",
            "version": 1
        });
        let spec: ToolSpecification = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(spec.description, "  Pretty-print JSON  ");
        assert_eq!(serde_json::to_value(&spec).unwrap(), original);
    }

    #[test]
    fn test_deserialize_runs_validator() {
        let mut json = serde_json::to_value(code_draft()).unwrap();
        json["templateId"] = json!("format_json");
        let result: Result<ToolSpecification, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_step_output_name() {
        let step = CompositionStep::new("s1", "read_file", json!({}));
        assert_eq!(step.output_name(), "s1");
        assert_eq!(step.clone().output_as("content").output_name(), "content");
    }

    #[test]
    fn test_step_defaults_when_fields_missing() {
        let step: CompositionStep = serde_json::from_value(json!({"id": "a"})).unwrap();
        assert_eq!(step.tool_name, "");
        assert_eq!(step.arguments, json!({}));
        assert!(step.depends_on.is_empty());
    }
}
