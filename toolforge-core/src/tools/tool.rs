//! Tool trait and metadata definitions
//!
//! Built-in tools implement [`Tool`]. They declare a risk level, the
//! capabilities they need and an input schema; the execution router runs
//! the capability gate and argument validation before calling `execute`.

use super::capability::CapabilitySet;
use super::context::ToolExecutionContext;
use super::result::ToolError;
use super::schema::InputSchema;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// How much damage a tool can do if misused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or pure computation
    Safe,

    /// Modifies workspace state; confirmed unless yolo mode is on
    Moderate,

    /// Always confirmed
    Dangerous,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Dangerous => "dangerous",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(RiskLevel::Safe),
            "moderate" => Ok(RiskLevel::Moderate),
            "dangerous" => Ok(RiskLevel::Dangerous),
            other => Err(format!("unknown risk level '{}'", other)),
        }
    }
}

/// Tool metadata for LLM-friendly discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Tool name (unique identifier)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// What the tool returns
    pub returns: String,

    /// Category used for grouping in listings
    pub category: Option<String>,
}

impl ToolMetadata {
    /// Create new metadata with required fields
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            returns: "Tool-specific result".to_string(),
            category: None,
        }
    }

    /// Set return description
    pub fn with_returns(mut self, returns: impl Into<String>) -> Self {
        self.returns = returns.into();
        self
    }

    /// Set category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Core tool trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get tool metadata
    fn metadata(&self) -> &ToolMetadata;

    /// Get tool name (convenience method)
    fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Get tool description (convenience method)
    fn description(&self) -> &str {
        &self.metadata().description
    }

    /// Schema the arguments are validated against
    fn input_schema(&self) -> InputSchema;

    /// Risk level fed to the capability gate
    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Safe
    }

    /// Capabilities that must be granted to the session
    fn required_capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    /// Argument patterns that always require confirmation, even in yolo mode
    fn always_confirm_patterns(&self) -> &[Regex] {
        &[]
    }

    /// Text the always-confirm patterns are matched against
    fn confirmation_subject(&self, args: &Value) -> String {
        args.to_string()
    }

    /// Execute the tool
    ///
    /// Called only after the gate allowed the call and the arguments
    /// passed schema validation.
    async fn execute(&self, args: Value, ctx: &ToolExecutionContext) -> Result<Value, ToolError>;
}

/// Type alias for shared tools
pub type BoxedTool = Arc<dyn Tool>;

/// Tool descriptor handed to the LLM
pub fn tool_descriptor(name: &str, description: &str, schema: &InputSchema) -> Value {
    serde_json::json!({
        "name": name,
        "description": description,
        "input_schema": schema.to_json_schema(),
    })
}
