//! Registry of statically defined tools
//!
//! Built-in tools are registered once at session start and never change.
//! The execution router consults this registry after the dynamic one.

use super::builtin::{ListDirectoryTool, ReadFileTool, RunCommandTool, WriteFileTool};
use super::capability::CapabilitySet;
use super::tool::{BoxedTool, RiskLevel, Tool, tool_descriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Error type for built-in registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuiltinRegistryError {
    /// Tool with this name already exists
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),
}

/// Summary of a built-in tool for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub required_capabilities: Vec<String>,
    pub category: Option<String>,
}

impl From<&dyn Tool> for ToolSummary {
    fn from(tool: &dyn Tool) -> Self {
        let metadata = tool.metadata();
        Self {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            risk_level: tool.risk_level(),
            required_capabilities: tool.required_capabilities().to_tokens(),
            category: metadata.category.clone(),
        }
    }
}

/// Registry of built-in tools, keyed by name
#[derive(Default)]
pub struct BuiltinRegistry {
    tools: BTreeMap<String, BoxedTool>,
}

impl std::fmt::Debug for BuiltinRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BuiltinRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the shipped built-ins
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: [BoxedTool; 4] = [
            Arc::new(ReadFileTool::new()),
            Arc::new(WriteFileTool::new()),
            Arc::new(ListDirectoryTool::new()),
            Arc::new(RunCommandTool::new()),
        ];
        for tool in defaults {
            registry.tools.insert(tool.name().to_string(), tool);
        }
        registry
    }

    /// Register a tool
    ///
    /// Returns an error if a tool with the same name is already registered.
    pub fn register(&mut self, tool: BoxedTool) -> Result<(), BuiltinRegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(BuiltinRegistryError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    /// Check if a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tools with their summaries
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools
            .values()
            .map(|t| ToolSummary::from(t.as_ref()))
            .collect()
    }

    /// Tools whose capabilities are all granted
    pub fn available_to(&self, granted: &CapabilitySet) -> Vec<&BoxedTool> {
        self.tools
            .values()
            .filter(|tool| granted.contains_all(&tool.required_capabilities()))
            .collect()
    }

    /// JSON descriptors for the LLM tool listing
    pub fn descriptors(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|t| tool_descriptor(t.name(), t.description(), &t.input_schema()))
            .collect()
    }
}
