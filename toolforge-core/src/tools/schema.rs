//! Input schemas for tools
//!
//! A deliberately small JSON-Schema subset: the top level is always an
//! object, properties carry one of six primitive types, and nested
//! `properties` are allowed one level deep. The same type describes the
//! parameters of built-in tools and of synthesized tools, and is exported
//! verbatim as JSON Schema for LLM tool listings.

use super::result::ArgumentIssue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Deepest level at which `properties` may appear (top level is 1)
pub const MAX_SCHEMA_DEPTH: usize = 2;

/// Property types accepted in an input schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Object,
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Object => "object",
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Integer => "integer",
            PropertyType::Boolean => "boolean",
            PropertyType::Array => "array",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "object" => PropertyType::Object,
            "string" => PropertyType::String,
            "number" => PropertyType::Number,
            "integer" => PropertyType::Integer,
            "boolean" => PropertyType::Boolean,
            "array" => PropertyType::Array,
            _ => return None,
        })
    }

    /// Check whether a JSON value has this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            PropertyType::Object => value.is_object(),
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: PropertyType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Nested properties (object-typed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, PropertySchema>>,

    /// Required nested properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Element schema (array-typed only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,

    /// Allowed values
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl PropertySchema {
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            description: None,
            properties: None,
            required: Vec::new(),
            items: None,
            allowed: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(PropertyType::String).with_description(description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(PropertyType::Integer).with_description(description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(PropertyType::Boolean).with_description(description)
    }

    pub fn array_of(items: PropertySchema, description: impl Into<String>) -> Self {
        let mut schema = Self::new(PropertyType::Array).with_description(description);
        schema.items = Some(Box::new(items));
        schema
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_enum(mut self, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn check(&self, path: &str, value: &Value, issues: &mut Vec<ArgumentIssue>) {
        if !self.kind.matches(value) {
            issues.push(ArgumentIssue::new(
                path,
                format!("expected {}, got {}", self.kind, json_type_name(value)),
            ));
            return;
        }

        if let Some(allowed) = &self.allowed
            && !allowed.contains(value)
        {
            issues.push(ArgumentIssue::new(
                path,
                format!("must be one of {}", Value::Array(allowed.clone())),
            ));
        }

        if let (Some(properties), Some(object)) = (&self.properties, value.as_object()) {
            check_object(path, properties, &self.required, object, issues);
        }

        if let (Some(items), Some(array)) = (&self.items, value.as_array()) {
            for (index, element) in array.iter().enumerate() {
                items.check(&format!("{}[{}]", path, index), element, issues);
            }
        }
    }
}

/// Top-level input schema
///
/// Keeps the JSON it was parsed from, so keywords outside the checked
/// subset (`description`, `additionalProperties`, ...) survive export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub struct InputSchema {
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
    raw: Value,
}

#[derive(Deserialize)]
struct CheckedSubset {
    #[serde(default)]
    properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    required: Vec<String>,
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl From<InputSchema> for Value {
    fn from(schema: InputSchema) -> Self {
        schema.raw
    }
}

impl TryFrom<Value> for InputSchema {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

impl InputSchema {
    /// Create an empty object schema
    pub fn new() -> Self {
        Self {
            properties: BTreeMap::new(),
            required: Vec::new(),
            raw: serde_json::json!({"type": "object"}),
        }
    }

    /// Add a property
    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema, required: bool) -> Self {
        let name = name.into();
        if let Value::Object(raw) = &mut self.raw {
            if let Value::Object(properties) = raw
                .entry("properties")
                .or_insert_with(|| Value::Object(serde_json::Map::new()))
                && let Ok(value) = serde_json::to_value(&schema)
            {
                properties.insert(name.clone(), value);
            }
            if required
                && let Value::Array(list) = raw
                    .entry("required")
                    .or_insert_with(|| Value::Array(Vec::new()))
            {
                list.push(Value::String(name.clone()));
            }
        }
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Parse and structurally check a raw JSON schema value
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "inputSchema must be a JSON object".to_string())?;

        match object.get("type").and_then(Value::as_str) {
            Some("object") => {}
            Some(other) => return Err(format!("inputSchema.type must be \"object\", got \"{}\"", other)),
            None => return Err("inputSchema.type is missing".to_string()),
        }

        if let Some(properties) = object.get("properties") {
            check_properties_value("inputSchema", properties, 1)?;
        }

        let checked: CheckedSubset =
            serde_json::from_value(value.clone()).map_err(|e| format!("inputSchema: {}", e))?;

        for name in &checked.required {
            if !checked.properties.contains_key(name) {
                return Err(format!(
                    "inputSchema.required names unknown property '{}'",
                    name
                ));
            }
        }
        Ok(Self {
            properties: checked.properties,
            required: checked.required,
            raw: value.clone(),
        })
    }

    /// Check runtime arguments against this schema
    pub fn validate_args(&self, args: &Value) -> Result<(), Vec<ArgumentIssue>> {
        let empty = serde_json::Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(vec![ArgumentIssue::new(
                    "$",
                    format!("arguments must be an object, got {}", json_type_name(other)),
                )]);
            }
        };

        let mut issues = Vec::new();
        check_object("", &self.properties, &self.required, object, &mut issues);
        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }

    /// Export as plain JSON Schema
    pub fn to_json_schema(&self) -> Value {
        self.raw.clone()
    }
}

fn check_object(
    prefix: &str,
    properties: &BTreeMap<String, PropertySchema>,
    required: &[String],
    object: &serde_json::Map<String, Value>,
    issues: &mut Vec<ArgumentIssue>,
) {
    let join = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", prefix, name)
        }
    };

    for name in required {
        match object.get(name) {
            None | Some(Value::Null) => issues.push(ArgumentIssue::new(join(name), "is required")),
            Some(_) => {}
        }
    }

    for (name, schema) in properties {
        match object.get(name) {
            None | Some(Value::Null) => {}
            Some(value) => schema.check(&join(name), value, issues),
        }
    }
}

fn check_properties_value(path: &str, properties: &Value, depth: usize) -> Result<(), String> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(format!(
            "{}: properties may be nested at most one level deep",
            path
        ));
    }

    let map = properties
        .as_object()
        .ok_or_else(|| format!("{}.properties must be an object", path))?;

    for (name, property) in map {
        let here = format!("{}.{}", path, name);
        check_property_value(&here, property, depth)?;
    }
    Ok(())
}

fn check_property_value(path: &str, property: &Value, depth: usize) -> Result<(), String> {
    let type_name = property
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{}.type is missing", path))?;

    let kind = PropertyType::parse(type_name)
        .ok_or_else(|| format!("{}.type '{}' is not a supported type", path, type_name))?;

    if let Some(nested) = property.get("properties") {
        if kind != PropertyType::Object {
            return Err(format!("{}: only object properties may declare properties", path));
        }
        check_properties_value(path, nested, depth + 1)?;
    }

    if let Some(items) = property.get("items") {
        if kind != PropertyType::Array {
            return Err(format!("{}: only array properties may declare items", path));
        }
        check_property_value(&format!("{}[]", path), items, depth + 1)?;
    }
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
