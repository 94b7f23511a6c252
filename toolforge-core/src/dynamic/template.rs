//! Template executor
//!
//! A closed catalog of parameterized operations compiled into the binary.
//! Templates never evaluate code; they are the safe execution path and
//! normally need no capabilities at all.

use crate::tools::{ArgumentIssue, PropertyType, ToolError, ToolExecutionContext};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::sync::LazyLock;

/// A parameter a template binds from the invocation arguments
#[derive(Debug, Clone, Serialize)]
pub struct TemplateParam {
    pub name: &'static str,
    /// `None` accepts any JSON value
    #[serde(rename = "type")]
    pub kind: Option<PropertyType>,
    pub required: bool,
    pub description: &'static str,
}

const fn param(
    name: &'static str,
    kind: Option<PropertyType>,
    required: bool,
    description: &'static str,
) -> TemplateParam {
    TemplateParam {
        name,
        kind,
        required,
        description,
    }
}

type TemplateFn = fn(&Value) -> Result<Value, ToolError>;

/// One entry of the template catalog
#[derive(Clone, Serialize)]
pub struct TemplateDescriptor {
    pub id: &'static str,
    pub description: &'static str,
    pub params: &'static [TemplateParam],
    #[serde(skip)]
    run: TemplateFn,
}

impl std::fmt::Debug for TemplateDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateDescriptor")
            .field("id", &self.id)
            .field("params", &self.params)
            .finish()
    }
}

impl TemplateDescriptor {
    /// Check the arguments against the declared parameters
    pub fn bind(&self, args: &Value) -> Result<(), ToolError> {
        let empty = Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(ToolError::schema_violation(vec![ArgumentIssue::new(
                    "$",
                    "template arguments must be an object",
                )]));
            }
        };

        let issues: Vec<ArgumentIssue> = self
            .params
            .iter()
            .filter_map(|p| match (object.get(p.name), p.kind) {
                (None | Some(Value::Null), _) if p.required => Some(ArgumentIssue::new(
                    p.name,
                    format!("required by template '{}'", self.id),
                )),
                (Some(value), Some(kind)) if !value.is_null() && !kind.matches(value) => {
                    Some(ArgumentIssue::new(p.name, format!("expected {}", kind)))
                }
                _ => None,
            })
            .collect();

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ToolError::schema_violation(issues))
        }
    }
}

static CATALOG: &[TemplateDescriptor] = &[
    TemplateDescriptor {
        id: "format_json",
        description: "Pretty-print or minify a JSON document",
        params: &[
            param("json", None, true, "JSON text or value to format"),
            param("indent", Some(PropertyType::Integer), false, "Spaces per level, 0 minifies (default 2)"),
        ],
        run: format_json,
    },
    TemplateDescriptor {
        id: "scaffold_component",
        description: "Render a UI component skeleton",
        params: &[
            param("name", Some(PropertyType::String), true, "Component name"),
            param("framework", Some(PropertyType::String), false, "react, vue or svelte (default react)"),
            param("props", Some(PropertyType::Array), false, "Prop names"),
        ],
        run: scaffold_component,
    },
    TemplateDescriptor {
        id: "text_transform",
        description: "Change the case or shape of a piece of text",
        params: &[
            param("text", Some(PropertyType::String), true, "Input text"),
            param(
                "operation",
                Some(PropertyType::String),
                true,
                "upper, lower, trim, reverse, snake_case, kebab_case, camel_case or title_case",
            ),
        ],
        run: text_transform,
    },
    TemplateDescriptor {
        id: "render_template",
        description: "Substitute {{key}} placeholders",
        params: &[
            param("template", Some(PropertyType::String), true, "Text containing {{key}} placeholders"),
            param("values", Some(PropertyType::Object), true, "Placeholder values"),
        ],
        run: render_template,
    },
    TemplateDescriptor {
        id: "text_stats",
        description: "Count lines, words and characters",
        params: &[param("text", Some(PropertyType::String), true, "Input text")],
        run: text_stats,
    },
    TemplateDescriptor {
        id: "hash_text",
        description: "Hex digest of a string",
        params: &[
            param("input", Some(PropertyType::String), true, "Text to hash"),
            param("algorithm", Some(PropertyType::String), false, "sha224, sha256, sha384 or sha512 (default sha256)"),
        ],
        run: hash_text,
    },
];

/// Runs catalog templates
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateExecutor;

impl TemplateExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Every template, in catalog order
    pub fn catalog(&self) -> &'static [TemplateDescriptor] {
        CATALOG
    }

    pub fn get(&self, template_id: &str) -> Option<&'static TemplateDescriptor> {
        CATALOG.iter().find(|t| t.id == template_id)
    }

    /// Run a template against the invocation arguments
    pub fn run(
        &self,
        template_id: &str,
        args: &Value,
        ctx: &ToolExecutionContext,
    ) -> Result<Value, ToolError> {
        let template = self
            .get(template_id)
            .ok_or_else(|| ToolError::template_not_found(template_id))?;
        if ctx.is_cancelled() {
            return Err(ToolError::cancelled("Cancelled before execution"));
        }
        template.bind(args)?;

        tracing::debug!(template = template_id, "running template");
        (template.run)(args)
    }
}

fn str_param<'a>(args: &'a Value, name: &str) -> &'a str {
    args.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn invalid_param(name: &str, message: impl Into<String>) -> ToolError {
    ToolError::schema_violation(vec![ArgumentIssue::new(name, message)])
}

/// Hex digest of `input`, or `None` for an unsupported algorithm
pub(crate) fn digest_hex(algorithm: &str, input: &[u8]) -> Option<String> {
    let bytes = match algorithm.to_ascii_lowercase().replace('-', "").as_str() {
        "sha224" => Sha224::digest(input).to_vec(),
        "sha256" => Sha256::digest(input).to_vec(),
        "sha384" => Sha384::digest(input).to_vec(),
        "sha512" => Sha512::digest(input).to_vec(),
        _ => return None,
    };
    Some(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

fn format_json(args: &Value) -> Result<Value, ToolError> {
    let document = match &args["json"] {
        Value::String(text) => serde_json::from_str::<Value>(text).map_err(|e| {
            ToolError::execution(format!("input is not valid JSON: {}", e)).with_code("INVALID_JSON")
        })?,
        other => other.clone(),
    };

    let indent = args.get("indent").and_then(Value::as_u64).unwrap_or(2);
    if indent > 8 {
        return Err(invalid_param("indent", "must be between 0 and 8"));
    }

    let formatted = if indent == 0 {
        serde_json::to_string(&document)
    } else {
        let pad = " ".repeat(indent as usize);
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        document
            .serialize(&mut serializer)
            .map(|_| String::from_utf8_lossy(&out).into_owned())
    }
    .map_err(|e| ToolError::internal(e.to_string()))?;

    Ok(json!({ "formatted": formatted }))
}

fn scaffold_component(args: &Value) -> Result<Value, ToolError> {
    let name = pascal_case(str_param(args, "name"));
    if name.is_empty() {
        return Err(invalid_param("name", "must contain a letter or digit"));
    }
    let framework = args
        .get("framework")
        .and_then(Value::as_str)
        .unwrap_or("react")
        .to_ascii_lowercase();
    let props: Vec<&str> = args
        .get("props")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let (path, content) = match framework.as_str() {
        "react" => {
            let signature = if props.is_empty() {
                String::new()
            } else {
                format!("{{ {} }}", props.join(", "))
            };
            (
                format!("src/components/{}.tsx", name),
                format!(
                    "export function {name}({signature}) {{\n  return <div className=\"{css}\">{name}</div>;\n}}\n\nexport default {name};\n",
                    css = kebab_case(&name),
                ),
            )
        }
        "vue" => {
            let props_decl = if props.is_empty() {
                String::new()
            } else {
                let list: Vec<String> = props.iter().map(|p| format!("'{}'", p)).collect();
                format!("const props = defineProps([{}]);\n", list.join(", "))
            };
            (
                format!("src/components/{}.vue", name),
                format!(
                    "<script setup>\n{props_decl}</script>\n\n<template>\n  <div class=\"{css}\">{name}</div>\n</template>\n",
                    css = kebab_case(&name),
                ),
            )
        }
        "svelte" => {
            let exports: String = props.iter().map(|p| format!("  export let {};\n", p)).collect();
            (
                format!("src/lib/{}.svelte", name),
                format!(
                    "<script>\n{exports}</script>\n\n<div class=\"{css}\">{name}</div>\n",
                    css = kebab_case(&name),
                ),
            )
        }
        other => {
            return Err(invalid_param(
                "framework",
                format!("unsupported framework '{}', expected react, vue or svelte", other),
            ));
        }
    };

    Ok(json!({
        "name": name,
        "framework": framework,
        "path": path,
        "content": content,
    }))
}

fn text_transform(args: &Value) -> Result<Value, ToolError> {
    let text = str_param(args, "text");
    let operation = str_param(args, "operation");

    let result = match operation {
        "upper" => text.to_uppercase(),
        "lower" => text.to_lowercase(),
        "trim" => text.trim().to_string(),
        "reverse" => text.chars().rev().collect(),
        "snake_case" => words(text).join("_"),
        "kebab_case" => kebab_case(text),
        "camel_case" => {
            let pascal = pascal_case(text);
            let mut chars = pascal.chars();
            match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        "title_case" => words(text)
            .iter()
            .map(|w| capitalize(w))
            .collect::<Vec<_>>()
            .join(" "),
        other => {
            return Err(invalid_param(
                "operation",
                format!("unknown operation '{}'", other),
            ));
        }
    };

    Ok(json!({ "result": result, "operation": operation }))
}

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").ok());

fn render_template(args: &Value) -> Result<Value, ToolError> {
    let template = str_param(args, "template");
    let values = &args["values"];
    let placeholder = PLACEHOLDER
        .as_ref()
        .ok_or_else(|| ToolError::internal("placeholder pattern failed to compile"))?;

    let mut missing = Vec::new();
    let rendered = placeholder.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        let value = key.split('.').try_fold(values, |v, seg| v.get(seg));
        match value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                if !missing.iter().any(|m: &String| m == key) {
                    missing.push(key.to_string());
                }
                caps[0].to_string()
            }
            Some(other) => other.to_string(),
        }
    });

    Ok(json!({ "rendered": rendered, "missing": missing }))
}

fn text_stats(args: &Value) -> Result<Value, ToolError> {
    let text = str_param(args, "text");
    Ok(json!({
        "lines": text.lines().count(),
        "words": text.split_whitespace().count(),
        "chars": text.chars().count(),
        "bytes": text.len(),
    }))
}

fn hash_text(args: &Value) -> Result<Value, ToolError> {
    let algorithm = args
        .get("algorithm")
        .and_then(Value::as_str)
        .unwrap_or("sha256");
    let digest = digest_hex(algorithm, str_param(args, "input").as_bytes()).ok_or_else(|| {
        invalid_param("algorithm", format!("unsupported algorithm '{}'", algorithm))
    })?;
    Ok(json!({ "algorithm": algorithm.to_ascii_lowercase(), "digest": digest }))
}

/// Lowercase words split on punctuation, whitespace and camelCase humps
fn words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn pascal_case(text: &str) -> String {
    words(text).iter().map(|w| capitalize(w)).collect()
}

fn kebab_case(text: &str) -> String {
    words(text).join("-")
}
