//! Reference expressions and step conditions
//!
//! Composite step arguments may contain `$.` references that are resolved
//! when the step starts:
//!
//! ```text
//! $.<arg>(.<key> | [n])*                  invocation argument
//! $.steps.<step>.output(.<key> | [n])*    output of an earlier step
//! ```
//!
//! `<step>` is a step id or its `outputAs` name. A bare `$.<name>` that is
//! not an argument falls back to a completed step's output. The key
//! `length` yields the length of an array or string when no such key exists.
//!
//! Conditions are small boolean expressions over references and literals:
//!
//! ```text
//! expr    := or
//! or      := and ('||' and)*
//! and     := not ('&&' not)*
//! not     := '!' not | cmp
//! cmp     := operand (('==' | '!=' | '<' | '<=' | '>' | '>=') operand)?
//! operand := reference | number | 'str' | "str" | true | false | null | '(' expr ')'
//! ```
//!
//! Everything is parsed once into a tree at validation time.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Nesting limit for parenthesised and negated condition expressions
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// Errors raised while parsing or resolving references
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    /// A `$.` string is malformed
    #[error("invalid reference '{input}': {message}")]
    Syntax { input: String, message: String },

    /// A condition expression is malformed
    #[error("invalid condition '{input}' at offset {offset}: {message}")]
    Condition {
        input: String,
        offset: usize,
        message: String,
    },

    /// A well-formed reference points at nothing
    #[error("cannot resolve '{reference}': {reason}")]
    Unresolved { reference: String, reason: String },
}

/// One step of a reference path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed `$.` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `$.<name>...`
    Argument {
        name: String,
        path: Vec<PathSegment>,
    },

    /// `$.steps.<step>.output...`
    Step {
        step: String,
        path: Vec<PathSegment>,
    },
}

/// Check whether a string is meant as a reference
pub fn is_reference(s: &str) -> bool {
    s.starts_with("$.") || s.starts_with("$[")
}

impl Reference {
    /// Parse a reference string
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let syntax = |message: &str| ReferenceError::Syntax {
            input: input.to_string(),
            message: message.to_string(),
        };

        let rest = input
            .strip_prefix('$')
            .ok_or_else(|| syntax("must start with '$'"))?;
        let mut segments = parse_segments(rest).map_err(|m| syntax(&m))?;

        let name = match segments.first() {
            Some(PathSegment::Key(name)) => name.clone(),
            Some(PathSegment::Index(_)) => return Err(syntax("must start with a name, not an index")),
            None => return Err(syntax("empty path")),
        };

        let is_step = name == "steps"
            && matches!(segments.get(1), Some(PathSegment::Key(_)))
            && matches!(segments.get(2), Some(PathSegment::Key(k)) if k == "output");

        if is_step {
            let path = segments.split_off(3);
            let step = match segments.swap_remove(1) {
                PathSegment::Key(step) => step,
                PathSegment::Index(_) => return Err(syntax("step name expected")),
            };
            return Ok(Reference::Step { step, path });
        }

        if name == "steps" && segments.len() > 1 {
            return Err(syntax("step references look like $.steps.<step>.output"));
        }

        let path = segments.split_off(1);
        Ok(Reference::Argument { name, path })
    }

    /// Step named by the reference, for step references
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Reference::Step { step, .. } => Some(step),
            Reference::Argument { .. } => None,
        }
    }

    /// Resolve against the invocation arguments and completed steps
    pub fn resolve(&self, scope: &Scope<'_>) -> Result<Value, ReferenceError> {
        match self {
            Reference::Argument { name, path } => {
                if let Some(value) = scope.args.get(name.as_str()) {
                    return walk(value, path, self);
                }
                match scope.outputs.get(name) {
                    Some(value) => walk(value, path, self),
                    None => Err(self.unresolved(format!(
                        "no argument or step output named '{}'",
                        name
                    ))),
                }
            }
            Reference::Step { step, path } => match scope.outputs.get(step) {
                Some(value) => walk(value, path, self),
                None => Err(self.unresolved(format!(
                    "step '{}' has no output (not run yet or skipped)",
                    step
                ))),
            },
        }
    }

    fn unresolved(&self, reason: String) -> ReferenceError {
        ReferenceError::Unresolved {
            reference: self.to_string(),
            reason,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = match self {
            Reference::Argument { name, path } => {
                write!(f, "$.{}", name)?;
                path
            }
            Reference::Step { step, path } => {
                write!(f, "$.steps.{}.output", step)?;
                path
            }
        };
        for segment in path {
            match segment {
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn parse_segments(input: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '.' => {
                let start = pos + 1;
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                if end == start {
                    return Err(format!("empty key at offset {}", pos));
                }
                segments.push(PathSegment::Key(input[start..end].to_string()));
            }
            '[' => {
                let mut digits = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    digits.push(c);
                }
                if !closed {
                    return Err(format!("unclosed '[' at offset {}", pos));
                }
                let index = digits
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("index '{}' is not a non-negative integer", digits))?;
                segments.push(PathSegment::Index(index));
            }
            other => return Err(format!("unexpected '{}' at offset {}", other, pos)),
        }
    }
    Ok(segments)
}

fn walk(root: &Value, path: &[PathSegment], reference: &Reference) -> Result<Value, ReferenceError> {
    let mut current = root;
    for (position, segment) in path.iter().enumerate() {
        let next = match segment {
            PathSegment::Key(key) => current.as_object().and_then(|m| m.get(key)),
            PathSegment::Index(index) => current.as_array().and_then(|a| a.get(*index)),
        };

        match next {
            Some(value) => current = value,
            None => {
                if matches!(segment, PathSegment::Key(k) if k == "length")
                    && position + 1 == path.len()
                {
                    let length = match current {
                        Value::Array(a) => Some(a.len()),
                        Value::String(s) => Some(s.chars().count()),
                        _ => None,
                    };
                    if let Some(length) = length {
                        return Ok(Value::from(length));
                    }
                }
                return Err(reference.unresolved(format!(
                    "path element {} not found in {}",
                    describe_segment(segment),
                    describe_value(current)
                )));
            }
        }
    }
    Ok(current.clone())
}

fn describe_segment(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Key(k) => format!("'{}'", k),
        PathSegment::Index(i) => format!("[{}]", i),
    }
}

fn describe_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(a) => format!("an array of {}", a.len()),
        Value::Object(_) => "an object".to_string(),
    }
}

/// Outputs of completed steps within one composite invocation
///
/// Entries are keyed by step id; `outputAs` names are aliases. The table
/// only grows while the invocation runs and is dropped afterwards.
#[derive(Debug, Clone, Default)]
pub struct OutputTable {
    values: HashMap<String, Value>,
    aliases: HashMap<String, String>,
}

impl OutputTable {
    /// Create a table that understands the given `outputAs -> step id` aliases
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self {
            values: HashMap::new(),
            aliases,
        }
    }

    pub fn insert(&mut self, step_id: impl Into<String>, value: Value) {
        self.values.insert(step_id.into(), value);
    }

    /// Look up by step id or `outputAs` name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| {
            self.aliases
                .get(name)
                .and_then(|id| self.values.get(id))
        })
    }
}

/// What references are resolved against
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub args: &'a Value,
    pub outputs: &'a OutputTable,
}

/// Step arguments with references pre-parsed
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentTemplate {
    Literal(Value),
    Reference(Reference),
    Array(Vec<ArgumentTemplate>),
    Object(Vec<(String, ArgumentTemplate)>),
}

impl ArgumentTemplate {
    /// Parse every `$.` string inside `value`
    pub fn compile(value: &Value) -> Result<Self, ReferenceError> {
        Ok(match value {
            Value::String(s) if is_reference(s) => ArgumentTemplate::Reference(Reference::parse(s)?),
            Value::Array(items) => {
                let compiled = items
                    .iter()
                    .map(Self::compile)
                    .collect::<Result<Vec<_>, _>>()?;
                if compiled.iter().all(|t| matches!(t, ArgumentTemplate::Literal(_))) {
                    ArgumentTemplate::Literal(value.clone())
                } else {
                    ArgumentTemplate::Array(compiled)
                }
            }
            Value::Object(map) => {
                let compiled = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::compile(v)?)))
                    .collect::<Result<Vec<_>, ReferenceError>>()?;
                if compiled.iter().all(|(_, t)| matches!(t, ArgumentTemplate::Literal(_))) {
                    ArgumentTemplate::Literal(value.clone())
                } else {
                    ArgumentTemplate::Object(compiled)
                }
            }
            other => ArgumentTemplate::Literal(other.clone()),
        })
    }

    /// All references, depth first
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            ArgumentTemplate::Literal(_) => {}
            ArgumentTemplate::Reference(r) => found.push(r),
            ArgumentTemplate::Array(items) => items.iter().for_each(|t| t.collect_references(found)),
            ArgumentTemplate::Object(fields) => {
                fields.iter().for_each(|(_, t)| t.collect_references(found))
            }
        }
    }

    /// Produce concrete arguments
    pub fn render(&self, scope: &Scope<'_>) -> Result<Value, ReferenceError> {
        match self {
            ArgumentTemplate::Literal(value) => Ok(value.clone()),
            ArgumentTemplate::Reference(reference) => reference.resolve(scope),
            ArgumentTemplate::Array(items) => items
                .iter()
                .map(|t| t.render(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            ArgumentTemplate::Object(fields) => {
                let mut map = Map::new();
                for (key, template) in fields {
                    map.insert(key.clone(), template.render(scope)?);
                }
                Ok(Value::Object(map))
            }
        }
    }
}

/// Truthiness used by conditions
///
/// `null`, `false`, `0`, `""`, `[]` and `{}` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply(&self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering;

        let ordering = match (left, right) {
            (Value::Number(a), Value::Number(b)) => {
                a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        };

        match self {
            CompareOp::Eq => ordering.map_or_else(|| left == right, |o| o == Ordering::Equal),
            CompareOp::Ne => ordering.map_or_else(|| left != right, |o| o != Ordering::Equal),
            CompareOp::Lt => ordering == Some(Ordering::Less),
            CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Gt => ordering == Some(Ordering::Greater),
            CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

/// A parsed step condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Literal(Value),
    Reference(Reference),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Compare(CompareOp, Box<Condition>, Box<Condition>),
}

impl Condition {
    /// Parse a condition expression
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            input,
            tokens,
            position: 0,
            depth: 0,
        };
        let condition = parser.expression()?;
        if let Some((_, offset)) = parser.tokens.get(parser.position) {
            return Err(parser.error_at(*offset, "unexpected trailing input"));
        }
        Ok(condition)
    }

    /// All references in evaluation order
    pub fn references(&self) -> Vec<&Reference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a Reference>) {
        match self {
            Condition::Literal(_) => {}
            Condition::Reference(r) => found.push(r),
            Condition::Not(inner) => inner.collect_references(found),
            Condition::And(l, r) | Condition::Or(l, r) | Condition::Compare(_, l, r) => {
                l.collect_references(found);
                r.collect_references(found);
            }
        }
    }

    /// Evaluate to a boolean
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<bool, ReferenceError> {
        Ok(is_truthy(&self.value(scope)?))
    }

    fn value(&self, scope: &Scope<'_>) -> Result<Value, ReferenceError> {
        Ok(match self {
            Condition::Literal(value) => value.clone(),
            Condition::Reference(reference) => reference.resolve(scope)?,
            Condition::Not(inner) => Value::Bool(!inner.evaluate(scope)?),
            Condition::And(left, right) => {
                Value::Bool(left.evaluate(scope)? && right.evaluate(scope)?)
            }
            Condition::Or(left, right) => {
                Value::Bool(left.evaluate(scope)? || right.evaluate(scope)?)
            }
            Condition::Compare(op, left, right) => {
                Value::Bool(op.apply(&left.value(scope)?, &right.value(scope)?))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Reference(Reference),
    Literal(Value),
    And,
    Or,
    Not,
    Compare(CompareOp),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ReferenceError> {
    let error = |offset: usize, message: String| ReferenceError::Condition {
        input: input.to_string(),
        offset,
        message,
    };

    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, offset));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, offset));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((Token::And, offset));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((Token::Or, offset));
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push((Token::Compare(CompareOp::Eq), offset));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push((Token::Compare(CompareOp::Ne), offset));
                i += 2;
            }
            '!' => {
                tokens.push((Token::Not, offset));
                i += 1;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CompareOp::Le,
                    ('<', false) => CompareOp::Lt,
                    (_, true) => CompareOp::Ge,
                    (_, false) => CompareOp::Gt,
                };
                tokens.push((Token::Compare(op), offset));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '$' => {
                let start = i;
                while i < chars.len() {
                    let c = chars[i].1;
                    if is_ident_char(c) || matches!(c, '$' | '.' | '[' | ']') {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let end = chars.get(i).map(|&(o, _)| o).unwrap_or(input.len());
                let text = &input[chars[start].0..end];
                let reference = Reference::parse(text).map_err(|e| error(offset, e.to_string()))?;
                tokens.push((Token::Reference(reference), offset));
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                let mut closed = false;
                i += 1;
                while i < chars.len() {
                    let c = chars[i].1;
                    i += 1;
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        let escaped = chars.get(i).map(|&(_, c)| c);
                        i += 1;
                        match escaped {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => break,
                        }
                    } else {
                        text.push(c);
                    }
                }
                if !closed {
                    return Err(error(offset, "unterminated string".to_string()));
                }
                tokens.push((Token::Literal(Value::String(text)), offset));
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let end = chars.get(i).map(|&(o, _)| o).unwrap_or(input.len());
                let text = &input[chars[start].0..end];
                let number = text
                    .parse::<serde_json::Number>()
                    .map_err(|_| error(offset, format!("invalid number '{}'", text)))?;
                tokens.push((Token::Literal(Value::Number(number)), offset));
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].1.is_ascii_alphanumeric() {
                    i += 1;
                }
                let end = chars.get(i).map(|&(o, _)| o).unwrap_or(input.len());
                let word = &input[chars[start].0..end];
                let literal = match word {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    other => {
                        return Err(error(
                            offset,
                            format!(
                                "unexpected word '{}'; quote strings and prefix references with '$.'",
                                other
                            ),
                        ));
                    }
                };
                tokens.push((Token::Literal(literal), offset));
            }
            other => return Err(error(offset, format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(Token, usize)>,
    position: usize,
    depth: usize,
}

impl Parser<'_> {
    fn error_at(&self, offset: usize, message: impl Into<String>) -> ReferenceError {
        ReferenceError::Condition {
            input: self.input.to_string(),
            offset,
            message: message.into(),
        }
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|(_, o)| *o)
            .unwrap_or(self.input.len())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|(t, _)| t.clone());
        self.position += 1;
        token
    }

    fn enter(&mut self) -> Result<(), ReferenceError> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            return Err(self.error_at(self.current_offset(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Condition, ReferenceError> {
        self.enter()?;
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        self.depth -= 1;
        Ok(left)
    }

    fn and(&mut self) -> Result<Condition, ReferenceError> {
        let mut left = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Condition, ReferenceError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            self.enter()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Condition, ReferenceError> {
        let left = self.operand()?;
        if let Some(Token::Compare(op)) = self.peek().cloned() {
            self.advance();
            let right = self.operand()?;
            return Ok(Condition::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn operand(&mut self) -> Result<Condition, ReferenceError> {
        let offset = self.current_offset();
        match self.advance() {
            Some(Token::Reference(r)) => Ok(Condition::Reference(r)),
            Some(Token::Literal(v)) => Ok(Condition::Literal(v)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error_at(offset, "unclosed '('")),
                }
            }
            Some(other) => Err(self.error_at(offset, format!("unexpected {:?}", other))),
            None => Err(self.error_at(offset, "unexpected end of expression")),
        }
    }
}
