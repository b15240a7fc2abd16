//! # Statement Template Compiler
//!
//! Compiles declared statement text into a reusable [`Template`].
//!
//! The template language only covers what bound parameters cannot express,
//! namely identifiers spliced into the statement text:
//!
//! - `{{ table }}` / `{{ body.name }}` substitutes a scalar template param
//!   (a leading `.` is accepted, so `{{.table}}` works too)
//! - `{{#each columns}} ... {{/each}}` repeats its body for every entry of an
//!   object param, in key order, joined with `", "`; `{{@key}}` and
//!   `{{@value}}` name the current entry
//!
//! Anything outside `{{ }}` is copied through untouched, including the
//! `:name` bound placeholders handled by [`super::binding`].

use serde_json::{Map, Value};
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const EACH_SEPARATOR: &str = ", ";

/// Template syntax errors, reported at load time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Unterminated tag starting at byte {0}")]
    Unterminated(usize),

    #[error("Empty tag at byte {0}")]
    EmptyTag(usize),

    #[error("Unknown directive '{0}'")]
    UnknownDirective(String),

    #[error("Malformed parameter path '{0}'")]
    MalformedPath(String),

    #[error("'{{{{/each}}}}' at byte {0} has no matching '{{{{#each}}}}'")]
    UnmatchedClose(usize),

    #[error("'{{{{#each {0}}}}}' is never closed")]
    UnclosedBlock(String),

    #[error("'{0}' used outside of an '{{{{#each}}}}' block")]
    OutsideBlock(String),
}

/// Failures while rendering a compiled template against request params
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Missing template parameter '{0}'")]
    Missing(String),

    #[error("Template parameter '{0}' is null")]
    Null(String),

    #[error("Template parameter '{0}' must be a string, number or boolean")]
    NotScalar(String),

    #[error("Template parameter '{0}' must be an object to iterate")]
    NotAnObject(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Param(Vec<String>),
    EntryKey,
    EntryValue,
    Each { path: Vec<String>, body: Vec<Node> },
}

/// A compiled statement template
///
/// Immutable once compiled; shared across requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

/// Entry currently bound by the innermost `#each`
#[derive(Clone, Copy)]
struct Entry<'a> {
    key: &'a str,
    value: &'a Value,
}

impl Template {
    /// Compile raw template text
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        // Open blocks: the iterated path plus the nodes collected before it
        let mut open: Vec<(Vec<String>, Vec<Node>)> = Vec::new();
        let mut current: Vec<Node> = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                current.push(Node::Text(rest[..start].to_string()));
            }
            let tag_start = offset + start;
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or(CompileError::Unterminated(tag_start))?;
            let tag = after_open[..end].trim();

            if tag.is_empty() {
                return Err(CompileError::EmptyTag(tag_start));
            } else if let Some(directive) = tag.strip_prefix('#') {
                let mut words = directive.split_whitespace();
                match (words.next(), words.next(), words.next()) {
                    (Some("each"), Some(path), None) => {
                        open.push((parse_path(path)?, std::mem::take(&mut current)));
                    }
                    _ => return Err(CompileError::UnknownDirective(tag.to_string())),
                }
            } else if let Some(directive) = tag.strip_prefix('/') {
                if directive.trim() != "each" {
                    return Err(CompileError::UnknownDirective(tag.to_string()));
                }
                let (path, parent) = open.pop().ok_or(CompileError::UnmatchedClose(tag_start))?;
                let body = std::mem::replace(&mut current, parent);
                current.push(Node::Each { path, body });
            } else if tag == "@key" || tag == "@value" {
                if open.is_empty() {
                    return Err(CompileError::OutsideBlock(tag.to_string()));
                }
                current.push(if tag == "@key" {
                    Node::EntryKey
                } else {
                    Node::EntryValue
                });
            } else if tag.starts_with('@') {
                return Err(CompileError::UnknownDirective(tag.to_string()));
            } else {
                current.push(Node::Param(parse_path(tag)?));
            }

            let consumed = start + OPEN.len() + end + CLOSE.len();
            rest = &rest[consumed..];
            offset += consumed;
        }

        if let Some((path, _)) = open.pop() {
            return Err(CompileError::UnclosedBlock(path.join(".")));
        }
        if !rest.is_empty() {
            current.push(Node::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            nodes: current,
        })
    }

    /// The text this template was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render into literal statement text
    ///
    /// Values must already have passed the sanitizer; rendering does no
    /// escaping of its own.
    pub fn render(&self, params: &Map<String, Value>) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.source.len());
        render_nodes(&self.nodes, params, None, &mut out)?;
        Ok(out)
    }
}

fn parse_path(raw: &str) -> Result<Vec<String>, CompileError> {
    let trimmed = raw.strip_prefix('.').unwrap_or(raw);
    let segments: Vec<String> = trimmed.split('.').map(str::to_string).collect();
    let valid = segments.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    });
    if valid {
        Ok(segments)
    } else {
        Err(CompileError::MalformedPath(raw.to_string()))
    }
}

fn lookup<'a>(params: &'a Map<String, Value>, path: &[String]) -> Result<&'a Value, RenderError> {
    let missing = || RenderError::Missing(path.join("."));
    let (first, rest) = path.split_first().ok_or_else(missing)?;
    let mut value = params.get(first).ok_or_else(missing)?;
    for segment in rest {
        value = value
            .as_object()
            .and_then(|object| object.get(segment))
            .ok_or_else(missing)?;
    }
    Ok(value)
}

fn push_scalar(out: &mut String, value: &Value, name: &str) -> Result<(), RenderError> {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => return Err(RenderError::Null(name.to_string())),
        Value::Array(_) | Value::Object(_) => {
            return Err(RenderError::NotScalar(name.to_string()))
        }
    }
    Ok(())
}

fn render_nodes(
    nodes: &[Node],
    params: &Map<String, Value>,
    entry: Option<Entry<'_>>,
    out: &mut String,
) -> Result<(), RenderError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Param(path) => push_scalar(out, lookup(params, path)?, &path.join("."))?,
            // Compilation guarantees an enclosing block for both entry nodes
            Node::EntryKey => {
                if let Some(entry) = entry {
                    out.push_str(entry.key);
                }
            }
            Node::EntryValue => {
                if let Some(entry) = entry {
                    push_scalar(out, entry.value, entry.key)?;
                }
            }
            Node::Each { path, body } => {
                let object = lookup(params, path)?
                    .as_object()
                    .ok_or_else(|| RenderError::NotAnObject(path.join(".")))?;
                for (i, (key, value)) in object.iter().enumerate() {
                    if i > 0 {
                        out.push_str(EACH_SEPARATOR);
                    }
                    render_nodes(body, params, Some(Entry { key, value }), out)?;
                }
            }
        }
    }
    Ok(())
}
