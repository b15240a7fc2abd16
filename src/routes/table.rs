//! # Route Table
//!
//! Immutable `(method, path pattern) → RouteQuerySpec` mapping built once at
//! startup. Patterns are `/`-separated; a `{name}` segment captures one path
//! segment. When several patterns match, the one whose first differing segment
//! is literal wins, so `/_roles/{username}` never shadows a literal sibling.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use serde_json::{Map, Value};

use super::errors::{RouteError, RouteResult};
use crate::query::RouteQuerySpec;

/// A declared route before it is placed in a table
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub method: Method,
    pub pattern: String,
    pub spec: RouteQuerySpec,
}

impl RouteEntry {
    pub fn new(method: Method, pattern: impl Into<String>, spec: RouteQuerySpec) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            spec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug)]
struct Route {
    pattern: String,
    segments: Vec<Segment>,
    spec: Arc<RouteQuerySpec>,
}

impl Route {
    /// Captured params if `path` matches
    fn capture(&self, path: &[&str]) -> Option<Map<String, Value>> {
        if path.len() != self.segments.len() {
            return None;
        }
        let mut params = Map::new();
        for (segment, part) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), Value::String(part.to_string()));
                }
            }
        }
        Some(params)
    }

    fn specificity(&self) -> Vec<bool> {
        self.segments
            .iter()
            .map(|segment| matches!(segment, Segment::Literal(_)))
            .collect()
    }
}

/// A successful lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub pattern: String,
    pub spec: Arc<RouteQuerySpec>,
    /// Captured path params, as strings
    pub path_params: Map<String, Value>,
}

/// Routes grouped by method
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<Method, Vec<Route>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from entries, rejecting duplicates
    pub fn from_entries(entries: impl IntoIterator<Item = RouteEntry>) -> RouteResult<Self> {
        let mut table = Self::new();
        for entry in entries {
            table.insert(entry.method, &entry.pattern, entry.spec)?;
        }
        Ok(table)
    }

    /// Add a route
    pub fn insert(&mut self, method: Method, pattern: &str, spec: RouteQuerySpec) -> RouteResult<()> {
        let segments = parse_pattern(pattern)?;
        let routes = self.routes.entry(method.clone()).or_default();
        if routes.iter().any(|route| route.segments == segments) {
            return Err(RouteError::Duplicate {
                method: method.to_string(),
                pattern: pattern.to_string(),
            });
        }
        routes.push(Route {
            pattern: pattern.to_string(),
            segments,
            spec: Arc::new(spec),
        });
        Ok(())
    }

    /// Find the route for a request
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let parts = split_path(path);
        self.routes
            .get(method)?
            .iter()
            .filter_map(|route| route.capture(&parts).map(|params| (route, params)))
            .max_by_key(|(route, _)| route.specificity())
            .map(|(route, path_params)| RouteMatch {
                pattern: route.pattern.clone(),
                spec: route.spec.clone(),
                path_params,
            })
    }

    /// Whether any method serves `path`
    pub fn matches_path(&self, path: &str) -> bool {
        let parts = split_path(path);
        self.routes
            .values()
            .flatten()
            .any(|route| route.capture(&parts).is_some())
    }

    /// `(method, pattern)` of every route, sorted
    pub fn summary(&self) -> Vec<(String, String)> {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .flat_map(|(method, routes)| {
                routes
                    .iter()
                    .map(move |route| (method.to_string(), route.pattern.clone()))
            })
            .collect();
        routes.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Path segments; empty segments (leading, trailing, doubled `/`) are ignored
fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

fn parse_pattern(pattern: &str) -> RouteResult<Vec<Segment>> {
    if !pattern.starts_with('/') {
        return Err(RouteError::InvalidPattern(pattern.to_string()));
    }
    split_path(pattern)
        .into_iter()
        .map(|part| {
            match part.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
                Some(name) if crate::query::sanitizer::is_identifier(name) => {
                    Ok(Segment::Param(name.to_string()))
                }
                Some(_) => Err(RouteError::InvalidPattern(pattern.to_string())),
                None if part.contains('{') || part.contains('}') => {
                    Err(RouteError::InvalidPattern(pattern.to_string()))
                }
                None => Ok(Segment::Literal(part.to_string())),
            }
        })
        .collect()
}
