//! # Parameter Classification
//!
//! Splits request-supplied values into the two sets the engine consumes:
//!
//! - **bound params** reach the database through driver binding and may hold
//!   anything
//! - **template params** are spliced into statement text, so only parameters
//!   whose descriptor allows it end up there (and the sanitizer checks them
//!   before rendering)

use serde::Serialize;
use serde_json::{Map, Value};

use super::context::ExecutionContext;
use super::errors::ConfigError;
use super::route::RouteQuerySpec;

/// Template key the request body is exposed under
pub const BODY_TEMPLATE_KEY: &str = "body";

/// Where a declared parameter is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
}

/// A declared route parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub location: ParamLocation,
    /// Whether the value may be spliced into statement text
    pub template_allowed: bool,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, location: ParamLocation, template_allowed: bool) -> Self {
        Self {
            name: name.into(),
            location,
            template_allowed,
        }
    }
}

/// Parser for the template-allowed flag of a declaration
pub struct TemplateFlag;

impl TemplateFlag {
    /// Accepts booleans and case-insensitive `"true"` / `"false"` strings
    ///
    /// `param` only names the declaration in the error.
    pub fn parse(param: &str, value: &Value) -> Result<bool, ConfigError> {
        match value {
            Value::Bool(flag) => Ok(*flag),
            Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(ConfigError::InvalidTemplateFlag {
                param: param.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// How the request body is exposed to templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyDescriptor {
    /// Not exposed
    #[default]
    Hidden,
    /// The whole body object
    Full,
    /// The body's keys, every value replaced by null
    Keys,
}

/// Raw values extracted from an HTTP request
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub path: Map<String, Value>,
    pub query: Map<String, Value>,
    pub body: Option<Map<String, Value>>,
}

impl RequestParams {
    fn lookup(&self, descriptor: &ParameterDescriptor) -> Option<&Value> {
        match descriptor.location {
            ParamLocation::Path => self.path.get(&descriptor.name),
            ParamLocation::Query => self.query.get(&descriptor.name),
            ParamLocation::Body => self.body.as_ref()?.get(&descriptor.name),
        }
    }
}

/// Build the execution context for one request
pub fn classify(raw: &RequestParams, spec: &RouteQuerySpec) -> ExecutionContext {
    let mut template_params = Map::new();
    let mut bound_params = raw.body.clone().unwrap_or_default();

    for descriptor in spec.params() {
        let value = raw.lookup(descriptor).cloned().unwrap_or(Value::Null);
        if descriptor.template_allowed {
            template_params.insert(descriptor.name.clone(), value.clone());
        }
        bound_params.insert(descriptor.name.clone(), value);
    }

    if let Some(body) = &raw.body {
        match spec.body() {
            BodyDescriptor::Hidden => {}
            BodyDescriptor::Full => {
                template_params.insert(BODY_TEMPLATE_KEY.to_string(), Value::Object(body.clone()));
            }
            BodyDescriptor::Keys => {
                let keys = body.keys().map(|key| (key.clone(), Value::Null)).collect();
                template_params.insert(BODY_TEMPLATE_KEY.to_string(), Value::Object(keys));
            }
        }
    }

    ExecutionContext::new(template_params, bound_params)
}
