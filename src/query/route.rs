//! # Route Query Specification
//!
//! The compiled, immutable description of what a route runs. Built once at
//! load time and shared between requests behind an `Arc`.

use serde::Serialize;

use super::errors::ConfigError;
use super::params::{BodyDescriptor, ParameterDescriptor};
use super::template::Template;

/// One declared statement, compiled
#[derive(Debug, Clone)]
pub struct StatementTemplate {
    /// Diagnostic name used in logs and error messages
    pub name: String,
    pub template: Template,
}

impl StatementTemplate {
    /// Compile raw statement text
    pub fn compile(name: impl Into<String>, raw: &str) -> Result<Self, ConfigError> {
        let name = name.into();
        let template = Template::compile(raw).map_err(|source| ConfigError::InvalidTemplate {
            statement: name.clone(),
            source,
        })?;
        Ok(Self { name, template })
    }
}

/// What a successful request answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// The final statement's rows as a JSON array
    #[default]
    Rows,
    /// `{"message": "OK"}`
    Acknowledge,
}

/// A route's statements and parameter metadata
#[derive(Debug, Clone)]
pub struct RouteQuerySpec {
    statements: Vec<StatementTemplate>,
    params: Vec<ParameterDescriptor>,
    body: BodyDescriptor,
    response: ResponseKind,
}

impl RouteQuerySpec {
    /// Assemble a route; `route` names it in the error if no statements are given
    pub fn new(
        route: &str,
        statements: Vec<StatementTemplate>,
        params: Vec<ParameterDescriptor>,
        body: BodyDescriptor,
    ) -> Result<Self, ConfigError> {
        if statements.is_empty() {
            return Err(ConfigError::EmptyRoute(route.to_string()));
        }
        Ok(Self {
            statements,
            params,
            body,
            response: ResponseKind::Rows,
        })
    }

    /// Set the response kind
    pub fn with_response(mut self, response: ResponseKind) -> Self {
        self.response = response;
        self
    }

    /// Statements in execution order; never empty
    pub fn statements(&self) -> &[StatementTemplate] {
        &self.statements
    }

    pub fn params(&self) -> &[ParameterDescriptor] {
        &self.params
    }

    pub fn body(&self) -> BodyDescriptor {
        self.body
    }

    pub fn response(&self) -> ResponseKind {
        self.response
    }
}
