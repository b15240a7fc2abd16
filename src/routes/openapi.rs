//! # OpenAPI Route Loader
//!
//! Reads route declarations from an OpenAPI document. An operation becomes a
//! route when it carries an `x-grest` extension:
//!
//! ```yaml
//! paths:
//!   /things/{table}:
//!     get:
//!       parameters:
//!         - name: table
//!           in: path
//!           x-grest-template-allowed: true
//!       x-grest:
//!         queries:
//!           - sql: SELECT * FROM {{table}}
//! ```
//!
//! Operations without the extension are ignored. Any other defect fails the
//! whole document.

use std::path::Path;

use axum::http::Method;
use serde_json::{Map, Value};
use tracing::debug;

use super::errors::{RouteError, RouteResult};
use super::table::RouteEntry;
use crate::query::{
    BodyDescriptor, ParamLocation, ParameterDescriptor, RouteQuerySpec, StatementTemplate,
    TemplateFlag,
};

/// Operation extension holding the statements
pub const EXTENSION: &str = "x-grest";

/// Parameter and request-body extension allowing template expansion
pub const TEMPLATE_ALLOWED: &str = "x-grest-template-allowed";

const METHODS: [&str; 7] = ["get", "put", "post", "delete", "patch", "head", "options"];

/// Load routes from a `.json`, `.yml` or `.yaml` file
pub fn load_file(path: impl AsRef<Path>) -> RouteResult<Vec<RouteEntry>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| RouteError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let document: Value = if is_json {
        serde_json::from_str(&text)?
    } else {
        serde_yaml::from_str(&text)?
    };
    from_document(&document)
}

/// Load routes from YAML (or JSON, which YAML accepts) text
pub fn parse_str(text: &str) -> RouteResult<Vec<RouteEntry>> {
    let document: Value = serde_yaml::from_str(text)?;
    from_document(&document)
}

/// Compile every `x-grest` operation of a parsed document
pub fn from_document(document: &Value) -> RouteResult<Vec<RouteEntry>> {
    let Some(paths) = document.get("paths") else {
        return Ok(Vec::new());
    };
    let paths = paths
        .as_object()
        .ok_or_else(|| RouteError::malformed("paths", "must be an object"))?;

    let mut entries = Vec::new();
    for (pattern, item) in paths {
        let item = item
            .as_object()
            .ok_or_else(|| RouteError::malformed(pattern.as_str(), "path item must be an object"))?;
        let shared = parse_parameters(pattern, item.get("parameters"))?;

        for method in METHODS {
            let Some(operation) = item.get(method) else {
                continue;
            };
            let location = format!("{} {}", method.to_uppercase(), pattern);
            let operation = operation
                .as_object()
                .ok_or_else(|| RouteError::malformed(&location, "operation must be an object"))?;

            let Some(extension) = operation.get(EXTENSION) else {
                debug!(route = %location, "Skipping operation without {}", EXTENSION);
                continue;
            };

            let spec = compile_operation(&location, &shared, operation, extension)?;
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|_| RouteError::malformed(&location, "unsupported method"))?;
            entries.push(RouteEntry::new(method, pattern.clone(), spec));
        }
    }
    Ok(entries)
}

fn compile_operation(
    location: &str,
    shared: &[ParameterDescriptor],
    operation: &Map<String, Value>,
    extension: &Value,
) -> RouteResult<RouteQuerySpec> {
    let queries = extension
        .get("queries")
        .and_then(Value::as_array)
        .ok_or_else(|| RouteError::malformed(location, "x-grest.queries must be a list"))?;

    let statements = queries
        .iter()
        .enumerate()
        .map(|(index, query)| {
            let sql = query
                .get("sql")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    RouteError::malformed(location, format!("query {} has no sql", index))
                })?;
            let name = query
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} {}", location, index));
            Ok(StatementTemplate::compile(name, sql)?)
        })
        .collect::<RouteResult<Vec<_>>>()?;

    // operation parameters override path-level ones with the same name and location
    let mut params = parse_parameters(location, operation.get("parameters"))?;
    for inherited in shared {
        if !params
            .iter()
            .any(|p| p.name == inherited.name && p.location == inherited.location)
        {
            params.push(inherited.clone());
        }
    }

    let expose_body = match operation.get("requestBody").and_then(|b| b.get(TEMPLATE_ALLOWED)) {
        Some(flag) => TemplateFlag::parse("requestBody", flag)?,
        None => false,
    };
    let body = if expose_body {
        BodyDescriptor::Full
    } else {
        BodyDescriptor::Hidden
    };

    Ok(RouteQuerySpec::new(location, statements, params, body)?)
}

fn parse_parameters(location: &str, raw: Option<&Value>) -> RouteResult<Vec<ParameterDescriptor>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let list = raw
        .as_array()
        .ok_or_else(|| RouteError::malformed(location, "parameters must be a list"))?;

    let mut params = Vec::with_capacity(list.len());
    for param in list {
        let name = param
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RouteError::malformed(location, "parameter without a name"))?;
        let place = param.get("in").and_then(Value::as_str).unwrap_or("query");
        let location_kind = match place {
            "path" => ParamLocation::Path,
            "query" => ParamLocation::Query,
            // headers and cookies never reach statements
            "header" | "cookie" => continue,
            other => {
                return Err(RouteError::malformed(
                    location,
                    format!("parameter '{}' has unknown location '{}'", name, other),
                ))
            }
        };
        let template_allowed = match param.get(TEMPLATE_ALLOWED) {
            Some(flag) => TemplateFlag::parse(name, flag)?,
            None => false,
        };
        params.push(ParameterDescriptor::new(name, location_kind, template_allowed));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
openapi: 3.0.0
info:
  title: things
  version: "1"
paths:
  /things/{table}:
    parameters:
      - name: table
        in: path
        x-grest-template-allowed: "TRUE"
    get:
      parameters:
        - name: limit
          in: query
      x-grest:
        queries:
          - sql: SELECT * FROM {{table}} LIMIT :limit
    put:
      requestBody:
        x-grest-template-allowed: true
      x-grest:
        queries:
          - name: create
            sql: CREATE TABLE {{table}} ({{#each body}}{{@key}} {{@value}}{{/each}})
          - sql: SELECT 1
  /health:
    get:
      summary: served elsewhere
"#;

    #[test]
    fn test_document_compiles() {
        let entries = parse_str(DOCUMENT).unwrap();
        assert_eq!(entries.len(), 2);

        let get = entries.iter().find(|e| e.method == Method::GET).unwrap();
        assert_eq!(get.pattern, "/things/{table}");
        assert_eq!(get.spec.statements()[0].name, "GET /things/{table} 0");
        assert_eq!(get.spec.body(), BodyDescriptor::Hidden);
        let table = get.spec.params().iter().find(|p| p.name == "table").unwrap();
        assert!(table.template_allowed);
        assert_eq!(table.location, ParamLocation::Path);
        let limit = get.spec.params().iter().find(|p| p.name == "limit").unwrap();
        assert!(!limit.template_allowed);

        let put = entries.iter().find(|e| e.method == Method::PUT).unwrap();
        assert_eq!(put.spec.statements().len(), 2);
        assert_eq!(put.spec.statements()[0].name, "create");
        assert_eq!(put.spec.statements()[1].name, "PUT /things/{table} 1");
        assert_eq!(put.spec.body(), BodyDescriptor::Full);
    }

    #[test]
    fn test_operation_param_overrides_path_param() {
        let doc = r#"
paths:
  /t/{table}:
    parameters:
      - name: table
        in: path
        x-grest-template-allowed: true
    get:
      parameters:
        - name: table
          in: path
          x-grest-template-allowed: false
      x-grest:
        queries:
          - sql: SELECT :table
"#;
        let entries = parse_str(doc).unwrap();
        let params = entries[0].spec.params();
        assert_eq!(params.len(), 1);
        assert!(!params[0].template_allowed);
    }

    #[test]
    fn test_invalid_flag_is_fatal() {
        let doc = r#"
paths:
  /t:
    get:
      parameters:
        - name: x
          in: query
          x-grest-template-allowed: maybe
      x-grest:
        queries:
          - sql: SELECT 1
"#;
        let err = parse_str(doc).unwrap_err();
        assert!(err.to_string().contains("x-grest-template-allowed"));
    }

    #[test]
    fn test_missing_sql_is_fatal() {
        let doc = r#"
paths:
  /t:
    get:
      x-grest:
        queries:
          - name: nothing
"#;
        assert!(matches!(
            parse_str(doc).unwrap_err(),
            RouteError::Malformed { .. }
        ));
    }

    #[test]
    fn test_empty_queries_is_fatal() {
        let doc = r#"
paths:
  /t:
    get:
      x-grest:
        queries: []
"#;
        assert!(matches!(parse_str(doc).unwrap_err(), RouteError::Config(_)));
    }

    #[test]
    fn test_bad_template_is_fatal() {
        let doc = r#"
paths:
  /t:
    get:
      x-grest:
        queries:
          - sql: SELECT * FROM {{#each x}}
"#;
        assert!(matches!(parse_str(doc).unwrap_err(), RouteError::Config(_)));
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("routes.json");
        std::fs::write(
            &path,
            r#"{"paths": {"/t": {"get": {"x-grest": {"queries": [{"sql": "SELECT 1"}]}}}}}"#,
        )
        .unwrap();

        let entries = load_file(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            load_file(dir.path().join("missing.yml")),
            Err(RouteError::Io { .. })
        ));
    }
}
