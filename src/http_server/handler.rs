//! # Route Dispatcher
//!
//! A single fallback handler serves every declared route: it looks the request
//! up in the [`RouteTable`], extracts parameters, and hands the route's
//! statements to the executor under the caller's identity.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::{header, Method, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use super::errors::{ApiError, ApiResult};
use crate::auth::{AuthError, CallerIdentity, CredentialChecker, Credentials};
use crate::query::{classify, QueryExecutor, RequestParams, ResponseKind};
use crate::routes::RouteTable;

/// Shared server state
pub struct AppState {
    pub routes: RouteTable,
    pub executor: Arc<QueryExecutor>,
    /// Present when Basic authentication is enabled
    pub credentials: Option<CredentialChecker>,
}

impl AppState {
    pub fn new(
        routes: RouteTable,
        executor: Arc<QueryExecutor>,
        credentials: Option<CredentialChecker>,
    ) -> Self {
        Self {
            routes,
            executor,
            credentials,
        }
    }
}

/// Resolve the caller identity and attach it to the request
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let identity = match &state.credentials {
        None => CallerIdentity::anonymous(),
        Some(checker) => {
            let header = request
                .headers()
                .get(header::AUTHORIZATION)
                .ok_or(AuthError::MissingCredentials)?
                .to_str()
                .map_err(|_| AuthError::MalformedHeader)?;
            let credentials = Credentials::from_header(header)?;
            let identity = checker.check(&credentials).await.map_err(|err| {
                if !err.is_client_error() {
                    error!(error = %err, "Credential check failed");
                }
                err
            })?;
            CallerIdentity(identity)
        }
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Serve a declared route
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    identity: Option<Extension<CallerIdentity>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult<Response> {
    let path = uri.path();
    let Some(found) = state.routes.lookup(&method, path) else {
        if state.routes.matches_path(path) {
            return Err(ApiError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        return Err(ApiError::NotFound(path.to_string()));
    };

    let raw = RequestParams {
        path: found.path_params,
        query: query
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect(),
        body: parse_body(&body)?,
    };
    let ctx = classify(&raw, &found.spec);
    let identity = identity.map(|Extension(identity)| identity).unwrap_or_default();

    let rows = state
        .executor
        .execute(identity.as_str(), found.spec.statements(), &ctx)
        .await
        .map_err(|err| {
            if err.class().is_client_error() {
                warn!(request_id = %ctx.request_id, route = %found.pattern, class = %err.class(), error = %err, "Route failed");
            } else {
                error!(request_id = %ctx.request_id, route = %found.pattern, error = %err, "Route failed");
            }
            err
        })?;

    let response = match found.spec.response() {
        ResponseKind::Rows => Json(rows).into_response(),
        ResponseKind::Acknowledge => Json(json!({ "message": "OK" })).into_response(),
    };
    Ok(response)
}

/// An empty body is absent; anything else must be a JSON object
fn parse_body(body: &[u8]) -> ApiResult<Option<Map<String, Value>>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err(ApiError::InvalidBody("expected a JSON object".to_string())),
        Err(err) => Err(ApiError::InvalidBody(err.to_string())),
    }
}

/// Liveness probe
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
