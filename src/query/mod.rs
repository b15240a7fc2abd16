//! # Query Execution Engine
//!
//! Turns a compiled route, a caller identity and request parameters into the
//! rows of the route's final statement.
//!
//! ```text
//! RequestParams ─► params::classify ─► ExecutionContext
//!                                           │
//!                  sanitizer ◄── executor ◄─┘
//!                  template  ◄──    │
//!                  binding   ◄──    ▼
//!                             TransactionSource ─► rows / QueryError
//! ```
//!
//! # Safety
//!
//! Only template params are spliced into statement text, and only after every
//! key and string in them has matched the identifier grammar. Everything else
//! reaches the database through driver binding.

pub mod backend;
pub mod binding;
pub mod classifier;
pub mod context;
pub mod errors;
pub mod executor;
pub mod params;
pub mod postgres;
pub mod route;
pub mod sanitizer;
pub mod sqlite;
pub mod template;

use std::sync::Arc;

use serde_json::{Map, Value};

pub use backend::{
    BackendError, BackendErrorKind, BackendKind, BackendResult, PoolSettings, QueryTransaction,
    TransactionSource,
};
pub use classifier::{classifier_for, ErrorClassifier, PostgresErrorClassifier, SqliteErrorClassifier};
pub use context::ExecutionContext;
pub use errors::{ConfigError, ErrorClass, QueryError, QueryResult};
pub use executor::{ExecutorOptions, QueryExecutor, DEFAULT_ANONYMOUS_ROLE};
pub use params::{
    classify, BodyDescriptor, ParamLocation, ParameterDescriptor, RequestParams, TemplateFlag,
};
pub use route::{ResponseKind, RouteQuerySpec, StatementTemplate};
pub use template::Template;

/// One result row: column name to value
pub type Row = Map<String, Value>;

/// Open a pool for `kind`
pub async fn connect(
    kind: BackendKind,
    url: &str,
    settings: PoolSettings,
) -> BackendResult<Arc<dyn TransactionSource>> {
    let source: Arc<dyn TransactionSource> = match kind {
        BackendKind::Postgres => Arc::new(postgres::PostgresSource::connect(url, settings).await?),
        BackendKind::Sqlite => Arc::new(sqlite::SqliteSource::connect(url, settings).await?),
    };
    Ok(source)
}
