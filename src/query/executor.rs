//! # Role-Scoped Transaction Executor
//!
//! Runs a route's statements for one caller:
//!
//! ```text
//! Idle → Open → RoleSet → Executing(0..n) → Committed
//!   └──────┴───────┴──────────┴──────────→ RolledBack
//! ```
//!
//! Every statement of a request runs on one transaction under the caller's
//! database identity. Only the final statement's rows are returned, and only
//! after the identity has been reset and the transaction committed. Any
//! failure rolls back; so does dropping the request future, because the open
//! transaction is dropped with it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::backend::{QueryTransaction, TransactionSource};
use super::binding::BoundStatement;
use super::classifier::{classifier_for, ErrorClassifier};
use super::context::ExecutionContext;
use super::errors::{ConfigError, QueryError, QueryResult};
use super::route::StatementTemplate;
use super::sanitizer;
use super::template::Template;
use super::Row;

/// Role used when no valid caller identity is supplied
pub const DEFAULT_ANONYMOUS_ROLE: &str = "anon";

/// Template param the role statements are rendered with
const ROLE_PARAM: &str = "role";

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Identity switch, rendered with `{{role}}`; skipped when unset
    pub impersonate_statement: Option<String>,
    /// Identity restore; skipped when unset
    pub reset_statement: Option<String>,
    pub anonymous_role: String,
    /// Deadline for a whole request, transaction included
    pub request_timeout: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            impersonate_statement: None,
            reset_statement: None,
            anonymous_role: DEFAULT_ANONYMOUS_ROLE.to_string(),
            request_timeout: None,
        }
    }
}

/// Executes route statements against a transaction source
pub struct QueryExecutor {
    source: Arc<dyn TransactionSource>,
    classifier: Box<dyn ErrorClassifier>,
    impersonate: Option<Template>,
    reset: Option<Template>,
    anonymous_role: String,
    timeout: Option<Duration>,
}

impl QueryExecutor {
    /// Create an executor, compiling the role statements
    pub fn new(
        source: Arc<dyn TransactionSource>,
        options: ExecutorOptions,
    ) -> Result<Self, ConfigError> {
        if !sanitizer::is_identifier(&options.anonymous_role) {
            return Err(ConfigError::InvalidIdentifier {
                field: "anonymous_role".to_string(),
                value: options.anonymous_role,
            });
        }

        let compile = |name: &str, raw: Option<String>| -> Result<Option<Template>, ConfigError> {
            raw.map(|raw| {
                Template::compile(&raw).map_err(|source| ConfigError::InvalidTemplate {
                    statement: name.to_string(),
                    source,
                })
            })
            .transpose()
        };

        Ok(Self {
            classifier: classifier_for(source.kind()),
            impersonate: compile("impersonate", options.impersonate_statement)?,
            reset: compile("reset", options.reset_statement)?,
            anonymous_role: options.anonymous_role,
            timeout: options.request_timeout,
            source,
        })
    }

    pub fn anonymous_role(&self) -> &str {
        &self.anonymous_role
    }

    pub fn source(&self) -> &Arc<dyn TransactionSource> {
        &self.source
    }

    /// The identity statements will run as
    pub fn effective_identity<'a>(&'a self, identity: &'a str) -> &'a str {
        if !identity.is_empty() && sanitizer::is_identifier(identity) {
            identity
        } else {
            &self.anonymous_role
        }
    }

    /// Run `statements` for `identity`, returning the last statement's rows
    pub async fn execute(
        &self,
        identity: &str,
        statements: &[StatementTemplate],
        ctx: &ExecutionContext,
    ) -> QueryResult<Vec<Row>> {
        let run = self.run(identity, statements, ctx);
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(request_id = %ctx.request_id, ?limit, "Request deadline exceeded, transaction dropped");
                    Err(QueryError::Timeout(limit))
                }
            },
            None => run.await,
        }
    }

    async fn run(
        &self,
        identity: &str,
        statements: &[StatementTemplate],
        ctx: &ExecutionContext,
    ) -> QueryResult<Vec<Row>> {
        let role = self.effective_identity(identity);
        let request_id = ctx.request_id;

        let mut tx = self.source.begin().await.map_err(QueryError::Begin)?;
        debug!(%request_id, role, "Transaction opened");

        if let Some(impersonate) = &self.impersonate {
            let sql = render_role(impersonate, role, "impersonate")?;
            if let Err(source) = tx.execute(&sql, &[]).await {
                warn!(%request_id, role, error = %source, "Failed to assume role");
                rollback(tx, ctx).await;
                return Err(QueryError::Impersonation {
                    role: role.to_string(),
                    source,
                });
            }
        }

        if let Err(err) = sanitizer::validate_map(&ctx.template_params) {
            debug!(%request_id, error = %err, "Template parameters rejected");
            rollback(tx, ctx).await;
            return Err(err.into());
        }

        let rows = match self.run_statements(tx.as_mut(), statements, ctx).await {
            Ok(rows) => rows,
            Err(err) => {
                rollback(tx, ctx).await;
                return Err(err);
            }
        };

        if let Some(reset) = &self.reset {
            let sql = render_role(reset, role, "reset")?;
            if let Err(source) = tx.execute(&sql, &[]).await {
                warn!(%request_id, role, error = %source, "Failed to reset role");
                rollback(tx, ctx).await;
                return Err(QueryError::RoleReset(source));
            }
        }

        tx.commit().await.map_err(|source| {
            warn!(%request_id, error = %source, "Commit failed");
            QueryError::Commit(source)
        })?;

        info!(
            %request_id,
            role,
            statements = statements.len(),
            rows = rows.len(),
            elapsed_ms = ctx.elapsed_ms() as u64,
            "Transaction committed"
        );
        Ok(rows)
    }

    async fn run_statements(
        &self,
        tx: &mut dyn QueryTransaction,
        statements: &[StatementTemplate],
        ctx: &ExecutionContext,
    ) -> QueryResult<Vec<Row>> {
        let style = self.source.kind().placeholder_style();
        let last = statements.len().saturating_sub(1);
        let mut rows = Vec::new();

        for (index, statement) in statements.iter().enumerate() {
            let rendered = statement
                .template
                .render(&ctx.template_params)
                .map_err(|source| QueryError::Render {
                    statement: statement.name.clone(),
                    source,
                })?;
            let bound = BoundStatement::parse(&rendered, style);
            let values = bound
                .values(&ctx.bound_params)
                .map_err(|name| QueryError::MissingBoundParam {
                    statement: statement.name.clone(),
                    name,
                })?;

            debug!(request_id = %ctx.request_id, statement = %statement.name, sql = %bound.sql, "Executing statement");

            let outcome = if index == last {
                tx.fetch_all(&bound.sql, &values).await.map(|fetched| rows = fetched)
            } else {
                tx.execute(&bound.sql, &values).await.map(|_| ())
            };

            if let Err(source) = outcome {
                let class = self.classifier.classify(&source);
                debug!(request_id = %ctx.request_id, statement = %statement.name, %class, error = %source, "Statement failed");
                return Err(QueryError::Statement {
                    statement: statement.name.clone(),
                    class,
                    source,
                });
            }
        }

        Ok(rows)
    }

    /// Run one statement outside of any role, e.g. a credential lookup
    ///
    /// Nothing is rendered; `statement` may only use bound placeholders.
    pub async fn query_unscoped(
        &self,
        statement: &str,
        params: &Map<String, Value>,
    ) -> QueryResult<Vec<Row>> {
        let bound = BoundStatement::parse(statement, self.source.kind().placeholder_style());
        let values = bound
            .values(params)
            .map_err(|name| QueryError::MissingBoundParam {
                statement: "unscoped".to_string(),
                name,
            })?;

        let mut tx = self.source.begin().await.map_err(QueryError::Begin)?;
        let rows = match tx.fetch_all(&bound.sql, &values).await {
            Ok(rows) => rows,
            Err(source) => {
                let _ = tx.rollback().await;
                return Err(QueryError::Statement {
                    statement: "unscoped".to_string(),
                    class: self.classifier.classify(&source),
                    source,
                });
            }
        };
        tx.commit().await.map_err(QueryError::Commit)?;
        Ok(rows)
    }

    /// Create the anonymous role; a failure (usually "already exists") is logged
    pub async fn bootstrap_anonymous_role(&self) {
        let sql = format!("CREATE ROLE {}", self.anonymous_role);
        let result = async {
            let mut tx = self.source.begin().await?;
            tx.execute(&sql, &[]).await?;
            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => info!(role = %self.anonymous_role, "Anonymous role created"),
            Err(err) => {
                info!(role = %self.anonymous_role, error = %err, "Anonymous role not created")
            }
        }
    }
}

fn render_role(template: &Template, role: &str, name: &str) -> QueryResult<String> {
    let mut params = Map::new();
    params.insert(ROLE_PARAM.to_string(), Value::String(role.to_string()));
    template.render(&params).map_err(|source| QueryError::Render {
        statement: name.to_string(),
        source,
    })
}

async fn rollback(tx: Box<dyn QueryTransaction>, ctx: &ExecutionContext) {
    match tx.rollback().await {
        Ok(()) => debug!(request_id = %ctx.request_id, "Transaction rolled back"),
        Err(err) => warn!(request_id = %ctx.request_id, error = %err, "Rollback failed"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory backend recording every call

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures_util::future::BoxFuture;

    use super::*;
    use crate::query::backend::{BackendError, BackendKind, BackendResult};

    /// Observed backend call
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Begin,
        Execute(String),
        Fetch(String),
        Commit,
        Rollback,
        Dropped,
    }

    /// Scripted reaction to a statement
    pub enum Reaction {
        Ok(Vec<Row>),
        Fail(BackendError),
        Hang,
    }

    #[derive(Default)]
    pub struct Script {
        pub calls: Mutex<Vec<Call>>,
        pub reactions: Mutex<VecDeque<(String, Reaction)>>,
        pub fail_commit: Mutex<Option<BackendError>>,
        pub fail_begin: Mutex<Option<BackendError>>,
    }

    impl Script {
        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn react(&self, sql: &str) -> Reaction {
            let mut reactions = self.reactions.lock().unwrap();
            let position = reactions.iter().position(|(needle, _)| sql.contains(needle.as_str()));
            match position.and_then(|index| reactions.remove(index)) {
                Some((_, reaction)) => reaction,
                None => Reaction::Ok(Vec::new()),
            }
        }
    }

    pub struct FakeSource {
        pub kind: BackendKind,
        pub script: Arc<Script>,
    }

    impl FakeSource {
        pub fn new(kind: BackendKind) -> Self {
            Self {
                kind,
                script: Arc::new(Script::default()),
            }
        }

        pub fn on(&self, needle: &str, reaction: Reaction) {
            self.script
                .reactions
                .lock()
                .unwrap()
                .push_back((needle.to_string(), reaction));
        }

        pub fn calls(&self) -> Vec<Call> {
            self.script.calls.lock().unwrap().clone()
        }
    }

    struct FakeTransaction {
        script: Arc<Script>,
        finished: bool,
    }

    impl FakeTransaction {
        async fn run(&mut self, sql: &str) -> BackendResult<Vec<Row>> {
            match self.script.react(sql) {
                Reaction::Ok(rows) => Ok(rows),
                Reaction::Fail(err) => Err(err),
                Reaction::Hang => {
                    std::future::pending::<()>().await;
                    Ok(Vec::new())
                }
            }
        }
    }

    impl Drop for FakeTransaction {
        fn drop(&mut self) {
            if !self.finished {
                self.script.record(Call::Dropped);
            }
        }
    }

    impl QueryTransaction for FakeTransaction {
        fn execute<'a>(
            &'a mut self,
            sql: &'a str,
            _params: &'a [Value],
        ) -> BoxFuture<'a, BackendResult<u64>> {
            Box::pin(async move {
                self.script.record(Call::Execute(sql.to_string()));
                self.run(sql).await.map(|rows| rows.len() as u64)
            })
        }

        fn fetch_all<'a>(
            &'a mut self,
            sql: &'a str,
            _params: &'a [Value],
        ) -> BoxFuture<'a, BackendResult<Vec<Row>>> {
            Box::pin(async move {
                self.script.record(Call::Fetch(sql.to_string()));
                self.run(sql).await
            })
        }

        fn commit(mut self: Box<Self>) -> BoxFuture<'static, BackendResult<()>> {
            Box::pin(async move {
                self.finished = true;
                self.script.record(Call::Commit);
                match self.script.fail_commit.lock().unwrap().take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            })
        }

        fn rollback(mut self: Box<Self>) -> BoxFuture<'static, BackendResult<()>> {
            Box::pin(async move {
                self.finished = true;
                self.script.record(Call::Rollback);
                Ok(())
            })
        }
    }

    impl TransactionSource for FakeSource {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn begin(&self) -> BoxFuture<'_, BackendResult<Box<dyn QueryTransaction>>> {
            Box::pin(async move {
                if let Some(err) = self.script.fail_begin.lock().unwrap().take() {
                    return Err(err);
                }
                self.script.record(Call::Begin);
                Ok(Box::new(FakeTransaction {
                    script: self.script.clone(),
                    finished: false,
                }) as Box<dyn QueryTransaction>)
            })
        }
    }
}
