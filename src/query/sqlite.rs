//! # SQLite Backend
//!
//! SQLite has no roles, so routes served from it run without impersonation
//! unless a custom impersonation statement is configured. Values decode by
//! their runtime storage class, not the declared column type.

use std::str::FromStr;

use futures_util::future::BoxFuture;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::types::Json;
use sqlx::{Column, Row as _, Sqlite, Transaction, TypeInfo, ValueRef};

use super::backend::{BackendKind, BackendResult, PoolSettings, QueryTransaction, TransactionSource};
use super::Row;

/// Pooled SQLite connections
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Open (creating if missing) the database at `url`
    pub async fn connect(url: &str, settings: PoolSettings) -> BackendResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }
}

impl TransactionSource for SqliteSource {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn begin(&self) -> BoxFuture<'_, BackendResult<Box<dyn QueryTransaction>>> {
        Box::pin(async move {
            let tx = self.pool.begin().await?;
            Ok(Box::new(SqliteTransaction { tx }) as Box<dyn QueryTransaction>)
        })
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl QueryTransaction for SqliteTransaction {
    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, BackendResult<u64>> {
        Box::pin(async move {
            let result = bind_all(sqlx::query(sql), params)
                .execute(&mut *self.tx)
                .await?;
            Ok(result.rows_affected())
        })
    }

    fn fetch_all<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, BackendResult<Vec<Row>>> {
        Box::pin(async move {
            let rows = bind_all(sqlx::query(sql), params)
                .fetch_all(&mut *self.tx)
                .await?;
            rows.iter().map(decode_row).collect()
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, BackendResult<()>> {
        Box::pin(async move { Ok(self.tx.commit().await?) })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'static, BackendResult<()>> {
        Box::pin(async move { Ok(self.tx.rollback().await?) })
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(query: SqliteQuery<'q>, params: &'q [Value]) -> SqliteQuery<'q> {
    params.iter().fold(query, bind_value)
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => query.bind(int),
            None => query.bind(number.as_f64()),
        },
        Value::String(text) => query.bind(text.as_str()),
        other => query.bind(Json(other)),
    }
}

fn decode_row(row: &SqliteRow) -> BackendResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let storage = row.try_get_raw(index)?.type_info().name().to_string();
        let value = match storage.as_str() {
            "NULL" => Value::Null,
            "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
            "REAL" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
            "BLOB" => {
                use base64::Engine;
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn source(dir: &TempDir) -> SqliteSource {
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        SqliteSource::connect(&url, PoolSettings::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_values_round_trip_by_storage_class() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir).await;

        let mut tx = source.begin().await.unwrap();
        tx.execute("CREATE TABLE t (i INTEGER, r REAL, s TEXT, b BLOB, n TEXT)", &[])
            .await
            .unwrap();
        tx.execute(
            "INSERT INTO t VALUES (?1, ?2, ?3, X'0102', ?4)",
            &[json!(7), json!(1.5), json!("seven"), Value::Null],
        )
        .await
        .unwrap();
        let rows = tx.fetch_all("SELECT * FROM t", &[]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"i": 7, "r": 1.5, "s": "seven", "b": "AQI=", "n": null})
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir).await;

        let mut tx = source.begin().await.unwrap();
        tx.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = source.begin().await.unwrap();
        tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = source.begin().await.unwrap();
        let rows = tx.fetch_all("SELECT * FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_database_error_carries_code() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir).await;

        let mut tx = source.begin().await.unwrap();
        let err = tx.fetch_all("SELECT * FROM missing", &[]).await.unwrap_err();
        assert_eq!(err.kind, crate::query::backend::BackendErrorKind::Database);
        assert_eq!(err.code.as_deref(), Some("1"));
        assert!(err.message.contains("no such table"));
    }
}
