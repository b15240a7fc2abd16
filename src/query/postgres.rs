//! # PostgreSQL Backend
//!
//! `sqlx` pool and transactions.
//!
//! Parameters are encoded for the type the server infers for each placeholder,
//! so `WHERE id = :id` with `"7"` binds an `int4` and a `"2024-01-01"` body
//! field inserts into a `date` column. The statement is prepared first to learn
//! those types; sqlx caches it, so the later execution reuses the same plan.
//! Values that do not parse as the inferred type fail with SQLSTATE `22P02`.
//! Types without a native encoding here bind as text and need a cast in SQL
//! (`:addr::text::inet`).

use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgPool, PgPoolOptions, PgRow, PgTypeInfo, PgTypeKind,
};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{
    Column, Decode, Either, Encode, Executor as _, Postgres, Row as _, Statement as _,
    Transaction, Type, TypeInfo,
};
use uuid::Uuid;

use super::backend::{
    BackendError, BackendKind, BackendResult, PoolSettings, QueryTransaction, TransactionSource,
};
use super::Row;

/// SQLSTATE reported for a value that does not parse as its parameter type
const INVALID_TEXT_REPRESENTATION: &str = "22P02";

/// Pooled PostgreSQL connections
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    /// Connect eagerly so a bad URL fails at startup
    pub async fn connect(url: &str, settings: PoolSettings) -> BackendResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }
}

impl TransactionSource for PostgresSource {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn begin(&self) -> BoxFuture<'_, BackendResult<Box<dyn QueryTransaction>>> {
        Box::pin(async move {
            let tx = self.pool.begin().await?;
            Ok(Box::new(PostgresTransaction { tx }) as Box<dyn QueryTransaction>)
        })
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    /// Encode each value for the parameter type the server inferred
    async fn encode_params(&mut self, sql: &str, params: &[Value]) -> BackendResult<Vec<PgParam>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let statement = (&mut *self.tx).prepare(sql).await?;
        let types = match statement.parameters() {
            Some(Either::Left(types)) => types.to_vec(),
            _ => Vec::new(),
        };

        params
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let target = types.get(i).map(ParamTarget::of).unwrap_or(ParamTarget::Unknown);
                PgParam::encode(value, target).map_err(|reason| {
                    BackendError::database(
                        INVALID_TEXT_REPRESENTATION,
                        format!("invalid value for parameter ${}: {}", i + 1, reason),
                    )
                })
            })
            .collect()
    }
}

impl QueryTransaction for PostgresTransaction {
    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, BackendResult<u64>> {
        Box::pin(async move {
            let encoded = self.encode_params(sql, params).await?;
            let result = bind_all(sqlx::query(sql), encoded)
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
            let encoded = self.encode_params(sql, params).await?;
            let rows = bind_all(sqlx::query(sql), encoded)
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

// =============================================================================
// PARAMETER ENCODING
// =============================================================================

/// Wire type a parameter is encoded as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamTarget {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Json,
    Uuid,
    Date,
    Timestamp,
    Timestamptz,
    Time,
    Bytea,
    TextArray,
    Int4Array,
    Int8Array,
    /// No native encoding; values go out as text
    Unknown,
}

impl ParamTarget {
    fn of(type_info: &PgTypeInfo) -> Self {
        match type_info.kind() {
            PgTypeKind::Domain(base) => Self::of(base),
            // enum labels share the text wire format
            PgTypeKind::Enum(_) => Self::Text,
            _ => Self::from_type_name(type_info.name()),
        }
    }

    fn from_type_name(name: &str) -> Self {
        match name {
            "BOOL" => Self::Bool,
            "INT2" => Self::Int2,
            "INT4" => Self::Int4,
            "INT8" => Self::Int8,
            "FLOAT4" => Self::Float4,
            "FLOAT8" => Self::Float8,
            "NUMERIC" => Self::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => Self::Text,
            "JSON" | "JSONB" => Self::Json,
            "UUID" => Self::Uuid,
            "DATE" => Self::Date,
            "TIMESTAMP" => Self::Timestamp,
            "TIMESTAMPTZ" => Self::Timestamptz,
            "TIME" => Self::Time,
            "BYTEA" => Self::Bytea,
            "TEXT[]" | "VARCHAR[]" | "NAME[]" => Self::TextArray,
            "INT4[]" => Self::Int4Array,
            "INT8[]" => Self::Int8Array,
            _ => Self::Unknown,
        }
    }
}

/// A request value converted to its parameter's wire type
#[derive(Debug, Clone, PartialEq)]
enum PgParam {
    Null(ParamTarget),
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(PgDecimal),
    Text(String),
    Json(Value),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Timestamptz(DateTime<Utc>),
    Time(NaiveTime),
    Bytes(Vec<u8>),
    TextArray(Vec<String>),
    Int4Array(Vec<i32>),
    Int8Array(Vec<i64>),
}

impl PgParam {
    fn encode(value: &Value, target: ParamTarget) -> Result<Self, String> {
        use ParamTarget as T;

        if value.is_null() {
            return Ok(Self::Null(target));
        }

        let param = match target {
            T::Bool => Self::Bool(boolean(value)?),
            T::Int2 => Self::Int2(narrow(integer(value)?)?),
            T::Int4 => Self::Int4(narrow(integer(value)?)?),
            T::Int8 => Self::Int8(integer(value)?),
            T::Float4 => Self::Float4(float(value)? as f32),
            T::Float8 => Self::Float8(float(value)?),
            T::Numeric => Self::Numeric(PgDecimal::parse(&decimal_text(value)?)?),
            T::Text | T::Unknown => Self::Text(text(value)),
            T::Json => Self::Json(value.clone()),
            T::Uuid => Self::Uuid(parse_string(value, "uuid", Uuid::parse_str)?),
            T::Date => Self::Date(parse_string(value, "date", NaiveDate::from_str)?),
            T::Timestamp => Self::Timestamp(parse_string(value, "timestamp", parse_timestamp)?),
            T::Timestamptz => {
                Self::Timestamptz(parse_string(value, "timestamptz", parse_timestamptz)?)
            }
            T::Time => Self::Time(parse_string(value, "time", NaiveTime::from_str)?),
            T::Bytea => Self::Bytes(parse_string(value, "base64 bytea", |s| STANDARD.decode(s))?),
            T::TextArray => Self::TextArray(elements(value, |v| Ok(text(v)))?),
            T::Int4Array => Self::Int4Array(elements(value, |v| narrow(integer(v)?))?),
            T::Int8Array => Self::Int8Array(elements(value, integer)?),
        };
        Ok(param)
    }
}

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn bind_all(query: PgQuery<'_>, params: Vec<PgParam>) -> PgQuery<'_> {
    params.into_iter().fold(query, bind_param)
}

fn bind_param(query: PgQuery<'_>, param: PgParam) -> PgQuery<'_> {
    match param {
        PgParam::Null(target) => bind_null(query, target),
        PgParam::Bool(v) => query.bind(v),
        PgParam::Int2(v) => query.bind(v),
        PgParam::Int4(v) => query.bind(v),
        PgParam::Int8(v) => query.bind(v),
        PgParam::Float4(v) => query.bind(v),
        PgParam::Float8(v) => query.bind(v),
        PgParam::Numeric(v) => query.bind(v),
        PgParam::Text(v) => query.bind(v),
        PgParam::Json(v) => query.bind(Json(v)),
        PgParam::Uuid(v) => query.bind(v),
        PgParam::Date(v) => query.bind(v),
        PgParam::Timestamp(v) => query.bind(v),
        PgParam::Timestamptz(v) => query.bind(v),
        PgParam::Time(v) => query.bind(v),
        PgParam::Bytes(v) => query.bind(v),
        PgParam::TextArray(v) => query.bind(v),
        PgParam::Int4Array(v) => query.bind(v),
        PgParam::Int8Array(v) => query.bind(v),
    }
}

fn bind_null(query: PgQuery<'_>, target: ParamTarget) -> PgQuery<'_> {
    use ParamTarget as T;

    match target {
        T::Bool => query.bind(None::<bool>),
        T::Int2 => query.bind(None::<i16>),
        T::Int4 => query.bind(None::<i32>),
        T::Int8 => query.bind(None::<i64>),
        T::Float4 => query.bind(None::<f32>),
        T::Float8 => query.bind(None::<f64>),
        T::Numeric => query.bind(None::<PgDecimal>),
        T::Json => query.bind(None::<Json<Value>>),
        T::Uuid => query.bind(None::<Uuid>),
        T::Date => query.bind(None::<NaiveDate>),
        T::Timestamp => query.bind(None::<NaiveDateTime>),
        T::Timestamptz => query.bind(None::<DateTime<Utc>>),
        T::Time => query.bind(None::<NaiveTime>),
        T::Bytea => query.bind(None::<Vec<u8>>),
        T::TextArray => query.bind(None::<Vec<String>>),
        T::Int4Array => query.bind(None::<Vec<i32>>),
        T::Int8Array => query.bind(None::<Vec<i64>>),
        T::Text | T::Unknown => query.bind(None::<String>),
    }
}

fn mismatch(value: &Value, expected: &str) -> String {
    format!("expected {}, got {}", expected, value)
}

fn boolean(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "on" | "1" => Ok(true),
            "false" | "f" | "no" | "off" | "0" => Ok(false),
            _ => Err(mismatch(value, "boolean")),
        },
        other => Err(mismatch(other, "boolean")),
    }
}

fn integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| mismatch(value, "integer")),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(value, "integer")),
        other => Err(mismatch(other, "integer")),
    }
}

fn narrow<T: TryFrom<i64>>(n: i64) -> Result<T, String> {
    T::try_from(n).map_err(|_| format!("{} is out of range", n))
}

fn float(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(value, "number")),
        Value::String(s) => s.trim().parse().map_err(|_| mismatch(value, "number")),
        other => Err(mismatch(other, "number")),
    }
}

fn decimal_text(value: &Value) -> Result<String, String> {
    match value {
        Value::Number(n) => Ok(match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (None, Some(u), _) => u.to_string(),
            // f64 Display never uses exponent notation
            (None, None, Some(f)) => f.to_string(),
            _ => return Err(mismatch(value, "number")),
        }),
        Value::String(s) => Ok(s.clone()),
        other => Err(mismatch(other, "number")),
    }
}

/// Non-string values keep their JSON text
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_string<T, E, F>(value: &Value, expected: &str, parse: F) -> Result<T, String>
where
    F: FnOnce(&str) -> Result<T, E>,
{
    match value {
        Value::String(s) => parse(s.trim()).map_err(|_| mismatch(value, expected)),
        other => Err(mismatch(other, expected)),
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDate::from_str(s).map(|date| date.and_time(NaiveTime::MIN)))
}

/// RFC 3339, or a zone-less timestamp taken as UTC
fn parse_timestamptz(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|_| parse_timestamp(s).map(|ts| ts.and_utc()))
}

fn elements<T, F>(value: &Value, convert: F) -> Result<Vec<T>, String>
where
    F: Fn(&Value) -> Result<T, String>,
{
    match value {
        Value::Array(items) => items.iter().map(convert).collect(),
        other => Err(mismatch(other, "array")),
    }
}

/// A decimal in the `numeric` binary layout: base-10000 digit groups, the
/// weight of the first group, a sign word and the display scale
#[derive(Debug, Clone, PartialEq, Eq)]
struct PgDecimal {
    weight: i16,
    sign: u16,
    scale: u16,
    digits: Vec<i16>,
}

impl PgDecimal {
    const POSITIVE: u16 = 0x0000;
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;

    fn parse(input: &str) -> Result<Self, String> {
        let s = input.trim();
        if s.eq_ignore_ascii_case("nan") {
            return Ok(Self { weight: 0, sign: Self::NAN, scale: 0, digits: Vec::new() });
        }

        let (sign, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (Self::NEGATIVE, rest),
            None => (Self::POSITIVE, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(format!("{:?} is not a decimal number", input));
        }
        let out_of_range = || format!("{:?} is out of range", input);
        let scale = u16::try_from(frac_part.len()).map_err(|_| out_of_range())?;

        let int_pad = (4 - int_part.len() % 4) % 4;
        let frac_pad = (4 - frac_part.len() % 4) % 4;
        let padded = format!(
            "{}{}{}{}",
            "0".repeat(int_pad),
            int_part,
            frac_part,
            "0".repeat(frac_pad)
        );
        let mut digits: Vec<i16> = padded
            .as_bytes()
            .chunks(4)
            .map(|group| group.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0')))
            .collect();

        let leading = digits.iter().take_while(|&&d| d == 0).count();
        digits.drain(..leading);
        while digits.last() == Some(&0) {
            digits.pop();
        }
        if digits.is_empty() {
            return Ok(Self { weight: 0, sign: Self::POSITIVE, scale, digits });
        }

        let int_groups = (int_part.len() + int_pad) / 4;
        let weight = int_groups as i64 - 1 - leading as i64;
        let weight = i16::try_from(weight).map_err(|_| out_of_range())?;
        Ok(Self { weight, sign, scale, digits })
    }
}

impl Type<Postgres> for PgDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }
}

impl Encode<'_, Postgres> for PgDecimal {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        let ndigits = i16::try_from(self.digits.len())?;
        buf.extend(&ndigits.to_be_bytes());
        buf.extend(&self.weight.to_be_bytes());
        buf.extend(&self.sign.to_be_bytes());
        buf.extend(&self.scale.to_be_bytes());
        for digit in &self.digits {
            buf.extend(&digit.to_be_bytes());
        }
        Ok(IsNull::No)
    }
}

// =============================================================================
// ROW DECODING
// =============================================================================

fn decode_row(row: &PgRow) -> BackendResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = decode_column(row, index, column.type_info().name())?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> BackendResult<Value> {
    let value = match type_name {
        "BOOL" => decode_with::<bool, _>(row, index, Value::from)?,
        "INT2" => decode_with::<i16, _>(row, index, Value::from)?,
        "INT4" => decode_with::<i32, _>(row, index, Value::from)?,
        "INT8" => decode_with::<i64, _>(row, index, Value::from)?,
        "OID" => decode_with::<sqlx::postgres::types::Oid, _>(row, index, |oid| Value::from(oid.0))?,
        "FLOAT4" => decode_with::<f32, _>(row, index, Value::from)?,
        "FLOAT8" => decode_with::<f64, _>(row, index, Value::from)?,
        "JSON" | "JSONB" => decode_with::<Value, _>(row, index, |json| json)?,
        "UUID" => decode_with::<Uuid, _>(row, index, |uuid| Value::from(uuid.to_string()))?,
        "TIMESTAMPTZ" => decode_with::<DateTime<Utc>, _>(row, index, |ts| {
            Value::from(ts.to_rfc3339())
        })?,
        "TIMESTAMP" => decode_with::<NaiveDateTime, _>(row, index, |ts| {
            Value::from(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        })?,
        "DATE" => decode_with::<NaiveDate, _>(row, index, |date| Value::from(date.to_string()))?,
        "TIME" => decode_with::<NaiveTime, _>(row, index, |time| Value::from(time.to_string()))?,
        "BYTEA" => decode_with::<Vec<u8>, _>(row, index, encode_bytes)?,
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => {
            decode_with::<Vec<String>, _>(row, index, Value::from)?
        }
        "INT4[]" => decode_with::<Vec<i32>, _>(row, index, Value::from)?,
        "INT8[]" => decode_with::<Vec<i64>, _>(row, index, Value::from)?,
        // text-like types (name, varchar, enums, domains) share the text wire format
        _ => row
            .try_get_unchecked::<Option<String>, _>(index)?
            .map(Value::String)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}

fn decode_with<'r, T, F>(row: &'r PgRow, index: usize, convert: F) -> BackendResult<Value>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
    F: FnOnce(T) -> Value,
{
    Ok(row
        .try_get::<Option<T>, _>(index)?
        .map(convert)
        .unwrap_or(Value::Null))
}

fn encode_bytes(bytes: Vec<u8>) -> Value {
    Value::String(STANDARD.encode(bytes))
}
