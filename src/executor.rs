//! Tenant-scoped statement execution.
//!
//! Every request runs in its own transaction on the tenant's backend. For
//! shared tenants the search path is pinned to the tenant schema plus the
//! helpers schema before anything else runs; the statement timeout is
//! enforced server-side. Dropping the transaction (client disconnect, any
//! error) rolls back and returns the session to its pool.

use futures::TryStreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};
use thiserror::Error;
use tracing::{error, warn};

use crate::config;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::Backend;
use crate::middleware::auth::Policy;
use crate::validator::{ParsedStatement, HELPERS_SCHEMA};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("query exceeded the row limit of {max_rows}")]
    RowLimitExceeded { max_rows: i32 },

    #[error("statement timed out")]
    Timeout,

    #[error("no database session available")]
    Unavailable,

    #[error("tenant database no longer exists")]
    TenantGone,

    #[error("{0}")]
    Database(String),
}

#[derive(Debug, Serialize)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    pub row_count: usize,
}

/// Run one validated statement under the caller's policy.
pub async fn execute(
    policy: &Policy,
    statement: &ParsedStatement,
    params: &[Value],
) -> Result<QueryOutput, ExecuteError> {
    let pool = DatabaseManager::pool_for(&policy.backend).await?;
    let mut tx = pool.begin().await.map_err(map_sqlx)?;

    // Dedicated backends keep their remote's default search path.
    if let Backend::Shared { schema_name } = &policy.backend {
        let set_path = format!(
            "SET LOCAL search_path TO {}, {}",
            DatabaseManager::quote_identifier(schema_name),
            HELPERS_SCHEMA
        );
        sqlx::query(&set_path)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
    }

    let timeout_ms = config::config().query_timeout.as_millis();
    sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

    let mut query = sqlx::query(&statement.sql);
    for param in params {
        query = bind_value(query, param);
    }

    let max_rows = policy.max_rows.max(0) as usize;
    let mut rows: Vec<Value> = Vec::new();
    {
        let mut stream = query.fetch(&mut *tx);
        while let Some(row) = stream.try_next().await.map_err(map_sqlx)? {
            // The overflow row is detected before conversion and discarded
            // along with everything gathered so far.
            if rows.len() >= max_rows {
                return Err(ExecuteError::RowLimitExceeded {
                    max_rows: policy.max_rows,
                });
            }
            rows.push(Value::Object(row_to_object(&row)));
        }
    }

    tx.commit().await.map_err(map_sqlx)?;

    let row_count = rows.len();
    Ok(QueryOutput { rows, row_count })
}

fn map_sqlx(err: sqlx::Error) -> ExecuteError {
    match &err {
        sqlx::Error::PoolTimedOut => ExecuteError::Unavailable,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // query_canceled: the statement timeout fired
            Some("57014") => ExecuteError::Timeout,
            // invalid_schema_name: the tenant schema vanished mid-request
            Some("3F000") => ExecuteError::TenantGone,
            _ => ExecuteError::Database(db.message().to_string()),
        },
        _ => {
            error!(error = %err, "statement execution failed outside the server");
            ExecuteError::Database("database error".to_string())
        }
    }
}

impl From<DatabaseError> for ExecuteError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Sqlx(inner) => map_sqlx(inner),
            DatabaseError::ConfigMissing(name) => {
                error!(missing = name, "connection provider misconfigured");
                ExecuteError::Database("database error".to_string())
            }
        }
    }
}

/// Bind one JSON parameter positionally. Arrays and objects go over the wire
/// as JSONB.
fn bind_value<'q>(
    q: Query<'q, Postgres, PgArguments>,
    v: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}

/// Convert one result row into a JSON object. On duplicate column names the
/// first occurrence wins.
fn row_to_object(row: &PgRow) -> Map<String, Value> {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name();
        if object.contains_key(name) {
            continue;
        }
        let value = column_value(row, index, column.type_info().name());
        object.insert(name.to_string(), value);
    }
    object
}

fn column_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Number(v.into()))
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| float_value(f64::from(v)))
            .unwrap_or(Value::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(float_value)
            .unwrap_or(Value::Null),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(index)
            .ok()
            .flatten()
            .map(decimal_value)
            .unwrap_or(Value::Null),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<Value>, _>(index)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(hex_string(&v)))
            .unwrap_or(Value::Null),
        other => {
            // Last resort: let the driver render it as text.
            if let Ok(value) = row.try_get::<Option<String>, _>(index) {
                value.map(Value::String).unwrap_or(Value::Null)
            } else {
                warn!(pg_type = other, "unhandled column type, returning null");
                Value::Null
            }
        }
    }
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

/// NUMERIC values become JSON numbers when exactly representable as i64 and
/// strings otherwise, so nothing is silently rounded.
fn decimal_value(value: Decimal) -> Value {
    if value.fract().is_zero() {
        if let Some(integer) = value.to_i64() {
            return Value::Number(integer.into());
        }
    }
    Value::String(value.normalize().to_string())
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
