//! Metadata persistence: the `postgate_databases` and `postgate_tokens`
//! tables in the host database. All queries are runtime-checked so the crate
//! builds without a live database; correctness of concurrent writes rests on
//! the table constraints, not in-process locks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::{Backend, InvalidBackend, Operation, Tenant, Token};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("tenant not found")]
    TenantNotFound,

    #[error(transparent)]
    InvalidBackend(#[from] InvalidBackend),

    #[error("corrupt metadata: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Result of the authentication hot path.
#[derive(Debug)]
pub enum TokenLookup {
    Miss,
    /// A token row whose tenant vanished under it. The FK cascade makes this
    /// a narrow race window, but auth must answer 404 rather than 401 here.
    Orphaned(Token),
    Hit(Token, Tenant),
}

const TENANT_COLUMNS: &str =
    "id, name, backend_type, schema_name, connection_string, max_rows, created_at";
const TOKEN_COLUMNS: &str = "id, database_id, name, token_hash, token_prefix, \
     allowed_operations, created_at, last_used_at";

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    backend_type: String,
    schema_name: Option<String>,
    connection_string: Option<String>,
    max_rows: i32,
    created_at: DateTime<Utc>,
}

impl TenantRow {
    fn into_tenant(self) -> Result<Tenant, StoreError> {
        let backend =
            Backend::from_columns(&self.backend_type, self.schema_name, self.connection_string)?;
        Ok(Tenant {
            id: self.id,
            name: self.name,
            backend,
            max_rows: self.max_rows,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    database_id: Uuid,
    name: String,
    token_hash: String,
    token_prefix: String,
    allowed_operations: Vec<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl TokenRow {
    fn into_token(self) -> Result<Token, StoreError> {
        let allowed_operations = parse_operations(self.id, &self.allowed_operations)?;
        Ok(Token {
            id: self.id,
            database_id: self.database_id,
            name: self.name,
            token_hash: self.token_hash,
            token_prefix: self.token_prefix,
            allowed_operations,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        })
    }
}

/// Joined row for `find_token_by_hash`; tenant columns are nullable because
/// the join is a LEFT JOIN.
#[derive(sqlx::FromRow)]
struct TokenTenantRow {
    id: Uuid,
    database_id: Uuid,
    name: String,
    token_hash: String,
    token_prefix: String,
    allowed_operations: Vec<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    tenant_id: Option<Uuid>,
    tenant_name: Option<String>,
    backend_type: Option<String>,
    schema_name: Option<String>,
    connection_string: Option<String>,
    max_rows: Option<i32>,
    tenant_created_at: Option<DateTime<Utc>>,
}

impl TokenTenantRow {
    fn into_lookup(self) -> Result<TokenLookup, StoreError> {
        let token = TokenRow {
            id: self.id,
            database_id: self.database_id,
            name: self.name,
            token_hash: self.token_hash,
            token_prefix: self.token_prefix,
            allowed_operations: self.allowed_operations,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
        .into_token()?;

        let (Some(id), Some(name), Some(backend_type), Some(max_rows), Some(created_at)) = (
            self.tenant_id,
            self.tenant_name,
            self.backend_type,
            self.max_rows,
            self.tenant_created_at,
        ) else {
            return Ok(TokenLookup::Orphaned(token));
        };

        let backend = Backend::from_columns(&backend_type, self.schema_name, self.connection_string)?;
        Ok(TokenLookup::Hit(
            token,
            Tenant {
                id,
                name,
                backend,
                max_rows,
                created_at,
            },
        ))
    }
}

fn parse_operations(
    token_id: Uuid,
    values: &[String],
) -> Result<HashSet<Operation>, StoreError> {
    let mut operations = HashSet::new();
    for value in values {
        let Some(operation) = Operation::parse(value) else {
            return Err(StoreError::Corrupt(format!(
                "unknown operation {value:?} on token {token_id}"
            )));
        };
        operations.insert(operation);
    }
    Ok(operations)
}

fn operation_columns(permissions: &HashSet<Operation>) -> Vec<String> {
    // Canonical vocabulary order keeps the stored array deterministic.
    Operation::ALL
        .into_iter()
        .filter(|op| permissions.contains(op))
        .map(|op| op.as_str().to_string())
        .collect()
}

fn map_constraint(err: sqlx::Error, conflict: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            // unique_violation
            Some("23505") => return StoreError::Conflict(conflict),
            // foreign_key_violation: the referenced tenant is gone
            Some("23503") => return StoreError::TenantNotFound,
            _ => {}
        }
    }
    StoreError::Sqlx(err)
}

/// CRUD over the metadata tables. Cheap to construct; holds a pool clone.
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_tenant(
        &self,
        name: &str,
        backend: &Backend,
        max_rows: i32,
    ) -> Result<Tenant, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::create_tenant_on(&mut conn, name, backend, max_rows).await
    }

    /// Transaction-composable form, used by the provisioner to pair the
    /// insert with schema DDL.
    pub async fn create_tenant_on(
        conn: &mut PgConnection,
        name: &str,
        backend: &Backend,
        max_rows: i32,
    ) -> Result<Tenant, StoreError> {
        backend.validate()?;
        let (backend_type, schema_name, connection_string) = backend.as_columns();
        let sql = format!(
            "INSERT INTO postgate_databases (name, backend_type, schema_name, connection_string, max_rows) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TENANT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(name)
            .bind(backend_type)
            .bind(schema_name)
            .bind(connection_string)
            .bind(max_rows)
            .fetch_one(conn)
            .await
            .map_err(|e| map_constraint(e, "a tenant with that schema name"))?;
        row.into_tenant()
    }

    pub async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_tenant_on(&mut conn, id).await
    }

    pub async fn get_tenant_on(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Tenant>, StoreError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM postgate_databases WHERE id = $1");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        row.map(TenantRow::into_tenant).transpose()
    }

    /// Delete the metadata row; tokens cascade via the FK. Backend
    /// namespaces are the provisioner's concern, not the store's.
    pub async fn delete_tenant(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::delete_tenant_on(&mut conn, id).await
    }

    pub async fn delete_tenant_on(conn: &mut PgConnection, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM postgate_databases WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_token(
        &self,
        tenant_id: Uuid,
        name: &str,
        permissions: &HashSet<Operation>,
        hash: &str,
        prefix: &str,
    ) -> Result<Token, StoreError> {
        let sql = format!(
            "INSERT INTO postgate_tokens (database_id, name, token_hash, token_prefix, allowed_operations) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TOKEN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(tenant_id)
            .bind(name)
            .bind(hash)
            .bind(prefix)
            .bind(operation_columns(permissions))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_constraint(e, "a token with that name"))?;
        row.into_token()
    }

    /// Insert-or-replace a named token's credential. Used by startup
    /// bootstrap for the admin tenant.
    pub async fn upsert_token(
        &self,
        tenant_id: Uuid,
        name: &str,
        permissions: &HashSet<Operation>,
        hash: &str,
        prefix: &str,
    ) -> Result<Token, StoreError> {
        let sql = format!(
            "INSERT INTO postgate_tokens (database_id, name, token_hash, token_prefix, allowed_operations) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (database_id, name) DO UPDATE \
             SET token_hash = EXCLUDED.token_hash, \
                 token_prefix = EXCLUDED.token_prefix, \
                 allowed_operations = EXCLUDED.allowed_operations \
             RETURNING {TOKEN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(tenant_id)
            .bind(name)
            .bind(hash)
            .bind(prefix)
            .bind(operation_columns(permissions))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_constraint(e, "a token with that name"))?;
        row.into_token()
    }

    pub async fn delete_token(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM postgate_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_tokens(&self, tenant_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM postgate_tokens WHERE database_id = $1")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// The authentication hot path, served by the index on `token_hash`.
    pub async fn find_token_by_hash(&self, hash: &str) -> Result<TokenLookup, StoreError> {
        let row = sqlx::query_as::<_, TokenTenantRow>(
            "SELECT t.id, t.database_id, t.name, t.token_hash, t.token_prefix, \
                    t.allowed_operations, t.created_at, t.last_used_at, \
                    d.id AS tenant_id, d.name AS tenant_name, d.backend_type, \
                    d.schema_name, d.connection_string, d.max_rows, \
                    d.created_at AS tenant_created_at \
             FROM postgate_tokens t \
             LEFT JOIN postgate_databases d ON d.id = t.database_id \
             WHERE t.token_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(TokenLookup::Miss),
            Some(row) => row.into_lookup(),
        }
    }

    /// Best-effort `last_used_at` update; callers log and drop failures.
    pub async fn touch_token(&self, id: Uuid, when: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE postgate_tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(when)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
