//! Tenant lifecycle: namespace provisioning paired with metadata writes.
//!
//! Shared tenants get a schema named `tenant_<32 hex>_<sanitized name>`;
//! the DDL and the metadata insert share one transaction, so a failure of
//! either leaves no orphan schema and no orphan row. The same operations
//! are installed as SQL functions by the migrations, which is how clients
//! reach them through `/query`.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::database::manager::DatabaseManager;
use crate::database::models::{Backend, Tenant};
use crate::database::store::{MetadataStore, StoreError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid tenant name: {0}")]
    InvalidName(String),

    #[error("invalid connection string: {0}")]
    InvalidDsn(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub struct TenantProvisioner {
    pool: PgPool,
}

impl TenantProvisioner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a tenant backed by an isolated schema in the host database.
    /// `max_rows` falls back to the configured default row cap.
    pub async fn create_shared_tenant(
        &self,
        name: &str,
        max_rows: Option<i32>,
    ) -> Result<Tenant, ProvisionError> {
        validate_name(name)?;
        let max_rows = max_rows.unwrap_or(config::config().default_max_rows);
        let schema_name = schema_name_for(name);

        let mut tx = self.pool.begin().await?;
        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            DatabaseManager::quote_identifier(&schema_name)
        );
        sqlx::query(&ddl).execute(&mut *tx).await?;
        let tenant =
            MetadataStore::create_tenant_on(&mut tx, name, &Backend::Shared { schema_name }, max_rows)
                .await?;
        tx.commit().await?;
        Ok(tenant)
    }

    /// Create a tenant backed by an external database. The DSN is validated
    /// syntactically only; the remote is first contacted on use.
    pub async fn create_dedicated_tenant(
        &self,
        name: &str,
        dsn: &str,
        max_rows: Option<i32>,
    ) -> Result<Tenant, ProvisionError> {
        validate_name(name)?;
        validate_dsn(dsn)?;
        let max_rows = max_rows.unwrap_or(config::config().default_max_rows);
        let store = MetadataStore::new(self.pool.clone());
        let tenant = store
            .create_tenant(
                name,
                &Backend::Dedicated {
                    connection_string: dsn.to_string(),
                },
                max_rows,
            )
            .await?;
        Ok(tenant)
    }

    /// Destroy a tenant. Shared schemas are dropped in the same transaction
    /// as the metadata delete; dedicated remotes are never touched. Returns
    /// whether the tenant existed.
    pub async fn delete_tenant(&self, id: Uuid) -> Result<bool, ProvisionError> {
        let mut tx = self.pool.begin().await?;
        let Some(tenant) = MetadataStore::get_tenant_on(&mut tx, id).await? else {
            return Ok(false);
        };
        if let Backend::Shared { schema_name } = &tenant.backend {
            // The seed admin tenant lives on `public`; never drop that.
            if schema_name != "public" {
                let ddl = format!(
                    "DROP SCHEMA IF EXISTS {} CASCADE",
                    DatabaseManager::quote_identifier(schema_name)
                );
                sqlx::query(&ddl).execute(&mut *tx).await?;
            }
        }
        let existed = MetadataStore::delete_tenant_on(&mut tx, id).await?;
        tx.commit().await?;
        Ok(existed)
    }
}

fn validate_name(name: &str) -> Result<(), ProvisionError> {
    if name.is_empty() || name.len() > 100 {
        return Err(ProvisionError::InvalidName(
            "tenant name must be 1-100 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_dsn(dsn: &str) -> Result<(), ProvisionError> {
    let parsed =
        url::Url::parse(dsn).map_err(|e| ProvisionError::InvalidDsn(e.to_string()))?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        return Err(ProvisionError::InvalidDsn(format!(
            "unsupported scheme {:?}",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// `tenant_<32 hex>_<sanitized name>`. The sanitized part is capped so the
/// whole identifier stays inside Postgres's 63-byte limit.
fn schema_name_for(name: &str) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    let mut sanitized = sanitize(name);
    sanitized.truncate(20);
    format!("tenant_{nonce}_{sanitized}")
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
