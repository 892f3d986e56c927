//! Startup provisioning of the seed admin tenant's credential.
//!
//! Migrations install the admin tenant but cannot hand a freshly minted
//! plaintext to the operator, so that happens here: either the hash of
//! `POSTGATE_ADMIN_TOKEN` is upserted, or a token is minted on first run
//! and logged exactly once.

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::database::models::Operation;
use crate::database::store::MetadataStore;
use crate::token;

/// Fixed identity of the seed admin tenant installed by migrations.
pub const ADMIN_TENANT_ID: Uuid = Uuid::nil();

/// Name of the token maintained from `POSTGATE_ADMIN_TOKEN`.
const BOOTSTRAP_TOKEN_NAME: &str = "bootstrap";

pub async fn ensure_admin_token(pool: &PgPool) -> anyhow::Result<()> {
    let store = MetadataStore::new(pool.clone());
    let all_operations = Operation::ALL.into_iter().collect();

    if let Some(secret) = &config::config().admin_token {
        if !token::is_well_formed(secret) {
            anyhow::bail!("POSTGATE_ADMIN_TOKEN is not a well-formed token secret");
        }
        store
            .upsert_token(
                ADMIN_TENANT_ID,
                BOOTSTRAP_TOKEN_NAME,
                &all_operations,
                &token::hash(secret),
                token::prefix(secret),
            )
            .await
            .context("installing POSTGATE_ADMIN_TOKEN")?;
        info!("admin bootstrap token installed from POSTGATE_ADMIN_TOKEN");
        return Ok(());
    }

    if store.count_tokens(ADMIN_TENANT_ID).await? == 0 {
        let secret = token::mint().context("minting initial admin token")?;
        store
            .create_token(
                ADMIN_TENANT_ID,
                "default",
                &all_operations,
                &token::hash(&secret),
                token::prefix(&secret),
            )
            .await
            .context("storing initial admin token")?;
        warn!(token = %secret, "minted initial admin token; store it now, it will not be shown again");
    }

    Ok(())
}
