use std::collections::HashSet;

use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::database::manager::DatabaseManager;
use crate::database::models::{Backend, Operation, Tenant, Token};
use crate::database::store::{MetadataStore, TokenLookup};
use crate::error::ApiError;
use crate::token;

/// Per-request authorization context, derived by joining a token with its
/// tenant at auth time.
#[derive(Clone, Debug)]
pub struct Policy {
    pub tenant_id: Uuid,
    pub backend: Backend,
    pub max_rows: i32,
    pub allowed_ops: HashSet<Operation>,
    pub token_id: Uuid,
}

impl Policy {
    pub fn from_parts(token: Token, tenant: Tenant) -> Self {
        Self {
            tenant_id: tenant.id,
            backend: tenant.backend,
            max_rows: tenant.max_rows,
            allowed_ops: token.allowed_operations,
            token_id: token.id,
        }
    }
}

/// Bearer-token authentication: resolves the presented secret to a `Policy`
/// and injects it into the request extensions.
pub async fn token_auth_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let secret = extract_bearer(&headers)?;

    // A malformed secret gets the same answer as an unknown one, so the
    // error is not an oracle for the expected format.
    if !token::is_well_formed(&secret) {
        return Err(ApiError::unauthorized("invalid token"));
    }

    let pool = DatabaseManager::host_pool().await.map_err(|err| {
        tracing::error!(error = %err, "auth could not reach the metadata store");
        ApiError::Unavailable
    })?;
    let store = MetadataStore::new(pool);

    let policy = match store.find_token_by_hash(&token::hash(&secret)).await? {
        TokenLookup::Hit(token, tenant) => Policy::from_parts(token, tenant),
        TokenLookup::Orphaned(_) => return Err(ApiError::DatabaseNotFound),
        TokenLookup::Miss => return Err(ApiError::unauthorized("invalid token")),
    };

    request.extensions_mut().insert(policy);
    Ok(next.run(request).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("invalid Authorization header"))?;

    match value.strip_prefix("Bearer ") {
        Some(secret) if !secret.trim().is_empty() => Ok(secret.trim().to_string()),
        _ => Err(ApiError::unauthorized(
            "Authorization header must use the Bearer scheme",
        )),
    }
}
