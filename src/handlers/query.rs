use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::executor::{self, QueryOutput};
use crate::middleware::auth::Policy;
use crate::services::touch;
use crate::validator;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    /// Bound positionally to `$1..$N`.
    #[serde(default)]
    pub params: Vec<Value>,
}

/// POST /query - validate and execute one statement under the caller's
/// policy. Auth has already attached the `Policy` extension.
pub async fn query_post(
    Extension(policy): Extension<Policy>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryOutput>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::parse(rejection.body_text()))?;

    let statement = validator::validate(&request.sql, &policy)?;
    let output = executor::execute(&policy, &statement, &request.params).await?;

    // Fire-and-forget; the response never waits on this.
    touch::record_use(policy.token_id);

    Ok(Json(output))
}
