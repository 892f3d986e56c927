use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Operation;

/// A bearer credential bound to one tenant. Only the hash of the secret is
/// ever stored; `token_prefix` exists purely for display.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    pub id: Uuid,
    pub database_id: Uuid,
    pub name: String,
    pub token_hash: String,
    pub token_prefix: String,
    pub allowed_operations: HashSet<Operation>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
