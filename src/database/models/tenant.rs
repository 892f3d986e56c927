use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Where a tenant's data physically lives.
///
/// Persisted as a `backend_type` discriminator plus two nullable columns
/// under a CHECK constraint; in memory exactly one variant is populated, so
/// the "exactly one" invariant cannot be violated by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backend {
    /// An isolated schema inside the host database.
    Shared { schema_name: String },
    /// An external database reached by connection string.
    Dedicated { connection_string: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("backend columns do not form a valid variant (backend_type {backend_type:?})")]
pub struct InvalidBackend {
    pub backend_type: String,
}

impl Backend {
    pub const TYPE_SCHEMA: &'static str = "schema";
    pub const TYPE_DEDICATED: &'static str = "dedicated";

    /// Collapse the persistence columns into the variant.
    pub fn from_columns(
        backend_type: &str,
        schema_name: Option<String>,
        connection_string: Option<String>,
    ) -> Result<Self, InvalidBackend> {
        match (backend_type, schema_name, connection_string) {
            (Self::TYPE_SCHEMA, Some(schema_name), None) if !schema_name.is_empty() => {
                Ok(Backend::Shared { schema_name })
            }
            (Self::TYPE_DEDICATED, None, Some(connection_string))
                if !connection_string.is_empty() =>
            {
                Ok(Backend::Dedicated { connection_string })
            }
            _ => Err(InvalidBackend {
                backend_type: backend_type.to_string(),
            }),
        }
    }

    /// The persistence shape: `(backend_type, schema_name, connection_string)`.
    pub fn as_columns(&self) -> (&'static str, Option<&str>, Option<&str>) {
        match self {
            Backend::Shared { schema_name } => (Self::TYPE_SCHEMA, Some(schema_name), None),
            Backend::Dedicated { connection_string } => {
                (Self::TYPE_DEDICATED, None, Some(connection_string))
            }
        }
    }

    pub fn validate(&self) -> Result<(), InvalidBackend> {
        let (backend_type, schema_name, connection_string) = self.as_columns();
        if schema_name.map_or(false, str::is_empty)
            || connection_string.map_or(false, str::is_empty)
        {
            return Err(InvalidBackend {
                backend_type: backend_type.to_string(),
            });
        }
        Ok(())
    }
}

/// A logical database owned by one customer.
#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub backend: Backend,
    pub max_rows: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_shared_backend() {
        let backend =
            Backend::from_columns("schema", Some("tenant_abc".to_string()), None).unwrap();
        assert_eq!(
            backend,
            Backend::Shared {
                schema_name: "tenant_abc".to_string()
            }
        );
    }

    #[test]
    fn decodes_dedicated_backend() {
        let backend =
            Backend::from_columns("dedicated", None, Some("postgres://x".to_string())).unwrap();
        assert_eq!(
            backend,
            Backend::Dedicated {
                connection_string: "postgres://x".to_string()
            }
        );
    }

    #[test]
    fn rejects_rows_violating_the_variant_invariant() {
        assert!(Backend::from_columns("schema", None, None).is_err());
        assert!(Backend::from_columns("schema", Some(String::new()), None).is_err());
        assert!(Backend::from_columns(
            "schema",
            Some("a".to_string()),
            Some("postgres://x".to_string())
        )
        .is_err());
        assert!(Backend::from_columns("dedicated", Some("a".to_string()), None).is_err());
        assert!(Backend::from_columns("other", Some("a".to_string()), None).is_err());
    }

    #[test]
    fn columns_round_trip() {
        let backend = Backend::Shared {
            schema_name: "tenant_abc".to_string(),
        };
        let (backend_type, schema_name, connection_string) = backend.as_columns();
        let decoded = Backend::from_columns(
            backend_type,
            schema_name.map(str::to_string),
            connection_string.map(str::to_string),
        )
        .unwrap();
        assert_eq!(decoded, backend);
    }
}
