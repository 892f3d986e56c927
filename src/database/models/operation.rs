use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed vocabulary of statement operations a token may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Select,
        Operation::Insert,
        Operation::Update,
        Operation::Delete,
        Operation::Create,
        Operation::Alter,
        Operation::Drop,
    ];

    /// Canonical uppercase form, as stored in the `allowed_operations` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Create => "CREATE",
            Operation::Alter => "ALTER",
            Operation::Drop => "DROP",
        }
    }

    pub fn parse(value: &str) -> Option<Operation> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_canonical_forms() {
        for op in Operation::ALL {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
    }

    #[test]
    fn parse_is_case_insensitive_and_closed() {
        assert_eq!(Operation::parse("select"), Some(Operation::Select));
        assert_eq!(Operation::parse("Drop"), Some(Operation::Drop));
        assert_eq!(Operation::parse("GRANT"), None);
        assert_eq!(Operation::parse(""), None);
    }
}
