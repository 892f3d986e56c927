//! Statement validation: the security perimeter in front of execution.
//!
//! Execution binds `search_path` to one tenant schema plus the helpers
//! schema, so an unqualified name can only resolve inside those. Validation
//! closes the two syntactic escape routes: schema-qualified names (other
//! than the helpers schema) and the system catalogs (`pg_*`,
//! `information_schema`). Statements are never rewritten; the original text
//! passes through untouched.

use std::ops::ControlFlow;

use sqlparser::ast::{Expr, Ident, ObjectName, ObjectType, Statement, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use crate::database::models::Operation;
use crate::middleware::auth::Policy;

/// Schema of cross-tenant utility functions; the only namespace a statement
/// may address by qualified name.
pub const HELPERS_SCHEMA: &str = "postgate_helpers";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("empty statement")]
    Empty,

    #[error("expected exactly one statement")]
    MultipleStatements,

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unsupported statement type")]
    UnsupportedStatement,

    #[error("operation {0} is not permitted for this token")]
    OperationDenied(Operation),

    #[error("schema-qualified names are not allowed")]
    QualifiedName,

    #[error("system objects are not accessible")]
    SystemObject,
}

/// A statement that passed validation: the untouched SQL text plus its
/// classified operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub sql: String,
    pub operation: Operation,
}

/// Parse, classify, authorize, and scan one statement under a policy.
pub fn validate(sql: &str, policy: &Policy) -> Result<ParsedStatement, ValidateError> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| ValidateError::Syntax(e.to_string()))?;
    let statement = match statements.as_slice() {
        [] => return Err(ValidateError::Empty),
        [single] => single,
        _ => return Err(ValidateError::MultipleStatements),
    };

    let operation = classify(statement)?;
    if !policy.allowed_ops.contains(&operation) {
        return Err(ValidateError::OperationDenied(operation));
    }
    scan_identifiers(statement)?;

    Ok(ParsedStatement {
        sql: sql.to_string(),
        operation,
    })
}

/// Map the statement's root kind onto the operation vocabulary. Anything
/// outside the table is rejected, including transaction control and session
/// settings that would subvert the per-request transaction.
fn classify(statement: &Statement) -> Result<Operation, ValidateError> {
    match statement {
        Statement::Query(_) => Ok(Operation::Select),
        Statement::Insert(_) => Ok(Operation::Insert),
        Statement::Update { .. } => Ok(Operation::Update),
        Statement::Delete(_) => Ok(Operation::Delete),
        Statement::CreateTable(_)
        | Statement::CreateIndex(_)
        | Statement::CreateView { .. } => Ok(Operation::Create),
        Statement::AlterTable { .. } => Ok(Operation::Alter),
        Statement::Drop { object_type, .. } => match object_type {
            ObjectType::Table | ObjectType::View | ObjectType::Index => Ok(Operation::Drop),
            _ => Err(ValidateError::UnsupportedStatement),
        },
        Statement::Truncate { .. } => Ok(Operation::Drop),
        _ => Err(ValidateError::UnsupportedStatement),
    }
}

fn scan_identifiers(statement: &Statement) -> Result<(), ValidateError> {
    // DDL targets are not guaranteed to surface as relations in the visitor
    // walk, so check them explicitly.
    match statement {
        Statement::CreateTable(create) => check_object_name(&create.name)?,
        Statement::CreateIndex(create) => {
            if let Some(name) = &create.name {
                check_object_name(name)?;
            }
            check_object_name(&create.table_name)?;
        }
        Statement::CreateView { name, .. } => check_object_name(name)?,
        Statement::AlterTable { name, .. } => check_object_name(name)?,
        Statement::Drop { names, .. } => {
            for name in names {
                check_object_name(name)?;
            }
        }
        Statement::Truncate { table_names, .. } => {
            for target in table_names {
                check_object_name(&target.name)?;
            }
        }
        _ => {}
    }

    let mut scanner = IdentScanner;
    match statement.visit(&mut scanner) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(err) => Err(err),
    }
}

struct IdentScanner;

impl Visitor for IdentScanner {
    type Break = ValidateError;

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        into_flow(check_object_name(relation))
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        let checked = match expr {
            Expr::Identifier(ident) => check_ident(ident),
            // A compound identifier in expression position qualifies a
            // column by table or alias, not by schema; only the
            // system-object rule applies to its parts.
            Expr::CompoundIdentifier(parts) => parts.iter().try_for_each(check_ident),
            Expr::Function(function) => check_object_name(&function.name),
            _ => Ok(()),
        };
        into_flow(checked)
    }
}

fn into_flow(result: Result<(), ValidateError>) -> ControlFlow<ValidateError> {
    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(err) => ControlFlow::Break(err),
    }
}

fn check_object_name(name: &ObjectName) -> Result<(), ValidateError> {
    name.0.iter().try_for_each(check_ident)?;
    if name.0.len() > 1 && name.0[0].value != HELPERS_SCHEMA {
        return Err(ValidateError::QualifiedName);
    }
    Ok(())
}

fn check_ident(ident: &Ident) -> Result<(), ValidateError> {
    let value = ident.value.to_ascii_lowercase();
    if value.starts_with("pg_") || value == "information_schema" {
        return Err(ValidateError::SystemObject);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use uuid::Uuid;

    use super::*;
    use crate::database::models::Backend;

    fn policy_with(ops: &[Operation]) -> Policy {
        Policy {
            tenant_id: Uuid::nil(),
            backend: Backend::Shared {
                schema_name: "tenant_test".to_string(),
            },
            max_rows: 1000,
            allowed_ops: ops.iter().copied().collect(),
            token_id: Uuid::nil(),
        }
    }

    fn all_ops() -> Policy {
        policy_with(&Operation::ALL)
    }

    #[test]
    fn classifies_the_operation_vocabulary() {
        let cases = [
            ("SELECT 1", Operation::Select),
            ("SELECT * FROM orders WHERE id = $1", Operation::Select),
            ("WITH x AS (SELECT 1) SELECT * FROM x", Operation::Select),
            ("INSERT INTO orders (id) VALUES (1)", Operation::Insert),
            ("UPDATE orders SET total = 2 WHERE id = 1", Operation::Update),
            ("DELETE FROM orders WHERE id = 1", Operation::Delete),
            ("CREATE TABLE orders (id int)", Operation::Create),
            ("CREATE INDEX orders_id ON orders (id)", Operation::Create),
            ("CREATE VIEW big AS SELECT * FROM orders", Operation::Create),
            ("ALTER TABLE orders ADD COLUMN note text", Operation::Alter),
            ("DROP TABLE orders", Operation::Drop),
            ("DROP VIEW big", Operation::Drop),
            ("TRUNCATE orders", Operation::Drop),
        ];
        for (sql, expected) in cases {
            let parsed = validate(sql, &all_ops()).unwrap_or_else(|e| panic!("{sql}: {e}"));
            assert_eq!(parsed.operation, expected, "{sql}");
            assert_eq!(parsed.sql, sql);
        }
    }

    #[test]
    fn rejects_empty_and_multiple_statements() {
        assert_eq!(validate("", &all_ops()), Err(ValidateError::Empty));
        assert_eq!(validate("   ", &all_ops()), Err(ValidateError::Empty));
        assert_eq!(
            validate("SELECT 1; DROP TABLE t", &all_ops()),
            Err(ValidateError::MultipleStatements)
        );
    }

    #[test]
    fn trailing_semicolon_is_still_one_statement() {
        assert!(validate("SELECT 1;", &all_ops()).is_ok());
    }

    #[test]
    fn rejects_unsupported_statement_kinds() {
        for sql in [
            "BEGIN",
            "COMMIT",
            "SET search_path TO public",
            "GRANT SELECT ON t TO someone",
            "DROP SCHEMA tenant_x",
            "DROP SEQUENCE s",
        ] {
            assert_eq!(
                validate(sql, &all_ops()),
                Err(ValidateError::UnsupportedStatement),
                "{sql}"
            );
        }
        // Maintenance commands are rejected whether or not the parser even
        // has a statement kind for them.
        for sql in ["VACUUM orders", "COPY orders FROM '/tmp/x'"] {
            assert!(validate(sql, &all_ops()).is_err(), "{sql}");
        }
    }

    #[test]
    fn rejects_garbage_as_syntax_error() {
        assert!(matches!(
            validate("NOT REALLY SQL AT ALL (", &all_ops()),
            Err(ValidateError::Syntax(_))
        ));
    }

    #[test]
    fn enforces_the_policy_operation_set() {
        let read_only = policy_with(&[Operation::Select]);
        assert!(validate("SELECT 1", &read_only).is_ok());
        assert_eq!(
            validate("UPDATE t SET x = 1", &read_only),
            Err(ValidateError::OperationDenied(Operation::Update))
        );
        assert_eq!(
            validate("CREATE TABLE t (x int)", &read_only),
            Err(ValidateError::OperationDenied(Operation::Create))
        );
    }

    #[test]
    fn rejects_schema_qualified_names() {
        for sql in [
            "SELECT * FROM public.postgate_tokens",
            "SELECT * FROM other_schema.orders",
            "INSERT INTO public.t (x) VALUES (1)",
            "UPDATE public.t SET x = 1",
            "DELETE FROM public.t",
            "DROP TABLE public.t",
            "TRUNCATE public.t",
            "CREATE TABLE public.t (x int)",
            "ALTER TABLE public.t ADD COLUMN y int",
            "SELECT other_schema.secret_fn()",
        ] {
            assert_eq!(
                validate(sql, &all_ops()),
                Err(ValidateError::QualifiedName),
                "{sql}"
            );
        }
    }

    #[test]
    fn allows_the_helpers_schema() {
        assert!(validate("SELECT * FROM postgate_helpers.list_tables()", &all_ops()).is_ok());
        assert!(
            validate("SELECT * FROM postgate_helpers.describe_table('t')", &all_ops()).is_ok()
        );
    }

    #[test]
    fn rejects_system_objects_anywhere() {
        for sql in [
            "SELECT * FROM pg_catalog.pg_tables",
            "SELECT * FROM pg_tables",
            "SELECT * FROM information_schema.tables",
            "SELECT pg_sleep(10)",
            "SELECT * FROM t JOIN pg_class c ON c.oid = t.id",
            "SELECT t.pg_secret FROM t",
            "DROP TABLE pg_depend",
        ] {
            assert_eq!(
                validate(sql, &all_ops()),
                Err(ValidateError::SystemObject),
                "{sql}"
            );
        }
    }

    #[test]
    fn system_object_check_ignores_case_and_quoting() {
        assert_eq!(
            validate("SELECT * FROM PG_TABLES", &all_ops()),
            Err(ValidateError::SystemObject)
        );
        assert_eq!(
            validate("SELECT * FROM \"pg_tables\"", &all_ops()),
            Err(ValidateError::SystemObject)
        );
        assert_eq!(
            validate("SELECT * FROM \"Information_Schema\".tables", &all_ops()),
            Err(ValidateError::SystemObject)
        );
    }

    #[test]
    fn scans_subqueries_and_ctes() {
        assert_eq!(
            validate(
                "SELECT * FROM t WHERE id IN (SELECT id FROM public.other)",
                &all_ops()
            ),
            Err(ValidateError::QualifiedName)
        );
        assert_eq!(
            validate(
                "WITH x AS (SELECT * FROM information_schema.tables) SELECT * FROM x",
                &all_ops()
            ),
            Err(ValidateError::SystemObject)
        );
        assert_eq!(
            validate("INSERT INTO t SELECT * FROM public.other", &all_ops()),
            Err(ValidateError::QualifiedName)
        );
    }

    #[test]
    fn alias_qualified_columns_are_fine() {
        assert!(validate("SELECT o.id FROM orders o", &all_ops()).is_ok());
        assert!(
            validate(
                "SELECT a.id, b.id FROM orders a JOIN items b ON a.id = b.order_id",
                &all_ops()
            )
            .is_ok()
        );
    }

    #[test]
    fn admin_functions_are_plain_unqualified_calls() {
        let admin = all_ops();
        assert!(validate(
            "SELECT * FROM create_tenant_database($1, $2::int)",
            &admin
        )
        .is_ok());
        assert!(validate(
            "SELECT * FROM create_tenant_token($1::uuid, 'rw', ARRAY['SELECT','INSERT'])",
            &admin
        )
        .is_ok());
        assert!(validate("SELECT delete_tenant_token($1::uuid)", &admin).is_ok());
    }
}
