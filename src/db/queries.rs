//! SQL query constants and builders
//!
//! Catalog probes are parameterized. DDL and grant statements cannot take
//! bind parameters, so their identifiers are validated and quoted here.

use crate::error::{validation_error, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Does a role exist
pub const ROLE_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM pg_roles WHERE rolname = $1)";

/// Does a database exist
pub const DATABASE_EXISTS: &str = "SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)";

/// Can role $1 use schema $2
pub const SCHEMA_USAGE: &str = "SELECT has_schema_privilege($1::name, $2::text, 'USAGE')";

/// Is there any base table in schema $2 on which role $1 lacks one of the DML privileges
pub const MISSING_TABLE_DML: &str = r#"
    SELECT EXISTS(
        SELECT 1
        FROM information_schema.tables t
        WHERE t.table_schema::text = $2::text
            AND t.table_type = 'BASE TABLE'
            AND NOT (
                has_table_privilege($1::name, quote_ident(t.table_schema) || '.' || quote_ident(t.table_name), 'SELECT')
                AND has_table_privilege($1::name, quote_ident(t.table_schema) || '.' || quote_ident(t.table_name), 'INSERT')
                AND has_table_privilege($1::name, quote_ident(t.table_schema) || '.' || quote_ident(t.table_name), 'UPDATE')
                AND has_table_privilege($1::name, quote_ident(t.table_schema) || '.' || quote_ident(t.table_name), 'DELETE')
            )
    )
"#;

/// Is there any sequence in schema $2 on which role $1 lacks USAGE or SELECT
pub const MISSING_SEQUENCE_USAGE: &str = r#"
    SELECT EXISTS(
        SELECT 1
        FROM information_schema.sequences s
        WHERE s.sequence_schema::text = $2::text
            AND NOT (
                has_sequence_privilege($1::name, quote_ident(s.sequence_schema) || '.' || quote_ident(s.sequence_name), 'USAGE')
                AND has_sequence_privilege($1::name, quote_ident(s.sequence_schema) || '.' || quote_ident(s.sequence_name), 'SELECT')
            )
    )
"#;

/// Number of distinct default privileges granted to role $1 in schema $2
/// for object type $3 ('r' tables, 'S' sequences) among the privileges in $4
pub const DEFAULT_PRIVILEGE_COUNT: &str = r#"
    SELECT COUNT(DISTINCT a.privilege_type)
    FROM pg_default_acl d
    JOIN pg_namespace n ON n.oid = d.defaclnamespace
    CROSS JOIN LATERAL aclexplode(d.defaclacl) a
    JOIN pg_roles r ON r.oid = a.grantee
    WHERE r.rolname = $1::name
        AND n.nspname = $2::name
        AND d.defaclobjtype::text = $3
        AND a.privilege_type = ANY($4::text[])
"#;

/// Which of the names in $2 exist as tables in schema $1
pub const EXISTING_TABLES: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema::text = $1::text
        AND table_name::text = ANY($2::text[])
"#;

/// Which of the names in $2 exist as triggers in schema $1
pub const EXISTING_TRIGGERS: &str = r#"
    SELECT DISTINCT trigger_name::text
    FROM information_schema.triggers
    WHERE trigger_schema::text = $1::text
        AND trigger_name::text = ANY($2::text[])
"#;

/// Terminate every other session connected to database $1
pub const TERMINATE_CONNECTIONS: &str = r#"
    SELECT pg_terminate_backend(pid)
    FROM pg_stat_activity
    WHERE datname = $1
        AND pid <> pg_backend_pid()
"#;

pub const SERVER_VERSION: &str = "SELECT current_setting('server_version')";

pub const CURRENT_IDENTITY: &str = "SELECT current_database()::text, current_user::text";

/// Installed version of the graph extension
pub const AGE_EXTENSION_VERSION: &str =
    "SELECT extversion::text FROM pg_extension WHERE extname = 'age'";

/// Does graph $1 exist in the AGE catalog
pub const AGE_GRAPH_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM ag_catalog.ag_graph WHERE name = $1::name)";

pub const AGE_CREATE_GRAPH: &str = "SELECT ag_catalog.create_graph($1::name)";

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"));

/// PostgreSQL truncates identifiers beyond this length
const MAX_IDENT_LEN: usize = 63;

/// SQL builder for statements that cannot use bind parameters
pub struct SqlBuilder;

impl SqlBuilder {
    /// Reject anything but a plain identifier
    pub fn validate_ident(kind: &str, ident: &str) -> AppResult<()> {
        if ident.len() > MAX_IDENT_LEN || !IDENT_RE.is_match(ident) {
            return Err(validation_error(format!(
                "invalid {} name {:?}: expected [A-Za-z_][A-Za-z0-9_]* of at most {} characters",
                kind, ident, MAX_IDENT_LEN
            )));
        }
        Ok(())
    }

    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Quote a string literal (standard_conforming_strings)
    pub fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    pub fn create_login_role(name: &str, password: &str) -> String {
        if password.is_empty() {
            format!("CREATE ROLE {} LOGIN", Self::quote_ident(name))
        } else {
            format!(
                "CREATE ROLE {} LOGIN PASSWORD {}",
                Self::quote_ident(name),
                Self::quote_literal(password)
            )
        }
    }

    pub fn drop_role(name: &str) -> String {
        format!("DROP ROLE IF EXISTS {}", Self::quote_ident(name))
    }

    /// Drop objects owned by and privileges granted to a role in the current database
    pub fn drop_owned(role: &str) -> String {
        format!("DROP OWNED BY {}", Self::quote_ident(role))
    }

    /// Build CREATE DATABASE query
    pub fn create_database(name: &str, owner: &str) -> String {
        format!(
            "CREATE DATABASE {} OWNER {}",
            Self::quote_ident(name),
            Self::quote_ident(owner)
        )
    }

    /// Build DROP DATABASE query
    pub fn drop_database(name: &str) -> String {
        format!("DROP DATABASE IF EXISTS {}", Self::quote_ident(name))
    }

    pub fn grant_connect(database: &str, role: &str) -> String {
        format!(
            "GRANT CONNECT ON DATABASE {} TO {}",
            Self::quote_ident(database),
            Self::quote_ident(role)
        )
    }

    pub fn revoke_connect(database: &str, role: &str) -> String {
        format!(
            "REVOKE CONNECT ON DATABASE {} FROM {}",
            Self::quote_ident(database),
            Self::quote_ident(role)
        )
    }

    /// Schema usage, table DML (existing and future) and sequence usage for a runtime role
    pub fn runtime_grants(schema: &str, role: &str) -> Vec<String> {
        let schema = Self::quote_ident(schema);
        let role = Self::quote_ident(role);
        vec![
            format!("GRANT USAGE ON SCHEMA {} TO {}", schema, role),
            format!(
                "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {} TO {}",
                schema, role
            ),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {}",
                schema, role
            ),
            format!("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {} TO {}", schema, role),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT USAGE, SELECT ON SEQUENCES TO {}",
                schema, role
            ),
        ]
    }

    /// Exact reverse of `runtime_grants`
    pub fn revoke_runtime_grants(schema: &str, role: &str) -> Vec<String> {
        let schema = Self::quote_ident(schema);
        let role = Self::quote_ident(role);
        vec![
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {} REVOKE USAGE, SELECT ON SEQUENCES FROM {}",
                schema, role
            ),
            format!("REVOKE USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {} FROM {}", schema, role),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {} REVOKE SELECT, INSERT, UPDATE, DELETE ON TABLES FROM {}",
                schema, role
            ),
            format!(
                "REVOKE SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {} FROM {}",
                schema, role
            ),
            format!("REVOKE USAGE ON SCHEMA {} FROM {}", schema, role),
        ]
    }

    /// Drop and recreate a schema owned by `owner`
    pub fn reset_schema(schema: &str, owner: &str) -> Vec<String> {
        let schema = Self::quote_ident(schema);
        vec![
            format!("DROP SCHEMA IF EXISTS {} CASCADE", schema),
            format!("CREATE SCHEMA {} AUTHORIZATION {}", schema, Self::quote_ident(owner)),
        ]
    }

    /// Single-statement truncate of several tables
    pub fn truncate_tables(tables: &[&str]) -> String {
        let list: Vec<String> = tables.iter().map(|t| Self::quote_ident(t)).collect();
        format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", list.join(", "))
    }
}
