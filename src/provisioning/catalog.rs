//! Catalog probes
//!
//! Capability probes against `pg_roles`, `pg_database` and the privilege
//! functions. Grant records are never enumerated.

use crate::db::queries;
use crate::error::AppResult;
use tokio_postgres::Client;

pub async fn role_exists(client: &Client, role: &str) -> AppResult<bool> {
    let row = client.query_one(queries::ROLE_EXISTS, &[&role]).await?;
    Ok(row.get(0))
}

pub async fn database_exists(client: &Client, database: &str) -> AppResult<bool> {
    let row = client.query_one(queries::DATABASE_EXISTS, &[&database]).await?;
    Ok(row.get(0))
}

pub async fn has_schema_usage(client: &Client, role: &str, schema: &str) -> AppResult<bool> {
    let row = client.query_one(queries::SCHEMA_USAGE, &[&role, &schema]).await?;
    Ok(row.get(0))
}

/// True when some base table in `schema` lacks one of SELECT/INSERT/UPDATE/DELETE for `role`
pub async fn missing_table_dml(client: &Client, role: &str, schema: &str) -> AppResult<bool> {
    let row = client.query_one(queries::MISSING_TABLE_DML, &[&role, &schema]).await?;
    Ok(row.get(0))
}

pub async fn missing_sequence_usage(client: &Client, role: &str, schema: &str) -> AppResult<bool> {
    let row = client
        .query_one(queries::MISSING_SEQUENCE_USAGE, &[&role, &schema])
        .await?;
    Ok(row.get(0))
}

/// Do default privileges for future tables grant the full DML set to `role`
pub async fn has_default_table_privileges(
    client: &Client,
    role: &str,
    schema: &str,
) -> AppResult<bool> {
    let wanted = ["SELECT", "INSERT", "UPDATE", "DELETE"];
    default_privilege_count(client, role, schema, "r", &wanted)
        .await
        .map(|n| n == wanted.len() as i64)
}

/// Do default privileges for future sequences grant USAGE and SELECT to `role`
pub async fn has_default_sequence_privileges(
    client: &Client,
    role: &str,
    schema: &str,
) -> AppResult<bool> {
    let wanted = ["USAGE", "SELECT"];
    default_privilege_count(client, role, schema, "S", &wanted)
        .await
        .map(|n| n == wanted.len() as i64)
}

async fn default_privilege_count(
    client: &Client,
    role: &str,
    schema: &str,
    object_type: &str,
    privileges: &[&str],
) -> AppResult<i64> {
    let row = client
        .query_one(
            queries::DEFAULT_PRIVILEGE_COUNT,
            &[&role, &schema, &object_type, &privileges],
        )
        .await?;
    Ok(row.get(0))
}

pub async fn server_version(client: &Client) -> AppResult<String> {
    let row = client.query_one(queries::SERVER_VERSION, &[]).await?;
    Ok(row.get(0))
}

/// Database and user the connection is actually using
pub async fn current_identity(client: &Client) -> AppResult<(String, String)> {
    let row = client.query_one(queries::CURRENT_IDENTITY, &[]).await?;
    Ok((row.get(0), row.get(1)))
}
