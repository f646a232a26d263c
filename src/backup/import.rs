//! Backup import
//!
//! The whole import is one transaction: it either lands completely or not at
//! all. Tables are written in dependency order regardless of the key order in
//! the file.

use super::codec::{build_insert, InsertStatement};
use super::dependency::restore_order;
use super::tables::TableSpec;
use crate::db::queries::SqlBuilder;
use crate::db::{deadline, with_deadline, ConnectionProvider, ConnectionScope};
use crate::error::{validation_error, AppError, AppResult, ParamSummary};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    pub delete_existing: bool,
    pub upsert: bool,
}

impl ImportOptions {
    /// Upsert is implied when neither flag was given
    pub fn resolved(self) -> Self {
        Self {
            delete_existing: self.delete_existing,
            upsert: self.upsert || !self.delete_existing,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub truncated: bool,
    pub upsert: bool,
    pub rows: BTreeMap<String, usize>,
}

/// Tables of a parsed backup document in restore order, with their rows
pub fn plan_import(document: &Value) -> AppResult<Vec<(&'static TableSpec, Vec<&Map<String, Value>>)>> {
    let object = document
        .as_object()
        .ok_or_else(|| validation_error("backup must be a JSON object of table name to rows"))?;

    let order = restore_order()?;
    let unknown: Vec<&str> = object
        .keys()
        .filter(|name| !order.iter().any(|t| t.name == name.as_str()))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::UnknownTable(unknown.join(", ")));
    }

    let mut planned = Vec::new();
    for spec in order {
        let Some(value) = object.get(spec.name) else {
            continue;
        };
        let rows = value
            .as_array()
            .ok_or_else(|| validation_error(format!("{}: expected an array of rows", spec.name)))?;
        let rows = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.as_object().ok_or_else(|| {
                    validation_error(format!("{}[{}]: expected a row object", spec.name, i))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        planned.push((*spec, rows));
    }
    Ok(planned)
}

/// Build every statement up front so bad rows fail before any write
fn build_statements(
    planned: &[(&'static TableSpec, Vec<&Map<String, Value>>)],
    upsert: bool,
) -> AppResult<Vec<(&'static str, Vec<InsertStatement>)>> {
    planned
        .iter()
        .map(|(spec, rows)| {
            let statements = rows
                .iter()
                .map(|row| build_insert(spec, row, upsert))
                .collect::<AppResult<Vec<_>>>()?;
            Ok((spec.name, statements))
        })
        .collect()
}

pub async fn import(
    provider: &ConnectionProvider,
    document: &Value,
    options: ImportOptions,
) -> AppResult<ImportReport> {
    let options = options.resolved();
    let schema = provider.settings().schema.clone();
    SqlBuilder::validate_ident("schema", &schema)?;

    let planned = plan_import(document)?;
    let statements = build_statements(&planned, options.upsert)?;

    // TRUNCATE needs table ownership, which only the admin identity has
    let scope = if options.delete_existing {
        provider.require_admin()?;
        ConnectionScope::AdminTarget
    } else {
        ConnectionScope::AppTarget
    };

    let mut client = provider.client(scope).await?;
    let rows = with_deadline("restore", deadline::RESTORE, async {
        let tx = client.transaction().await?;
        tx.batch_execute(&format!(
            "SET LOCAL search_path TO {}",
            SqlBuilder::quote_ident(&schema)
        ))
        .await?;

        if options.delete_existing {
            let order = restore_order()?;
            let names: Vec<&str> = order.iter().map(|t| t.name).collect();
            warn!("restore: truncating {} tables", names.len());
            tx.batch_execute(&SqlBuilder::truncate_tables(&names)).await?;
        }

        let mut rows = BTreeMap::new();
        for (table, table_statements) in &statements {
            for (i, statement) in table_statements.iter().enumerate() {
                tx.execute(statement.sql.as_str(), &statement.params())
                    .await
                    .map_err(|e| {
                        AppError::from(e).context(
                            "restore row",
                            &[
                                ParamSummary::Name("table", table),
                                ParamSummary::Int("row", i as i64),
                            ],
                        )
                    })?;
            }
            info!("restore: {} rows into {}", table_statements.len(), table);
            rows.insert(table.to_string(), table_statements.len());
        }

        tx.commit().await?;
        Ok(rows)
    })
    .await?;

    Ok(ImportReport {
        truncated: options.delete_existing,
        upsert: options.upsert,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ROLE: &str = "r1";

    fn fixture() -> Value {
        // keys deliberately in reverse dependency order
        json!({
            "tasks": [
                {"id": "6f1c3f0e-6c4b-4e4f-9a57-0d4a2b8f1e11", "command": "build", "variant": "v1"},
                {"id": "0b7d3d5e-1f7a-4c1e-8d3b-2f5c6a7b8c9d", "command": "test", "variant": "v2"}
            ],
            "task_variants": [{"variant": "v1", "workflow_id": "w1"}, {"variant": "v2", "workflow_id": "w1"}],
            "workflows": [{"name": "w1", "title": "W1"}],
            "projects": [{"name": "p1", "role_name": ROLE}],
            "roles": [{"name": ROLE, "title": "Role one"}]
        })
    }

    #[test]
    fn test_resolved_defaults_to_upsert() {
        assert!(ImportOptions::default().resolved().upsert);
        let delete_only = ImportOptions { delete_existing: true, upsert: false }.resolved();
        assert!(!delete_only.upsert);
        let both = ImportOptions { delete_existing: true, upsert: true }.resolved();
        assert!(both.upsert && both.delete_existing);
    }

    #[test]
    fn test_plan_follows_dependency_order_not_file_order() {
        let doc = fixture();
        let names: Vec<_> = plan_import(&doc).unwrap().iter().map(|(s, _)| s.name).collect();
        assert_eq!(names, vec!["roles", "workflows", "projects", "task_variants", "tasks"]);
    }

    #[test]
    fn test_all_unknown_tables_are_reported_together() {
        let doc = json!({"roles": [], "users": [], "sessions": []});
        let err = plan_import(&doc).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_TABLE");
        let msg = err.to_string();
        assert!(msg.contains("users") && msg.contains("sessions"));
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert_eq!(plan_import(&json!([])).unwrap_err().code(), "VALIDATION_ERROR");
        assert_eq!(
            plan_import(&json!({"roles": {"name": "r1"}})).unwrap_err().code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            plan_import(&json!({"roles": ["r1"]})).unwrap_err().code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_statements_are_built_before_any_write() {
        let doc = fixture();
        let planned = plan_import(&doc).unwrap();
        let statements = build_statements(&planned, true).unwrap();
        let tasks = statements.iter().find(|(t, _)| *t == "tasks").unwrap();
        assert_eq!(tasks.1.len(), 2);
        assert!(tasks.1[0].sql.starts_with("INSERT INTO \"tasks\""));

        let bad = json!({"scripts_content": [{"id": 42}]});
        let planned = plan_import(&bad).unwrap();
        assert!(build_statements(&planned, true).is_err());
    }

    #[tokio::test]
    async fn test_delete_existing_requires_admin() {
        let settings = crate::config::PostgresConfig::default();
        let provider = ConnectionProvider::new(&settings);
        let options = ImportOptions { delete_existing: true, upsert: false };
        let err = import(&provider, &fixture(), options).await.unwrap_err();
        assert!(matches!(err, AppError::MissingCredentials(_)));
    }
}
