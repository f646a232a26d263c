//! Backup export

use super::codec;
use super::dependency::restore_order;
use super::tables::{find_table, TableSpec};
use crate::db::queries::SqlBuilder;
use crate::db::{deadline, with_deadline, ConnectionProvider, ConnectionScope};
use crate::error::{validation_error, AppError, AppResult, ParamSummary};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tokio_postgres::Client;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub initiated_by: Option<String>,
    pub retention_days: Option<u32>,
    /// Only these tables; empty means every managed table
    pub include: Vec<String>,
    /// Tables left out, applied after `include`
    pub exclude: Vec<String>,
}

impl ExportOptions {
    /// Managed tables to read, in restore order. Names match case-insensitively.
    pub fn selected_tables(&self) -> AppResult<Vec<&'static TableSpec>> {
        let include = table_names(&self.include)?;
        let exclude = table_names(&self.exclude)?;
        Ok(restore_order()?
            .iter()
            .copied()
            .filter(|spec| include.is_empty() || include.contains(&spec.name))
            .filter(|spec| !exclude.contains(&spec.name))
            .collect())
    }
}

fn table_names(names: &[String]) -> AppResult<Vec<&'static str>> {
    let mut found = Vec::new();
    let mut unknown = Vec::new();
    for name in names {
        match find_table(&name.trim().to_lowercase()) {
            Some(spec) => found.push(spec.name),
            None => unknown.push(name.as_str()),
        }
    }
    if !unknown.is_empty() {
        return Err(AppError::UnknownTable(unknown.join(", ")));
    }
    Ok(found)
}

/// Describes a backup; never part of the backup file itself
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_until: Option<DateTime<Utc>>,
    /// SHA-256 of the serialized table map
    pub checksum: String,
    pub counts: BTreeMap<String, usize>,
}

pub struct Backup {
    /// Serialized table map, ready to write
    pub data: Vec<u8>,
    pub metadata: BackupMetadata,
}

/// Read every managed table into a single JSON document
pub async fn export(provider: &ConnectionProvider, options: ExportOptions) -> AppResult<Backup> {
    let schema = provider.settings().schema.clone();
    SqlBuilder::validate_ident("schema", &schema)?;
    retention_until(options.retention_days, Utc::now())?;
    let tables = options.selected_tables()?;
    if tables.is_empty() {
        return Err(validation_error("--include/--exclude leave no table to back up"));
    }

    let client = provider.client(ConnectionScope::AppTarget).await?;
    let document = with_deadline("backup", deadline::EXPORT, async {
        let mut document = Map::new();
        for spec in &tables {
            let rows = read_table(&client, &schema, spec)
                .await
                .map_err(|e| e.context("backup read", &[ParamSummary::Name("table", spec.name)]))?;
            debug!("Exported {} rows from {}", rows.len(), spec.name);
            document.insert(spec.name.to_string(), Value::Array(rows));
        }
        Ok(document)
    })
    .await?;

    let data = serde_json::to_vec_pretty(&document)?;
    let counts = document
        .iter()
        .map(|(table, rows)| (table.clone(), rows.as_array().map_or(0, Vec::len)))
        .collect();
    let metadata = metadata(&data, counts, options, Utc::now())?;
    info!(
        "Backup {} exported {} tables ({} bytes)",
        metadata.id,
        document.len(),
        data.len()
    );
    Ok(Backup { data, metadata })
}

/// Row count of every managed table
pub async fn count_rows(provider: &ConnectionProvider) -> AppResult<BTreeMap<String, i64>> {
    let schema = provider.settings().schema.clone();
    SqlBuilder::validate_ident("schema", &schema)?;
    let tables = restore_order()?;

    let client = provider.client(ConnectionScope::AppTarget).await?;
    with_deadline("count", deadline::EXPORT, async {
        let mut counts = BTreeMap::new();
        for spec in tables {
            let sql = format!(
                "SELECT count(*) FROM {}.{}",
                SqlBuilder::quote_ident(&schema),
                SqlBuilder::quote_ident(spec.name)
            );
            let row = client.query_one(&sql, &[]).await?;
            counts.insert(spec.name.to_string(), row.get::<_, i64>(0));
        }
        Ok(counts)
    })
    .await
}

/// `to_jsonb` of every row plus the raw binary columns for client-side base64
fn select_statement(schema: &str, spec: &TableSpec) -> String {
    let mut selected = vec!["to_jsonb(t)".to_string()];
    selected.extend(
        spec.binary_columns()
            .map(|c| format!("t.{}", SqlBuilder::quote_ident(c.name))),
    );
    let order: Vec<String> = spec
        .sort_columns()
        .iter()
        .map(|c| format!("t.{}", SqlBuilder::quote_ident(c)))
        .collect();
    format!(
        "SELECT {} FROM {}.{} t ORDER BY {}",
        selected.join(", "),
        SqlBuilder::quote_ident(schema),
        SqlBuilder::quote_ident(spec.name),
        order.join(", ")
    )
}

async fn read_table(client: &Client, schema: &str, spec: &TableSpec) -> AppResult<Vec<Value>> {
    let rows = client.query(&select_statement(schema, spec), &[]).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = match row.get::<_, Value>(0) {
            Value::Object(object) => object,
            other => {
                return Err(AppError::Internal(format!(
                    "{}: to_jsonb returned {}",
                    spec.name, other
                )))
            }
        };
        for (i, column) in spec.binary_columns().enumerate() {
            let bytes: Option<Vec<u8>> = row.get(i + 1);
            codec::encode_binary(&mut object, column.name, bytes);
        }
        out.push(Value::Object(object));
    }
    Ok(out)
}

fn retention_until(days: Option<u32>, now: DateTime<Utc>) -> AppResult<Option<DateTime<Utc>>> {
    days.map(|days| {
        Duration::try_days(i64::from(days))
            .and_then(|retention| now.checked_add_signed(retention))
            .ok_or_else(|| validation_error("--retention-days out of range"))
    })
    .transpose()
}

fn metadata(
    data: &[u8],
    counts: BTreeMap<String, usize>,
    options: ExportOptions,
    now: DateTime<Utc>,
) -> AppResult<BackupMetadata> {
    let retention_until = retention_until(options.retention_days, now)?;
    Ok(BackupMetadata {
        id: Uuid::new_v4(),
        created_at: now,
        description: options.description,
        tags: options.tags,
        initiated_by: options.initiated_by,
        retention_until,
        checksum: format!("{:x}", Sha256::digest(data)),
        counts,
    })
}
