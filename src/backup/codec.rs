//! Row coercion and INSERT statement building
//!
//! Every value except binary columns is bound as text and cast on the
//! server, so one parameter type covers uuid, timestamptz, jsonb, interval
//! and the numeric columns alike.

use super::tables::{Coercion, Column, ConflictTarget, TableSpec};
use crate::db::queries::SqlBuilder;
use crate::error::{validation_error, AppResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use tokio_postgres::types::ToSql;

/// A bound statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum BoundParam {
    Text(Option<String>),
    Bytes(Option<Vec<u8>>),
}

impl BoundParam {
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            BoundParam::Text(value) => value as &(dyn ToSql + Sync),
            BoundParam::Bytes(value) => value as &(dyn ToSql + Sync),
        }
    }
}

/// Parameterized INSERT for one row
#[derive(Debug)]
pub struct InsertStatement {
    pub sql: String,
    pub params: Vec<BoundParam>,
}

impl InsertStatement {
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(BoundParam::as_sql).collect()
    }
}

fn placeholder(kind: Coercion, n: usize) -> String {
    match kind {
        Coercion::Text => format!("${}::text", n),
        Coercion::Uuid => format!("${}::text::uuid", n),
        Coercion::Timestamp => format!("${}::text::timestamptz", n),
        Coercion::Json => format!("${}::text::jsonb", n),
        Coercion::Bytes => format!("${}::bytea", n),
        Coercion::Interval => format!("${}::text::interval", n),
        Coercion::Int => format!("${}::text::integer", n),
        Coercion::Float => format!("${}::text::double precision", n),
        Coercion::Bool => format!("${}::text::boolean", n),
        Coercion::TextArray => format!(
            "CASE WHEN ${n}::text IS NULL THEN NULL \
             ELSE ARRAY(SELECT jsonb_array_elements_text(${n}::text::jsonb)) END",
            n = n
        ),
    }
}

/// Turn one serialized value into a bound parameter
pub fn coerce(table: &str, column: &Column, value: &Value) -> AppResult<BoundParam> {
    let invalid = |expected: &str| {
        validation_error(format!(
            "{}.{}: expected {}, got {}",
            table, column.name, expected, value
        ))
    };

    if value.is_null() {
        return Ok(match column.kind {
            Coercion::Bytes => BoundParam::Bytes(None),
            _ => BoundParam::Text(None),
        });
    }

    let param = match column.kind {
        Coercion::Bytes => {
            let encoded = value.as_str().ok_or_else(|| invalid("base64 string"))?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|_| invalid("base64 string"))?;
            BoundParam::Bytes(Some(bytes))
        }
        // nested JSON goes back in its native encoding
        Coercion::Json => BoundParam::Text(Some(value.to_string())),
        Coercion::TextArray => {
            let items = value.as_array().ok_or_else(|| invalid("array of strings"))?;
            if !items.iter().all(|item| item.is_string() || item.is_null()) {
                return Err(invalid("array of strings"));
            }
            BoundParam::Text(Some(value.to_string()))
        }
        Coercion::Int | Coercion::Float => match value {
            Value::Number(n) => BoundParam::Text(Some(n.to_string())),
            Value::String(s) => BoundParam::Text(Some(s.clone())),
            _ => return Err(invalid("number")),
        },
        Coercion::Bool => match value {
            Value::Bool(b) => BoundParam::Text(Some(b.to_string())),
            Value::String(s) => BoundParam::Text(Some(s.clone())),
            _ => return Err(invalid("boolean")),
        },
        Coercion::Text
        | Coercion::Uuid
        | Coercion::Timestamp
        | Coercion::Interval => match value {
            Value::String(s) => BoundParam::Text(Some(s.clone())),
            Value::Number(n) => BoundParam::Text(Some(n.to_string())),
            Value::Bool(b) => BoundParam::Text(Some(b.to_string())),
            _ => return Err(invalid("scalar")),
        },
    };
    Ok(param)
}

/// Build the INSERT for `row`. Only columns present in the row are written,
/// so table defaults apply to the rest.
pub fn build_insert(
    spec: &TableSpec,
    row: &Map<String, Value>,
    upsert: bool,
) -> AppResult<InsertStatement> {
    let present: Vec<&Column> = spec
        .columns
        .iter()
        .filter(|c| row.contains_key(c.name))
        .collect();
    if present.is_empty() {
        return Err(validation_error(format!(
            "{}: row has none of the table's columns",
            spec.name
        )));
    }

    let mut names = Vec::with_capacity(present.len());
    let mut placeholders = Vec::with_capacity(present.len());
    let mut params = Vec::with_capacity(present.len());
    for (i, column) in present.iter().enumerate() {
        names.push(SqlBuilder::quote_ident(column.name));
        placeholders.push(placeholder(column.kind, i + 1));
        params.push(coerce(spec.name, column, &row[column.name])?);
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        SqlBuilder::quote_ident(spec.name),
        names.join(", "),
        placeholders.join(", ")
    );
    sql.push_str(&conflict_clause(spec.conflict, &present, upsert));

    Ok(InsertStatement { sql, params })
}

fn conflict_clause(target: ConflictTarget, present: &[&Column], upsert: bool) -> String {
    const SKIP: &str = " ON CONFLICT DO NOTHING";
    let keys = target.columns();
    if !upsert || keys.is_empty() {
        return SKIP.to_string();
    }

    let updates: Vec<String> = present
        .iter()
        .filter(|c| !keys.contains(&c.name))
        .map(|c| {
            let ident = SqlBuilder::quote_ident(c.name);
            format!("{} = EXCLUDED.{}", ident, ident)
        })
        .collect();
    if updates.is_empty() {
        return SKIP.to_string();
    }

    let keys: Vec<String> = keys.iter().map(|k| SqlBuilder::quote_ident(k)).collect();
    format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        keys.join(", "),
        updates.join(", ")
    )
}

/// Replace binary column values with their base64 text
pub fn encode_binary(row: &mut Map<String, Value>, column: &str, bytes: Option<Vec<u8>>) {
    let value = bytes.map_or(Value::Null, |b| Value::String(STANDARD.encode(b)));
    row.insert(column.to_string(), value);
}
