//! Relational mirror for relationships the graph could not hold

use super::types::{EdgeKey, Relationship};
use crate::db::queries::SqlBuilder;
use crate::db::{ConnectionProvider, ConnectionScope};
use crate::error::AppResult;
use async_trait::async_trait;

#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn upsert(&self, relationship: &Relationship) -> AppResult<()>;

    async fn find(&self, key: &EdgeKey) -> AppResult<Option<Relationship>>;

    async fn delete(&self, key: &EdgeKey) -> AppResult<u64>;
}

/// `stickie_relations` in the configured schema
pub struct PgMirror<'a> {
    provider: &'a ConnectionProvider,
    table: String,
}

impl<'a> PgMirror<'a> {
    pub fn new(provider: &'a ConnectionProvider, schema: &str) -> AppResult<Self> {
        SqlBuilder::validate_ident("schema", schema)?;
        Ok(Self {
            provider,
            table: format!("{}.stickie_relations", SqlBuilder::quote_ident(schema)),
        })
    }
}

#[async_trait]
impl MirrorStore for PgMirror<'_> {
    async fn upsert(&self, relationship: &Relationship) -> AppResult<()> {
        let client = self.provider.client(ConnectionScope::AppTarget).await?;
        let sql = format!(
            "INSERT INTO {} (from_id, to_id, rel_type, labels) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (from_id, to_id, rel_type) DO UPDATE SET labels = EXCLUDED.labels",
            self.table
        );
        client
            .execute(
                &sql,
                &[
                    &relationship.from,
                    &relationship.to,
                    &relationship.rel_type.as_str(),
                    &relationship.labels,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, key: &EdgeKey) -> AppResult<Option<Relationship>> {
        let client = self.provider.client(ConnectionScope::AppTarget).await?;
        let sql = format!(
            "SELECT COALESCE(labels, ARRAY[]::text[]) FROM {} \
             WHERE from_id = $1 AND to_id = $2 AND rel_type = $3",
            self.table
        );
        let row = client
            .query_opt(&sql, &[&key.from, &key.to, &key.rel_type.as_str()])
            .await?;
        Ok(row.map(|row| Relationship::new(*key, row.get(0))))
    }

    async fn delete(&self, key: &EdgeKey) -> AppResult<u64> {
        let client = self.provider.client(ConnectionScope::AppTarget).await?;
        let sql = format!(
            "DELETE FROM {} WHERE from_id = $1 AND to_id = $2 AND rel_type = $3",
            self.table
        );
        let deleted = client
            .execute(&sql, &[&key.from, &key.to, &key.rel_type.as_str()])
            .await?;
        Ok(deleted)
    }
}
