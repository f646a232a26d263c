//! Graph store backed by Apache AGE
//!
//! Cypher text cannot take bind parameters through `ag_catalog.cypher`, so
//! every value is embedded as an escaped literal. Stickie ids are UUIDs and
//! edge labels come from `RelationType`; only the free-form edge labels list
//! needs escaping.

use super::types::{Direction, EdgeKey, RelationType, Relationship};
use crate::db::queries::SqlBuilder;
use crate::db::{ConnectionProvider, ConnectionScope};
use crate::error::{validation_error, AppResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::Client;
use tracing::{debug, warn};
use uuid::Uuid;

/// Dollar-quote tag wrapping the cypher text
const CYPHER_TAG: &str = "$cypher$";

/// Where relationship edges are written first
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the edge, or replace its labels when it exists
    async fn merge_edge(&self, relationship: &Relationship) -> AppResult<()>;

    async fn find_edge(&self, key: &EdgeKey) -> AppResult<Option<Relationship>>;

    /// Number of edges removed
    async fn delete_edge(&self, key: &EdgeKey) -> AppResult<u64>;

    async fn list_edges(&self, id: Uuid, direction: Direction) -> AppResult<Vec<Relationship>>;
}

pub struct AgeGraph<'a> {
    provider: &'a ConnectionProvider,
    graph: String,
    session_ready: AtomicBool,
}

impl<'a> AgeGraph<'a> {
    pub fn new(provider: &'a ConnectionProvider, graph: &str) -> AppResult<Self> {
        SqlBuilder::validate_ident("graph", graph)?;
        Ok(Self {
            provider,
            graph: graph.to_string(),
            session_ready: AtomicBool::new(false),
        })
    }

    async fn client(&self) -> AppResult<deadpool_postgres::Object> {
        let client = self.provider.client(ConnectionScope::AppTarget).await?;
        if !self.session_ready.swap(true, Ordering::SeqCst) {
            prepare_session(&client).await;
        }
        Ok(client)
    }

    /// Wrap a cypher query returning `columns` agtype values, each cast to text
    fn sql(&self, cypher: &str, columns: &[&str]) -> String {
        let selected: Vec<String> = columns.iter().map(|c| format!("{}::text", c)).collect();
        let declared: Vec<String> = columns
            .iter()
            .map(|c| format!("{} ag_catalog.agtype", c))
            .collect();
        format!(
            "SELECT {} FROM ag_catalog.cypher({}, {tag} {} {tag}) AS ({})",
            selected.join(", "),
            SqlBuilder::quote_literal(&self.graph),
            cypher,
            declared.join(", "),
            tag = CYPHER_TAG,
        )
    }
}

/// `LOAD 'age'` is needed on some installs and refused on others
async fn prepare_session(client: &Client) {
    if let Err(e) = client.batch_execute("LOAD 'age'").await {
        debug!("LOAD 'age' skipped: {}", e);
    }
    if let Err(e) = client
        .batch_execute("SET search_path = ag_catalog, \"$user\", public")
        .await
    {
        warn!("Could not add ag_catalog to search_path: {}", e);
    }
}

/// Single-quoted cypher string literal
pub fn cypher_string(value: &str) -> AppResult<String> {
    if value.contains(CYPHER_TAG) {
        return Err(validation_error(format!(
            "label may not contain {}",
            CYPHER_TAG
        )));
    }
    Ok(format!(
        "'{}'",
        value.replace('\\', "\\\\").replace('\'', "\\'")
    ))
}

fn cypher_list(values: &[String]) -> AppResult<String> {
    let items = values
        .iter()
        .map(|v| cypher_string(v))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(format!("[{}]", items.join(", ")))
}

pub fn merge_cypher(relationship: &Relationship) -> AppResult<String> {
    Ok(format!(
        "MERGE (a:Stickie {{id: '{from}'}}) MERGE (b:Stickie {{id: '{to}'}}) \
         MERGE (a)-[r:{rel}]->(b) SET r.labels = {labels} RETURN r",
        from = relationship.from,
        to = relationship.to,
        rel = relationship.rel_type.as_str(),
        labels = cypher_list(&relationship.labels)?,
    ))
}

fn match_edge(key: &EdgeKey) -> String {
    format!(
        "MATCH (a:Stickie {{id: '{}'}})-[r:{}]->(b:Stickie {{id: '{}'}})",
        key.from,
        key.rel_type.as_str(),
        key.to
    )
}

fn list_cypher(id: Uuid, direction: Direction) -> Vec<String> {
    let out = format!("MATCH (a:Stickie {{id: '{}'}})-[r]->(b:Stickie)", id);
    let inbound = format!("MATCH (a:Stickie)-[r]->(b:Stickie {{id: '{}'}})", id);
    let patterns = match direction {
        Direction::Out => vec![out],
        Direction::In => vec![inbound],
        Direction::Both => vec![out, inbound],
    };
    patterns
        .into_iter()
        .map(|p| format!("{} RETURN a.id, b.id, type(r), r.labels", p))
        .collect()
}

/// Decode an agtype string (`"abc"`) rendered as text
fn agtype_string(text: &str) -> Option<String> {
    serde_json::from_str::<String>(text).ok()
}

/// Decode an agtype list of strings; null or missing means no labels
fn agtype_labels(text: Option<&str>) -> Vec<String> {
    text.and_then(|t| serde_json::from_str::<Option<Vec<String>>>(t).ok())
        .flatten()
        .unwrap_or_default()
}

#[async_trait]
impl GraphStore for AgeGraph<'_> {
    async fn merge_edge(&self, relationship: &Relationship) -> AppResult<()> {
        let cypher = merge_cypher(relationship)?;
        let client = self.client().await?;
        client.query(&self.sql(&cypher, &["r"]), &[]).await?;
        Ok(())
    }

    async fn find_edge(&self, key: &EdgeKey) -> AppResult<Option<Relationship>> {
        let cypher = format!("{} RETURN r.labels", match_edge(key));
        let client = self.client().await?;
        let rows = client.query(&self.sql(&cypher, &["labels"]), &[]).await?;
        Ok(rows.first().map(|row| {
            let labels: Option<String> = row.get(0);
            Relationship::new(*key, agtype_labels(labels.as_deref()))
        }))
    }

    async fn delete_edge(&self, key: &EdgeKey) -> AppResult<u64> {
        let cypher = format!("{} DELETE r RETURN 1", match_edge(key));
        let client = self.client().await?;
        let rows = client.query(&self.sql(&cypher, &["deleted"]), &[]).await?;
        Ok(rows.len() as u64)
    }

    async fn list_edges(&self, id: Uuid, direction: Direction) -> AppResult<Vec<Relationship>> {
        let client = self.client().await?;
        let mut edges = Vec::new();
        for cypher in list_cypher(id, direction) {
            let sql = self.sql(&cypher, &["from_id", "to_id", "rel_type", "labels"]);
            for row in client.query(&sql, &[]).await? {
                let from: Option<String> = row.get(0);
                let to: Option<String> = row.get(1);
                let rel: Option<String> = row.get(2);
                let labels: Option<String> = row.get(3);

                let parsed = (
                    from.as_deref().and_then(agtype_string).and_then(|s| Uuid::parse_str(&s).ok()),
                    to.as_deref().and_then(agtype_string).and_then(|s| Uuid::parse_str(&s).ok()),
                    rel.as_deref()
                        .and_then(agtype_string)
                        .and_then(|s| s.parse::<RelationType>().ok()),
                );
                match parsed {
                    (Some(from), Some(to), Some(rel_type)) => edges.push(Relationship {
                        from,
                        to,
                        rel_type,
                        labels: agtype_labels(labels.as_deref()),
                    }),
                    _ => debug!("Skipping graph edge outside the stickie relation set: {:?}", rel),
                }
            }
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn relationship(labels: &[&str]) -> Relationship {
        let key = EdgeKey::parse(
            "6f1c3f0e-6c4b-4e4f-9a57-0d4a2b8f1e11",
            "0b7d3d5e-1f7a-4c1e-8d3b-2f5c6a7b8c9d",
            "includes",
        )
        .unwrap();
        Relationship::new(key, labels.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_merge_cypher_embeds_escaped_labels() {
        let cypher = merge_cypher(&relationship(&["it's", "a\\b"])).unwrap();
        assert!(cypher.contains("MERGE (a)-[r:INCLUDES]->(b)"));
        assert!(cypher.contains(r"SET r.labels = ['it\'s', 'a\\b']"));
        assert!(cypher.contains("{id: '6f1c3f0e-6c4b-4e4f-9a57-0d4a2b8f1e11'}"));
    }

    #[test]
    fn test_label_cannot_break_out_of_dollar_quote() {
        let err = merge_cypher(&relationship(&["x $cypher$; DROP TABLE stickies; --"])).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_wrapped_query_shape() {
        let provider = ConnectionProvider::new(&crate::config::PostgresConfig::default());
        let graph = AgeGraph::new(&provider, "rbc_graph").unwrap();
        let sql = graph.sql("MATCH (n) RETURN n", &["n"]);
        assert_eq!(
            sql,
            "SELECT n::text FROM ag_catalog.cypher('rbc_graph', $cypher$ MATCH (n) RETURN n $cypher$) AS (n ag_catalog.agtype)"
        );
        assert!(AgeGraph::new(&provider, "bad-name").is_err());
    }

    #[test]
    fn test_agtype_decoding() {
        assert_eq!(agtype_string("\"USES\""), Some("USES".to_string()));
        assert_eq!(agtype_labels(Some("[\"a\", \"b\"]")), vec!["a", "b"]);
        assert!(agtype_labels(Some("null")).is_empty());
        assert!(agtype_labels(None).is_empty());
    }

    #[test]
    fn test_both_directions_issue_two_matches() {
        let id = Uuid::new_v4();
        assert_eq!(list_cypher(id, Direction::Out).len(), 1);
        let both = list_cypher(id, Direction::Both);
        assert_eq!(both.len(), 2);
        assert!(both[1].starts_with("MATCH (a:Stickie)-[r]->(b:Stickie {id:"));
    }
}
