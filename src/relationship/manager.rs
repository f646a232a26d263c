//! Relationship consistency manager
//!
//! Graph first. With fallback enabled a failed or unverifiable graph write is
//! mirrored into the relational table, so after a successful `set` at least
//! one store holds the record.

use super::graph::GraphStore;
use super::mirror::MirrorStore;
use super::types::{Direction, EdgeKey, RelationType, Relationship, StoreKind};
use crate::db::{deadline, with_deadline};
use crate::error::{AppError, AppResult, ParamSummary};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of `set`
#[derive(Debug, Clone, Serialize)]
pub struct SetOutcome {
    #[serde(flatten)]
    pub relationship: Relationship,
    pub store: StoreKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub from: Uuid,
    pub to: Uuid,
    #[serde(rename = "type")]
    pub rel_type: RelationType,
    pub deleted_graph: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_mirror: Option<u64>,
}

pub struct RelationshipManager<G, M> {
    graph: G,
    mirror: M,
    allow_fallback: bool,
}

impl<G: GraphStore, M: MirrorStore> RelationshipManager<G, M> {
    pub fn new(graph: G, mirror: M, allow_fallback: bool) -> Self {
        Self {
            graph,
            mirror,
            allow_fallback,
        }
    }

    /// Write an edge and verify it can be read back from some store
    pub async fn set(&self, relationship: Relationship) -> AppResult<SetOutcome> {
        let key = relationship.key();
        with_deadline("stickie-rel set", deadline::RELATIONSHIP, async {
            if let Err(e) = self.graph.merge_edge(&relationship).await {
                if !self.allow_fallback {
                    return Err(AppError::GraphWriteFailed(e.to_string()));
                }
                warn!("Graph edge write failed, falling back to mirror: {}", e);
            }

            let found = match self.graph.find_edge(&key).await {
                Ok(found) => found,
                Err(e) if self.allow_fallback => {
                    warn!("Graph read-back failed: {}", e);
                    None
                }
                Err(e) => return Err(e),
            };
            if found.is_some() {
                return Ok(SetOutcome {
                    relationship: relationship.clone(),
                    store: StoreKind::Graph,
                });
            }

            if !self.allow_fallback {
                return Err(AppError::ConsistencyVerificationFailed(
                    "edge not found in graph after write".to_string(),
                ));
            }

            info!("Mirroring {} relation into stickie_relations", key.rel_type);
            self.mirror.upsert(&relationship).await?;
            match self.mirror.find(&key).await? {
                Some(_) => Ok(SetOutcome {
                    relationship: relationship.clone(),
                    store: StoreKind::Mirror,
                }),
                None => Err(AppError::ConsistencyVerificationFailed(
                    "relation not found in graph or mirror after write".to_string(),
                )),
            }
        })
        .await
        .map_err(|e| with_key(e, "stickie-rel set", &key))
    }

    /// Graph only; a mirror-only relation is reported as absent
    pub async fn get(&self, key: &EdgeKey) -> AppResult<Option<Relationship>> {
        with_deadline("stickie-rel get", deadline::RELATIONSHIP, self.graph.find_edge(key))
            .await
            .map_err(|e| with_key(e, "stickie-rel get", key))
    }

    /// Edges touching `id`, optionally restricted to some types
    pub async fn list(
        &self,
        id: Uuid,
        direction: Direction,
        types: &[RelationType],
    ) -> AppResult<Vec<Relationship>> {
        let edges = with_deadline(
            "stickie-rel list",
            deadline::RELATIONSHIP,
            self.graph.list_edges(id, direction),
        )
        .await?;
        Ok(edges
            .into_iter()
            .filter(|e| types.is_empty() || types.contains(&e.rel_type))
            .collect())
    }

    /// Remove the edge from the graph. The mirror is left alone unless
    /// `include_mirror` is set, in which case a graph failure only warns.
    pub async fn delete(&self, key: &EdgeKey, include_mirror: bool) -> AppResult<DeleteOutcome> {
        with_deadline("stickie-rel delete", deadline::RELATIONSHIP, async {
            let deleted_graph = match self.graph.delete_edge(key).await {
                Ok(n) => n,
                Err(e) if include_mirror => {
                    warn!("Graph edge delete failed, continuing with mirror: {}", e);
                    0
                }
                Err(e) => return Err(e),
            };
            let deleted_mirror = if include_mirror {
                Some(self.mirror.delete(key).await?)
            } else {
                None
            };
            Ok(DeleteOutcome {
                from: key.from,
                to: key.to,
                rel_type: key.rel_type,
                deleted_graph,
                deleted_mirror,
            })
        })
        .await
        .map_err(|e| with_key(e, "stickie-rel delete", key))
    }
}

fn with_key(err: AppError, operation: &str, key: &EdgeKey) -> AppError {
    let from = key.from.to_string();
    let to = key.to.to_string();
    err.context(
        operation,
        &[
            ParamSummary::Str("from", &from),
            ParamSummary::Str("to", &to),
            ParamSummary::Name("type", key.rel_type.as_str()),
        ],
    )
}
