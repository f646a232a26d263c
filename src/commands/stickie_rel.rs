//! `stickie-rel` commands

use super::{confirm_interactively, print_json, required};
use crate::config::Settings;
use crate::db::ConnectionProvider;
use crate::error::{validation_error, AppError, AppResult};
use crate::relationship::{
    normalize_labels, AgeGraph, Direction, EdgeKey, PgMirror, RelationType, Relationship,
    RelationshipManager,
};
use clap::{Args, Subcommand};
use tracing::info;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum StickieRelCommands {
    /// Create or update a relationship between two stickies
    Set(SetArgs),
    /// Get one relationship from the graph
    Get(KeyArgs),
    /// List relationships of a stickie
    List(ListArgs),
    /// Delete a relationship
    Delete(DeleteArgs),
}

#[derive(Args)]
pub struct KeyArgs {
    /// From stickie UUID
    #[arg(long)]
    pub from: Option<String>,

    /// To stickie UUID
    #[arg(long)]
    pub to: Option<String>,

    /// includes|causes|uses|represents|contrasts_with
    #[arg(long = "type")]
    pub rel_type: Option<String>,
}

impl KeyArgs {
    pub fn edge_key(&self) -> AppResult<EdgeKey> {
        let from = required("from", &self.from)?;
        let to = required("to", &self.to)?;
        let rel_type = required("type", &self.rel_type)?;
        EdgeKey::parse(from, to, rel_type)
    }
}

#[derive(Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Labels, comma separated or repeated
    #[arg(long = "labels", alias = "label")]
    pub labels: Vec<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Stickie UUID
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long, value_enum, default_value_t = Direction::Out)]
    pub direction: Direction,

    /// Only these relation types, comma separated or repeated
    #[arg(long = "types", alias = "type")]
    pub types: Vec<String>,
}

impl ListArgs {
    fn stickie_id(&self) -> AppResult<Uuid> {
        let id = required("id", &self.id)?;
        Uuid::parse_str(id).map_err(|_| validation_error("--id must be a stickie UUID"))
    }

    fn relation_types(&self) -> AppResult<Vec<RelationType>> {
        normalize_labels(&self.types)
            .iter()
            .map(|t| t.parse())
            .collect()
    }
}

#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub force: bool,

    /// Also remove the row from the relational mirror
    #[arg(long)]
    pub mirror: bool,
}

type Manager<'a> = RelationshipManager<AgeGraph<'a>, PgMirror<'a>>;

fn manager<'a>(settings: &Settings, provider: &'a ConnectionProvider) -> AppResult<Manager<'a>> {
    let graph = AgeGraph::new(provider, &settings.graph.name)?;
    let mirror = PgMirror::new(provider, &settings.postgres.schema)?;
    Ok(RelationshipManager::new(
        graph,
        mirror,
        settings.graph.allow_fallback,
    ))
}

/// Every input is validated before a connection is opened
pub async fn execute(
    settings: &Settings,
    provider: &ConnectionProvider,
    command: StickieRelCommands,
) -> AppResult<()> {
    match command {
        StickieRelCommands::Set(args) => {
            let key = args.key.edge_key()?;
            let relationship = Relationship::new(key, normalize_labels(&args.labels));
            let outcome = manager(settings, provider)?.set(relationship).await?;
            info!("relation {} stored in {:?}", key.rel_type, outcome.store);
            print_json(&outcome)
        }
        StickieRelCommands::Get(args) => {
            let key = args.edge_key()?;
            match manager(settings, provider)?.get(&key).await? {
                Some(relationship) => print_json(&relationship),
                None => Err(AppError::NotFound(format!(
                    "relationship {} -[{}]-> {}",
                    key.from, key.rel_type, key.to
                ))),
            }
        }
        StickieRelCommands::List(args) => {
            let id = args.stickie_id()?;
            let types = args.relation_types()?;
            let relationships = manager(settings, provider)?
                .list(id, args.direction, &types)
                .await?;
            info!("relations: {}", relationships.len());
            print_json(&relationships)
        }
        StickieRelCommands::Delete(args) => {
            let key = args.key.edge_key()?;
            if !args.force {
                confirm_interactively(&format!(
                    "About to delete relation {} -[{}]-> {}",
                    key.from, key.rel_type, key.to
                ))
                .await?;
            }
            let outcome = manager(settings, provider)?
                .delete(&key, args.mirror)
                .await?;
            match outcome.deleted_mirror {
                Some(mirror) => info!(
                    "relations deleted: graph={} mirror={}",
                    outcome.deleted_graph, mirror
                ),
                None => info!("relations deleted: graph={}", outcome.deleted_graph),
            }
            print_json(&outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const A: &str = "6f1c3f0e-6c4b-4e4f-9a57-0d4a2b8f1e11";
    const B: &str = "0b7d3d5e-1f7a-4c1e-8d3b-2f5c6a7b8c9d";

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: StickieRelCommands,
    }

    fn parse(args: &[&str]) -> StickieRelCommands {
        TestCli::try_parse_from(std::iter::once("stickie-rel").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_missing_flags_are_validation_errors() {
        let StickieRelCommands::Get(args) = parse(&["get", "--to", B, "--type", "uses"]) else {
            panic!("expected get");
        };
        let err = args.edge_key().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("--from"));
    }

    #[test]
    fn test_invalid_type_is_rejected_before_io() {
        let StickieRelCommands::Set(args) =
            parse(&["set", "--from", A, "--to", B, "--type", "likes"])
        else {
            panic!("expected set");
        };
        let err = args.key.edge_key().unwrap_err();
        assert_eq!(err.code(), "INVALID_RELATION_TYPE");
    }

    #[test]
    fn test_set_collects_labels() {
        let StickieRelCommands::Set(args) = parse(&[
            "set", "--from", A, "--to", B, "--type", "Causes", "--labels", "a, b", "--labels", "c",
        ]) else {
            panic!("expected set");
        };
        let key = args.key.edge_key().unwrap();
        assert_eq!(key.rel_type, RelationType::Causes);
        assert_eq!(normalize_labels(&args.labels), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_list_parses_direction_and_types() {
        let StickieRelCommands::List(args) = parse(&[
            "list", "--id", A, "--direction", "both", "--types", "uses,causes",
        ]) else {
            panic!("expected list");
        };
        assert_eq!(args.direction, Direction::Both);
        assert_eq!(
            args.relation_types().unwrap(),
            vec![RelationType::Uses, RelationType::Causes]
        );
        assert_eq!(args.stickie_id().unwrap().to_string(), A);

        let StickieRelCommands::List(args) = parse(&["list", "--id", "nope"]) else {
            panic!("expected list");
        };
        assert_eq!(args.direction, Direction::Out);
        assert!(args.stickie_id().is_err());
    }
}
