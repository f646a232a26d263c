//! Graph extension (Apache AGE) initialisation and status

use super::catalog;
use crate::config::{GraphConfig, PostgresConfig};
use crate::db::queries::{self, SqlBuilder};
use crate::db::{deadline, with_deadline, ConnectionProvider, ConnectionScope};
use crate::error::{confirmation_required, AppResult};
use serde::Serialize;
use tokio_postgres::Client;
use tracing::{info, warn};

const AG_CATALOG: &str = "ag_catalog";

/// Statements giving the app role use of the catalog and the graph's own schema
pub fn graph_grants(graph: &str, role: &str) -> Vec<String> {
    let catalog = SqlBuilder::quote_ident(AG_CATALOG);
    let schema = SqlBuilder::quote_ident(graph);
    let role = SqlBuilder::quote_ident(role);
    vec![
        format!("GRANT USAGE ON SCHEMA {} TO {}", catalog, role),
        format!("GRANT USAGE, CREATE ON SCHEMA {} TO {}", schema, role),
        format!(
            "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {} TO {}",
            schema, role
        ),
        format!("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {} TO {}", schema, role),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {}",
            schema, role
        ),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT USAGE, SELECT ON SEQUENCES TO {}",
            schema, role
        ),
    ]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeInitReport {
    pub graph: String,
    pub graph_created: bool,
    pub warnings: Vec<String>,
}

/// Create the extension and graph if absent, then grant the app role access
pub async fn age_init(
    provider: &ConnectionProvider,
    settings: &PostgresConfig,
    graph: &GraphConfig,
    yes: bool,
) -> AppResult<AgeInitReport> {
    if !yes {
        return Err(confirmation_required(
            "age-init modifies the database; re-run with --yes",
        ));
    }
    provider.require_admin()?;
    SqlBuilder::validate_ident("graph", &graph.name)?;
    SqlBuilder::validate_ident("app role", &settings.app.user)?;

    let client = provider.client(ConnectionScope::AdminTarget).await?;
    with_deadline("age-init", deadline::GRAPH_INIT, async {
        info!("age-init: ensuring extension age");
        client.batch_execute("CREATE EXTENSION IF NOT EXISTS age").await?;

        let exists: bool = client
            .query_one(queries::AGE_GRAPH_EXISTS, &[&graph.name])
            .await?
            .get(0);
        if !exists {
            info!("age-init: creating graph {}", graph.name);
            client.query(queries::AGE_CREATE_GRAPH, &[&graph.name]).await?;
        }

        info!("age-init: granting graph privileges to {}", settings.app.user);
        let warnings = grant_graph_privileges(&client, &graph.name, &settings.app.user).await;

        Ok(AgeInitReport {
            graph: graph.name.clone(),
            graph_created: !exists,
            warnings,
        })
    })
    .await
}

async fn grant_graph_privileges(client: &Client, graph: &str, role: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    for stmt in graph_grants(graph, role) {
        if let Err(e) = client.batch_execute(&stmt).await {
            warn!("age-init: grant failed ({}): {}", stmt, e);
            warnings.push(format!("{}: {}", stmt, e));
        }
    }
    warnings
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeStatus {
    pub database: String,
    pub role: String,
    pub postgres_version: Option<String>,
    pub extension_installed: bool,
    pub age_version: Option<String>,
    pub graph: String,
    pub graph_exists: bool,
    pub catalog_usage: bool,
    pub graph_usage: bool,
}

/// Report extension, graph and privilege state as seen by the app role
pub async fn age_status(
    provider: &ConnectionProvider,
    settings: &PostgresConfig,
    graph: &GraphConfig,
) -> AppResult<AgeStatus> {
    let client = provider.client(ConnectionScope::AppTarget).await?;
    with_deadline("age-status", deadline::PROBE, async {
        let role = settings.app.user.as_str();
        let mut status = AgeStatus {
            database: settings.dbname.clone(),
            role: role.to_string(),
            graph: graph.name.clone(),
            ..Default::default()
        };

        status.postgres_version = catalog::server_version(&client).await.ok();
        status.age_version = client
            .query_opt(queries::AGE_EXTENSION_VERSION, &[])
            .await?
            .map(|row| row.get(0));
        status.extension_installed = status.age_version.is_some();

        if status.extension_installed {
            status.graph_exists = client
                .query_one(queries::AGE_GRAPH_EXISTS, &[&graph.name])
                .await?
                .get(0);
            status.catalog_usage = catalog::has_schema_usage(&client, role, AG_CATALOG).await?;
        }
        if status.graph_exists {
            status.graph_usage = catalog::has_schema_usage(&client, role, &graph.name).await?;
        }

        info!(
            "AGE installed: {}, graph {} exists: {}, ag_catalog usage: {}, graph usage: {}",
            status.extension_installed,
            status.graph,
            status.graph_exists,
            status.catalog_usage,
            status.graph_usage
        );
        Ok(status)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_graph_grants_cover_catalog_and_graph_schema() {
        let grants = graph_grants("rbc_graph", "rbc_app");
        assert_eq!(grants[0], "GRANT USAGE ON SCHEMA \"ag_catalog\" TO \"rbc_app\"");
        assert!(grants[1].contains("CREATE ON SCHEMA \"rbc_graph\""));
        assert!(grants.iter().skip(1).all(|g| g.contains("\"rbc_graph\"")));
    }

    #[tokio::test]
    async fn test_age_init_requires_yes() {
        let settings = PostgresConfig::default();
        let provider = ConnectionProvider::new(&settings);
        let err = age_init(&provider, &settings, &GraphConfig::default(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConfirmationRequired(_)));
    }

    #[tokio::test]
    async fn test_age_init_rejects_unsafe_graph_name() {
        let mut settings = PostgresConfig::default();
        settings.admin.password = "secret".into();
        let provider = ConnectionProvider::new(&settings);
        let graph = GraphConfig {
            name: "g'); DROP TABLE x; --".into(),
            ..Default::default()
        };
        let err = age_init(&provider, &settings, &graph, true).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
