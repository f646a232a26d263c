//! Destructive reset
//!
//! Always gated by `--force`. The database (or schema) step runs first,
//! role drops last, because a role that still owns objects cannot be dropped.

use super::types::DesiredState;
use crate::config::PostgresConfig;
use crate::db::queries::{self, SqlBuilder};
use crate::db::{deadline, with_deadline, ConnectionProvider, ConnectionScope};
use crate::error::{confirmation_required, AppResult, ParamSummary};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ResetOptions {
    pub force: bool,
    /// Drop the whole database; when false the schema is reset in place
    pub drop_db: bool,
    pub drop_app_role: bool,
    pub drop_admin_role: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            force: false,
            drop_db: true,
            drop_app_role: false,
            drop_admin_role: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetStep {
    TerminateConnections { database: String },
    DropDatabase { database: String },
    ResetSchema { schema: String, owner: String },
    /// Leftover privileges in a kept database would block the role drop
    ReleaseAppRole { database: String, role: String },
    DropRole { role: String },
}

impl ResetStep {
    pub fn scope(&self) -> ConnectionScope {
        match self {
            ResetStep::ResetSchema { .. } | ResetStep::ReleaseAppRole { .. } => {
                ConnectionScope::AdminTarget
            }
            _ => ConnectionScope::AdminMaintenance,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ResetStep::TerminateConnections { database } => {
                format!("terminate other connections to {}", database)
            }
            ResetStep::DropDatabase { database } => format!("drop database {}", database),
            ResetStep::ResetSchema { schema, .. } => format!("drop and recreate schema {}", schema),
            ResetStep::ReleaseAppRole { role, .. } => {
                format!("revoke privileges and owned objects of {}", role)
            }
            ResetStep::DropRole { role } => format!("drop role {}", role),
        }
    }
}

pub fn plan_steps(desired: &DesiredState, options: &ResetOptions) -> Vec<ResetStep> {
    let mut steps = Vec::new();

    if options.drop_db {
        steps.push(ResetStep::TerminateConnections {
            database: desired.database.clone(),
        });
        steps.push(ResetStep::DropDatabase {
            database: desired.database.clone(),
        });
    } else {
        steps.push(ResetStep::ResetSchema {
            schema: desired.schema.clone(),
            owner: desired.admin_role.clone(),
        });
    }

    if options.drop_app_role {
        if !options.drop_db {
            steps.push(ResetStep::ReleaseAppRole {
                database: desired.database.clone(),
                role: desired.app_role.clone(),
            });
        }
        steps.push(ResetStep::DropRole {
            role: desired.app_role.clone(),
        });
    }
    if options.drop_admin_role {
        steps.push(ResetStep::DropRole {
            role: desired.admin_role.clone(),
        });
    }

    steps
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub applied: Vec<String>,
    pub terminated_connections: u64,
}

/// Run `reset`. Without `force` nothing is opened or touched.
pub async fn run_reset(
    provider: &ConnectionProvider,
    settings: &PostgresConfig,
    options: ResetOptions,
) -> AppResult<ResetReport> {
    if !options.force {
        return Err(confirmation_required(
            "reset is destructive; re-run with --force",
        ));
    }
    provider.require_admin()?;
    let desired = DesiredState::from_settings(settings);
    desired.validate()?;

    if options.drop_admin_role {
        warn!(
            "Dropping admin role {}; later commands need other credentials",
            desired.admin_role
        );
    }

    let mut report = ResetReport {
        applied: Vec::new(),
        terminated_connections: 0,
    };

    for step in plan_steps(&desired, &options) {
        let description = step.describe();
        info!("reset: {}", description);

        if matches!(step, ResetStep::TerminateConnections { .. }) {
            // our own target-database session would keep the database in use
            provider.release(ConnectionScope::AdminTarget).await;
        }

        let client = provider.client(step.scope()).await?;
        let terminated = with_deadline(&description, deadline::PROVISION, async {
            match &step {
                ResetStep::TerminateConnections { database } => {
                    let rows = client
                        .query(queries::TERMINATE_CONNECTIONS, &[database])
                        .await?;
                    return Ok(rows.len() as u64);
                }
                ResetStep::DropDatabase { database } => {
                    client.batch_execute(&SqlBuilder::drop_database(database)).await?;
                }
                ResetStep::ResetSchema { schema, owner } => {
                    for stmt in SqlBuilder::reset_schema(schema, owner) {
                        client.batch_execute(&stmt).await?;
                    }
                }
                ResetStep::ReleaseAppRole { database, role } => {
                    client
                        .batch_execute(&SqlBuilder::revoke_connect(database, role))
                        .await?;
                    client.batch_execute(&SqlBuilder::drop_owned(role)).await?;
                }
                ResetStep::DropRole { role } => {
                    client.batch_execute(&SqlBuilder::drop_role(role)).await?;
                }
            }
            Ok(0)
        })
        .await
        .map_err(|e| e.context("reset", &[ParamSummary::Name("step", &description)]))?;

        report.terminated_connections += terminated;
        report.applied.push(description);
    }

    Ok(report)
}
