//! Provisioning executor (`scaffold`)
//!
//! Intents are turned into an ordered list of ensure steps first, then the
//! steps run one by one. The first failure stops the run; earlier steps stay
//! applied, which is safe because each of them is idempotent.

use super::catalog;
use super::types::DesiredState;
use crate::config::PostgresConfig;
use crate::db::queries::SqlBuilder;
use crate::db::{deadline, with_deadline, ConnectionProvider, ConnectionScope};
use crate::error::{confirmation_required, AppError, AppResult, ParamSummary};
use crate::schema;
use serde::Serialize;
use tokio_postgres::Client;
use tracing::{info, warn};

/// Per-invocation scaffold flags
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaffoldOptions {
    pub create_roles: bool,
    pub create_db: bool,
    pub grant_privileges: bool,
    /// Implies every other intent plus the content table
    pub all: bool,
    pub yes: bool,
}

impl ScaffoldOptions {
    fn create_roles(&self) -> bool {
        self.all || self.create_roles
    }

    fn create_db(&self) -> bool {
        self.all || self.create_db
    }

    fn grant_privileges(&self) -> bool {
        self.all || self.grant_privileges
    }
}

/// Which configured identity a role step concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Admin,
    App,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaffoldStep {
    EnsureRole { kind: RoleKind, name: String },
    EnsureDatabase { name: String, owner: String },
    GrantConnect { database: String, role: String },
    GrantRuntimePrivileges { schema: String, role: String },
    ConvergeSchema { schema: String },
    EnsureContentSchema,
}

impl ScaffoldStep {
    pub fn scope(&self) -> ConnectionScope {
        match self {
            ScaffoldStep::EnsureRole { .. }
            | ScaffoldStep::EnsureDatabase { .. }
            | ScaffoldStep::GrantConnect { .. } => ConnectionScope::AdminMaintenance,
            _ => ConnectionScope::AdminTarget,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScaffoldStep::EnsureRole { kind, name } => {
                format!("ensure {:?} role {}", kind, name).to_lowercase()
            }
            ScaffoldStep::EnsureDatabase { name, owner } => {
                format!("ensure database {} owned by {}", name, owner)
            }
            ScaffoldStep::GrantConnect { database, role } => {
                format!("grant CONNECT on {} to {}", database, role)
            }
            ScaffoldStep::GrantRuntimePrivileges { schema, role } => {
                format!("grant runtime privileges on schema {} to {}", schema, role)
            }
            ScaffoldStep::ConvergeSchema { schema } => {
                format!("converge required tables and triggers in {}", schema)
            }
            ScaffoldStep::EnsureContentSchema => {
                "ensure content table and full-text index".to_string()
            }
        }
    }
}

/// Ordered steps for the requested intents
pub fn plan_steps(desired: &DesiredState, options: &ScaffoldOptions) -> Vec<ScaffoldStep> {
    let mut steps = Vec::new();

    if options.create_roles() || options.create_db() {
        steps.push(ScaffoldStep::EnsureRole {
            kind: RoleKind::Admin,
            name: desired.admin_role.clone(),
        });
        steps.push(ScaffoldStep::EnsureRole {
            kind: RoleKind::App,
            name: desired.app_role.clone(),
        });
    }

    if options.create_db() {
        steps.push(ScaffoldStep::EnsureDatabase {
            name: desired.database.clone(),
            owner: desired.admin_role.clone(),
        });
        if options.grant_privileges() {
            steps.push(ScaffoldStep::GrantConnect {
                database: desired.database.clone(),
                role: desired.app_role.clone(),
            });
        }
    }

    let grants = ScaffoldStep::GrantRuntimePrivileges {
        schema: desired.schema.clone(),
        role: desired.app_role.clone(),
    };
    if options.grant_privileges() {
        steps.push(grants.clone());
    }

    steps.push(ScaffoldStep::ConvergeSchema {
        schema: desired.schema.clone(),
    });

    if options.grant_privileges() {
        // tables created by convergence were not covered by the first pass
        steps.push(grants);
    }

    if options.all {
        steps.push(ScaffoldStep::EnsureContentSchema);
    }

    steps
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaffoldReport {
    pub applied: Vec<String>,
    pub created: Vec<String>,
    pub warnings: Vec<String>,
}

/// Run `scaffold`: validate, gate, then apply every step in order
pub async fn run_scaffold(
    provider: &ConnectionProvider,
    settings: &PostgresConfig,
    options: ScaffoldOptions,
) -> AppResult<ScaffoldReport> {
    provider.require_admin()?;
    let desired = DesiredState::from_settings(settings);
    desired.validate()?;

    let steps = plan_steps(&desired, &options);
    if !options.yes {
        for step in &steps {
            info!("scaffold would {}", step.describe());
        }
        return Err(confirmation_required(
            "scaffold changes the database; re-run with --yes",
        ));
    }

    let mut report = ScaffoldReport {
        applied: Vec::new(),
        created: Vec::new(),
        warnings: Vec::new(),
    };

    for step in &steps {
        let description = step.describe();
        info!("scaffold: {}", description);
        let client = provider.client(step.scope()).await?;
        with_deadline(&description, deadline::PROVISION, async {
            apply_step(&client, settings, step, &mut report).await
        })
        .await
        .map_err(|e| e.context("scaffold", &[ParamSummary::Name("step", &description)]))?;
        report.applied.push(description);
    }

    info!("scaffold: done ({} steps)", report.applied.len());
    Ok(report)
}

async fn apply_step(
    client: &Client,
    settings: &PostgresConfig,
    step: &ScaffoldStep,
    report: &mut ScaffoldReport,
) -> AppResult<()> {
    match step {
        ScaffoldStep::EnsureRole { kind, name } => {
            if catalog::role_exists(client, name).await? {
                return Ok(());
            }
            let password = match kind {
                RoleKind::Admin => settings.admin.effective_password(),
                RoleKind::App => settings.app.effective_password(),
            };
            if password.is_empty() {
                warn!("Creating role {} without a password", name);
            }
            client
                .batch_execute(&SqlBuilder::create_login_role(name, password))
                .await?;
            report.created.push(format!("role {}", name));
        }
        ScaffoldStep::EnsureDatabase { name, owner } => {
            if catalog::database_exists(client, name).await? {
                return Ok(());
            }
            client
                .batch_execute(&SqlBuilder::create_database(name, owner))
                .await?;
            report.created.push(format!("database {}", name));
        }
        ScaffoldStep::GrantConnect { database, role } => {
            client
                .batch_execute(&SqlBuilder::grant_connect(database, role))
                .await?;
        }
        ScaffoldStep::GrantRuntimePrivileges { schema, role } => {
            for stmt in SqlBuilder::runtime_grants(schema, role) {
                client.batch_execute(&stmt).await?;
            }
        }
        ScaffoldStep::ConvergeSchema { schema } => {
            schema::converge(client, schema).await?;
        }
        ScaffoldStep::EnsureContentSchema => {
            let warnings = schema::ensure_content_schema(client).await?;
            report.warnings.extend(warnings);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeReport {
    pub role: String,
    pub statements: usize,
}

/// Reverse of the runtime grants plus CONNECT on the database
pub async fn run_revoke(
    provider: &ConnectionProvider,
    settings: &PostgresConfig,
    yes: bool,
) -> AppResult<RevokeReport> {
    provider.require_admin()?;
    let desired = DesiredState::from_settings(settings);
    desired.validate()?;
    if !yes {
        return Err(confirmation_required(
            "revoke-privileges removes access for the app role; re-run with --yes",
        ));
    }

    let mut statements = SqlBuilder::revoke_runtime_grants(&desired.schema, &desired.app_role);
    statements.push(SqlBuilder::revoke_connect(&desired.database, &desired.app_role));

    info!("revoke-privileges: revoking app role {} privileges", desired.app_role);
    let client = provider.client(ConnectionScope::AdminTarget).await?;
    with_deadline("revoke privileges", deadline::PROVISION, async {
        for stmt in &statements {
            client.batch_execute(stmt).await.map_err(AppError::from)?;
        }
        Ok(())
    })
    .await?;

    Ok(RevokeReport {
        role: desired.app_role,
        statements: statements.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn desired() -> DesiredState {
        DesiredState::from_settings(&PostgresConfig::default())
    }

    fn kinds(steps: &[ScaffoldStep]) -> Vec<&'static str> {
        steps
            .iter()
            .map(|s| match s {
                ScaffoldStep::EnsureRole { kind: RoleKind::Admin, .. } => "admin-role",
                ScaffoldStep::EnsureRole { kind: RoleKind::App, .. } => "app-role",
                ScaffoldStep::EnsureDatabase { .. } => "database",
                ScaffoldStep::GrantConnect { .. } => "connect",
                ScaffoldStep::GrantRuntimePrivileges { .. } => "grants",
                ScaffoldStep::ConvergeSchema { .. } => "schema",
                ScaffoldStep::EnsureContentSchema => "content",
            })
            .collect()
    }

    #[test]
    fn test_all_runs_every_step_in_order() {
        let options = ScaffoldOptions { all: true, yes: true, ..Default::default() };
        let steps = plan_steps(&desired(), &options);
        assert_eq!(
            kinds(&steps),
            vec!["admin-role", "app-role", "database", "connect", "grants", "schema", "grants", "content"]
        );
    }

    #[test]
    fn test_no_intents_only_converges_schema() {
        let steps = plan_steps(&desired(), &ScaffoldOptions::default());
        assert_eq!(kinds(&steps), vec!["schema"]);
        assert_eq!(steps[0].scope(), ConnectionScope::AdminTarget);
    }

    #[test]
    fn test_create_db_without_grants_skips_connect() {
        let options = ScaffoldOptions { create_db: true, ..Default::default() };
        let steps = plan_steps(&desired(), &options);
        assert_eq!(kinds(&steps), vec!["admin-role", "app-role", "database", "schema"]);
        assert!(steps[..3].iter().all(|s| s.scope() == ConnectionScope::AdminMaintenance));
    }

    #[test]
    fn test_grants_wrap_schema_convergence() {
        let options = ScaffoldOptions { grant_privileges: true, ..Default::default() };
        let steps = plan_steps(&desired(), &options);
        assert_eq!(kinds(&steps), vec!["grants", "schema", "grants"]);
    }

    #[tokio::test]
    async fn test_missing_confirmation_fails_before_connecting() {
        let mut settings = PostgresConfig::default();
        settings.admin.password = "secret".into();
        let provider = ConnectionProvider::new(&settings);
        let options = ScaffoldOptions { all: true, ..Default::default() };
        let err = run_scaffold(&provider, &settings, options).await.unwrap_err();
        assert!(matches!(err, AppError::ConfirmationRequired(_)));
    }

    #[tokio::test]
    async fn test_missing_admin_credentials_fail_fast() {
        let settings = PostgresConfig::default();
        let provider = ConnectionProvider::new(&settings);
        let options = ScaffoldOptions { all: true, yes: true, ..Default::default() };
        let err = run_scaffold(&provider, &settings, options).await.unwrap_err();
        assert!(matches!(err, AppError::MissingCredentials(_)));

        let err = run_revoke(&provider, &settings, true).await.unwrap_err();
        assert!(matches!(err, AppError::MissingCredentials(_)));
    }
}
