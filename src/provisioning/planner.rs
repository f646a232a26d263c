//! Provisioning planner
//!
//! Read-only. Probes what it can reach, then diffs the observation against
//! the desired state. Unreachable scopes become warnings, never errors.

use super::catalog;
use super::types::{DesiredState, ObservedState, PlanItem, ProvisioningPlan};
use crate::db::queries::SqlBuilder;
use crate::db::{deadline, with_deadline, ConnectionProvider, ConnectionScope};
use crate::error::AppResult;
use crate::schema;
use tracing::{info, warn};

pub struct ProvisioningPlanner<'a> {
    provider: &'a ConnectionProvider,
    desired: DesiredState,
}

impl<'a> ProvisioningPlanner<'a> {
    pub fn new(provider: &'a ConnectionProvider, desired: DesiredState) -> Self {
        Self { provider, desired }
    }

    pub async fn run(&self) -> AppResult<ProvisioningPlan> {
        self.desired.validate()?;
        let observed = self.observe().await;
        Ok(Self::plan(&self.desired, &observed))
    }

    /// Probe the maintenance and target databases
    pub async fn observe(&self) -> ObservedState {
        let mut observed = ObservedState::default();
        let desired = &self.desired;

        let maintenance = with_deadline("probe roles and database", deadline::PROBE, async {
            let client = self.provider.client(ConnectionScope::AdminMaintenance).await?;
            let admin = catalog::role_exists(&client, &desired.admin_role).await?;
            let app = catalog::role_exists(&client, &desired.app_role).await?;
            let database = catalog::database_exists(&client, &desired.database).await?;
            Ok((admin, app, database))
        })
        .await;

        match maintenance {
            Ok((admin, app, database)) => {
                observed.admin_role_exists = Some(admin);
                observed.app_role_exists = Some(app);
                observed.database_exists = Some(database);
            }
            Err(e) => {
                warn!("Maintenance database unreachable, skipping role/database checks: {}", e);
                observed
                    .warnings
                    .push(format!("role and database checks skipped: {}", e));
            }
        }

        if observed.database_exists == Some(false) {
            observed
                .warnings
                .push("target database absent, privilege and schema checks skipped".to_string());
            return observed;
        }

        let mut last_error = None;
        for scope in [ConnectionScope::AdminTarget, ConnectionScope::AppTarget] {
            match self.observe_target(scope).await {
                Ok(target) => {
                    info!("Probed target database as {}", scope);
                    observed.schema_usage = target.schema_usage;
                    observed.table_dml_complete = target.table_dml_complete;
                    observed.default_table_privileges = target.default_table_privileges;
                    observed.sequence_usage_complete = target.sequence_usage_complete;
                    observed.default_sequence_privileges = target.default_sequence_privileges;
                    observed.missing_objects = target.missing_objects;
                    return observed;
                }
                Err(e) => {
                    warn!("Target database probe as {} failed: {}", scope, e);
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            observed
                .warnings
                .push(format!("privilege and schema checks skipped: {}", e));
        }
        observed
    }

    async fn observe_target(&self, scope: ConnectionScope) -> AppResult<ObservedState> {
        let desired = &self.desired;
        with_deadline("probe target database", deadline::PROBE, async {
            let client = self.provider.client(scope).await?;
            let role = desired.app_role.as_str();
            let schema_name = desired.schema.as_str();
            Ok(ObservedState {
                schema_usage: Some(catalog::has_schema_usage(&client, role, schema_name).await?),
                table_dml_complete: Some(
                    !catalog::missing_table_dml(&client, role, schema_name).await?,
                ),
                default_table_privileges: Some(
                    catalog::has_default_table_privileges(&client, role, schema_name).await?,
                ),
                sequence_usage_complete: Some(
                    !catalog::missing_sequence_usage(&client, role, schema_name).await?,
                ),
                default_sequence_privileges: Some(
                    catalog::has_default_sequence_privileges(&client, role, schema_name).await?,
                ),
                missing_objects: Some(schema::missing_objects(&client, schema_name).await?),
                ..Default::default()
            })
        })
        .await
    }

    /// Diff desired vs. observed. Unknown conditions produce no item.
    pub fn plan(desired: &DesiredState, observed: &ObservedState) -> ProvisioningPlan {
        let mut checks = Vec::new();
        let schema = SqlBuilder::quote_ident(&desired.schema);
        let app = SqlBuilder::quote_ident(&desired.app_role);

        let mut check = |known: Option<bool>, description: &str, target: &str, action: String| {
            match known {
                Some(true) => checks.push(PlanItem::satisfied(description, target)),
                Some(false) => checks.push(PlanItem::unmet(description, target, action)),
                None => {}
            }
        };

        check(
            observed.admin_role_exists,
            "admin role exists",
            desired.admin_role.as_str(),
            format!(
                "{} PASSWORD '<admin password>'",
                SqlBuilder::create_login_role(&desired.admin_role, "")
            ),
        );
        check(
            observed.app_role_exists,
            "app role exists",
            desired.app_role.as_str(),
            format!(
                "{} PASSWORD '<app password>'",
                SqlBuilder::create_login_role(&desired.app_role, "")
            ),
        );
        check(
            observed.database_exists,
            "database exists",
            desired.database.as_str(),
            format!(
                "{}; {}",
                SqlBuilder::create_database(&desired.database, &desired.admin_role),
                SqlBuilder::grant_connect(&desired.database, &desired.app_role)
            ),
        );
        check(
            observed.schema_usage,
            "app role has USAGE on schema",
            desired.schema.as_str(),
            format!("GRANT USAGE ON SCHEMA {} TO {}", schema, app),
        );
        check(
            observed.table_dml_complete,
            "app role has SELECT, INSERT, UPDATE, DELETE on all tables",
            desired.schema.as_str(),
            format!(
                "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {} TO {}",
                schema, app
            ),
        );
        check(
            observed.default_table_privileges,
            "default privileges cover future tables",
            desired.schema.as_str(),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {}",
                schema, app
            ),
        );
        check(
            observed.sequence_usage_complete,
            "app role has USAGE, SELECT on all sequences",
            desired.schema.as_str(),
            format!("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {} TO {}", schema, app),
        );
        check(
            observed.default_sequence_privileges,
            "default privileges cover future sequences",
            desired.schema.as_str(),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {} GRANT USAGE, SELECT ON SEQUENCES TO {}",
                schema, app
            ),
        );

        if let Some(missing) = &observed.missing_objects {
            let mut detail = Vec::new();
            if !missing.tables.is_empty() {
                detail.push(format!("tables: {}", missing.tables.join(", ")));
            }
            if !missing.triggers.is_empty() {
                detail.push(format!("triggers: {}", missing.triggers.join(", ")));
            }
            check(
                Some(missing.is_empty()),
                "required tables and triggers present",
                desired.schema.as_str(),
                format!(
                    "bootstrap schema with `rbc-admin db scaffold --yes` (missing {})",
                    detail.join("; ")
                ),
            );
        }

        ProvisioningPlan::new(checks, observed.warnings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresConfig;
    use crate::schema::MissingObjects;
    use pretty_assertions::assert_eq;

    fn desired() -> DesiredState {
        DesiredState::from_settings(&PostgresConfig::default())
    }

    fn converged() -> ObservedState {
        ObservedState {
            admin_role_exists: Some(true),
            app_role_exists: Some(true),
            database_exists: Some(true),
            schema_usage: Some(true),
            table_dml_complete: Some(true),
            default_table_privileges: Some(true),
            sequence_usage_complete: Some(true),
            default_sequence_privileges: Some(true),
            missing_objects: Some(MissingObjects::default()),
            warnings: vec![],
        }
    }

    #[test]
    fn test_converged_state_has_no_actions() {
        let plan = ProvisioningPlanner::plan(&desired(), &converged());
        assert!(plan.is_converged());
        assert_eq!(plan.checks.len(), 9);
        assert!(plan.checks.iter().all(|c| c.satisfied));
    }

    #[test]
    fn test_missing_role_and_grants_produce_one_line_each() {
        let mut observed = converged();
        observed.app_role_exists = Some(false);
        observed.table_dml_complete = Some(false);
        let plan = ProvisioningPlanner::plan(&desired(), &observed);
        assert_eq!(
            plan.actions,
            vec![
                "CREATE ROLE \"rbc_app\" LOGIN PASSWORD '<app password>'".to_string(),
                "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA \"public\" TO \"rbc_app\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_unreachable_maintenance_skips_role_checks() {
        let mut observed = converged();
        observed.admin_role_exists = None;
        observed.app_role_exists = None;
        observed.database_exists = None;
        observed.warnings.push("role and database checks skipped: refused".into());
        let plan = ProvisioningPlanner::plan(&desired(), &observed);
        assert!(plan.is_converged());
        assert_eq!(plan.checks.len(), 6);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn test_missing_tables_suggest_bootstrap() {
        let mut observed = converged();
        observed.missing_objects = Some(MissingObjects {
            tables: vec!["stickies".into()],
            triggers: vec![],
        });
        let plan = ProvisioningPlanner::plan(&desired(), &observed);
        assert_eq!(plan.actions.len(), 1);
        assert!(plan.actions[0].contains("missing tables: stickies"));
    }

    #[tokio::test]
    async fn test_plan_with_no_reachable_server_only_warns() {
        let mut settings = PostgresConfig::default();
        settings.port = 1;
        settings.admin.password = "x".into();
        let provider = ConnectionProvider::new(&settings);
        let plan = ProvisioningPlanner::new(&provider, DesiredState::from_settings(&settings))
            .run()
            .await
            .unwrap();
        assert!(plan.actions.is_empty());
        assert_eq!(plan.warnings.len(), 2);
        provider.close().await;
    }
}
