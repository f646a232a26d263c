//! Provisioning types

use crate::config::PostgresConfig;
use crate::db::queries::SqlBuilder;
use crate::error::AppResult;
use crate::schema::MissingObjects;
use serde::Serialize;

/// Names the environment should converge to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub admin_role: String,
    pub app_role: String,
    pub database: String,
    pub schema: String,
}

impl DesiredState {
    pub fn from_settings(settings: &PostgresConfig) -> Self {
        Self {
            admin_role: settings.admin.user.clone(),
            app_role: settings.app.user.clone(),
            database: settings.dbname.clone(),
            schema: settings.schema.clone(),
        }
    }

    /// All names end up in DDL, so they must be plain identifiers
    pub fn validate(&self) -> AppResult<()> {
        SqlBuilder::validate_ident("admin role", &self.admin_role)?;
        SqlBuilder::validate_ident("app role", &self.app_role)?;
        SqlBuilder::validate_ident("database", &self.database)?;
        SqlBuilder::validate_ident("schema", &self.schema)?;
        Ok(())
    }
}

/// What the planner could observe. `None` means the probe was not reachable.
#[derive(Debug, Clone, Default)]
pub struct ObservedState {
    pub admin_role_exists: Option<bool>,
    pub app_role_exists: Option<bool>,
    pub database_exists: Option<bool>,
    pub schema_usage: Option<bool>,
    pub table_dml_complete: Option<bool>,
    pub default_table_privileges: Option<bool>,
    pub sequence_usage_complete: Option<bool>,
    pub default_sequence_privileges: Option<bool>,
    pub missing_objects: Option<MissingObjects>,
    pub warnings: Vec<String>,
}

/// One checked condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub description: String,
    pub target: String,
    pub satisfied: bool,
    /// SQL-level remediation; present when not satisfied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl PlanItem {
    pub fn satisfied(description: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            target: target.into(),
            satisfied: true,
            action: None,
        }
    }

    pub fn unmet(
        description: impl Into<String>,
        target: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            target: target.into(),
            satisfied: false,
            action: Some(action.into()),
        }
    }
}

/// Planner output
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisioningPlan {
    pub checks: Vec<PlanItem>,
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
}

impl ProvisioningPlan {
    pub fn new(checks: Vec<PlanItem>, warnings: Vec<String>) -> Self {
        let actions = checks.iter().filter_map(|c| c.action.clone()).collect();
        Self {
            checks,
            actions,
            warnings,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_state_rejects_unsafe_names() {
        let mut desired = DesiredState::from_settings(&PostgresConfig::default());
        assert!(desired.validate().is_ok());
        desired.database = "rbc; DROP DATABASE postgres".to_string();
        assert!(desired.validate().is_err());
    }

    #[test]
    fn test_plan_actions_come_from_unmet_checks() {
        let plan = ProvisioningPlan::new(
            vec![
                PlanItem::satisfied("admin role exists", "rbc_admin"),
                PlanItem::unmet("app role exists", "rbc_app", "CREATE ROLE \"rbc_app\" LOGIN"),
            ],
            vec![],
        );
        assert_eq!(plan.actions, vec!["CREATE ROLE \"rbc_app\" LOGIN".to_string()]);
        assert!(!plan.is_converged());
    }
}
