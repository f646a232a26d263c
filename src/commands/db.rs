//! `db` commands: status, provisioning, graph extension and backups

use super::{eprint_json, parse_key_value, print_json};
use crate::backup::{self, ExportOptions, ImportOptions};
use crate::config::Settings;
use crate::db::{deadline, with_deadline, ConnectionProvider, ConnectionScope};
use crate::error::{validation_error, AppResult};
use crate::provisioning::{
    age, catalog, run_reset, run_revoke, run_scaffold, DesiredState, ProvisioningPlanner,
    ResetOptions, ScaffoldOptions,
};
use crate::schema::{self, MissingObjects};
use clap::{ArgAction, Args, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

/// Reads and writes standard streams instead of a file
const STDIO: &str = "-";

#[derive(Subcommand)]
pub enum DbCommands {
    /// Check connectivity of every scope and whether the schema is ready
    Status,
    /// Show what scaffold would change, without changing anything
    Plan,
    /// Create roles, database, privileges and schema
    Scaffold(ScaffoldArgs),
    /// Drop the database (or reset its schema) and optionally the roles
    Reset(ResetArgs),
    /// Revoke the app role's runtime privileges
    RevokePrivileges(ConfirmArgs),
    /// Install the graph extension, create the graph and grant access
    AgeInit(ConfirmArgs),
    /// Report graph extension state as seen by the app role
    AgeStatus,
    /// Count rows in every managed table
    Count,
    /// Export every managed table as one JSON document
    Backup(BackupArgs),
    /// Import a JSON backup
    Restore(RestoreArgs),
}

#[derive(Args)]
pub struct ScaffoldArgs {
    /// Ensure the admin and app roles exist
    #[arg(long)]
    pub create_roles: bool,

    /// Ensure the database exists
    #[arg(long)]
    pub create_db: bool,

    /// Grant the app role its runtime privileges
    #[arg(long)]
    pub grant_privileges: bool,

    /// Everything above plus the content table
    #[arg(long)]
    pub all: bool,

    /// Apply the changes
    #[arg(long)]
    pub yes: bool,
}

impl From<&ScaffoldArgs> for ScaffoldOptions {
    fn from(args: &ScaffoldArgs) -> Self {
        Self {
            create_roles: args.create_roles,
            create_db: args.create_db,
            grant_privileges: args.grant_privileges,
            all: args.all,
            yes: args.yes,
        }
    }
}

#[derive(Args)]
pub struct ResetArgs {
    /// Required: reset is destructive
    #[arg(long)]
    pub force: bool,

    /// Drop the database; with `false` the schema is reset in place
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    pub drop_db: bool,

    /// Drop the app role afterwards
    #[arg(long)]
    pub drop_app_role: bool,

    /// Drop the admin role afterwards
    #[arg(long)]
    pub drop_admin_role: bool,
}

impl From<&ResetArgs> for ResetOptions {
    fn from(args: &ResetArgs) -> Self {
        Self {
            force: args.force,
            drop_db: args.drop_db,
            drop_app_role: args.drop_app_role,
            drop_admin_role: args.drop_admin_role,
        }
    }
}

#[derive(Args)]
pub struct ConfirmArgs {
    /// Apply the changes
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct BackupArgs {
    /// Destination file, `-` for stdout
    #[arg(long, short, default_value = STDIO)]
    pub output: String,

    /// Free-text description recorded in the metadata
    #[arg(long)]
    pub description: Option<String>,

    /// Metadata tags
    #[arg(long = "tag", value_parser = parse_key_value, value_name = "KEY=VALUE")]
    pub tags: Vec<(String, String)>,

    /// Who asked for the backup
    #[arg(long)]
    pub initiated_by: Option<String>,

    /// Days the backup should be kept
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Back up only these tables, comma separated or repeated
    #[arg(long, value_delimiter = ',', value_name = "TABLE")]
    pub include: Vec<String>,

    /// Leave these tables out, comma separated or repeated
    #[arg(long, value_delimiter = ',', value_name = "TABLE")]
    pub exclude: Vec<String>,
}

#[derive(Args)]
pub struct RestoreArgs {
    /// Backup file, `-` for stdin
    #[arg(long, short, default_value = STDIO)]
    pub input: String,

    /// Truncate every managed table first
    #[arg(long)]
    pub delete_existing: bool,

    /// Update rows that already exist (default unless --delete-existing)
    #[arg(long)]
    pub upsert: bool,
}

pub async fn execute(
    settings: &Settings,
    provider: &ConnectionProvider,
    command: DbCommands,
) -> AppResult<()> {
    match command {
        DbCommands::Status => print_json(&status(provider).await),
        DbCommands::Plan => {
            let desired = DesiredState::from_settings(&settings.postgres);
            let plan = ProvisioningPlanner::new(provider, desired).run().await?;
            for action in &plan.actions {
                info!("plan: {}", action);
            }
            if plan.is_converged() {
                info!("plan: nothing to do");
            }
            print_json(&plan)
        }
        DbCommands::Scaffold(args) => {
            let report = run_scaffold(provider, &settings.postgres, (&args).into()).await?;
            print_json(&report)
        }
        DbCommands::Reset(args) => {
            let report = run_reset(provider, &settings.postgres, (&args).into()).await?;
            print_json(&report)
        }
        DbCommands::RevokePrivileges(args) => {
            let report = run_revoke(provider, &settings.postgres, args.yes).await?;
            print_json(&report)
        }
        DbCommands::AgeInit(args) => {
            let report = age::age_init(provider, &settings.postgres, &settings.graph, args.yes).await?;
            print_json(&report)
        }
        DbCommands::AgeStatus => {
            let report = age::age_status(provider, &settings.postgres, &settings.graph).await?;
            print_json(&report)
        }
        DbCommands::Count => print_json(&backup::count_rows(provider).await?),
        DbCommands::Backup(args) => run_backup(provider, args).await,
        DbCommands::Restore(args) => run_restore(provider, args).await,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeStatus {
    pub scope: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub scopes: Vec<ScopeStatus>,
    pub server_version: Option<String>,
    pub schema_ready: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<MissingObjects>,
}

async fn probe_scope(provider: &ConnectionProvider, scope: ConnectionScope) -> ScopeStatus {
    let probed = async {
        if scope.is_admin() {
            provider.require_admin()?;
        }
        let client = provider.client(scope).await?;
        with_deadline("status", deadline::PROBE, catalog::current_identity(&client)).await
    }
    .await;

    match probed {
        Ok((database, user)) => {
            info!("status: {} ok (db={} user={})", scope, database, user);
            ScopeStatus {
                scope: scope.label(),
                ok: true,
                database: Some(database),
                user: Some(user),
                error: None,
            }
        }
        Err(e) => {
            warn!("status: {} unavailable: {}", scope, e);
            ScopeStatus {
                scope: scope.label(),
                ok: false,
                database: None,
                user: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Never fails: unreachable scopes are reported in the result
async fn status(provider: &ConnectionProvider) -> StatusReport {
    let mut report = StatusReport {
        scopes: Vec::new(),
        server_version: None,
        schema_ready: None,
        missing: None,
    };
    let scopes = [
        ConnectionScope::AppTarget,
        ConnectionScope::AdminMaintenance,
        ConnectionScope::AdminTarget,
    ];
    for scope in scopes {
        report.scopes.push(probe_scope(provider, scope).await);
    }

    // prefer the admin view of the schema, it sees every trigger
    let reachable = [ConnectionScope::AdminTarget, ConnectionScope::AppTarget]
        .into_iter()
        .find(|scope| report.scopes.iter().any(|s| s.ok && s.scope == scope.label()));
    let Some(scope) = reachable else {
        return report;
    };

    let schema_name = provider.settings().schema.clone();
    let inspected = async {
        let client = provider.client(scope).await?;
        with_deadline("status", deadline::PROBE, async {
            let version = catalog::server_version(&client).await?;
            let missing = schema::missing_objects(&client, &schema_name).await?;
            Ok((version, missing))
        })
        .await
    }
    .await;

    match inspected {
        Ok((version, missing)) => {
            if missing.is_empty() {
                info!("status: schema ready");
            } else {
                warn!(
                    "status: {} tables and {} triggers missing (run db scaffold)",
                    missing.tables.len(),
                    missing.triggers.len()
                );
            }
            report.server_version = Some(version);
            report.schema_ready = Some(missing.is_empty());
            report.missing = Some(missing).filter(|m| !m.is_empty());
        }
        Err(e) => warn!("status: schema inspection failed: {}", e),
    }
    report
}

fn export_options(args: &BackupArgs) -> ExportOptions {
    ExportOptions {
        description: args.description.clone(),
        tags: args.tags.iter().cloned().collect::<BTreeMap<_, _>>(),
        initiated_by: args.initiated_by.clone(),
        retention_days: args.retention_days,
        include: args.include.clone(),
        exclude: args.exclude.clone(),
    }
}

async fn run_backup(provider: &ConnectionProvider, args: BackupArgs) -> AppResult<()> {
    let backup = backup::export(provider, export_options(&args)).await?;

    if args.output == STDIO {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&backup.data).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        // stdout carries the data, so the result goes to stderr
        eprint_json(&backup.metadata)
    } else {
        tokio::fs::write(&args.output, &backup.data).await?;
        info!("backup: wrote {} bytes to {}", backup.data.len(), args.output);
        print_json(&backup.metadata)
    }
}

async fn run_restore(provider: &ConnectionProvider, args: RestoreArgs) -> AppResult<()> {
    let raw = if args.input == STDIO {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        buf
    } else {
        tokio::fs::read(&args.input).await?
    };
    let document: serde_json::Value = serde_json::from_slice(&raw)
        .map_err(|e| validation_error(format!("backup is not valid JSON: {}", e)))?;

    let options = ImportOptions {
        delete_existing: args.delete_existing,
        upsert: args.upsert,
    };
    if options.delete_existing {
        warn!("restore: --delete-existing truncates every managed table");
    }
    let report = backup::import(provider, &document, options).await?;
    print_json(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: DbCommands,
    }

    fn parse(args: &[&str]) -> DbCommands {
        TestCli::try_parse_from(std::iter::once("db").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    #[test]
    fn test_reset_drop_db_defaults_to_true() {
        let DbCommands::Reset(args) = parse(&["reset", "--force"]) else {
            panic!("expected reset");
        };
        let options = ResetOptions::from(&args);
        assert!(options.force && options.drop_db);

        let DbCommands::Reset(args) = parse(&["reset", "--force", "--drop-db", "false"]) else {
            panic!("expected reset");
        };
        assert!(!ResetOptions::from(&args).drop_db);
    }

    #[test]
    fn test_backup_tags_and_defaults() {
        let DbCommands::Backup(args) = parse(&[
            "backup",
            "--tag",
            "env=prod",
            "--tag",
            "team = ops",
            "--retention-days",
            "30",
        ]) else {
            panic!("expected backup");
        };
        assert_eq!(args.output, STDIO);
        let options = export_options(&args);
        assert_eq!(options.tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(options.tags.get("team").map(String::as_str), Some("ops"));
        assert_eq!(options.retention_days, Some(30));
        assert!(options.include.is_empty() && options.exclude.is_empty());
    }

    #[test]
    fn test_backup_table_filters_split_on_commas() {
        let DbCommands::Backup(args) = parse(&[
            "backup",
            "--include",
            "roles,tasks",
            "--include",
            "workflows",
            "--exclude",
            "tasks",
        ]) else {
            panic!("expected backup");
        };
        let options = export_options(&args);
        assert_eq!(options.include, vec!["roles", "tasks", "workflows"]);
        let selected: Vec<&str> = options
            .selected_tables()
            .unwrap()
            .iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(selected, vec!["roles", "workflows"]);
    }

    #[test]
    fn test_scaffold_flags_map_to_options() {
        let DbCommands::Scaffold(args) = parse(&["scaffold", "--all", "--yes"]) else {
            panic!("expected scaffold");
        };
        let options = ScaffoldOptions::from(&args);
        assert!(options.all && options.yes);
        assert!(!options.create_roles);
    }

    #[test]
    fn test_restore_reads_stdin_by_default() {
        let DbCommands::Restore(args) = parse(&["restore", "--delete-existing"]) else {
            panic!("expected restore");
        };
        assert_eq!(args.input, STDIO);
        assert!(args.delete_existing && !args.upsert);
    }

    #[test]
    fn test_status_without_admin_reports_every_scope() {
        let settings = crate::config::PostgresConfig {
            port: 1,
            ..Default::default()
        };
        let provider = ConnectionProvider::new(&settings);
        let report = tokio_test::block_on(status(&provider));
        assert_eq!(report.scopes.len(), 3);
        assert!(report.scopes.iter().all(|s| !s.ok && s.error.is_some()));
        assert!(report.schema_ready.is_none());
    }
}
