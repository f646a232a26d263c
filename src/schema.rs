//! Schema convergence
//!
//! The desired schema is fixed for a release. Every statement here is an
//! "ensure": re-running convergence on a ready database changes nothing.

use crate::db::queries::{self, SqlBuilder};
use crate::error::{AppError, AppResult, ParamSummary};
use serde::Serialize;
use tokio_postgres::Client;
use tracing::{debug, info, warn};

/// A required application table
pub struct RequiredTable {
    pub name: &'static str,
    pub create: &'static str,
    pub indexes: &'static [&'static str],
    /// Maintains the `updated` column through `set_updated()`
    pub touch_updated: bool,
}

impl RequiredTable {
    /// Table names following `REFERENCES` in the CREATE TABLE statement
    #[cfg(test)]
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut found = Vec::new();
        let mut rest = self.create;
        while let Some(at) = rest.find("REFERENCES ") {
            rest = &rest[at + "REFERENCES ".len()..];
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !found.contains(&name) {
                found.push(name);
            }
        }
        found
    }
}

const PRELUDE: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS pgcrypto",
    r#"CREATE OR REPLACE FUNCTION set_updated()
        RETURNS TRIGGER AS $$
        BEGIN
            NEW.updated = now();
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql"#,
    r#"CREATE OR REPLACE FUNCTION inc_edit_count()
        RETURNS TRIGGER AS $$
        BEGIN
            NEW.edit_count = COALESCE(OLD.edit_count, 0) + 1;
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql"#,
];

/// Tables in creation order (referenced tables first)
pub const REQUIRED_TABLES: &[RequiredTable] = &[
    RequiredTable {
        name: "roles",
        create: r#"CREATE TABLE IF NOT EXISTS roles (
            name TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT,
            tags JSONB DEFAULT '{}'::jsonb
        )"#,
        indexes: &[],
        touch_updated: true,
    },
    RequiredTable {
        name: "workflows",
        create: r#"CREATE TABLE IF NOT EXISTS workflows (
            name TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            role_name TEXT NOT NULL DEFAULT 'user',
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT
        )"#,
        indexes: &[],
        touch_updated: true,
    },
    RequiredTable {
        name: "tags",
        create: r#"CREATE TABLE IF NOT EXISTS tags (
            name TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            role_name TEXT NOT NULL DEFAULT 'user',
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_tags_role_name ON tags(role_name)"],
        touch_updated: true,
    },
    RequiredTable {
        name: "projects",
        create: r#"CREATE TABLE IF NOT EXISTS projects (
            name TEXT NOT NULL,
            role_name TEXT NOT NULL DEFAULT 'user',
            description TEXT,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT,
            tags JSONB DEFAULT '{}'::jsonb,
            PRIMARY KEY (name, role_name)
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_projects_role_name ON projects(role_name)"],
        touch_updated: true,
    },
    RequiredTable {
        name: "tools",
        create: r#"CREATE TABLE IF NOT EXISTS tools (
            name TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            role_name TEXT NOT NULL DEFAULT 'user',
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT,
            tags JSONB DEFAULT '{}'::jsonb,
            settings JSONB DEFAULT '{}'::jsonb,
            tool_type TEXT
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_tools_role_name ON tools(role_name)"],
        touch_updated: true,
    },
    RequiredTable {
        name: "stores",
        create: r#"CREATE TABLE IF NOT EXISTS stores (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            motivation TEXT,
            security TEXT,
            privacy TEXT,
            role_name TEXT NOT NULL DEFAULT 'user',
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT,
            tags JSONB DEFAULT '{}'::jsonb,
            store_type TEXT,
            scope TEXT CHECK (scope IN ('conversation','shared','project','task') OR scope IS NULL),
            lifecycle TEXT CHECK (lifecycle IN ('permanent','yearly','quarterly','monthly','weekly','daily') OR lifecycle IS NULL),
            UNIQUE (name, role_name)
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_stores_role_name ON stores(role_name)"],
        touch_updated: true,
    },
    RequiredTable {
        name: "topics",
        create: r#"CREATE TABLE IF NOT EXISTS topics (
            name TEXT NOT NULL,
            role_name TEXT NOT NULL DEFAULT 'user',
            title TEXT NOT NULL,
            description TEXT,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT,
            tags JSONB DEFAULT '{}'::jsonb,
            PRIMARY KEY (name, role_name)
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_topics_role_name ON topics(role_name)"],
        touch_updated: true,
    },
    RequiredTable {
        name: "conversations",
        create: r#"CREATE TABLE IF NOT EXISTS conversations (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            project TEXT,
            role_name TEXT NOT NULL DEFAULT 'user',
            tags JSONB DEFAULT '{}'::jsonb,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_conversations_project ON conversations(project)"],
        touch_updated: true,
    },
    RequiredTable {
        name: "experiments",
        create: r#"CREATE TABLE IF NOT EXISTS experiments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            conversation_id UUID NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            created TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_experiments_conversation ON experiments(conversation_id)"],
        touch_updated: false,
    },
    RequiredTable {
        name: "task_variants",
        create: r#"CREATE TABLE IF NOT EXISTS task_variants (
            variant TEXT PRIMARY KEY,
            workflow_id TEXT NOT NULL REFERENCES workflows(name) ON DELETE CASCADE
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_task_variants_workflow ON task_variants(workflow_id)"],
        touch_updated: false,
    },
    RequiredTable {
        name: "scripts_content",
        create: r#"CREATE TABLE IF NOT EXISTS scripts_content (
            id BYTEA PRIMARY KEY,
            script_content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        indexes: &[],
        touch_updated: false,
    },
    RequiredTable {
        name: "scripts",
        create: r#"CREATE TABLE IF NOT EXISTS scripts (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            motivation TEXT,
            notes TEXT,
            script_content_id BYTEA,
            role_name TEXT NOT NULL DEFAULT 'user',
            tags JSONB DEFAULT '{}'::jsonb,
            complex_name JSONB NOT NULL,
            archived BOOLEAN NOT NULL DEFAULT FALSE,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_scripts_role_name ON scripts(role_name)",
            "CREATE INDEX IF NOT EXISTS idx_scripts_updated ON scripts (updated DESC)",
            "CREATE INDEX IF NOT EXISTS idx_scripts_complex_name_gin ON scripts USING GIN (complex_name jsonb_path_ops)",
        ],
        touch_updated: true,
    },
    RequiredTable {
        name: "workspaces",
        create: r#"CREATE TABLE IF NOT EXISTS workspaces (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            description TEXT,
            role_name TEXT NOT NULL DEFAULT 'user',
            project_name TEXT,
            build_script_id UUID REFERENCES scripts(id) ON DELETE SET NULL,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            tags JSONB DEFAULT '{}'::jsonb,
            FOREIGN KEY (project_name, role_name) REFERENCES projects(name, role_name) ON DELETE SET NULL
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_workspaces_role_name ON workspaces(role_name)",
            "CREATE INDEX IF NOT EXISTS idx_workspaces_project_name ON workspaces(project_name)",
        ],
        touch_updated: true,
    },
    RequiredTable {
        name: "tasks",
        create: r#"CREATE TABLE IF NOT EXISTS tasks (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            command TEXT NOT NULL,
            variant TEXT NOT NULL,
            title TEXT,
            description TEXT,
            motivation TEXT,
            role_name TEXT NOT NULL DEFAULT 'user',
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            notes TEXT,
            shell TEXT,
            timeout INTERVAL,
            tool_workspace_id UUID REFERENCES workspaces(id) ON DELETE SET NULL,
            tags JSONB DEFAULT '{}'::jsonb,
            level TEXT CHECK (level IN ('h1','h2','h3','h4','h5','h6') OR level IS NULL),
            archived BOOLEAN NOT NULL DEFAULT FALSE,
            UNIQUE (variant),
            FOREIGN KEY (variant) REFERENCES task_variants(variant) ON DELETE CASCADE
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_tasks_variant ON tasks(variant)"],
        touch_updated: false,
    },
    RequiredTable {
        name: "messages_content",
        create: r#"CREATE TABLE IF NOT EXISTS messages_content (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            text_content TEXT NOT NULL,
            json_content JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        indexes: &[],
        touch_updated: false,
    },
    RequiredTable {
        name: "messages",
        create: r#"CREATE TABLE IF NOT EXISTS messages (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            content_id UUID NOT NULL REFERENCES messages_content(id) ON DELETE CASCADE,
            from_task_id UUID REFERENCES tasks(id) ON DELETE SET NULL,
            experiment_id UUID REFERENCES experiments(id) ON DELETE SET NULL,
            role_name TEXT NOT NULL DEFAULT 'user',
            status TEXT NOT NULL DEFAULT 'ingested',
            error_message TEXT,
            tags JSONB DEFAULT '{}'::jsonb,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (content_id, status, created)
        )"#,
        indexes: &[],
        touch_updated: false,
    },
    RequiredTable {
        name: "blackboards",
        create: r#"CREATE TABLE IF NOT EXISTS blackboards (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            store_id UUID NOT NULL REFERENCES stores(id) ON DELETE CASCADE,
            role_name TEXT NOT NULL DEFAULT 'user',
            conversation_id UUID REFERENCES conversations(id) ON DELETE SET NULL,
            project_name TEXT,
            task_id UUID REFERENCES tasks(id) ON DELETE SET NULL,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            background TEXT,
            guidelines TEXT,
            FOREIGN KEY (project_name, role_name) REFERENCES projects(name, role_name) ON DELETE SET NULL
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_blackboards_role_name ON blackboards(role_name)"],
        touch_updated: true,
    },
    RequiredTable {
        name: "stickies",
        create: r#"CREATE TABLE IF NOT EXISTS stickies (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            blackboard_id UUID NOT NULL REFERENCES blackboards(id) ON DELETE CASCADE,
            topic_name TEXT,
            topic_role_name TEXT,
            note TEXT,
            labels TEXT[],
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            created_by_task_id UUID REFERENCES tasks(id) ON DELETE SET NULL,
            edit_count INT NOT NULL DEFAULT 0,
            priority_level TEXT CHECK (priority_level IN ('must','should','could','wont') OR priority_level IS NULL),
            score DOUBLE PRECISION,
            complex_name JSONB NOT NULL DEFAULT '{"name":"","variant":""}',
            structured JSONB,
            archived BOOLEAN NOT NULL DEFAULT FALSE,
            FOREIGN KEY (topic_name, topic_role_name) REFERENCES topics(name, role_name) ON DELETE SET NULL
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_stickies_blackboard ON stickies(blackboard_id)",
            "CREATE INDEX IF NOT EXISTS idx_stickies_topic ON stickies(topic_name, topic_role_name)",
            "CREATE INDEX IF NOT EXISTS idx_stickies_updated ON stickies (updated DESC)",
        ],
        touch_updated: true,
    },
    RequiredTable {
        name: "stickie_relations",
        create: r#"CREATE TABLE IF NOT EXISTS stickie_relations (
            from_id UUID NOT NULL REFERENCES stickies(id) ON DELETE CASCADE,
            to_id UUID NOT NULL REFERENCES stickies(id) ON DELETE CASCADE,
            rel_type TEXT NOT NULL CHECK (rel_type IN ('INCLUDES','CAUSES','USES','REPRESENTS','CONTRASTS_WITH')),
            labels TEXT[] DEFAULT ARRAY[]::text[],
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (from_id, to_id, rel_type)
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_stickie_relations_from ON stickie_relations(from_id)",
            "CREATE INDEX IF NOT EXISTS idx_stickie_relations_to ON stickie_relations(to_id)",
        ],
        touch_updated: false,
    },
    RequiredTable {
        name: "packages",
        create: r#"CREATE TABLE IF NOT EXISTS packages (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            role_name TEXT NOT NULL REFERENCES roles(name) ON DELETE CASCADE,
            task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (role_name, task_id)
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_packages_role_name ON packages(role_name)",
            "CREATE INDEX IF NOT EXISTS idx_packages_task ON packages(task_id)",
        ],
        touch_updated: true,
    },
    RequiredTable {
        name: "testcases",
        create: r#"CREATE TABLE IF NOT EXISTS testcases (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT,
            package TEXT,
            classname TEXT,
            title TEXT NOT NULL,
            experiment_id UUID REFERENCES experiments(id) ON DELETE SET NULL,
            role_name TEXT NOT NULL DEFAULT 'user',
            status TEXT NOT NULL DEFAULT 'KO',
            error_message TEXT,
            tags JSONB DEFAULT '{}'::jsonb,
            level TEXT CHECK (level IN ('h1','h2','h3','h4','h5','h6') OR level IS NULL),
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            file TEXT,
            line INT,
            execution_time DOUBLE PRECISION
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_testcases_role_name ON testcases(role_name)",
            "CREATE INDEX IF NOT EXISTS idx_testcases_experiment ON testcases(experiment_id)",
        ],
        touch_updated: false,
    },
    RequiredTable {
        name: "task_replaces",
        create: r#"CREATE TABLE IF NOT EXISTS task_replaces (
            new_task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            old_task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            level TEXT NOT NULL CHECK (level IN ('patch','minor','major')),
            comment TEXT,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (new_task_id, old_task_id)
        )"#,
        indexes: &["CREATE INDEX IF NOT EXISTS idx_task_replaces_old ON task_replaces(old_task_id)"],
        touch_updated: false,
    },
    RequiredTable {
        name: "task_scripts",
        create: r#"CREATE TABLE IF NOT EXISTS task_scripts (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            script_id UUID NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            alias TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (task_id, name)
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_task_scripts_script_id ON task_scripts(script_id)",
            "CREATE UNIQUE INDEX IF NOT EXISTS task_scripts_task_alias_uniq ON task_scripts(task_id, alias) WHERE alias IS NOT NULL",
        ],
        touch_updated: false,
    },
    RequiredTable {
        name: "queues",
        create: r#"CREATE TABLE IF NOT EXISTS queues (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            description TEXT,
            inqueuesince TIMESTAMPTZ NOT NULL DEFAULT now(),
            status TEXT NOT NULL DEFAULT 'Waiting',
            why TEXT,
            tags JSONB DEFAULT '{}'::jsonb,
            task_id UUID REFERENCES tasks(id) ON DELETE SET NULL,
            inbound_message UUID REFERENCES messages(id) ON DELETE SET NULL,
            target_workspace_id UUID REFERENCES workspaces(id) ON DELETE SET NULL
        )"#,
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_queues_status ON queues(status)",
            "CREATE INDEX IF NOT EXISTS idx_queues_inqueue_since ON queues(inqueuesince)",
        ],
        touch_updated: false,
    },
];

/// Trigger that counts edits on stickies
const EDIT_COUNT_TRIGGER: (&str, &str, &str) = ("stickies_inc_edit_count", "stickies", "inc_edit_count");

const CONTENT_TABLE: &str = r#"CREATE TABLE IF NOT EXISTS messages_content_pg (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    content_type TEXT,
    language TEXT,
    metadata JSONB DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"#;

const CONTENT_FTS_INDEX: &str = r#"CREATE INDEX IF NOT EXISTS idx_messages_content_pg_fts
    ON messages_content_pg USING GIN (to_tsvector('simple', content))"#;

pub fn required_table_names() -> Vec<&'static str> {
    REQUIRED_TABLES.iter().map(|t| t.name).collect()
}

/// (trigger, table, function) for every required trigger
fn required_triggers() -> Vec<(String, &'static str, &'static str)> {
    let mut triggers: Vec<(String, &'static str, &'static str)> = REQUIRED_TABLES
        .iter()
        .filter(|t| t.touch_updated)
        .map(|t| (format!("{}_set_updated", t.name), t.name, "set_updated"))
        .collect();
    let (name, table, function) = EDIT_COUNT_TRIGGER;
    triggers.push((name.to_string(), table, function));
    triggers
}

pub fn required_trigger_names() -> Vec<String> {
    required_triggers().into_iter().map(|(name, _, _)| name).collect()
}

fn trigger_statement(trigger: &str, table: &str, function: &str) -> String {
    format!(
        r#"DO $$ BEGIN
            IF NOT EXISTS (
                SELECT 1 FROM pg_trigger WHERE tgname = {name} AND tgrelid = {table}::regclass
            ) THEN
                CREATE TRIGGER {trigger} BEFORE UPDATE ON {ident} FOR EACH ROW EXECUTE PROCEDURE {function}();
            END IF;
        END $$"#,
        name = SqlBuilder::quote_literal(trigger),
        table = SqlBuilder::quote_literal(table),
        trigger = SqlBuilder::quote_ident(trigger),
        ident = SqlBuilder::quote_ident(table),
        function = function,
    )
}

/// Full ordered statement list for the target schema
pub fn convergence_statements(schema: &str) -> Vec<String> {
    let mut stmts = vec![format!("SET search_path TO {}", SqlBuilder::quote_ident(schema))];
    stmts.extend(PRELUDE.iter().map(|s| s.to_string()));
    for table in REQUIRED_TABLES {
        stmts.push(table.create.to_string());
        stmts.extend(table.indexes.iter().map(|s| s.to_string()));
    }
    for (trigger, table, function) in required_triggers() {
        stmts.push(trigger_statement(&trigger, table, function));
    }
    stmts
}

/// Ensure every required table, index and trigger exists in `schema`
pub async fn converge(client: &Client, schema: &str) -> AppResult<()> {
    SqlBuilder::validate_ident("schema", schema)?;
    let stmts = convergence_statements(schema);
    info!("Converging schema {} ({} statements)", schema, stmts.len());
    for (i, stmt) in stmts.iter().enumerate() {
        debug!("schema step {}/{}", i + 1, stmts.len());
        client.batch_execute(stmt).await.map_err(|e| {
            AppError::from(e).context("schema convergence", &[ParamSummary::Int("step", (i + 1) as i64)])
        })?;
    }
    Ok(())
}

/// Ensure the content-storage table and its full-text index.
/// A failing index is reported as a warning, not an error.
pub async fn ensure_content_schema(client: &Client) -> AppResult<Vec<String>> {
    client.batch_execute(CONTENT_TABLE).await?;
    let mut warnings = Vec::new();
    if let Err(e) = client.batch_execute(CONTENT_FTS_INDEX).await {
        warn!("Full-text index on messages_content_pg not created: {}", e);
        warnings.push(format!("full-text index not created: {}", e));
    }
    Ok(warnings)
}

/// Required tables and triggers that are absent from `schema`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissingObjects {
    pub tables: Vec<String>,
    pub triggers: Vec<String>,
}

impl MissingObjects {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.triggers.is_empty()
    }
}

pub async fn missing_objects(client: &Client, schema: &str) -> AppResult<MissingObjects> {
    let tables = required_table_names();
    let rows = client.query(queries::EXISTING_TABLES, &[&schema, &tables]).await?;
    let present: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    let missing_tables = tables
        .iter()
        .filter(|t| !present.iter().any(|p| p == *t))
        .map(|t| t.to_string())
        .collect();

    let triggers = required_trigger_names();
    let rows = client.query(queries::EXISTING_TRIGGERS, &[&schema, &triggers]).await?;
    let present: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    let missing_triggers = triggers
        .into_iter()
        .filter(|t| !present.contains(t))
        .collect();

    Ok(MissingObjects {
        tables: missing_tables,
        triggers: missing_triggers,
    })
}
