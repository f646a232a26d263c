//! Managed tables: columns, coercions, conflict targets and references

/// How a serialized value is turned back into a column value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Text,
    Uuid,
    Timestamp,
    Json,
    /// `bytea`, base64 in the backup file
    Bytes,
    Interval,
    Int,
    Float,
    Bool,
    TextArray,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: Coercion,
}

/// Key used by `ON CONFLICT` during import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictTarget {
    /// Plain insert, duplicates are skipped
    None,
    Single(&'static str),
    Composite(&'static [&'static str]),
}

impl ConflictTarget {
    pub fn columns(&self) -> &[&'static str] {
        match self {
            ConflictTarget::None => &[],
            ConflictTarget::Single(column) => std::slice::from_ref(column),
            ConflictTarget::Composite(columns) => columns,
        }
    }
}

#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub conflict: ConflictTarget,
    /// Tables this one has foreign keys into
    pub references: &'static [&'static str],
}

impl TableSpec {
    #[cfg(test)]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn binary_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.kind == Coercion::Bytes)
    }

    /// Stable export order: the conflict key, else the first column
    pub fn sort_columns(&self) -> Vec<&'static str> {
        match self.conflict {
            ConflictTarget::None => self.columns.iter().take(1).map(|c| c.name).collect(),
            target => target.columns().to_vec(),
        }
    }
}

pub fn find_table(name: &str) -> Option<&'static TableSpec> {
    TABLES.iter().find(|t| t.name == name)
}

const fn col(name: &'static str, kind: Coercion) -> Column {
    Column { name, kind }
}

use Coercion::*;

pub static TABLES: &[TableSpec] = &[
    TableSpec {
        name: "roles",
        columns: &[
            col("name", Text),
            col("title", Text),
            col("description", Text),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
            col("tags", Json),
        ],
        conflict: ConflictTarget::Single("name"),
        references: &[],
    },
    TableSpec {
        name: "workflows",
        columns: &[
            col("name", Text),
            col("title", Text),
            col("description", Text),
            col("role_name", Text),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
        ],
        conflict: ConflictTarget::Single("name"),
        references: &[],
    },
    TableSpec {
        name: "tags",
        columns: &[
            col("name", Text),
            col("title", Text),
            col("description", Text),
            col("role_name", Text),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
        ],
        conflict: ConflictTarget::Single("name"),
        references: &[],
    },
    TableSpec {
        name: "projects",
        columns: &[
            col("name", Text),
            col("role_name", Text),
            col("description", Text),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
            col("tags", Json),
        ],
        conflict: ConflictTarget::Composite(&["name", "role_name"]),
        references: &[],
    },
    TableSpec {
        name: "tools",
        columns: &[
            col("name", Text),
            col("title", Text),
            col("description", Text),
            col("role_name", Text),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
            col("tags", Json),
            col("settings", Json),
            col("tool_type", Text),
        ],
        conflict: ConflictTarget::Single("name"),
        references: &[],
    },
    TableSpec {
        name: "stores",
        columns: &[
            col("id", Uuid),
            col("name", Text),
            col("title", Text),
            col("description", Text),
            col("motivation", Text),
            col("security", Text),
            col("privacy", Text),
            col("role_name", Text),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
            col("tags", Json),
            col("store_type", Text),
            col("scope", Text),
            col("lifecycle", Text),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &[],
    },
    TableSpec {
        name: "topics",
        columns: &[
            col("name", Text),
            col("role_name", Text),
            col("title", Text),
            col("description", Text),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
            col("tags", Json),
        ],
        conflict: ConflictTarget::Composite(&["name", "role_name"]),
        references: &[],
    },
    TableSpec {
        name: "conversations",
        columns: &[
            col("id", Uuid),
            col("title", Text),
            col("description", Text),
            col("project", Text),
            col("role_name", Text),
            col("tags", Json),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("notes", Text),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &[],
    },
    TableSpec {
        name: "experiments",
        columns: &[
            col("id", Uuid),
            col("conversation_id", Uuid),
            col("created", Timestamp),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["conversations"],
    },
    TableSpec {
        name: "task_variants",
        columns: &[col("variant", Text), col("workflow_id", Text)],
        conflict: ConflictTarget::Single("variant"),
        references: &["workflows"],
    },
    TableSpec {
        name: "scripts_content",
        columns: &[
            col("id", Bytes),
            col("script_content", Text),
            col("created_at", Timestamp),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &[],
    },
    TableSpec {
        name: "scripts",
        columns: &[
            col("id", Uuid),
            col("title", Text),
            col("description", Text),
            col("motivation", Text),
            col("notes", Text),
            col("script_content_id", Bytes),
            col("role_name", Text),
            col("tags", Json),
            col("complex_name", Json),
            col("archived", Bool),
            col("created", Timestamp),
            col("updated", Timestamp),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &[],
    },
    TableSpec {
        name: "workspaces",
        columns: &[
            col("id", Uuid),
            col("description", Text),
            col("role_name", Text),
            col("project_name", Text),
            col("build_script_id", Uuid),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("tags", Json),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["scripts", "projects"],
    },
    TableSpec {
        name: "tasks",
        columns: &[
            col("id", Uuid),
            col("command", Text),
            col("variant", Text),
            col("title", Text),
            col("description", Text),
            col("motivation", Text),
            col("role_name", Text),
            col("created", Timestamp),
            col("notes", Text),
            col("shell", Text),
            col("timeout", Interval),
            col("tool_workspace_id", Uuid),
            col("tags", Json),
            col("level", Text),
            col("archived", Bool),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["workspaces", "task_variants"],
    },
    TableSpec {
        name: "messages_content",
        columns: &[
            col("id", Uuid),
            col("text_content", Text),
            col("json_content", Json),
            col("created_at", Timestamp),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &[],
    },
    TableSpec {
        name: "messages",
        columns: &[
            col("id", Uuid),
            col("content_id", Uuid),
            col("from_task_id", Uuid),
            col("experiment_id", Uuid),
            col("role_name", Text),
            col("status", Text),
            col("error_message", Text),
            col("tags", Json),
            col("created", Timestamp),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["messages_content", "tasks", "experiments"],
    },
    TableSpec {
        name: "blackboards",
        columns: &[
            col("id", Uuid),
            col("store_id", Uuid),
            col("role_name", Text),
            col("conversation_id", Uuid),
            col("project_name", Text),
            col("task_id", Uuid),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("background", Text),
            col("guidelines", Text),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["stores", "conversations", "tasks", "projects"],
    },
    TableSpec {
        name: "stickies",
        columns: &[
            col("id", Uuid),
            col("blackboard_id", Uuid),
            col("topic_name", Text),
            col("topic_role_name", Text),
            col("note", Text),
            col("labels", TextArray),
            col("created", Timestamp),
            col("updated", Timestamp),
            col("created_by_task_id", Uuid),
            col("edit_count", Int),
            col("priority_level", Text),
            col("score", Float),
            col("complex_name", Json),
            col("structured", Json),
            col("archived", Bool),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["blackboards", "tasks", "topics"],
    },
    TableSpec {
        name: "stickie_relations",
        columns: &[
            col("from_id", Uuid),
            col("to_id", Uuid),
            col("rel_type", Text),
            col("labels", TextArray),
            col("created", Timestamp),
        ],
        conflict: ConflictTarget::Composite(&["from_id", "to_id", "rel_type"]),
        references: &["stickies"],
    },
    TableSpec {
        name: "packages",
        columns: &[
            col("id", Uuid),
            col("role_name", Text),
            col("task_id", Uuid),
            col("created", Timestamp),
            col("updated", Timestamp),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["roles", "tasks"],
    },
    TableSpec {
        name: "testcases",
        columns: &[
            col("id", Uuid),
            col("name", Text),
            col("package", Text),
            col("classname", Text),
            col("title", Text),
            col("experiment_id", Uuid),
            col("role_name", Text),
            col("status", Text),
            col("error_message", Text),
            col("tags", Json),
            col("level", Text),
            col("created", Timestamp),
            col("file", Text),
            col("line", Int),
            col("execution_time", Float),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["experiments"],
    },
    TableSpec {
        name: "task_replaces",
        columns: &[
            col("new_task_id", Uuid),
            col("old_task_id", Uuid),
            col("level", Text),
            col("comment", Text),
            col("created", Timestamp),
        ],
        conflict: ConflictTarget::Composite(&["new_task_id", "old_task_id"]),
        references: &["tasks"],
    },
    TableSpec {
        name: "task_scripts",
        columns: &[
            col("id", Uuid),
            col("task_id", Uuid),
            col("script_id", Uuid),
            col("name", Text),
            col("alias", Text),
            col("created_at", Timestamp),
        ],
        conflict: ConflictTarget::Single("id"),
        references: &["tasks", "scripts"],
    },
    TableSpec {
        name: "queues",
        columns: &[
            col("id", Uuid),
            col("description", Text),
            col("inqueuesince", Timestamp),
            col("status", Text),
            col("why", Text),
            col("tags", Json),
            col("task_id", Uuid),
            col("inbound_message", Uuid),
            col("target_workspace_id", Uuid),
        ],
        conflict: ConflictTarget::None,
        references: &["tasks", "messages", "workspaces"],
    },
];
