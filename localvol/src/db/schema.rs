//! Database schema for localvol.

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Volume records. Rows are never removed; `deleted` hides them.
pub const LOCAL_VOLUMES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS local_volumes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    user_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    host TEXT NOT NULL,
    instance_id INTEGER NOT NULL,
    device TEXT NOT NULL,
    size INTEGER NOT NULL,
    status TEXT NOT NULL,
    attach_status TEXT NOT NULL,
    snapshot_id TEXT,
    volume_type_id TEXT,
    display_description TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    attach_time TEXT,
    scheduled_at TEXT,
    launched_at TEXT,
    terminated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_local_volumes_project ON local_volumes(project_id, deleted);
CREATE INDEX IF NOT EXISTS idx_local_volumes_instance ON local_volumes(instance_id);
"#;

pub fn all_schemas() -> Vec<&'static str> {
    vec![SCHEMA_VERSION_TABLE, LOCAL_VOLUMES_TABLE]
}
