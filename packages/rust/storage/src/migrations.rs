//! SQL migration definitions for the Notecast database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: notebooks, sources, generation_jobs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS notebooks (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sources (
    id          TEXT PRIMARY KEY,
    notebook_id TEXT NOT NULL REFERENCES notebooks(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,
    status      TEXT NOT NULL,
    content     TEXT,
    summary     TEXT,
    topics_json TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sources_notebook ON sources(notebook_id, created_at);

-- One row per generation request; advanced only by the pipeline.
CREATE TABLE IF NOT EXISTS generation_jobs (
    id                  TEXT PRIMARY KEY,
    notebook_id         TEXT NOT NULL,
    kind                TEXT NOT NULL,
    variant             TEXT NOT NULL,
    source_ids_json     TEXT NOT NULL,
    custom_instructions TEXT,
    status              TEXT NOT NULL,
    progress_percent    INTEGER NOT NULL DEFAULT 0,
    script              TEXT,
    media_path          TEXT,
    media_url           TEXT,
    mime_type           TEXT,
    duration_seconds    INTEGER,
    model_used          TEXT,
    cost_usd            REAL NOT NULL DEFAULT 0,
    error_message       TEXT,
    created_at          TEXT NOT NULL,
    completed_at        TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_notebook ON generation_jobs(notebook_id, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON generation_jobs(status);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
