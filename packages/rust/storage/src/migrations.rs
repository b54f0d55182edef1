//! SQL migration definitions for the knowledge index database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: passages, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Reference passages (one row per chunk of a source document)
CREATE TABLE IF NOT EXISTS passages (
    id           TEXT PRIMARY KEY,
    source       TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_passages_source ON passages(source);

-- Full-text search over passage content
CREATE VIRTUAL TABLE IF NOT EXISTS passages_fts USING fts5(
    content,
    content=passages,
    content_rowid=rowid
);

-- Triggers to keep FTS in sync with passages table
CREATE TRIGGER IF NOT EXISTS passages_fts_insert AFTER INSERT ON passages BEGIN
    INSERT INTO passages_fts(rowid, content)
    VALUES (new.rowid, new.content);
END;

CREATE TRIGGER IF NOT EXISTS passages_fts_delete AFTER DELETE ON passages BEGIN
    INSERT INTO passages_fts(passages_fts, rowid, content)
    VALUES ('delete', old.rowid, old.content);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
