//! libSQL-backed knowledge index (offline mode).
//!
//! The [`PassageStore`] wraps a libSQL database of reference passages with an
//! FTS5 table for relevance queries.
//!
//! **Access rules:**
//! - Index builders: read-write via [`PassageStore::open`]
//! - The generation pipeline: read-only via [`PassageStore::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, OpenFlags, params};
use postforge_shared::{PostforgeError, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Primary handle wrapping the passage database.
pub struct PassageStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl PassageStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PostforgeError::io(parent, e))?;
        }

        let (db, conn) = connect(path, OpenFlags::default()).await?;
        let store = Self {
            db,
            conn,
            readonly: false,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PostforgeError::Storage(format!(
                "knowledge index not found at {}",
                path.display()
            )));
        }

        let (db, conn) = connect(path, OpenFlags::SQLITE_OPEN_READ_ONLY).await?;
        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    PostforgeError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PostforgeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Passage operations
    // -----------------------------------------------------------------------

    /// Insert a passage. Returns `false` when identical content is already stored.
    pub async fn insert_passage(
        &self,
        source: &str,
        chunk_index: u32,
        content: &str,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO passages (id, source, chunk_index, content, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::now_v7().to_string(),
                    source,
                    chunk_index,
                    content,
                    content_hash(content),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| PostforgeError::Storage(e.to_string()))?;
        Ok(inserted > 0)
    }

    /// Number of stored passages.
    pub async fn passage_count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM passages", params![])
            .await
            .map_err(|e| PostforgeError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| PostforgeError::Storage(e.to_string()))?;
                Ok(count.max(0) as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(PostforgeError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Relevance search
    // -----------------------------------------------------------------------

    /// The `k` passages most relevant to `query`, best first.
    ///
    /// Queries with no searchable terms return an empty list.
    pub async fn top_k(&self, query: &str, k: usize) -> Result<Vec<ScoredPassage>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT p.source, p.content, rank
                 FROM passages_fts fts
                 JOIN passages p ON p.rowid = fts.rowid
                 WHERE passages_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![match_expr, k as i64],
            )
            .await
            .map_err(|e| PostforgeError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PostforgeError::Storage(e.to_string()))?
        {
            let source: String = row
                .get(0)
                .map_err(|e| PostforgeError::Storage(e.to_string()))?;
            let content: String = row
                .get(1)
                .map_err(|e| PostforgeError::Storage(e.to_string()))?;
            let score: f64 = row.get(2).unwrap_or(0.0);
            results.push(ScoredPassage {
                source,
                content,
                score,
            });
        }
        Ok(results)
    }
}

/// A passage returned by [`PassageStore::top_k`].
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    /// Document the passage was chunked from.
    pub source: String,
    /// Passage text.
    pub content: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

async fn connect(path: &Path, flags: OpenFlags) -> Result<(Database, Connection)> {
    let db = libsql::Builder::new_local(path)
        .flags(flags)
        .build()
        .await
        .map_err(|e| PostforgeError::Storage(e.to_string()))?;

    let conn = db
        .connect()
        .map_err(|e| PostforgeError::Storage(e.to_string()))?;

    Ok((db, conn))
}

/// Build an FTS5 match expression: every alphanumeric term quoted, OR-joined.
///
/// Quoting keeps user punctuation from being parsed as FTS5 syntax.
fn fts_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    if terms.is_empty() {
        None
    } else {
        Some(
            terms
                .iter()
                .map(|t| format!("\"{t}\""))
                .collect::<Vec<_>>()
                .join(" OR "),
        )
    }
}

/// SHA-256 of passage content, used to deduplicate inserts.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
