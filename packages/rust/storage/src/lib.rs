//! libSQL storage layer (local embedded mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding notebooks, their
//! sources, and the generation job ledger.
//!
//! **Access rules:**
//! - The generation pipeline is the only writer of `generation_jobs` rows
//!   after creation, via [`Storage::insert_job`] and [`Storage::update_job`].
//! - Read-only consumers open the database with [`Storage::open_readonly`].

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use notecast_shared::{
    GenerationJob, JobId, JobStatus, JobUpdate, Notebook, NotecastError, Result, Source,
    SourceStatus,
};
use uuid::Uuid;

/// Map any displayable libSQL error into a storage error.
fn db_err(e: impl std::fmt::Display) -> NotecastError {
    NotecastError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NotecastError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

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
                    NotecastError::Storage(format!("migration v{} failed: {e}", migration.version))
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
            return Err(NotecastError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notebook operations
    // -----------------------------------------------------------------------

    /// Create a notebook and return it.
    pub async fn insert_notebook(&self, name: &str) -> Result<Notebook> {
        self.check_writable()?;
        let notebook = Notebook {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO notebooks (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![
                    notebook.id.as_str(),
                    notebook.name.as_str(),
                    notebook.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(notebook)
    }

    /// Get a notebook by ID.
    pub async fn get_notebook(&self, id: &str) -> Result<Option<Notebook>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, created_at FROM notebooks WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_notebook(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List all notebooks, newest first.
    pub async fn list_notebooks(&self) -> Result<Vec<Notebook>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, created_at FROM notebooks ORDER BY created_at DESC",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_notebook(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Source operations
    // -----------------------------------------------------------------------

    /// Insert a source record.
    pub async fn insert_source(&self, source: &Source) -> Result<()> {
        self.check_writable()?;
        let topics_json = serde_json::to_string(&source.topics).map_err(db_err)?;
        self.conn
            .execute(
                "INSERT INTO sources (id, notebook_id, name, kind, status, content, summary, topics_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    source.id.as_str(),
                    source.notebook_id.as_str(),
                    source.name.as_str(),
                    source.kind.as_str(),
                    source.status.as_str(),
                    source.content.as_deref(),
                    source.summary.as_deref(),
                    topics_json,
                    source.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Change a source's ingestion status.
    pub async fn set_source_status(&self, source_id: &str, status: SourceStatus) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE sources SET status = ?1 WHERE id = ?2",
                params![status.as_str(), source_id],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(NotecastError::not_found("source", source_id));
        }
        Ok(())
    }

    /// List every source of a notebook in creation order.
    pub async fn list_sources(&self, notebook_id: &str) -> Result<Vec<Source>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, notebook_id, name, kind, status, content, summary, topics_json, created_at
                 FROM sources WHERE notebook_id = ?1 ORDER BY created_at, id",
                params![notebook_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_source(&row)?);
        }
        Ok(results)
    }

    /// Sources in `ready` state, optionally restricted to `source_ids`.
    ///
    /// Results keep creation order regardless of the order of `source_ids`.
    pub async fn select_ready_sources(
        &self,
        notebook_id: &str,
        source_ids: Option<&[String]>,
    ) -> Result<Vec<Source>> {
        let sources = self.list_sources(notebook_id).await?;
        Ok(sources
            .into_iter()
            .filter(|s| s.status == SourceStatus::Ready)
            .filter(|s| source_ids.is_none_or(|ids| ids.iter().any(|id| *id == s.id)))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Generation job ledger
    // -----------------------------------------------------------------------

    /// Insert a new ledger row.
    pub async fn insert_job(&self, job: &GenerationJob) -> Result<()> {
        self.check_writable()?;
        let source_ids_json = serde_json::to_string(&job.source_ids).map_err(db_err)?;
        self.conn
            .execute(
                "INSERT INTO generation_jobs
                   (id, notebook_id, kind, variant, source_ids_json, custom_instructions,
                    status, progress_percent, cost_usd, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.id.to_string(),
                    job.notebook_id.as_str(),
                    job.kind.as_str(),
                    job.variant.as_str(),
                    source_ids_json,
                    job.custom_instructions.as_deref(),
                    job.status.as_str(),
                    i64::from(job.progress_percent),
                    job.cost_usd,
                    job.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Apply a partial update to a non-terminal ledger row.
    ///
    /// `script` is never cleared, `progress_percent` and `cost_usd` never
    /// decrease, and `completed_at` is written at most once. Updating a row
    /// that already reached `completed` or `failed` is rejected.
    pub async fn update_job(&self, id: &JobId, update: &JobUpdate) -> Result<()> {
        self.check_writable()?;
        if update.is_empty() {
            return Ok(());
        }

        let changed = self
            .conn
            .execute(
                "UPDATE generation_jobs SET
                   status           = COALESCE(?1, status),
                   progress_percent = MAX(progress_percent, COALESCE(?2, progress_percent)),
                   script           = COALESCE(?3, script),
                   model_used       = COALESCE(?4, model_used),
                   media_path       = COALESCE(?5, media_path),
                   media_url        = COALESCE(?6, media_url),
                   mime_type        = COALESCE(?7, mime_type),
                   duration_seconds = COALESCE(?8, duration_seconds),
                   cost_usd         = MAX(cost_usd, COALESCE(?9, cost_usd)),
                   error_message    = COALESCE(?10, error_message),
                   completed_at     = COALESCE(completed_at, ?11)
                 WHERE id = ?12 AND status NOT IN ('completed', 'failed')",
                params![
                    update.status.map(|s| s.as_str()),
                    update.progress_percent.map(i64::from),
                    update.script.as_deref(),
                    update.model_used.as_deref(),
                    update.media_path.as_deref(),
                    update.media_url.as_deref(),
                    update.mime_type.as_deref(),
                    update.duration_seconds.map(i64::from),
                    update.cost_usd,
                    update.error_message.as_deref(),
                    update.completed_at.map(|t| t.to_rfc3339()),
                    id.to_string(),
                ],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            return match self.get_job(id).await? {
                None => Err(NotecastError::not_found("job", id.to_string())),
                Some(job) => Err(NotecastError::validation(format!(
                    "job {id} is already {} and cannot be updated",
                    job.status
                ))),
            };
        }
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<GenerationJob>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List a notebook's jobs, newest first.
    pub async fn list_jobs(&self, notebook_id: &str) -> Result<Vec<GenerationJob>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM generation_jobs
                     WHERE notebook_id = ?1 ORDER BY created_at DESC, id DESC"
                ),
                params![notebook_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    /// Delete a job row. Returns whether a row was removed.
    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "DELETE FROM generation_jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Mark jobs stuck in `pending`/`processing` since before `cutoff` as failed.
    ///
    /// Returns the number of rows reaped.
    pub async fn fail_stale_jobs(&self, cutoff: DateTime<Utc>, message: &str) -> Result<u64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let reaped = self
            .conn
            .execute(
                "UPDATE generation_jobs
                 SET status = ?1, error_message = ?2, completed_at = COALESCE(completed_at, ?3)
                 WHERE status IN ('pending', 'processing') AND created_at < ?4",
                params![
                    JobStatus::Failed.as_str(),
                    message,
                    now.as_str(),
                    cutoff.to_rfc3339()
                ],
            )
            .await
            .map_err(db_err)?;
        if reaped > 0 {
            tracing::warn!(reaped, "marked stale generation jobs as failed");
        }
        Ok(reaped)
    }
}

/// Column list shared by every job query, in [`row_to_job`] order.
const JOB_COLUMNS: &str = "id, notebook_id, kind, variant, source_ids_json, custom_instructions, \
     status, progress_percent, script, media_path, media_url, mime_type, duration_seconds, \
     model_used, cost_usd, error_message, created_at, completed_at";

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NotecastError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Notebook`].
fn row_to_notebook(row: &libsql::Row) -> Result<Notebook> {
    Ok(Notebook {
        id: row.get::<String>(0).map_err(db_err)?,
        name: row.get::<String>(1).map_err(db_err)?,
        created_at: parse_time(&row.get::<String>(2).map_err(db_err)?)?,
    })
}

/// Convert a database row to a [`Source`].
fn row_to_source(row: &libsql::Row) -> Result<Source> {
    let topics_json: String = row.get(7).map_err(db_err)?;
    Ok(Source {
        id: row.get::<String>(0).map_err(db_err)?,
        notebook_id: row.get::<String>(1).map_err(db_err)?,
        name: row.get::<String>(2).map_err(db_err)?,
        kind: row.get::<String>(3).map_err(db_err)?.parse()?,
        status: row.get::<String>(4).map_err(db_err)?.parse()?,
        content: row.get::<String>(5).ok(),
        summary: row.get::<String>(6).ok(),
        topics: serde_json::from_str(&topics_json).map_err(db_err)?,
        created_at: parse_time(&row.get::<String>(8).map_err(db_err)?)?,
    })
}

/// Convert a database row to a [`GenerationJob`].
fn row_to_job(row: &libsql::Row) -> Result<GenerationJob> {
    let id: String = row.get(0).map_err(db_err)?;
    let source_ids_json: String = row.get(4).map_err(db_err)?;
    Ok(GenerationJob {
        id: id
            .parse()
            .map_err(|e| NotecastError::Storage(format!("invalid job id {id}: {e}")))?,
        notebook_id: row.get::<String>(1).map_err(db_err)?,
        kind: row.get::<String>(2).map_err(db_err)?.parse()?,
        variant: row.get::<String>(3).map_err(db_err)?.parse()?,
        source_ids: serde_json::from_str(&source_ids_json).map_err(db_err)?,
        custom_instructions: row.get::<String>(5).ok(),
        status: row.get::<String>(6).map_err(db_err)?.parse()?,
        progress_percent: row.get::<i64>(7).map_err(db_err)?.clamp(0, 100) as u8,
        script: row.get::<String>(8).ok(),
        media_path: row.get::<String>(9).ok(),
        media_url: row.get::<String>(10).ok(),
        mime_type: row.get::<String>(11).ok(),
        duration_seconds: row.get::<i64>(12).ok().map(|v| v as u32),
        model_used: row.get::<String>(13).ok(),
        cost_usd: row.get::<f64>(14).unwrap_or(0.0),
        error_message: row.get::<String>(15).ok(),
        created_at: parse_time(&row.get::<String>(16).map_err(db_err)?)?,
        completed_at: match row.get::<String>(17).ok() {
            Some(s) => Some(parse_time(&s)?),
            None => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notecast_shared::{SourceKind, Variant};

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("notecast_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn text_source(notebook_id: &str, name: &str, status: SourceStatus) -> Source {
        Source {
            id: Uuid::now_v7().to_string(),
            notebook_id: notebook_id.to_string(),
            name: name.to_string(),
            kind: SourceKind::Text,
            status,
            content: Some(format!("content of {name}")),
            summary: None,
            topics: vec!["alpha".into()],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("notecast_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn notebook_crud() {
        let storage = test_storage().await;
        let nb = storage.insert_notebook("Biology").await.expect("insert");
        let found = storage.get_notebook(&nb.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Biology");
        assert_eq!(storage.list_notebooks().await.unwrap().len(), 1);
        assert!(storage.get_notebook("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ready_source_selection() {
        let storage = test_storage().await;
        let nb = storage.insert_notebook("nb").await.unwrap();

        let a = text_source(&nb.id, "a", SourceStatus::Ready);
        let b = text_source(&nb.id, "b", SourceStatus::Processing);
        let c = text_source(&nb.id, "c", SourceStatus::Ready);
        for s in [&a, &b, &c] {
            storage.insert_source(s).await.unwrap();
        }

        let all = storage.select_ready_sources(&nb.id, None).await.unwrap();
        let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);

        let subset = [c.id.clone(), b.id.clone()];
        let picked = storage
            .select_ready_sources(&nb.id, Some(&subset))
            .await
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, c.id);
        assert_eq!(picked[0].topics, vec!["alpha".to_string()]);

        storage
            .set_source_status(&b.id, SourceStatus::Ready)
            .await
            .unwrap();
        assert_eq!(
            storage.select_ready_sources(&nb.id, None).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn job_insert_and_partial_update() {
        let storage = test_storage().await;
        let job = GenerationJob::new_pending("nb-1", Variant::Brief, vec!["s1".into()], None);
        storage.insert_job(&job).await.expect("insert job");

        storage
            .update_job(
                &job.id,
                &JobUpdate {
                    status: Some(JobStatus::Processing),
                    progress_percent: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        storage
            .update_job(
                &job.id,
                &JobUpdate {
                    script: Some("Host 1: hello".into()),
                    cost_usd: Some(0.25),
                    progress_percent: Some(50),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let found = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Processing);
        assert_eq!(found.script.as_deref(), Some("Host 1: hello"));
        assert_eq!(found.progress_percent, 50);
        assert!((found.cost_usd - 0.25).abs() < 1e-9);
        assert_eq!(found.source_ids, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn cost_and_progress_never_decrease() {
        let storage = test_storage().await;
        let job = GenerationJob::new_pending("nb-1", Variant::Brief, vec![], None);
        storage.insert_job(&job).await.unwrap();

        for (cost, progress) in [(0.5, 60), (0.1, 10)] {
            storage
                .update_job(
                    &job.id,
                    &JobUpdate {
                        cost_usd: Some(cost),
                        progress_percent: Some(progress),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let found = storage.get_job(&job.id).await.unwrap().unwrap();
        assert!((found.cost_usd - 0.5).abs() < 1e-9);
        assert_eq!(found.progress_percent, 60);
    }

    #[tokio::test]
    async fn terminal_rows_reject_updates() {
        let storage = test_storage().await;
        let job = GenerationJob::new_pending("nb-1", Variant::Explainer, vec![], None);
        storage.insert_job(&job).await.unwrap();

        let first_done = Utc::now();
        storage
            .update_job(
                &job.id,
                &JobUpdate {
                    status: Some(JobStatus::Failed),
                    error_message: Some("no usable source content".into()),
                    completed_at: Some(first_done),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = storage
            .update_job(
                &job.id,
                &JobUpdate {
                    status: Some(JobStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already failed"));

        let found = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Failed);
        assert!(found.completed_at.is_some());
    }

    #[tokio::test]
    async fn update_missing_job_is_not_found() {
        let storage = test_storage().await;
        let err = storage
            .update_job(
                &JobId::new(),
                &JobUpdate {
                    progress_percent: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NotecastError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_and_delete_jobs() {
        let storage = test_storage().await;
        let first = GenerationJob::new_pending("nb-1", Variant::Brief, vec![], None);
        let second = GenerationJob::new_pending("nb-1", Variant::Debate, vec![], None);
        let other = GenerationJob::new_pending("nb-2", Variant::Brief, vec![], None);
        for job in [&first, &second, &other] {
            storage.insert_job(job).await.unwrap();
        }

        let jobs = storage.list_jobs("nb-1").await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, second.id);

        assert!(storage.delete_job(&first.id).await.unwrap());
        assert!(!storage.delete_job(&first.id).await.unwrap());
        assert_eq!(storage.list_jobs("nb-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_jobs_are_reaped() {
        let storage = test_storage().await;
        let mut old = GenerationJob::new_pending("nb-1", Variant::Brief, vec![], None);
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        let fresh = GenerationJob::new_pending("nb-1", Variant::Brief, vec![], None);
        storage.insert_job(&old).await.unwrap();
        storage.insert_job(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let reaped = storage
            .fail_stale_jobs(cutoff, "interrupted before completion")
            .await
            .unwrap();
        assert_eq!(reaped, 1);

        let old = storage.get_job(&old.id).await.unwrap().unwrap();
        assert_eq!(old.status, JobStatus::Failed);
        assert!(old.completed_at.is_some());
        let fresh = storage.get_job(&fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("notecast_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_notebook("nb").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_notebook("other").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
        assert_eq!(ro.list_notebooks().await.unwrap().len(), 1);
    }
}
