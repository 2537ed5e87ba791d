//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Credential, ErrorLogEntry, JobState, JobStatus, JobStore, JobStoreError, MediaContext,
    MediaJob, NewMediaJob, Phase, PhaseStatusCount,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_SELECT: &str = "SELECT j.id, j.cid, j.lid, j.gid, j.sid, j.pid, j.qid, j.mid, j.url, \
     j.extension_id, e.extension, j.is_image, j.checksum, j.width, j.height, j.phase, j.status, \
     j.created_at FROM media_job j JOIN file_extension e ON e.id = j.extension_id";

/// SQLite-backed job store.
///
/// Also holds the centre and file source registry the download phase reads
/// credentials from.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

fn db(e: rusqlite::Error) -> JobStoreError {
    JobStoreError::Database(e.to_string())
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteJobStore {
    /// Open (or create) the store at `path`.
    pub fn new(path: &Path) -> Result<Self, JobStoreError> {
        let conn = Connection::open(path).map_err(db)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(db)?;
        // Separate invocations for different phases share the file.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobStoreError> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobStoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS centre (
                id INTEGER PRIMARY KEY,
                short_name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            CREATE TABLE IF NOT EXISTS file_source (
                centre_id INTEGER PRIMARY KEY,
                protocol TEXT NOT NULL,
                hostname TEXT NOT NULL,
                username TEXT NOT NULL,
                accesskey TEXT NOT NULL,
                base_path TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS file_extension (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                extension TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS media_job (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cid INTEGER NOT NULL,
                lid INTEGER NOT NULL,
                gid INTEGER NOT NULL,
                sid INTEGER NOT NULL,
                pid INTEGER NOT NULL,
                qid INTEGER NOT NULL,
                mid INTEGER NOT NULL,
                url TEXT NOT NULL,
                extension_id INTEGER NOT NULL REFERENCES file_extension(id),
                is_image INTEGER NOT NULL,
                checksum TEXT,
                width INTEGER,
                height INTEGER,
                phase TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (cid, lid, gid, sid, pid, qid, mid)
            );

            CREATE INDEX IF NOT EXISTS idx_media_job_phase_status ON media_job(phase, status);
            CREATE INDEX IF NOT EXISTS idx_media_job_url ON media_job(url);

            CREATE TABLE IF NOT EXISTS error_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES media_job(id),
                phase TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_error_log_job ON error_log(job_id);
            "#,
        )
        .map_err(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn
            .lock()
            .map_err(|_| JobStoreError::Database("connection mutex poisoned".to_string()))
    }

    /// Register a centre. Re-registering the same id updates its short name.
    pub fn add_centre(&self, id: i64, short_name: &str) -> Result<(), JobStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO centre (id, short_name) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET short_name = excluded.short_name",
            params![id, short_name],
        )
        .map_err(db)?;
        Ok(())
    }

    /// Insert or replace the file source credential for a centre.
    pub fn upsert_credential(&self, credential: &Credential) -> Result<(), JobStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO file_source
             (centre_id, protocol, hostname, username, accesskey, base_path)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                credential.centre_id,
                credential.protocol,
                credential.hostname,
                credential.username,
                credential.access_key,
                credential.base_path,
            ],
        )
        .map_err(db)?;
        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<MediaJob> {
        let phase_str: String = row.get(15)?;
        let status_str: String = row.get(16)?;
        let created_at_str: String = row.get(17)?;

        let phase: Phase = phase_str.parse().map_err(|e| conversion_error(15, e))?;
        let status: JobStatus = status_str.parse().map_err(|e| conversion_error(16, e))?;

        Ok(MediaJob {
            id: row.get(0)?,
            context: MediaContext {
                centre_id: row.get(1)?,
                pipeline_id: row.get(2)?,
                genotype_id: row.get(3)?,
                strain_id: row.get(4)?,
                procedure_id: row.get(5)?,
                parameter_id: row.get(6)?,
                measurement_id: row.get(7)?,
            },
            source_url: row.get(8)?,
            extension_id: row.get(9)?,
            extension: row.get(10)?,
            is_image: row.get(11)?,
            checksum: row.get(12)?,
            width: row.get(13)?,
            height: row.get(14)?,
            state: JobState::new(phase, status),
            created_at: parse_timestamp(&created_at_str),
        })
    }

    fn row_to_error(row: &rusqlite::Row) -> rusqlite::Result<ErrorLogEntry> {
        let phase_str: String = row.get(2)?;
        let created_at_str: String = row.get(4)?;
        Ok(ErrorLogEntry {
            id: row.get(0)?,
            job_id: row.get(1)?,
            phase: phase_str.parse().map_err(|e| conversion_error(2, e))?,
            message: row.get(3)?,
            created_at: parse_timestamp(&created_at_str),
        })
    }

    fn fetch_job(conn: &Connection, id: i64) -> Result<Option<MediaJob>, JobStoreError> {
        conn.query_row(
            &format!("{} WHERE j.id = ?", JOB_SELECT),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(db)
    }

    fn job_exists(conn: &Connection, id: i64) -> Result<bool, JobStoreError> {
        let found: Option<i64> = conn
            .query_row("SELECT id FROM media_job WHERE id = ?", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db)?;
        Ok(found.is_some())
    }

    fn collect_jobs(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<MediaJob>, JobStoreError> {
        let mut stmt = conn.prepare(sql).map_err(db)?;
        let rows = stmt.query_map(params, Self::row_to_job).map_err(db)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result.map_err(db)?);
        }
        Ok(jobs)
    }
}

impl JobStore for SqliteJobStore {
    fn enqueue(&self, job: NewMediaJob) -> Result<MediaJob, JobStoreError> {
        let conn = self.conn()?;
        let ctx = job.context;
        let state = JobState::DOWNLOAD_PENDING;

        let inserted = conn.execute(
            "INSERT INTO media_job
             (cid, lid, gid, sid, pid, qid, mid, url, extension_id, is_image, phase, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                ctx.centre_id,
                ctx.pipeline_id,
                ctx.genotype_id,
                ctx.strain_id,
                ctx.procedure_id,
                ctx.parameter_id,
                ctx.measurement_id,
                job.source_url,
                job.extension_id,
                job.is_image,
                state.phase.as_str(),
                state.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && Self::find_context(&conn, &ctx)?.is_some() =>
            {
                return Err(JobStoreError::DuplicateContext(ctx));
            }
            Err(e) => return Err(db(e)),
        }

        let id = conn.last_insert_rowid();
        Self::fetch_job(&conn, id)?.ok_or(JobStoreError::NotFound(id))
    }

    fn get(&self, id: i64) -> Result<Option<MediaJob>, JobStoreError> {
        let conn = self.conn()?;
        Self::fetch_job(&conn, id)
    }

    fn find_by_context(&self, context: &MediaContext) -> Result<Option<MediaJob>, JobStoreError> {
        let conn = self.conn()?;
        Self::find_context(&conn, context)
    }

    fn list_by_phase_status(
        &self,
        state: JobState,
        centre_id: Option<i64>,
    ) -> Result<Vec<MediaJob>, JobStoreError> {
        let conn = self.conn()?;
        let phase = state.phase.as_str();
        let status = state.status.as_str();

        match centre_id {
            Some(cid) => Self::collect_jobs(
                &conn,
                &format!(
                    "{} WHERE j.phase = ? AND j.status = ? AND j.cid = ? ORDER BY j.id ASC",
                    JOB_SELECT
                ),
                &[&phase, &status, &cid],
            ),
            None => Self::collect_jobs(
                &conn,
                &format!(
                    "{} WHERE j.phase = ? AND j.status = ? ORDER BY j.id ASC",
                    JOB_SELECT
                ),
                &[&phase, &status],
            ),
        }
    }

    fn find_latest_successful_by_url(&self, url: &str) -> Result<Option<MediaJob>, JobStoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "{} WHERE j.url = ? AND (j.phase != 'download' OR j.status = 'done')
                 ORDER BY j.id DESC LIMIT 1",
                JOB_SELECT
            ),
            params![url],
            Self::row_to_job,
        )
        .optional()
        .map_err(db)
    }

    fn set_phase_status(&self, job_id: i64, state: JobState) -> Result<(), JobStoreError> {
        if !state.is_valid() {
            return Err(JobStoreError::InvalidState(state));
        }

        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE media_job SET phase = ?, status = ? WHERE id = ?",
                params![state.phase.as_str(), state.status.as_str(), job_id],
            )
            .map_err(db)?;

        if updated == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    fn set_checksum(&self, job_id: i64, checksum: &str) -> Result<(), JobStoreError> {
        let conn = self.conn()?;
        let current: Option<Option<String>> = conn
            .query_row(
                "SELECT checksum FROM media_job WHERE id = ?",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;

        match current {
            None => Err(JobStoreError::NotFound(job_id)),
            Some(Some(existing)) if existing == checksum => Ok(()),
            Some(Some(existing)) => Err(JobStoreError::ChecksumConflict { job_id, existing }),
            Some(None) => {
                conn.execute(
                    "UPDATE media_job SET checksum = ? WHERE id = ? AND checksum IS NULL",
                    params![checksum, job_id],
                )
                .map_err(db)?;
                Ok(())
            }
        }
    }

    fn set_dimensions(&self, job_id: i64, width: u32, height: u32) -> Result<(), JobStoreError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE media_job SET width = ?, height = ? WHERE id = ?",
                params![width, height, job_id],
            )
            .map_err(db)?;

        if updated == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    fn append_error(
        &self,
        job_id: i64,
        phase: Phase,
        message: &str,
    ) -> Result<ErrorLogEntry, JobStoreError> {
        let conn = self.conn()?;
        if !Self::job_exists(&conn, job_id)? {
            return Err(JobStoreError::NotFound(job_id));
        }

        let now = Utc::now();
        conn.execute(
            "INSERT INTO error_log (job_id, phase, message, created_at) VALUES (?, ?, ?, ?)",
            params![job_id, phase.as_str(), message, now.to_rfc3339()],
        )
        .map_err(db)?;

        Ok(ErrorLogEntry {
            id: conn.last_insert_rowid(),
            job_id,
            phase,
            message: message.to_string(),
            created_at: now,
        })
    }

    fn list_errors(&self, job_id: i64) -> Result<Vec<ErrorLogEntry>, JobStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, job_id, phase, message, created_at FROM error_log
                 WHERE job_id = ? ORDER BY id ASC",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map(params![job_id], Self::row_to_error)
            .map_err(db)?;

        let mut entries = Vec::new();
        for row_result in rows {
            entries.push(row_result.map_err(db)?);
        }
        Ok(entries)
    }

    fn lookup_or_create_extension(&self, name: &str) -> Result<i64, JobStoreError> {
        let conn = self.conn()?;
        let name = name.to_ascii_lowercase();

        conn.execute(
            "INSERT OR IGNORE INTO file_extension (extension) VALUES (?)",
            params![name],
        )
        .map_err(db)?;

        conn.query_row(
            "SELECT id FROM file_extension WHERE extension = ?",
            params![name],
            |row| row.get(0),
        )
        .map_err(db)
    }

    fn lookup_credential(&self, centre_id: i64) -> Result<Option<Credential>, JobStoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT centre_id, protocol, hostname, username, accesskey, base_path
             FROM file_source WHERE centre_id = ?",
            params![centre_id],
            |row| {
                Ok(Credential {
                    centre_id: row.get(0)?,
                    protocol: row.get(1)?,
                    hostname: row.get(2)?,
                    username: row.get(3)?,
                    access_key: row.get(4)?,
                    base_path: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(db)
    }

    fn lookup_centre_id(&self, short_name: &str) -> Result<Option<i64>, JobStoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id FROM centre WHERE short_name = ?",
            params![short_name],
            |row| row.get(0),
        )
        .optional()
        .map_err(db)
    }

    fn count_by_phase_status(&self) -> Result<Vec<PhaseStatusCount>, JobStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT phase, status, COUNT(*) FROM media_job GROUP BY phase, status")
            .map_err(db)?;
        let rows = stmt
            .query_map([], |row| {
                let phase: String = row.get(0)?;
                let status: String = row.get(1)?;
                let count: i64 = row.get(2)?;
                Ok(PhaseStatusCount {
                    state: JobState::new(
                        phase.parse().map_err(|e| conversion_error(0, e))?,
                        status.parse().map_err(|e| conversion_error(1, e))?,
                    ),
                    count: count as u64,
                })
            })
            .map_err(db)?;

        let mut counts = Vec::new();
        for row_result in rows {
            counts.push(row_result.map_err(db)?);
        }
        counts.sort_by_key(|c| c.state);
        Ok(counts)
    }
}

impl SqliteJobStore {
    fn find_context(
        conn: &Connection,
        ctx: &MediaContext,
    ) -> Result<Option<MediaJob>, JobStoreError> {
        conn.query_row(
            &format!(
                "{} WHERE j.cid = ? AND j.lid = ? AND j.gid = ? AND j.sid = ? AND j.pid = ?
                 AND j.qid = ? AND j.mid = ?",
                JOB_SELECT
            ),
            params![
                ctx.centre_id,
                ctx.pipeline_id,
                ctx.genotype_id,
                ctx.strain_id,
                ctx.procedure_id,
                ctx.parameter_id,
                ctx.measurement_id,
            ],
            Self::row_to_job,
        )
        .optional()
        .map_err(db)
    }
}
