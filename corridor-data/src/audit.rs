//! SQLite persistence for the run audit trail.
//!
//! The log keeps three tables: `runs` holds one row per run with its final
//! summary, `feature_identities` holds the latest admitted content hash for
//! every feature identity, and `job_outcomes` holds the final state of every
//! job. Identity rows are replaced when a later version is admitted, so the
//! table always reflects what the next run should be seeded with.

use camino::{Utf8Path, Utf8PathBuf};
use corridor_core::{
    AuditError, AuditEvent, AuditSink, ContentHash, DedupRecord, FeatureId,
};
use rusqlite::{Connection, Error as SqliteError};
use thiserror::Error;

/// Errors raised by [`SqliteAuditLog`].
#[derive(Debug, Error)]
pub enum AuditLogError {
    /// Failed to create the parent directory for the database.
    #[error("failed to create parent directory for {path:?}")]
    CreateDirectory {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite audit log at {path:?}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Creating the audit tables failed.
    #[error("failed to create audit tables")]
    CreateSchema {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A count or index does not fit an SQLite integer.
    #[error("{field} {value} exceeds SQLite i64 range")]
    OutOfRange {
        /// Field being stored.
        field: &'static str,
        /// Value that failed the conversion.
        value: usize,
    },
    /// Serialising an event payload failed.
    #[error("failed to serialise {event} payload")]
    Serialize {
        /// Event kind.
        event: &'static str,
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
    /// Writing an event row failed.
    #[error("failed to record {event} event")]
    Write {
        /// Event kind.
        event: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Reading stored identities failed.
    #[error("failed to read stored feature identities")]
    ReadIdentities {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A stored identity is blank.
    #[error("stored feature identity {id:?} is invalid")]
    InvalidIdentity {
        /// Stored value.
        id: String,
    },
}

impl From<AuditLogError> for AuditError {
    fn from(err: AuditLogError) -> Self {
        Self::new(err.to_string(), err)
    }
}

/// Audit sink backed by an SQLite database on disk.
///
/// # Examples
///
/// ```
/// use camino::Utf8PathBuf;
/// use corridor_core::{AuditEvent, AuditSink};
/// use corridor_data::SqliteAuditLog;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempfile::tempdir()?;
/// let path = Utf8PathBuf::from_path_buf(dir.path().join("audit.db"))
///     .map_err(|_| "temporary directory is not UTF-8")?;
/// let mut log = SqliteAuditLog::open(&path)?;
/// log.record(&AuditEvent::RunStarted { run_id: "r1".into(), reports: 0 })?;
/// assert!(log.load_prior_identities()?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteAuditLog {
    path: Utf8PathBuf,
    connection: Connection,
}

impl SqliteAuditLog {
    /// Open or create the audit log at `path`.
    ///
    /// Parent directories are created and the tables initialised if missing.
    pub fn open(path: &Utf8Path) -> Result<Self, AuditLogError> {
        corridor_fs::ensure_parent_dir(path).map_err(|source| AuditLogError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        })?;
        let connection =
            Connection::open(path.as_std_path()).map_err(|source| AuditLogError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        create_schema(&connection)?;
        log::debug!("opened audit log at {path}");
        Ok(Self {
            path: path.to_path_buf(),
            connection,
        })
    }

    /// Location of the database.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn write(&self, event: &AuditEvent) -> Result<(), AuditLogError> {
        match event {
            AuditEvent::RunStarted { run_id, reports } => {
                let reports = to_sql_int("reports", *reports)?;
                self.connection
                    .execute(
                        "INSERT OR REPLACE INTO runs (run_id, reports) VALUES (?1, ?2)",
                        (run_id, reports),
                    )
                    .map_err(|source| AuditLogError::Write {
                        event: "run_started",
                        source,
                    })?;
            }
            AuditEvent::FeatureAdmitted {
                run_id,
                record,
                admission,
            } => {
                let decision = to_json("feature_admitted", admission)?;
                self.connection
                    .execute(
                        "INSERT OR REPLACE INTO feature_identities \
                         (id, content_hash, run_id, admission) VALUES (?1, ?2, ?3, ?4)",
                        (
                            record.id.as_str(),
                            record.content_hash.as_str(),
                            run_id,
                            decision,
                        ),
                    )
                    .map_err(|source| AuditLogError::Write {
                        event: "feature_admitted",
                        source,
                    })?;
            }
            AuditEvent::JobFinished { run_id, job } => {
                let index = to_sql_int("job index", job.job)?;
                let record = to_json("job_finished", job)?;
                self.connection
                    .execute(
                        "INSERT OR REPLACE INTO job_outcomes (run_id, job, record) \
                         VALUES (?1, ?2, ?3)",
                        (run_id, index, record),
                    )
                    .map_err(|source| AuditLogError::Write {
                        event: "job_finished",
                        source,
                    })?;
            }
            AuditEvent::RunFinished { run_id, summary } => {
                let summary = to_json("run_finished", summary)?;
                self.connection
                    .execute(
                        "UPDATE runs SET summary = ?2 WHERE run_id = ?1",
                        (run_id, summary),
                    )
                    .map_err(|source| AuditLogError::Write {
                        event: "run_finished",
                        source,
                    })?;
            }
        }
        Ok(())
    }

    fn identities(&self) -> Result<Vec<DedupRecord>, AuditLogError> {
        let read = |source| AuditLogError::ReadIdentities { source };
        let mut statement = self
            .connection
            .prepare("SELECT id, content_hash FROM feature_identities ORDER BY id")
            .map_err(read)?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(read)?;
        let mut records = Vec::new();
        for row in rows {
            let (id, hash) = row.map_err(read)?;
            let id = FeatureId::new(&id).map_err(|_| AuditLogError::InvalidIdentity { id })?;
            records.push(DedupRecord {
                id,
                content_hash: ContentHash::from_hex(hash),
            });
        }
        Ok(records)
    }
}

impl AuditSink for SqliteAuditLog {
    fn record(&mut self, event: &AuditEvent) -> Result<(), AuditError> {
        Ok(self.write(event)?)
    }

    fn load_prior_identities(&self) -> Result<Vec<DedupRecord>, AuditError> {
        let records = self.identities()?;
        log::info!(
            "loaded {} prior feature identities from {}",
            records.len(),
            self.path
        );
        Ok(records)
    }
}

fn create_schema(connection: &Connection) -> Result<(), AuditLogError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                reports INTEGER NOT NULL,
                summary TEXT
            );
            CREATE TABLE IF NOT EXISTS feature_identities (
                id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                run_id TEXT NOT NULL,
                admission TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS job_outcomes (
                run_id TEXT NOT NULL,
                job INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (run_id, job)
            );",
        )
        .map_err(|source| AuditLogError::CreateSchema { source })
}

fn to_sql_int(field: &'static str, value: usize) -> Result<i64, AuditLogError> {
    i64::try_from(value).map_err(|_| AuditLogError::OutOfRange { field, value })
}

fn to_json<T: serde::Serialize>(event: &'static str, value: &T) -> Result<String, AuditLogError> {
    serde_json::to_string(value).map_err(|source| AuditLogError::Serialize { event, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_core::{Admission, JobRecord, JobState, RunSummary};
    use rstest::{fixture, rstest};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[fixture]
    fn db() -> (TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/audit.db"))
            .expect("utf-8 temp dir");
        (dir, path)
    }

    fn admitted(run_id: &str, id: &str, hash: &str) -> AuditEvent {
        AuditEvent::FeatureAdmitted {
            run_id: run_id.into(),
            record: DedupRecord {
                id: FeatureId::new(id).expect("valid id"),
                content_hash: ContentHash::from_hex(hash),
            },
            admission: Admission::AcceptedNew,
        }
    }

    fn count(path: &Utf8Path, table: &str) -> i64 {
        let connection = Connection::open(path.as_std_path()).expect("open db");
        connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .expect("count rows")
    }

    #[rstest]
    fn identities_survive_reopening(db: (TempDir, Utf8PathBuf)) {
        let (_guard, path) = db;
        {
            let mut log = SqliteAuditLog::open(&path).expect("open");
            log.record(&admitted("r1", "Valve B", "bb")).expect("record");
            log.record(&admitted("r1", "Valve A", "aa")).expect("record");
        }
        let log = SqliteAuditLog::open(&path).expect("reopen");
        let ids: Vec<(String, String)> = log
            .load_prior_identities()
            .expect("load")
            .into_iter()
            .map(|r| (r.id.to_string(), r.content_hash.to_string()))
            .collect();
        assert_eq!(
            ids,
            [
                ("Valve A".to_owned(), "aa".to_owned()),
                ("Valve B".to_owned(), "bb".to_owned())
            ]
        );
    }

    #[rstest]
    fn later_versions_replace_identities(db: (TempDir, Utf8PathBuf)) {
        let (_guard, path) = db;
        let mut log = SqliteAuditLog::open(&path).expect("open");
        log.record(&admitted("r1", "Valve", "old")).expect("record");
        log.record(&admitted("r2", "Valve", "new")).expect("record");
        let records = log.load_prior_identities().expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content_hash.as_str(), "new");
    }

    #[rstest]
    fn run_lifecycle_is_stored(db: (TempDir, Utf8PathBuf)) {
        let (_guard, path) = db;
        let mut log = SqliteAuditLog::open(&path).expect("open");
        log.record(&AuditEvent::RunStarted {
            run_id: "r1".into(),
            reports: 3,
        })
        .expect("start");
        log.record(&AuditEvent::JobFinished {
            run_id: "r1".into(),
            job: JobRecord {
                job: 0,
                reports: vec![PathBuf::from("a.txt")],
                state: JobState::Failed {
                    error: "report not found".into(),
                },
            },
        })
        .expect("job");
        log.record(&AuditEvent::RunFinished {
            run_id: "r1".into(),
            summary: RunSummary {
                reports: 3,
                ..RunSummary::default()
            },
        })
        .expect("finish");

        assert_eq!(count(&path, "runs"), 1);
        assert_eq!(count(&path, "job_outcomes"), 1);
        let connection = Connection::open(path.as_std_path()).expect("open db");
        let summary: String = connection
            .query_row("SELECT summary FROM runs WHERE run_id = 'r1'", [], |row| {
                row.get(0)
            })
            .expect("summary");
        let summary: serde_json::Value = serde_json::from_str(&summary).expect("json");
        assert_eq!(summary["reports"], 3);
        let record: String = connection
            .query_row("SELECT record FROM job_outcomes", [], |row| row.get(0))
            .expect("job record");
        assert!(record.contains("\"failed\""));
    }

    #[rstest]
    fn open_fails_when_parent_is_a_file(db: (TempDir, Utf8PathBuf)) {
        let (guard, _) = db;
        let blocker = guard.path().join("blocker");
        std::fs::write(&blocker, "x").expect("write blocker");
        let path = Utf8PathBuf::from_path_buf(blocker.join("audit.db")).expect("utf-8");
        let err = SqliteAuditLog::open(&path).expect_err("parent is a file");
        assert!(matches!(err, AuditLogError::CreateDirectory { .. }));
    }
}
