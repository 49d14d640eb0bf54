use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio_rusqlite::Connection;

use crate::types::{AlertRecord, CorrectionRecord, DriftReport};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only SQLite store for drift reports, correction records and alerts.
///
/// Each record is written once as a JSON document alongside the columns
/// needed for querying. There is no update or delete path.
pub struct RecordDb {
    conn: Connection,
}

/// SQLite treats a negative LIMIT as unbounded.
const NO_LIMIT: i64 = -1;

/// Timestamps are stored in one fixed RFC 3339 form so that text comparison
/// orders them chronologically.
fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl RecordDb {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        tracing::info!(path = %path.as_ref().display(), "record store opened");
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS drift_reports (
                        id          TEXT PRIMARY KEY,
                        environment TEXT NOT NULL,
                        timestamp   TEXT NOT NULL,
                        overall     INTEGER NOT NULL,
                        document    TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_drift_reports_env_ts
                        ON drift_reports(environment, timestamp);

                    CREATE TABLE IF NOT EXISTS corrections (
                        id          TEXT PRIMARY KEY,
                        environment TEXT NOT NULL,
                        timestamp   TEXT NOT NULL,
                        applied     INTEGER NOT NULL,
                        succeeded   INTEGER NOT NULL,
                        failed      INTEGER NOT NULL,
                        document    TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_corrections_env_ts
                        ON corrections(environment, timestamp);

                    CREATE TABLE IF NOT EXISTS alerts (
                        id                      TEXT PRIMARY KEY,
                        environment             TEXT NOT NULL,
                        timestamp               TEXT NOT NULL,
                        max_corrections_reached INTEGER NOT NULL,
                        document                TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_alerts_env_ts
                        ON alerts(environment, timestamp);
                    ",
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inserts
    // -----------------------------------------------------------------------

    pub async fn insert_drift_report(&self, report: &DriftReport) -> Result<(), StoreError> {
        let id = report.id.to_string();
        let environment = report.environment.clone();
        let timestamp = ts_to_sql(&report.timestamp);
        let overall = report.status.overall;
        let document = serde_json::to_string(report)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO drift_reports (id, environment, timestamp, overall, document)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, environment, timestamp, overall, document],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn insert_correction(&self, record: &CorrectionRecord) -> Result<(), StoreError> {
        let id = record.id.to_string();
        let environment = record.environment.clone();
        let timestamp = ts_to_sql(&record.timestamp);
        let tally = record.corrections;
        let document = serde_json::to_string(record)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO corrections (id, environment, timestamp, applied, succeeded,
                        failed, document)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        id,
                        environment,
                        timestamp,
                        tally.applied,
                        tally.succeeded,
                        tally.failed,
                        document,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn insert_alert(&self, record: &AlertRecord) -> Result<(), StoreError> {
        let id = record.id.to_string();
        let environment = record.environment.clone();
        let timestamp = ts_to_sql(&record.timestamp);
        let max_reached = record.max_corrections_reached;
        let document = serde_json::to_string(record)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO alerts (id, environment, timestamp, max_corrections_reached,
                        document)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, environment, timestamp, max_reached, document],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Number of correction records for `environment` at or after `since`.
    pub async fn count_corrections_since(
        &self,
        environment: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let environment = environment.to_string();
        let since = ts_to_sql(&since);
        let count = self
            .conn
            .call(move |conn| {
                let n = conn.query_row(
                    "SELECT COUNT(*) FROM corrections WHERE environment = ?1 AND timestamp >= ?2",
                    rusqlite::params![environment, since],
                    |r| r.get::<_, i64>(0),
                )?;
                Ok(n)
            })
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Most recent drift reports for `environment`, newest first.
    pub async fn list_drift_reports(
        &self,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<DriftReport>, StoreError> {
        let docs = self
            .documents(
                "SELECT document FROM drift_reports WHERE environment = ?1
                 ORDER BY timestamp DESC LIMIT ?2",
                environment,
                i64::try_from(limit).unwrap_or(i64::MAX),
            )
            .await?;
        decode_all(docs)
    }

    pub async fn list_corrections(&self, environment: &str) -> Result<Vec<CorrectionRecord>, StoreError> {
        let docs = self
            .documents(
                "SELECT document FROM corrections WHERE environment = ?1
                 ORDER BY timestamp DESC LIMIT ?2",
                environment,
                NO_LIMIT,
            )
            .await?;
        decode_all(docs)
    }

    pub async fn list_alerts(&self, environment: &str) -> Result<Vec<AlertRecord>, StoreError> {
        let docs = self
            .documents(
                "SELECT document FROM alerts WHERE environment = ?1
                 ORDER BY timestamp DESC LIMIT ?2",
                environment,
                NO_LIMIT,
            )
            .await?;
        decode_all(docs)
    }

    async fn documents(
        &self,
        sql: &'static str,
        environment: &str,
        limit: i64,
    ) -> Result<Vec<String>, StoreError> {
        let environment = environment.to_string();
        let docs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let mut rows = stmt.query(rusqlite::params![environment, limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row.get::<_, String>(0)?);
                }
                Ok(out)
            })
            .await?;
        Ok(docs)
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(docs: Vec<String>) -> Result<Vec<T>, StoreError> {
    docs.iter()
        .map(|d| serde_json::from_str(d).map_err(StoreError::from))
        .collect()
}
