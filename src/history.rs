use crate::app_dirs::AppDirs;
use crate::session::Session;
use crate::util::mean;
use chrono::{DateTime, Utc};
use itertools::{Itertools, MinMaxResult};
use rusqlite::{params, Connection};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sessions kept unless configured otherwise
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt timestamp in history: {0}")]
    Timestamp(String),
}

/// Receives finished sessions from the engine
pub trait SessionRecorder {
    fn append(&mut self, session: &Session) -> Result<(), HistoryError>;
}

/// Bounded, newest-first session history in sqlite
#[derive(Debug)]
pub struct HistoryStore {
    conn: Connection,
    limit: usize,
}

impl HistoryStore {
    /// Opens (or creates) the history database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HistoryError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Opens the history database in the user's state directory
    pub fn open_default() -> Result<Self, HistoryError> {
        let path = AppDirs::history_path().unwrap_or_else(|| PathBuf::from("keypace_history.db"));
        Self::open(path)
    }

    pub fn in_memory() -> Result<Self, HistoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HistoryError> {
        // seq orders by insertion, so the head is always the latest append
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                domain TEXT NOT NULL,
                active_secs INTEGER NOT NULL,
                wpm INTEGER NOT NULL,
                cpm INTEGER NOT NULL,
                total_chars INTEGER NOT NULL,
                backspaces INTEGER NOT NULL,
                pasted_chars INTEGER NOT NULL,
                peak_wpm INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        Ok(HistoryStore {
            conn,
            limit: DEFAULT_HISTORY_LIMIT,
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Sessions, most recent first
    pub fn list(&self) -> Result<Vec<Session>, HistoryError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, domain, active_secs, wpm, cpm,
                   total_chars, backspaces, pasted_chars, peak_wpm
            FROM sessions
            ORDER BY seq DESC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                Session {
                    id: row.get(0)?,
                    created_at: DateTime::<Utc>::default(),
                    domain: row.get(2)?,
                    active_secs: row.get(3)?,
                    wpm: row.get(4)?,
                    cpm: row.get(5)?,
                    total_chars: row.get(6)?,
                    backspaces: row.get(7)?,
                    pasted_chars: row.get(8)?,
                    peak_wpm: row.get(9)?,
                },
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (created_at, mut session) = row?;
            session.created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|_| HistoryError::Timestamp(created_at.clone()))?
                .with_timezone(&Utc);
            sessions.push(session);
        }

        Ok(sessions)
    }

    pub fn clear(&self) -> Result<(), HistoryError> {
        self.conn.execute("DELETE FROM sessions", [])?;
        Ok(())
    }

    pub fn summary(&self) -> Result<HistorySummary, HistoryError> {
        Ok(HistorySummary::from_sessions(&self.list()?))
    }

    /// Writes all sessions as CSV with a header row, returning how many
    /// sessions were written.
    pub fn export_csv<W: Write>(&self, out: W) -> Result<usize, HistoryError> {
        let sessions = self.list()?;
        let mut writer = csv::Writer::from_writer(out);
        for session in &sessions {
            writer.serialize(session)?;
        }
        writer.flush()?;
        Ok(sessions.len())
    }
}

impl SessionRecorder for HistoryStore {
    fn append(&mut self, session: &Session) -> Result<(), HistoryError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO sessions
            (id, created_at, domain, active_secs, wpm, cpm,
             total_chars, backspaces, pasted_chars, peak_wpm)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                session.id,
                session.created_at.to_rfc3339(),
                session.domain,
                session.active_secs,
                session.wpm,
                session.cpm,
                session.total_chars,
                session.backspaces,
                session.pasted_chars,
                session.peak_wpm,
            ],
        )?;

        tx.execute(
            "DELETE FROM sessions WHERE seq NOT IN (SELECT seq FROM sessions ORDER BY seq DESC LIMIT ?1)",
            params![self.limit as i64],
        )?;

        tx.commit()?;
        tracing::debug!(id = session.id, domain = %session.domain, "session recorded");
        Ok(())
    }
}

/// Aggregate view over the stored sessions
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub sessions: usize,
    pub mean_wpm: Option<f64>,
    pub best_wpm: Option<u32>,
    pub slowest_wpm: Option<u32>,
    pub total_active_secs: u64,
    pub total_chars: u64,
}

impl HistorySummary {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let wpms: Vec<f64> = sessions.iter().map(|s| s.wpm as f64).collect();
        let (slowest_wpm, best_wpm) = match sessions.iter().map(|s| s.wpm).minmax() {
            MinMaxResult::NoElements => (None, None),
            MinMaxResult::OneElement(w) => (Some(w), Some(w)),
            MinMaxResult::MinMax(lo, hi) => (Some(lo), Some(hi)),
        };

        Self {
            sessions: sessions.len(),
            mean_wpm: mean(&wpms),
            best_wpm,
            slowest_wpm,
            total_active_secs: sessions.iter().map(|s| s.active_secs).sum(),
            total_chars: sessions.iter().map(|s| s.total_chars).sum(),
        }
    }
}
