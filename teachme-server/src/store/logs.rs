//! Persisted application logs and the write-only chatbot logger handle.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use teachme_common::{Error, Result};

use super::Database;

/// Kind of a persisted log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    Info,
    Error,
    Chatbot,
}

impl LogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
            Self::Chatbot => "CHATBOT",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "ERROR" => Ok(Self::Error),
            "CHATBOT" => Ok(Self::Chatbot),
            other => Err(Error::InvalidInput(format!("unknown log kind '{other}'"))),
        }
    }
}

/// One persisted log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub kind: LogKind,
    pub message: String,
    pub created_at: String,
}

/// Collection of log entries.
#[derive(Clone)]
pub struct LogCollection {
    db: Database,
}

impl LogCollection {
    pub(super) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a log entry.
    pub fn insert(&self, kind: LogKind, message: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO logs (kind, message, created_at) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), message, now],
        )?;
        Ok(())
    }

    /// All log entries, oldest first.
    pub fn retrieve_all(&self) -> Result<Vec<LogEntry>> {
        self.retrieve_internal(None)
    }

    /// Log entries of one kind, oldest first.
    pub fn retrieve_by_kind(&self, kind: LogKind) -> Result<Vec<LogEntry>> {
        self.retrieve_internal(Some(kind))
    }

    fn retrieve_internal(&self, kind: Option<LogKind>) -> Result<Vec<LogEntry>> {
        let conn = self.db.lock()?;
        let (query, bind) = match kind {
            Some(k) => (
                "SELECT id, kind, message, created_at FROM logs WHERE kind = ?1 ORDER BY id",
                Some(k.as_str()),
            ),
            None => (
                "SELECT id, kind, message, created_at FROM logs ORDER BY id",
                None,
            ),
        };

        let mut stmt = conn.prepare(query)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            let kind: String = row.get(1)?;
            Ok(LogEntry {
                id: row.get(0)?,
                kind: LogKind::parse(&kind).unwrap_or(LogKind::Info),
                message: row.get(2)?,
                created_at: row.get(3)?,
            })
        };

        let entries = match bind {
            Some(value) => stmt
                .query_map(params![value], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };

        Ok(entries)
    }
}

/// Write-only logging handle passed into the chat session core.
///
/// Entries also go to `tracing`; persistence failures are logged and
/// swallowed so a storage hiccup never disturbs the request path.
#[derive(Clone)]
pub struct ChatLogger {
    logs: Option<LogCollection>,
}

impl ChatLogger {
    /// A logger persisting to the given database.
    pub fn new(db: &Database) -> Self {
        Self {
            logs: Some(db.logs()),
        }
    }

    /// A logger that only emits tracing events. Used by tests.
    pub fn disabled() -> Self {
        Self { logs: None }
    }

    /// Record a log entry, fire-and-forget.
    pub fn log(&self, kind: LogKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            LogKind::Error => tracing::error!(target: "teachme", "{message}"),
            _ => tracing::info!(target: "teachme", kind = kind.as_str(), "{message}"),
        }

        if let Some(logs) = &self.logs {
            if let Err(e) = logs.insert(kind, &message) {
                tracing::warn!(error = %e, "failed to persist log entry");
            }
        }
    }
}
