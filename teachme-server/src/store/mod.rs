//! Document store for the TeachMe backend.
//!
//! A single SQLite database holds the collections the application persists:
//! user accounts (with their friendship relations), conversation
//! configurations, the managed per-conversation message logs with derived
//! feedback artifacts, and application logs. Open-ended fields (friend
//! lists, challenge lists) are stored as JSON text, document-style.
//!
//! The chat session core reaches storage only through the narrow
//! [`ConversationStore`] and [`TranscriptStore`] traits so tests can inject
//! in-memory fakes.

mod conversations;
mod logs;
mod users;

pub use conversations::{
    Conversation, ConversationCollection, ManagedConversationCollection, MessageRole,
    NewConversation, StoredMessage, TurnArtifacts,
};
pub use logs::{ChatLogger, LogCollection, LogEntry, LogKind};
pub use users::{FriendInfo, NewUser, StudentInfo, User, UserCollection, UserRole};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use teachme_common::{Error, Result};

/// Handle to the backing document database.
///
/// Cheap to clone; all clones share one connection guarded by a mutex. The
/// lock is held only for the duration of a single statement batch, never
/// across network or LLM calls.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (and initialize) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                username TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                friends TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_level TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                topic TEXT,
                teacher_email TEXT NOT NULL,
                student_email TEXT NOT NULL,
                time_limit_minutes INTEGER NOT NULL,
                parent_conversation_id TEXT,
                ended INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS managed_conversations (
                conversation_id TEXT PRIMARY KEY,
                overall_feedback TEXT,
                opinion_summary TEXT
            );

            CREATE TABLE IF NOT EXISTS conversation_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                feedback TEXT,
                synonym_challenge TEXT,
                pronunciation_challenge TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON conversation_messages(conversation_id);

            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            ",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("database lock poisoned: {e}")))
    }

    /// User account collection.
    pub fn users(&self) -> UserCollection {
        UserCollection::new(self.clone())
    }

    /// Conversation configuration collection.
    pub fn conversations(&self) -> ConversationCollection {
        ConversationCollection::new(self.clone())
    }

    /// Managed conversation collection (message log + derived artifacts).
    pub fn managed_conversations(&self) -> ManagedConversationCollection {
        ManagedConversationCollection::new(self.clone())
    }

    /// Application log collection.
    pub fn logs(&self) -> LogCollection {
        LogCollection::new(self.clone())
    }
}

/// Read/write access to conversation records, as needed by the session core.
pub trait ConversationStore: Send + Sync {
    /// Look up a conversation by id.
    fn find_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Persist the ended flag on a conversation. Fails with
    /// [`Error::NotFound`] when no record matches.
    fn mark_conversation_ended(&self, id: &str) -> Result<()>;
}

/// Access to the managed message log, as needed by sessions and
/// post-processing.
pub trait TranscriptStore: Send + Sync {
    /// Append one message and return its id.
    fn append_message(&self, conversation_id: &str, role: MessageRole, content: &str)
        -> Result<i64>;

    /// Attach per-turn artifacts to a message. Absent artifacts leave the
    /// corresponding field untouched.
    fn set_turn_artifacts(&self, message_id: i64, artifacts: &TurnArtifacts) -> Result<()>;

    /// Store the end-of-conversation overall feedback.
    fn set_overall_feedback(&self, conversation_id: &str, text: &str) -> Result<()>;

    /// Store the end-of-conversation opinion summary.
    fn set_opinion_summary(&self, conversation_id: &str, text: &str) -> Result<()>;

    /// The full message log, oldest first.
    fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;

    /// The message log rendered as "role: content" lines.
    fn formatted_transcript(&self, conversation_id: &str) -> Result<String>;
}

impl ConversationStore for Database {
    fn find_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.conversations().find_by_id(id)
    }

    fn mark_conversation_ended(&self, id: &str) -> Result<()> {
        self.conversations().mark_ended(id)
    }
}

impl TranscriptStore for Database {
    fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<i64> {
        self.managed_conversations()
            .append_message(conversation_id, role, content)
    }

    fn set_turn_artifacts(&self, message_id: i64, artifacts: &TurnArtifacts) -> Result<()> {
        self.managed_conversations()
            .set_turn_artifacts(message_id, artifacts)
    }

    fn set_overall_feedback(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.managed_conversations()
            .set_overall_feedback(conversation_id, text)
    }

    fn set_opinion_summary(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.managed_conversations()
            .set_opinion_summary(conversation_id, text)
    }

    fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        self.managed_conversations().messages(conversation_id)
    }

    fn formatted_transcript(&self, conversation_id: &str) -> Result<String> {
        self.managed_conversations()
            .formatted_transcript(conversation_id)
    }
}
