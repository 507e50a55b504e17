//! Conversation configurations and the managed per-conversation message log.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use teachme_common::{Error, Result};
use uuid::Uuid;

use super::Database;

/// Persisted conversation configuration. Immutable once created except for
/// the `ended` flag, which only the session teardown path flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_level: String,
    pub difficulty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub teacher_email: String,
    pub student_email: String,
    pub time_limit_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_conversation_id: Option<String>,
    pub ended: bool,
    pub created_at: String,
}

/// Fields for creating a conversation.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub user_level: String,
    pub difficulty: String,
    pub topic: Option<String>,
    pub teacher_email: String,
    pub student_email: String,
    /// Defaults to 5 minutes when unset.
    pub time_limit_minutes: Option<u32>,
    pub parent_conversation_id: Option<String>,
}

/// Who authored a message in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Human,
    Ai,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ai" => Self::Ai,
            _ => Self::Human,
        }
    }
}

/// One entry of the managed message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synonym_challenge: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pronunciation_challenge: Option<Vec<String>>,
    pub created_at: String,
}

/// Per-turn artifacts produced by post-processing. A `None` field means the
/// artifact was malformed or unavailable and stays absent in the record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnArtifacts {
    pub feedback: Option<String>,
    pub synonym_challenge: Option<Vec<String>>,
    pub pronunciation_challenge: Option<Vec<String>>,
}

/// Collection of conversation configurations.
#[derive(Clone)]
pub struct ConversationCollection {
    db: Database,
}

impl ConversationCollection {
    pub(super) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a conversation and its managed record.
    pub fn create(&self, request: &NewConversation) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let time_limit = request.time_limit_minutes.unwrap_or(5);

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO conversations
                 (id, user_level, difficulty, topic, teacher_email, student_email,
                  time_limit_minutes, parent_conversation_id, ended, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            params![
                id,
                request.user_level,
                request.difficulty,
                request.topic,
                request.teacher_email,
                request.student_email,
                time_limit,
                request.parent_conversation_id,
                now,
            ],
        )?;
        conn.execute(
            "INSERT INTO managed_conversations (conversation_id) VALUES (?1)",
            params![id],
        )?;

        Ok(Conversation {
            id,
            user_level: request.user_level.clone(),
            difficulty: request.difficulty.clone(),
            topic: request.topic.clone(),
            teacher_email: request.teacher_email.clone(),
            student_email: request.student_email.clone(),
            time_limit_minutes: time_limit,
            parent_conversation_id: request.parent_conversation_id.clone(),
            ended: false,
            created_at: now,
        })
    }

    /// Find a conversation by id.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.db.lock()?;
        let conversation = conn
            .query_row(
                "SELECT id, user_level, difficulty, topic, teacher_email, student_email,
                        time_limit_minutes, parent_conversation_id, ended, created_at
                 FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Conversation {
                        id: row.get(0)?,
                        user_level: row.get(1)?,
                        difficulty: row.get(2)?,
                        topic: row.get(3)?,
                        teacher_email: row.get(4)?,
                        student_email: row.get(5)?,
                        time_limit_minutes: row.get(6)?,
                        parent_conversation_id: row.get(7)?,
                        ended: row.get::<_, i64>(8)? != 0,
                        created_at: row.get(9)?,
                    })
                },
            )
            .optional()?;

        Ok(conversation)
    }

    /// Mark a conversation as ended. Fails when no record matches.
    pub fn mark_ended(&self, id: &str) -> Result<()> {
        let conn = self.db.lock()?;
        let rows = conn.execute(
            "UPDATE conversations SET ended = 1 WHERE id = ?1",
            params![id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!(
                "conversation {id} does not exist"
            )));
        }
        Ok(())
    }
}

/// Collection holding the message log and derived artifacts of each
/// conversation.
#[derive(Clone)]
pub struct ManagedConversationCollection {
    db: Database,
}

impl ManagedConversationCollection {
    pub(super) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one message to the log and return its id.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO conversation_messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), content, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Attach per-turn artifacts to a message. Absent fields stay NULL.
    pub fn set_turn_artifacts(&self, message_id: i64, artifacts: &TurnArtifacts) -> Result<()> {
        let synonym_json = artifacts
            .synonym_challenge
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let pronunciation_json = artifacts
            .pronunciation_challenge
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE conversation_messages
             SET feedback = COALESCE(?1, feedback),
                 synonym_challenge = COALESCE(?2, synonym_challenge),
                 pronunciation_challenge = COALESCE(?3, pronunciation_challenge)
             WHERE id = ?4",
            params![artifacts.feedback, synonym_json, pronunciation_json, message_id],
        )?;
        Ok(())
    }

    /// Store the overall feedback for a conversation.
    pub fn set_overall_feedback(&self, conversation_id: &str, text: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE managed_conversations SET overall_feedback = ?1 WHERE conversation_id = ?2",
            params![text, conversation_id],
        )?;
        Ok(())
    }

    /// Store the opinion summary for a conversation.
    pub fn set_opinion_summary(&self, conversation_id: &str, text: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE managed_conversations SET opinion_summary = ?1 WHERE conversation_id = ?2",
            params![text, conversation_id],
        )?;
        Ok(())
    }

    /// The derived end-of-conversation artifacts, if produced yet.
    pub fn derived_artifacts(
        &self,
        conversation_id: &str,
    ) -> Result<(Option<String>, Option<String>)> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT overall_feedback, opinion_summary
                 FROM managed_conversations WHERE conversation_id = ?1",
                params![conversation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.ok_or_else(|| Error::NotFound(format!("conversation {conversation_id} does not exist")))
    }

    /// The full message log, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, feedback,
                    synonym_challenge, pronunciation_challenge, created_at
             FROM conversation_messages WHERE conversation_id = ?1 ORDER BY id",
        )?;

        let messages = stmt
            .query_map(params![conversation_id], |row| {
                let role: String = row.get(2)?;
                let synonym_json: Option<String> = row.get(5)?;
                let pronunciation_json: Option<String> = row.get(6)?;
                Ok(StoredMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    role: MessageRole::parse(&role),
                    content: row.get(3)?,
                    feedback: row.get(4)?,
                    synonym_challenge: synonym_json
                        .and_then(|j| serde_json::from_str(&j).ok()),
                    pronunciation_challenge: pronunciation_json
                        .and_then(|j| serde_json::from_str(&j).ok()),
                    created_at: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    /// The message log rendered as "role: content" lines, for prompting.
    pub fn formatted_transcript(&self, conversation_id: &str) -> Result<String> {
        let messages = self.messages(conversation_id)?;
        let lines: Vec<String> = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();
        Ok(lines.join("\n"))
    }
}
