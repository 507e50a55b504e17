//! Shared fakes for unit tests: an in-memory store and a scripted reply
//! generator.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use teachme_common::{Error, Result};

use crate::provider::{ChatTurn, ProviderError, ReplyGenerator};
use crate::store::{
    Conversation, ConversationStore, MessageRole, StoredMessage, TranscriptStore, TurnArtifacts,
};

/// Build a minimal conversation record for tests.
pub fn conversation(id: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        user_level: "intermediate".into(),
        difficulty: "medium".into(),
        topic: Some("Travel".into()),
        teacher_email: "teacher@mail.com".into(),
        student_email: "student@mail.com".into(),
        time_limit_minutes: 5,
        parent_conversation_id: None,
        ended: false,
        created_at: "2024-01-01T00:00:00Z".into(),
    }
}

/// In-memory implementation of the store traits.
#[derive(Default)]
pub struct FakeStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    messages: Mutex<Vec<StoredMessage>>,
    overall_feedback: Mutex<HashMap<String, String>>,
    opinion_summaries: Mutex<HashMap<String, String>>,
    next_message_id: AtomicI64,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Insert a fresh (not ended) conversation with the given id.
    pub fn insert_conversation(&self, id: &str) {
        self.insert(conversation(id));
    }

    /// Insert an arbitrary conversation record.
    pub fn insert(&self, record: Conversation) {
        self.conversations
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(id).cloned()
    }

    pub fn message(&self, message_id: i64) -> Option<StoredMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub fn message_count(&self, conversation_id: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count()
    }

    pub fn overall_feedback(&self, conversation_id: &str) -> Option<String> {
        self.overall_feedback
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
    }

    pub fn opinion_summary(&self, conversation_id: &str) -> Option<String> {
        self.opinion_summaries
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
    }
}

impl ConversationStore for FakeStore {
    fn find_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversation(id))
    }

    fn mark_conversation_ended(&self, id: &str) -> Result<()> {
        let mut conversations = self.conversations.lock().unwrap();
        match conversations.get_mut(id) {
            Some(record) => {
                record.ended = true;
                Ok(())
            }
            None => Err(Error::NotFound(format!("conversation {id} does not exist"))),
        }
    }
}

impl TranscriptStore for FakeStore {
    fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<i64> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(StoredMessage {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            feedback: None,
            synonym_challenge: None,
            pronunciation_challenge: None,
            created_at: "2024-01-01T00:00:00Z".into(),
        });
        Ok(id)
    }

    fn set_turn_artifacts(&self, message_id: i64, artifacts: &TurnArtifacts) -> Result<()> {
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::NotFound(format!("message {message_id} does not exist")))?;

        if artifacts.feedback.is_some() {
            message.feedback = artifacts.feedback.clone();
        }
        if artifacts.synonym_challenge.is_some() {
            message.synonym_challenge = artifacts.synonym_challenge.clone();
        }
        if artifacts.pronunciation_challenge.is_some() {
            message.pronunciation_challenge = artifacts.pronunciation_challenge.clone();
        }
        Ok(())
    }

    fn set_overall_feedback(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.overall_feedback
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), text.to_string());
        Ok(())
    }

    fn set_opinion_summary(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.opinion_summaries
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), text.to_string());
        Ok(())
    }

    fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    fn formatted_transcript(&self, conversation_id: &str) -> Result<String> {
        let messages = TranscriptStore::messages(self, conversation_id)?;
        Ok(messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Reply generator with a scripted queue of responses.
///
/// Responses are served in order; when the queue runs dry the default reply
/// is repeated. `failing()` builds a generator whose every call errors.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    default_reply: String,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: "Hello! Nice to meet you, let's practice together.".into(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// How many times the generator has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_reply(
        &self,
        _system_prompt: &str,
        _history: &[ChatTurn],
        _user_message: &str,
    ) -> std::result::Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(ProviderError {
                provider: "scripted".into(),
                message: "provider unavailable".into(),
                status_code: Some(503),
            });
        }

        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone()))
    }
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_until<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
