//! The session registry: the single source of truth for which conversations
//! currently have a live chatbot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use teachme_common::{Error, Result};
use tokio::sync::Mutex;

use super::chatbot::{ChatSession, Reply};
use crate::postprocess::PostProcessor;
use crate::provider::ReplyGenerator;
use crate::store::{ChatLogger, ConversationStore, LogKind, TranscriptStore};

const INITIALIZED: &str = "Conversation initialized successfully";
const ENDED: &str = "Conversation ended successfully";
const NOT_INITIALIZED: &str = "Chatbot not initialized. Before sending messages, you must \
initialize the conversation. See /initialize-conversation.";
const NOT_FOUND: &str =
    "Conversation not found. You must create a conversation before initializing it.";

/// Concurrency-safe index of active chat sessions.
///
/// The map lock guards registry bookkeeping only: it is held for lookups,
/// inserts and removals, never across a store or LLM call. Individual
/// sessions process their messages outside the lock, so distinct
/// conversations chat concurrently.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ChatSession>>>,
    conversations: Arc<dyn ConversationStore>,
    transcripts: Arc<dyn TranscriptStore>,
    generator: Arc<dyn ReplyGenerator>,
    postprocess: PostProcessor,
    logger: ChatLogger,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        transcripts: Arc<dyn TranscriptStore>,
        generator: Arc<dyn ReplyGenerator>,
        postprocess: PostProcessor,
        logger: ChatLogger,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            conversations,
            transcripts,
            generator,
            postprocess,
            logger,
            idle_timeout,
        }
    }

    /// Initialize the session for a conversation.
    ///
    /// The conversation must already exist in the store. Initializing an
    /// already-registered conversation is a no-op success, so at most one
    /// session exists per conversation id.
    pub async fn initialize(&self, conversation_id: &str) -> Result<&'static str> {
        if conversation_id.trim().is_empty() {
            self.logger.log(
                LogKind::Error,
                format!("invalid conversation_id: {conversation_id:?}"),
            );
            return Err(Error::InvalidInput("invalid conversation_id".into()));
        }

        let conversation = self
            .conversations
            .find_conversation(conversation_id)?
            .ok_or_else(|| {
                self.logger.log(
                    LogKind::Error,
                    format!("conversation not found: {conversation_id}"),
                );
                Error::NotFound(NOT_FOUND.into())
            })?;

        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(conversation_id) {
            self.logger.log(
                LogKind::Info,
                format!("initializing conversation with id {conversation_id}"),
            );
            let session = Arc::new(ChatSession::new(
                conversation,
                self.generator.clone(),
                self.transcripts.clone(),
                self.postprocess.clone(),
                self.logger.clone(),
                self.idle_timeout,
            ));
            sessions.insert(conversation_id.to_string(), session);
        }

        Ok(INITIALIZED)
    }

    /// Look up the session for a conversation, if registered.
    pub async fn get(&self, conversation_id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.lock().await.get(conversation_id).cloned()
    }

    /// Number of currently registered sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Forward a user message into the conversation's session.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Reply> {
        let session = self
            .get(conversation_id)
            .await
            .ok_or_else(|| Error::NotFound(NOT_INITIALIZED.into()))?;

        session.send_message(text).await
    }

    /// End a conversation: drop its session (if any) and persist the ended
    /// flag on the record regardless of whether a live session existed.
    pub async fn end(&self, conversation_id: &str) -> Result<&'static str> {
        let removed = { self.sessions.lock().await.remove(conversation_id) };
        if let Some(session) = removed {
            session.deactivate();
        }

        self.conversations
            .mark_conversation_ended(conversation_id)
            .map_err(|e| {
                self.logger.log(
                    LogKind::Error,
                    format!("failed to end conversation {conversation_id} in the store: {e}"),
                );
                e
            })?;

        self.logger.log(
            LogKind::Info,
            format!("chatbot for conversation {conversation_id} ended"),
        );
        Ok(ENDED)
    }

    /// One sweep cycle: evict every session idle past its timeout.
    ///
    /// The idleness decision uses the pure `is_idle` query on a snapshot
    /// taken under the lock; the evictions themselves run unlocked and go
    /// through the same teardown path as an explicit end.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, session)| session.is_idle(now))
                .map(|(id, _)| id.clone())
                .collect()
        };

        for conversation_id in expired {
            self.logger.log(
                LogKind::Info,
                format!("evicting idle conversation {conversation_id}"),
            );
            if let Err(e) = self.end(&conversation_id).await {
                self.logger.log(
                    LogKind::Error,
                    format!("idle eviction of {conversation_id} failed: {e}"),
                );
            }
        }
    }
}

/// Run the idle sweep on a fixed interval until the process exits.
///
/// This is the registry's only background task; sweep errors are logged
/// inside [`SessionRegistry::sweep`] and never escape here.
pub async fn run_idle_sweeper(registry: Arc<SessionRegistry>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so a fresh server does
    // not sweep before any session can register.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        registry.sweep().await;
    }
}
