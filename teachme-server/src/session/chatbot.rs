//! The stateful wrapper around one active conversation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use teachme_common::{Error, Result};

use crate::postprocess::PostProcessor;
use crate::prompts;
use crate::provider::{ChatTurn, ReplyGenerator};
use crate::store::{ChatLogger, Conversation, LogKind, MessageRole, TranscriptStore};

/// Fixed reply returned once a conversation no longer accepts messages.
pub const ENDED_REPLY: &str =
    "This conversation has ended. Start a new conversation to keep practicing!";

/// A chatbot reply plus the session's activity flag.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub active: bool,
}

impl Reply {
    fn ended() -> Self {
        Self {
            text: ENDED_REPLY.to_string(),
            active: false,
        }
    }
}

/// Mutable session state, guarded by a plain mutex held only for field
/// access, never across an await point.
struct SessionState {
    active: bool,
    last_user_message: Instant,
}

/// One active chatbot session.
///
/// Owned by the registry while present; a session starts `Active` unless its
/// conversation record was already marked ended, in which case it is born
/// `Inactive` and answers every message with the fixed ended reply without
/// contacting the LLM. `Inactive` is terminal.
pub struct ChatSession {
    conversation: Conversation,
    system_prompt: String,
    idle_timeout: Duration,
    generator: Arc<dyn ReplyGenerator>,
    transcripts: Arc<dyn TranscriptStore>,
    postprocess: PostProcessor,
    logger: ChatLogger,
    state: Mutex<SessionState>,
    /// Serializes concurrent message sends against this session so two
    /// in-flight turns cannot interleave on the shared history.
    turn_lock: tokio::sync::Mutex<()>,
}

impl ChatSession {
    pub fn new(
        conversation: Conversation,
        generator: Arc<dyn ReplyGenerator>,
        transcripts: Arc<dyn TranscriptStore>,
        postprocess: PostProcessor,
        logger: ChatLogger,
        idle_timeout: Duration,
    ) -> Self {
        let system_prompt = prompts::conversation_system_prompt(
            &conversation.user_level,
            &conversation.difficulty,
            conversation.topic.as_deref(),
        );
        let active = !conversation.ended;

        Self {
            conversation,
            system_prompt,
            idle_timeout,
            generator,
            transcripts,
            postprocess,
            logger,
            state: Mutex::new(SessionState {
                active,
                last_user_message: Instant::now(),
            }),
            turn_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation.id
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().expect("session state poisoned").active
    }

    /// How long the session has gone without a user message. Pure query:
    /// asking never changes the session state.
    pub fn elapsed_idle(&self, now: Instant) -> Duration {
        let last = self
            .state
            .lock()
            .expect("session state poisoned")
            .last_user_message;
        now.saturating_duration_since(last)
    }

    /// Whether the session has outlived its idle timeout. Pure; eviction is
    /// the sweep driver's explicit decision.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.elapsed_idle(now) > self.idle_timeout
    }

    /// Forward a user message and return the generated reply.
    ///
    /// An inactive session answers with the fixed ended reply; that is a
    /// defined terminal response, not an error. Provider failures surface as
    /// [`Error::Upstream`].
    pub async fn send_message(&self, text: &str) -> Result<Reply> {
        if !self.is_active() {
            return Ok(Reply::ended());
        }

        let _turn = self.turn_lock.lock().await;

        // The session may have been deactivated while waiting for the lock.
        if !self.is_active() {
            return Ok(Reply::ended());
        }

        self.touch();

        let conversation_id = self.conversation_id().to_string();
        let history = self.load_history()?;

        let reply = self
            .generator
            .generate_reply(&self.system_prompt, &history, text)
            .await
            .map_err(|e| {
                self.logger.log(
                    LogKind::Error,
                    format!("reply generation failed for conversation {conversation_id}: {e}"),
                );
                Error::Upstream(e.to_string())
            })?;

        let message_id = self
            .transcripts
            .append_message(&conversation_id, MessageRole::Human, text)?;
        self.transcripts
            .append_message(&conversation_id, MessageRole::Ai, &reply)?;

        // Analyses run off the request path; the reply is not held up.
        self.postprocess
            .dispatch_turn(&conversation_id, message_id, text);

        self.logger.log(
            LogKind::Chatbot,
            format!("reply generated for conversation {conversation_id}"),
        );

        Ok(Reply {
            text: reply,
            active: true,
        })
    }

    /// Flip the session to `Inactive`. Idempotent; the first flip enqueues
    /// the end-of-conversation analyses without blocking the caller.
    /// Returns whether this call performed the transition.
    pub fn deactivate(&self) -> bool {
        let flipped = {
            let mut state = self.state.lock().expect("session state poisoned");
            std::mem::replace(&mut state.active, false)
        };

        if flipped {
            self.postprocess
                .dispatch_conversation_end(self.conversation_id());
            self.logger.log(
                LogKind::Chatbot,
                format!("conversation {} deactivated", self.conversation_id()),
            );
        }

        flipped
    }

    fn touch(&self) {
        self.state
            .lock()
            .expect("session state poisoned")
            .last_user_message = Instant::now();
    }

    fn load_history(&self) -> Result<Vec<ChatTurn>> {
        let messages = self.transcripts.messages(self.conversation_id())?;
        Ok(messages
            .into_iter()
            .map(|m| match m.role {
                MessageRole::Human => ChatTurn::user(m.content),
                MessageRole::Ai => ChatTurn::assistant(m.content),
            })
            .collect())
    }
}
