//! Asynchronous post-processing of conversation content.
//!
//! Runs the auxiliary LLM analyses off the request path: per user turn the
//! mistake feedback and the synonym/pronunciation challenges, and once at
//! conversation end the overall feedback and opinion summary. Jobs flow
//! through a bounded queue into a fixed pool of worker tasks; a full queue
//! rejects the job instead of spawning without bound, so a burst of turns
//! cannot pile unbounded concurrent calls onto the provider.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::prompts;
use crate::provider::ReplyGenerator;
use crate::store::{ChatLogger, LogKind, TranscriptStore, TurnArtifacts};

/// A unit of post-processing work.
#[derive(Debug, Clone)]
enum Job {
    /// Analyze one user turn.
    Turn {
        conversation_id: String,
        message_id: i64,
        user_text: String,
    },
    /// Derive the end-of-conversation artifacts.
    ConversationEnd { conversation_id: String },
}

/// Handle for dispatching post-processing jobs. Cheap to clone.
#[derive(Clone)]
pub struct PostProcessor {
    tx: mpsc::Sender<Job>,
    logger: ChatLogger,
}

impl PostProcessor {
    /// Spawn the worker pool and return the dispatch handle.
    ///
    /// `workers` tasks share one receiver; `queue_capacity` bounds how many
    /// jobs may wait. With zero workers jobs are queued but never processed
    /// (only useful in tests).
    pub fn spawn(
        workers: usize,
        queue_capacity: usize,
        generator: Arc<dyn ReplyGenerator>,
        transcripts: Arc<dyn TranscriptStore>,
        logger: ChatLogger,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker in 0..workers {
            let rx = rx.clone();
            let ctx = WorkerContext {
                generator: generator.clone(),
                transcripts: transcripts.clone(),
                logger: logger.clone(),
            };
            tokio::spawn(async move {
                tracing::debug!(worker, "post-processing worker started");
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => ctx.process(job).await,
                        None => break,
                    }
                }
                tracing::debug!(worker, "post-processing worker stopped");
            });
        }

        Self { tx, logger }
    }

    /// Enqueue the per-turn analyses for a user message. Returns false when
    /// the queue is full and the job was dropped.
    pub fn dispatch_turn(&self, conversation_id: &str, message_id: i64, user_text: &str) -> bool {
        self.dispatch(Job::Turn {
            conversation_id: conversation_id.to_string(),
            message_id,
            user_text: user_text.to_string(),
        })
    }

    /// Enqueue the end-of-conversation analyses. Returns false when the
    /// queue is full and the job was dropped.
    pub fn dispatch_conversation_end(&self, conversation_id: &str) -> bool {
        self.dispatch(Job::ConversationEnd {
            conversation_id: conversation_id.to_string(),
        })
    }

    fn dispatch(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(?job, "post-processing queue full, dropping job");
                self.logger
                    .log(LogKind::Error, "post-processing queue full, job dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(?job, "post-processing workers gone, dropping job");
                false
            }
        }
    }
}

/// Shared collaborators of one worker task.
struct WorkerContext {
    generator: Arc<dyn ReplyGenerator>,
    transcripts: Arc<dyn TranscriptStore>,
    logger: ChatLogger,
}

/// Structured mistake-feedback artifact.
#[derive(Debug, Deserialize)]
struct MistakeFeedback {
    #[allow(dead_code)]
    has_mistakes: bool,
    feedback: String,
}

impl WorkerContext {
    /// Process one job. Errors are logged and dropped; nothing may escape
    /// the worker loop.
    async fn process(&self, job: Job) {
        match job {
            Job::Turn {
                conversation_id,
                message_id,
                user_text,
            } => self.process_turn(&conversation_id, message_id, &user_text).await,
            Job::ConversationEnd { conversation_id } => {
                self.process_conversation_end(&conversation_id).await;
            }
        }
    }

    async fn process_turn(&self, conversation_id: &str, message_id: i64, user_text: &str) {
        let artifacts = TurnArtifacts {
            feedback: self
                .analysis::<MistakeFeedback>(&prompts::mistake_feedback_prompt(), user_text)
                .await
                .map(|f| f.feedback),
            synonym_challenge: self
                .analysis::<Vec<String>>(&prompts::synonym_challenge_prompt(), user_text)
                .await,
            pronunciation_challenge: self
                .analysis::<Vec<String>>(&prompts::pronunciation_challenge_prompt(), user_text)
                .await,
        };

        if let Err(e) = self.transcripts.set_turn_artifacts(message_id, &artifacts) {
            self.logger.log(
                LogKind::Error,
                format!("failed to store turn artifacts for conversation {conversation_id}: {e}"),
            );
        }
    }

    async fn process_conversation_end(&self, conversation_id: &str) {
        let transcript = match self.transcripts.formatted_transcript(conversation_id) {
            Ok(transcript) => transcript,
            Err(e) => {
                self.logger.log(
                    LogKind::Error,
                    format!("failed to load transcript for conversation {conversation_id}: {e}"),
                );
                return;
            }
        };

        match self
            .generator
            .generate_reply(&prompts::overall_feedback_prompt(), &[], &transcript)
            .await
        {
            Ok(feedback) => {
                if let Err(e) = self.transcripts.set_overall_feedback(conversation_id, &feedback) {
                    self.logger.log(
                        LogKind::Error,
                        format!("failed to store overall feedback for {conversation_id}: {e}"),
                    );
                }
            }
            Err(e) => self.logger.log(
                LogKind::Error,
                format!("overall feedback generation failed for {conversation_id}: {e}"),
            ),
        }

        match self
            .generator
            .generate_reply(&prompts::opinion_summary_prompt(), &[], &transcript)
            .await
        {
            Ok(summary) => {
                if let Err(e) = self.transcripts.set_opinion_summary(conversation_id, &summary) {
                    self.logger.log(
                        LogKind::Error,
                        format!("failed to store opinion summary for {conversation_id}: {e}"),
                    );
                }
            }
            Err(e) => self.logger.log(
                LogKind::Error,
                format!("opinion summary generation failed for {conversation_id}: {e}"),
            ),
        }
    }

    /// Run one analysis call and parse its structured output. A provider
    /// failure or malformed output degrades the artifact to absent.
    async fn analysis<T: serde::de::DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Option<T> {
        match self.generator.generate_reply(system_prompt, &[], user_text).await {
            Ok(raw) => {
                let parsed = parse_structured(&raw);
                if parsed.is_none() {
                    tracing::debug!(raw, "discarding malformed analysis output");
                }
                parsed
            }
            Err(e) => {
                tracing::warn!(error = %e, "analysis call failed");
                None
            }
        }
    }
}

/// Parse a structured analysis response, tolerating a markdown code fence
/// around the JSON.
fn parse_structured<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).ok()
}
