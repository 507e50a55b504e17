//! Route definitions for the TeachMe backend.
//!
//! HTTP endpoints for account management, teacher/student friendships,
//! conversation lifecycle, chat messages, logs, and health checks. Handlers
//! convert domain errors to an HTTP status plus a JSON body and never crash
//! the handling task.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use teachme_common::config::Config;
use teachme_common::Error;

use crate::postprocess::PostProcessor;
use crate::provider::ReplyGenerator;
use crate::session::SessionRegistry;
use crate::store::{
    ChatLogger, ConversationStore, Database, LogEntry, LogKind, NewConversation, NewUser,
    StoredMessage, TranscriptStore, UserRole,
};

/// How long the uid cookie stays valid (10 days).
const UID_COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 10;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<SessionRegistry>,
    pub logger: ChatLogger,
}

/// Wire the collaborators into the application state.
///
/// The registry and the post-processing workers are owned here and injected
/// into handlers through the state; the reply generator is passed in so
/// tests can substitute a scripted one.
pub fn build_state(config: &Config, db: Database, generator: Arc<dyn ReplyGenerator>) -> AppState {
    let logger = ChatLogger::new(&db);
    let conversations: Arc<dyn ConversationStore> = Arc::new(db.clone());
    let transcripts: Arc<dyn TranscriptStore> = Arc::new(db.clone());

    let postprocess = PostProcessor::spawn(
        config.chatbot.postprocess_workers,
        config.chatbot.postprocess_queue,
        generator.clone(),
        transcripts.clone(),
        logger.clone(),
    );

    let registry = Arc::new(SessionRegistry::new(
        conversations,
        transcripts,
        generator,
        postprocess,
        logger.clone(),
        Duration::from_secs(config.chatbot.idle_timeout_secs),
    ));

    AppState {
        db,
        registry,
        logger,
    }
}

/// Build the router with every endpoint.
pub fn build_all_routes(state: AppState) -> Router {
    Router::new()
        // Auth
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/me", get(me_handler))
        // Users and friendships
        .route("/create-friendship", post(create_friendship_handler))
        .route("/remove-friendship", post(remove_friendship_handler))
        .route("/get-friends/:user_email", get(get_friends_handler))
        .route("/get-all-students", get(get_all_students_handler))
        .route("/get-username/:user_email", get(get_username_handler))
        // Conversations
        .route("/create-conversation", post(create_conversation_handler))
        .route(
            "/initialize-conversation",
            post(initialize_conversation_handler),
        )
        .route("/user-chat-message", post(user_chat_message_handler))
        .route(
            "/end-conversation/:conversation_id",
            get(end_conversation_handler),
        )
        .route(
            "/conversation-feedback/:conversation_id",
            get(conversation_feedback_handler),
        )
        .route("/active-chatbots", get(active_chatbots_handler))
        // Logs
        .route("/logs", get(all_logs_handler))
        .route("/logs/:kind", get(logs_by_kind_handler))
        // Health
        .route("/health", get(health_handler))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Domain error carried out of a handler.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match &self.0 {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Upstream(_) => "UPSTREAM_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.into(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Simple message response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    pub role: String,
}

/// Registration response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub uid: String,
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub uid: String,
    pub role: UserRole,
}

/// Identity response for `/me`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
    pub user_email: String,
    pub role: UserRole,
}

fn uid_cookie(uid: &str) -> [(header::HeaderName, String); 1] {
    [(
        header::SET_COOKIE,
        format!("uid={uid}; Max-Age={UID_COOKIE_MAX_AGE_SECS}; Path=/"),
    )]
}

fn uid_from_cookies(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix("uid="))
        .map(ToString::to_string)
}

async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let role = UserRole::parse(&request.role)?;
    let user = state.db.users().register(&NewUser {
        email: request.email,
        username: request.username,
        password: request.password,
        role,
    })?;

    state
        .logger
        .log(LogKind::Info, format!("registered user {}", user.email));

    Ok((
        uid_cookie(&user.id),
        Json(RegisterResponse { uid: user.id }),
    ))
}

async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .db
        .users()
        .verify_password(&request.email, &request.password)?
        .ok_or_else(|| Error::InvalidInput("invalid credentials".into()))?;

    Ok((
        uid_cookie(&user.id),
        Json(LoginResponse {
            uid: user.id,
            role: user.role,
        }),
    ))
}

async fn me_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<MeResponse>> {
    let uid = uid_from_cookies(&headers)
        .ok_or_else(|| Error::InvalidInput("missing uid cookie".into()))?;
    let user = state
        .db
        .users()
        .find_by_id(&uid)?
        .ok_or_else(|| Error::NotFound("user does not exist".into()))?;

    Ok(Json(MeResponse {
        user_id: user.id,
        user_email: user.email,
        role: user.role,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// User & Friendship Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Friendship request body.
#[derive(Debug, Deserialize)]
pub struct FriendshipRequest {
    pub teacher_email: String,
    pub student_email: String,
}

/// Username lookup response.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsernameResponse {
    pub username: String,
    pub friends: Vec<String>,
}

async fn create_friendship_handler(
    State(state): State<AppState>,
    Json(request): Json<FriendshipRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .db
        .users()
        .create_friendship(&request.teacher_email, &request.student_email)?;
    Ok(MessageResponse::new("Ok"))
}

async fn remove_friendship_handler(
    State(state): State<AppState>,
    Json(request): Json<FriendshipRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .db
        .users()
        .remove_friendship(&request.teacher_email, &request.student_email)?;
    Ok(MessageResponse::new("Ok"))
}

async fn get_friends_handler(
    State(state): State<AppState>,
    Path(user_email): Path<String>,
) -> ApiResult<Json<Vec<crate::store::FriendInfo>>> {
    state.logger.log(
        LogKind::Info,
        format!("received GET request at /get-friends/ for user_email: {user_email}"),
    );
    let friends = state.db.users().friends_of(&user_email)?;
    Ok(Json(friends))
}

async fn get_all_students_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<crate::store::StudentInfo>>> {
    Ok(Json(state.db.users().all_students()?))
}

async fn get_username_handler(
    State(state): State<AppState>,
    Path(user_email): Path<String>,
) -> ApiResult<Json<UsernameResponse>> {
    let user = state
        .db
        .users()
        .find_by_email(&user_email)?
        .ok_or_else(|| Error::NotFound("the user with the specified email does not exist".into()))?;

    Ok(Json(UsernameResponse {
        username: user.username,
        friends: user.friends,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Time limit accepted as either a number or a digit string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TimeLimit {
    Minutes(u32),
    Text(String),
}

impl TimeLimit {
    fn minutes(&self) -> Option<u32> {
        match self {
            Self::Minutes(m) => Some(*m),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

/// Conversation creation request body.
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub user_level: String,
    pub difficulty: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub teacher_email: String,
    pub student_email: String,
    #[serde(default)]
    pub time_limit: Option<TimeLimit>,
    #[serde(default)]
    pub parent_conversation_id: Option<String>,
}

/// Conversation creation response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub conversation_id: String,
}

/// Conversation initialization request body.
#[derive(Debug, Deserialize)]
pub struct InitializeConversationRequest {
    pub conversation_id: String,
}

/// Chat message request body.
#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub conversation_id: String,
    pub message: String,
    #[serde(default)]
    pub sender_id: Option<String>,
}

/// Chat message response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessageResponse {
    pub conversation_id: String,
    pub response: String,
    pub is_chatbot_active: bool,
}

/// Conversation feedback response: the message log with its per-turn
/// artifacts plus the end-of-conversation artifacts.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationFeedbackResponse {
    pub conversation_id: String,
    pub messages: Vec<StoredMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opinion_summary: Option<String>,
}

/// Active chatbot count response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveChatbotsResponse {
    pub count: usize,
}

async fn create_conversation_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> ApiResult<Json<CreateConversationResponse>> {
    let conversation = state.db.conversations().create(&NewConversation {
        user_level: request.user_level,
        difficulty: request.difficulty,
        topic: request.topic,
        teacher_email: request.teacher_email,
        student_email: request.student_email,
        time_limit_minutes: request.time_limit.as_ref().and_then(TimeLimit::minutes),
        parent_conversation_id: request.parent_conversation_id,
    })?;

    state.logger.log(
        LogKind::Info,
        format!("created conversation {}", conversation.id),
    );

    Ok(Json(CreateConversationResponse {
        conversation_id: conversation.id,
    }))
}

async fn initialize_conversation_handler(
    State(state): State<AppState>,
    Json(request): Json<InitializeConversationRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let message = state.registry.initialize(&request.conversation_id).await?;
    Ok(MessageResponse::new(message))
}

async fn user_chat_message_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatMessageRequest>,
) -> ApiResult<Json<ChatMessageResponse>> {
    let reply = state
        .registry
        .send_message(&request.conversation_id, &request.message)
        .await?;

    Ok(Json(ChatMessageResponse {
        conversation_id: request.conversation_id,
        response: reply.text,
        is_chatbot_active: reply.active,
    }))
}

async fn end_conversation_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let message = state.registry.end(&conversation_id).await?;
    Ok(MessageResponse::new(message))
}

async fn conversation_feedback_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<ConversationFeedbackResponse>> {
    let managed = state.db.managed_conversations();
    let (overall_feedback, opinion_summary) = managed.derived_artifacts(&conversation_id)?;
    let messages = managed.messages(&conversation_id)?;

    Ok(Json(ConversationFeedbackResponse {
        conversation_id,
        messages,
        overall_feedback,
        opinion_summary,
    }))
}

async fn active_chatbots_handler(
    State(state): State<AppState>,
) -> Json<ActiveChatbotsResponse> {
    Json(ActiveChatbotsResponse {
        count: state.registry.active_count().await,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Log Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn all_logs_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<LogEntry>>> {
    Ok(Json(state.db.logs().retrieve_all()?))
}

async fn logs_by_kind_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let kind = LogKind::parse(&kind)?;
    Ok(Json(state.db.logs().retrieve_by_kind(kind)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: "teachme-server".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_from_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "uid=abc-123".parse().unwrap());
        assert_eq!(uid_from_cookies(&headers), Some("abc-123".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; uid=u-9; lang=en".parse().unwrap(),
        );
        assert_eq!(uid_from_cookies(&headers), Some("u-9".to_string()));

        let headers = HeaderMap::new();
        assert_eq!(uid_from_cookies(&headers), None);
    }

    #[test]
    fn test_time_limit_accepts_number_and_digit_string() {
        let limit: TimeLimit = serde_json::from_str("7").unwrap();
        assert_eq!(limit.minutes(), Some(7));

        let limit: TimeLimit = serde_json::from_str(r#""12""#).unwrap();
        assert_eq!(limit.minutes(), Some(12));

        let limit: TimeLimit = serde_json::from_str(r#""soon""#).unwrap();
        assert_eq!(limit.minutes(), None);
    }

    #[test]
    fn test_api_error_codes() {
        let response = ApiError(Error::NotFound("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError(Error::Upstream("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_uid_cookie_format() {
        let [(name, value)] = uid_cookie("user-1");
        assert_eq!(name, header::SET_COOKIE);
        assert!(value.starts_with("uid=user-1; Max-Age=864000"));
    }
}
