//! Integration tests for the TeachMe backend.
//!
//! Drives the full HTTP API (auth, friendships, conversation lifecycle,
//! logs) against an in-memory database and a scripted reply generator.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};
use std::sync::Arc;
use teachme_common::config::Config;
use teachme_server::routes::{
    ChatMessageResponse, ConversationFeedbackResponse, CreateConversationResponse, ErrorResponse,
    LoginResponse, MessageResponse, RegisterResponse,
};
use teachme_server::{
    build_router, build_state, ChatTurn, Database, ProviderError, ReplyGenerator,
};
use tower::ServiceExt;

/// Generator answering every call with a fixed reply.
struct StubGenerator;

#[async_trait]
impl ReplyGenerator for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate_reply(
        &self,
        _system_prompt: &str,
        _history: &[ChatTurn],
        _user_message: &str,
    ) -> Result<String, ProviderError> {
        Ok("Hello! What would you like to talk about today?".to_string())
    }
}

/// Test helper building the app against an in-memory database.
fn create_test_app() -> (axum::Router, Database) {
    let config = Config::default();
    let db = Database::open_in_memory().unwrap();
    let state = build_state(&config, db.clone(), Arc::new(StubGenerator));
    (build_router(state), db)
}

/// Helper to make a request and get a JSON response.
async fn request_json<T: serde::de::DeserializeOwned>(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    cookie: Option<&str>,
) -> (StatusCode, T) {
    let mut request = Request::builder().method(method).uri(uri);

    if let Some(c) = cookie {
        request = request.header(header::COOKIE, c);
    }

    let request = if let Some(b) = body {
        request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&b).unwrap()))
            .unwrap()
    } else {
        request.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: T = serde_json::from_slice(&body).unwrap();

    (status, json)
}

async fn register_user(app: &axum::Router, email: &str, role: &str) -> RegisterResponse {
    let (status, response): (_, RegisterResponse) = request_json(
        app,
        Method::POST,
        "/register",
        Some(json!({
            "email": email,
            "username": email.split('@').next().unwrap(),
            "password": "password123",
            "role": role
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    response
}

async fn create_conversation(app: &axum::Router) -> String {
    let (status, response): (_, CreateConversationResponse) = request_json(
        app,
        Method::POST,
        "/create-conversation",
        Some(json!({
            "user_level": "intermediate",
            "difficulty": "medium",
            "topic": "Travel",
            "teacher_email": "teacher@mail.com",
            "student_email": "student@mail.com",
            "time_limit": 5
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    response.conversation_id
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let (app, _db) = create_test_app();

    let (status, body): (_, Value) =
        request_json(&app, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "teachme-server");
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_login_me_flow() {
    let (app, _db) = create_test_app();

    let registered = register_user(&app, "student@mail.com", "student").await;
    assert!(!registered.uid.is_empty());

    let (status, login): (_, LoginResponse) = request_json(
        &app,
        Method::POST,
        "/login",
        Some(json!({"email": "student@mail.com", "password": "password123"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login.uid, registered.uid);

    let cookie = format!("uid={}", login.uid);
    let (status, me): (_, Value) =
        request_json(&app, Method::GET, "/me", None, Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["user_email"], "student@mail.com");
    assert_eq!(me["role"], "student");
}

#[tokio::test]
async fn test_register_sets_uid_cookie() {
    let (app, _db) = create_test_app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "email": "cookie@mail.com",
                "username": "cookie",
                "password": "password123",
                "role": "teacher"
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("uid="));
    assert!(set_cookie.contains("Max-Age=864000"));
}

#[tokio::test]
async fn test_register_duplicate_email_fails() {
    let (app, _db) = create_test_app();

    register_user(&app, "dup@mail.com", "student").await;

    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/register",
        Some(json!({
            "email": "dup@mail.com",
            "username": "dup2",
            "password": "password123",
            "role": "student"
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "INVALID_INPUT");
}

#[tokio::test]
async fn test_register_unknown_role_fails() {
    let (app, _db) = create_test_app();

    let (status, _): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/register",
        Some(json!({
            "email": "x@mail.com",
            "username": "x",
            "password": "password123",
            "role": "admin"
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_wrong_password_fails() {
    let (app, _db) = create_test_app();

    register_user(&app, "auth@mail.com", "student").await;

    let (status, _): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/login",
        Some(json!({"email": "auth@mail.com", "password": "wrong-password"})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_me_without_cookie_fails() {
    let (app, _db) = create_test_app();

    let (status, _): (_, ErrorResponse) =
        request_json(&app, Method::GET, "/me", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─────────────────────────────────────────────────────────────────────────────
// Friendships
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_friendship_flow() {
    let (app, _db) = create_test_app();

    register_user(&app, "teacher@mail.com", "teacher").await;
    register_user(&app, "student@mail.com", "student").await;

    let (status, response): (_, MessageResponse) = request_json(
        &app,
        Method::POST,
        "/create-friendship",
        Some(json!({
            "teacher_email": "teacher@mail.com",
            "student_email": "student@mail.com"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.message, "Ok");

    let (status, friends): (_, Value) = request_json(
        &app,
        Method::GET,
        "/get-friends/teacher@mail.com",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(friends.as_array().unwrap().len(), 1);
    assert_eq!(friends[0]["email"], "student@mail.com");

    let (status, username): (_, Value) = request_json(
        &app,
        Method::GET,
        "/get-username/student@mail.com",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(username["username"], "student");
    assert_eq!(username["friends"][0], "teacher@mail.com");

    let (status, _): (_, MessageResponse) = request_json(
        &app,
        Method::POST,
        "/remove-friendship",
        Some(json!({
            "teacher_email": "teacher@mail.com",
            "student_email": "student@mail.com"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, friends): (_, Value) = request_json(
        &app,
        Method::GET,
        "/get-friends/teacher@mail.com",
        None,
        None,
    )
    .await;
    assert!(friends.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_friendship_unknown_user_fails() {
    let (app, _db) = create_test_app();

    register_user(&app, "teacher@mail.com", "teacher").await;

    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/create-friendship",
        Some(json!({
            "teacher_email": "teacher@mail.com",
            "student_email": "ghost@mail.com"
        })),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "NOT_FOUND");
}

#[tokio::test]
async fn test_get_all_students() {
    let (app, _db) = create_test_app();

    register_user(&app, "teacher@mail.com", "teacher").await;
    register_user(&app, "s1@mail.com", "student").await;
    register_user(&app, "s2@mail.com", "student").await;

    let (status, students): (_, Value) =
        request_json(&app, Method::GET, "/get-all-students", None, None).await;

    assert_eq!(status, StatusCode::OK);
    let students = students.as_array().unwrap();
    assert_eq!(students.len(), 2);
    assert!(students.iter().all(|s| s["email"] != "teacher@mail.com"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_conversation_lifecycle() {
    let (app, db) = create_test_app();
    let conversation_id = create_conversation(&app).await;

    // Initialize
    let (status, _): (_, MessageResponse) = request_json(
        &app,
        Method::POST,
        "/initialize-conversation",
        Some(json!({"conversation_id": conversation_id})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Initializing again is a no-op success and keeps one session
    let (status, _): (_, MessageResponse) = request_json(
        &app,
        Method::POST,
        "/initialize-conversation",
        Some(json!({"conversation_id": conversation_id})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, active): (_, Value) =
        request_json(&app, Method::GET, "/active-chatbots", None, None).await;
    assert_eq!(active["count"], 1);

    // Chat
    let (status, chat): (_, ChatMessageResponse) = request_json(
        &app,
        Method::POST,
        "/user-chat-message",
        Some(json!({"conversation_id": conversation_id, "message": "Hello"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chat.conversation_id, conversation_id);
    assert!(!chat.response.is_empty());
    assert!(chat.is_chatbot_active);

    // End
    let (status, _): (_, MessageResponse) = request_json(
        &app,
        Method::GET,
        &format!("/end-conversation/{conversation_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let record = db
        .conversations()
        .find_by_id(&conversation_id)
        .unwrap()
        .unwrap();
    assert!(record.ended);

    // Messaging after the end fails with "not initialized"
    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/user-chat-message",
        Some(json!({"conversation_id": conversation_id, "message": "Still there?"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "NOT_FOUND");

    // The message log survives the session
    let (status, feedback): (_, ConversationFeedbackResponse) = request_json(
        &app,
        Method::GET,
        &format!("/conversation-feedback/{conversation_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feedback.messages.len(), 2);
}

#[tokio::test]
async fn test_initialize_unknown_conversation_fails() {
    let (app, _db) = create_test_app();

    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/initialize-conversation",
        Some(json!({"conversation_id": "does-not-exist"})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "NOT_FOUND");
}

#[tokio::test]
async fn test_initialize_blank_conversation_id_fails() {
    let (app, _db) = create_test_app();

    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/initialize-conversation",
        Some(json!({"conversation_id": "  "})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "INVALID_INPUT");
}

#[tokio::test]
async fn test_chat_without_initialization_fails() {
    let (app, _db) = create_test_app();
    let conversation_id = create_conversation(&app).await;

    let (status, error): (_, ErrorResponse) = request_json(
        &app,
        Method::POST,
        "/user-chat-message",
        Some(json!({"conversation_id": conversation_id, "message": "Hello"})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "NOT_FOUND");
}

#[tokio::test]
async fn test_end_unknown_conversation_fails() {
    let (app, _db) = create_test_app();

    let (status, _): (_, ErrorResponse) = request_json(
        &app,
        Method::GET,
        "/end-conversation/does-not-exist",
        None,
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_conversation_feedback_unknown_conversation_fails() {
    let (app, _db) = create_test_app();

    let (status, _): (_, ErrorResponse) = request_json(
        &app,
        Method::GET,
        "/conversation-feedback/does-not-exist",
        None,
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_time_limit_accepted_as_string() {
    let (app, db) = create_test_app();

    let (status, response): (_, CreateConversationResponse) = request_json(
        &app,
        Method::POST,
        "/create-conversation",
        Some(json!({
            "user_level": "beginner",
            "difficulty": "easy",
            "teacher_email": "t@mail.com",
            "student_email": "s@mail.com",
            "time_limit": "8"
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let record = db
        .conversations()
        .find_by_id(&response.conversation_id)
        .unwrap()
        .unwrap();
    assert_eq!(record.time_limit_minutes, 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// Logs
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_logs_endpoints() {
    let (app, db) = create_test_app();

    // Conversation activity produces INFO entries
    let conversation_id = create_conversation(&app).await;
    let (_, _): (_, MessageResponse) = request_json(
        &app,
        Method::POST,
        "/initialize-conversation",
        Some(json!({"conversation_id": conversation_id})),
        None,
    )
    .await;

    let (status, all): (_, Value) = request_json(&app, Method::GET, "/logs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!all.as_array().unwrap().is_empty());

    let (status, info): (_, Value) =
        request_json(&app, Method::GET, "/logs/info", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(info
        .as_array()
        .unwrap()
        .iter()
        .all(|entry| entry["kind"] == "INFO"));

    let (status, _): (_, ErrorResponse) =
        request_json(&app, Method::GET, "/logs/bogus", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Log entries are also persisted through the collection directly
    assert!(!db.logs().retrieve_all().unwrap().is_empty());
}
