use crate::rate_limit::{RateLimitError, RateLimiter};
use crate::responder::Responder;
use crate::sanitize::{rejection_reason, sanitize_input, sanitize_response, MAX_MESSAGE_CHARS};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_LANGUAGE: &str = "en";

pub struct AppState {
    limiter: Mutex<RateLimiter>,
    responder: Responder,
}

impl AppState {
    pub fn new(responder: Responder, limiter: RateLimiter) -> Self {
        Self {
            limiter: Mutex::new(limiter),
            responder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<Value>,
    #[serde(default)]
    language: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub has_links: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    response: &'static str,
}

struct ChatReply<'a> {
    body: ChatResponse,
    category: &'a str,
    score: usize,
    language: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("request is not a JSON document")]
    MalformedRequest,
    #[error("request has no message field")]
    MissingMessage,
    #[error("message is empty")]
    EmptyMessage,
    #[error("message rejected ({0})")]
    InvalidContent(&'static str),
    #[error("message longer than {} characters", MAX_MESSAGE_CHARS)]
    MessageTooLong,
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("internal fault")]
    Internal,
}

impl ChatError {
    fn status(&self) -> StatusCode {
        match self {
            ChatError::MalformedRequest
            | ChatError::MissingMessage
            | ChatError::EmptyMessage
            | ChatError::InvalidContent(_)
            | ChatError::MessageTooLong => StatusCode::BAD_REQUEST,
            ChatError::RateLimited(limit) => limit.describe().0,
            ChatError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            ChatError::MalformedRequest => "Invalid request format.",
            ChatError::MissingMessage => "Message is required.",
            ChatError::EmptyMessage => "Please send a message!",
            ChatError::InvalidContent(_) => "Invalid input detected. Please use only text.",
            ChatError::MessageTooLong => "Message too long. Maximum 500 characters.",
            ChatError::RateLimited(_) => "Too many requests. Please wait a moment.",
            ChatError::Internal => "Sorry, I encountered an error. Please try again later.",
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ChatError::MalformedRequest => "malformed_request",
            ChatError::MissingMessage => "missing_message",
            ChatError::EmptyMessage => "empty_message",
            ChatError::InvalidContent(reason) => *reason,
            ChatError::MessageTooLong => "message_too_long",
            ChatError::RateLimited(limit) => limit.describe().1,
            ChatError::Internal => "internal",
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            response: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChatResponse>, ChatError> {
    let request_id = Uuid::new_v4();
    let ip = remote.ip().to_string();

    let now = Instant::now();
    let mut limiter = state.limiter.lock().await;
    if let Err(limit) = limiter.check_and_record(&ip, now) {
        let snapshot = limiter.usage_snapshot(&ip, now);
        drop(limiter);
        let (_, reason, detail) = limit.describe();
        warn!(
            target: "chat",
            %request_id,
            ip = %ip,
            reason,
            detail,
            count = snapshot.count,
            window_age_secs = snapshot.window_age.as_secs(),
            msg = "chat request blocked by limiter"
        );
        return Err(limit.into());
    }
    let snapshot = limiter.usage_snapshot(&ip, now);
    let tracked_clients = limiter.tracked_clients();
    drop(limiter);

    match answer(&state.responder, &headers, &body) {
        Ok(reply) => {
            info!(
                target: "chat",
                %request_id,
                ip = %ip,
                category = reply.category,
                score = reply.score,
                language = reply.language.as_str(),
                has_links = reply.body.has_links,
                count = snapshot.count,
                tracked_clients,
                msg = "chat request served"
            );
            Ok(Json(reply.body))
        }
        Err(err) => {
            warn!(
                target: "chat",
                %request_id,
                ip = %ip,
                reason = err.reason(),
                error = %err,
                msg = "chat request rejected"
            );
            Err(err)
        }
    }
}

fn answer<'a>(
    responder: &'a Responder,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ChatReply<'a>, ChatError> {
    if !is_json_content_type(headers) {
        return Err(ChatError::MalformedRequest);
    }
    let document: Value =
        serde_json::from_slice(body).map_err(|_| ChatError::MalformedRequest)?;
    if !document.is_object() {
        return Err(ChatError::MissingMessage);
    }
    let request: ChatRequest =
        serde_json::from_value(document).map_err(|_| ChatError::MissingMessage)?;
    let message = request.message.ok_or(ChatError::MissingMessage)?;
    let language = request
        .language
        .as_ref()
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_string();

    let text = message_text(message).ok_or(ChatError::InvalidContent("not_text"))?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    if let Some(rejection) = rejection_reason(text) {
        return Err(ChatError::InvalidContent(rejection.as_str()));
    }

    let cleaned = sanitize_input(text);
    if cleaned.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ChatError::MessageTooLong);
    }
    debug!(target: "chat", message = cleaned.as_str(), msg = "chat message accepted");

    let matched = responder.best_match(&cleaned);
    let response = sanitize_response(&matched.category.response);
    let has_links = response.contains("<a href=");

    Ok(ChatReply {
        body: ChatResponse {
            response,
            has_links,
        },
        category: matched.category.id.as_str(),
        score: matched.score,
        language,
    })
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let mime = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

// Numbers and booleans are accepted as text; anything structured is not.
fn message_text(message: Value) -> Option<String> {
    match message {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        *message
    } else {
        "unknown panic"
    };
    error!(target: "chat", panic = detail, msg = "chat handler panicked");
    ChatError::Internal.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::rate_limit::DEFAULT_WINDOW;
    use axum::body::{self, Body};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router(max_requests: u32) -> Router {
        let responder = Responder::new(Catalog::builtin().expect("builtin catalog"));
        let state = Arc::new(AppState::new(
            responder,
            RateLimiter::new(max_requests, DEFAULT_WINDOW),
        ));
        build_router(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
    }

    fn chat_request(content_type: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post("/api/chat");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn json_chat(body: &str) -> Request<Body> {
        chat_request(Some("application/json"), body)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn who_is_gabriel_returns_biography_with_link() {
        let (status, payload) =
            send(test_router(10), json_chat(r#"{"message": "who is gabriel"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let reply: ChatResponse = serde_json::from_value(payload).unwrap();
        assert!(reply.response.contains("Gabriel Paras Abiog"));
        assert!(reply.response.contains(r##"<a href="#about" class="chatbot-link">"##));
        assert!(reply.has_links);
    }

    #[tokio::test]
    async fn unmatched_message_gets_default_answer() {
        let router = test_router(10);
        let (status, payload) = send(router, json_chat(r#"{"message": "qwzx"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(
            payload["response"],
            sanitize_response(&catalog.default_category().response)
        );
        assert_eq!(payload["hasLinks"], true);
    }

    #[tokio::test]
    async fn language_does_not_change_the_answer() {
        let router = test_router(10);
        let (_, english) = send(
            router.clone(),
            json_chat(r#"{"message": "python", "language": "en"}"#),
        )
        .await;
        let (_, tagalog) = send(
            router,
            json_chat(r#"{"message": "python", "language": "tl"}"#),
        )
        .await;
        assert_eq!(english, tagalog);
    }

    #[tokio::test]
    async fn non_json_content_type_is_rejected() {
        let (status, payload) = send(
            test_router(10),
            chat_request(Some("text/plain"), r#"{"message": "hi"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload, json!({ "response": "Invalid request format." }));

        let (status, _) = send(test_router(10), chat_request(None, r#"{"message": "hi"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn broken_json_is_rejected() {
        let (status, payload) = send(test_router(10), json_chat("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["response"], "Invalid request format.");
    }

    #[tokio::test]
    async fn json_suffix_content_type_is_accepted() {
        let (status, _) = send(
            test_router(10),
            chat_request(
                Some("application/vnd.chat+json; charset=utf-8"),
                r#"{"message": "hello"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_message_is_rejected() {
        for body in [r#"{"language": "en"}"#, "[]", r#""text""#, r#"{"message": null}"#] {
            let (status, payload) = send(test_router(10), json_chat(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(payload, json!({ "response": "Message is required." }));
        }
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let (status, payload) = send(test_router(10), json_chat(r#"{"message": "   "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload, json!({ "response": "Please send a message!" }));
    }

    #[tokio::test]
    async fn injection_attempts_are_rejected() {
        for body in [
            r#"{"message": "'; DROP TABLE users; --"}"#,
            r#"{"message": "<script>alert(1)</script>"}"#,
            r#"{"message": ["who"]}"#,
        ] {
            let (status, payload) = send(test_router(10), json_chat(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(
                payload,
                json!({ "response": "Invalid input detected. Please use only text." })
            );
        }
    }

    #[tokio::test]
    async fn numeric_message_is_treated_as_text() {
        let (status, payload) = send(test_router(10), json_chat(r#"{"message": 42}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(payload["response"].as_str().unwrap().contains("Gabriel"));
    }

    #[tokio::test]
    async fn eleventh_request_in_window_is_throttled() {
        let router = test_router(10);
        for _ in 0..10 {
            let (status, _) = send(router.clone(), json_chat(r#"{"message": "aws"}"#)).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, payload) = send(router, json_chat(r#"{"message": "aws"}"#)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            payload,
            json!({ "response": "Too many requests. Please wait a moment." })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_from_one_client_respect_the_limit() {
        let router = test_router(10);
        let requests: Vec<_> = (0..40)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move {
                    send(router, json_chat(r#"{"message": "aws"}"#)).await.0
                })
            })
            .collect();

        let mut statuses = Vec::new();
        for request in requests {
            statuses.push(request.await.unwrap());
        }
        let served = statuses.iter().filter(|s| **s == StatusCode::OK).count();
        let throttled = statuses
            .iter()
            .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
            .count();
        assert_eq!(served, 10);
        assert_eq!(throttled, 30);
    }

    #[tokio::test]
    async fn rejected_requests_still_count_against_the_limit() {
        let router = test_router(1);
        let (status, _) = send(router.clone(), json_chat("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(router, json_chat(r#"{"message": "aws"}"#)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn health_is_not_rate_limited() {
        let router = test_router(1);
        for _ in 0..3 {
            let response = router
                .clone()
                .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let payload: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(payload, json!({ "status": "ok" }));
        }
    }

    #[test]
    fn catalog_templates_pass_response_sanitizer_unchanged() {
        let catalog = Catalog::builtin().unwrap();
        for category in catalog.iter() {
            assert_eq!(
                sanitize_response(&category.response),
                category.response,
                "{} was altered",
                category.id
            );
        }
    }

    #[test]
    fn error_bodies_hide_internal_detail() {
        let response = ChatError::Internal.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = handle_panic(Box::new("database exploded"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ChatError::Internal.public_message(),
            "Sorry, I encountered an error. Please try again later."
        );
    }

    #[test]
    fn answer_reports_matched_category() {
        let responder = Responder::new(Catalog::builtin().unwrap());
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let reply = answer(&responder, &headers, br#"{"message": "TALA calendar assistant"}"#).unwrap();
        assert_eq!(reply.category, "tala_project");
        assert_eq!(reply.language, DEFAULT_LANGUAGE);
        assert!(reply.body.has_links);
    }
}
