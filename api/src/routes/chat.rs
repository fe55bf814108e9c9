//! `POST /v1/chat`: validation and rate limiting in front of the pipeline.
//!
//! Validation failures and rate-limit rejections respond in the same JSON
//! shape as a normal turn (with `error` set) and are never audited; the
//! pipeline handles everything past that point. Every response carries
//! `Cache-Control: no-store` because replies can embed personal data.

mod classify;
mod intent;
mod language;
mod limiter;
mod memory;
mod pipeline;
mod redact;
mod replies;
mod retrieval;
mod tools;

pub use limiter::SlidingWindowLimiter;
pub use pipeline::{ChatPolicy, ChatServices, ChatTurn};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use uuid::Uuid;

use fokus_core::chat::{ChatRequest, ChatResponse};

use crate::auth::Viewer;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/chat", post(chat))
}

#[derive(Debug)]
enum RequestRejection {
    MissingInput,
    InvalidSession,
    RateLimited { retry_after: u64 },
}

impl RequestRejection {
    fn status(&self) -> StatusCode {
        match self {
            RequestRejection::MissingInput | RequestRejection::InvalidSession => {
                StatusCode::BAD_REQUEST
            }
            RequestRejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn error(&self) -> &'static str {
        match self {
            RequestRejection::MissingInput => "Missing input",
            RequestRejection::InvalidSession => "Invalid session",
            RequestRejection::RateLimited { .. } => "Too many requests",
        }
    }
}

fn validate_input(input: &str) -> Result<String, RequestRejection> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(RequestRejection::MissingInput);
    }
    Ok(trimmed.to_string())
}

/// Clients mint their own session ids; only RFC 4122 versions 1-5 are
/// accepted (the nil UUID reports version 0 and fails the same check).
fn validate_session(session_id: &str) -> Result<Uuid, RequestRejection> {
    match Uuid::parse_str(session_id.trim()) {
        Ok(id) if (1..=5).contains(&id.get_version_num()) => Ok(id),
        _ => Err(RequestRejection::InvalidSession),
    }
}

/// Attach the no-cache header every chat response must carry.
fn with_no_store(status: StatusCode, body: ChatResponse) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn reject(rejection: RequestRejection) -> Response {
    let body = ChatResponse {
        text: String::new(),
        used_rag: false,
        language: "en".to_string(),
        chat_id: None,
        error: Some(rejection.error().to_string()),
    };
    let mut response = with_no_store(rejection.status(), body);
    if let RequestRejection::RateLimited { retry_after } = rejection {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

/// Converse with the Fokus assistant
///
/// Runs one conversational turn: moderation, scripted classification, intent
/// routing, retrieval-grounded generation. Works anonymously; a bearer
/// session token unlocks personal tools and memory.
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "A reply (generated or scripted)", body = ChatResponse),
        (status = 400, description = "Missing input or invalid session", body = ChatResponse),
        (status = 429, description = "Rate limited", body = ChatResponse),
        (status = 503, description = "Assistant paused by an operator", body = ChatResponse),
        (status = 500, description = "Unrecoverable retrieval or generation failure", body = ChatResponse)
    ),
    security((), ("bearer_auth" = [])),
    tag = "assistant"
)]
pub async fn chat(
    State(state): State<AppState>,
    viewer: Option<Viewer>,
    headers: HeaderMap,
    AppJson(request): AppJson<ChatRequest>,
) -> Response {
    let input = match validate_input(&request.input) {
        Ok(input) => input,
        Err(rejection) => return reject(rejection),
    };
    let session_id = match validate_session(&request.session_id) {
        Ok(id) => id,
        Err(rejection) => return reject(rejection),
    };

    let origin = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let key = SlidingWindowLimiter::key(&request.session_id, origin);
    if let Err(retry_after) = state.limiter.check(&key) {
        return reject(RequestRejection::RateLimited { retry_after });
    }

    // `userId` in the body is advisory only; identity comes from the token.
    let turn = ChatTurn {
        input,
        session_id,
        viewer,
    };
    let output = state.chat.run_turn(turn).await;
    with_no_store(output.status, output.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_is_rejected() {
        assert!(matches!(
            validate_input("   "),
            Err(RequestRejection::MissingInput)
        ));
        assert!(matches!(
            validate_input(""),
            Err(RequestRejection::MissingInput)
        ));
    }

    #[test]
    fn input_is_trimmed() {
        assert_eq!(validate_input("  hello  ").unwrap(), "hello");
    }

    #[test]
    fn session_must_be_a_v1_to_v5_uuid() {
        // v4 and v1 are in range.
        assert!(validate_session("b4c96d52-41c5-4a52-9f69-1c2f7a8d9e0b").is_ok());
        assert!(validate_session("5b2ceef0-8a8f-11ee-b9d1-0242ac120002").is_ok());
        // v7, nil and junk are not.
        assert!(matches!(
            validate_session("0193e885-3f0e-7c52-b0cd-9ea3e1a8f1aa"),
            Err(RequestRejection::InvalidSession)
        ));
        assert!(matches!(
            validate_session("00000000-0000-0000-0000-000000000000"),
            Err(RequestRejection::InvalidSession)
        ));
        assert!(matches!(
            validate_session("not-a-uuid"),
            Err(RequestRejection::InvalidSession)
        ));
    }

    #[test]
    fn rejection_shapes() {
        assert_eq!(RequestRejection::MissingInput.status(), StatusCode::BAD_REQUEST);
        assert_eq!(RequestRejection::MissingInput.error(), "Missing input");
        assert_eq!(RequestRejection::InvalidSession.error(), "Invalid session");
        assert_eq!(
            RequestRejection::RateLimited { retry_after: 5 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn rate_limit_rejection_carries_retry_after() {
        let response = reject(RequestRejection::RateLimited { retry_after: 17 });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "17"
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }
}
