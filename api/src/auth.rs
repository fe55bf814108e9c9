use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Authenticated viewer extracted from the `Authorization: Bearer <token>` header.
///
/// Two-phase resolution:
/// 1. Auth middleware (`InjectAuthLayer`) runs first — validates the session
///    token and injects the viewer into request extensions.
/// 2. Handlers read from extensions (no DB hit). Anonymous callers simply have
///    no `Viewer` extension; the chat pipeline degrades capability instead of
///    rejecting them.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user_id: Uuid,
    pub scopes: Vec<String>,
}

fn scope_matches(granted: &str, required: &str) -> bool {
    let granted = granted.trim().to_lowercase();
    let required = required.trim().to_lowercase();
    if granted.is_empty() || required.is_empty() {
        return false;
    }
    if granted == "*" || granted == required {
        return true;
    }
    if let Some(prefix) = granted.strip_suffix(":*") {
        return required == prefix || required.starts_with(&format!("{prefix}:"));
    }
    false
}

/// Require one of `required_scopes` on the viewer, or fail with 403.
pub fn require_scopes(
    viewer: &Viewer,
    required_scopes: &[&str],
    operation: &str,
) -> Result<(), AppError> {
    let allowed = required_scopes.is_empty()
        || required_scopes.iter().any(|required| {
            viewer
                .scopes
                .iter()
                .any(|granted| scope_matches(granted, required))
        });

    if allowed {
        return Ok(());
    }

    tracing::warn!(
        user_id = %viewer.user_id,
        operation = operation,
        required_scopes = ?required_scopes,
        granted_scopes = ?viewer.scopes,
        decision = "deny",
        "scope authorization decision"
    );

    Err(AppError::Forbidden {
        message: format!("Insufficient scope for operation '{operation}'"),
        docs_hint: Some(format!(
            "Required one of: {}. Ask an operator for a session token with matching scopes.",
            required_scopes.join(", ")
        )),
    })
}

// --- Tower Layer/Service for auth injection ---

/// Tower Layer that injects `Viewer` into request extensions.
/// Silently continues on auth failure — anonymous access is a first-class
/// state for the chat endpoint.
#[derive(Clone)]
pub struct InjectAuthLayer {
    pool: sqlx::PgPool,
}

impl InjectAuthLayer {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            pool: self.pool.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    pool: sqlx::PgPool,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let pool = self.pool.clone();

        // Extract token synchronously (headers are Send-safe, Body is not)
        let token = extract_bearer_token(&req);

        Box::pin(async move {
            if let Some(token) = token {
                if let Some(viewer) = authenticate_session_token(&token, &pool).await {
                    req.extensions_mut().insert(viewer);
                }
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

/// Extract bearer token from Authorization header (synchronous, no body access).
fn extract_bearer_token(req: &Request) -> Option<String> {
    let auth_header = req.headers().get("authorization")?.to_str().ok()?;
    auth_header.strip_prefix("Bearer ").map(|s| s.to_owned())
}

/// Validate a session token. Returns None on any failure — the request then
/// proceeds anonymously.
async fn authenticate_session_token(token: &str, pool: &sqlx::PgPool) -> Option<Viewer> {
    if !token.starts_with("fok_st_") {
        return None;
    }
    resolve_session_token(token, pool).await.ok()
}

// --- Extractor (used by handlers that require authentication) ---

impl FromRequestParts<AppState> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Fast path: auth middleware already validated the token
        if let Some(viewer) = parts.extensions.get::<Viewer>() {
            return Ok(viewer.clone());
        }

        // Slow path: no middleware ran (shouldn't happen in normal flow)
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
                docs_hint: Some(
                    "Include 'Authorization: Bearer <token>' with a session token (fok_st_...)."
                        .to_string(),
                ),
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authorization header must use Bearer scheme".to_string(),
                docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
            })?;

        resolve_session_token(token, &state.db).await
    }
}

/// `Option<Viewer>` in a handler signature: anonymous callers get `None`
/// instead of a 401. Only the middleware's extension is consulted; no header
/// parsing, no DB hit.
impl OptionalFromRequestParts<AppState> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Viewer>().cloned())
    }
}

async fn resolve_session_token(token: &str, pool: &sqlx::PgPool) -> Result<Viewer, AppError> {
    let token_hash = fokus_core::auth::hash_token(token);

    let row = sqlx::query_as::<_, SessionTokenRow>(
        "SELECT st.user_id, st.scopes, st.expires_at \
         FROM session_tokens st \
         JOIN users u ON u.id = st.user_id \
         WHERE st.token_hash = $1 \
           AND st.is_revoked = FALSE \
           AND u.is_active = TRUE",
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)?
    .ok_or_else(|| AppError::Unauthorized {
        message: "Invalid session token".to_string(),
        docs_hint: Some("Check that the token is correct and has not been revoked.".to_string()),
    })?;

    if let Some(expires_at) = row.expires_at {
        if Utc::now() > expires_at {
            return Err(AppError::Unauthorized {
                message: "Session token has expired".to_string(),
                docs_hint: Some("Sign in again to obtain a fresh session token.".to_string()),
            });
        }
    }

    Ok(Viewer {
        user_id: row.user_id,
        scopes: row.scopes,
    })
}

#[derive(sqlx::FromRow)]
struct SessionTokenRow {
    user_id: Uuid,
    scopes: Vec<String>,
    expires_at: Option<chrono::DateTime<Utc>>,
}
