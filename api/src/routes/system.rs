use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use fokus_core::error::ApiError;

use crate::auth::{Viewer, require_scopes};
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/v1/assistant/status",
        get(get_assistant_status).put(set_assistant_status),
    )
}

/// Response for GET/PUT /v1/assistant/status
#[derive(Serialize, utoipa::ToSchema)]
pub struct AssistantStatusResponse {
    pub enabled: bool,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SetAssistantStatusRequest {
    pub enabled: bool,
}

#[derive(sqlx::FromRow)]
struct AssistantSettingsRow {
    enabled: bool,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Read the operator kill switch
///
/// Reads the flag directly from the settings table, bypassing the pipeline's
/// short-lived cache, so operators always see the committed value.
#[utoipa::path(
    get,
    path = "/v1/assistant/status",
    responses(
        (status = 200, description = "Current assistant status", body = AssistantStatusResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "assistant"
)]
pub async fn get_assistant_status(
    State(state): State<AppState>,
    _viewer: Viewer,
) -> Result<Json<AssistantStatusResponse>, AppError> {
    let row = sqlx::query_as::<_, AssistantSettingsRow>(
        "SELECT enabled, updated_at FROM assistant_settings WHERE id = TRUE",
    )
    .fetch_optional(&state.db)
    .await?;

    // A missing row means the switch has never been flipped: enabled.
    let (enabled, updated_at) = match row {
        Some(row) => (row.enabled, row.updated_at),
        None => (true, None),
    };

    Ok(Json(AssistantStatusResponse {
        enabled,
        updated_at,
    }))
}

/// Flip the operator kill switch
///
/// Takes effect on in-flight chat requests at their next gate checkpoint, not
/// just on new requests.
#[utoipa::path(
    put,
    path = "/v1/assistant/status",
    request_body = SetAssistantStatusRequest,
    responses(
        (status = 200, description = "New assistant status", body = AssistantStatusResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Missing assistant:admin scope", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "assistant"
)]
pub async fn set_assistant_status(
    State(state): State<AppState>,
    viewer: Viewer,
    AppJson(request): AppJson<SetAssistantStatusRequest>,
) -> Result<Json<AssistantStatusResponse>, AppError> {
    require_scopes(&viewer, &["assistant:admin"], "PUT /v1/assistant/status")?;

    let row = sqlx::query_as::<_, AssistantSettingsRow>(
        "INSERT INTO assistant_settings (id, enabled, updated_at, updated_by) \
         VALUES (TRUE, $1, NOW(), $2) \
         ON CONFLICT (id) DO UPDATE \
         SET enabled = EXCLUDED.enabled, \
             updated_at = EXCLUDED.updated_at, \
             updated_by = EXCLUDED.updated_by \
         RETURNING enabled, updated_at",
    )
    .bind(request.enabled)
    .bind(viewer.user_id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        enabled = row.enabled,
        updated_by = %viewer.user_id,
        "assistant kill switch updated"
    );

    Ok(Json(AssistantStatusResponse {
        enabled: row.enabled,
        updated_at: row.updated_at,
    }))
}
