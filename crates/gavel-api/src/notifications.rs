use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use gavel_types::api::ApiMessage;
use gavel_types::models::Notification;

use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::middleware::Claims;

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let db = Arc::clone(&state.db);
    let notifications = blocking(move || db.notifications_for_user(claims.sub)).await?;
    Ok(Json(notifications))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiMessage>, ApiError> {
    let db = Arc::clone(&state.db);
    let updated = blocking(move || db.mark_notification_read(notification_id, claims.sub)).await?;
    if !updated {
        return Err(ApiError::NotFound("Notification not found".into()));
    }
    Ok(Json(ApiMessage {
        message: "Notification marked read".into(),
    }))
}
