use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use gavel_types::api::{ChatHistoryQuery, ChatHistoryResponse};
use gavel_types::models::AuctionStatus;

use crate::auth::AppState;
use crate::error::{ApiError, blocking};

/// Auction chat history. History stays readable after the auction closes;
/// only writes are gated on liveness.
pub async fn get_chat_messages(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<Json<ChatHistoryResponse>, ApiError> {
    let db = Arc::clone(&state.db);
    let limit = query.limit.min(200);
    let offset = query.offset;

    let (post, active, messages, total) = blocking(move || {
        let post = db.get_post(post_id)?;
        let active = db.chat_is_active(post_id)?;
        let (messages, total) = db.chat_messages(post_id, limit, offset)?;
        Ok((post, active, messages, total))
    })
    .await?;

    let post = post.ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    Ok(Json(ChatHistoryResponse {
        post_id,
        messages,
        total_messages: total,
        is_active: active && post.status == AuctionStatus::Live,
        post_status: post.status,
    }))
}
