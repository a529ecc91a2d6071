use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use gavel_types::api::{ApiMessage, SendSaleMessageRequest, SendSaleMessageResponse};
use gavel_types::events::GatewayEvent;
use gavel_types::models::{SaleChat, UserPublic};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::middleware::Claims;

const MAX_SALE_MESSAGE_CHARS: usize = 1000;

pub async fn list_sale_chats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<SaleChat>>, ApiError> {
    let db = Arc::clone(&state.db);
    let chats = blocking(move || db.sale_chats_for_user(claims.sub)).await?;
    Ok(Json(chats))
}

pub async fn get_sale_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SaleChat>, ApiError> {
    let db = Arc::clone(&state.db);
    let chat = blocking(move || db.sale_chat(chat_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Sale chat not found".into()))?;
    if chat.buyer.id != claims.sub && chat.seller.id != claims.sub {
        return Err(ApiError::Forbidden(
            "Not authorized for this sale chat".into(),
        ));
    }
    Ok(Json(chat))
}

pub async fn get_sale_chat_by_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SaleChat>, ApiError> {
    let db = Arc::clone(&state.db);
    let chat = blocking(move || db.sale_chat_by_post(post_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("No sale chat for this post".into()))?;
    if chat.buyer.id != claims.sub && chat.seller.id != claims.sub {
        return Err(ApiError::Forbidden(
            "Not authorized for this sale chat".into(),
        ));
    }
    Ok(Json(chat))
}

/// HTTP send path: stores the message, mirrors it into the realtime room,
/// and leaves a notification for the counterparty.
pub async fn send_sale_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendSaleMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is required".into()));
    }
    if req.message.chars().count() > MAX_SALE_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Message too long (max {MAX_SALE_MESSAGE_CHARS} characters)"
        )));
    }

    let db = Arc::clone(&state.db);
    let stored = blocking(move || {
        let sender = db
            .get_user_public(claims.sub)?
            .unwrap_or_else(|| UserPublic {
                id: claims.sub,
                username: claims.username.clone(),
                avatar_url: None,
            });
        let msg = db.append_sale_message(chat_id, &sender, &req.message, Utc::now());
        if msg.is_ok() {
            if let Ok(Some(header)) = db.sale_chat_header(chat_id) {
                let other = header.other_party(sender.id);
                let body = format!("New message from {}", sender.username);
                if let Err(e) =
                    db.create_notification(other, &body, Some(header.post_id), Utc::now())
                {
                    warn!("failed to store sale message notification: {e:#}");
                }
            }
        }
        Ok(msg)
    })
    .await??;

    state.dispatcher.broadcast(GatewayEvent::NewSaleMessage {
        id: stored.id,
        chat_id: stored.chat_id,
        sender_id: stored.sender_id,
        username: stored.username.clone(),
        avatar_url: stored.avatar_url.clone(),
        message: stored.message.clone(),
        timestamp: stored.timestamp,
    });

    Ok((
        StatusCode::CREATED,
        Json(SendSaleMessageResponse {
            message: "Message sent".into(),
            new_message: stored,
        }),
    ))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiMessage>, ApiError> {
    let db = Arc::clone(&state.db);
    let header = blocking({
        let db = Arc::clone(&db);
        move || db.sale_chat_header(chat_id)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("Sale chat not found".into()))?;
    if !header.participant(claims.sub) {
        return Err(ApiError::Forbidden(
            "Not authorized for this sale chat".into(),
        ));
    }

    let updated = blocking(move || db.mark_sale_messages_read(chat_id, claims.sub)).await?;
    Ok(Json(ApiMessage {
        message: format!("{updated} messages marked read"),
    }))
}
