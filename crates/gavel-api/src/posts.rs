use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use gavel_auction::AuctionEnd;
use gavel_db::posts::NewPost;
use gavel_types::api::{
    ApiMessage, CreatePostRequest, EndAuctionResponse, PostDetailResponse, PostListQuery,
    ReactivatePostRequest, SaleResponse, UpdatePostRequest,
};
use gavel_types::models::{AuctionStatus, Post};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::middleware::Claims;

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title is required".into()));
    }
    if req.description.trim().is_empty() {
        return Err(ApiError::BadRequest("Description is required".into()));
    }
    if req.starting_price <= 0 {
        return Err(ApiError::BadRequest(
            "Starting price must be positive".into(),
        ));
    }
    if !req.auction_duration.is_finite() || req.auction_duration <= 0.0 {
        return Err(ApiError::BadRequest(
            "Auction duration must be positive".into(),
        ));
    }
    if let Some(buy_now) = req.buy_now_price {
        if buy_now <= req.starting_price {
            return Err(ApiError::BadRequest(
                "Buy-now price must be higher than the starting price".into(),
            ));
        }
    }

    let post_id = Uuid::new_v4();
    let now = Utc::now();
    let end = now + Duration::milliseconds((req.auction_duration * 3_600_000.0) as i64);

    let db = Arc::clone(&state.db);
    let post = blocking(move || {
        db.insert_post(&NewPost {
            id: post_id,
            user_id: claims.sub,
            title: &req.title,
            description: &req.description,
            starting_price: req.starting_price,
            buy_now_price: req.buy_now_price,
            auction_end_time: end,
            created_at: now,
        })?;
        db.get_post(post_id)
    })
    .await?
    .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("post vanished after insert")))?;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PostListQuery>,
) -> Result<Json<Vec<Post>>, ApiError> {
    let db = Arc::clone(&state.db);
    let posts = blocking(move || db.list_posts(&query, Utc::now())).await?;
    Ok(Json(posts))
}

pub async fn live_posts(State(state): State<AppState>) -> Result<Json<Vec<Post>>, ApiError> {
    let db = Arc::clone(&state.db);
    let posts = blocking(move || db.live_posts(Utc::now())).await?;
    Ok(Json(posts))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<PostDetailResponse>, ApiError> {
    let db = Arc::clone(&state.db);
    let post = blocking(move || db.get_post(post_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;

    let now = Utc::now();
    let time_remaining_ms = (post.auction_end_time - now).num_milliseconds().max(0);
    let is_live = post.status == AuctionStatus::Live && now < post.auction_end_time;
    Ok(Json(PostDetailResponse {
        post,
        time_remaining_ms,
        is_live,
    }))
}

pub async fn update_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<Json<Post>, ApiError> {
    state.core.update_post(post_id, claims.sub, req).await?;

    let db = Arc::clone(&state.db);
    let post = blocking(move || db.get_post(post_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    Ok(Json(post))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiMessage>, ApiError> {
    state.core.delete_post(post_id, claims.sub).await?;
    Ok(Json(ApiMessage {
        message: "Post deleted".into(),
    }))
}

pub async fn cancel_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiMessage>, ApiError> {
    state.core.cancel(post_id, claims.sub).await?;
    Ok(Json(ApiMessage {
        message: "Auction cancelled".into(),
    }))
}

pub async fn reactivate_post(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactivatePostRequest>,
) -> Result<Json<Post>, ApiError> {
    state
        .core
        .reactivate(post_id, claims.sub, req.auction_duration)
        .await?;

    let db = Arc::clone(&state.db);
    let post = blocking(move || db.get_post(post_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    Ok(Json(post))
}

pub async fn buy_now(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SaleResponse>, ApiError> {
    let sale = state.core.buy_now(post_id, claims.sub).await?;
    Ok(Json(SaleResponse {
        message: "Purchase complete".into(),
        sold_price: sale.price,
        buyer_id: sale.buyer_id,
        chat_id: sale.sale_chat_id,
    }))
}

/// Forced finalization of an overdue auction; anyone may trigger it, the
/// outcome depends only on the auction state.
pub async fn end_auction(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<EndAuctionResponse>, ApiError> {
    let end = state.core.end_auction(post_id).await?;
    let response = match end {
        AuctionEnd::Sold(sale) => EndAuctionResponse {
            message: "Auction ended: sold to the highest bidder".into(),
            status: AuctionStatus::Sold,
            sold_price: Some(sale.price),
            winner_id: Some(sale.buyer_id),
        },
        AuctionEnd::Expired { .. } => EndAuctionResponse {
            message: "Auction ended with no bids".into(),
            status: AuctionStatus::Expired,
            sold_price: None,
            winner_id: None,
        },
    };
    Ok(Json(response))
}
