use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use gavel_types::api::{PlaceBidRequest, PlaceBidResponse, SaleResponse, SellToBidderRequest};
use gavel_types::models::{Bid, BidderSummary};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::middleware::Claims;

pub async fn place_bid(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PlaceBidRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.amount <= 0 {
        return Err(ApiError::BadRequest("Bid amount must be positive".into()));
    }

    let accepted = state.core.place_bid(post_id, claims.sub, req.amount).await?;

    let db = Arc::clone(&state.db);
    let bid_id = accepted.bid_id;
    let bid = blocking(move || db.bid_by_id(bid_id))
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("bid vanished after insert")))?;

    Ok((
        StatusCode::CREATED,
        Json(PlaceBidResponse {
            message: "Bid placed".into(),
            current_price: accepted.current_price,
            bid,
        }),
    ))
}

pub async fn get_post_bids(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Vec<Bid>>, ApiError> {
    let db = Arc::clone(&state.db);
    let bids = blocking(move || db.bids_for_post(post_id)).await?;
    Ok(Json(bids))
}

pub async fn get_user_bids(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Bid>>, ApiError> {
    let db = Arc::clone(&state.db);
    let bids = blocking(move || db.bids_for_user(claims.sub)).await?;
    Ok(Json(bids))
}

pub async fn get_winning_bid(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
) -> Result<Json<Bid>, ApiError> {
    let db = Arc::clone(&state.db);
    let bid = blocking(move || db.winning_bid(post_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("No winning bid on this auction".into()))?;
    Ok(Json(bid))
}

/// Per-bidder rollup, restricted to the auction owner.
pub async fn get_bidders(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<BidderSummary>>, ApiError> {
    let db = Arc::clone(&state.db);
    let post = blocking({
        let db = Arc::clone(&db);
        move || db.get_post(post_id)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("Post not found".into()))?;
    if post.user_id != claims.sub {
        return Err(ApiError::Forbidden(
            "Only the owner can view bidder details".into(),
        ));
    }

    let summaries = blocking(move || db.bidder_summaries(post_id)).await?;
    Ok(Json(summaries))
}

pub async fn sell_to_bidder(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SellToBidderRequest>,
) -> Result<Json<SaleResponse>, ApiError> {
    let sale = state
        .core
        .sell_to_bidder(post_id, claims.sub, req.bidder_id, req.amount)
        .await?;
    Ok(Json(SaleResponse {
        message: "Sold to bidder".into(),
        sold_price: sale.price,
        buyer_id: sale.buyer_id,
        chat_id: sale.sale_chat_id,
    }))
}

pub async fn sell_to_highest(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SaleResponse>, ApiError> {
    let sale = state.core.sell_to_highest(post_id, claims.sub).await?;
    Ok(Json(SaleResponse {
        message: "Sold to the highest bidder".into(),
        sold_price: sale.price,
        buyer_id: sale.buyer_id,
        chat_id: sale.sale_chat_id,
    }))
}
