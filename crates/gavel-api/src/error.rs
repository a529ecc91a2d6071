use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use gavel_auction::TransitionError;
use gavel_db::chats::ChatWriteError;
use gavel_types::api::ApiMessage;

/// HTTP error taxonomy: validation and state conflicts are 400 with the
/// reason in the body, wrong-actor is 403, unknown ids 404. Infrastructure
/// failures are logged server-side and return a generic 500 body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!("internal error: {e:#}");
        }
        let body = Json(ApiMessage {
            message: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::NotFound => Self::NotFound(e.to_string()),
            TransitionError::NotOwner => Self::Forbidden(e.to_string()),
            TransitionError::Store(inner) => Self::Internal(inner),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<ChatWriteError> for ApiError {
    fn from(e: ChatWriteError) -> Self {
        match e {
            ChatWriteError::PostNotFound | ChatWriteError::ChatNotFound => {
                Self::NotFound(e.to_string())
            }
            ChatWriteError::NotParticipant => Self::Forbidden(e.to_string()),
            ChatWriteError::Store(inner) => Self::Internal(inner),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

/// Run a blocking store closure off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("blocking task panicked: {e}")))?
        .map_err(ApiError::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_types::models::AuctionStatus;

    #[test]
    fn transition_errors_map_to_the_right_status() {
        let cases = [
            (ApiError::from(TransitionError::NotFound), StatusCode::NOT_FOUND),
            (ApiError::from(TransitionError::NotOwner), StatusCode::FORBIDDEN),
            (
                ApiError::from(TransitionError::NotLive(AuctionStatus::Sold)),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(TransitionError::LowBid(1000)),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(TransitionError::Store(anyhow::anyhow!("disk on fire"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, want) in cases {
            assert_eq!(err.status(), want, "{err}");
        }
    }

    #[test]
    fn internal_errors_never_leak_details() {
        let err = ApiError::Internal(anyhow::anyhow!("secret path /var/db"));
        assert_eq!(err.to_string(), "Internal server error");
    }
}
