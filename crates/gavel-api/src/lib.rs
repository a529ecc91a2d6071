pub mod auth;
pub mod bids;
pub mod chats;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod posts;
pub mod sale_chats;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
