pub mod core;
pub mod events;
pub mod machine;
pub mod notify;
pub mod sweeper;

pub use self::core::AuctionCore;
pub use events::LifecycleEvent;
pub use machine::{AuctionEnd, BidAccepted, SaleOutcome, TransitionError};
