pub mod connection;
pub mod dispatcher;
pub mod forwarder;

pub use connection::handle_connection;
pub use dispatcher::{Dispatcher, Member};
