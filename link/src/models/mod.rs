//! Data models for lab-link.
//!
//! Wire messages exchanged over the socket plus the option and snapshot
//! structures callers pass around.

pub mod client_message;
pub mod connection_options;
pub mod push_mode;
pub mod request_context;
pub mod server_message;
pub mod subscription_info;


pub use client_message::ClientMessage;
pub use connection_options::ConnectionOptions;
pub use push_mode::PushMode;
pub use request_context::RequestContext;
pub use server_message::ServerMessage;
pub use subscription_info::WatchInfo;
