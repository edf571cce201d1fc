//! Realtime chat transport
//!
//! One WebSocket per room. The socket keeps sends ordered across connection
//! setup and recovers from the server's `unauthorized` signal by refreshing
//! the token through the shared session and reconnecting.

pub mod frame;
pub mod socket;
pub mod transport;

pub use frame::ControlFrame;
pub use socket::{ChatConfig, ChatSocket, ConnectionState};
