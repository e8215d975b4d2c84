//! Connection lifecycle: authenticate, open, heartbeat, receive, close

mod manager;
mod session;
mod stats;
mod types;

pub use manager::{append_access_token, ConnectionManager};
pub use stats::SessionStats;
pub use types::{CloseReason, ConnectionState, SessionSummary};
