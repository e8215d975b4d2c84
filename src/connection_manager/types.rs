//! Connection state and session bookkeeping types

use std::fmt;

/// Lifecycle of one connection attempt.
///
/// `Idle -> Authenticating -> Connecting -> Open -> Closed`. Any failure
/// before `Closed` moves straight to `Closed`; there is no reconnect path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Authenticating,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why an open session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Server sent a Close frame
    Remote { code: Option<u16>, reason: String },
    /// Shutdown requested locally
    Local,
    /// Read error or stream ended without a Close frame
    Transport { error: String },
}

/// Per-session counters reported when the session ends
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: uuid::Uuid,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub frames_received: u64,
    pub heartbeats_sent: u64,
    pub user_created_events: u64,
    pub malformed_frames: u64,
    pub close_reason: CloseReason,
}
