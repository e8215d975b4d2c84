mod heartbeat;

pub use heartbeat::{heartbeat_delay, HeartbeatTask};
