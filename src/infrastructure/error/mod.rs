use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    #[error("Invalid setting {key}: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

impl AppError {
    pub fn invalid_setting(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Stable error code, used as a structured log field
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::MissingSetting(_) | AppError::InvalidSetting { .. } => {
                "CONFIG_ERROR"
            }
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Connection(_) | AppError::WebSocket(_) => "CONNECTION_ERROR",
            AppError::MalformedMessage(_) => "MALFORMED_MESSAGE",
        }
    }

    /// Configuration and authentication failures abort the process before
    /// any connection is attempted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::MissingSetting(_)
                | AppError::InvalidSetting { .. }
                | AppError::Auth(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::MissingSetting("url".into()).code(), "CONFIG_ERROR");
        assert_eq!(AppError::Auth("denied".into()).code(), "AUTH_ERROR");
        assert_eq!(AppError::Connection("reset".into()).code(), "CONNECTION_ERROR");
        assert_eq!(
            AppError::WebSocket(tungstenite::Error::ConnectionClosed).code(),
            "CONNECTION_ERROR"
        );
        assert_eq!(
            AppError::MalformedMessage("not json".into()).code(),
            "MALFORMED_MESSAGE"
        );
    }

    #[test]
    fn test_fatal() {
        assert!(AppError::invalid_setting("websocket.url", "blank").is_fatal());
        assert!(AppError::Auth("401".into()).is_fatal());
        assert!(!AppError::Connection("reset".into()).is_fatal());
        assert!(!AppError::MalformedMessage("bad".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = AppError::invalid_setting("websocket.heartbeat_interval", "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid setting websocket.heartbeat_interval: must be positive"
        );
    }
}
