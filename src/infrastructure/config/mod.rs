mod settings;

pub use settings::{
    CredentialsConfig, LogFormat, LoggingConfig, OAuthConfig, Settings, WebSocketConfig,
};
