mod credentials;
mod oauth;

pub use credentials::{AccessToken, Credentials};
pub use oauth::OAuthClient;
