use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use crate::config::OAuthConfig;
use crate::error::{AppError, Result};

use super::{AccessToken, Credentials};

const GRANT_TYPE: &str = "account_credentials";

/// Token endpoint response. Only `access_token` is required.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

/// Exchanges client credentials for a bearer token
pub struct OAuthClient {
    http: reqwest::Client,
    base_url: String,
}

impl OAuthClient {
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Auth(format!("failed to build HTTP client: {}", e)))?;

        let mut base_url = config.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self { http, base_url })
    }

    pub fn token_url(&self, account_id: &str) -> String {
        format!(
            "{}token?grant_type={}&account_id={}",
            self.base_url,
            GRANT_TYPE,
            urlencoding::encode(account_id)
        )
    }

    /// Request an access token. No retry on failure.
    #[tracing::instrument(
        name = "oauth.authenticate",
        skip(self, credentials),
        fields(account_id = %credentials.account_id())
    )]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AccessToken> {
        let response = self
            .http
            .post(self.token_url(credentials.account_id()))
            .header(AUTHORIZATION, credentials.basic_auth_header())
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Token request rejected");
            return Err(AppError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Auth(format!("invalid token response: {}", e)))?;

        let token = data
            .access_token
            .ok_or_else(|| AppError::Auth("access_token missing from response".to_string()))
            .and_then(AccessToken::new)?;

        tracing::debug!(
            token_type = data.token_type.as_deref().unwrap_or("unknown"),
            expires_in = data.expires_in,
            scope = data.scope.as_deref().unwrap_or(""),
            "Access token obtained"
        );

        Ok(token)
    }
}
