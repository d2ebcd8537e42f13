use serde::Deserialize;
use std::time::{Duration, Instant};
use subvault_core::{CoreError, RedditApiError, ScraperConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Application-only token exchange for a Reddit script app.
///
/// Tokens are cached until shortly before expiry; callers just ask for
/// `access_token()` on every request.
#[derive(Debug)]
pub struct Authenticator {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    user_agent: String,
    token: Mutex<Option<CachedToken>>,
}

impl Authenticator {
    pub fn new(config: &ScraperConfig) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            user_agent: config.user_agent.clone(),
            token: Mutex::new(None),
        })
    }

    pub async fn access_token(&self) -> Result<String, CoreError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.access_token.clone());
            }
            debug!("Cached token close to expiry, refreshing");
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        info!("Obtained Reddit access token (expires in {}s)", token.expires_in);

        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        Ok(access_token)
    }

    async fn request_token(&self) -> Result<TokenResponse, CoreError> {
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("User-Agent", &self.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RedditApiError::AuthenticationFailed {
                reason: format!("token endpoint returned {}", status),
            }
            .into());
        }

        response.json::<TokenResponse>().await.map_err(|_| {
            RedditApiError::AuthenticationFailed {
                reason: "malformed token response".to_string(),
            }
            .into()
        })
    }
}
