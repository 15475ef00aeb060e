use crate::model::ContentLocator;
use backoff::backoff::Backoff;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use connector_core::backoff::{create_backoff, retry_with_backoff};
use connector_core::config::{DropboxSourceConfig, RetryConfig};
use connector_core::{Error, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

pub const API_BASE_URL: &str = "https://api.dropboxapi.com";
pub const CONTENT_BASE_URL: &str = "https://content.dropboxapi.com";

/// Wait applied to a 429 response that carries no Retry-After header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 300;
/// Dropbox access tokens live four hours when the grant omits expires_in.
const DEFAULT_TOKEN_TTL_SECS: i64 = 14_400;
/// Tokens are refreshed this long before they actually expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;
const RECEIVED_FILES_PAGE_LIMIT: u32 = 100;
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// HTTP client for the Dropbox RPC and content APIs.
///
/// Owns the OAuth refresh-token exchange and the retry discipline: 429s wait
/// out the server hint, a 401 forces a single token refresh, and transient
/// transport failures back off exponentially with jitter.
pub struct DropboxClient {
    http: Client,
    config: DropboxSourceConfig,
    retry: RetryConfig,
    api_base: String,
    content_base: String,
    token: Mutex<Option<AccessToken>>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

enum RequestBody<'a> {
    /// JSON body for the RPC host.
    Rpc(&'a Value),
    /// Dropbox-API-Arg header for the content host, empty body.
    Content(&'a Value),
}

impl DropboxClient {
    pub fn new(config: DropboxSourceConfig, retry: RetryConfig) -> Result<Self> {
        Self::with_base_urls(config, retry, API_BASE_URL, CONTENT_BASE_URL)
    }

    /// Base URL override for tests and proxied deployments.
    pub fn with_base_urls(
        config: DropboxSourceConfig,
        retry: RetryConfig,
        api_base: impl Into<String>,
        content_base: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            config,
            retry,
            api_base: api_base.into(),
            content_base: content_base.into(),
            token: Mutex::new(None),
        })
    }

    #[instrument(skip(self))]
    pub async fn list_folder(&self, path: &str) -> Result<FolderPage> {
        // The root namespace is spelled as an empty string on the wire.
        let path = if path == "/" { "" } else { path };
        self.call(
            "files/list_folder",
            json!({"path": path, "recursive": true}),
        )
        .await
    }

    pub async fn continue_folder_listing(&self, cursor: &str) -> Result<FolderPage> {
        self.call("files/list_folder/continue", json!({"cursor": cursor}))
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_received_files(&self) -> Result<ReceivedFilesPage> {
        self.call(
            "sharing/list_received_files",
            json!({"limit": RECEIVED_FILES_PAGE_LIMIT}),
        )
        .await
    }

    pub async fn continue_received_files(&self, cursor: &str) -> Result<ReceivedFilesPage> {
        self.call(
            "sharing/list_received_files/continue",
            json!({"cursor": cursor}),
        )
        .await
    }

    pub async fn shared_link_metadata(&self, url: &str) -> Result<SharedLinkMetadata> {
        self.call("sharing/get_shared_link_metadata", json!({"url": url}))
            .await
    }

    /// Resolves the configured path; a 409 from Dropbox means it does not
    /// exist or is not visible to the app.
    pub async fn check_path(&self, path: &str) -> Result<()> {
        self.call::<Value>("files/get_metadata", json!({"path": path}))
            .await
            .map(|_| ())
    }

    pub async fn current_account(&self) -> Result<()> {
        self.call::<Value>("users/get_current_account", Value::Null)
            .await
            .map(|_| ())
    }

    /// Downloads the raw bytes behind a locator from the content host.
    #[instrument(skip(self))]
    pub async fn download(&self, locator: &ContentLocator) -> Result<Bytes> {
        let (endpoint, arg) = match locator {
            ContentLocator::DropboxFile { path } => ("files/download", json!({"path": path})),
            ContentLocator::DropboxExport { path } => ("files/export", json!({"path": path})),
            ContentLocator::SharedLink { url } => {
                ("sharing/get_shared_link_file", json!({"url": url}))
            }
            ContentLocator::LocalFile { .. } => {
                return Err(Error::Source {
                    service: "dropbox".to_string(),
                    details: "local file locators cannot be downloaded remotely".to_string(),
                })
            }
        };

        let url = format!("{}/2/{}", self.content_base, endpoint);
        let response = self.post(&url, RequestBody::Content(&arg)).await?;
        Ok(response.bytes().await?)
    }

    async fn call<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> Result<T> {
        let url = format!("{}/2/{}", self.api_base, endpoint);
        let response = self.post(&url, RequestBody::Rpc(&body)).await?;
        Ok(response.json().await?)
    }

    /// Single POST with the full retry discipline. Returns the first
    /// successful response; everything else becomes a typed error.
    async fn post(&self, url: &str, body: RequestBody<'_>) -> Result<Response> {
        let mut rate_limit_waits = 0u32;
        let mut transport_attempts = 0u32;
        let mut reauthorized = false;
        let mut transport_backoff =
            create_backoff(self.retry.max_retries, self.retry.retry_base_delay_ms);

        loop {
            let token = self.access_token().await?;
            let request = match &body {
                RequestBody::Rpc(arg) => self.http.post(url).bearer_auth(&token).json(arg),
                RequestBody::Content(arg) => self
                    .http
                    .post(url)
                    .bearer_auth(&token)
                    .header("Dropbox-API-Arg", arg.to_string()),
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    match status {
                        StatusCode::TOO_MANY_REQUESTS => {
                            let wait_secs = retry_after_hint(&response);
                            if rate_limit_waits >= self.retry.max_retries {
                                return Err(Error::RateLimited {
                                    retry_after_secs: wait_secs,
                                });
                            }
                            rate_limit_waits += 1;
                            warn!(
                                url,
                                wait_secs,
                                attempt = rate_limit_waits,
                                "Rate limited, honoring Retry-After"
                            );
                            metrics::counter!("connector_rate_limit_waits").increment(1);
                            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                        }
                        StatusCode::UNAUTHORIZED => {
                            if reauthorized {
                                return Err(Error::Authentication {
                                    reason: "access token rejected after refresh".to_string(),
                                });
                            }
                            reauthorized = true;
                            debug!(url, "Access token rejected, refreshing");
                            self.token.lock().await.take();
                        }
                        StatusCode::CONFLICT => {
                            let details = response.text().await.unwrap_or_default();
                            return Err(Error::InvalidPath(details));
                        }
                        _ => {
                            let details = response.text().await.unwrap_or_default();
                            return Err(Error::Source {
                                service: "dropbox".to_string(),
                                details: format!("{url} returned {status}: {details}"),
                            });
                        }
                    }
                }
                // Anything send() fails with is transport-level: resets,
                // refused connections, timeouts.
                Err(e) => {
                    transport_attempts += 1;
                    if transport_attempts > self.retry.max_retries {
                        return Err(e.into());
                    }
                    match transport_backoff.next_backoff() {
                        Some(delay) => {
                            warn!(
                                url,
                                error = %e,
                                delay_ms = delay.as_millis(),
                                attempt = transport_attempts,
                                "Transient transport failure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Returns a valid bearer token, exchanging the refresh token when the
    /// cached one is missing or about to expire.
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if !current.is_expired() {
                return Ok(current.secret.clone());
            }
        }

        let refreshed = retry_with_backoff(
            || self.request_token(),
            self.retry.max_retries.max(1),
            self.retry.retry_base_delay_ms,
            "dropbox_token_exchange",
        )
        .await?;
        let secret = refreshed.secret.clone();
        *token = Some(refreshed);
        Ok(secret)
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let url = format!("{}/oauth2/token", self.api_base);
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("client_id", self.config.app_key.as_str()),
            ("client_secret", self.config.app_secret.as_str()),
        ];

        let mut rate_limit_waits = 0u32;
        loop {
            let response = self.http.post(&url).form(&params).send().await?;
            let status = response.status();
            if status.is_success() {
                let grant: TokenGrant = response.json().await?;
                let ttl = (grant.expires_in_secs() - TOKEN_EXPIRY_MARGIN_SECS).max(60);
                debug!(ttl_secs = ttl, "Acquired Dropbox access token");
                return Ok(AccessToken {
                    secret: grant.access_token,
                    expires_at: Utc::now() + chrono::Duration::seconds(ttl),
                });
            }

            // The token endpoint is throttled like any other: honor the hint
            // until the wait budget runs out.
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait_secs = retry_after_hint(&response);
                if rate_limit_waits >= self.retry.max_retries {
                    return Err(Error::RateLimited {
                        retry_after_secs: wait_secs,
                    });
                }
                rate_limit_waits += 1;
                warn!(
                    wait_secs,
                    attempt = rate_limit_waits,
                    "Token endpoint rate limited, honoring Retry-After"
                );
                metrics::counter!("connector_rate_limit_waits").increment(1);
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                return Err(token_error(&body));
            }
            return Err(Error::Source {
                service: "dropbox".to_string(),
                details: format!("token exchange returned {status}: {body}"),
            });
        }
    }
}

/// Maps the oauth2/token error body onto an operator-actionable message.
fn token_error(body: &str) -> Error {
    let reason = if body.contains("invalid_grant") {
        "configured refresh token is invalid or has been revoked".to_string()
    } else if body.contains("invalid_client") {
        "configured app key or app secret is invalid".to_string()
    } else {
        format!("token exchange rejected: {body}")
    };
    Error::Authentication { reason }
}

fn retry_after_hint(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    expires_in: Option<ExpiresIn>,
}

/// Dropbox documents expires_in as an integer but has been observed sending
/// it as a decimal string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

impl TokenGrant {
    fn expires_in_secs(&self) -> i64 {
        match &self.expires_in {
            Some(ExpiresIn::Seconds(secs)) => *secs,
            Some(ExpiresIn::Text(text)) => text.trim().parse().unwrap_or(DEFAULT_TOKEN_TTL_SECS),
            None => DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderPage {
    pub entries: Vec<FolderEntry>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum FolderEntry {
    File(FileMetadata),
    Folder(FolderMetadata),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub client_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_true")]
    pub is_downloadable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceivedFilesPage {
    pub entries: Vec<ReceivedFile>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceivedFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub time_invited: Option<DateTime<Utc>>,
    pub preview_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharedLinkMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub client_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: Option<u64>,
}

fn default_true() -> bool {
    true
}
