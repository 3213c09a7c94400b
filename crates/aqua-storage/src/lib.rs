//! Persisted identity storage + HTTP transport for the Aqua marketplace API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use aqua_core::{AuthUser, OrderRequest, SearchQuery, WorkerProfile};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const SEARCH_PATH: &str = "api/users/search";
pub const ORDERS_PATH: &str = "api/orders";

/// File name of the persisted identity inside the state directory.
pub const IDENTITY_FILE: &str = "aqua_user.json";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("unreadable response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Body returned by a successful booking. Nothing in the booking flow reads
/// it beyond logging the order id.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub body: serde_json::Value,
}

impl OrderReceipt {
    pub fn order_id(&self) -> Option<&str> {
        self.body
            .get("_id")
            .or_else(|| self.body.get("id"))
            .and_then(|v| v.as_str())
    }
}

/// The two marketplace calls the search/booking flow suspends on.
#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<WorkerProfile>, DirectoryError>;

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt, DirectoryError>;
}

/// Whether a failed search attempt is worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RetryDisposition {
    /// Throttling and server-side failures; other statuses are final.
    pub fn for_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::Retryable,
            s if s.is_server_error() => Self::Retryable,
            _ => Self::NonRetryable,
        }
    }

    /// Timeouts and refused connections only.
    pub fn for_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }

    pub fn is_retryable(self) -> bool {
        self == Self::Retryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let doubling = u32::try_from(attempt)
            .ok()
            .and_then(|n| 2u32.checked_pow(n))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(doubling).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Applies to searches only; bookings are never retried.
    pub backoff: BackoffPolicy,
    pub bearer_token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            bearer_token: None,
        }
    }
}

/// `WorkerDirectory` backed by the marketplace REST API.
#[derive(Debug)]
pub struct HttpDirectory {
    client: reqwest::Client,
    search_url: Url,
    orders_url: Url,
    backoff: BackoffPolicy,
    bearer_token: Option<String>,
}

impl HttpDirectory {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        let mut base = Url::parse(&config.base_url)
            .with_context(|| format!("parsing api base url {}", config.base_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let search_url = base
            .join(SEARCH_PATH)
            .with_context(|| format!("joining {SEARCH_PATH} onto {base}"))?;
        let orders_url = base
            .join(ORDERS_PATH)
            .with_context(|| format!("joining {ORDERS_PATH} onto {base}"))?;

        Ok(Self {
            client,
            search_url,
            orders_url,
            backoff: config.backoff,
            bearer_token: config.bearer_token.filter(|t| !t.is_empty()),
        })
    }

    pub fn search_url_for(&self, query: &SearchQuery) -> Url {
        let mut url = self.search_url.clone();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.pairs());
        }
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_workers(&self, url: &Url) -> Result<Vec<WorkerProfile>, DirectoryError> {
        let mut attempt = 0usize;
        loop {
            let (disposition, error) =
                match self.authorized(self.client.get(url.clone())).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let body = resp.bytes().await?;
                        return serde_json::from_slice(&body).map_err(|source| {
                            DirectoryError::Decode {
                                url: url.to_string(),
                                source,
                            }
                        });
                    }
                    Ok(resp) => (
                        RetryDisposition::for_status(resp.status()),
                        DirectoryError::HttpStatus {
                            status: resp.status().as_u16(),
                            url: url.to_string(),
                        },
                    ),
                    Err(err) => (RetryDisposition::for_error(&err), DirectoryError::Request(err)),
                };

            if !disposition.is_retryable() || attempt >= self.backoff.max_retries {
                return Err(error);
            }
            warn!(error = %error, attempt, "retrying worker search");
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    async fn post_order(&self, order: &OrderRequest) -> Result<OrderReceipt, DirectoryError> {
        let resp = self
            .authorized(self.client.post(self.orders_url.clone()))
            .json(order)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DirectoryError::HttpStatus {
                status: status.as_u16(),
                url: self.orders_url.to_string(),
            });
        }
        let body = resp.bytes().await?;
        let body = serde_json::from_slice(&body).map_err(|source| DirectoryError::Decode {
            url: self.orders_url.to_string(),
            source,
        })?;
        Ok(OrderReceipt { body })
    }
}

#[async_trait]
impl WorkerDirectory for HttpDirectory {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<WorkerProfile>, DirectoryError> {
        let url = self.search_url_for(query);
        let span = info_span!("worker_search", query = %query);
        let workers = self.fetch_workers(&url).instrument(span).await?;
        debug!(count = workers.len(), "worker search returned");
        Ok(workers)
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderReceipt, DirectoryError> {
        let span = info_span!(
            "create_order",
            worker_id = %order.worker_id,
            brokered = order.broker_id.is_some()
        );
        self.post_order(order).instrument(span).await
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity file {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding identity: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Load/save hooks behind the process-wide identity store.
#[async_trait]
pub trait IdentityStorage: Send + Sync {
    async fn load(&self) -> Result<Option<AuthUser>, IdentityError>;

    async fn save(&self, user: Option<&AuthUser>) -> Result<(), IdentityError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIdentity {
    state: PersistedState,
    #[serde(default)]
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    user: Option<AuthUser>,
}

/// Stores the identity as JSON under a state directory, replacing the file
/// atomically on every save.
#[derive(Debug, Clone)]
pub struct FileIdentityStorage {
    path: PathBuf,
}

impl FileIdentityStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join(IDENTITY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> IdentityError {
        IdentityError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn write_atomically(&self, bytes: &[u8]) -> Result<(), IdentityError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .map_err(|source| self.io_error(source))?;

        let temp_path = parent.join(format!(".{IDENTITY_FILE}.{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(|source| self.io_error(source))?;
        file.write_all(bytes)
            .await
            .map_err(|source| self.io_error(source))?;
        file.flush().await.map_err(|source| self.io_error(source))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(self.io_error(source));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStorage for FileIdentityStorage {
    async fn load(&self) -> Result<Option<AuthUser>, IdentityError> {
        if !fs::try_exists(&self.path)
            .await
            .map_err(|source| self.io_error(source))?
        {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|source| self.io_error(source))?;
        let persisted: PersistedIdentity =
            serde_json::from_str(&text).map_err(|source| IdentityError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(persisted.state.user)
    }

    async fn save(&self, user: Option<&AuthUser>) -> Result<(), IdentityError> {
        let persisted = PersistedIdentity {
            state: PersistedState {
                user: user.cloned(),
            },
            version: 0,
        };
        let bytes = serde_json::to_vec_pretty(&persisted).map_err(IdentityError::Encode)?;
        self.write_atomically(&bytes).await
    }
}

/// Process-wide authenticated identity. Loaded once, mutated in memory, and
/// written back only by `set_user` and `logout`.
#[derive(Debug)]
pub struct AuthStore<S> {
    storage: S,
    user: Option<AuthUser>,
}

impl<S: IdentityStorage> AuthStore<S> {
    pub async fn load(storage: S) -> Result<Self, IdentityError> {
        let user = storage.load().await?;
        Ok(Self { storage, user })
    }

    /// Like [`AuthStore::load`], but an unreadable record counts as signed
    /// out. The file is only replaced by the next `set_user` or `logout`.
    pub async fn load_or_sign_out(storage: S) -> Result<Self, IdentityError> {
        let user = match storage.load().await {
            Ok(user) => user,
            Err(IdentityError::Corrupt { path, source }) => {
                warn!(path = %path.display(), error = %source, "ignoring unreadable identity file");
                None
            }
            Err(err) => return Err(err),
        };
        Ok(Self { storage, user })
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|u| u.token.as_str())
            .filter(|t| !t.is_empty())
    }

    pub async fn set_user(&mut self, user: AuthUser) -> Result<(), IdentityError> {
        self.user = Some(user);
        self.storage.save(self.user.as_ref()).await
    }

    pub async fn logout(&mut self) -> Result<(), IdentityError> {
        self.user = None;
        self.storage.save(None).await
    }
}
