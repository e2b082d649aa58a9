//! OAuth2 client-credentials token lifecycle.
//!
//! The issuer permits roughly one issuance per minute per credential, so
//! tokens are cached in memory and mirrored to disk: a restart reuses a
//! still-valid token instead of burning an issuance. The disk cache is
//! advisory only — two processes sharing a credential may both issue and
//! must each tolerate the issuer's rate-limit response.

use crate::broker::error::{truncate_body, BrokerError, BrokerResult};
use crate::broker::types::{TokenGrant, TokenRequest};
use crate::config::{BrokerConfig, Environment};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tokens are considered expired this long before the server-side TTL.
const SAFETY_MARGIN_SECS: i64 = 300;
/// Attempts for ordinary issuance failures.
const ISSUE_ATTEMPTS: u32 = 3;

/// A bearer credential for broker calls. Replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// On-disk token record, keyed by (environment, credential prefix).
#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
    saved_at: DateTime<Utc>,
}

enum IssueFailure {
    /// The issuer's explicit too-many-requests answer for this endpoint.
    RateLimited(String),
    Other(String),
}

/// Acquires, caches and refreshes the session token for one credential.
///
/// The cache mutex is held across an in-flight issuance, so a concurrent
/// caller waits on and reuses that result instead of double-issuing.
pub struct TokenManager {
    http: reqwest::Client,
    auth_url: String,
    app_key: String,
    app_secret: String,
    environment: Environment,
    cache_path: PathBuf,
    current: Mutex<Option<Token>>,
    retry_delay: Duration,
    rate_limit_cooldown: Duration,
}

impl TokenManager {
    pub fn new(config: &BrokerConfig, base_url: &str, http: reqwest::Client) -> Self {
        let cache_path = cache_file_path(
            Path::new(&config.token_cache_dir),
            config.environment,
            &config.app_key,
        );
        Self {
            http,
            auth_url: format!("{}/oauth2/token", base_url.trim_end_matches('/')),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            environment: config.environment,
            cache_path,
            current: Mutex::new(None),
            retry_delay: Duration::from_secs(2),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }

    /// Override the issuance retry schedule. Tests use millisecond delays.
    pub fn with_retry_schedule(mut self, retry_delay: Duration, cooldown: Duration) -> Self {
        self.retry_delay = retry_delay;
        self.rate_limit_cooldown = cooldown;
        self
    }

    /// Return the cached token, falling back to the disk cache, issuing a
    /// fresh one only when neither is still valid.
    pub async fn ensure_valid(&self) -> BrokerResult<Token> {
        let mut slot = self.current.lock().await;
        let now = Utc::now();

        if let Some(token) = slot.as_ref() {
            if token.is_valid(now) {
                return Ok(token.clone());
            }
            debug!(environment = %self.environment, "cached token expired");
        } else if let Some(token) = self.load_cached(now) {
            info!(
                environment = %self.environment,
                expires_at = %token.expires_at,
                "reusing persisted token"
            );
            let clone = token.clone();
            *slot = Some(token);
            return Ok(clone);
        }

        let token = self.issue_inner().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Discard any cached token and issue a new one. Used by the client
    /// after a 401/403.
    pub async fn force_refresh(&self) -> BrokerResult<Token> {
        let mut slot = self.current.lock().await;
        *slot = None;
        let token = self.issue_inner().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Issue a token from the auth endpoint. Caller must hold the cache
    /// lock, which is what serializes concurrent issuance per credential.
    async fn issue_inner(&self) -> BrokerResult<Token> {
        let mut cooldown_used = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.request_grant().await {
                Ok(grant) => {
                    let now = Utc::now();
                    let ttl = (grant.expires_in - SAFETY_MARGIN_SECS).max(0);
                    let token = Token {
                        value: grant.access_token,
                        issued_at: now,
                        expires_at: now + ChronoDuration::seconds(ttl),
                    };
                    self.persist(&token);
                    info!(
                        environment = %self.environment,
                        app_key = %redact(&self.app_key),
                        expires_at = %token.expires_at,
                        "issued new token"
                    );
                    return Ok(token);
                }
                Err(IssueFailure::RateLimited(message)) => {
                    // The issuer allows about one issuance per minute:
                    // one fixed cool-down, one more try, then give up.
                    if cooldown_used {
                        return Err(BrokerError::Auth(format!(
                            "token issuance rate-limited twice: {message}"
                        )));
                    }
                    cooldown_used = true;
                    warn!(
                        cooldown_secs = self.rate_limit_cooldown.as_secs(),
                        "token issuance rate-limited, cooling down"
                    );
                    tokio::time::sleep(self.rate_limit_cooldown).await;
                }
                Err(IssueFailure::Other(message)) => {
                    if attempt >= ISSUE_ATTEMPTS {
                        return Err(BrokerError::Auth(format!(
                            "token issuance failed after {attempt} attempts: {message}"
                        )));
                    }
                    warn!(attempt, error = %message, "token issuance failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn request_grant(&self) -> Result<TokenGrant, IssueFailure> {
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: &self.app_key,
            appsecret: &self.app_secret,
        };

        let response = self
            .http
            .post(&self.auth_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IssueFailure::Other(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| IssueFailure::Other(e.to_string()))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(IssueFailure::RateLimited(truncate_body(&text)));
        }
        if !status.is_success() {
            return Err(IssueFailure::Other(format!(
                "status {}: {}",
                status.as_u16(),
                truncate_body(&text)
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| IssueFailure::Other(format!("malformed grant: {e}")))
    }

    fn load_cached(&self, now: DateTime<Utc>) -> Option<Token> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        let cached: CachedToken = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "unreadable token cache");
                return None;
            }
        };
        if cached.expires_at <= now {
            return None;
        }
        Some(Token {
            value: cached.token,
            issued_at: cached.saved_at,
            expires_at: cached.expires_at,
        })
    }

    /// Best-effort mirror to disk. Failure is logged, never fatal.
    fn persist(&self, token: &Token) {
        let record = CachedToken {
            token: token.value.clone(),
            expires_at: token.expires_at,
            saved_at: Utc::now(),
        };
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.cache_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&record).expect("serializable record");
            std::fs::write(&self.cache_path, json)
        };
        if let Err(e) = write() {
            warn!(path = %self.cache_path.display(), error = %e, "failed to persist token");
        }
    }
}

fn cache_file_path(dir: &Path, environment: Environment, app_key: &str) -> PathBuf {
    let prefix: String = app_key.chars().take(8).collect();
    dir.join(format!("token-{environment}-{prefix}.json"))
}

/// Mask a secret for log output, keeping only a short prefix.
pub(crate) fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}***")
}
