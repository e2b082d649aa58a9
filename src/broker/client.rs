//! Resilient broker client.
//!
//! Every outbound call funnels through [`BrokerClient::send`]: rate-limiter
//! slot, bearer token injection, then the transport call with a classified
//! retry policy. Call sites never carry their own retry logic.

use crate::broker::api::BrokerApi;
use crate::broker::error::{truncate_body, BrokerError, BrokerResult};
use crate::broker::rate_limit::RateLimiter;
use crate::broker::token::{redact, TokenManager};
use crate::broker::types::{
    AccountSnapshot, BalanceOutput, Candidate, DailyCandle, DailyPriceOutput, Envelope,
    OrderOutput, OrderReceipt, OrderRequest, OrderType, Quote, QuoteOutput, VolumeRankOutput,
};
use crate::config::{BrokerConfig, Environment};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Transaction code selecting one operation, per environment.
struct TrCode {
    live: &'static str,
    paper: &'static str,
}

impl TrCode {
    fn for_env(&self, environment: Environment) -> &'static str {
        match environment {
            Environment::Live => self.live,
            Environment::Paper => self.paper,
        }
    }
}

static TR_BALANCE: TrCode = TrCode { live: "TTB0401R", paper: "VTB0401R" };
static TR_QUOTE: TrCode = TrCode { live: "TTQ0100R", paper: "VTQ0100R" };
static TR_DAILY_PRICE: TrCode = TrCode { live: "TTQ0210R", paper: "VTQ0210R" };
static TR_VOLUME_RANK: TrCode = TrCode { live: "TTR0300R", paper: "VTR0300R" };
static TR_ORDER: TrCode = TrCode { live: "TTO0801U", paper: "VTO0801U" };

/// Backoff schedule for retryable failures.
///
/// Defaults follow the broker's observed behavior: exponential on server
/// faults, linear on rate-limit pushback, short fixed delay on network
/// faults. Tests inject millisecond schedules.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum total attempts per request
    pub max_retries: u32,
    /// Base of the 5xx exponential schedule: base * 2^n
    pub server_error_base: Duration,
    /// Step of the 429 linear schedule: step * (n + 1)
    pub rate_limited_step: Duration,
    /// Fixed delay after a timeout or connection reset
    pub network_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            server_error_base: Duration::from_secs(1),
            rate_limited_step: Duration::from_secs(5),
            network_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn server_error_delay(&self, retries_done: u32) -> Duration {
        self.server_error_base
            .saturating_mul(2u32.saturating_pow(retries_done))
    }

    fn rate_limited_delay(&self, retries_done: u32) -> Duration {
        self.rate_limited_step.saturating_mul(retries_done + 1)
    }
}

/// One outbound request, described declaratively.
struct ApiCall<'a> {
    method: Method,
    path: &'a str,
    /// Rate-limiter key
    endpoint: &'a str,
    tr: &'static TrCode,
    query: Vec<(&'a str, String)>,
    body: Option<serde_json::Value>,
}

/// Session-scoped broker client: owns the HTTP pool, the per-endpoint
/// rate limiter and the token manager for one credential. Constructed
/// once and shared by `Arc`.
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    environment: Environment,
    account_no: String,
    app_key: String,
    app_secret: String,
    tokens: TokenManager,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl BrokerClient {
    pub fn new(config: &BrokerConfig, base_url: String) -> BrokerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BrokerError::Transient {
                endpoint: "client".into(),
                attempts: 0,
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let tokens = TokenManager::new(config, &base_url, http.clone());
        let limiter = RateLimiter::new(Duration::from_millis(config.rate_limit_interval_ms));
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            ..RetryPolicy::default()
        };

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            environment: config.environment,
            account_no: config.account_no.clone(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            tokens,
            limiter,
            policy,
        })
    }

    /// Replace the retry schedule. Tests use millisecond delays.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The single send path. Classified outcomes:
    /// 200 parse-and-return; 500 exponential retry; 429 linear retry;
    /// 401/403 one forced token refresh then a single retry; any other
    /// status is a deterministic protocol error; network faults retry on
    /// a short fixed delay.
    async fn send<T: DeserializeOwned>(&self, call: ApiCall<'_>) -> BrokerResult<Envelope<T>> {
        let mut attempt = 0u32;
        let mut auth_retried = false;

        loop {
            self.limiter.acquire(call.endpoint).await;
            let token = self.tokens.ensure_valid().await?;
            attempt += 1;
            debug!(endpoint = call.endpoint, attempt, "sending request");

            let url = self.build_url(call.path, &call.query);
            let mut request = self
                .http
                .request(call.method.clone(), &url)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token.value))
                .header("appkey", &self.app_key)
                .header("appsecret", &self.app_secret)
                .header("tr_cd", call.tr.for_env(self.environment));
            if let Some(body) = &call.body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    if attempt >= self.policy.max_retries {
                        return Err(BrokerError::Transient {
                            endpoint: call.endpoint.to_string(),
                            attempts: attempt,
                            message: format!("network fault: {e}"),
                        });
                    }
                    warn!(
                        endpoint = call.endpoint,
                        attempt,
                        request = %self.describe(&call),
                        error = %e,
                        "network fault, retrying"
                    );
                    tokio::time::sleep(self.policy.network_delay).await;
                    continue;
                }
            };

            let status = response.status();
            match status {
                StatusCode::OK => {
                    let text = response.text().await.unwrap_or_default();
                    return serde_json::from_str(&text).map_err(|e| BrokerError::Parse {
                        endpoint: call.endpoint.to_string(),
                        message: format!("{e} in {}", truncate_body(&text)),
                    });
                }
                StatusCode::INTERNAL_SERVER_ERROR => {
                    if attempt >= self.policy.max_retries {
                        return Err(BrokerError::Transient {
                            endpoint: call.endpoint.to_string(),
                            attempts: attempt,
                            message: "server error (500), retries exhausted".into(),
                        });
                    }
                    let delay = self.policy.server_error_delay(attempt - 1);
                    warn!(
                        endpoint = call.endpoint,
                        attempt,
                        request = %self.describe(&call),
                        delay_ms = delay.as_millis() as u64,
                        "server error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= self.policy.max_retries {
                        return Err(BrokerError::Transient {
                            endpoint: call.endpoint.to_string(),
                            attempts: attempt,
                            message: "rate limited (429), retries exhausted".into(),
                        });
                    }
                    let delay = self.policy.rate_limited_delay(attempt - 1);
                    warn!(
                        endpoint = call.endpoint,
                        attempt,
                        request = %self.describe(&call),
                        delay_ms = delay.as_millis() as u64,
                        "rate limited by broker, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    if auth_retried {
                        return Err(BrokerError::Auth(format!(
                            "{} rejected twice with {}",
                            call.endpoint,
                            status.as_u16()
                        )));
                    }
                    auth_retried = true;
                    warn!(
                        endpoint = call.endpoint,
                        status = status.as_u16(),
                        "auth rejected, forcing token refresh"
                    );
                    self.tokens.force_refresh().await?;
                }
                other => {
                    let text = response.text().await.unwrap_or_default();
                    warn!(
                        endpoint = call.endpoint,
                        status = other.as_u16(),
                        request = %self.describe(&call),
                        "unexpected status, not retrying"
                    );
                    return Err(BrokerError::protocol(call.endpoint, other.as_u16(), &text));
                }
            }
        }
    }

    fn build_url(&self, path: &str, query: &[(&str, String)]) -> String {
        if query.is_empty() {
            return format!("{}{}", self.base_url, path);
        }
        let encoded: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect();
        format!("{}{}?{}", self.base_url, path, encoded.join("&"))
    }

    /// Loggable request summary with credentials masked.
    fn describe(&self, call: &ApiCall<'_>) -> String {
        format!(
            "{} {} appkey={} appsecret=*** authorization=***",
            call.method,
            self.build_url(call.path, &call.query),
            redact(&self.app_key),
        )
    }
}

/// Unwrap an envelope, converting broker-side rejection codes.
fn expect_output<T>(envelope: Envelope<T>, endpoint: &str) -> BrokerResult<T> {
    if !envelope.is_success() {
        return Err(BrokerError::Rejected {
            code: envelope.code,
            message: envelope.message,
        });
    }
    envelope.output.ok_or_else(|| BrokerError::Parse {
        endpoint: endpoint.to_string(),
        message: "success envelope with no output".into(),
    })
}

#[async_trait]
impl BrokerApi for BrokerClient {
    async fn account_snapshot(&self) -> BrokerResult<AccountSnapshot> {
        let envelope: Envelope<BalanceOutput> = self
            .send(ApiCall {
                method: Method::GET,
                path: "/accounts/balance",
                endpoint: "balance",
                tr: &TR_BALANCE,
                query: vec![("account", self.account_no.clone())],
                body: None,
            })
            .await?;
        let output = expect_output(envelope, "balance")?;
        Ok(AccountSnapshot {
            cash: output.available_cash,
            holdings: output.holdings.into_iter().map(Into::into).collect(),
        })
    }

    async fn quote(&self, symbol: &str) -> BrokerResult<Quote> {
        let envelope: Envelope<QuoteOutput> = self
            .send(ApiCall {
                method: Method::GET,
                path: "/quotations/price",
                endpoint: "quote",
                tr: &TR_QUOTE,
                query: vec![("symbol", symbol.to_string())],
                body: None,
            })
            .await?;
        expect_output(envelope, "quote").map(Into::into)
    }

    async fn daily_candles(&self, symbol: &str, count: usize) -> BrokerResult<Vec<DailyCandle>> {
        let envelope: Envelope<DailyPriceOutput> = self
            .send(ApiCall {
                method: Method::GET,
                path: "/quotations/daily-price",
                endpoint: "daily-price",
                tr: &TR_DAILY_PRICE,
                query: vec![
                    ("symbol", symbol.to_string()),
                    ("count", count.to_string()),
                ],
                body: None,
            })
            .await?;
        let output = expect_output(envelope, "daily-price")?;
        let mut candles: Vec<DailyCandle> =
            output.candles.into_iter().map(Into::into).collect();
        // The broker returns newest-first; the engine wants oldest-first.
        candles.sort_by_key(|c| c.date);
        Ok(candles)
    }

    async fn volume_leaders(&self, limit: usize) -> BrokerResult<Vec<Candidate>> {
        let envelope: Envelope<VolumeRankOutput> = self
            .send(ApiCall {
                method: Method::GET,
                path: "/rankings/volume",
                endpoint: "volume-rank",
                tr: &TR_VOLUME_RANK,
                query: vec![("limit", limit.to_string())],
                body: None,
            })
            .await?;
        let output = expect_output(envelope, "volume-rank")?;
        let mut candidates: Vec<Candidate> =
            output.entries.into_iter().map(Into::into).collect();
        candidates.sort_by_key(|c| c.rank);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn submit_order(&self, order: &OrderRequest) -> BrokerResult<OrderReceipt> {
        let price = match order.order_type {
            OrderType::Limit => order
                .limit_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "0".to_string()),
            OrderType::Market => "0".to_string(),
        };
        let body = serde_json::json!({
            "account": self.account_no,
            "symbol": order.symbol,
            "side": order.side.as_str(),
            "order_type": order.order_type.as_str(),
            "quantity": order.quantity.to_string(),
            "price": price,
        });

        let envelope: Envelope<OrderOutput> = self
            .send(ApiCall {
                method: Method::POST,
                path: "/orders",
                endpoint: "order",
                tr: &TR_ORDER,
                query: Vec::new(),
                body: Some(body),
            })
            .await?;

        // A domain rejection (insufficient funds, unknown symbol) is an
        // outcome, not an error: the engine logs it and moves on.
        if envelope.is_success() {
            let output = expect_output(envelope, "order")?;
            Ok(OrderReceipt {
                order_id: Some(output.order_id),
                accepted: true,
                message: String::new(),
                submitted_at: Utc::now(),
            })
        } else {
            Ok(OrderReceipt {
                order_id: None,
                accepted: false,
                message: format!("[{}] {}", envelope.code, envelope.message),
                submitted_at: Utc::now(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr_code_selects_environment() {
        assert_eq!(TR_ORDER.for_env(Environment::Live), "TTO0801U");
        assert_eq!(TR_ORDER.for_env(Environment::Paper), "VTO0801U");
    }

    #[test]
    fn test_retry_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.server_error_delay(0), Duration::from_secs(1));
        assert_eq!(policy.server_error_delay(1), Duration::from_secs(2));
        assert_eq!(policy.server_error_delay(2), Duration::from_secs(4));

        assert_eq!(policy.rate_limited_delay(0), Duration::from_secs(5));
        assert_eq!(policy.rate_limited_delay(1), Duration::from_secs(10));
    }

    #[test]
    fn test_expect_output_maps_rejection() {
        let envelope: Envelope<OrderOutput> = Envelope {
            code: "40310000".into(),
            message: "insufficient funds".into(),
            output: None,
        };
        match expect_output(envelope, "order") {
            Err(BrokerError::Rejected { code, .. }) => assert_eq!(code, "40310000"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
