//! Per-endpoint request throttle.
//!
//! The broker enforces a hard per-second request quota per endpoint and
//! bans credentials that exceed it, so every outbound call must pass
//! through `acquire` before touching the transport.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between calls to the same endpoint.
///
/// The timestamp map is the one piece of state shared by every caller of
/// the client, so all access goes through the internal mutex. The lock is
/// never held across a sleep: a throttled caller releases it, waits, and
/// re-checks, so a backed-up endpoint does not stall the others.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Suspend until the endpoint's minimum interval has elapsed, then
    /// record this call. No fairness guarantee beyond FIFO-ish queueing
    /// under contention, which is fine at the call volumes we run.
    pub async fn acquire(&self, endpoint: &str) {
        loop {
            let wait = {
                let mut last = self.last_request.lock().await;
                let now = Instant::now();
                match last.get(endpoint) {
                    Some(prev) => {
                        let elapsed = now.duration_since(*prev);
                        if elapsed >= self.min_interval {
                            last.insert(endpoint.to_string(), now);
                            return;
                        }
                        self.min_interval - elapsed
                    }
                    None => {
                        last.insert(endpoint.to_string(), now);
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
