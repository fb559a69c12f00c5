/// file: src/config.rs
/// description: Runtime configuration for the venue link: endpoint, timeouts,
/// reconnect policy, and tick buffer capacity.
use crate::cli::Args;
use anyhow::Result;
use std::time::Duration;
use url::Url;

/// Default public venue endpoint; the app id is appended as a query parameter.
pub const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3";

#[derive(Debug, Clone)]
pub struct Config {
    pub websocket: WebSocketConfig,
    pub reconnect: ReconnectConfig,
    pub metrics: MetricsConfig,
    /// Bounded tick history per symbol, roughly five minutes at 1 Hz.
    pub max_ticks: usize,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub url: Url,
    /// Application identifier the venue issued for this client.
    pub app_id: String,
    /// Bound on dial + authorize, end to end.
    pub connect_timeout: Duration,
    /// Bound on request/response reads (catalog lookups).
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay; doubles per attempt.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// After this many failed attempts the link is reported down for good.
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut url = Url::parse(&args.url)?;
        url.query_pairs_mut().append_pair("app_id", &args.app_id);

        Ok(Config {
            websocket: WebSocketConfig {
                url,
                app_id: args.app_id.clone(),
                connect_timeout: Duration::from_secs(args.connect_timeout),
                request_timeout: Duration::from_secs(args.request_timeout),
            },
            reconnect: ReconnectConfig::default(),
            metrics: MetricsConfig {
                enabled: args.metrics,
                port: args.metrics_port,
            },
            max_ticks: args.max_ticks,
        })
    }

    /// Library-use constructor pointing at the given endpoint.
    pub fn for_endpoint(url: Url, app_id: impl Into<String>) -> Self {
        Config {
            websocket: WebSocketConfig {
                url,
                app_id: app_id.into(),
                connect_timeout: Duration::from_secs(15),
                request_timeout: Duration::from_secs(10),
            },
            reconnect: ReconnectConfig::default(),
            metrics: MetricsConfig {
                enabled: false,
                port: 9090,
            },
            max_ticks: 300,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Exponential backoff: `min(base * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(exp.min(self.max_delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = ReconnectConfig::default();
        let expected_ms = [2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000, 30000, 30000];
        for (i, want) in expected_ms.iter().enumerate() {
            let attempt = (i + 1) as u32;
            assert_eq!(
                policy.delay_for_attempt(attempt).as_millis() as u64,
                *want,
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn backoff_never_exceeds_cap_for_large_attempts() {
        let policy = ReconnectConfig::default();
        assert_eq!(policy.delay_for_attempt(63), Duration::from_millis(30_000));
    }
}
