use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use reqwest::Client;
use rotator_core::traits::{FeedError, Interval, PriceFeed};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::warn;

/// REST candle feed.
///
/// Fetches closing prices per symbol from
/// `<base>/candles?symbol=..&interval=..&limit=..`, which returns a
/// JSON array of candles carrying a `close` field (a bare array of
/// numbers is accepted too). A transport failure on the first request
/// is treated as the feed being down; after that, per-symbol failures
/// only drop that symbol from the result.
pub struct CandleFeed {
    http_client: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
}

impl CandleFeed {
    /// # Panics
    /// Never; the quota constant is non-zero.
    #[must_use]
    pub fn new(base_url: String) -> Self {
        // 20 requests per second, matching typical market-data limits
        let quota = Quota::per_second(NonZeroU32::new(20).unwrap());
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Self {
            http_client: Client::new(),
            base_url,
            rate_limiter,
        }
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        lookback: usize,
        interval: Interval,
    ) -> Result<Vec<f64>, reqwest::Error> {
        self.rate_limiter.until_ready().await;
        let url = format!(
            "{}/candles?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval.as_str(),
            lookback
        );
        let response = self.http_client.get(&url).send().await?.error_for_status()?;
        let json: serde_json::Value = response.json().await?;
        Ok(parse_closes(&json))
    }
}

/// Extracts closing prices, oldest first, from a candle response.
fn parse_closes(json: &serde_json::Value) -> Vec<f64> {
    let Some(items) = json.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::Number(n) => n.as_f64(),
            _ => item.get("close").and_then(serde_json::Value::as_f64),
        })
        .collect()
}

#[async_trait]
impl PriceFeed for CandleFeed {
    async fn fetch(
        &self,
        symbols: &[String],
        lookback: usize,
        interval: Interval,
    ) -> Result<HashMap<String, Vec<f64>>, FeedError> {
        let mut data = HashMap::with_capacity(symbols.len());

        for symbol in symbols {
            match self.fetch_symbol(symbol, lookback, interval).await {
                Ok(closes) => {
                    if closes.is_empty() {
                        warn!(symbol = %symbol, "Feed returned no candles");
                    } else {
                        data.insert(symbol.clone(), closes);
                    }
                }
                // The feed itself is unreachable; a status error (bad
                // or delisted symbol) is not, and only drops that
                // symbol.
                Err(e) if e.is_connect() || e.is_timeout() => {
                    return Err(FeedError::Unavailable(e.to_string()));
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Fetch failed, dropping symbol this cycle");
                }
            }
        }

        Ok(data)
    }
}
