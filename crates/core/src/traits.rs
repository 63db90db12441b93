use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Candle sampling interval understood by price feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    M1,
    M5,
    M15,
    H1,
}

impl Interval {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
        }
    }

    /// Parses an interval string as found in configuration files.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            _ => None,
        }
    }
}

/// Errors from a price feed.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The bulk fetch failed as a whole; the cycle is skipped and retried.
    #[error("price feed unavailable: {0}")]
    Unavailable(String),
}

/// Source of closing-price history.
///
/// A feed may return a shorter series than requested for any symbol,
/// or omit a symbol entirely; neither is an error. Only a wholesale
/// fetch failure surfaces as [`FeedError::Unavailable`].
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetches up to `lookback` closing prices per symbol, oldest first.
    async fn fetch(
        &self,
        symbols: &[String],
        lookback: usize,
        interval: Interval,
    ) -> Result<HashMap<String, Vec<f64>>, FeedError>;
}

/// Sink for per-cycle portfolio snapshots.
///
/// Publishing is fire-and-forget from the loop's perspective; failures
/// are logged by the caller and never abort a cycle.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn publish(&self, text: &str, cycle: u64) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trips_through_str() {
        for iv in [Interval::M1, Interval::M5, Interval::M15, Interval::H1] {
            assert_eq!(Interval::parse(iv.as_str()), Some(iv));
        }
    }

    #[test]
    fn interval_rejects_unknown() {
        assert_eq!(Interval::parse("2h"), None);
    }
}
