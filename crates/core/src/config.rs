use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Instruments eligible for consideration each cycle.
    pub universe: Vec<String>,
    pub feed: FeedConfig,
    pub strategy: StrategyConfig,
    pub scheduler: SchedulerConfig,
    pub persistence: PersistenceConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub api_url: String,
    /// Candle interval requested from the feed.
    pub interval: String,
    /// Number of closing prices requested per instrument.
    pub lookback: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Bars looked back for the momentum calculation.
    pub momentum_window: usize,
    /// Size of the volatility-selected candidate pool.
    pub top_n_volatility: usize,
    /// Number of instruments held at a time.
    pub num_to_long: usize,
    /// Upside take-profit threshold as a fraction (0.10 = 10%).
    pub upper_threshold: f64,
    /// Downside threshold is `loss_multiple * upper_threshold`.
    /// Asymmetric on purpose: winners are cut fast, losers get room.
    pub loss_multiple: f64,
    /// Total capital pool in account currency.
    pub capital: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cycle period in seconds; each cycle is anchored to this period.
    pub period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub state_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            universe: Vec::new(),
            feed: FeedConfig {
                api_url: "http://localhost:8080".to_string(),
                interval: "1m".to_string(),
                lookback: 30,
            },
            strategy: StrategyConfig {
                momentum_window: 5,
                top_n_volatility: 10,
                num_to_long: 3,
                upper_threshold: 0.02,
                loss_multiple: 5.0,
                capital: 1_000_000.0,
            },
            scheduler: SchedulerConfig { period_secs: 60 },
            persistence: PersistenceConfig {
                state_path: "state/portfolio.json".to_string(),
            },
            report: ReportConfig {
                dir: "reports".to_string(),
            },
        }
    }
}
