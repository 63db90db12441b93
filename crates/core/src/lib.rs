pub mod config;
pub mod config_loader;
pub mod portfolio;
pub mod traits;

pub use config::{
    AppConfig, FeedConfig, PersistenceConfig, ReportConfig, SchedulerConfig, StrategyConfig,
};
pub use config_loader::ConfigLoader;
pub use portfolio::{PortfolioState, Position};
pub use traits::{FeedError, Interval, PriceFeed, Reporter};
