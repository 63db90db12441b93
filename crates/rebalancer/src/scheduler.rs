use crate::report::{format_snapshot, CycleSnapshot, PositionLine};
use anyhow::{Context, Result};
use rotator_core::config::AppConfig;
use rotator_core::traits::{FeedError, Interval, PriceFeed, Reporter};
use rotator_data::StatePersistence;
use rotator_signals::scoring;
use rotator_strategy::{AllocationManager, RebalanceReport};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What one cycle did, for callers that drive cycles directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing happened: feed down or allocation not possible yet.
    Skipped,
    Completed {
        traded: bool,
    },
}

/// Drives the fixed-period fetch → score → evaluate → rebalance →
/// persist → report cycle.
///
/// Single sequential actor: one cycle at a time, the feed call and the
/// inter-cycle wait are the only suspension points.
pub struct RebalancingLoop<F, R>
where
    F: PriceFeed,
    R: Reporter,
{
    config: AppConfig,
    interval: Interval,
    feed: F,
    reporter: R,
    persistence: StatePersistence,
    manager: AllocationManager,
    cycle: u64,
}

impl<F, R> RebalancingLoop<F, R>
where
    F: PriceFeed,
    R: Reporter,
{
    /// # Errors
    /// Returns an error if the configured feed interval is unknown.
    pub fn new(
        config: AppConfig,
        feed: F,
        reporter: R,
        persistence: StatePersistence,
        manager: AllocationManager,
    ) -> Result<Self> {
        let interval = Interval::parse(&config.feed.interval)
            .with_context(|| format!("Unknown feed interval: {}", config.feed.interval))?;
        Ok(Self {
            config,
            interval,
            feed,
            reporter,
            persistence,
            manager,
            cycle: 0,
        })
    }

    #[must_use]
    pub fn manager(&self) -> &AllocationManager {
        &self.manager
    }

    /// Runs cycles until the shutdown channel flips to true (or its
    /// sender is dropped). Each cycle is period-anchored: the wait is
    /// the configured period minus processing time, floored at zero.
    ///
    /// # Errors
    /// Currently never fails; systemic per-cycle errors are absorbed
    /// and retried next period.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            period_secs = self.config.scheduler.period_secs,
            universe = self.config.universe.len(),
            "Rebalancing loop started"
        );

        loop {
            let started = Instant::now();
            match self.run_cycle().await {
                Ok(outcome) => info!(cycle = self.cycle, ?outcome, "Cycle finished"),
                Err(e) => error!(cycle = self.cycle, error = %e, "Cycle failed"),
            }

            let period = Duration::from_secs(self.config.scheduler.period_secs);
            let wait = period.saturating_sub(started.elapsed());
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping loop");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Executes one full cycle.
    ///
    /// A wholesale feed failure skips the cycle entirely: no scoring,
    /// no rebalance, no persistence. A failed initial allocation
    /// (configuration error) is surfaced and retried next cycle.
    ///
    /// # Errors
    /// Currently never fails; kept fallible for collaborators that do.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let symbols = self.cycle_symbols();
        let data = match self
            .feed
            .fetch(&symbols, self.config.feed.lookback, self.interval)
            .await
        {
            Ok(data) => data,
            Err(FeedError::Unavailable(reason)) => {
                warn!(%reason, "Feed unavailable, skipping cycle");
                return Ok(CycleOutcome::Skipped);
            }
        };

        // Last observed price per symbol.
        let latest: HashMap<String, f64> = data
            .iter()
            .filter_map(|(s, series)| series.last().map(|&p| (s.clone(), p)))
            .collect();

        // Score in configured universe order so ranking tie-breaks are
        // deterministic. Held symbols outside the universe are priced
        // but never re-ranked.
        let universe_data: Vec<(String, Vec<f64>)> = self
            .config
            .universe
            .iter()
            .filter_map(|s| data.get(s).map(|series| (s.clone(), series.clone())))
            .collect();
        let ranked = scoring::rank(
            &universe_data,
            self.config.strategy.momentum_window,
            self.config.strategy.top_n_volatility,
        );

        if self.manager.is_unallocated() {
            return self.allocate_first(&ranked, &latest).await;
        }

        // Valuation of every held position at current prices; positions
        // the feed skipped this cycle are left out.
        let mut lines = Vec::new();
        let mut total = 0.0;
        for (symbol, position) in &self.manager.state().positions {
            let Some(&current) = latest.get(symbol) else {
                continue;
            };
            if !position.has_valid_entry() {
                continue;
            }
            lines.push(PositionLine {
                symbol: symbol.clone(),
                pct_change: position.pct_change(current),
                current_value: position.value_at(current),
            });
            total += position.value_at(current);
        }

        // Watermarks track the whole portfolio's value; a coverage gap
        // (feed omitted a held symbol) would record a partial total as
        // an all-time extreme, so they only move on full coverage.
        let held = self.manager.state().positions.len();
        let watermarks_moved = if lines.len() == held && !lines.is_empty() {
            self.manager.state_mut().update_watermarks(total)
        } else {
            if lines.len() < held {
                warn!(
                    priced = lines.len(),
                    held, "Partial price coverage, watermarks left untouched"
                );
            }
            false
        };

        let report = self.manager.evaluate_and_rebalance(&latest, &ranked);

        if report.traded() || watermarks_moved {
            self.persist();
        }

        let snapshot = CycleSnapshot {
            positions: lines,
            total_value: total,
            all_time_high: self.manager.state().all_time_high,
            all_time_low: self.manager.state().all_time_low,
            sold: pair_with_valuations(&report.sold, &report),
            bought: pair_with_valuations(&report.bought, &report),
        };
        self.publish(&format_snapshot(&snapshot)).await;

        self.cycle += 1;
        Ok(CycleOutcome::Completed {
            traded: report.traded(),
        })
    }

    /// First allocation: runs inside the first cycle that has usable
    /// data, before any periodic wait.
    async fn allocate_first(
        &mut self,
        ranked: &[String],
        latest: &HashMap<String, f64>,
    ) -> Result<CycleOutcome> {
        if let Err(e) = self.manager.initial_allocate(ranked, latest) {
            error!(error = %e, "Initial allocation failed, retrying next cycle");
            return Ok(CycleOutcome::Skipped);
        }
        self.persist();

        let state = self.manager.state();
        let snapshot = CycleSnapshot {
            positions: state
                .positions
                .iter()
                .map(|(s, p)| PositionLine {
                    symbol: s.clone(),
                    pct_change: 0.0,
                    current_value: p.allocation,
                })
                .collect(),
            total_value: state.positions.values().map(|p| p.allocation).sum(),
            all_time_high: state.all_time_high,
            all_time_low: state.all_time_low,
            sold: Vec::new(),
            bought: state
                .positions
                .iter()
                .map(|(s, p)| (s.clone(), p.allocation))
                .collect(),
        };
        self.publish(&format_snapshot(&snapshot)).await;

        self.cycle += 1;
        Ok(CycleOutcome::Completed { traded: true })
    }

    /// Universe symbols in configured order, then held symbols that
    /// have dropped out of the universe.
    fn cycle_symbols(&self) -> Vec<String> {
        let mut symbols = self.config.universe.clone();
        for held in self.manager.state().positions.keys() {
            if !symbols.contains(held) {
                symbols.push(held.clone());
            }
        }
        symbols
    }

    fn persist(&self) {
        if let Err(e) = self.persistence.save(self.manager.state()) {
            // Prior snapshot is intact; next successful cycle retries.
            error!(error = %e, "Failed to persist state, continuing on in-memory state");
        }
    }

    async fn publish(&self, text: &str) {
        if let Err(e) = self.reporter.publish(text, self.cycle).await {
            warn!(error = %e, "Report publish failed");
        }
    }
}

fn pair_with_valuations(symbols: &[String], report: &RebalanceReport) -> Vec<(String, f64)> {
    symbols
        .iter()
        .map(|s| (s.clone(), report.valuations[s]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rotator_core::config::{
        FeedConfig, PersistenceConfig, ReportConfig, SchedulerConfig, StrategyConfig,
    };
    use rotator_core::portfolio::{PortfolioState, Position};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct FakeFeed {
        data: Arc<Mutex<HashMap<String, Vec<f64>>>>,
        down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PriceFeed for FakeFeed {
        async fn fetch(
            &self,
            symbols: &[String],
            _lookback: usize,
            _interval: Interval,
        ) -> Result<HashMap<String, Vec<f64>>, FeedError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(FeedError::Unavailable("connection refused".to_string()));
            }
            let data = self.data.lock().unwrap();
            Ok(symbols
                .iter()
                .filter_map(|s| data.get(s).map(|series| (s.clone(), series.clone())))
                .collect())
        }
    }

    struct CollectingReporter {
        published: Arc<Mutex<Vec<(u64, String)>>>,
    }

    #[async_trait]
    impl Reporter for CollectingReporter {
        async fn publish(&self, text: &str, cycle: u64) -> Result<()> {
            self.published.lock().unwrap().push((cycle, text.to_string()));
            Ok(())
        }
    }

    struct FailingReporter;

    #[async_trait]
    impl Reporter for FailingReporter {
        async fn publish(&self, _text: &str, _cycle: u64) -> Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    fn config(state_path: &std::path::Path) -> AppConfig {
        AppConfig {
            universe: vec![
                "AAA".to_string(),
                "BBB".to_string(),
                "CCC".to_string(),
                "DDD".to_string(),
            ],
            feed: FeedConfig {
                api_url: "http://localhost".to_string(),
                interval: "1m".to_string(),
                lookback: 30,
            },
            strategy: StrategyConfig {
                momentum_window: 2,
                top_n_volatility: 10,
                num_to_long: 3,
                upper_threshold: 0.10,
                loss_multiple: 5.0,
                capital: 90_000.0,
            },
            scheduler: SchedulerConfig { period_secs: 3600 },
            persistence: PersistenceConfig {
                state_path: state_path.display().to_string(),
            },
            report: ReportConfig {
                dir: "reports".to_string(),
            },
        }
    }

    /// Series ending at `last`, wobbly enough to score.
    fn series(last: f64) -> Vec<f64> {
        vec![last * 0.9, last * 1.1, last]
    }

    fn feed_data(pairs: &[(&str, f64)]) -> HashMap<String, Vec<f64>> {
        pairs
            .iter()
            .map(|(s, last)| (s.to_string(), series(*last)))
            .collect()
    }

    struct Harness {
        _dir: TempDir,
        state_path: std::path::PathBuf,
        data: Arc<Mutex<HashMap<String, Vec<f64>>>>,
        down: Arc<AtomicBool>,
        published: Arc<Mutex<Vec<(u64, String)>>>,
    }

    fn harness(
        pairs: &[(&str, f64)],
        state: PortfolioState,
    ) -> (Harness, RebalancingLoop<FakeFeed, CollectingReporter>) {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("portfolio.json");
        let data = Arc::new(Mutex::new(feed_data(pairs)));
        let down = Arc::new(AtomicBool::new(false));
        let published = Arc::new(Mutex::new(Vec::new()));

        let cfg = config(&state_path);
        let feed = FakeFeed {
            data: data.clone(),
            down: down.clone(),
        };
        let reporter = CollectingReporter {
            published: published.clone(),
        };
        let persistence = StatePersistence::new(state_path.clone());
        let manager = AllocationManager::new(cfg.strategy.clone(), state);
        let looped = RebalancingLoop::new(cfg, feed, reporter, persistence, manager).unwrap();

        (
            Harness {
                _dir: dir,
                state_path,
                data,
                down,
                published,
            },
            looped,
        )
    }

    /// A portfolio already holding AAA/BBB/CCC at 30k each.
    fn allocated_state() -> PortfolioState {
        let mut state = PortfolioState::new();
        state
            .positions
            .insert("AAA".to_string(), Position::new(30_000.0, 100.0));
        state
            .positions
            .insert("BBB".to_string(), Position::new(30_000.0, 50.0));
        state
            .positions
            .insert("CCC".to_string(), Position::new(30_000.0, 200.0));
        state
    }

    #[tokio::test]
    async fn first_cycle_allocates_and_persists() {
        let (h, mut looped) = harness(
            &[("AAA", 100.0), ("BBB", 50.0), ("CCC", 200.0), ("DDD", 10.0)],
            PortfolioState::new(),
        );

        let outcome = looped.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { traded: true });

        let state = looped.manager().state();
        assert_eq!(state.positions.len(), 3);
        let total: f64 = state.positions.values().map(|p| p.allocation).sum();
        assert!((total - 90_000.0).abs() < 1e-6);

        // Persisted and published.
        assert!(h.state_path.exists());
        let published = h.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert!(published[0].1.contains("BUY"));
    }

    #[tokio::test]
    async fn feed_failure_skips_cycle_without_mutation_or_save() {
        let (h, mut looped) = harness(&[], allocated_state());
        h.down.store(true, Ordering::SeqCst);

        let before = looped.manager().state().clone();
        let outcome = looped.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(looped.manager().state(), &before);
        assert!(!h.state_path.exists());
        assert!(h.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn threshold_breach_sells_and_redeploys() {
        // AAA entered at 100, now 115: +15% against the 10% threshold.
        let (h, mut looped) = harness(
            &[("AAA", 115.0), ("BBB", 50.0), ("CCC", 200.0), ("DDD", 10.0)],
            allocated_state(),
        );

        let outcome = looped.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { traded: true });

        let state = looped.manager().state();
        assert!(!state.positions.contains_key("AAA"));
        assert!((state.positions["DDD"].allocation - 34_500.0).abs() < 1e-6);
        assert_eq!(state.positions["DDD"].entry_price, 10.0);

        let published = h.published.lock().unwrap();
        assert!(published[0].1.contains("SELL AAA"));
        assert!(published[0].1.contains("BUY  DDD"));
    }

    #[tokio::test]
    async fn quiet_cycle_still_persists_watermark_movement() {
        let (h, mut looped) = harness(
            &[("AAA", 101.0), ("BBB", 50.0), ("CCC", 202.0)],
            allocated_state(),
        );

        let outcome = looped.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { traded: false });

        // Fresh watermarks always move on the first valuation.
        let saved = StatePersistence::new(h.state_path.clone())
            .load()
            .unwrap()
            .unwrap();
        let expected_total = 30_000.0 * (1.0 + 0.01) + 30_000.0 + 30_000.0 * (1.0 + 0.01);
        assert!((saved.all_time_high - expected_total).abs() < 1e-6);
        assert!((saved.all_time_low - expected_total).abs() < 1e-6);
    }

    #[tokio::test]
    async fn partial_price_coverage_leaves_watermarks_untouched() {
        // The feed omits CCC this cycle; the two-of-three total must
        // not be recorded as an all-time low.
        let mut state = allocated_state();
        state.all_time_high = 92_000.0;
        state.all_time_low = 89_000.0;
        let (h, mut looped) = harness(&[("AAA", 100.0), ("BBB", 50.0)], state);

        let outcome = looped.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { traded: false });

        let after = looped.manager().state();
        assert_eq!(after.all_time_high, 92_000.0);
        assert_eq!(after.all_time_low, 89_000.0);
        // Nothing changed, so nothing was saved either.
        assert!(!h.state_path.exists());
    }

    #[tokio::test]
    async fn reporter_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("portfolio.json");
        let cfg = config(&state_path);
        let feed = FakeFeed {
            data: Arc::new(Mutex::new(feed_data(&[
                ("AAA", 100.0),
                ("BBB", 50.0),
                ("CCC", 200.0),
            ]))),
            down: Arc::new(AtomicBool::new(false)),
        };
        let persistence = StatePersistence::new(state_path.clone());
        let manager = AllocationManager::new(cfg.strategy.clone(), PortfolioState::new());
        let mut looped =
            RebalancingLoop::new(cfg, feed, FailingReporter, persistence, manager).unwrap();

        let outcome = looped.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { traded: true });
        assert!(state_path.exists());
    }

    #[tokio::test]
    async fn empty_universe_retries_instead_of_allocating() {
        let (h, mut looped) = harness(&[], PortfolioState::new());

        let outcome = looped.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped);
        assert!(looped.manager().is_unallocated());
        assert!(!h.state_path.exists());

        // Data shows up later; the retry allocates.
        *h.data.lock().unwrap() =
            feed_data(&[("AAA", 100.0), ("BBB", 50.0), ("CCC", 200.0)]);
        let outcome = looped.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { traded: true });
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop() {
        let (_h, mut looped) = harness(
            &[("AAA", 100.0), ("BBB", 50.0), ("CCC", 200.0)],
            PortfolioState::new(),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { looped.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop on shutdown")
            .unwrap()
            .unwrap();
    }
}
