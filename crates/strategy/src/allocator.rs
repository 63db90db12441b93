use rotator_core::config::StrategyConfig;
use rotator_core::portfolio::{PortfolioState, Position};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from allocation decisions.
#[derive(Error, Debug)]
pub enum AllocationError {
    /// Zero target holdings or an empty candidate list. Fatal to this
    /// allocation attempt only; the caller retries next cycle.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Outcome of one rebalance evaluation, for persistence decisions and
/// reporting. Valuations cover every position evaluated this cycle,
/// sold or not.
#[derive(Debug, Clone, Default)]
pub struct RebalanceReport {
    pub sold: Vec<String>,
    pub bought: Vec<String>,
    pub valuations: BTreeMap<String, f64>,
}

impl RebalanceReport {
    /// True when the evaluation changed portfolio state.
    #[must_use]
    pub fn traded(&self) -> bool {
        !self.sold.is_empty() || !self.bought.is_empty()
    }
}

/// Owns the portfolio state and implements the allocation state
/// machine: `UNALLOCATED -> ALLOCATED` once, then a rebalance
/// self-loop every cycle.
pub struct AllocationManager {
    config: StrategyConfig,
    state: PortfolioState,
}

impl AllocationManager {
    #[must_use]
    pub fn new(config: StrategyConfig, state: PortfolioState) -> Self {
        Self { config, state }
    }

    #[must_use]
    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    #[must_use]
    pub fn state_mut(&mut self) -> &mut PortfolioState {
        &mut self.state
    }

    /// True before the first allocation.
    #[must_use]
    pub fn is_unallocated(&self) -> bool {
        self.state.is_unallocated()
    }

    /// Opens the initial positions: capital split evenly across the
    /// top ranked candidates, entry price = last observed price.
    ///
    /// # Errors
    /// Returns [`AllocationError::Configuration`] when the target
    /// holding count is zero or no ranked candidate is available.
    /// State is untouched on error.
    pub fn initial_allocate(
        &mut self,
        ranked: &[String],
        latest_prices: &HashMap<String, f64>,
    ) -> Result<(), AllocationError> {
        if self.config.num_to_long == 0 {
            return Err(AllocationError::Configuration(
                "num_to_long is zero".to_string(),
            ));
        }

        let picks: Vec<&String> = ranked
            .iter()
            .filter(|s| has_positive_price(latest_prices, s))
            .take(self.config.num_to_long)
            .collect();

        if picks.is_empty() {
            return Err(AllocationError::Configuration(
                "no ranked candidates with a current price".to_string(),
            ));
        }

        let per_position = self.config.capital / picks.len() as f64;
        for symbol in picks {
            let entry = latest_prices[symbol.as_str()];
            self.state
                .positions
                .insert(symbol.clone(), Position::new(per_position, entry));
            info!(
                symbol = %symbol,
                allocation = per_position,
                entry_price = entry,
                "Opened initial position"
            );
        }

        Ok(())
    }

    /// Evaluates every held position against the thresholds and, when
    /// sales trigger, redeploys the freed capital into the best
    /// ranked candidates not already held.
    ///
    /// Positions with no current price this cycle are skipped
    /// entirely (no sale check, no valuation). Freed capital is split
    /// evenly across the replacements; selling with zero available
    /// replacements is cancelled outright so capital is never
    /// orphaned.
    pub fn evaluate_and_rebalance(
        &mut self,
        current_prices: &HashMap<String, f64>,
        ranked: &[String],
    ) -> RebalanceReport {
        let mut report = RebalanceReport::default();
        let mut freed_capital = 0.0;

        for (symbol, position) in &self.state.positions {
            let Some(&current) = current_prices.get(symbol) else {
                warn!(symbol = %symbol, "No current price, skipping evaluation this cycle");
                continue;
            };
            if !position.has_valid_entry() {
                warn!(
                    symbol = %symbol,
                    entry_price = position.entry_price,
                    "Invalid entry price, skipping evaluation this cycle"
                );
                continue;
            }
            let pct = position.pct_change(current);
            let value = position.value_at(current);
            report.valuations.insert(symbol.clone(), value);

            if pct > self.config.upper_threshold
                || pct < -self.config.loss_multiple * self.config.upper_threshold
            {
                report.sold.push(symbol.clone());
                freed_capital += value;
            }
        }

        if report.sold.is_empty() {
            return report;
        }

        // Replacements come from the ranked list in order, skipping
        // anything currently held (the just-sold symbols included, so
        // nothing is sold and re-bought in one evaluation).
        let replacements: Vec<&String> = ranked
            .iter()
            .filter(|s| !self.state.holds(s) && has_positive_price(current_prices, s))
            .take(report.sold.len())
            .collect();

        if replacements.is_empty() {
            warn!(
                sold = report.sold.len(),
                "No replacement candidates available, cancelling sales this cycle"
            );
            report.sold.clear();
            return report;
        }

        if replacements.len() < report.sold.len() {
            warn!(
                sold = report.sold.len(),
                available = replacements.len(),
                "Insufficient candidates, accepting a smaller rebalance"
            );
        }

        for symbol in &report.sold {
            self.state.positions.remove(symbol);
            info!(symbol = %symbol, value = report.valuations[symbol], "Sold position");
        }

        let per_position = freed_capital / replacements.len() as f64;
        for symbol in replacements {
            let entry = current_prices[symbol.as_str()];
            self.state
                .positions
                .insert(symbol.clone(), Position::new(per_position, entry));
            report.valuations.insert(symbol.clone(), per_position);
            report.bought.push(symbol.clone());
            info!(
                symbol = %symbol,
                allocation = per_position,
                entry_price = entry,
                "Bought replacement position"
            );
        }

        report
    }
}

/// A price usable as an entry: present, finite, strictly positive.
/// Zero is in-domain for the feed but can never open a position, or
/// the next cycle's percentage change divides by it.
fn has_positive_price(prices: &HashMap<String, f64>, symbol: &str) -> bool {
    prices.get(symbol).is_some_and(|p| p.is_finite() && *p > 0.0)
}
