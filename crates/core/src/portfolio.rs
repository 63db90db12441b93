use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One open holding: the dollar value assigned to it and the price it
/// was opened at. The entry price is fixed at open and never adjusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub allocation: f64,
    pub entry_price: f64,
}

impl Position {
    #[must_use]
    pub fn new(allocation: f64, entry_price: f64) -> Self {
        Self {
            allocation,
            entry_price,
        }
    }

    /// True when the entry price is a usable divisor. Positions are
    /// only opened at finite positive prices, but a snapshot written
    /// outside this workspace can carry anything.
    #[must_use]
    pub fn has_valid_entry(&self) -> bool {
        self.entry_price.is_finite() && self.entry_price > 0.0
    }

    /// Fractional price change of `current` against the entry price.
    #[must_use]
    pub fn pct_change(&self, current: f64) -> f64 {
        (current - self.entry_price) / self.entry_price
    }

    /// Allocation adjusted by the price change since entry.
    #[must_use]
    pub fn value_at(&self, current: f64) -> f64 {
        self.allocation * (1.0 + self.pct_change(current))
    }
}

/// The unit of persistence: open positions keyed by symbol plus the
/// historical extremes of total portfolio value.
///
/// `BTreeMap` keeps iteration order deterministic, which makes
/// valuation, replacement selection, and reports reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub positions: BTreeMap<String, Position>,
    pub all_time_high: f64,
    pub all_time_low: f64,
}

impl PortfolioState {
    /// An empty, never-allocated portfolio.
    #[must_use]
    pub fn new() -> Self {
        Self {
            positions: BTreeMap::new(),
            all_time_high: 0.0,
            all_time_low: f64::INFINITY,
        }
    }

    /// True before the first allocation has happened.
    #[must_use]
    pub fn is_unallocated(&self) -> bool {
        self.positions.is_empty()
    }

    #[must_use]
    pub fn holds(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    /// Updates the watermarks against a new total portfolio value.
    ///
    /// Both extremes are monotone: the high only moves up on a strict
    /// exceedance, the low only moves down on a strict undercut.
    /// Returns true if either moved.
    pub fn update_watermarks(&mut self, total_value: f64) -> bool {
        let mut changed = false;
        if total_value > self.all_time_high {
            self.all_time_high = total_value;
            changed = true;
        }
        if total_value < self.all_time_low {
            self.all_time_low = total_value;
            changed = true;
        }
        changed
    }
}

impl Default for PortfolioState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_value_tracks_price_change() {
        let pos = Position::new(30_000.0, 100.0);
        assert!((pos.pct_change(115.0) - 0.15).abs() < 1e-12);
        assert!((pos.value_at(115.0) - 34_500.0).abs() < 1e-6);
    }

    #[test]
    fn entry_price_must_be_finite_and_positive() {
        assert!(Position::new(30_000.0, 100.0).has_valid_entry());
        assert!(!Position::new(30_000.0, 0.0).has_valid_entry());
        assert!(!Position::new(30_000.0, -1.0).has_valid_entry());
        assert!(!Position::new(30_000.0, f64::NAN).has_valid_entry());
    }

    #[test]
    fn new_state_is_unallocated() {
        let state = PortfolioState::new();
        assert!(state.is_unallocated());
        assert_eq!(state.all_time_high, 0.0);
        assert_eq!(state.all_time_low, f64::INFINITY);
    }

    #[test]
    fn watermarks_are_monotone() {
        let mut state = PortfolioState::new();
        assert!(state.update_watermarks(100.0));
        assert_eq!(state.all_time_high, 100.0);
        assert_eq!(state.all_time_low, 100.0);

        // Inside the band: no movement.
        assert!(!state.update_watermarks(100.0));

        assert!(state.update_watermarks(120.0));
        assert_eq!(state.all_time_high, 120.0);
        assert_eq!(state.all_time_low, 100.0);

        assert!(state.update_watermarks(90.0));
        assert_eq!(state.all_time_high, 120.0);
        assert_eq!(state.all_time_low, 90.0);
    }
}
