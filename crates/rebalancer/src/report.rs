use std::fmt::Write;

/// One held position's display line.
#[derive(Debug, Clone)]
pub struct PositionLine {
    pub symbol: String,
    pub pct_change: f64,
    pub current_value: f64,
}

/// Everything the per-cycle snapshot shows.
#[derive(Debug, Clone, Default)]
pub struct CycleSnapshot {
    pub positions: Vec<PositionLine>,
    pub total_value: f64,
    pub all_time_high: f64,
    pub all_time_low: f64,
    /// (symbol, valuation realized by the sale)
    pub sold: Vec<(String, f64)>,
    /// (symbol, allocation assigned at buy)
    pub bought: Vec<(String, f64)>,
}

/// Renders the human-readable snapshot handed to the reporter.
#[must_use]
pub fn format_snapshot(snapshot: &CycleSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CURRENT PORTFOLIO");
    let _ = writeln!(out);

    for line in &snapshot.positions {
        let _ = writeln!(
            out,
            "{:<10} change: {:>8.4}%   value: ${:.2}",
            line.symbol,
            line.pct_change * 100.0,
            line.current_value
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Portfolio value : ${:.2}", snapshot.total_value);
    let _ = writeln!(out, "All-time high   : ${:.2}", snapshot.all_time_high);
    if snapshot.all_time_low.is_finite() {
        let _ = writeln!(out, "All-time low    : ${:.2}", snapshot.all_time_low);
    }

    if !snapshot.sold.is_empty() || !snapshot.bought.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Trades this cycle (position lines above show pre-trade values):"
        );
        for (symbol, value) in &snapshot.sold {
            let _ = writeln!(out, "SELL {symbol:<10} value: ${value:.2}");
        }
        for (symbol, allocation) in &snapshot.bought {
            let _ = writeln!(out, "BUY  {symbol:<10} allocation: ${allocation:.2}");
        }
    }

    out
}
