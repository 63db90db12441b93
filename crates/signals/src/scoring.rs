use std::cmp::Ordering;
use tracing::debug;

/// Per-instrument scores for one cycle. Derived, never persisted.
#[derive(Debug, Clone)]
pub struct ScoreRecord {
    pub symbol: String,
    pub volatility: f64,
    pub momentum: f64,
}

/// Normalized volatility: population standard deviation divided by the
/// mean of the series.
///
/// Returns 0.0 for an empty series or a zero mean. Both are "no
/// signal", not errors.
#[must_use]
pub fn volatility(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = series.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// Momentum: fractional change of the last price against the price
/// `window` bars back.
///
/// When the series is shorter than `window + 1` bars the window
/// collapses to the whole series, so the reference becomes the oldest
/// available price. Returns 0.0 for an empty series or a zero
/// reference price.
#[must_use]
pub fn momentum(series: &[f64], window: usize) -> f64 {
    let Some(&last) = series.last() else {
        return 0.0;
    };
    let reference = if series.len() > window {
        series[series.len() - 1 - window]
    } else {
        series[0]
    };
    if reference == 0.0 {
        return 0.0;
    }
    (last - reference) / reference
}

/// Ranks the universe with the two-stage filter: volatility selects
/// the candidate pool, momentum orders it. The two signals are applied
/// sequentially, never blended into one metric.
///
/// Instruments whose volatility or momentum comes out NaN (degenerate
/// series) are dropped for this cycle. Input order is the tie-break:
/// both sorts are stable, so equal scores keep the caller's (universe)
/// order.
#[must_use]
pub fn rank(
    universe: &[(String, Vec<f64>)],
    mom_window: usize,
    top_n_volatility: usize,
) -> Vec<String> {
    let mut scores: Vec<ScoreRecord> = Vec::with_capacity(universe.len());
    for (symbol, series) in universe {
        let vol = volatility(series);
        let mom = momentum(series, mom_window);
        if vol.is_nan() || mom.is_nan() {
            debug!(symbol = %symbol, "Degenerate signal, excluded from ranking this cycle");
            continue;
        }
        scores.push(ScoreRecord {
            symbol: symbol.clone(),
            volatility: vol,
            momentum: mom,
        });
    }

    // Stage one: top N by volatility, descending.
    scores.sort_by(|a, b| {
        b.volatility
            .partial_cmp(&a.volatility)
            .unwrap_or(Ordering::Equal)
    });
    scores.truncate(top_n_volatility);

    // Stage two: order the pool by momentum, descending.
    scores.sort_by(|a, b| b.momentum.partial_cmp(&a.momentum).unwrap_or(Ordering::Equal));

    scores.into_iter().map(|s| s.symbol).collect()
}
