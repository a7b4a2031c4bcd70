//! Fitness scoring - colapsa las métricas de un backtest en un escalar

use crate::backtesting::PerformanceMetrics;

/// Hard floors, applied before any bonus terms
const MAX_DRAWDOWN_ALLOWED: f64 = 0.30;
const MIN_TRADES: usize = 5;

/// Score a metrics result into a single comparable number.
///
/// Strategies that lose money, blow past the drawdown budget or barely
/// trade are floored into distinct negative bands so they still rank
/// against each other; everything else earns a weighted composite.
pub fn score(metrics: &PerformanceMetrics) -> f64 {
    if metrics.total_pnl <= 0.0 {
        return -1000.0 + metrics.total_pnl;
    }
    if metrics.max_drawdown_pct > MAX_DRAWDOWN_ALLOWED {
        return -500.0 - (metrics.max_drawdown_pct - MAX_DRAWDOWN_ALLOWED) * 100.0;
    }
    if metrics.total_trades < MIN_TRADES {
        return -100.0 + metrics.total_trades as f64 * 10.0;
    }

    let mut score = metrics.sharpe_ratio * 100.0;
    score += metrics.win_rate * 10.0;
    score += metrics.profit_factor.min(3.0) * 6.67;
    score -= metrics.max_drawdown_pct / MAX_DRAWDOWN_ALLOWED * 15.0;
    score += metrics.return_on_capital.max(0.0).ln_1p() * 10.0;
    score += consistency_bonus(metrics.max_consecutive_losses);
    score += (metrics.total_trades as f64 / 20.0).min(1.0) * 5.0;
    if metrics.expectancy > 0.0 {
        score += (metrics.expectancy * 10.0).min(15.0);
    }

    score
}

/// Bonus for short losing streaks
fn consistency_bonus(max_consecutive_losses: usize) -> f64 {
    match max_consecutive_losses {
        0..=3 => 10.0,
        4..=5 => 5.0,
        6..=7 => 2.0,
        _ => 0.0,
    }
}
