//! Performance metrics derived from a trade log and equity curve

use serde::{Deserialize, Serialize};

use super::{BacktestTrade, EquityPoint};

/// Risk/return statistics for one backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Total number of trades
    pub total_trades: usize,
    /// Number of winning trades (pnl > 0)
    pub wins: usize,
    /// Number of losing trades
    pub losses: usize,
    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,
    /// Net PnL across all trades
    pub total_pnl: f64,
    /// Largest peak-to-trough equity drop, absolute
    pub max_drawdown: f64,
    /// Largest peak-to-trough equity drop, fraction of the peak
    pub max_drawdown_pct: f64,
    /// Per-trade Sharpe ratio scaled by sqrt(n)
    pub sharpe_ratio: f64,
    /// Gross profit / gross loss
    pub profit_factor: f64,
    /// Average win amount
    pub avg_win: f64,
    /// Average loss amount (positive)
    pub avg_loss: f64,
    /// winRate * avgWin - (1 - winRate) * avgLoss
    pub expectancy: f64,
    /// Longest winning streak
    pub max_consecutive_wins: usize,
    /// Longest losing streak
    pub max_consecutive_losses: usize,
    /// Net PnL relative to starting balance
    pub return_on_capital: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            sharpe_ratio: 0.0,
            profit_factor: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            expectancy: 0.0,
            max_consecutive_wins: 0,
            max_consecutive_losses: 0,
            return_on_capital: 0.0,
        }
    }
}

/// Compute metrics from a trade log and equity curve.
///
/// Pure function; every division is guarded against a zero denominator.
pub fn compute_metrics(
    trades: &[BacktestTrade],
    equity_curve: &[EquityPoint],
    starting_balance: f64,
) -> PerformanceMetrics {
    if trades.is_empty() {
        return PerformanceMetrics::default();
    }

    let total_trades = trades.len();
    let wins: Vec<&BacktestTrade> = trades.iter().filter(|t| t.pnl > 0.0).collect();
    let losses: Vec<&BacktestTrade> = trades.iter().filter(|t| t.pnl <= 0.0).collect();

    let win_count = wins.len();
    let loss_count = losses.len();
    let win_rate = win_count as f64 / total_trades as f64;

    let gross_profit: f64 = wins.iter().map(|t| t.pnl).sum();
    let gross_loss: f64 = losses.iter().map(|t| t.pnl.abs()).sum();
    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();

    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if win_count > 0 {
        gross_profit / win_count as f64
    } else {
        0.0
    };
    let avg_loss = if loss_count > 0 {
        gross_loss / loss_count as f64
    } else {
        0.0
    };

    let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss;

    // Max drawdown: running peak seeded at the starting balance
    let mut peak = starting_balance;
    let mut max_drawdown: f64 = 0.0;
    let mut max_drawdown_pct: f64 = 0.0;
    for point in equity_curve {
        peak = peak.max(point.equity);
        let drawdown = peak - point.equity;
        max_drawdown = max_drawdown.max(drawdown);
        if peak > 0.0 {
            max_drawdown_pct = max_drawdown_pct.max(drawdown / peak);
        }
    }

    // Per-trade Sharpe, returns normalized by starting balance
    let sharpe_ratio = if starting_balance > 0.0 {
        let returns: Vec<f64> = trades.iter().map(|t| t.pnl / starting_balance).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / returns.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev > 0.0 {
            mean / std_dev * (returns.len() as f64).sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    // Streaks: single forward scan, each trade resets the opposite counter
    let mut cur_wins = 0usize;
    let mut cur_losses = 0usize;
    let mut max_consecutive_wins = 0usize;
    let mut max_consecutive_losses = 0usize;
    for trade in trades {
        if trade.pnl > 0.0 {
            cur_wins += 1;
            cur_losses = 0;
            max_consecutive_wins = max_consecutive_wins.max(cur_wins);
        } else {
            cur_losses += 1;
            cur_wins = 0;
            max_consecutive_losses = max_consecutive_losses.max(cur_losses);
        }
    }

    let return_on_capital = if starting_balance > 0.0 {
        total_pnl / starting_balance
    } else {
        0.0
    };

    PerformanceMetrics {
        total_trades,
        wins: win_count,
        losses: loss_count,
        win_rate,
        total_pnl,
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio,
        profit_factor,
        avg_win,
        avg_loss,
        expectancy,
        max_consecutive_wins,
        max_consecutive_losses,
        return_on_capital,
    }
}
