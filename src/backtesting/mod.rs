//! Backtesting Module
//!
//! Deterministic market-replay simulation for binary prediction markets:
//! - Global chronological tick replay across markets
//! - Single-position strategy execution (entry filters, profit target, stop loss)
//! - Forced closure at market expiry with explicit unresolved handling
//! - Equity / drawdown curve tracking and compounding

pub mod metrics;

pub use metrics::{compute_metrics, PerformanceMetrics};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::StrategyConfig;
use crate::types::{Direction, HistoricalMarket, PriceTick};

/// Why a simulated position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    /// Market window ended with a known outcome
    MarketResolved,
    /// Market window ended with the outcome unknown at evaluation time
    TimeExit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::ProfitTarget => write!(f, "PROFIT_TARGET"),
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::MarketResolved => write!(f, "MARKET_RESOLVED"),
            ExitReason::TimeExit => write!(f, "TIME_EXIT"),
        }
    }
}

/// Open position owned by the engine (at most one at any simulated instant)
#[derive(Debug, Clone)]
pub struct SimulatedPosition {
    pub token_id: String,
    pub market_id: String,
    pub side: Direction,
    pub shares: f64,
    pub entry_price: f64,
    pub entry_ts: i64,
}

/// Completed trade, created once at exit and appended to the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub market_id: String,
    pub token_id: String,
    pub side: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub exit_reason: ExitReason,
    pub pnl: f64,
}

/// Equity curve point, recorded on every exit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: i64,
    /// Balance plus accumulated saved profit
    pub equity: f64,
    /// Drop from the running peak at this point
    pub drawdown: f64,
}

/// Full simulation output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Configuration the run was executed with
    pub config: StrategyConfig,
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<f64>,
    pub final_balance: f64,
    pub saved_profit: f64,
}

impl BacktestResult {
    /// Metrics derived from this run's trade log and equity curve
    pub fn metrics(&self) -> PerformanceMetrics {
        compute_metrics(
            &self.trades,
            &self.equity_curve,
            self.config.starting_balance,
        )
    }
}

/// Tick enriched with its market index and side for the merged stream
struct ReplayTick<'a> {
    market_idx: usize,
    side: Direction,
    tick: &'a PriceTick,
}

/// Deterministic market-replay simulator
///
/// `run` is a pure function of the supplied markets and the configuration:
/// no randomness, no I/O, no shared state.
pub struct SimulationEngine {
    config: StrategyConfig,
}

impl SimulationEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Replay every market chronologically against the configured strategy
    pub fn run(&self, markets: &[HistoricalMarket]) -> BacktestResult {
        let in_range: Vec<&HistoricalMarket> = markets
            .iter()
            .filter(|m| self.config.accepts_market(m))
            .collect();

        let stream = Self::merge_ticks(&in_range);

        let mut state = ReplayState::new(&self.config);

        for rt in &stream {
            // Force-close first when the held market's window has ended,
            // then skip anything belonging to an expired market.
            if let Some(pos_idx) = state.position_market_idx {
                let held = in_range[pos_idx];
                if rt.tick.ts >= held.window_end_ts {
                    state.close_at_end_state(held, pos_idx);
                }
            }
            if state.expired.contains(&rt.market_idx) {
                continue;
            }

            if state.position.is_some() {
                state.process_open_position(rt.tick);
            } else if state.balance >= 1.0 {
                state.try_enter(in_range[rt.market_idx], rt);
            }
        }

        // Stream exhausted: close any remaining position against its
        // market's recorded end state.
        if let Some(pos_idx) = state.position_market_idx {
            let held = in_range[pos_idx];
            state.close_at_end_state(held, pos_idx);
        }

        BacktestResult {
            config: self.config.clone(),
            trades: state.trades,
            equity_curve: state.equity_curve,
            drawdown_curve: state.drawdown_curve,
            final_balance: state.balance,
            saved_profit: state.saved_profit,
        }
    }

    /// Merge per-side tick sequences into one globally time-ordered stream.
    ///
    /// Ties on timestamp are broken by market id, then side (UP before DOWN);
    /// the stable sort keeps each market's emission order beyond that.
    fn merge_ticks<'a>(markets: &[&'a HistoricalMarket]) -> Vec<ReplayTick<'a>> {
        let mut stream: Vec<ReplayTick<'a>> = Vec::with_capacity(
            markets
                .iter()
                .map(|m| m.ticks_up.len() + m.ticks_down.len())
                .sum(),
        );

        for (idx, market) in markets.iter().enumerate() {
            for tick in &market.ticks_up {
                stream.push(ReplayTick { market_idx: idx, side: Direction::Up, tick });
            }
            for tick in &market.ticks_down {
                stream.push(ReplayTick { market_idx: idx, side: Direction::Down, tick });
            }
        }

        stream.sort_by(|a, b| {
            a.tick
                .ts
                .cmp(&b.tick.ts)
                .then_with(|| markets[a.market_idx].id.cmp(&markets[b.market_idx].id))
                .then_with(|| a.side.cmp(&b.side))
        });

        stream
    }
}

/// Mutable replay state for one `run` invocation
struct ReplayState<'a> {
    config: &'a StrategyConfig,
    balance: f64,
    saved_profit: f64,
    peak: f64,
    position: Option<SimulatedPosition>,
    position_market_idx: Option<usize>,
    /// Last bid observed for the held token (entry-time bid until updated)
    last_seen_bid: f64,
    trades: Vec<BacktestTrade>,
    equity_curve: Vec<EquityPoint>,
    drawdown_curve: Vec<f64>,
    /// PnL of the most recent trade per (market, side)
    last_pnl: HashMap<(usize, Direction), f64>,
    expired: HashSet<usize>,
}

impl<'a> ReplayState<'a> {
    fn new(config: &'a StrategyConfig) -> Self {
        Self {
            config,
            balance: config.starting_balance,
            saved_profit: 0.0,
            peak: config.starting_balance,
            position: None,
            position_market_idx: None,
            last_seen_bid: 0.0,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            drawdown_curve: Vec::new(),
            last_pnl: HashMap::new(),
            expired: HashSet::new(),
        }
    }

    /// Exit checks for the held token: profit target before stop loss
    fn process_open_position(&mut self, tick: &PriceTick) {
        let Some(market_idx) = self.position_market_idx else { return };
        let held = self
            .position
            .as_ref()
            .is_some_and(|pos| pos.token_id == tick.token_id);
        if !held {
            return;
        }

        self.last_seen_bid = tick.bid;

        if tick.bid >= self.config.profit_target {
            // Target fills at the target price itself, no slippage
            self.close_position(self.config.profit_target, ExitReason::ProfitTarget, tick.ts, market_idx);
        } else if tick.bid <= self.config.stop_loss {
            let exit_price = (tick.bid * (1.0 - self.config.slippage)).max(0.01);
            self.close_position(exit_price, ExitReason::StopLoss, tick.ts, market_idx);
        }
    }

    /// Entry filters; opens the position when all pass
    fn try_enter(&mut self, market: &HistoricalMarket, rt: &ReplayTick<'_>) {
        let tick = rt.tick;

        let remaining = market.time_remaining_ms(tick.ts);
        if remaining <= 0 || remaining > self.config.time_window_ms {
            return;
        }
        if tick.spread() > self.config.max_spread {
            return;
        }
        if tick.ask < self.config.entry_threshold || tick.ask > self.config.max_entry_price {
            return;
        }
        if tick.ask >= self.config.profit_target {
            return;
        }
        // Don't re-chase a side that already won in this market
        if let Some(&pnl) = self.last_pnl.get(&(rt.market_idx, rt.side)) {
            if pnl > 0.0 {
                return;
            }
        }

        let entry_price = (tick.ask * (1.0 + self.config.slippage)).min(0.99);
        let shares = self.balance / entry_price;

        self.position = Some(SimulatedPosition {
            token_id: tick.token_id.clone(),
            market_id: tick.market_id.clone(),
            side: rt.side,
            shares,
            entry_price,
            entry_ts: tick.ts,
        });
        self.position_market_idx = Some(rt.market_idx);
        self.last_seen_bid = tick.bid;
        self.balance = 0.0;
    }

    /// Forced closure against the market's recorded end state
    fn close_at_end_state(&mut self, market: &HistoricalMarket, market_idx: usize) {
        let Some(pos) = &self.position else { return };

        let (exit_price, reason) = match market.resolved {
            Some(winner) if winner == pos.side => {
                (self.config.profit_target, ExitReason::MarketResolved)
            }
            Some(_) => (0.01, ExitReason::MarketResolved),
            None => {
                // Outcome unknown at evaluation time: settle at the last
                // observed bid rather than assuming a win.
                let fallback = if self.last_seen_bid > 0.0 {
                    self.last_seen_bid
                } else {
                    pos.entry_price
                };
                (
                    fallback.clamp(0.01, self.config.profit_target),
                    ExitReason::TimeExit,
                )
            }
        };

        self.close_position(exit_price, reason, market.window_end_ts, market_idx);
        self.expired.insert(market_idx);
    }

    /// Record the trade, settle the balance, track equity, then compound
    fn close_position(&mut self, exit_price: f64, reason: ExitReason, ts: i64, market_idx: usize) {
        let Some(pos) = self.position.take() else { return };
        self.position_market_idx = None;

        let proceeds = exit_price * pos.shares;
        let pnl = (exit_price - pos.entry_price) * pos.shares;

        self.trades.push(BacktestTrade {
            market_id: pos.market_id,
            token_id: pos.token_id,
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price,
            shares: pos.shares,
            entry_ts: pos.entry_ts,
            exit_ts: ts,
            exit_reason: reason,
            pnl,
        });
        self.last_pnl.insert((market_idx, pos.side), pnl);

        self.balance = proceeds;

        let equity = self.balance + self.saved_profit;
        self.peak = self.peak.max(equity);
        let drawdown = self.peak - equity;
        self.equity_curve.push(EquityPoint { ts, equity, drawdown });
        self.drawdown_curve.push(drawdown);

        if self.config.compound_limit > 0.0 && self.balance > self.config.compound_limit {
            self.saved_profit += self.balance - self.config.base_balance;
            self.balance = self.config.base_balance;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, Timeframe};

    fn make_tick(ts: i64, market_id: &str, token_id: &str, bid: f64, ask: f64) -> PriceTick {
        PriceTick {
            ts,
            market_id: market_id.to_string(),
            token_id: token_id.to_string(),
            bid,
            ask,
            mid: (bid + ask) / 2.0,
        }
    }

    fn make_market(id: &str, start: i64, end: i64, resolved: Option<Direction>) -> HistoricalMarket {
        HistoricalMarket {
            id: id.to_string(),
            asset: Some(Asset::BTC),
            timeframe: Some(Timeframe::Min15),
            window_start_ts: start,
            window_end_ts: end,
            token_up: format!("{id}-up"),
            token_down: format!("{id}-down"),
            resolved,
            ticks_up: Vec::new(),
            ticks_down: Vec::new(),
        }
    }

    fn test_config() -> StrategyConfig {
        StrategyConfig {
            entry_threshold: 0.60,
            max_entry_price: 0.92,
            stop_loss: 0.50,
            max_spread: 0.05,
            time_window_ms: 600_000,
            profit_target: 0.99,
            starting_balance: 100.0,
            slippage: 0.0,
            compound_limit: 0.0,
            base_balance: 100.0,
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn test_empty_market_list() {
        let engine = SimulationEngine::new(test_config());
        let result = engine.run(&[]);

        assert!(result.trades.is_empty());
        assert_eq!(result.final_balance, 100.0);
        assert_eq!(result.saved_profit, 0.0);
        assert!(result.equity_curve.is_empty());
    }

    #[test]
    fn test_profit_target_exit() {
        let mut market = make_market("m1", 0, 900_000, Some(Direction::Up));
        market.ticks_up = vec![
            make_tick(500_000, "m1", "m1-up", 0.88, 0.90),
            make_tick(600_000, "m1", "m1-up", 0.99, 1.00),
        ];

        let engine = SimulationEngine::new(test_config());
        let result = engine.run(&[market]);

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::ProfitTarget);
        assert_eq!(trade.entry_price, 0.90);
        assert_eq!(trade.exit_price, 0.99);
        let expected_pnl = (0.99 - 0.90) * (100.0 / 0.90);
        assert!((trade.pnl - expected_pnl).abs() < 1e-9);
        assert!((result.final_balance - 0.99 * (100.0 / 0.90)).abs() < 1e-9);
    }

    #[test]
    fn test_stop_loss_exit_with_slippage() {
        let mut config = test_config();
        config.stop_loss = 0.72;
        config.slippage = 0.01;

        let mut market = make_market("m1", 0, 900_000, Some(Direction::Up));
        market.ticks_up = vec![
            make_tick(500_000, "m1", "m1-up", 0.88, 0.90),
            make_tick(600_000, "m1", "m1-up", 0.70, 0.74),
        ];

        let engine = SimulationEngine::new(config);
        let result = engine.run(&[market]);

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        let expected_exit = (0.70_f64 * 0.99).max(0.01);
        assert!((trade.exit_price - expected_exit).abs() < 1e-12);
    }

    #[test]
    fn test_expiry_resolution_win_and_loss() {
        // Held side wins: settles at the profit target
        let mut won = make_market("m1", 0, 900_000, Some(Direction::Up));
        won.ticks_up = vec![
            make_tick(500_000, "m1", "m1-up", 0.88, 0.90),
            make_tick(950_000, "m1", "m1-up", 0.97, 0.98),
        ];

        let engine = SimulationEngine::new(test_config());
        let result = engine.run(&[won]);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::MarketResolved);
        assert_eq!(result.trades[0].exit_price, 0.99);

        // Held side loses: settles at 0.01
        let mut lost = make_market("m2", 0, 900_000, Some(Direction::Down));
        lost.ticks_up = vec![
            make_tick(500_000, "m2", "m2-up", 0.88, 0.90),
            make_tick(950_000, "m2", "m2-up", 0.10, 0.12),
        ];

        let result = engine.run(&[lost]);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::MarketResolved);
        assert_eq!(result.trades[0].exit_price, 0.01);
    }

    #[test]
    fn test_unresolved_expiry_uses_last_bid() {
        let mut market = make_market("m1", 0, 900_000, None);
        market.ticks_up = vec![
            make_tick(500_000, "m1", "m1-up", 0.88, 0.90),
            make_tick(700_000, "m1", "m1-up", 0.80, 0.82),
        ];

        let engine = SimulationEngine::new(test_config());
        let result = engine.run(&[market]);

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::TimeExit);
        assert_eq!(trade.exit_price, 0.80);
        assert_eq!(trade.exit_ts, 900_000);
    }

    #[test]
    fn test_entry_filters() {
        let config = test_config();
        let engine = SimulationEngine::new(config);

        // Spread too wide
        let mut market = make_market("m1", 0, 900_000, Some(Direction::Up));
        market.ticks_up = vec![make_tick(500_000, "m1", "m1-up", 0.80, 0.90)];
        assert!(engine.run(&[market]).trades.is_empty());

        // Ask below entry threshold
        let mut market = make_market("m1", 0, 900_000, Some(Direction::Up));
        market.ticks_up = vec![make_tick(500_000, "m1", "m1-up", 0.55, 0.58)];
        assert!(engine.run(&[market]).trades.is_empty());

        // Too early: more time left than the entry window allows
        let mut market = make_market("m1", 0, 3_600_000, Some(Direction::Up));
        market.ticks_up = vec![make_tick(100_000, "m1", "m1-up", 0.88, 0.90)];
        assert!(engine.run(&[market]).trades.is_empty());
    }

    #[test]
    fn test_opposite_side_rule() {
        // First trade on UP wins at expiry; a later market tick on the same
        // side of the same market must not re-enter.
        let mut market = make_market("m1", 0, 900_000, Some(Direction::Up));
        market.ticks_up = vec![
            make_tick(500_000, "m1", "m1-up", 0.88, 0.90),
            make_tick(600_000, "m1", "m1-up", 0.99, 1.00),
            make_tick(700_000, "m1", "m1-up", 0.88, 0.90),
        ];

        let engine = SimulationEngine::new(test_config());
        let result = engine.run(&[market]);

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::ProfitTarget);
    }

    #[test]
    fn test_compounding_banks_excess() {
        let mut config = test_config();
        config.compound_limit = 105.0;
        config.base_balance = 100.0;

        let mut market = make_market("m1", 0, 900_000, Some(Direction::Up));
        market.ticks_up = vec![
            make_tick(500_000, "m1", "m1-up", 0.88, 0.90),
            make_tick(600_000, "m1", "m1-up", 0.99, 1.00),
        ];

        let engine = SimulationEngine::new(config);
        let result = engine.run(&[market]);

        let proceeds = 0.99 * (100.0 / 0.90);
        assert!((result.saved_profit - (proceeds - 100.0)).abs() < 1e-9);
        assert_eq!(result.final_balance, 100.0);
    }

    #[test]
    fn test_compounding_disabled_when_limit_zero() {
        let mut market = make_market("m1", 0, 900_000, Some(Direction::Up));
        market.ticks_up = vec![
            make_tick(500_000, "m1", "m1-up", 0.88, 0.90),
            make_tick(600_000, "m1", "m1-up", 0.99, 1.00),
        ];

        let engine = SimulationEngine::new(test_config());
        let result = engine.run(&[market]);
        assert_eq!(result.saved_profit, 0.0);
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        // Two markets emit ticks at the identical timestamp; the lower market
        // id wins the merge order, so the position opens in m-a.
        let mut a = make_market("m-a", 0, 900_000, Some(Direction::Up));
        a.ticks_up = vec![make_tick(500_000, "m-a", "m-a-up", 0.88, 0.90)];
        let mut b = make_market("m-b", 0, 900_000, Some(Direction::Up));
        b.ticks_up = vec![make_tick(500_000, "m-b", "m-b-up", 0.88, 0.90)];

        let engine = SimulationEngine::new(test_config());
        let result = engine.run(&[b, a]);

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].market_id, "m-a");
    }
}
