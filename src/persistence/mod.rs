//! CSV Persistence Module
//!
//! Loads tick datasets and exports trade logs, generation history and
//! optimization results. The simulator and the optimizer never touch the
//! filesystem; collaborators call into this module around them.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::backtesting::BacktestTrade;
use crate::optimizer::{GenerationStats, GeneticOptimizationResult};
use crate::types::{Asset, Direction, HistoricalMarket, PriceTick, Timeframe};

/// Market row for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRecord {
    pub id: String,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    pub window_start_ts: i64,
    pub window_end_ts: i64,
    pub token_up: String,
    pub token_down: String,
    /// "UP", "DOWN" or empty when unresolved
    #[serde(default)]
    pub resolved: Option<String>,
}

/// Flat per-generation row (CSV cannot nest the gene snapshot)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: usize,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    pub worst_fitness: f64,
    pub diversity: f64,
    pub evaluations: usize,
    pub entry_threshold: f64,
    pub max_entry_price: f64,
    pub stop_loss: f64,
    pub max_spread: f64,
    pub time_window_ms: f64,
    pub profit_target: f64,
}

impl From<&GenerationStats> for GenerationRecord {
    fn from(stats: &GenerationStats) -> Self {
        Self {
            generation: stats.generation,
            best_fitness: stats.best_fitness,
            avg_fitness: stats.avg_fitness,
            worst_fitness: stats.worst_fitness,
            diversity: stats.diversity,
            evaluations: stats.evaluations,
            entry_threshold: stats.best_genes.entry_threshold,
            max_entry_price: stats.best_genes.max_entry_price,
            stop_loss: stats.best_genes.stop_loss,
            max_spread: stats.best_genes.max_spread,
            time_window_ms: stats.best_genes.time_window_ms,
            profit_target: stats.best_genes.profit_target,
        }
    }
}

/// Load a market dataset from a markets CSV plus a ticks CSV.
///
/// Tick rows keep their file order per market side; rows referencing an
/// unknown market or token are skipped with a warning.
pub fn load_markets_csv(markets_path: &Path, ticks_path: &Path) -> Result<Vec<HistoricalMarket>> {
    let mut reader = ReaderBuilder::new()
        .from_path(markets_path)
        .with_context(|| format!("Failed to open markets CSV {}", markets_path.display()))?;

    let mut markets: Vec<HistoricalMarket> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in reader.deserialize() {
        let record: MarketRecord = row.context("Malformed market row")?;
        let market = HistoricalMarket {
            id: record.id.clone(),
            asset: record.asset.as_deref().and_then(Asset::from_str),
            timeframe: record.timeframe.as_deref().and_then(Timeframe::from_str),
            window_start_ts: record.window_start_ts,
            window_end_ts: record.window_end_ts,
            token_up: record.token_up,
            token_down: record.token_down,
            resolved: record.resolved.as_deref().and_then(Direction::from_str),
            ticks_up: Vec::new(),
            ticks_down: Vec::new(),
        };
        index.insert(record.id, markets.len());
        markets.push(market);
    }

    let mut reader = ReaderBuilder::new()
        .from_path(ticks_path)
        .with_context(|| format!("Failed to open ticks CSV {}", ticks_path.display()))?;

    let mut loaded = 0usize;
    for row in reader.deserialize() {
        let tick: PriceTick = row.context("Malformed tick row")?;
        let Some(&market_idx) = index.get(&tick.market_id) else {
            warn!(market_id = %tick.market_id, "Tick references unknown market, skipping");
            continue;
        };
        let market = &mut markets[market_idx];
        if tick.token_id == market.token_up {
            market.ticks_up.push(tick);
        } else if tick.token_id == market.token_down {
            market.ticks_down.push(tick);
        } else {
            warn!(token_id = %tick.token_id, market_id = %market.id, "Tick references unknown token, skipping");
            continue;
        }
        loaded += 1;
    }

    info!(
        markets = markets.len(),
        ticks = loaded,
        "Loaded market dataset"
    );
    Ok(markets)
}

/// Write a backtest trade log as CSV
pub fn write_trades_csv(path: &Path, trades: &[BacktestTrade]) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create trades CSV {}", path.display()))?;

    for trade in trades {
        writer.serialize(trade).context("Failed to write trade row")?;
    }
    writer.flush().context("Failed to flush trades CSV")?;

    info!(path = %path.display(), trades = trades.len(), "Wrote trade log");
    Ok(())
}

/// Write the generation history as CSV
pub fn write_generations_csv(path: &Path, history: &[GenerationStats]) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create generations CSV {}", path.display()))?;

    for stats in history {
        let record = GenerationRecord::from(stats);
        writer
            .serialize(record)
            .context("Failed to write generation row")?;
    }
    writer.flush().context("Failed to flush generations CSV")?;

    info!(path = %path.display(), generations = history.len(), "Wrote generation history");
    Ok(())
}

/// Write a full optimization result as pretty-printed JSON
pub fn write_result_json(path: &Path, result: &GeneticOptimizationResult) -> Result<()> {
    ensure_parent_dir(path)?;
    let json =
        serde_json::to_string_pretty(result).context("Failed to serialize optimization result")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write result JSON {}", path.display()))?;

    info!(path = %path.display(), "Wrote optimization result");
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}
