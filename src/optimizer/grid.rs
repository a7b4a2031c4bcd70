//! Exhaustive grid search over per-gene value lists
//!
//! Alternative search strategy built on the same evaluation primitive as the
//! genetic optimizer. Combinations violating the cross-gene invariants are
//! skipped outright instead of repaired, so every result maps back to its
//! literal grid coordinates.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::chromosome::Genes;
use super::evaluate_genes;
use crate::backtesting::PerformanceMetrics;
use crate::config::StrategyConfig;
use crate::types::HistoricalMarket;

/// Candidate values per gene
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSearchConfig {
    pub entry_threshold: Vec<f64>,
    pub max_entry_price: Vec<f64>,
    pub stop_loss: Vec<f64>,
    pub max_spread: Vec<f64>,
    pub time_window_ms: Vec<i64>,
    pub profit_target: Vec<f64>,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            entry_threshold: vec![0.60, 0.70, 0.80],
            max_entry_price: vec![0.85, 0.90, 0.95],
            stop_loss: vec![0.40, 0.50, 0.60],
            max_spread: vec![0.03, 0.05],
            time_window_ms: vec![300_000, 600_000, 900_000],
            profit_target: vec![0.95, 0.97, 0.99],
        }
    }
}

/// Single grid evaluation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSearchResult {
    pub genes: Genes,
    pub fitness: f64,
    pub metrics: PerformanceMetrics,
}

/// Exhaustive optimizer over the cartesian product of the grid
pub struct GridSearchOptimizer {
    base_config: StrategyConfig,
    grid: GridSearchConfig,
}

impl GridSearchOptimizer {
    pub fn new(base_config: StrategyConfig, grid: GridSearchConfig) -> Self {
        Self { base_config, grid }
    }

    /// All grid combinations that satisfy the cross-gene invariants
    pub fn generate_combinations(&self) -> Vec<Genes> {
        let mut combinations = Vec::new();

        for &entry in &self.grid.entry_threshold {
            for &max_entry in &self.grid.max_entry_price {
                // Skip invalid combinations (entry band must leave room)
                if entry > max_entry - 0.01 {
                    continue;
                }
                for &stop in &self.grid.stop_loss {
                    if stop >= entry - 0.05 {
                        continue;
                    }
                    for &spread in &self.grid.max_spread {
                        for &window in &self.grid.time_window_ms {
                            if window <= 0 {
                                continue;
                            }
                            for &target in &self.grid.profit_target {
                                if target < max_entry {
                                    continue;
                                }
                                combinations.push(Genes {
                                    entry_threshold: entry,
                                    max_entry_price: max_entry,
                                    stop_loss: stop,
                                    max_spread: spread,
                                    time_window_ms: window as f64,
                                    profit_target: target,
                                });
                            }
                        }
                    }
                }
            }
        }

        combinations
    }

    /// Evaluate every valid combination, ranked by fitness descending
    pub fn run(&self, markets: &[HistoricalMarket]) -> Vec<GridSearchResult> {
        let combinations = self.generate_combinations();
        info!(
            combinations = combinations.len(),
            markets = markets.len(),
            "Starting grid search"
        );

        let mut results: Vec<GridSearchResult> = combinations
            .into_par_iter()
            .map(|genes| {
                let evaluation = evaluate_genes(&genes, &self.base_config, markets);
                GridSearchResult {
                    genes,
                    fitness: evaluation.fitness,
                    metrics: evaluation.metrics,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.fitness
                .partial_cmp(&a.fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(results = results.len(), "Grid search complete");
        results
    }

    /// Rank and return the top N results
    pub fn rank_results(
        &self,
        results: Vec<GridSearchResult>,
        top_n: usize,
    ) -> Vec<GridSearchResult> {
        results.into_iter().take(top_n).collect()
    }
}
