//! Strategy Optimizer
//!
//! Evolutionary parameter search over the replay simulator:
//! - Chromosome model with bounds and invariant repair
//! - Genetic operators (tournament, BLX/uniform crossover, mutation, elitism)
//! - Fitness scoring with hard constraints
//! - Generation loop with convergence detection and walk-forward validation
//! - Exhaustive grid search as an alternative search strategy

pub mod chromosome;
pub mod evolution;
pub mod fitness;
pub mod grid;
pub mod operators;
pub mod walk_forward;

pub use chromosome::{Chromosome, Evaluation, Fitness, Genes};
pub use evolution::{
    EvolutionDriver, GenerationStats, GeneticOptimizationResult, Phase, ProgressUpdate,
};
pub use grid::{GridSearchConfig, GridSearchOptimizer, GridSearchResult};
pub use walk_forward::{analyze_robustness, Recommendation, RobustnessReport};

use thiserror::Error;

use crate::backtesting::{compute_metrics, SimulationEngine};
use crate::config::StrategyConfig;
use crate::types::HistoricalMarket;

/// Caller-invariant violations inside the optimizer
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The caller must evaluate a population before selecting from it
    #[error("tournament selection requires at least one evaluated chromosome")]
    NoEvaluatedChromosomes,
    #[error("invalid genetic configuration: {0}")]
    InvalidConfig(String),
}

/// The evaluation primitive shared by every search strategy:
/// replay -> metrics -> fitness, as a pure function of (genes, markets).
pub fn evaluate_genes(
    genes: &Genes,
    base: &StrategyConfig,
    markets: &[HistoricalMarket],
) -> Evaluation {
    let config = genes.apply_to(base);
    let engine = SimulationEngine::new(config);
    let result = engine.run(markets);
    let metrics = compute_metrics(
        &result.trades,
        &result.equity_curve,
        result.config.starting_balance,
    );
    let fitness = fitness::score(&metrics);
    Evaluation { fitness, metrics }
}
