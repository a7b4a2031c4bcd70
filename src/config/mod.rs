//! Configuration management for PolyTune
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::types::HistoricalMarket;

/// Strategy parameters under simulation
///
/// The first six fields are the tunable genes; the remainder are fixed
/// simulation settings echoed into every backtest result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Lower bound on the ask price at which a position may be opened
    pub entry_threshold: f64,
    /// Upper bound on the ask price at which a position may be opened
    pub max_entry_price: f64,
    /// Bid price at or below which a position is cut
    pub stop_loss: f64,
    /// Maximum quoted spread accepted at entry
    pub max_spread: f64,
    /// Only enter with this much (or less) time left in the market window
    pub time_window_ms: i64,
    /// Bid price at or above which profit is taken
    pub profit_target: f64,
    /// Starting tradable balance in USDC
    pub starting_balance: f64,
    /// Fractional execution cost applied against entry/stop-loss fills
    pub slippage: f64,
    /// Balance level above which excess is banked (disabled when <= 0)
    pub compound_limit: f64,
    /// Balance the account resets to when the compound limit trips
    pub base_balance: f64,
    /// Only replay markets starting at or after this instant
    pub start_date: Option<DateTime<Utc>>,
    /// Only replay markets starting before this instant
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            entry_threshold: 0.65,
            max_entry_price: 0.85,
            stop_loss: 0.45,
            max_spread: 0.05,
            time_window_ms: 480_000,
            profit_target: 0.95,
            starting_balance: 100.0,
            slippage: 0.01,
            compound_limit: 0.0,
            base_balance: 100.0,
            start_date: None,
            end_date: None,
        }
    }
}

impl StrategyConfig {
    /// Whether a market's window start falls inside the configured date range
    pub fn accepts_market(&self, market: &HistoricalMarket) -> bool {
        if let Some(start) = self.start_date {
            if market.window_start_ts < start.timestamp_millis() {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if market.window_start_ts >= end.timestamp_millis() {
                return false;
            }
        }
        true
    }
}

/// Inclusive search bounds for one gene
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeneBound {
    pub min: f64,
    pub max: f64,
    /// Decimal places of the gene's canonical precision
    pub precision: u32,
}

impl GeneBound {
    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// Round to canonical precision, then clamp into bounds
    pub fn quantize(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.precision as i32);
        let rounded = (value * factor).round() / factor;
        rounded.clamp(self.min, self.max)
    }
}

/// Per-gene search bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub entry_threshold: GeneBound,
    pub max_entry_price: GeneBound,
    pub stop_loss: GeneBound,
    pub max_spread: GeneBound,
    pub time_window_ms: GeneBound,
    pub profit_target: GeneBound,
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            entry_threshold: GeneBound { min: 0.50, max: 0.90, precision: 2 },
            max_entry_price: GeneBound { min: 0.55, max: 0.97, precision: 2 },
            stop_loss: GeneBound { min: 0.20, max: 0.80, precision: 2 },
            max_spread: GeneBound { min: 0.01, max: 0.10, precision: 2 },
            time_window_ms: GeneBound { min: 60_000.0, max: 3_600_000.0, precision: 0 },
            profit_target: GeneBound { min: 0.60, max: 0.99, precision: 2 },
        }
    }
}

impl ParameterBounds {
    /// Bounds in canonical gene order (matches `Genes::as_array`)
    pub fn as_array(&self) -> [GeneBound; 6] {
        [
            self.entry_threshold,
            self.max_entry_price,
            self.stop_loss,
            self.max_spread,
            self.time_window_ms,
            self.profit_target,
        ]
    }
}

/// Crossover operator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossoverKind {
    /// Blend crossover (BLX-alpha)
    Blx,
    /// Uniform per-gene inheritance
    Uniform,
}

/// Mutation operator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Gaussian,
    Reset,
    Creep,
    /// Gaussian followed by reset
    Combined,
}

/// Genetic algorithm configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub generations: usize,
    /// Probability of applying crossover to a selected parent pair
    pub crossover_rate: f64,
    pub crossover_kind: CrossoverKind,
    /// Range extension factor for BLX crossover
    pub blx_alpha: f64,
    pub mutation_kind: MutationKind,
    /// Per-gene Gaussian mutation probability
    pub mutation_rate: f64,
    /// Gaussian noise scale as a fraction of each gene's range
    pub mutation_sigma: f64,
    /// Per-gene full-range reset probability
    pub reset_rate: f64,
    /// Per-gene creep perturbation probability
    pub creep_rate: f64,
    /// Creep perturbation half-width as a fraction of each gene's range
    pub creep_scale: f64,
    pub tournament_size: usize,
    /// Top chromosomes copied unchanged (fitness carried) into the next generation
    pub elite_count: usize,
    /// Fraction of markets (chronological) used for training
    pub training_split: f64,
    /// Minimum best-fitness improvement that resets the convergence counter
    pub convergence_threshold: f64,
    /// Stagnant generations tolerated before early stop
    pub convergence_generations: usize,
    /// Top-level seed for all optimizer randomness
    pub seed: u64,
    /// Evaluate each generation's population across worker threads
    pub parallel: bool,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 40,
            generations: 30,
            crossover_rate: 0.85,
            crossover_kind: CrossoverKind::Blx,
            blx_alpha: 0.25,
            mutation_kind: MutationKind::Gaussian,
            mutation_rate: 0.20,
            mutation_sigma: 0.15,
            reset_rate: 0.05,
            creep_rate: 0.15,
            creep_scale: 0.05,
            tournament_size: 3,
            elite_count: 2,
            training_split: 0.70,
            convergence_threshold: 0.01,
            convergence_generations: 8,
            seed: 42,
            parallel: true,
        }
    }
}

/// Market pre-filter (which markets the tuner replays)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFilter {
    /// Assets to include (empty = all)
    pub assets: Vec<String>,
    /// Timeframes to include (empty = all)
    pub timeframes: Vec<String>,
}

impl Default for MarketFilter {
    fn default() -> Self {
        Self {
            assets: vec!["BTC".to_string(), "ETH".to_string()],
            timeframes: vec!["15m".to_string(), "1h".to_string()],
        }
    }
}

impl MarketFilter {
    /// Markets without asset/timeframe metadata pass the filter
    pub fn matches(&self, market: &HistoricalMarket) -> bool {
        let asset_ok = match market.asset {
            Some(asset) => {
                self.assets.is_empty() || self.assets.iter().any(|a| a == &asset.to_string())
            }
            None => true,
        };
        let tf_ok = match market.timeframe {
            Some(tf) => {
                self.timeframes.is_empty()
                    || self.timeframes.iter().any(|t| t == &tf.to_string())
            }
            None => true,
        };
        asset_ok && tf_ok
    }
}

/// Main tuner configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TunerConfig {
    pub simulation: StrategyConfig,
    pub markets: MarketFilter,
    pub bounds: ParameterBounds,
    pub genetic: GeneticConfig,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            simulation: StrategyConfig::default(),
            markets: MarketFilter::default(),
            bounds: ParameterBounds::default(),
            genetic: GeneticConfig::default(),
        }
    }
}

impl TunerConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Simulation defaults
            .set_default("simulation.entry_threshold", 0.65)?
            .set_default("simulation.max_entry_price", 0.85)?
            .set_default("simulation.stop_loss", 0.45)?
            .set_default("simulation.max_spread", 0.05)?
            .set_default("simulation.time_window_ms", 480_000)?
            .set_default("simulation.profit_target", 0.95)?
            .set_default("simulation.starting_balance", 100.0)?
            .set_default("simulation.slippage", 0.01)?
            .set_default("simulation.compound_limit", 0.0)?
            .set_default("simulation.base_balance", 100.0)?
            // Market filter defaults
            .set_default("markets.assets", vec!["BTC", "ETH"])?
            .set_default("markets.timeframes", vec!["15m", "1h"])?
            // Gene bounds defaults
            .set_default("bounds.entry_threshold.min", 0.50)?
            .set_default("bounds.entry_threshold.max", 0.90)?
            .set_default("bounds.entry_threshold.precision", 2)?
            .set_default("bounds.max_entry_price.min", 0.55)?
            .set_default("bounds.max_entry_price.max", 0.97)?
            .set_default("bounds.max_entry_price.precision", 2)?
            .set_default("bounds.stop_loss.min", 0.20)?
            .set_default("bounds.stop_loss.max", 0.80)?
            .set_default("bounds.stop_loss.precision", 2)?
            .set_default("bounds.max_spread.min", 0.01)?
            .set_default("bounds.max_spread.max", 0.10)?
            .set_default("bounds.max_spread.precision", 2)?
            .set_default("bounds.time_window_ms.min", 60_000.0)?
            .set_default("bounds.time_window_ms.max", 3_600_000.0)?
            .set_default("bounds.time_window_ms.precision", 0)?
            .set_default("bounds.profit_target.min", 0.60)?
            .set_default("bounds.profit_target.max", 0.99)?
            .set_default("bounds.profit_target.precision", 2)?
            // Genetic defaults
            .set_default("genetic.population_size", 40)?
            .set_default("genetic.generations", 30)?
            .set_default("genetic.crossover_rate", 0.85)?
            .set_default("genetic.crossover_kind", "blx")?
            .set_default("genetic.blx_alpha", 0.25)?
            .set_default("genetic.mutation_kind", "gaussian")?
            .set_default("genetic.mutation_rate", 0.20)?
            .set_default("genetic.mutation_sigma", 0.15)?
            .set_default("genetic.reset_rate", 0.05)?
            .set_default("genetic.creep_rate", 0.15)?
            .set_default("genetic.creep_scale", 0.05)?
            .set_default("genetic.tournament_size", 3)?
            .set_default("genetic.elite_count", 2)?
            .set_default("genetic.training_split", 0.70)?
            .set_default("genetic.convergence_threshold", 0.01)?
            .set_default("genetic.convergence_generations", 8)?
            .set_default("genetic.seed", 42)?
            .set_default("genetic.parallel", true)?
            // Config files (optional)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Environment overrides: POLYTUNE__GENETIC__SEED=7
            .add_source(Environment::with_prefix("POLYTUNE").separator("__"))
            .build()?;

        let cfg: TunerConfig = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        if sim.starting_balance <= 0.0 {
            bail!("simulation.starting_balance must be positive");
        }
        if !(0.0..1.0).contains(&sim.slippage) {
            bail!("simulation.slippage must be in [0, 1)");
        }
        if sim.compound_limit > 0.0 && sim.base_balance <= 0.0 {
            bail!("simulation.base_balance must be positive when compounding is enabled");
        }
        if sim.time_window_ms <= 0 {
            bail!("simulation.time_window_ms must be positive");
        }

        for (name, bound) in [
            ("entry_threshold", &self.bounds.entry_threshold),
            ("max_entry_price", &self.bounds.max_entry_price),
            ("stop_loss", &self.bounds.stop_loss),
            ("max_spread", &self.bounds.max_spread),
            ("time_window_ms", &self.bounds.time_window_ms),
            ("profit_target", &self.bounds.profit_target),
        ] {
            if bound.min > bound.max {
                bail!("bounds.{}: min {} > max {}", name, bound.min, bound.max);
            }
        }
        if self.bounds.time_window_ms.min <= 0.0 {
            bail!("bounds.time_window_ms.min must be positive");
        }

        let ga = &self.genetic;
        if ga.population_size < 2 {
            bail!("genetic.population_size must be at least 2");
        }
        if ga.elite_count >= ga.population_size {
            bail!("genetic.elite_count must be below genetic.population_size");
        }
        if ga.tournament_size == 0 {
            bail!("genetic.tournament_size must be at least 1");
        }
        for (name, rate) in [
            ("crossover_rate", ga.crossover_rate),
            ("mutation_rate", ga.mutation_rate),
            ("reset_rate", ga.reset_rate),
            ("creep_rate", ga.creep_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("genetic.{} must be in [0, 1]", name);
            }
        }
        if ga.blx_alpha < 0.0 {
            bail!("genetic.blx_alpha must be non-negative");
        }
        if !(0.0 < ga.training_split && ga.training_split < 1.0) {
            bail!("genetic.training_split must be in (0, 1)");
        }
        if ga.convergence_threshold < 0.0 {
            bail!("genetic.convergence_threshold must be non-negative");
        }

        Ok(())
    }
}
