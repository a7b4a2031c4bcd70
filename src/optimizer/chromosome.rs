//! Modelo de cromosoma - los seis genes de estrategia con reparación de invariantes

use serde::{Deserialize, Serialize};

use crate::backtesting::PerformanceMetrics;
use crate::config::{GeneBound, ParameterBounds, StrategyConfig};

/// Comparison slack for repaired gene values
const EPS: f64 = 1e-9;

/// The six tunable strategy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genes {
    pub entry_threshold: f64,
    pub max_entry_price: f64,
    pub stop_loss: f64,
    pub max_spread: f64,
    /// Stored as f64 so the operators treat every gene uniformly;
    /// quantized to whole milliseconds on repair
    pub time_window_ms: f64,
    pub profit_target: f64,
}

impl Genes {
    pub const COUNT: usize = 6;

    /// Genes in canonical order (matches `ParameterBounds::as_array`)
    pub fn as_array(&self) -> [f64; Self::COUNT] {
        [
            self.entry_threshold,
            self.max_entry_price,
            self.stop_loss,
            self.max_spread,
            self.time_window_ms,
            self.profit_target,
        ]
    }

    pub fn from_array(values: [f64; Self::COUNT]) -> Self {
        Self {
            entry_threshold: values[0],
            max_entry_price: values[1],
            stop_loss: values[2],
            max_spread: values[3],
            time_window_ms: values[4],
            profit_target: values[5],
        }
    }

    /// Overlay these genes onto a base configuration's simulation settings
    pub fn apply_to(&self, base: &StrategyConfig) -> StrategyConfig {
        StrategyConfig {
            entry_threshold: self.entry_threshold,
            max_entry_price: self.max_entry_price,
            stop_loss: self.stop_loss,
            max_spread: self.max_spread,
            time_window_ms: self.time_window_ms.round() as i64,
            profit_target: self.profit_target,
            ..base.clone()
        }
    }

    /// Extract the gene values from a full strategy configuration
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            entry_threshold: config.entry_threshold,
            max_entry_price: config.max_entry_price,
            stop_loss: config.stop_loss,
            max_spread: config.max_spread,
            time_window_ms: config.time_window_ms as f64,
            profit_target: config.profit_target,
        }
    }

    /// Deterministic, idempotent repair.
    ///
    /// Quantizes every gene to its canonical precision and bounds, then
    /// enforces the cross-gene ordering invariants in fixed order:
    /// 1. `entry_threshold <= max_entry_price - 0.01`
    /// 2. `stop_loss < entry_threshold - 0.05`
    /// 3. `profit_target >= max_entry_price`
    ///
    /// Each step only moves a later-ordered gene, so a single sequential
    /// pass terminates and a second pass is a no-op.
    pub fn repair(&mut self, bounds: &ParameterBounds) {
        self.entry_threshold = bounds.entry_threshold.quantize(self.entry_threshold);
        self.max_entry_price = bounds.max_entry_price.quantize(self.max_entry_price);
        self.stop_loss = bounds.stop_loss.quantize(self.stop_loss);
        self.max_spread = bounds.max_spread.quantize(self.max_spread);
        self.time_window_ms = bounds.time_window_ms.quantize(self.time_window_ms);
        self.profit_target = bounds.profit_target.quantize(self.profit_target);

        // Invariante 1: ajustar max_entry_price, o en su defecto entry_threshold
        let needed = self.entry_threshold + 0.01;
        if self.max_entry_price + EPS < needed {
            if needed <= bounds.max_entry_price.max + EPS {
                self.max_entry_price = bounds.max_entry_price.quantize(needed);
            } else {
                self.entry_threshold = bounds
                    .entry_threshold
                    .quantize(self.max_entry_price - 0.01);
            }
        }

        // Invariante 2: bajar stop_loss
        if self.stop_loss + EPS >= self.entry_threshold - 0.05 {
            self.stop_loss = bounds.stop_loss.quantize(self.entry_threshold - 0.06);
        }

        // Invariante 3: subir profit_target
        if self.profit_target + EPS < self.max_entry_price {
            self.profit_target = bounds.profit_target.quantize(self.max_entry_price);
        }
    }

    /// Whether the three cross-gene invariants hold
    pub fn satisfies_invariants(&self) -> bool {
        self.entry_threshold <= self.max_entry_price - 0.01 + EPS
            && self.stop_loss < self.entry_threshold - 0.05 + EPS
            && self.profit_target + EPS >= self.max_entry_price
            && self.time_window_ms > 0.0
    }
}

/// One completed fitness evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub fitness: f64,
    pub metrics: PerformanceMetrics,
}

/// Evaluation state of a chromosome.
///
/// "Must evaluate before select" is a type-checked precondition: selection
/// only ever sees the `Evaluated` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Fitness {
    Unevaluated,
    Evaluated(Evaluation),
}

impl Fitness {
    pub fn value(&self) -> Option<f64> {
        match self {
            Fitness::Unevaluated => None,
            Fitness::Evaluated(eval) => Some(eval.fitness),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self, Fitness::Evaluated(_))
    }
}

/// Encoded strategy parameter set under search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chromosome {
    pub genes: Genes,
    /// In-sample (training) evaluation state
    pub fitness: Fitness,
    /// Out-of-sample evaluation, set during the validation phase
    pub validation: Option<Evaluation>,
}

impl Chromosome {
    /// Fresh unevaluated chromosome; the genes are repaired before use
    pub fn new(mut genes: Genes, bounds: &ParameterBounds) -> Self {
        genes.repair(bounds);
        Self {
            genes,
            fitness: Fitness::Unevaluated,
            validation: None,
        }
    }

    /// Uniformly random chromosome within bounds, repaired
    pub fn random<R: rand::Rng>(bounds: &ParameterBounds, rng: &mut R) -> Self {
        let bounds_arr = bounds.as_array();
        let mut values = [0.0f64; Genes::COUNT];
        for (value, bound) in values.iter_mut().zip(bounds_arr.iter()) {
            *value = sample_bound(bound, rng);
        }
        Self::new(Genes::from_array(values), bounds)
    }

    /// In-sample fitness, if evaluated
    pub fn fitness_value(&self) -> Option<f64> {
        self.fitness.value()
    }

    pub fn set_evaluation(&mut self, evaluation: Evaluation) {
        self.fitness = Fitness::Evaluated(evaluation);
    }

    /// Copy of the genes as a new unevaluated chromosome (clone-without-fitness)
    pub fn reset_copy(&self) -> Self {
        Self {
            genes: self.genes.clone(),
            fitness: Fitness::Unevaluated,
            validation: None,
        }
    }
}

/// Uniform sample within one gene's bounds
pub(crate) fn sample_bound<R: rand::Rng>(bound: &GeneBound, rng: &mut R) -> f64 {
    if bound.range() <= 0.0 {
        bound.min
    } else {
        rng.gen_range(bound.min..=bound.max)
    }
}
