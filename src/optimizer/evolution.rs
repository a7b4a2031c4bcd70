//! Evolution Driver - orquestación de generaciones y validación out-of-sample
//!
//! Estado: Init -> Evolving -> Validating -> Complete. La evaluación por
//! cromosoma es una función pura de (genes, mercados de training), así que
//! una generación puede evaluarse en paralelo sin perder reproducibilidad;
//! toda la aleatoriedad (inicialización, selección, variación) corre en
//! secuencia sobre el generador sembrado.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::chromosome::{Chromosome, Evaluation, Fitness, Genes};
use super::operators;
use super::{evaluate_genes, OptimizerError};
use crate::backtesting::PerformanceMetrics;
use crate::config::{CrossoverKind, GeneticConfig, ParameterBounds, StrategyConfig};
use crate::types::HistoricalMarket;

/// Candidates re-scored on the validation subset after the loop
const VALIDATION_TOP_N: usize = 10;

/// Driver lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Init,
    Evolving,
    Validating,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "init"),
            Phase::Evolving => write!(f, "evolving"),
            Phase::Validating => write!(f, "validating"),
            Phase::Complete => write!(f, "complete"),
        }
    }
}

/// Synchronous progress report at generation boundaries and phase changes
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub generation: usize,
    pub total_generations: usize,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    pub phase: Phase,
    pub evaluations: usize,
}

pub type ProgressCallback = Box<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Per-generation statistics, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    pub best_fitness: f64,
    pub avg_fitness: f64,
    pub worst_fitness: f64,
    /// Mean pairwise normalized distance over a bounded sample
    pub diversity: f64,
    /// Snapshot of the generation's best genes
    pub best_genes: Genes,
    /// Cumulative evaluation count when the generation was scored
    pub evaluations: usize,
}

/// Final optimization output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticOptimizationResult {
    /// Best validated strategy, ready to run
    pub best_strategy: StrategyConfig,
    pub best_chromosome: Chromosome,
    /// Top candidates by training fitness, with validation results attached
    pub validated_candidates: Vec<Chromosome>,
    pub in_sample_metrics: PerformanceMetrics,
    /// None when the validation subset was empty
    pub out_of_sample_metrics: Option<PerformanceMetrics>,
    pub history: Vec<GenerationStats>,
    pub converged: bool,
    pub total_evaluations: usize,
    /// Wall-clock duration; the only field excluded from run-to-run bit identity
    pub elapsed_ms: u64,
    pub genetic_config: GeneticConfig,
}

/// Generational optimizer over the replay simulator
pub struct EvolutionDriver {
    base_config: StrategyConfig,
    bounds: ParameterBounds,
    genetic: GeneticConfig,
    progress: Option<ProgressCallback>,
    cancel: Option<Arc<AtomicBool>>,
}

impl EvolutionDriver {
    pub fn new(
        base_config: StrategyConfig,
        bounds: ParameterBounds,
        genetic: GeneticConfig,
    ) -> Self {
        Self {
            base_config,
            bounds,
            genetic,
            progress: None,
            cancel: None,
        }
    }

    /// Attach a progress callback (invoked synchronously)
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Attach a cooperative cancellation flag, checked between generations
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run the full optimization over the supplied market dataset
    pub fn run(
        &self,
        markets: &[HistoricalMarket],
    ) -> Result<GeneticOptimizationResult, OptimizerError> {
        self.check_config()?;

        let started = Instant::now();
        let ga = &self.genetic;
        let mut rng = StdRng::seed_from_u64(ga.seed);

        // Split cronológico por inicio de ventana
        let mut sorted: Vec<HistoricalMarket> = markets
            .iter()
            .filter(|m| self.base_config.accepts_market(m))
            .cloned()
            .collect();
        sorted.sort_by(|a, b| {
            a.window_start_ts
                .cmp(&b.window_start_ts)
                .then_with(|| a.id.cmp(&b.id))
        });
        let split = ((sorted.len() as f64) * ga.training_split).floor() as usize;
        let (training, validation) = sorted.split_at(split.min(sorted.len()));

        info!(
            markets = sorted.len(),
            training = training.len(),
            validation = validation.len(),
            population = ga.population_size,
            generations = ga.generations,
            "Starting genetic optimization"
        );

        let mut evaluations = 0usize;
        self.report(ProgressUpdate {
            generation: 0,
            total_generations: ga.generations,
            best_fitness: 0.0,
            avg_fitness: 0.0,
            phase: Phase::Init,
            evaluations,
        });

        // Población inicial
        let mut population: Vec<Chromosome> = (0..ga.population_size)
            .map(|_| Chromosome::random(&self.bounds, &mut rng))
            .collect();
        evaluations += self.evaluate_population(&mut population, training);

        let mut history: Vec<GenerationStats> = Vec::with_capacity(ga.generations);
        let mut best_so_far = f64::NEG_INFINITY;
        let mut stagnant = 0usize;
        let mut converged = false;

        for generation in 0..ga.generations {
            sort_by_fitness_desc(&mut population);

            let fitness_values: Vec<f64> =
                population.iter().filter_map(|c| c.fitness_value()).collect();
            let best = fitness_values.first().copied().unwrap_or(f64::NEG_INFINITY);
            let worst = fitness_values.last().copied().unwrap_or(0.0);
            let avg = if fitness_values.is_empty() {
                0.0
            } else {
                fitness_values.iter().sum::<f64>() / fitness_values.len() as f64
            };
            let diversity = operators::diversity(&population, &self.bounds);

            history.push(GenerationStats {
                generation,
                best_fitness: best,
                avg_fitness: avg,
                worst_fitness: worst,
                diversity,
                best_genes: population[0].genes.clone(),
                evaluations,
            });

            debug!(generation, best, avg, diversity, "Generation scored");
            self.report(ProgressUpdate {
                generation,
                total_generations: ga.generations,
                best_fitness: best,
                avg_fitness: avg,
                phase: Phase::Evolving,
                evaluations,
            });

            // Convergencia: sin mejora suficiente durante N generaciones seguidas
            if best > best_so_far + ga.convergence_threshold {
                best_so_far = best;
                stagnant = 0;
            } else {
                stagnant += 1;
                if stagnant >= ga.convergence_generations {
                    info!(generation, best_fitness = best, "Converged early");
                    converged = true;
                    break;
                }
            }

            // Cancelación cooperativa, solo entre generaciones
            if self.is_cancelled() {
                info!(generation, "Optimization cancelled");
                break;
            }

            if generation + 1 == ga.generations {
                break;
            }

            let mut next = self.next_generation(&population, &mut rng)?;
            evaluations += self.evaluate_population(&mut next, training);
            population = next;
        }

        // Validación out-of-sample de los mejores candidatos de training
        sort_by_fitness_desc(&mut population);
        let last_best = history.last().map(|s| s.best_fitness).unwrap_or(0.0);
        let last_avg = history.last().map(|s| s.avg_fitness).unwrap_or(0.0);
        self.report(ProgressUpdate {
            generation: history.len(),
            total_generations: ga.generations,
            best_fitness: last_best,
            avg_fitness: last_avg,
            phase: Phase::Validating,
            evaluations,
        });

        let top_n = VALIDATION_TOP_N.min(population.len());
        let mut candidates: Vec<Chromosome> = population[..top_n].to_vec();

        if !validation.is_empty() {
            let results: Vec<Evaluation> = if ga.parallel {
                candidates
                    .par_iter()
                    .map(|c| evaluate_genes(&c.genes, &self.base_config, validation))
                    .collect()
            } else {
                candidates
                    .iter()
                    .map(|c| evaluate_genes(&c.genes, &self.base_config, validation))
                    .collect()
            };
            evaluations += results.len();
            for (candidate, evaluation) in candidates.iter_mut().zip(results) {
                candidate.validation = Some(evaluation);
            }
        }

        let best_chromosome = select_best_strategy(&candidates)
            .cloned()
            .ok_or_else(|| OptimizerError::InvalidConfig("population is empty".to_string()))?;

        let in_sample_metrics = match &best_chromosome.fitness {
            Fitness::Evaluated(eval) => eval.metrics.clone(),
            Fitness::Unevaluated => PerformanceMetrics::default(),
        };
        let out_of_sample_metrics = best_chromosome
            .validation
            .as_ref()
            .map(|eval| eval.metrics.clone());
        let best_strategy = best_chromosome.genes.apply_to(&self.base_config);

        self.report(ProgressUpdate {
            generation: history.len(),
            total_generations: ga.generations,
            best_fitness: best_chromosome.fitness_value().unwrap_or(0.0),
            avg_fitness: last_avg,
            phase: Phase::Complete,
            evaluations,
        });

        info!(
            evaluations,
            converged,
            best_fitness = best_chromosome.fitness_value().unwrap_or(f64::NEG_INFINITY),
            "Optimization complete"
        );

        Ok(GeneticOptimizationResult {
            best_strategy,
            best_chromosome,
            validated_candidates: candidates,
            in_sample_metrics,
            out_of_sample_metrics,
            history,
            converged,
            total_evaluations: evaluations,
            elapsed_ms: started.elapsed().as_millis() as u64,
            genetic_config: ga.clone(),
        })
    }

    fn check_config(&self) -> Result<(), OptimizerError> {
        let ga = &self.genetic;
        if ga.population_size < 2 {
            return Err(OptimizerError::InvalidConfig(
                "population_size must be at least 2".to_string(),
            ));
        }
        if ga.elite_count >= ga.population_size {
            return Err(OptimizerError::InvalidConfig(
                "elite_count must be below population_size".to_string(),
            ));
        }
        if ga.tournament_size == 0 {
            return Err(OptimizerError::InvalidConfig(
                "tournament_size must be at least 1".to_string(),
            ));
        }
        if !(0.0 < ga.training_split && ga.training_split < 1.0) {
            return Err(OptimizerError::InvalidConfig(
                "training_split must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }

    /// Evaluate every unevaluated chromosome on the training subset.
    /// Returns the number of evaluations performed; elites keep their
    /// previously computed fitness and are never re-scored.
    fn evaluate_population(
        &self,
        population: &mut [Chromosome],
        markets: &[HistoricalMarket],
    ) -> usize {
        let pending: Vec<usize> = population
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.fitness.is_evaluated())
            .map(|(i, _)| i)
            .collect();

        if pending.is_empty() {
            return 0;
        }

        let results: Vec<Evaluation> = if self.genetic.parallel {
            let view: &[Chromosome] = population;
            pending
                .par_iter()
                .map(|&i| evaluate_genes(&view[i].genes, &self.base_config, markets))
                .collect()
        } else {
            pending
                .iter()
                .map(|&i| evaluate_genes(&population[i].genes, &self.base_config, markets))
                .collect()
        };

        let count = pending.len();
        for (idx, evaluation) in pending.into_iter().zip(results) {
            population[idx].set_evaluation(evaluation);
        }
        count
    }

    /// Elites first, then selection + crossover + mutation until full
    fn next_generation(
        &self,
        population: &[Chromosome],
        rng: &mut StdRng,
    ) -> Result<Vec<Chromosome>, OptimizerError> {
        let ga = &self.genetic;
        let mut next: Vec<Chromosome> = population
            .iter()
            .take(ga.elite_count)
            .cloned()
            .collect();

        while next.len() < ga.population_size {
            let p1 = operators::tournament_select(population, ga.tournament_size, rng)?;
            let p2 = operators::tournament_select(population, ga.tournament_size, rng)?;

            let (mut g1, mut g2) = if rng.gen::<f64>() < ga.crossover_rate {
                match ga.crossover_kind {
                    CrossoverKind::Blx => operators::crossover_blx(
                        &p1.genes,
                        &p2.genes,
                        ga.blx_alpha,
                        &self.bounds,
                        rng,
                    ),
                    CrossoverKind::Uniform => {
                        operators::crossover_uniform(&p1.genes, &p2.genes, &self.bounds, rng)
                    }
                }
            } else {
                // Clonar padres con el fitness limpio
                (p1.genes.clone(), p2.genes.clone())
            };

            operators::mutate(&mut g1, ga, &self.bounds, rng);
            operators::mutate(&mut g2, ga, &self.bounds, rng);

            next.push(Chromosome::new(g1, &self.bounds));
            next.push(Chromosome::new(g2, &self.bounds));
        }

        // Trim del desborde del último par
        next.truncate(ga.population_size);
        Ok(next)
    }

    fn report(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.progress {
            callback(&update);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Highest validation fitness wins; training fitness is the fallback only
/// when validation produced no results (empty validation subset).
fn select_best_strategy(candidates: &[Chromosome]) -> Option<&Chromosome> {
    let validated: Vec<&Chromosome> = candidates
        .iter()
        .filter(|c| c.validation.is_some())
        .collect();

    if validated.is_empty() {
        candidates.iter().max_by(|a, b| {
            let fa = a.fitness_value().unwrap_or(f64::NEG_INFINITY);
            let fb = b.fitness_value().unwrap_or(f64::NEG_INFINITY);
            fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
        })
    } else {
        validated.into_iter().max_by(|a, b| {
            let fa = a.validation.as_ref().map(|e| e.fitness).unwrap_or(f64::NEG_INFINITY);
            let fb = b.validation.as_ref().map(|e| e.fitness).unwrap_or(f64::NEG_INFINITY);
            fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Stable descending sort; unevaluated chromosomes sink to the end
fn sort_by_fitness_desc(population: &mut [Chromosome]) {
    population.sort_by(|a, b| {
        let fa = a.fitness_value().unwrap_or(f64::NEG_INFINITY);
        let fb = b.fitness_value().unwrap_or(f64::NEG_INFINITY);
        fb.partial_cmp(&fa).unwrap_or(std::cmp::Ordering::Equal)
    });
}
