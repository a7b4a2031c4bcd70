//! Operadores genéticos - selección, crossover, mutación y diversidad

use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::chromosome::{sample_bound, Chromosome, Genes};
use super::OptimizerError;
use crate::config::{GeneticConfig, MutationKind, ParameterBounds};

/// Individuals considered when estimating population diversity
const DIVERSITY_SAMPLE: usize = 20;

/// Tournament selection over evaluated chromosomes only.
///
/// Draws `k` individuals uniformly at random with replacement and returns
/// the fittest. Selecting from a population with zero evaluated chromosomes
/// is a configuration error, not a silent default.
pub fn tournament_select<'a, R: Rng>(
    population: &'a [Chromosome],
    k: usize,
    rng: &mut R,
) -> Result<&'a Chromosome, OptimizerError> {
    let evaluated: Vec<&Chromosome> = population
        .iter()
        .filter(|c| c.fitness.is_evaluated())
        .collect();

    if evaluated.is_empty() {
        return Err(OptimizerError::NoEvaluatedChromosomes);
    }

    let mut best = evaluated[rng.gen_range(0..evaluated.len())];
    for _ in 1..k.max(1) {
        let candidate = evaluated[rng.gen_range(0..evaluated.len())];
        if candidate.fitness_value() > best.fitness_value() {
            best = candidate;
        }
    }

    Ok(best)
}

/// Blend crossover (BLX-alpha).
///
/// Per gene, the parents' value range is extended by `alpha` on each side
/// and both children sample independently and uniformly from it.
pub fn crossover_blx<R: Rng>(
    a: &Genes,
    b: &Genes,
    alpha: f64,
    bounds: &ParameterBounds,
    rng: &mut R,
) -> (Genes, Genes) {
    let pa = a.as_array();
    let pb = b.as_array();
    let mut c1 = [0.0f64; Genes::COUNT];
    let mut c2 = [0.0f64; Genes::COUNT];

    for i in 0..Genes::COUNT {
        let lo = pa[i].min(pb[i]);
        let hi = pa[i].max(pb[i]);
        let span = hi - lo;
        let lower = lo - alpha * span;
        let upper = hi + alpha * span;
        if upper > lower {
            c1[i] = rng.gen_range(lower..=upper);
            c2[i] = rng.gen_range(lower..=upper);
        } else {
            c1[i] = lo;
            c2[i] = lo;
        }
    }

    let mut g1 = Genes::from_array(c1);
    let mut g2 = Genes::from_array(c2);
    g1.repair(bounds);
    g2.repair(bounds);
    (g1, g2)
}

/// Uniform crossover: each child inherits every gene from one parent with
/// equal probability, independently of the other child.
pub fn crossover_uniform<R: Rng>(
    a: &Genes,
    b: &Genes,
    bounds: &ParameterBounds,
    rng: &mut R,
) -> (Genes, Genes) {
    let pa = a.as_array();
    let pb = b.as_array();
    let mut c1 = [0.0f64; Genes::COUNT];
    let mut c2 = [0.0f64; Genes::COUNT];

    for i in 0..Genes::COUNT {
        c1[i] = if rng.gen::<bool>() { pa[i] } else { pb[i] };
        c2[i] = if rng.gen::<bool>() { pa[i] } else { pb[i] };
    }

    let mut g1 = Genes::from_array(c1);
    let mut g2 = Genes::from_array(c2);
    g1.repair(bounds);
    g2.repair(bounds);
    (g1, g2)
}

/// Apply the configured mutation operator; the output is always repaired.
pub fn mutate<R: Rng>(
    genes: &mut Genes,
    config: &GeneticConfig,
    bounds: &ParameterBounds,
    rng: &mut R,
) {
    match config.mutation_kind {
        MutationKind::Gaussian => {
            gaussian_step(genes, config.mutation_rate, config.mutation_sigma, bounds, rng);
        }
        MutationKind::Reset => {
            reset_step(genes, config.reset_rate, bounds, rng);
        }
        MutationKind::Creep => {
            creep_step(genes, config.creep_rate, config.creep_scale, bounds, rng);
        }
        MutationKind::Combined => {
            // Gaussian primero, luego reset
            gaussian_step(genes, config.mutation_rate, config.mutation_sigma, bounds, rng);
            reset_step(genes, config.reset_rate, bounds, rng);
        }
    }
    genes.repair(bounds);
}

/// Per gene, with probability `rate`, add noise from N(0, sigma * range)
fn gaussian_step<R: Rng>(
    genes: &mut Genes,
    rate: f64,
    sigma: f64,
    bounds: &ParameterBounds,
    rng: &mut R,
) {
    let bounds_arr = bounds.as_array();
    let mut values = genes.as_array();

    for (value, bound) in values.iter_mut().zip(bounds_arr.iter()) {
        if rng.gen::<f64>() >= rate {
            continue;
        }
        let sd = sigma * bound.range();
        if let Ok(normal) = Normal::new(0.0, sd) {
            *value += normal.sample(rng);
        }
    }

    *genes = Genes::from_array(values);
}

/// Per gene, with a small probability, resample uniformly across full bounds
fn reset_step<R: Rng>(genes: &mut Genes, rate: f64, bounds: &ParameterBounds, rng: &mut R) {
    let bounds_arr = bounds.as_array();
    let mut values = genes.as_array();

    for (value, bound) in values.iter_mut().zip(bounds_arr.iter()) {
        if rng.gen::<f64>() < rate {
            *value = sample_bound(bound, rng);
        }
    }

    *genes = Genes::from_array(values);
}

/// Per gene, with probability `rate`, apply a small uniform perturbation
fn creep_step<R: Rng>(
    genes: &mut Genes,
    rate: f64,
    scale: f64,
    bounds: &ParameterBounds,
    rng: &mut R,
) {
    let bounds_arr = bounds.as_array();
    let mut values = genes.as_array();

    for (value, bound) in values.iter_mut().zip(bounds_arr.iter()) {
        if rng.gen::<f64>() < rate {
            *value += rng.gen_range(-1.0..=1.0) * scale * bound.range();
        }
    }

    *genes = Genes::from_array(values);
}

/// Mean pairwise normalized Euclidean distance over a bounded,
/// deterministic sample of the population (first `DIVERSITY_SAMPLE`).
pub fn diversity(population: &[Chromosome], bounds: &ParameterBounds) -> f64 {
    let sample: Vec<&Chromosome> = population.iter().take(DIVERSITY_SAMPLE).collect();
    if sample.len() < 2 {
        return 0.0;
    }

    let bounds_arr = bounds.as_array();
    let mut total = 0.0;
    let mut pairs = 0usize;

    for i in 0..sample.len() {
        let a = sample[i].genes.as_array();
        for j in (i + 1)..sample.len() {
            let b = sample[j].genes.as_array();
            let mut sum_sq = 0.0;
            for g in 0..Genes::COUNT {
                let range = bounds_arr[g].range();
                if range > 0.0 {
                    let d = (a[g] - b[g]) / range;
                    sum_sq += d * d;
                }
            }
            total += sum_sq.sqrt();
            pairs += 1;
        }
    }

    total / pairs as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtesting::PerformanceMetrics;
    use crate::config::StrategyConfig;
    use crate::optimizer::chromosome::Evaluation;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bounds() -> ParameterBounds {
        ParameterBounds::default()
    }

    fn evaluated_chromosome(fitness: f64, seed: u64) -> Chromosome {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut c = Chromosome::random(&bounds(), &mut rng);
        c.set_evaluation(Evaluation {
            fitness,
            metrics: PerformanceMetrics::default(),
        });
        c
    }

    #[test]
    fn test_tournament_requires_evaluated() {
        let mut rng = StdRng::seed_from_u64(1);
        let unevaluated = vec![Chromosome::random(&bounds(), &mut rng)];
        let result = tournament_select(&unevaluated, 3, &mut rng);
        assert!(matches!(result, Err(OptimizerError::NoEvaluatedChromosomes)));
    }

    #[test]
    fn test_tournament_prefers_fitter() {
        let mut rng = StdRng::seed_from_u64(2);
        let population = vec![
            evaluated_chromosome(-50.0, 10),
            evaluated_chromosome(120.0, 11),
        ];

        // A tournament as large as the population almost surely samples the
        // fitter individual at least once; over many draws it must win most.
        let mut best_wins = 0;
        for _ in 0..50 {
            let winner = tournament_select(&population, 8, &mut rng).unwrap();
            if winner.fitness_value() == Some(120.0) {
                best_wins += 1;
            }
        }
        assert!(best_wins > 45);
    }

    #[test]
    fn test_blx_children_are_repaired() {
        let bounds = bounds();
        let mut rng = StdRng::seed_from_u64(3);
        let a = Chromosome::random(&bounds, &mut rng);
        let b = Chromosome::random(&bounds, &mut rng);

        for _ in 0..100 {
            let (c1, c2) = crossover_blx(&a.genes, &b.genes, 0.5, &bounds, &mut rng);
            assert!(c1.satisfies_invariants());
            assert!(c2.satisfies_invariants());
        }
    }

    #[test]
    fn test_uniform_children_inherit_parent_genes() {
        let bounds = bounds();
        let mut rng = StdRng::seed_from_u64(4);
        let base = StrategyConfig::default();
        let a = Genes::from_config(&base);
        let mut b = a.clone();
        b.entry_threshold = 0.55;
        b.repair(&bounds);

        let (c1, _) = crossover_uniform(&a, &b, &bounds, &mut rng);
        // Every pre-repair gene comes from one of the parents
        assert!(
            c1.max_spread == a.max_spread || c1.max_spread == b.max_spread,
        );
    }

    #[test]
    fn test_mutation_outputs_are_repaired() {
        let bounds = bounds();
        let mut rng = StdRng::seed_from_u64(5);
        let config = GeneticConfig {
            mutation_rate: 1.0,
            reset_rate: 1.0,
            creep_rate: 1.0,
            ..GeneticConfig::default()
        };

        for kind in [
            MutationKind::Gaussian,
            MutationKind::Reset,
            MutationKind::Creep,
            MutationKind::Combined,
        ] {
            let mut cfg = config.clone();
            cfg.mutation_kind = kind;
            for _ in 0..50 {
                let mut genes = Chromosome::random(&bounds, &mut rng).genes;
                mutate(&mut genes, &cfg, &bounds, &mut rng);
                assert!(genes.satisfies_invariants(), "kind {:?}", kind);
            }
        }
    }

    #[test]
    fn test_diversity_zero_for_identical_population() {
        let bounds = bounds();
        let base = Chromosome::new(Genes::from_config(&StrategyConfig::default()), &bounds);
        let population = vec![base.clone(), base.clone(), base];
        assert_eq!(diversity(&population, &bounds), 0.0);
    }

    #[test]
    fn test_diversity_positive_for_spread_population() {
        let bounds = bounds();
        let mut rng = StdRng::seed_from_u64(6);
        let population: Vec<Chromosome> = (0..10)
            .map(|_| Chromosome::random(&bounds, &mut rng))
            .collect();
        assert!(diversity(&population, &bounds) > 0.0);
    }
}
