//! Tests para el optimizador - pipeline completo sobre datasets sintéticos

#[cfg(test)]
mod tests {
    use polytune::backtesting::{ExitReason, SimulationEngine};
    use polytune::config::{GeneticConfig, ParameterBounds, StrategyConfig};
    use polytune::optimizer::{
        analyze_robustness, EvolutionDriver, GridSearchConfig, GridSearchOptimizer,
    };
    use polytune::types::{Asset, Direction, HistoricalMarket, PriceTick, Timeframe};

    const WINDOW_MS: i64 = 900_000;

    /// Opt-in log output: RUST_LOG=polytune=debug cargo test
    fn init_tracing() {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init()
            .ok();
    }

    fn tick(ts: i64, market_id: &str, token_id: &str, bid: f64, ask: f64) -> PriceTick {
        PriceTick {
            ts,
            market_id: market_id.to_string(),
            token_id: token_id.to_string(),
            bid,
            ask,
            mid: (bid + ask) / 2.0,
        }
    }

    /// Synthetic dataset: one 15m market per window slot. Two of every
    /// three markets resolve UP, so holding UP from a late entry wins often
    /// enough to produce a profitable, non-degenerate fitness landscape.
    fn synthetic_markets(count: usize) -> Vec<HistoricalMarket> {
        (0..count)
            .map(|i| {
                let start = i as i64 * 1_000_000;
                let end = start + WINDOW_MS;
                let id = format!("btc-updown-15m-{i:03}");
                let token_up = format!("{id}-up");
                let token_down = format!("{id}-down");
                let resolved = if i % 3 == 0 {
                    Direction::Down
                } else {
                    Direction::Up
                };

                let ticks_up = vec![
                    tick(start + 200_000, &id, &token_up, 0.55, 0.58),
                    tick(start + 500_000, &id, &token_up, 0.66, 0.68),
                    tick(start + 700_000, &id, &token_up, 0.74, 0.76),
                ];
                let ticks_down = vec![
                    tick(start + 210_000, &id, &token_down, 0.41, 0.44),
                    tick(start + 510_000, &id, &token_down, 0.31, 0.33),
                ];

                HistoricalMarket {
                    id,
                    asset: Some(Asset::BTC),
                    timeframe: Some(Timeframe::Min15),
                    window_start_ts: start,
                    window_end_ts: end,
                    token_up,
                    token_down,
                    resolved: Some(resolved),
                    ticks_up,
                    ticks_down,
                }
            })
            .collect()
    }

    fn base_config() -> StrategyConfig {
        StrategyConfig {
            entry_threshold: 0.60,
            max_entry_price: 0.85,
            stop_loss: 0.45,
            max_spread: 0.05,
            time_window_ms: 600_000,
            profit_target: 0.95,
            starting_balance: 100.0,
            slippage: 0.0,
            compound_limit: 0.0,
            base_balance: 100.0,
            start_date: None,
            end_date: None,
        }
    }

    fn small_genetic(seed: u64) -> GeneticConfig {
        GeneticConfig {
            population_size: 10,
            generations: 6,
            elite_count: 2,
            convergence_generations: 10,
            seed,
            parallel: false,
            ..GeneticConfig::default()
        }
    }

    // ========================================================================
    // Engine + Metrics + Fitness pipeline
    // ========================================================================

    #[test]
    fn test_engine_trades_synthetic_dataset() {
        let markets = synthetic_markets(12);
        let engine = SimulationEngine::new(base_config());
        let result = engine.run(&markets);

        assert!(!result.trades.is_empty());
        // Winning markets settle at the profit target, losers at 0.01
        assert!(result
            .trades
            .iter()
            .all(|t| matches!(t.exit_reason, ExitReason::MarketResolved)));
        let metrics = result.metrics();
        assert!(metrics.win_rate > 0.0 && metrics.win_rate <= 1.0);
        assert_eq!(metrics.total_trades, result.trades.len());
    }

    #[test]
    fn test_single_position_invariant() {
        // No trade may open before the previous one closed
        let markets = synthetic_markets(12);
        let engine = SimulationEngine::new(base_config());
        let result = engine.run(&markets);

        let mut trades = result.trades.clone();
        trades.sort_by_key(|t| t.entry_ts);
        for pair in trades.windows(2) {
            assert!(
                pair[1].entry_ts >= pair[0].exit_ts,
                "overlapping positions: {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    // ========================================================================
    // Evolution Driver
    // ========================================================================

    #[test]
    fn test_full_optimization_pipeline() {
        init_tracing();
        let markets = synthetic_markets(15);
        let driver = EvolutionDriver::new(
            base_config(),
            ParameterBounds::default(),
            small_genetic(42),
        );
        let result = driver.run(&markets).unwrap();

        assert!(!result.history.is_empty());
        assert!(result.total_evaluations >= 10);
        assert!(result.best_chromosome.fitness_value().is_some());
        // 15 markets, 0.7 split: validation subset is non-empty
        assert!(result.out_of_sample_metrics.is_some());
        assert!(result
            .validated_candidates
            .iter()
            .all(|c| c.validation.is_some()));

        // Best genes honor the cross-gene invariants
        let genes = &result.best_chromosome.genes;
        assert!(genes.entry_threshold <= genes.max_entry_price - 0.01 + 1e-9);
        assert!(genes.stop_loss < genes.entry_threshold - 0.05 + 1e-9);
        assert!(genes.profit_target >= genes.max_entry_price - 1e-9);

        // History records a monotone non-decreasing evaluation count
        for pair in result.history.windows(2) {
            assert!(pair[1].evaluations >= pair[0].evaluations);
        }
    }

    #[test]
    fn test_fixed_seed_runs_are_identical() {
        let markets = synthetic_markets(15);

        let run = |seed: u64| {
            let driver = EvolutionDriver::new(
                base_config(),
                ParameterBounds::default(),
                small_genetic(seed),
            );
            let result = driver.run(&markets).unwrap();
            let mut value = serde_json::to_value(&result).unwrap();
            // Wall-clock time is the only field allowed to differ
            value.as_object_mut().unwrap().remove("elapsed_ms");
            value
        };

        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let markets = synthetic_markets(15);

        let run = |parallel: bool| {
            let mut genetic = small_genetic(7);
            genetic.parallel = parallel;
            let driver =
                EvolutionDriver::new(base_config(), ParameterBounds::default(), genetic);
            let result = driver.run(&markets).unwrap();
            let mut value = serde_json::to_value(&result).unwrap();
            value.as_object_mut().unwrap().remove("elapsed_ms");
            // The parallel flag is echoed inside the config; mask it out
            value["genetic_config"]
                .as_object_mut()
                .unwrap()
                .remove("parallel");
            value
        };

        assert_eq!(run(true), run(false));
    }

    // ========================================================================
    // Grid search + robustness
    // ========================================================================

    #[test]
    fn test_grid_search_ranks_candidates() {
        let markets = synthetic_markets(12);
        let optimizer = GridSearchOptimizer::new(base_config(), GridSearchConfig::default());
        let results = optimizer.run(&markets);

        assert!(!results.is_empty());
        for pair in results.windows(2) {
            assert!(pair[0].fitness >= pair[1].fitness);
        }
    }

    #[test]
    fn test_walk_forward_robustness_on_best_candidate() {
        let markets = synthetic_markets(15);
        let driver = EvolutionDriver::new(
            base_config(),
            ParameterBounds::default(),
            small_genetic(42),
        );
        let result = driver.run(&markets).unwrap();

        let out_of_sample = result.out_of_sample_metrics.expect("validation subset ran");
        let report = analyze_robustness(&result.in_sample_metrics, &out_of_sample);

        assert!(report.robustness_score >= 0.0 && report.robustness_score <= 100.0);
        assert!(report.divergence_score >= 0.0);
    }
}
