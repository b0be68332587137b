use allocsim::var;
use allocsim::{
    calculate_portfolio_metrics, calculate_var, optimize_portfolio, simulate_portfolio,
    MonteCarloConfig, PortfolioError, PriceMatrix, ReturnMatrix, Statistics,
};
use allocsim::optimizer::SqpOptions;

fn two_asset_returns() -> ReturnMatrix {
    ReturnMatrix::from_returns(
        vec!["A".to_string(), "B".to_string()],
        vec![vec![0.01, 0.02], vec![-0.01, 0.01], vec![0.02, -0.005]],
    )
    .unwrap()
}

#[test]
fn test_two_asset_pipeline() {
    let returns = two_asset_returns();
    let stats = Statistics::from_returns(&returns).unwrap();

    let optimal = optimize_portfolio(&stats, 0.02, &SqpOptions::default()).unwrap();
    let sum: f64 = optimal.weights.iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
    assert!(optimal.weights.iter().all(|w| (-1e-9..=1.0 + 1e-9).contains(w)));

    let metrics = calculate_portfolio_metrics(&optimal.weights, &stats).unwrap();
    assert!(metrics.expected_return.is_finite());
    assert!(metrics.risk.is_finite() && metrics.risk > 0.0);

    let var95 = calculate_var(&optimal.weights, &returns, 0.95).unwrap();
    assert!(var95.is_finite());
    assert!(var95 >= 0.0);
    let series = var::portfolio_returns(&optimal.weights, &returns).unwrap();
    let p5 = var::percentile(&series, 5.0).unwrap();
    assert!((var95 - (-p5).max(0.0)).abs() < 1e-12);

    let sim = simulate_portfolio(
        &stats,
        &optimal.weights,
        1000.0,
        &MonteCarloConfig {
            num_simulations: 10,
            time_horizon: 5,
            seed: 42,
        },
    )
    .unwrap();
    assert_eq!(sim.paths.len(), 10);
    for path in &sim.paths {
        assert_eq!(path.len(), 5);
        assert_eq!(path[0], 1000.0);
        assert!(path.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_single_asset_is_insufficient_data() {
    let err = ReturnMatrix::from_returns(
        vec!["A".to_string()],
        vec![vec![0.01], vec![-0.02], vec![0.015]],
    )
    .unwrap_err();
    assert!(matches!(err, PortfolioError::InsufficientData { .. }));

    let prices = PriceMatrix::new(
        vec!["A".to_string(), "B".to_string()],
        vec![vec![Some(10.0), None], vec![Some(11.0), None], vec![Some(12.0), None]],
    )
    .unwrap();
    let err = ReturnMatrix::from_prices(&prices).unwrap_err();
    assert!(matches!(err, PortfolioError::InsufficientData { .. }));
}

#[test]
fn test_no_clean_rows_is_insufficient_data() {
    let prices = PriceMatrix::new(
        vec!["A".to_string(), "B".to_string()],
        vec![
            vec![Some(10.0), None],
            vec![None, Some(20.0)],
            vec![Some(11.0), None],
            vec![None, Some(21.0)],
        ],
    )
    .unwrap();
    let err = ReturnMatrix::from_prices(&prices).unwrap_err();
    assert!(matches!(err, PortfolioError::InsufficientData { .. }));
}

#[test]
fn test_same_seed_same_paths() {
    let stats = Statistics::from_returns(&two_asset_returns()).unwrap();
    let config = MonteCarloConfig {
        num_simulations: 25,
        time_horizon: 30,
        seed: 7,
    };
    let a = simulate_portfolio(&stats, &[0.4, 0.6], 500.0, &config).unwrap();
    let b = simulate_portfolio(&stats, &[0.4, 0.6], 500.0, &config).unwrap();
    assert_eq!(a, b);

    let c = simulate_portfolio(&stats, &[0.4, 0.6], 500.0, &MonteCarloConfig { seed: 8, ..config })
        .unwrap();
    assert_ne!(a.paths, c.paths);
}

#[test]
fn test_demo_prices_run_through_full_analysis() {
    let symbols: Vec<String> = ["ALPHA", "BRAVO", "CHARLIE"].iter().map(|s| s.to_string()).collect();
    let prices = allocsim::data::mock_price_matrix(&symbols, 300, 21).unwrap();
    let config = allocsim::AnalysisConfig {
        num_simulations: 40,
        time_horizon: 15,
        frontier_samples: 200,
        seed: 21,
        ..allocsim::AnalysisConfig::with_symbols(&["ALPHA", "BRAVO", "CHARLIE"])
    };
    let report = allocsim::run_analysis(&prices, &config).unwrap();

    let sum: f64 = report.weights.iter().map(|(_, w)| w).sum();
    assert!((sum - 1.0).abs() < 1e-6);
    assert_eq!(report.num_periods, 299);
    assert!(report.dropped_symbols.is_empty());
    for band in [5.0, 50.0, 95.0].windows(2) {
        let lo = report.simulation.percentile_band(band[0]);
        let hi = report.simulation.percentile_band(band[1]);
        assert!(lo.iter().zip(&hi).all(|(l, h)| l <= h));
    }
}
