use allocsim::{analysis, config, data, report};
use allocsim::config::AnalysisConfig;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "allocsim: Sharpe-optimal allocation, historical VaR and Monte Carlo projection",
    after_help = "EXAMPLES:
    # Optimize a four-stock portfolio over three years of daily closes
    cargo run --release -- --symbols AAPL,MSFT,NVDA,JNJ

    # Reproducible run with a JSON report
    cargo run --release -- --symbols SPY,TLT,GLD --seed 42 --json report.json

    # Offline run on synthetic prices
    cargo run --release -- --demo"
)]
struct Args {
    /// Comma-separated ticker symbols (e.g., AAPL,MSFT,NVDA)
    #[arg(long)]
    symbols: Option<String>,

    /// Years of daily history to fetch (1-10)
    #[arg(long, default_value_t = config::DEFAULT_HISTORY_YEARS)]
    years: u32,

    /// Initial investment used for the Monte Carlo projection
    #[arg(long, default_value_t = config::DEFAULT_INITIAL_INVESTMENT)]
    investment: f64,

    /// Comma-separated VaR confidence levels in (0, 1)
    #[arg(long, value_delimiter = ',', default_values_t = config::DEFAULT_CONFIDENCE_LEVELS.to_vec())]
    confidence: Vec<f64>,

    /// Annualized risk-free rate (default: ALLOCSIM_RISK_FREE_RATE or 0.02)
    #[arg(long)]
    risk_free_rate: Option<f64>,

    /// Number of Monte Carlo paths
    #[arg(long, default_value_t = config::DEFAULT_NUM_SIMULATIONS)]
    simulations: usize,

    /// Steps per Monte Carlo path, including the starting value
    #[arg(long, default_value_t = config::DEFAULT_TIME_HORIZON)]
    horizon: usize,

    /// RNG seed for the simulation and frontier sample (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Random portfolios to sample for the risk/return scatter (0 to skip)
    #[arg(long, default_value_t = config::DEFAULT_FRONTIER_SAMPLES)]
    frontier_samples: usize,

    /// Write the report as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,

    /// Use synthetic prices instead of downloading history
    #[arg(long)]
    demo: bool,
}

const DEMO_SYMBOLS: &[&str] = &["ALPHA", "BRAVO", "CHARLIE", "DELTA"];
const DEMO_DAYS: usize = 756;

#[tokio::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    config::init_cpu_parallelism();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("allocsim=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    let symbols: Vec<String> = match (&args.symbols, args.demo) {
        (Some(list), _) => list
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        (None, true) => DEMO_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        (None, false) => {
            error!("No symbols given. Example: --symbols AAPL,MSFT,NVDA (or --demo for synthetic data)");
            return Ok(());
        }
    };

    let seed = args.seed.unwrap_or_else(rand::random);
    if args.seed.is_none() {
        info!("No --seed given; using {}", seed);
    }

    let cfg = AnalysisConfig {
        symbols,
        history_years: args.years,
        initial_investment: args.investment,
        confidence_levels: args.confidence,
        risk_free_rate: args
            .risk_free_rate
            .unwrap_or_else(config::configured_risk_free_rate),
        num_simulations: args.simulations,
        time_horizon: args.horizon,
        seed,
        frontier_samples: args.frontier_samples,
    };
    if let Err(e) = cfg.validate() {
        error!("Invalid request ({}): {}", e.kind(), e);
        return Ok(());
    }

    let prices = if args.demo {
        info!("Generating {} days of synthetic prices for {:?}", DEMO_DAYS, cfg.symbols);
        data::mock_price_matrix(&cfg.symbols, DEMO_DAYS, seed)
    } else {
        info!(
            "Fetching {} of daily closes for {:?}...",
            cfg.history_range(),
            cfg.symbols
        );
        data::fetch_price_matrix(&cfg.symbols, &cfg.history_range()).await
    };
    let prices = match prices {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to load price history: {}", e);
            return Ok(());
        }
    };

    let result = match analysis::run_analysis(&prices, &cfg) {
        Ok(r) => r,
        Err(e) => {
            error!("Analysis failed ({}): {}", e.kind(), e);
            return Ok(());
        }
    };

    report::print_report(&result);

    if let Some(path) = &args.json {
        match report::write_json(&result, path) {
            Ok(_) => info!("Report written to {}", path.display()),
            Err(e) => warn!("Failed to write report to {}: {}", path.display(), e),
        }
    }

    Ok(())
}
