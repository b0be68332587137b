pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod frontier;
pub mod metrics;
pub mod optimizer;
pub mod report;
pub mod returns;
pub mod simulation;
pub mod stats;
pub mod var;

pub use analysis::{run_analysis, run_with_weights, AnalysisReport};
pub use config::AnalysisConfig;
pub use error::{PortfolioError, Result};
pub use metrics::{calculate_portfolio_metrics, PortfolioMetrics};
pub use optimizer::{optimize_portfolio, OptimalPortfolio};
pub use returns::{PriceMatrix, ReturnMatrix};
pub use simulation::{simulate_portfolio, MonteCarloConfig, SimulationResult};
pub use stats::Statistics;
pub use var::calculate_var;
