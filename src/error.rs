//! Error types for the allocation core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Failure kinds raised by the quantitative core.
///
/// Every stage validates its own inputs and fails fast with one of these;
/// nothing is retried or replaced with a default.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
    /// Fewer than two usable assets, or no usable rows after cleaning.
    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    /// Mean/covariance computation hit non-finite values.
    #[error("Statistics error: {message}")]
    Statistics { message: String },

    /// Return/risk for a specific weight vector is not finite.
    #[error("Metrics error: {message}")]
    Metrics { message: String },

    /// Constrained search failed to converge or constraints are infeasible.
    #[error("Optimization error: {message}")]
    Optimization { message: String },

    /// VaR inputs are malformed.
    #[error("Risk estimation error: {message}")]
    RiskEstimation { message: String },

    /// The simulation distribution cannot be fit or its parameters are invalid.
    #[error("Simulation error: {message}")]
    Simulation { message: String },

    /// Malformed input at the analysis boundary.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl PortfolioError {
    pub fn insufficient_data(message: impl Into<String>) -> Self {
        Self::InsufficientData {
            message: message.into(),
        }
    }

    pub fn statistics(message: impl Into<String>) -> Self {
        Self::Statistics {
            message: message.into(),
        }
    }

    pub fn metrics(message: impl Into<String>) -> Self {
        Self::Metrics {
            message: message.into(),
        }
    }

    pub fn optimization(message: impl Into<String>) -> Self {
        Self::Optimization {
            message: message.into(),
        }
    }

    pub fn risk_estimation(message: impl Into<String>) -> Self {
        Self::RiskEstimation {
            message: message.into(),
        }
    }

    pub fn simulation(message: impl Into<String>) -> Self {
        Self::Simulation {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Short machine-friendly name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "InsufficientDataError",
            Self::Statistics { .. } => "StatisticsError",
            Self::Metrics { .. } => "MetricsError",
            Self::Optimization { .. } => "OptimizationError",
            Self::RiskEstimation { .. } => "RiskEstimationError",
            Self::Simulation { .. } => "SimulationError",
            Self::InvalidInput { .. } => "InvalidInputError",
        }
    }
}
