// Modules
pub mod consts;
pub mod error;
pub mod evolution;
pub mod frontier;
pub mod pipeline;
pub mod portfolio;
pub mod statistics;

pub use error::PipelineError;
pub use evolution::portfolio_evolution::{
    evolve_portfolios, EvolutionConfig, EvolutionError, EvolutionResult, EvolutionState,
    GenerationSummary, PortfolioEvolution, RepairStrategy,
};
pub use evolution::problem::{Evaluation, PortfolioProblem, Problem, ProblemError};
pub use frontier::{Allocation, Frontier, FrontierError, FrontierPoint, FrontierRow};
pub use pipeline::{optimize, optimize_statistics, OptimizationReport, RunInput};
pub use portfolio::Individual;
pub use statistics::{
    MarketStatistics, PriceSeries, StatisticsBuilder, StatisticsConfig, StatisticsError,
};
