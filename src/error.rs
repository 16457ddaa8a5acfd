use thiserror::Error;

use crate::evolution::portfolio_evolution::EvolutionError;
use crate::evolution::problem::ProblemError;
use crate::frontier::FrontierError;
use crate::statistics::StatisticsError;

/// A fatal error of the optimization pipeline, tagged with the stage that
/// raised it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("statistics stage failed: {0}")]
    Statistics(#[from] StatisticsError),
    #[error("problem model stage failed: {0}")]
    Problem(#[from] ProblemError),
    #[error("search stage failed: {0}")]
    Evolution(#[from] EvolutionError),
    #[error("frontier stage failed: {0}")]
    Frontier(#[from] FrontierError),
    #[error("invalid run input: {0}")]
    InvalidInput(String),
}

impl PipelineError {
    /// Name of the failing stage, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Statistics(_) => "statistics",
            PipelineError::Problem(_) => "problem",
            PipelineError::Evolution(_) => "search",
            PipelineError::Frontier(_) => "frontier",
            PipelineError::InvalidInput(_) => "input",
        }
    }
}
