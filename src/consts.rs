// Defaults for the configuration structs. Nothing in here is read as an ambient
// global by the algorithms: every value flows in through a config at construction.

/// Used whenever two floats need to be compared "for real".
pub const FLOAT_COMPARISON_EPSILON: f64 = 1e-9;

/// Market convention for annualizing daily statistics.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Below this many return observations a covariance is undefined.
pub const MINIMUM_RETURN_OBSERVATIONS: usize = 2;

/// Used when the risk-free rate series cannot provide a value (9% a.a.).
pub const FALLBACK_RISK_FREE_RATE: f64 = 0.09;

pub const NUMBER_OF_OPTIMIZATION_OBJECTIVES: usize = 2;

// Search engine defaults
pub const DEFAULT_POPULATION_SIZE: usize = 150;
pub const DEFAULT_GENERATIONS: usize = 200;
pub const DEFAULT_SEED: u64 = 1;
pub const DEFAULT_CROSSOVER_PROBABILITY: f64 = 0.9;
pub const DEFAULT_SBX_ETA: f64 = 15.0;
pub const DEFAULT_POLYNOMIAL_MUTATION_ETA: f64 = 20.0;
pub const DEFAULT_FEASIBILITY_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_DUPLICATE_TOLERANCE: f64 = 1e-12;

/// How many mating attempts we allow per requested offspring before giving up
/// on filling the population with unique individuals.
pub const MAX_MATING_ATTEMPTS_PER_SLOT: usize = 100;

/// Holdings under 0.5% are grouped together in allocation breakdowns.
pub const DEFAULT_ALLOCATION_DISPLAY_THRESHOLD: f64 = 0.005;
