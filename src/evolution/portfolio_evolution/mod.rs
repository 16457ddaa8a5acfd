use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::consts::{
    DEFAULT_CROSSOVER_PROBABILITY, DEFAULT_DUPLICATE_TOLERANCE, DEFAULT_FEASIBILITY_TOLERANCE,
    DEFAULT_GENERATIONS, DEFAULT_POLYNOMIAL_MUTATION_ETA, DEFAULT_POPULATION_SIZE, DEFAULT_SBX_ETA,
    DEFAULT_SEED, MAX_MATING_ATTEMPTS_PER_SLOT,
};
use crate::evolution::problem::{Evaluation, Problem};
use crate::portfolio::Individual;

use self::operators::{
    binary_tournament, is_duplicate, polynomial_mutation, sample_uniform,
    simulated_binary_crossover,
};
use self::pareto_evolution::{build_pareto_fronts, environmental_selection};

pub mod operators;
pub mod pareto_evolution;
pub mod repair;

pub use repair::RepairStrategy;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvolutionError {
    #[error("Invalid population parameters were passed: {0}")]
    BadPopulationParameter(String),
    #[error("no individual satisfies the budget constraint (best violation: {best_violation:e})")]
    NoFeasibleSolution { best_violation: f64 },
    #[error("search stopped after {completed_generations} generation(s), no result produced")]
    Cancelled { completed_generations: usize },
    #[error("problem returned {found} evaluation(s) for {expected} candidate(s)")]
    EvaluationMismatch { expected: usize, found: usize },
    #[error("could not build the evaluation thread pool: {0}")]
    ThreadPool(String),
}

fn default_max_concurrency() -> usize {
    num_cpus::get()
}
fn default_population_size() -> usize {
    DEFAULT_POPULATION_SIZE
}
fn default_generations() -> usize {
    DEFAULT_GENERATIONS
}
fn default_seed() -> u64 {
    DEFAULT_SEED
}
fn default_crossover_probability() -> f64 {
    DEFAULT_CROSSOVER_PROBABILITY
}
fn default_crossover_eta() -> f64 {
    DEFAULT_SBX_ETA
}
fn default_mutation_eta() -> f64 {
    DEFAULT_POLYNOMIAL_MUTATION_ETA
}
fn default_feasibility_tolerance() -> f64 {
    DEFAULT_FEASIBILITY_TOLERANCE
}
fn default_duplicate_tolerance() -> f64 {
    DEFAULT_DUPLICATE_TOLERANCE
}
fn default_true() -> bool {
    true
}

/// Tunable parameters of the NSGA-II search.
///
/// The initial population counts as generation 1, so `generations = G` runs
/// G - 1 reproduction cycles.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EvolutionConfig {
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_crossover_probability")]
    pub crossover_probability: f64,
    /// SBX distribution index.
    #[serde(default = "default_crossover_eta")]
    pub crossover_eta: f64,
    /// Polynomial mutation distribution index.
    #[serde(default = "default_mutation_eta")]
    pub mutation_eta: f64,
    /// Per-gene mutation probability, 1/N when absent.
    #[serde(default)]
    pub mutation_probability: Option<f64>,
    /// Largest |sum(w) - 1| still considered feasible.
    #[serde(default = "default_feasibility_tolerance")]
    pub feasibility_tolerance: f64,
    #[serde(default = "default_duplicate_tolerance")]
    pub duplicate_tolerance: f64,
    #[serde(default = "default_true")]
    pub eliminate_duplicates: bool,
    #[serde(default)]
    pub repair: RepairStrategy,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        EvolutionConfig {
            population_size: default_population_size(),
            generations: default_generations(),
            seed: default_seed(),
            crossover_probability: default_crossover_probability(),
            crossover_eta: default_crossover_eta(),
            mutation_eta: default_mutation_eta(),
            mutation_probability: None,
            feasibility_tolerance: default_feasibility_tolerance(),
            duplicate_tolerance: default_duplicate_tolerance(),
            eliminate_duplicates: true,
            repair: RepairStrategy::default(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> Result<(), EvolutionError> {
        let probability_ok = |p: f64| (0.0..=1.0).contains(&p);
        if self.population_size == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "Population size cannot be zero".into(),
            ));
        }
        if self.generations == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "Generation count cannot be zero".into(),
            ));
        }
        if !probability_ok(self.crossover_probability) {
            return Err(EvolutionError::BadPopulationParameter(format!(
                "crossover_probability must be within [0, 1], got {}",
                self.crossover_probability
            )));
        }
        if let Some(p) = self.mutation_probability {
            if !probability_ok(p) {
                return Err(EvolutionError::BadPopulationParameter(format!(
                    "mutation_probability must be within [0, 1], got {p}"
                )));
            }
        }
        for (name, eta) in [
            ("crossover_eta", self.crossover_eta),
            ("mutation_eta", self.mutation_eta),
        ] {
            if !(eta.is_finite() && eta >= 0.0) {
                return Err(EvolutionError::BadPopulationParameter(format!(
                    "{name} must be a non-negative number, got {eta}"
                )));
            }
        }
        for (name, tolerance) in [
            ("feasibility_tolerance", self.feasibility_tolerance),
            ("duplicate_tolerance", self.duplicate_tolerance),
        ] {
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(EvolutionError::BadPopulationParameter(format!(
                    "{name} must be a non-negative number, got {tolerance}"
                )));
            }
        }
        Ok(())
    }
}

/// Where the engine is in its generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvolutionState {
    Initialized,
    Evaluated,
    Ranked,
    Selected,
    Reproduced,
    Terminated,
}

/// Snapshot of the population at the end of a generation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub generation: usize,
    pub first_front_size: usize,
    /// Best (lowest) value of each objective within the first front.
    pub best_objectives: Vec<f64>,
    pub feasible_count: usize,
    pub minimum_violation: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EvolutionResult {
    /// Feasible, non-dominated individuals of the final population.
    pub pareto_front: Vec<Individual>,
    /// The whole final population, with rank and crowding metadata.
    pub population: Vec<Individual>,
    pub history: Vec<GenerationSummary>,
    pub generations: usize,
    pub seed: u64,
}

/// NSGA-II over any [`Problem`], driven by a single seeded generator.
pub struct PortfolioEvolution<P: Problem> {
    problem: P,
    config: EvolutionConfig,
    rng: ChaCha20Rng,
    pool: rayon::ThreadPool,
    population: Vec<Individual>,
    generation: usize,
    state: EvolutionState,
    history: Vec<GenerationSummary>,
    // ids are per run so two runs with the same seed stay identical
    next_id: usize,
    mutation_probability: f64,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<P: Problem> PortfolioEvolution<P> {
    pub fn new(problem: P, config: EvolutionConfig) -> Result<Self, EvolutionError> {
        config.validate()?;

        let number_of_variables = problem.number_of_variables();
        if number_of_variables == 0 {
            return Err(EvolutionError::BadPopulationParameter(
                "Assets under management cannot be zero".into(),
            ));
        }
        let (lower, upper) = (problem.lower_bounds(), problem.upper_bounds());
        if lower.len() != number_of_variables || upper.len() != number_of_variables {
            return Err(EvolutionError::BadPopulationParameter(format!(
                "bounds describe {} / {} variables, problem has {}",
                lower.len(),
                upper.len(),
                number_of_variables
            )));
        }
        if lower.iter().zip(upper).any(|(l, u)| !(l.is_finite() && u.is_finite() && l <= u)) {
            return Err(EvolutionError::BadPopulationParameter(
                "every lower bound must be finite and below its upper bound".into(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency)
            .build()
            .map_err(|e| EvolutionError::ThreadPool(e.to_string()))?;

        let mutation_probability = config
            .mutation_probability
            .unwrap_or(1.0 / number_of_variables as f64);

        Ok(PortfolioEvolution {
            problem,
            rng: ChaCha20Rng::seed_from_u64(config.seed),
            config,
            pool,
            population: Vec::new(),
            generation: 0,
            state: EvolutionState::Initialized,
            history: Vec::new(),
            next_id: 0,
            mutation_probability,
            stop_flag: None,
        })
    }

    /// The flag is checked between generations; setting it makes `run` return
    /// [`EvolutionError::Cancelled`].
    pub fn with_stop_flag(mut self, stop_flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(stop_flag);
        self
    }

    pub fn state(&self) -> EvolutionState {
        self.state
    }

    /// Number of completed generations, the initial population being the first.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    pub fn history(&self) -> &[GenerationSummary] {
        &self.history
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// Current first front.
    pub fn pareto_front(&self) -> Vec<&Individual> {
        self.population
            .iter()
            .filter(|individual| individual.rank == Some(0))
            .collect()
    }

    fn transition(&mut self, state: EvolutionState) {
        trace!(
            "Generation {}: {:?} -> {:?}",
            self.generation,
            self.state,
            state
        );
        self.state = state;
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_flag
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Runs one generation. The first call builds and ranks the initial
    /// population.
    pub fn step(&mut self) -> Result<(), EvolutionError> {
        if self.state == EvolutionState::Terminated {
            return Err(EvolutionError::BadPopulationParameter(
                "the search already terminated".into(),
            ));
        }
        if self.population.is_empty() {
            return self.initialize();
        }

        // Variation
        let offspring_weights = self.generate_offsprings();
        self.transition(EvolutionState::Reproduced);

        let offspring = self.evaluate(offspring_weights)?;
        self.transition(EvolutionState::Evaluated);

        // Elitist merge-before-select, 2P -> P
        let mut merged = std::mem::take(&mut self.population);
        merged.extend(offspring);
        self.transition(EvolutionState::Ranked);
        self.population = environmental_selection(merged, self.config.population_size);
        self.transition(EvolutionState::Selected);

        self.generation += 1;
        self.record_generation();
        Ok(())
    }

    /// Runs every remaining generation and extracts the feasible first front.
    pub fn run(mut self) -> Result<EvolutionResult, EvolutionError> {
        info!(
            "Starting NSGA-II: {} variables, population {}, {} generations, seed {}",
            self.problem.number_of_variables(),
            self.config.population_size,
            self.config.generations,
            self.config.seed
        );

        while self.generation < self.config.generations {
            if self.is_stop_requested() {
                warn!("Stop requested after generation {}", self.generation);
                return Err(EvolutionError::Cancelled {
                    completed_generations: self.generation,
                });
            }
            self.step()?;
            if let Some(summary) = self.history.last() {
                debug!(
                    "Generation {}: first front {}, best objectives {:?}, feasible {}",
                    summary.generation,
                    summary.first_front_size,
                    summary.best_objectives,
                    summary.feasible_count
                );
            }
        }

        self.finish()
    }

    fn finish(mut self) -> Result<EvolutionResult, EvolutionError> {
        self.transition(EvolutionState::Terminated);

        let pareto_front: Vec<Individual> = self
            .population
            .iter()
            .filter(|individual| individual.rank == Some(0) && individual.is_feasible())
            .cloned()
            .collect();

        if pareto_front.is_empty() {
            let best_violation = self
                .population
                .iter()
                .map(|individual| individual.constraint_violation)
                .fold(f64::INFINITY, f64::min);
            return Err(EvolutionError::NoFeasibleSolution { best_violation });
        }

        info!(
            "NSGA-II finished after {} generations with {} non-dominated portfolios",
            self.generation,
            pareto_front.len()
        );

        Ok(EvolutionResult {
            pareto_front,
            population: self.population,
            history: self.history,
            generations: self.generation,
            seed: self.config.seed,
        })
    }

    fn initialize(&mut self) -> Result<(), EvolutionError> {
        let population_size = self.config.population_size;
        let max_attempts = population_size * MAX_MATING_ATTEMPTS_PER_SLOT;
        let mut candidates: Vec<Vec<f64>> = Vec::with_capacity(population_size);
        let mut attempts = 0;

        // For each portfolio we sample from a Uniform and then repair
        while candidates.len() < population_size && attempts < max_attempts {
            attempts += 1;
            let mut weights = sample_uniform(
                &mut self.rng,
                self.problem.lower_bounds(),
                self.problem.upper_bounds(),
            );
            self.config.repair.apply(&mut weights);
            let tolerance = self.config.duplicate_tolerance;
            if self.config.eliminate_duplicates
                && candidates
                    .iter()
                    .any(|existing| is_duplicate(&weights, existing, tolerance))
            {
                continue;
            }
            candidates.push(weights);
        }
        if candidates.len() < population_size {
            debug!(
                "Only {} unique individuals could be sampled out of {}",
                candidates.len(),
                population_size
            );
        }

        self.population = self.evaluate(candidates)?;
        self.transition(EvolutionState::Evaluated);
        build_pareto_fronts(&mut self.population);
        self.transition(EvolutionState::Ranked);
        self.transition(EvolutionState::Selected);

        self.generation = 1;
        self.record_generation();
        Ok(())
    }

    /// Tournament, SBX, polynomial mutation and repair until we have a full
    /// batch of offspring (or run out of attempts to find unique ones).
    fn generate_offsprings(&mut self) -> Vec<Vec<f64>> {
        let offspring_count = self.config.population_size;
        let max_attempts = offspring_count * MAX_MATING_ATTEMPTS_PER_SLOT;
        let mut offsprings: Vec<Vec<f64>> = Vec::with_capacity(offspring_count);
        let mut attempts = 0;

        while offsprings.len() < offspring_count && attempts < max_attempts {
            attempts += 1;
            let parent_1 = binary_tournament(&self.population, &mut self.rng);
            let parent_2 = binary_tournament(&self.population, &mut self.rng);

            let (child_1, child_2) = simulated_binary_crossover(
                &parent_1.weights,
                &parent_2.weights,
                self.problem.lower_bounds(),
                self.problem.upper_bounds(),
                self.config.crossover_probability,
                self.config.crossover_eta,
                &mut self.rng,
            );

            for mut child in [child_1, child_2] {
                polynomial_mutation(
                    &mut child,
                    self.problem.lower_bounds(),
                    self.problem.upper_bounds(),
                    self.mutation_probability,
                    self.config.mutation_eta,
                    &mut self.rng,
                );
                self.config.repair.apply(&mut child);

                if self.config.eliminate_duplicates {
                    let tolerance = self.config.duplicate_tolerance;
                    let seen = self
                        .population
                        .iter()
                        .map(|individual| individual.weights.as_slice())
                        .chain(offsprings.iter().map(Vec::as_slice))
                        .any(|existing| is_duplicate(&child, existing, tolerance));
                    if seen {
                        continue;
                    }
                }
                if offsprings.len() < offspring_count {
                    offsprings.push(child);
                }
            }
        }

        if offsprings.len() < offspring_count {
            debug!(
                "Generation {}: only {} unique offspring out of {}",
                self.generation + 1,
                offsprings.len(),
                offspring_count
            );
        }
        offsprings
    }

    fn evaluate(&mut self, candidates: Vec<Vec<f64>>) -> Result<Vec<Individual>, EvolutionError> {
        let problem = &self.problem;
        let evaluations: Vec<Evaluation> = self.pool.install(|| problem.evaluate(&candidates));
        if evaluations.len() != candidates.len() {
            return Err(EvolutionError::EvaluationMismatch {
                expected: candidates.len(),
                found: evaluations.len(),
            });
        }

        let tolerance = self.config.feasibility_tolerance;
        let first_id = self.next_id;
        self.next_id += candidates.len();

        Ok(candidates
            .into_iter()
            .zip(evaluations)
            .enumerate()
            .map(|(offset, (weights, evaluation))| {
                let residual = total_residual(&evaluation.equality_residuals);
                Individual::new(
                    first_id + offset,
                    weights,
                    evaluation.objectives,
                    residual,
                    tolerance,
                )
            })
            .collect())
    }

    fn record_generation(&mut self) {
        let first_front: Vec<&Individual> = self.pareto_front();
        let number_of_objectives = self.problem.number_of_objectives();
        let best_objectives = (0..number_of_objectives)
            .map(|m| {
                first_front
                    .iter()
                    .filter_map(|individual| individual.objectives.get(m).copied())
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let summary = GenerationSummary {
            generation: self.generation,
            first_front_size: first_front.len(),
            best_objectives,
            feasible_count: self.population.iter().filter(|p| p.is_feasible()).count(),
            minimum_violation: self
                .population
                .iter()
                .map(|p| p.constraint_violation)
                .fold(f64::INFINITY, f64::min),
        };
        self.history.push(summary);
    }
}

/// A single residual is kept signed, several are summed in magnitude.
fn total_residual(residuals: &[f64]) -> f64 {
    match residuals {
        [] => 0.0,
        [single] => *single,
        many => many.iter().map(|r| r.abs()).sum(),
    }
}

/// Convenience wrapper: build the engine and run it to completion.
pub fn evolve_portfolios<P: Problem>(
    problem: P,
    config: EvolutionConfig,
) -> Result<EvolutionResult, EvolutionError> {
    PortfolioEvolution::new(problem, config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::problem::PortfolioProblem;
    use nalgebra::{DMatrix, DVector};

    fn small_config(seed: u64) -> EvolutionConfig {
        EvolutionConfig {
            population_size: 24,
            generations: 15,
            seed,
            max_concurrency: 2,
            ..Default::default()
        }
    }

    fn two_asset_problem() -> PortfolioProblem {
        PortfolioProblem::new(
            DVector::from_vec(vec![0.05, 0.12]),
            DMatrix::from_row_slice(2, 2, &[0.01, 0.0, 0.0, 0.09]),
        )
        .unwrap()
    }

    /// Two objectives that pull toward opposite corners, with one budget
    /// residual that can never be met within tolerance.
    struct UnreachableBudget;

    impl Problem for UnreachableBudget {
        fn number_of_variables(&self) -> usize {
            2
        }
        fn number_of_objectives(&self) -> usize {
            2
        }
        fn lower_bounds(&self) -> &[f64] {
            &[0.0, 0.0]
        }
        fn upper_bounds(&self) -> &[f64] {
            &[1.0, 1.0]
        }
        fn evaluate(&self, candidates: &[Vec<f64>]) -> Vec<Evaluation> {
            candidates
                .iter()
                .map(|w| Evaluation {
                    objectives: vec![w[0], 1.0 - w[0]],
                    equality_residuals: vec![w.iter().sum::<f64>() - 5.0],
                })
                .collect()
        }
    }

    #[test]
    fn test_config_validation() {
        let mut config = EvolutionConfig::default();
        assert!(config.validate().is_ok());
        config.population_size = 0;
        assert!(config.validate().is_err());

        let config = EvolutionConfig {
            generations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EvolutionConfig {
            crossover_probability: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EvolutionConfig {
            mutation_probability: Some(1.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: EvolutionConfig = serde_json::from_str(r#"{"population_size": 40}"#).unwrap();
        assert_eq!(config.population_size, 40);
        assert_eq!(config.generations, DEFAULT_GENERATIONS);
        assert_eq!(config.repair, RepairStrategy::Normalize);
        assert!(config.eliminate_duplicates);
        assert!(config.max_concurrency >= 1);
    }

    #[test]
    fn test_state_machine() {
        let mut engine = PortfolioEvolution::new(two_asset_problem(), small_config(3)).unwrap();
        assert_eq!(engine.state(), EvolutionState::Initialized);
        assert_eq!(engine.generation(), 0);

        engine.step().unwrap();
        assert_eq!(engine.generation(), 1);
        assert_eq!(engine.state(), EvolutionState::Selected);
        assert_eq!(engine.population().len(), 24);
        assert!(engine.population().iter().all(|p| p.rank.is_some()));

        engine.step().unwrap();
        assert_eq!(engine.generation(), 2);
        assert_eq!(engine.history().len(), 2);
        assert_eq!(engine.population().len(), 24);
    }

    #[test]
    fn test_population_respects_bounds_and_budget() {
        let mut engine = PortfolioEvolution::new(two_asset_problem(), small_config(5)).unwrap();
        for _ in 0..10 {
            engine.step().unwrap();
            for individual in engine.population() {
                assert!(individual.weights.iter().all(|w| (0.0..=1.0).contains(w)));
                let sum: f64 = individual.weights.iter().sum();
                assert!((sum - 1.0).abs() <= 1e-6, "sum was {sum}");
            }
        }
    }

    #[test]
    fn test_best_risk_never_regresses() {
        let mut engine = PortfolioEvolution::new(two_asset_problem(), small_config(11)).unwrap();
        for _ in 0..15 {
            engine.step().unwrap();
        }
        let best_risks: Vec<f64> = engine
            .history()
            .iter()
            .map(|summary| summary.best_objectives[0])
            .collect();
        for pair in best_risks.windows(2) {
            assert!(pair[1] <= pair[0], "best risk went from {} to {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_same_seed_same_front() {
        let first = evolve_portfolios(two_asset_problem(), small_config(42)).unwrap();
        let second = evolve_portfolios(two_asset_problem(), small_config(42)).unwrap();

        assert_eq!(first.pareto_front.len(), second.pareto_front.len());
        for (a, b) in first.pareto_front.iter().zip(second.pareto_front.iter()) {
            assert_eq!(a.weights, b.weights);
            assert_eq!(a.objectives, b.objectives);
        }
    }

    /// The two-asset model, except that portfolios holding more than half of
    /// the first asset evaluate to NaN.
    struct NumericallyBrokenRegion(PortfolioProblem);

    impl Problem for NumericallyBrokenRegion {
        fn number_of_variables(&self) -> usize {
            self.0.number_of_variables()
        }
        fn number_of_objectives(&self) -> usize {
            self.0.number_of_objectives()
        }
        fn lower_bounds(&self) -> &[f64] {
            self.0.lower_bounds()
        }
        fn upper_bounds(&self) -> &[f64] {
            self.0.upper_bounds()
        }
        fn evaluate(&self, candidates: &[Vec<f64>]) -> Vec<Evaluation> {
            self.0
                .evaluate(candidates)
                .into_iter()
                .zip(candidates)
                .map(|(mut evaluation, weights)| {
                    if weights[0] > 0.5 {
                        evaluation.objectives = vec![f64::NAN; evaluation.objectives.len()];
                    }
                    evaluation
                })
                .collect()
        }
    }

    #[test]
    fn test_nan_rows_are_ranked_last_without_aborting() {
        let config = small_config(13);
        let mut engine =
            PortfolioEvolution::new(NumericallyBrokenRegion(two_asset_problem()), config).unwrap();

        for _ in 0..10 {
            engine.step().unwrap();
            for individual in engine.population() {
                if individual.weights[0] > 0.5 {
                    assert_ne!(individual.rank, Some(0));
                    assert_eq!(individual.constraint_violation, f64::INFINITY);
                } else {
                    assert!(individual.objectives.iter().all(|v| v.is_finite()));
                }
            }
            assert!(engine.pareto_front().iter().all(|p| p.is_feasible()));
        }

        let result = PortfolioEvolution::new(
            NumericallyBrokenRegion(two_asset_problem()),
            small_config(13),
        )
        .unwrap()
        .run()
        .unwrap();
        assert_eq!(result.history.len(), 15);
        assert!(!result.pareto_front.is_empty());
        assert!(result.pareto_front.iter().all(|p| p.weights[0] <= 0.5));
    }

    #[test]
    fn test_no_feasible_solution() {
        let config = EvolutionConfig {
            repair: RepairStrategy::None,
            ..small_config(1)
        };
        let result = evolve_portfolios(UnreachableBudget, config);
        match result {
            Err(EvolutionError::NoFeasibleSolution { best_violation }) => {
                // weights are at most 1 each, so the residual is at least 3
                assert!(best_violation >= 3.0);
            }
            other => panic!("expected NoFeasibleSolution, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_flag_cancels_between_generations() {
        let stop_flag = Arc::new(AtomicBool::new(true));
        let result = PortfolioEvolution::new(two_asset_problem(), small_config(2))
            .unwrap()
            .with_stop_flag(stop_flag)
            .run();
        assert_eq!(
            result.unwrap_err(),
            EvolutionError::Cancelled {
                completed_generations: 0
            }
        );
    }

    #[test]
    fn test_step_after_termination_is_rejected() {
        let mut engine = PortfolioEvolution::new(two_asset_problem(), small_config(2)).unwrap();
        engine.state = EvolutionState::Terminated;
        assert!(engine.step().is_err());
    }

    #[test]
    fn test_total_residual() {
        assert_eq!(total_residual(&[]), 0.0);
        assert_eq!(total_residual(&[-0.5]), -0.5);
        assert_eq!(total_residual(&[-0.5, 0.25]), 0.75);
    }
}
