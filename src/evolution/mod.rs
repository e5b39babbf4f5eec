//! Search-based generation of coverage-maximizing test suites.
//!
//! # Overview
//!
//! The search core consists of:
//!
//! - **Goal Registry** (`registry`): branches and branchless methods of the unit
//! - **Distance** (`distance`): approach level plus normalized branch distance
//! - **Coverage Archive** (`archive`): first covering test per goal
//! - **Suite Fitness** (`fitness`): one scalar per suite, drives the archive
//! - **Chromosomes** (`chromosome`, `factory`): tests and suites with their operators
//! - **Operators** (`operators`, `objectives`): selection, crossover, bloat control, ranking
//! - **Search** (`search`, `stopping`): the genetic algorithm and its stopping conditions
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use suitegen::evolution::{GeneticAlgorithm, GoalRegistry};
//! use suitegen::executor::SyntheticUnit;
//! use suitegen::schema::SearchConfig;
//!
//! let unit = SyntheticUnit::example().unwrap();
//! let mut registry = GoalRegistry::new();
//! let executor = unit.register(&mut registry).unwrap();
//!
//! let mut search = GeneticAlgorithm::new(
//!     SearchConfig::default(),
//!     registry,
//!     unit.test_cluster(),
//!     Arc::new(executor),
//! )
//! .unwrap();
//! let result = search
//!     .run_with_callback(|progress| {
//!         println!(
//!             "Generation {}: fitness {:.3}, coverage {:.1}%",
//!             progress.generation,
//!             progress.best_fitness,
//!             progress.best_coverage * 100.0
//!         );
//!     })
//!     .unwrap();
//!
//! println!("{} tests cover {}/{} goals", result.tests.len(),
//!     result.stats.covered_goals, result.stats.total_goals);
//! ```

mod archive;
mod chromosome;
mod distance;
mod factory;
mod fitness;
mod objectives;
mod operators;
mod registry;
mod search;
mod stopping;

use std::sync::Arc;

use crate::schema::{ConfigError, TestCluster};

pub use archive::CoverageArchive;
pub use chromosome::{
    ConstructionFailed, MutationContext, SuiteEvaluation, TestChromosome, TestSuiteChromosome,
    insert_random_call, random_value,
};
pub use distance::{ControlFlowDistance, DistanceCalculator, normalize};
pub use factory::{ArchiveTestFactory, RandomLengthTestFactory, TestFactory, TestSuiteFactory};
pub use fitness::SuiteFitnessEvaluator;
pub use objectives::{MinimizeSize, MinimizeTotalLength, ObjectiveRanking, SecondaryObjective};
pub use operators::{
    BloatControl, CrossoverFunction, RankSelection, RouletteWheelSelection, SelectionFunction,
    SinglePointCrossover, SinglePointRelativeCrossover, TournamentSelection,
    crossover_from_config, selection_from_config,
};
pub use registry::{GoalRegistry, RegistryError};
pub use search::{GeneticAlgorithm, LocalSearch, NoLocalSearch, ProgressCallback};
pub use stopping::{
    ExternalInterrupt, MaxFitnessEvaluations, MaxGenerations, MaxTime, StoppingCondition,
    StoppingConditions, ZeroFitness,
};

/// Fatal search errors. Construction failures are recovered inside the
/// driver and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Archive bookkeeping out of sync: {0} queued for removal but not active")]
    ArchiveDesync(String),
    #[error("Suite fitness is negative: {0}")]
    NegativeFitness(f64),
    #[error("Covered {covered} goals out of {total}")]
    CoverageOverflow { covered: usize, total: usize },
    #[error("Fitness {fitness} disagrees with coverage {covered}/{total}")]
    InconsistentFitness {
        fitness: f64,
        covered: usize,
        total: usize,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// State shared by every evaluation of one search run.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub registry: Arc<GoalRegistry>,
    pub cluster: Arc<TestCluster>,
    pub archive: CoverageArchive,
}

impl SearchContext {
    pub fn new(registry: GoalRegistry, cluster: TestCluster) -> Self {
        Self {
            registry: Arc::new(registry),
            cluster: Arc::new(cluster),
            archive: CoverageArchive::new(),
        }
    }
}
