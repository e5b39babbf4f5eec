//! Progress and result types reported by a search run.

use serde::{Deserialize, Serialize};

use super::{Goal, TestCase};

/// Lifecycle of the genetic algorithm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    #[default]
    Uninitialized,
    Initialized,
    Evolving,
    Finished,
}

/// Reason the search stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached maximum generations.
    MaxGenerations,
    /// Wall-clock budget exhausted.
    MaxTime,
    /// Fitness evaluation budget exhausted.
    MaxEvaluations,
    /// Every goal is covered.
    ZeroFitness,
    /// Interrupted through the cancellation handle.
    Cancelled,
}

/// Per-generation statistics for plotting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHistory {
    /// Best fitness per generation.
    pub best_fitness: Vec<f64>,
    /// Average fitness per generation.
    pub avg_fitness: Vec<f64>,
    /// Coverage of the best suite per generation.
    pub best_coverage: Vec<f64>,
    /// Goals still being scored per generation.
    pub active_goals: Vec<usize>,
}

/// Snapshot passed to progress callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProgress {
    pub generation: usize,
    pub phase: SearchPhase,
    /// Fraction of the stopping budget consumed.
    pub progress: f64,
    pub best_fitness: f64,
    pub best_coverage: f64,
    pub avg_fitness: f64,
    pub covered_goals: usize,
    pub total_goals: usize,
    pub fitness_evaluations: u64,
    /// Generations since the best fitness last improved.
    pub starvation: usize,
}

/// Statistics of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    pub generations: usize,
    pub fitness_evaluations: u64,
    pub best_fitness: f64,
    pub coverage: f64,
    pub covered_goals: usize,
    pub total_goals: usize,
    pub archived_goals: usize,
    pub elapsed_seconds: f64,
    pub stop_reason: StopReason,
}

/// Final result handed to the export collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Archive-merged best suite, in order.
    pub tests: Vec<TestCase>,
    pub uncovered_goals: Vec<Goal>,
    pub stats: SearchStats,
    pub history: SearchHistory,
}
