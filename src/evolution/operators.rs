//! Selection, crossover and bloat control for suite populations.
//!
//! Selection functions assume the population is sorted best first.

use rand::prelude::*;

use crate::schema::{CrossoverKind, SelectionConfig};

use super::chromosome::{ConstructionFailed, TestSuiteChromosome};

/// Picks a parent index from a sorted population.
pub trait SelectionFunction: Send + Sync {
    fn select(&self, population: &[TestSuiteChromosome], rng: &mut StdRng) -> usize;
}

/// Rank-based selection with a linear bias towards the front.
#[derive(Debug, Clone, Copy)]
pub struct RankSelection {
    bias: f64,
}

impl RankSelection {
    pub fn new(bias: f64) -> Self {
        Self { bias }
    }
}

impl SelectionFunction for RankSelection {
    fn select(&self, population: &[TestSuiteChromosome], rng: &mut StdRng) -> usize {
        if population.is_empty() {
            return 0;
        }
        let r: f64 = rng.r#gen();
        let bias = self.bias;
        let d = if bias > 1.0 {
            let d = bias - (bias * bias - 4.0 * (bias - 1.0) * r).sqrt();
            d / 2.0 / (bias - 1.0)
        } else {
            r
        };
        ((population.len() as f64 * d) as usize).min(population.len() - 1)
    }
}

/// Best of `size` uniformly drawn individuals.
#[derive(Debug, Clone, Copy)]
pub struct TournamentSelection {
    size: usize,
}

impl TournamentSelection {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl SelectionFunction for TournamentSelection {
    fn select(&self, population: &[TestSuiteChromosome], rng: &mut StdRng) -> usize {
        if population.is_empty() {
            return 0;
        }
        (0..self.size)
            .map(|_| rng.gen_range(0..population.len()))
            .min()
            .unwrap_or(0)
    }
}

/// Probability proportional to `1 / (1 + fitness)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouletteWheelSelection;

impl SelectionFunction for RouletteWheelSelection {
    fn select(&self, population: &[TestSuiteChromosome], rng: &mut StdRng) -> usize {
        let weights: Vec<f64> = population
            .iter()
            .map(|suite| {
                let fitness = suite.fitness();
                if fitness.is_finite() {
                    1.0 / (1.0 + fitness.max(0.0))
                } else {
                    0.0
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return if population.is_empty() {
                0
            } else {
                rng.gen_range(0..population.len())
            };
        }

        let target = rng.r#gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (i, weight) in weights.iter().enumerate() {
            cumulative += weight;
            if cumulative >= target {
                return i;
            }
        }
        population.len() - 1
    }
}

pub fn selection_from_config(config: &SelectionConfig) -> Box<dyn SelectionFunction> {
    match *config {
        SelectionConfig::Rank { bias } => Box::new(RankSelection::new(bias)),
        SelectionConfig::Tournament { size } => Box::new(TournamentSelection::new(size)),
        SelectionConfig::RouletteWheel => Box::new(RouletteWheelSelection),
    }
}

/// Recombines two offspring in place.
pub trait CrossoverFunction: Send + Sync {
    fn cross_over(
        &self,
        a: &mut TestSuiteChromosome,
        b: &mut TestSuiteChromosome,
        rng: &mut StdRng,
        max_tests: usize,
    ) -> Result<(), ConstructionFailed>;
}

/// One split point, relative to each parent's size.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePointRelativeCrossover;

impl CrossoverFunction for SinglePointRelativeCrossover {
    fn cross_over(
        &self,
        a: &mut TestSuiteChromosome,
        b: &mut TestSuiteChromosome,
        rng: &mut StdRng,
        max_tests: usize,
    ) -> Result<(), ConstructionFailed> {
        if a.size() < 2 || b.size() < 2 {
            return Ok(());
        }
        let split: f64 = rng.r#gen();
        let pos_a = ((a.size() - 1) as f64 * split).floor() as usize + 1;
        let pos_b = ((b.size() - 1) as f64 * split).floor() as usize + 1;
        swap_tails(a, b, pos_a, pos_b, max_tests)
    }
}

/// Independent split points in each parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePointCrossover;

impl CrossoverFunction for SinglePointCrossover {
    fn cross_over(
        &self,
        a: &mut TestSuiteChromosome,
        b: &mut TestSuiteChromosome,
        rng: &mut StdRng,
        max_tests: usize,
    ) -> Result<(), ConstructionFailed> {
        if a.size() < 2 || b.size() < 2 {
            return Ok(());
        }
        let pos_a = rng.gen_range(1..a.size());
        let pos_b = rng.gen_range(1..b.size());
        swap_tails(a, b, pos_a, pos_b, max_tests)
    }
}

fn swap_tails(
    a: &mut TestSuiteChromosome,
    b: &mut TestSuiteChromosome,
    pos_a: usize,
    pos_b: usize,
    max_tests: usize,
) -> Result<(), ConstructionFailed> {
    let parent_a = a.clone();
    let parent_b = b.clone();
    a.cross_over(&parent_b, pos_a, pos_b, max_tests)?;
    b.cross_over(&parent_a, pos_b, pos_a, max_tests)
}

pub fn crossover_from_config(kind: CrossoverKind) -> Box<dyn CrossoverFunction> {
    match kind {
        CrossoverKind::SinglePointRelative => Box::new(SinglePointRelativeCrossover),
        CrossoverKind::SinglePoint => Box::new(SinglePointCrossover),
    }
}

/// Rejects offspring that grew past the configured limits.
#[derive(Debug, Clone, Copy)]
pub struct BloatControl {
    max_statements: usize,
    max_tests: usize,
}

impl BloatControl {
    pub fn new(max_statements: usize, max_tests: usize) -> Self {
        Self {
            max_statements,
            max_tests,
        }
    }

    pub fn is_too_long(&self, suite: &TestSuiteChromosome) -> bool {
        suite.size() > self.max_tests || suite.total_length() > self.max_statements
    }
}
