//! Genetic algorithm over test suites.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, info, warn};
use rand::prelude::*;
use rayon::prelude::*;

use crate::executor::Executor;
use crate::schema::{
    Goal, SearchConfig, SearchHistory, SearchPhase, SearchProgress, SearchResult, SearchStats,
    StopReason, TestCluster,
};

use super::chromosome::TestSuiteChromosome;
use super::distance::DistanceCalculator;
use super::factory::{ArchiveTestFactory, RandomLengthTestFactory, TestSuiteFactory};
use super::fitness::SuiteFitnessEvaluator;
use super::objectives::ObjectiveRanking;
use super::operators::{
    BloatControl, CrossoverFunction, SelectionFunction, crossover_from_config,
    selection_from_config,
};
use super::registry::GoalRegistry;
use super::stopping::StoppingConditions;
use super::{SearchContext, SearchError};

/// Progress callback type.
pub type ProgressCallback = Box<dyn Fn(&SearchProgress) + Send + Sync>;

/// Hook for improving single individuals between generations.
pub trait LocalSearch: Send + Sync {
    /// Try to improve `suite` in place. Returns whether it improved.
    fn improve(&self, suite: &mut TestSuiteChromosome, rng: &mut StdRng) -> bool;
}

/// Local search that never finds an improvement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalSearch;

impl LocalSearch for NoLocalSearch {
    fn improve(&self, _suite: &mut TestSuiteChromosome, _rng: &mut StdRng) -> bool {
        false
    }
}

/// Search driver owning every piece of per-run state.
pub struct GeneticAlgorithm {
    config: SearchConfig,
    rng: StdRng,
    context: SearchContext,
    evaluator: SuiteFitnessEvaluator,
    test_factory: RandomLengthTestFactory,
    suite_factory: TestSuiteFactory,
    ranking: ObjectiveRanking,
    selection: Box<dyn SelectionFunction>,
    crossover: Box<dyn CrossoverFunction>,
    bloat: BloatControl,
    stopping: StoppingConditions,
    local_search: Box<dyn LocalSearch>,
    local_search_probability: f64,
    secondary_enable_after: f64,
    population: Vec<TestSuiteChromosome>,
    phase: SearchPhase,
    generation: usize,
    starvation: usize,
    history: SearchHistory,
    cancelled: Arc<AtomicBool>,
    started: Option<Instant>,
}

impl GeneticAlgorithm {
    /// Create a search over the goals of `registry` using the methods of
    /// `cluster`.
    pub fn new(
        config: SearchConfig,
        registry: GoalRegistry,
        cluster: TestCluster,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        registry.check_dependencies()?;

        let seed = config.random_seed.unwrap_or_else(rand::random);
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut context = SearchContext::new(registry, cluster);
        let evaluator = SuiteFitnessEvaluator::new(
            Arc::clone(&context.registry),
            executor,
            &config,
            Arc::clone(&cancelled),
        );
        if config.fitness.archive {
            context.archive.add_targets(evaluator.goals());
        }

        let test_factory = RandomLengthTestFactory::new(
            Arc::clone(&context.cluster),
            config.operators.clone(),
            config.population.max_tests,
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            suite_factory: TestSuiteFactory::new(config.population.initial_tests),
            ranking: ObjectiveRanking::from_config(evaluator.is_maximization(), &config.secondary),
            selection: selection_from_config(&config.selection),
            crossover: crossover_from_config(config.operators.crossover),
            bloat: BloatControl::new(
                config.operators.max_suite_length,
                config.population.max_tests,
            ),
            stopping: StoppingConditions::from_config(&config.stopping, Arc::clone(&cancelled)),
            local_search: Box::new(NoLocalSearch),
            local_search_probability: config.local_search.probability,
            secondary_enable_after: config.secondary.enable_after_percent,
            population: Vec::with_capacity(config.population.size),
            phase: SearchPhase::Uninitialized,
            generation: 0,
            starvation: 0,
            history: SearchHistory::default(),
            started: None,
            config,
            context,
            evaluator,
            test_factory,
            cancelled,
        })
    }

    /// Use a local search hook.
    pub fn with_local_search(mut self, local_search: Box<dyn LocalSearch>) -> Self {
        self.local_search = local_search;
        self
    }

    /// Replace the configured crossover operator.
    pub fn with_crossover(mut self, crossover: Box<dyn CrossoverFunction>) -> Self {
        self.crossover = crossover;
        self
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn population(&self) -> &[TestSuiteChromosome] {
        &self.population
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn context(&self) -> &SearchContext {
        &self.context
    }

    pub fn evaluator(&self) -> &SuiteFitnessEvaluator {
        &self.evaluator
    }

    pub fn local_search_probability(&self) -> f64 {
        self.local_search_probability
    }

    /// Generate, evaluate and sort the initial population.
    pub fn initialize_population(&mut self) -> Result<(), SearchError> {
        self.stopping.search_started();
        self.started = Some(Instant::now());
        self.generation = 0;
        self.population.clear();

        for _ in 0..self.config.population.size {
            let suite = self
                .suite_factory
                .get_suite(&self.test_factory, &mut self.rng);
            self.population.push(suite);
        }
        debug!("Created {} individuals", self.population.len());

        self.calculate_fitness_and_sort()?;
        self.phase = SearchPhase::Initialized;
        self.record_history();
        Ok(())
    }

    /// Produce the next generation.
    pub fn evolve(&mut self) -> Result<(), SearchError> {
        if self.population.is_empty() {
            return self.initialize_population();
        }

        let size = self.config.population.size;
        let max_tests = self.config.population.max_tests;
        let birth = self.generation + 1;
        let mut next: Vec<TestSuiteChromosome> = self
            .population
            .iter()
            .take(self.config.population.elite)
            .cloned()
            .collect();

        {
            let factory = ArchiveTestFactory::new(
                &self.test_factory,
                &self.context.archive,
                self.config.population.seed_clone,
                self.config.population.seed_mutations,
            );
            let ctx = self.test_factory.context();
            let mut failures = 0;

            while next.len() < size {
                let i1 = self.selection.select(&self.population, &mut self.rng);
                let i2 = self.selection.select(&self.population, &mut self.rng);
                let mut offspring1 = self.population[i1].clone();
                let mut offspring2 = self.population[i2].clone();

                if self.rng.r#gen::<f64>() <= self.config.operators.crossover_rate
                    && let Err(err) = self.crossover.cross_over(
                        &mut offspring1,
                        &mut offspring2,
                        &mut self.rng,
                        max_tests,
                    )
                {
                    failures += 1;
                    debug!("Crossover failed: {err}");
                    if failures >= self.config.operators.max_construction_attempts {
                        warn!(
                            "Gave up after {failures} failed offspring constructions, \
                             filling generation {birth} with parents"
                        );
                        while next.len() < size {
                            let i = self.selection.select(&self.population, &mut self.rng);
                            next.push(self.population[i].clone());
                        }
                    }
                    continue;
                }

                for (mut offspring, parent) in [(offspring1, i1), (offspring2, i2)] {
                    offspring.mutate(&mut self.rng, &ctx, &factory);
                    if offspring.is_changed() {
                        offspring.set_birth(birth);
                    }
                    if self.bloat.is_too_long(&offspring) {
                        next.push(self.population[parent].clone());
                    } else {
                        next.push(offspring);
                    }
                }
            }
        }

        next.truncate(size);
        self.population = next;
        self.update_fitness_functions_and_values()?;
        self.generation += 1;
        self.stopping.iteration();
        Ok(())
    }

    /// Retire goals covered in the last generation and re-score the
    /// population if that changed anything.
    fn update_fitness_functions_and_values(&mut self) -> Result<(), SearchError> {
        let removed = self.evaluator.update_covered_goals()?;
        if removed > 0 || self.context.archive.has_been_updated() {
            self.evaluate(true)?;
            self.context.archive.reset();
        }
        Ok(())
    }

    /// Score individuals. Test execution runs in parallel; aggregation and
    /// archive updates run sequentially in population order.
    fn evaluate(&mut self, force: bool) -> Result<(), SearchError> {
        if self.config.execution.parallel {
            let evaluator = &self.evaluator;
            self.population
                .par_iter_mut()
                .filter(|suite| force || suite.is_changed())
                .for_each(|suite| evaluator.run_tests(suite));
        }

        for suite in &mut self.population {
            if force || suite.is_changed() {
                self.evaluator.fitness(suite, &mut self.context.archive)?;
                self.stopping.fitness_evaluation();
            }
        }
        Ok(())
    }

    /// Evaluate changed individuals and sort best first.
    pub fn calculate_fitness_and_sort(&mut self) -> Result<(), SearchError> {
        self.evaluate(false)?;
        self.sort_population();
        if let Some(best) = self.population.first() {
            self.stopping.best_fitness(best.fitness());
        }
        Ok(())
    }

    fn sort_population(&mut self) {
        let ranking = &self.ranking;
        self.population.sort_by(|a, b| ranking.compare(a, b));
    }

    fn is_sorted(&self) -> bool {
        self.population
            .windows(2)
            .all(|pair| !self.ranking.is_better(&pair[1], &pair[0]))
    }

    fn should_apply_local_search(&mut self) -> bool {
        let rate = self.config.local_search.rate;
        rate > 0
            && self.generation % rate == 0
            && self.rng.r#gen::<f64>() <= self.local_search_probability
    }

    /// Run the local search hook over the population and adapt how often it
    /// is applied.
    pub fn apply_local_search(&mut self) -> Result<(), SearchError> {
        if !self.should_apply_local_search() {
            return Ok(());
        }
        debug!("Applying local search");

        let mut improvement = false;
        for suite in &mut self.population {
            if self.stopping.is_finished().is_some() {
                break;
            }
            if self.local_search.improve(suite, &mut self.rng) {
                improvement = true;
            }
        }

        let rate = self.config.local_search.adaptation_rate;
        self.local_search_probability = if improvement {
            (self.local_search_probability * rate).min(1.0)
        } else {
            (self.local_search_probability / rate).max(f64::MIN_POSITIVE)
        };
        debug!(
            "Local search probability now {:.4}",
            self.local_search_probability
        );

        if improvement {
            self.evaluate(false)?;
            if !self.is_sorted() {
                self.sort_population();
            }
        }
        Ok(())
    }

    /// Toggle the first secondary objective by progress or starvation.
    fn update_secondary_criterion(&mut self) {
        if self.ranking.len() < 2 {
            return;
        }
        let starvation_policy = self.config.secondary.starvation;
        if self.secondary_enable_after > 0.0 {
            if self.stopping.progress() * 100.0 > self.secondary_enable_after {
                if starvation_policy {
                    self.update_secondary_starvation();
                } else {
                    self.ranking.enable_first();
                    info!("First secondary objective enabled");
                    self.secondary_enable_after = 0.0;
                }
            }
        } else if starvation_policy {
            self.update_secondary_starvation();
        }
    }

    fn update_secondary_starvation(&mut self) {
        let threshold = self.config.secondary.starvation_after_generation;
        if self.starvation > threshold && !self.ranking.is_first_enabled() {
            self.ranking.enable_first();
            info!(
                "First secondary objective enabled after {} starved generations",
                self.starvation
            );
        } else if self.starvation == 0 && self.ranking.is_first_enabled() {
            self.ranking.disable_first();
            info!("First secondary objective disabled");
        }
    }

    /// Reason to stop, if any condition fired.
    pub fn is_finished(&self) -> Option<StopReason> {
        self.stopping.is_finished()
    }

    /// Best individual by fitness, ties broken by the secondary objectives.
    pub fn best_individual(&self) -> Option<&TestSuiteChromosome> {
        self.population
            .iter()
            .min_by(|a, b| self.ranking.compare(a, b))
    }

    fn best_fitness(&self) -> f64 {
        self.best_individual()
            .map_or(f64::INFINITY, TestSuiteChromosome::fitness)
    }

    fn record_history(&mut self) {
        let best = self.best_individual();
        let best_fitness = best.map_or(f64::INFINITY, TestSuiteChromosome::fitness);
        let best_coverage = best.map_or(0.0, TestSuiteChromosome::coverage);
        let avg_fitness = self.average_fitness();
        let active = self.evaluator.active_goals();

        self.history.best_fitness.push(best_fitness);
        self.history.best_coverage.push(best_coverage);
        self.history.avg_fitness.push(avg_fitness);
        self.history.active_goals.push(active);
    }

    fn average_fitness(&self) -> f64 {
        let finite: Vec<f64> = self
            .population
            .iter()
            .map(TestSuiteChromosome::fitness)
            .filter(|f| f.is_finite())
            .collect();
        if finite.is_empty() {
            0.0
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        }
    }

    /// Get current progress.
    pub fn progress(&self) -> SearchProgress {
        let best = self.best_individual();
        SearchProgress {
            generation: self.generation,
            phase: self.phase,
            progress: self.stopping.progress().min(1.0),
            best_fitness: best.map_or(f64::INFINITY, TestSuiteChromosome::fitness),
            best_coverage: best.map_or(0.0, TestSuiteChromosome::coverage),
            avg_fitness: self.average_fitness(),
            covered_goals: best
                .and_then(TestSuiteChromosome::evaluation)
                .map_or(0, |e| e.covered_goals),
            total_goals: self.evaluator.total_goals(),
            fitness_evaluations: self.evaluator.evaluations(),
            starvation: self.starvation,
        }
    }

    /// Run the search to completion (blocking).
    pub fn generate_solution(&mut self) -> Result<SearchResult, SearchError> {
        self.run_with_callback(|_| {})
    }

    /// Run the search with a progress callback invoked once per generation.
    pub fn run_with_callback<F>(&mut self, callback: F) -> Result<SearchResult, SearchError>
    where
        F: Fn(&SearchProgress),
    {
        if self.secondary_enable_after > 0.0 || self.config.secondary.starvation {
            self.ranking.disable_first();
        }

        if self.population.is_empty() {
            info!(
                "Starting search over {} goals with {} individuals",
                self.evaluator.total_goals(),
                self.config.population.size
            );
            self.initialize_population()?;
            callback(&self.progress());
        }
        self.phase = SearchPhase::Evolving;

        let mut last_best = self.best_fitness();
        self.starvation = 0;

        let stop_reason = loop {
            if let Some(reason) = self.is_finished() {
                break reason;
            }

            self.evolve()?;
            self.calculate_fitness_and_sort()?;
            self.apply_local_search()?;

            let best = self.best_fitness();
            if best == last_best {
                self.starvation += 1;
            } else {
                if self.starvation > 0 {
                    debug!("Reset starvation after {} generations", self.starvation);
                }
                self.starvation = 0;
                last_best = best;
            }
            self.update_secondary_criterion();
            self.record_history();

            debug!(
                "Generation {}: best fitness {:.4}, coverage {:.1}%, {} goals active",
                self.generation,
                best,
                self.progress().best_coverage * 100.0,
                self.evaluator.active_goals()
            );
            callback(&self.progress());
        };

        self.phase = SearchPhase::Finished;
        let result = self.finish(stop_reason)?;
        callback(&self.progress());
        Ok(result)
    }

    /// Merge archived witnesses into the best suite and report.
    fn finish(&mut self, stop_reason: StopReason) -> Result<SearchResult, SearchError> {
        self.evaluator.update_covered_goals()?;

        let mut best = self.best_individual().cloned().unwrap_or_default();
        if self.config.fitness.archive {
            best = self.context.archive.merge_archive_and_solution(&best);
        }
        let fitness = self.evaluator.fitness(&mut best, &mut self.context.archive)?;
        let uncovered_goals = self.uncovered_goals(&best);

        let total_goals = self.evaluator.total_goals();
        let covered_goals = total_goals - uncovered_goals.len();
        let coverage = if total_goals == 0 {
            1.0
        } else {
            covered_goals as f64 / total_goals as f64
        };
        let elapsed_seconds = self
            .started
            .map_or(0.0, |started| started.elapsed().as_secs_f64());

        info!(
            "Search finished after {} generations ({stop_reason:?}): {covered_goals}/{total_goals} goals, {} tests",
            self.generation,
            best.size()
        );

        Ok(SearchResult {
            tests: best.tests().iter().map(|t| t.test().clone()).collect(),
            uncovered_goals,
            stats: SearchStats {
                generations: self.generation,
                fitness_evaluations: self.evaluator.evaluations(),
                best_fitness: fitness,
                coverage,
                covered_goals,
                total_goals,
                archived_goals: self.context.archive.number_of_covered_targets(),
                elapsed_seconds,
                stop_reason,
            },
            history: self.history.clone(),
        })
    }

    /// Goals neither archived nor covered by a reliable result of `suite`.
    fn uncovered_goals(&self, suite: &TestSuiteChromosome) -> Vec<Goal> {
        let registry = &self.context.registry;
        let calculator = DistanceCalculator::new(registry);
        registry
            .goals()
            .into_iter()
            .filter(|goal| {
                !self.context.archive.is_covered(goal)
                    && !suite.tests().iter().any(|test| {
                        test.last_execution_result().is_some_and(|result| {
                            !result.is_unreliable() && calculator.distance(result, goal).is_zero()
                        })
                    })
            })
            .collect()
    }

    /// Whether the cancel handle was triggered.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
