//! Branch coverage fitness of a whole test suite.
//!
//! Lower is better and zero means every goal is covered. Goals banked in the
//! archive are removed from scoring between generations and from then on
//! always count as covered.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use log::{debug, trace};

use crate::executor::{CancellationToken, Executor};
use crate::schema::{BranchId, ExecutionResult, FitnessConfig, Goal, MethodKey, SearchConfig};

use super::SearchError;
use super::archive::CoverageArchive;
use super::chromosome::{SuiteEvaluation, TestSuiteChromosome};
use super::distance::{DistanceCalculator, normalize};
use super::registry::GoalRegistry;

/// Per-branch aggregates over the reliable results of one suite.
#[derive(Debug, Default)]
struct SuiteTrace {
    predicate_count: BTreeMap<BranchId, usize>,
    true_distance: BTreeMap<BranchId, f64>,
    false_distance: BTreeMap<BranchId, f64>,
    called: BTreeSet<MethodKey>,
    unreliable: bool,
}

/// Scores suites against the goals of one registry and feeds the archive.
pub struct SuiteFitnessEvaluator {
    registry: Arc<GoalRegistry>,
    executor: Arc<dyn Executor>,
    timeout: Duration,
    interrupt: Arc<AtomicBool>,
    config: FitnessConfig,

    total_goals: usize,
    /// Methods that still count as a missing call when not invoked.
    methods: BTreeSet<MethodKey>,
    /// Scored branches with at least one outcome not yet archived.
    branch_ids: BTreeSet<BranchId>,
    branches_by_method: BTreeMap<MethodKey, Vec<BranchId>>,
    true_goals: BTreeMap<BranchId, Goal>,
    false_goals: BTreeMap<BranchId, Goal>,
    root_goals: BTreeMap<MethodKey, Goal>,

    to_remove_true: BTreeSet<BranchId>,
    to_remove_false: BTreeSet<BranchId>,
    to_remove_root: BTreeSet<MethodKey>,
    removed_true: BTreeSet<BranchId>,
    removed_false: BTreeSet<BranchId>,
    removed_root: BTreeSet<MethodKey>,

    evaluations: u64,
}

impl SuiteFitnessEvaluator {
    pub fn new(
        registry: Arc<GoalRegistry>,
        executor: Arc<dyn Executor>,
        config: &SearchConfig,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        let mut evaluator = Self {
            registry: Arc::clone(&registry),
            executor,
            timeout: Duration::from_millis(config.execution.timeout_ms),
            interrupt,
            config: config.fitness.clone(),
            total_goals: 0,
            methods: BTreeSet::new(),
            branch_ids: BTreeSet::new(),
            branches_by_method: BTreeMap::new(),
            true_goals: BTreeMap::new(),
            false_goals: BTreeMap::new(),
            root_goals: BTreeMap::new(),
            to_remove_true: BTreeSet::new(),
            to_remove_false: BTreeSet::new(),
            to_remove_root: BTreeSet::new(),
            removed_true: BTreeSet::new(),
            removed_false: BTreeSet::new(),
            removed_root: BTreeSet::new(),
            evaluations: 0,
        };

        for goal in registry.goals() {
            match &goal {
                Goal::Root(root) => {
                    let method = MethodKey::new(&root.class_name, &root.method_name);
                    evaluator.methods.insert(method.clone());
                    evaluator.root_goals.insert(method, goal);
                }
                Goal::Branch(branch) => {
                    let method = MethodKey::new(&branch.class_name, &branch.method_name);
                    evaluator.methods.insert(method.clone());
                    evaluator.branch_ids.insert(branch.branch);
                    let ids = evaluator.branches_by_method.entry(method).or_default();
                    if !ids.contains(&branch.branch) {
                        ids.push(branch.branch);
                    }
                    if branch.value {
                        evaluator.true_goals.insert(branch.branch, goal);
                    } else {
                        evaluator.false_goals.insert(branch.branch, goal);
                    }
                }
            }
        }
        evaluator.total_goals =
            evaluator.true_goals.len() + evaluator.false_goals.len() + evaluator.root_goals.len();

        debug!(
            "Fitness over {} goals: {} branches, {} methods",
            evaluator.total_goals,
            evaluator.branch_ids.len(),
            evaluator.methods.len()
        );
        evaluator
    }

    /// Every goal this evaluator scores, for archive registration.
    pub fn goals(&self) -> Vec<Goal> {
        self.root_goals
            .values()
            .chain(self.true_goals.values())
            .chain(self.false_goals.values())
            .cloned()
            .collect()
    }

    pub fn total_goals(&self) -> usize {
        self.total_goals
    }

    /// Goals still scored, i.e. not yet archived.
    pub fn active_goals(&self) -> usize {
        self.root_goals.len() + self.true_goals.len() + self.false_goals.len()
    }

    pub fn uncovered_goals(&self) -> Vec<Goal> {
        self.goals()
    }

    pub fn archived_goals(&self) -> usize {
        self.removed_root.len() + self.removed_true.len() + self.removed_false.len()
    }

    pub fn is_maximization(&self) -> bool {
        false
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Fitness of a suite that timed out or hit a harness exception.
    pub fn ceiling(&self) -> f64 {
        (2 * self.branch_ids.len() + self.methods.len()) as f64
    }

    /// Execute every test whose cached result is stale. Safe to call from
    /// several threads on different suites. Results of interrupted runs are
    /// not cached.
    pub fn run_tests(&self, suite: &mut TestSuiteChromosome) {
        for test in suite.tests_mut() {
            if test.last_execution_result().is_some() {
                continue;
            }
            let token = CancellationToken::with_interrupt(Arc::clone(&self.interrupt))
                .with_timeout(self.timeout);
            let result = self.executor.execute(test.test(), &token);
            if result.was_cancelled() {
                continue;
            }
            test.set_last_execution_result(result);
        }
    }

    /// Score `suite`, store the evaluation on it and offer covering tests to
    /// the archive.
    pub fn fitness(
        &mut self,
        suite: &mut TestSuiteChromosome,
        archive: &mut CoverageArchive,
    ) -> Result<f64, SearchError> {
        self.run_tests(suite);
        self.evaluations += 1;

        let registry = Arc::clone(&self.registry);
        let calculator = DistanceCalculator::new(&registry);
        let mut aggregate = SuiteTrace::default();

        for test in suite.tests() {
            let Some(result) = test.last_execution_result() else {
                aggregate.unreliable = true;
                continue;
            };
            if result.is_unreliable() {
                aggregate.unreliable = true;
                continue;
            }
            self.collect(result, &mut aggregate);

            for method in result.trace.method_call_count.keys() {
                if let Some(goal) = self.root_goals.get(method)
                    && calculator.distance(result, goal).is_zero()
                {
                    self.to_remove_root.insert(method.clone());
                    if self.config.archive {
                        archive.update_archive(goal, test, 0.0);
                    }
                }
            }
            for id in result.trace.predicate_execution_count.keys() {
                for (goals, queue) in [
                    (&self.true_goals, &mut self.to_remove_true),
                    (&self.false_goals, &mut self.to_remove_false),
                ] {
                    let Some(goal) = goals.get(id) else {
                        continue;
                    };
                    let distance = calculator.distance(result, goal);
                    if distance.is_zero() {
                        queue.insert(*id);
                    }
                    if self.config.archive {
                        archive.update_archive(goal, test, distance.resulting_fitness());
                    }
                }
            }
        }

        let (mut fitness, covered) = self.score(&aggregate);
        let covered = if aggregate.unreliable {
            fitness = self.ceiling();
            self.archived_goals()
        } else {
            covered
        };

        self.check_invariants(fitness, covered)?;

        let coverage = if self.total_goals == 0 {
            1.0
        } else {
            covered as f64 / self.total_goals as f64
        };
        trace!(
            "Suite of {} tests: fitness {fitness:.4}, {covered}/{} goals",
            suite.size(),
            self.total_goals
        );
        suite.set_evaluation(SuiteEvaluation {
            fitness,
            coverage,
            covered_goals: covered,
            uncovered_goals: self.total_goals - covered,
        });
        Ok(fitness)
    }

    fn collect(&self, result: &ExecutionResult, aggregate: &mut SuiteTrace) {
        let trace = &result.trace;
        for (method, &count) in &trace.method_call_count {
            if count > 0 && self.methods.contains(method) {
                aggregate.called.insert(method.clone());
            }
        }
        for (id, &count) in &trace.predicate_execution_count {
            if !self.branch_ids.contains(id) {
                continue;
            }
            *aggregate.predicate_count.entry(*id).or_insert(0) += count;
            if self.true_goals.contains_key(id)
                && let Some(&d) = trace.true_distance.get(id)
            {
                let slot = aggregate.true_distance.entry(*id).or_insert(f64::INFINITY);
                *slot = slot.min(d);
            }
            if self.false_goals.contains_key(id)
                && let Some(&d) = trace.false_distance.get(id)
            {
                let slot = aggregate.false_distance.entry(*id).or_insert(f64::INFINITY);
                *slot = slot.min(d);
            }
        }
    }

    /// Raw fitness and covered goal count of reliable results.
    fn score(&self, aggregate: &SuiteTrace) -> (f64, usize) {
        let mut fitness = 0.0;
        let mut covered = 0;

        for (id, &count) in &aggregate.predicate_count {
            let executed = count
                + usize::from(self.removed_true.contains(id))
                + usize::from(self.removed_false.contains(id));
            let side = |active: bool, distances: &BTreeMap<BranchId, f64>| -> f64 {
                if !active {
                    0.0
                } else {
                    distances.get(id).copied().unwrap_or(f64::INFINITY)
                }
            };
            let dt = side(self.true_goals.contains_key(id), &aggregate.true_distance);
            let df = side(self.false_goals.contains_key(id), &aggregate.false_distance);

            fitness += if executed == 1 {
                self.config.single_execution_penalty
            } else {
                normalize(dt) + normalize(df)
            };
            covered += usize::from(self.true_goals.contains_key(id) && dt == 0.0);
            covered += usize::from(self.false_goals.contains_key(id) && df == 0.0);
        }

        fitness += 2.0 * (self.branch_ids.len() - aggregate.predicate_count.len()) as f64;
        fitness += self
            .methods
            .iter()
            .filter(|m| !aggregate.called.contains(*m))
            .count() as f64;

        covered += self
            .root_goals
            .keys()
            .filter(|m| aggregate.called.contains(*m))
            .count();
        covered += self.archived_goals();
        (fitness, covered)
    }

    fn check_invariants(&self, fitness: f64, covered: usize) -> Result<(), SearchError> {
        if !(fitness >= 0.0) {
            return Err(SearchError::NegativeFitness(fitness));
        }
        if covered > self.total_goals {
            return Err(SearchError::CoverageOverflow {
                covered,
                total: self.total_goals,
            });
        }
        if (fitness == 0.0) != (covered == self.total_goals) {
            return Err(SearchError::InconsistentFitness {
                fitness,
                covered,
                total: self.total_goals,
            });
        }
        Ok(())
    }

    /// Move goals covered since the last call out of scoring. Returns the
    /// number of goals removed.
    pub fn update_covered_goals(&mut self) -> Result<usize, SearchError> {
        let to_remove_root = std::mem::take(&mut self.to_remove_root);
        let to_remove_true = std::mem::take(&mut self.to_remove_true);
        let to_remove_false = std::mem::take(&mut self.to_remove_false);
        if !self.config.archive {
            return Ok(0);
        }

        let mut removed = 0;
        for method in to_remove_root {
            if self.root_goals.remove(&method).is_none() {
                return Err(SearchError::ArchiveDesync(format!("root goal {method}")));
            }
            self.methods.remove(&method);
            self.removed_root.insert(method);
            removed += 1;
        }
        for id in to_remove_true {
            let goal = self
                .true_goals
                .remove(&id)
                .ok_or_else(|| SearchError::ArchiveDesync(format!("branch {id} (true)")))?;
            self.removed_true.insert(id);
            if self.removed_false.contains(&id) {
                self.retire_branch(id, &goal);
            }
            removed += 1;
        }
        for id in to_remove_false {
            let goal = self
                .false_goals
                .remove(&id)
                .ok_or_else(|| SearchError::ArchiveDesync(format!("branch {id} (false)")))?;
            self.removed_false.insert(id);
            if self.removed_true.contains(&id) {
                self.retire_branch(id, &goal);
            }
            removed += 1;
        }

        if removed > 0 {
            debug!(
                "Archived {removed} goals, {} of {} still active",
                self.active_goals(),
                self.total_goals
            );
        }
        Ok(removed)
    }

    /// Both outcomes of `id` are archived. Its method stops counting once
    /// all of its branches are retired.
    fn retire_branch(&mut self, id: BranchId, goal: &Goal) {
        self.branch_ids.remove(&id);
        let method = goal.method_key();
        let done = self
            .branches_by_method
            .get(&method)
            .is_none_or(|ids| ids.iter().all(|b| !self.branch_ids.contains(b)));
        if done {
            self.methods.remove(&method);
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_removal(&mut self, id: BranchId, value: bool) {
        if value {
            self.to_remove_true.insert(id);
        } else {
            self.to_remove_false.insert(id);
        }
    }
}
