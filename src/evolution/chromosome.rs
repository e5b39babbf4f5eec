//! Test and test suite chromosomes with their variation operators.
//!
//! Test cases are shared copy-on-write between clones. Every structural
//! change bumps a version counter, and cached execution results and suite
//! evaluations are tagged with the version they were computed for.

use std::sync::Arc;

use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use crate::schema::{
    ExecutionResult, OperatorConfig, ParamKind, Statement, TestCase, TestCluster, Value,
};

use super::factory::TestFactory;

/// An operator could not build a valid offspring. Recovered by the driver.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Could not construct offspring: {0}")]
pub struct ConstructionFailed(pub String);

/// Settings and callable methods used by mutation.
#[derive(Debug, Clone, Copy)]
pub struct MutationContext<'a> {
    pub operators: &'a OperatorConfig,
    pub cluster: &'a TestCluster,
    pub max_tests: usize,
}

/// Draw a fresh literal of the given kind.
pub fn random_value(kind: ParamKind, rng: &mut StdRng, operators: &OperatorConfig) -> Value {
    match kind {
        ParamKind::Int => {
            let bound = operators.max_int.max(0);
            Value::Int(rng.gen_range(-bound..=bound))
        }
        ParamKind::Bool => Value::Bool(rng.gen_bool(0.5)),
    }
}

/// Insert a call to a random method of the cluster at `position`, creating
/// or reusing primitive arguments. Returns the number of inserted statements.
pub fn insert_random_call(
    test: &mut TestCase,
    position: usize,
    rng: &mut StdRng,
    ctx: &MutationContext<'_>,
) -> Result<usize, ConstructionFailed> {
    let method = ctx
        .cluster
        .methods()
        .choose(rng)
        .ok_or_else(|| ConstructionFailed("no callable methods".to_string()))?;
    let position = position.min(test.len());

    let mut block = Vec::with_capacity(method.params.len() + 1);
    let mut args = Vec::with_capacity(method.params.len());
    for &kind in &method.params {
        let existing = test.primitive_positions(position, kind);
        if let Some(&reused) = existing.choose(rng)
            && rng.gen_bool(0.5)
        {
            args.push(reused);
        } else {
            args.push(position + block.len());
            block.push(Statement::primitive(random_value(kind, rng, ctx.operators)));
        }
    }
    block.push(Statement::call(&method.class_name, &method.method_name, args));

    let inserted = block.len();
    test.insert_block(position, block);
    Ok(inserted)
}

#[derive(Debug, Clone)]
struct CachedResult {
    version: u64,
    result: Arc<ExecutionResult>,
}

/// A single test case under evolution.
#[derive(Debug, Clone)]
pub struct TestChromosome {
    test: Arc<TestCase>,
    version: u64,
    last_result: Option<CachedResult>,
}

impl TestChromosome {
    pub fn new(test: TestCase) -> Self {
        Self {
            test: Arc::new(test),
            version: 0,
            last_result: None,
        }
    }

    pub fn test(&self) -> &TestCase {
        &self.test
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test.is_empty()
    }

    /// Result of the last execution, if it was produced by the current version.
    pub fn last_execution_result(&self) -> Option<&ExecutionResult> {
        self.last_result
            .as_ref()
            .filter(|cached| cached.version == self.version)
            .map(|cached| cached.result.as_ref())
    }

    pub fn set_last_execution_result(&mut self, result: ExecutionResult) {
        self.last_result = Some(CachedResult {
            version: self.version,
            result: Arc::new(result),
        });
    }

    pub fn clear_cached_results(&mut self) {
        self.last_result = None;
    }

    fn edit(&mut self) -> &mut TestCase {
        self.version += 1;
        Arc::make_mut(&mut self.test)
    }

    /// Last position worth mutating: the first exception point, or the end.
    fn last_mutatable_position(&self) -> Option<usize> {
        let last = self.len().checked_sub(1)?;
        let exception = self
            .last_execution_result()
            .and_then(ExecutionResult::first_exception_position);
        Some(exception.map_or(last, |position| position.min(last)))
    }

    /// Apply chop, delete, change and insert operators. Returns whether the
    /// test changed.
    pub fn mutate(&mut self, rng: &mut StdRng, ctx: &MutationContext<'_>) -> bool {
        let operators = ctx.operators;
        let mut changed = false;

        if self.len() >= operators.chromosome_length
            && let Some(position) = self
                .last_execution_result()
                .and_then(ExecutionResult::first_exception_position)
            && position + 1 < self.len()
        {
            self.edit().truncate(position + 1);
            changed = true;
        }

        if rng.r#gen::<f64>() < operators.p_test_delete && self.mutation_delete(rng) {
            changed = true;
        }
        if rng.r#gen::<f64>() < operators.p_test_change && self.mutation_change(rng, ctx) {
            changed = true;
        }
        if rng.r#gen::<f64>() < operators.p_test_insert && self.mutation_insert(rng, ctx) {
            changed = true;
        }

        changed
    }

    fn mutation_delete(&mut self, rng: &mut StdRng) -> bool {
        let len = self.len();
        if len == 0 {
            return false;
        }
        let p = 1.0 / len as f64;
        let mut changed = false;
        for position in (0..len).rev() {
            if position < self.len() && rng.r#gen::<f64>() < p {
                self.edit().remove(position);
                changed = true;
            }
        }
        changed
    }

    fn mutation_change(&mut self, rng: &mut StdRng, ctx: &MutationContext<'_>) -> bool {
        let Some(last) = self.last_mutatable_position() else {
            return false;
        };
        let p = 1.0 / (last + 1) as f64;
        let delta = Normal::new(0.0, ctx.operators.primitive_delta.max(1.0)).ok();
        let mut changed = false;

        for position in 0..=last {
            if rng.r#gen::<f64>() >= p {
                continue;
            }
            let Some(statement) = self.test.get(position).cloned() else {
                break;
            };
            let replacement = match &statement {
                Statement::Primitive {
                    value: Value::Int(v),
                } => {
                    let next = match delta {
                        Some(normal) if rng.gen_bool(0.75) => {
                            let step = normal.sample(rng).round() as i64;
                            v.saturating_add(if step == 0 { 1 } else { step })
                        }
                        _ => random_value(ParamKind::Int, rng, ctx.operators).as_i64(),
                    };
                    Statement::primitive(Value::Int(next))
                }
                Statement::Primitive {
                    value: Value::Bool(b),
                } => Statement::primitive(Value::Bool(!b)),
                Statement::Call {
                    class_name,
                    method_name,
                    args,
                } => {
                    if args.is_empty() {
                        continue;
                    }
                    let index = rng.gen_range(0..args.len());
                    let Some(kind) = self.test.get(args[index]).and_then(Statement::value_kind)
                    else {
                        continue;
                    };
                    let candidates: Vec<usize> = self
                        .test
                        .primitive_positions(position, kind)
                        .into_iter()
                        .filter(|&c| c != args[index])
                        .collect();
                    let Some(&rebound) = candidates.choose(rng) else {
                        continue;
                    };
                    let mut args = args.clone();
                    args[index] = rebound;
                    Statement::call(class_name, method_name, args)
                }
            };

            if replacement != statement {
                self.edit().replace(position, replacement);
                changed = true;
            }
        }
        changed
    }

    fn mutation_insert(&mut self, rng: &mut StdRng, ctx: &MutationContext<'_>) -> bool {
        if ctx.cluster.is_empty() {
            return false;
        }
        let alpha = ctx.operators.p_statement_insertion;
        let mut exponent = 1;
        let mut changed = false;

        while self.len() < ctx.operators.chromosome_length
            && rng.r#gen::<f64>() <= alpha.powi(exponent)
        {
            let max_position = self.last_mutatable_position().map_or(0, |p| p + 1);
            let position = rng.gen_range(0..=max_position);
            if insert_random_call(self.edit(), position, rng, ctx).is_err() {
                break;
            }
            changed = true;
            exponent += 1;
        }
        changed
    }

    /// Single-point recombination: the first `cut1` statements of `self`
    /// followed by `other` from `cut2` on.
    ///
    /// Arguments of the tail that pointed into the dropped head of `other`
    /// are rebound to the closest earlier primitive of the same kind.
    pub fn cross_over(
        &self,
        other: &TestChromosome,
        cut1: usize,
        cut2: usize,
    ) -> Result<TestChromosome, ConstructionFailed> {
        if cut1 > self.len() || cut2 > other.len() {
            return Err(ConstructionFailed(format!(
                "cut points {cut1}/{cut2} out of range"
            )));
        }

        let mut test = TestCase::from_statements(self.test.statements()[..cut1].to_vec());
        for (offset, statement) in other.test.statements()[cut2..].iter().enumerate() {
            let position = cut1 + offset;
            let rebuilt = match statement {
                Statement::Primitive { .. } => statement.clone(),
                Statement::Call {
                    class_name,
                    method_name,
                    args,
                } => {
                    let mut rebound = Vec::with_capacity(args.len());
                    for &arg in args {
                        if arg >= cut2 {
                            rebound.push(arg - cut2 + cut1);
                            continue;
                        }
                        let kind = other
                            .test
                            .get(arg)
                            .and_then(Statement::value_kind)
                            .ok_or_else(|| {
                                ConstructionFailed(format!("invalid reference v{arg}"))
                            })?;
                        let candidate = test
                            .primitive_positions(position, kind)
                            .last()
                            .copied()
                            .ok_or_else(|| {
                                ConstructionFailed(format!(
                                    "no {kind:?} value for {class_name}.{method_name}"
                                ))
                            })?;
                        rebound.push(candidate);
                    }
                    Statement::call(class_name, method_name, rebound)
                }
            };
            test.push(rebuilt);
        }

        Ok(TestChromosome::new(test))
    }
}

/// Score of a suite as computed by the suite fitness evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuiteEvaluation {
    pub fitness: f64,
    pub coverage: f64,
    pub covered_goals: usize,
    pub uncovered_goals: usize,
}

/// A candidate test suite.
#[derive(Debug, Clone, Default)]
pub struct TestSuiteChromosome {
    tests: Vec<TestChromosome>,
    version: u64,
    evaluation: Option<(u64, SuiteEvaluation)>,
    birth: usize,
}

impl TestSuiteChromosome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tests(tests: Vec<TestChromosome>) -> Self {
        Self {
            tests,
            ..Self::default()
        }
    }

    pub fn tests(&self) -> &[TestChromosome] {
        &self.tests
    }

    /// Mutable access to the tests. Counts as a change of the suite.
    pub fn tests_mut(&mut self) -> &mut [TestChromosome] {
        self.version += 1;
        &mut self.tests
    }

    pub fn size(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Total number of statements, used by bloat control.
    pub fn total_length(&self) -> usize {
        self.tests.iter().map(TestChromosome::len).sum()
    }

    pub fn add_test(&mut self, test: TestChromosome) {
        self.tests.push(test);
        self.version += 1;
    }

    pub fn contains_test(&self, test: &TestCase) -> bool {
        self.tests.iter().any(|t| t.test() == test)
    }

    /// Advanced by every method that can change the contents.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Evaluation of the current contents, if any.
    pub fn evaluation(&self) -> Option<&SuiteEvaluation> {
        self.evaluation
            .as_ref()
            .filter(|(version, _)| *version == self.version)
            .map(|(_, evaluation)| evaluation)
    }

    pub fn set_evaluation(&mut self, evaluation: SuiteEvaluation) {
        self.evaluation = Some((self.version, evaluation));
    }

    /// Whether the suite needs a fresh evaluation.
    pub fn is_changed(&self) -> bool {
        self.evaluation().is_none()
    }

    /// Cached fitness; unevaluated suites report infinity.
    pub fn fitness(&self) -> f64 {
        self.evaluation().map_or(f64::INFINITY, |e| e.fitness)
    }

    pub fn coverage(&self) -> f64 {
        self.evaluation().map_or(0.0, |e| e.coverage)
    }

    /// Generation in which this individual was produced.
    pub fn birth(&self) -> usize {
        self.birth
    }

    pub fn set_birth(&mut self, generation: usize) {
        self.birth = generation;
    }

    /// Mutate each test with probability 1/size, then append new tests with
    /// exponentially decreasing probability. Empty tests are dropped.
    pub fn mutate(
        &mut self,
        rng: &mut StdRng,
        ctx: &MutationContext<'_>,
        factory: &dyn TestFactory,
    ) -> bool {
        let mut changed = false;

        if !self.tests.is_empty() {
            let p = 1.0 / self.tests.len() as f64;
            for test in &mut self.tests {
                if rng.r#gen::<f64>() < p && test.mutate(rng, ctx) {
                    changed = true;
                }
            }
        }

        let mut exponent = 1;
        while self.tests.len() < ctx.max_tests
            && rng.r#gen::<f64>() <= ctx.operators.p_test_insertion.powi(exponent)
        {
            match factory.get_test(rng) {
                Ok(test) if !test.is_empty() => {
                    self.tests.push(test);
                    changed = true;
                }
                _ => break,
            }
            exponent += 1;
        }

        let before = self.tests.len();
        self.tests.retain(|t| !t.is_empty());
        if self.tests.len() != before {
            changed = true;
        }

        if self.tests.is_empty()
            && let Ok(test) = factory.get_test(rng)
            && !test.is_empty()
        {
            self.tests.push(test);
            changed = true;
        }

        if changed {
            self.version += 1;
        }
        changed
    }

    /// Keep the first `position1` tests and append the tests of `other` from
    /// `position2` on.
    pub fn cross_over(
        &mut self,
        other: &TestSuiteChromosome,
        position1: usize,
        position2: usize,
        max_tests: usize,
    ) -> Result<(), ConstructionFailed> {
        if position1 > self.size() || position2 > other.size() {
            return Err(ConstructionFailed(format!(
                "split points {position1}/{position2} out of range"
            )));
        }
        let mut tests = self.tests[..position1].to_vec();
        tests.extend_from_slice(&other.tests[position2..]);
        if tests.is_empty() {
            return Err(ConstructionFailed("offspring suite is empty".to_string()));
        }
        if tests.len() > max_tests {
            return Err(ConstructionFailed(format!(
                "offspring suite has {} tests, limit is {max_tests}",
                tests.len()
            )));
        }
        self.tests = tests;
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CallableMethod, ExceptionKind};

    fn cluster() -> TestCluster {
        TestCluster::new(vec![
            CallableMethod {
                class_name: "Calc".to_string(),
                method_name: "abs".to_string(),
                params: vec![ParamKind::Int],
            },
            CallableMethod {
                class_name: "Calc".to_string(),
                method_name: "pick".to_string(),
                params: vec![ParamKind::Int, ParamKind::Bool],
            },
        ])
    }

    fn sample_test() -> TestChromosome {
        TestChromosome::new(TestCase::from_statements(vec![
            Statement::primitive(Value::Int(3)),
            Statement::call("Calc", "abs", vec![0]),
            Statement::primitive(Value::Int(-4)),
            Statement::primitive(Value::Bool(true)),
            Statement::call("Calc", "pick", vec![2, 3]),
        ]))
    }

    struct NoTests;

    impl TestFactory for NoTests {
        fn get_test(&self, _rng: &mut StdRng) -> Result<TestChromosome, ConstructionFailed> {
            Err(ConstructionFailed("disabled".to_string()))
        }
    }

    #[test]
    fn test_mutation_invalidates_cached_result() {
        let operators = OperatorConfig::default();
        let cluster = cluster();
        let ctx = MutationContext {
            operators: &operators,
            cluster: &cluster,
            max_tests: 10,
        };
        let mut rng = StdRng::seed_from_u64(42);

        let mut test = sample_test();
        test.set_last_execution_result(ExecutionResult::default());
        assert!(test.last_execution_result().is_some());

        let clone = test.clone();
        let mut changed = false;
        for _ in 0..50 {
            changed |= test.mutate(&mut rng, &ctx);
            if changed {
                break;
            }
        }

        assert!(changed);
        assert!(test.last_execution_result().is_none());
        assert!(test.test().is_valid());
        // The clone is untouched and keeps its cache.
        assert_eq!(clone.test(), sample_test().test());
        assert!(clone.last_execution_result().is_some());
    }

    #[test]
    fn test_mutation_keeps_tests_valid() {
        let operators = OperatorConfig {
            p_test_delete: 1.0,
            p_test_change: 1.0,
            p_test_insert: 1.0,
            ..Default::default()
        };
        let cluster = cluster();
        let ctx = MutationContext {
            operators: &operators,
            cluster: &cluster,
            max_tests: 10,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut test = sample_test();

        for _ in 0..200 {
            test.mutate(&mut rng, &ctx);
            assert!(test.test().is_valid());
            assert!(test.len() <= operators.chromosome_length + 3);
        }
    }

    #[test]
    fn test_long_test_chopped_at_exception() {
        let operators = OperatorConfig {
            chromosome_length: 5,
            p_test_delete: 0.0,
            p_test_change: 0.0,
            p_test_insert: 0.0,
            ..Default::default()
        };
        let cluster = cluster();
        let ctx = MutationContext {
            operators: &operators,
            cluster: &cluster,
            max_tests: 10,
        };
        let mut rng = StdRng::seed_from_u64(1);

        let mut test = sample_test();
        let mut result = ExecutionResult::default();
        result.report_exception(1, ExceptionKind::Sut, "boom");
        test.set_last_execution_result(result);

        assert!(test.mutate(&mut rng, &ctx));
        assert_eq!(test.len(), 2);
    }

    #[test]
    fn test_cross_over_rebinds_arguments() {
        let head = TestChromosome::new(TestCase::from_statements(vec![
            Statement::primitive(Value::Bool(false)),
            Statement::primitive(Value::Int(9)),
        ]));
        let tail = sample_test();

        // The call to pick referenced v2 and v3 of the tail's dropped head.
        let offspring = head.cross_over(&tail, 2, 4).unwrap();
        assert_eq!(offspring.len(), 3);
        assert!(offspring.test().is_valid());
        assert_eq!(
            offspring.test().get(2),
            Some(&Statement::call("Calc", "pick", vec![1, 0]))
        );
    }

    #[test]
    fn test_cross_over_fails_without_matching_value() {
        let head = sample_test();
        let tail = sample_test();

        // The call to pick needs a bool; the head has none.
        let result = head.cross_over(&tail, 2, 4);
        assert!(result.is_err());
    }

    #[test]
    fn test_suite_cross_over_and_versioning() {
        let mut a = TestSuiteChromosome::from_tests(vec![sample_test(), sample_test()]);
        let b = TestSuiteChromosome::from_tests(vec![sample_test(); 3]);
        a.set_evaluation(SuiteEvaluation {
            fitness: 1.0,
            coverage: 0.5,
            covered_goals: 1,
            uncovered_goals: 1,
        });
        assert!(!a.is_changed());

        a.cross_over(&b, 1, 1, 10).unwrap();
        assert_eq!(a.size(), 3);
        assert!(a.is_changed());
        assert_eq!(a.fitness(), f64::INFINITY);

        assert!(a.cross_over(&b, 3, 0, 4).is_err());
        assert!(a.cross_over(&b, 0, 3, 10).is_err());
    }

    #[test]
    fn test_cross_over_detected_with_equal_version_sums() {
        let literal = |value| {
            TestChromosome::new(TestCase::from_statements(vec![Statement::primitive(
                Value::Int(value),
            )]))
        };
        let mut kept = literal(1);
        kept.version = 2;
        let mut swapped = literal(99);
        swapped.version = 1;

        let mut a = TestSuiteChromosome::from_tests(vec![literal(0), kept]);
        let b = TestSuiteChromosome::from_tests(vec![literal(5), swapped]);
        a.set_evaluation(SuiteEvaluation {
            fitness: 0.0,
            coverage: 1.0,
            covered_goals: 2,
            uncovered_goals: 0,
        });

        a.cross_over(&b, 1, 1, 10).unwrap();
        assert_eq!(
            a.tests()[1].test().get(0),
            Some(&Statement::primitive(Value::Int(99)))
        );
        assert!(a.is_changed());
        assert_eq!(a.fitness(), f64::INFINITY);
    }

    #[test]
    fn test_suite_version_advances_on_every_edit() {
        let mut suite = TestSuiteChromosome::from_tests(vec![sample_test()]);
        let start = suite.version();

        suite.add_test(sample_test());
        let after_add = suite.version();
        assert!(after_add > start);

        let _ = suite.tests_mut();
        assert!(suite.version() > after_add);
    }

    #[test]
    fn test_test_mutation_through_suite_is_detected() {
        let operators = OperatorConfig {
            p_test_delete: 1.0,
            ..Default::default()
        };
        let cluster = cluster();
        let ctx = MutationContext {
            operators: &operators,
            cluster: &cluster,
            max_tests: 10,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let mut suite = TestSuiteChromosome::from_tests(vec![sample_test()]);
        suite.set_evaluation(SuiteEvaluation {
            fitness: 0.0,
            coverage: 1.0,
            covered_goals: 2,
            uncovered_goals: 0,
        });

        let mut changed = false;
        for _ in 0..50 {
            changed |= suite.tests_mut()[0].mutate(&mut rng, &ctx);
            if changed {
                break;
            }
        }
        assert!(changed);
        assert!(suite.is_changed());
    }

    #[test]
    fn test_suite_mutation_drops_empty_tests() {
        let operators = OperatorConfig::default();
        let cluster = cluster();
        let ctx = MutationContext {
            operators: &operators,
            cluster: &cluster,
            max_tests: 10,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut suite = TestSuiteChromosome::from_tests(vec![
            TestChromosome::new(TestCase::new()),
            sample_test(),
        ]);

        assert!(suite.mutate(&mut rng, &ctx, &NoTests));
        assert!(suite.tests().iter().all(|t| !t.is_empty()));
        assert!(suite.size() <= 1);
    }
}
