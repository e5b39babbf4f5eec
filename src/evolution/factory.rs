//! Factories for random tests and suites.

use std::sync::Arc;

use log::debug;
use rand::prelude::*;

use crate::schema::{OperatorConfig, TestCase, TestCluster};

use super::archive::CoverageArchive;
use super::chromosome::{
    ConstructionFailed, MutationContext, TestChromosome, TestSuiteChromosome, insert_random_call,
};

/// Source of new test chromosomes.
pub trait TestFactory {
    fn get_test(&self, rng: &mut StdRng) -> Result<TestChromosome, ConstructionFailed>;
}

/// Tests of uniformly random length between 1 and the chromosome length.
#[derive(Debug, Clone)]
pub struct RandomLengthTestFactory {
    cluster: Arc<TestCluster>,
    operators: OperatorConfig,
    max_tests: usize,
}

impl RandomLengthTestFactory {
    pub fn new(cluster: Arc<TestCluster>, operators: OperatorConfig, max_tests: usize) -> Self {
        Self {
            cluster,
            operators,
            max_tests,
        }
    }

    /// Mutation context over the same cluster and operator settings.
    pub fn context(&self) -> MutationContext<'_> {
        MutationContext {
            operators: &self.operators,
            cluster: &self.cluster,
            max_tests: self.max_tests,
        }
    }
}

impl TestFactory for RandomLengthTestFactory {
    fn get_test(&self, rng: &mut StdRng) -> Result<TestChromosome, ConstructionFailed> {
        if self.cluster.is_empty() {
            return Err(ConstructionFailed("no callable methods".to_string()));
        }
        let length = rng.gen_range(1..=self.operators.chromosome_length);
        let ctx = self.context();
        let mut test = TestCase::new();
        while test.len() < length {
            let end = test.len();
            insert_random_call(&mut test, end, rng, &ctx)?;
        }
        Ok(TestChromosome::new(test))
    }
}

/// Seeds new tests from archived witnesses.
///
/// With probability `seed_clone` a random witness is cloned and mutated a
/// random number of times; otherwise the base factory is used.
pub struct ArchiveTestFactory<'a> {
    base: &'a RandomLengthTestFactory,
    archive: &'a CoverageArchive,
    seed_clone: f64,
    seed_mutations: usize,
}

impl<'a> ArchiveTestFactory<'a> {
    pub fn new(
        base: &'a RandomLengthTestFactory,
        archive: &'a CoverageArchive,
        seed_clone: f64,
        seed_mutations: usize,
    ) -> Self {
        Self {
            base,
            archive,
            seed_clone,
            seed_mutations,
        }
    }
}

impl TestFactory for ArchiveTestFactory<'_> {
    fn get_test(&self, rng: &mut StdRng) -> Result<TestChromosome, ConstructionFailed> {
        if rng.r#gen::<f64>() < self.seed_clone
            && let Some(mut test) = self.archive.random_solution(rng)
        {
            let ctx = self.base.context();
            let mutations = rng.gen_range(0..=self.seed_mutations);
            for _ in 0..mutations {
                test.mutate(rng, &ctx);
            }
            if !test.is_empty() {
                return Ok(test);
            }
        }
        self.base.get_test(rng)
    }
}

/// Suites with a random number of tests up to `initial_tests`.
#[derive(Debug, Clone)]
pub struct TestSuiteFactory {
    initial_tests: usize,
}

impl TestSuiteFactory {
    pub fn new(initial_tests: usize) -> Self {
        Self {
            initial_tests: initial_tests.max(1),
        }
    }

    pub fn get_suite(&self, tests: &dyn TestFactory, rng: &mut StdRng) -> TestSuiteChromosome {
        let count = rng.gen_range(1..=self.initial_tests);
        let mut suite = TestSuiteChromosome::new();
        for _ in 0..count {
            match tests.get_test(rng) {
                Ok(test) if !test.is_empty() => suite.add_test(test),
                Ok(_) => {}
                Err(err) => {
                    debug!("Stopped filling suite: {err}");
                    break;
                }
            }
        }
        suite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CallableMethod, Goal, ParamKind};

    fn factory(chromosome_length: usize) -> RandomLengthTestFactory {
        let cluster = TestCluster::new(vec![CallableMethod {
            class_name: "Calc".to_string(),
            method_name: "abs".to_string(),
            params: vec![ParamKind::Int],
        }]);
        RandomLengthTestFactory::new(
            Arc::new(cluster),
            OperatorConfig {
                chromosome_length,
                ..Default::default()
            },
            20,
        )
    }

    #[test]
    fn test_random_length_bounds() {
        let factory = factory(6);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let test = factory.get_test(&mut rng).unwrap();
            assert!(!test.is_empty());
            // The last call may overshoot by its argument statements.
            assert!(test.len() <= 7);
            assert!(test.test().is_valid());
        }
    }

    #[test]
    fn test_empty_cluster_fails() {
        let factory = RandomLengthTestFactory::new(
            Arc::new(TestCluster::default()),
            OperatorConfig::default(),
            10,
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert!(factory.get_test(&mut rng).is_err());

        let suite = TestSuiteFactory::new(5).get_suite(&factory, &mut rng);
        assert!(suite.is_empty());
    }

    #[test]
    fn test_suite_factory_respects_bound() {
        let factory = factory(4);
        let suites = TestSuiteFactory::new(3);
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..20 {
            let suite = suites.get_suite(&factory, &mut rng);
            assert!((1..=3).contains(&suite.size()));
        }
    }

    #[test]
    fn test_archive_factory_clones_witness() {
        let base = factory(4);
        let mut archive = CoverageArchive::new();
        let goal = Goal::root("Calc", "abs");
        archive.add_target(goal.clone());
        let mut rng = StdRng::seed_from_u64(5);
        let witness = base.get_test(&mut rng).unwrap();
        archive.update_archive(&goal, &witness, 0.0);

        let seeded = ArchiveTestFactory::new(&base, &archive, 1.0, 0);
        let test = seeded.get_test(&mut rng).unwrap();
        assert_eq!(test.test(), witness.test());
    }
}
