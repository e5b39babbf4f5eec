//! Benchmarks for suite evaluation and the search loop.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

use suitegen::{
    evolution::{
        CoverageArchive, GeneticAlgorithm, GoalRegistry, RandomLengthTestFactory,
        SuiteFitnessEvaluator, TestSuiteFactory,
    },
    executor::SyntheticUnit,
    schema::{SearchConfig, StoppingConfig},
};

fn bench_suite_fitness(c: &mut Criterion) {
    let mut group = c.benchmark_group("suite_fitness");

    let unit = SyntheticUnit::example().unwrap();
    let mut registry = GoalRegistry::new();
    let executor = Arc::new(unit.register(&mut registry).unwrap());
    let registry = Arc::new(registry);
    let mut config = SearchConfig::default();
    config.execution.timeout_ms = 100;

    for tests in [1, 10, 50] {
        let factory = RandomLengthTestFactory::new(
            Arc::new(unit.test_cluster()),
            config.operators.clone(),
            config.population.max_tests,
        );
        let mut rng = StdRng::seed_from_u64(7);
        let suite = TestSuiteFactory::new(tests).get_suite(&factory, &mut rng);
        let mut evaluator = SuiteFitnessEvaluator::new(
            Arc::clone(&registry),
            executor.clone(),
            &config,
            Arc::new(AtomicBool::new(false)),
        );
        let mut archive = CoverageArchive::new();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_tests", tests)),
            &tests,
            |b, _| {
                b.iter(|| {
                    let mut fresh = suite.clone();
                    for test in fresh.tests_mut() {
                        test.clear_cached_results();
                    }
                    black_box(evaluator.fitness(&mut fresh, &mut archive).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    group.sample_size(10);

    for size in [10, 50] {
        let config = SearchConfig {
            stopping: StoppingConfig {
                max_generations: Some(20),
                max_time_secs: None,
                max_evaluations: None,
                stop_at_zero_fitness: false,
            },
            random_seed: Some(42),
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("population_{}", size)),
            &size,
            |b, &size| {
                b.iter(|| {
                    let mut config = config.clone();
                    config.population.size = size;
                    config.execution.timeout_ms = 100;
                    let unit = SyntheticUnit::example().unwrap();
                    let mut registry = GoalRegistry::new();
                    let executor = unit.register(&mut registry).unwrap();
                    let mut search = GeneticAlgorithm::new(
                        config,
                        registry,
                        unit.test_cluster(),
                        Arc::new(executor),
                    )
                    .unwrap();
                    black_box(search.generate_solution().unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_suite_fitness, bench_search);
criterion_main!(benches);
