//! Ranking of suites by primary fitness and gated secondary objectives.

use std::cmp::Ordering;

use crate::schema::{SecondaryObjectiveConfig, SecondaryObjectiveKind};

use super::chromosome::TestSuiteChromosome;

/// Tie breaker between suites of equal fitness. `Less` means `a` is better.
pub trait SecondaryObjective: Send + Sync {
    fn name(&self) -> &'static str;
    fn compare(&self, a: &TestSuiteChromosome, b: &TestSuiteChromosome) -> Ordering;
}

/// Prefer suites with fewer statements.
#[derive(Debug, Clone, Copy)]
pub struct MinimizeTotalLength;

impl SecondaryObjective for MinimizeTotalLength {
    fn name(&self) -> &'static str {
        "total_length"
    }

    fn compare(&self, a: &TestSuiteChromosome, b: &TestSuiteChromosome) -> Ordering {
        a.total_length().cmp(&b.total_length())
    }
}

/// Prefer suites with fewer tests.
#[derive(Debug, Clone, Copy)]
pub struct MinimizeSize;

impl SecondaryObjective for MinimizeSize {
    fn name(&self) -> &'static str {
        "size"
    }

    fn compare(&self, a: &TestSuiteChromosome, b: &TestSuiteChromosome) -> Ordering {
        a.size().cmp(&b.size())
    }
}

fn objective(kind: SecondaryObjectiveKind) -> Box<dyn SecondaryObjective> {
    match kind {
        SecondaryObjectiveKind::TotalLength => Box::new(MinimizeTotalLength),
        SecondaryObjectiveKind::Size => Box::new(MinimizeSize),
    }
}

/// Comparator for one search run.
///
/// Primary key is the fitness in the configured direction. The secondary
/// objectives are consulted in order on ties. The first of them can be
/// switched off while the search is still making progress; the others are
/// always active.
pub struct ObjectiveRanking {
    maximize: bool,
    objectives: Vec<Box<dyn SecondaryObjective>>,
    first_enabled: bool,
}

impl ObjectiveRanking {
    pub fn new(maximize: bool, objectives: Vec<Box<dyn SecondaryObjective>>) -> Self {
        Self {
            maximize,
            objectives,
            first_enabled: true,
        }
    }

    pub fn from_config(maximize: bool, config: &SecondaryObjectiveConfig) -> Self {
        Self::new(
            maximize,
            config.objectives.iter().copied().map(objective).collect(),
        )
    }

    /// Total order, best first. Unevaluated suites sort last.
    pub fn compare(&self, a: &TestSuiteChromosome, b: &TestSuiteChromosome) -> Ordering {
        let primary = match (a.evaluation(), b.evaluation()) {
            (Some(x), Some(y)) if self.maximize => y.fitness.total_cmp(&x.fitness),
            (Some(x), Some(y)) => x.fitness.total_cmp(&y.fitness),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if primary != Ordering::Equal {
            return primary;
        }

        let skip = usize::from(!self.first_enabled);
        self.objectives
            .iter()
            .skip(skip)
            .map(|objective| objective.compare(a, b))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// Whether `a` ranks strictly before `b`.
    pub fn is_better(&self, a: &TestSuiteChromosome, b: &TestSuiteChromosome) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    pub fn enable_first(&mut self) {
        self.first_enabled = true;
    }

    /// Switch the first objective off. Has no effect with fewer than two
    /// objectives.
    pub fn disable_first(&mut self) {
        if self.objectives.len() > 1 {
            self.first_enabled = false;
        }
    }

    pub fn is_first_enabled(&self) -> bool {
        self.first_enabled
    }

    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.objectives.iter().map(|o| o.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::chromosome::{SuiteEvaluation, TestChromosome};
    use crate::schema::{Statement, TestCase, Value};

    fn suite(tests: &[usize], fitness: Option<f64>) -> TestSuiteChromosome {
        let mut suite = TestSuiteChromosome::from_tests(
            tests
                .iter()
                .map(|&len| {
                    TestChromosome::new(TestCase::from_statements(
                        (0..len).map(|i| Statement::primitive(Value::Int(i as i64))).collect(),
                    ))
                })
                .collect(),
        );
        if let Some(fitness) = fitness {
            suite.set_evaluation(SuiteEvaluation {
                fitness,
                coverage: 0.0,
                covered_goals: 0,
                uncovered_goals: 0,
            });
        }
        suite
    }

    #[test]
    fn test_primary_fitness_dominates() {
        let ranking = ObjectiveRanking::new(false, vec![Box::new(MinimizeTotalLength)]);
        let short_bad = suite(&[1], Some(3.0));
        let long_good = suite(&[10, 10], Some(1.0));

        assert!(ranking.is_better(&long_good, &short_bad));
        assert!(ranking.is_better(&short_bad, &suite(&[1], None)));

        let maximizing = ObjectiveRanking::new(true, Vec::new());
        assert!(maximizing.is_better(&short_bad, &long_good));
    }

    #[test]
    fn test_ties_use_objectives_in_order() {
        let ranking = ObjectiveRanking::new(
            false,
            vec![Box::new(MinimizeTotalLength), Box::new(MinimizeSize)],
        );
        let few_long = suite(&[6], Some(2.0));
        let many_short = suite(&[2, 2], Some(2.0));
        let same_length = suite(&[3, 3], Some(2.0));

        assert!(ranking.is_better(&many_short, &few_long));
        assert!(ranking.is_better(&many_short, &same_length));
        assert_eq!(ranking.compare(&same_length, &suite(&[4, 2], Some(2.0))), Ordering::Equal);
    }

    #[test]
    fn test_disabling_first_objective() {
        let mut ranking = ObjectiveRanking::new(
            false,
            vec![Box::new(MinimizeTotalLength), Box::new(MinimizeSize)],
        );
        let few_long = suite(&[6], Some(2.0));
        let many_short = suite(&[2, 2], Some(2.0));

        ranking.disable_first();
        assert!(!ranking.is_first_enabled());
        assert!(ranking.is_better(&few_long, &many_short));

        ranking.enable_first();
        assert!(ranking.is_better(&many_short, &few_long));
    }

    #[test]
    fn test_single_objective_stays_enabled() {
        let mut ranking = ObjectiveRanking::from_config(false, &SecondaryObjectiveConfig::default());
        assert_eq!(ranking.names(), vec!["total_length"]);
        ranking.disable_first();
        assert!(ranking.is_first_enabled());
    }
}
