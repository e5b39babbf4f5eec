//! Coverage archive: the first covering test found for every goal.
//!
//! Once a goal has a witness it stays covered for the rest of the run and is
//! no longer scored by the suite fitness.

use std::collections::{BTreeMap, HashSet};

use log::trace;
use rand::prelude::*;

use crate::schema::{Goal, TestCase};

use super::chromosome::{TestChromosome, TestSuiteChromosome};

/// Goals of one search run with their covering tests.
#[derive(Debug, Clone, Default)]
pub struct CoverageArchive {
    targets: BTreeMap<Goal, Option<TestChromosome>>,
    updated: bool,
}

impl CoverageArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a goal. Registering a known goal has no effect.
    pub fn add_target(&mut self, goal: Goal) {
        self.targets.entry(goal).or_insert(None);
    }

    pub fn add_targets(&mut self, goals: impl IntoIterator<Item = Goal>) {
        for goal in goals {
            self.add_target(goal);
        }
    }

    /// Record `test` as witness for `goal` if the distance is zero and no
    /// witness exists yet. Returns whether the archive changed.
    pub fn update_archive(&mut self, goal: &Goal, test: &TestChromosome, distance: f64) -> bool {
        if distance != 0.0 {
            return false;
        }
        let Some(slot) = self.targets.get_mut(goal) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        trace!("Archived witness for {goal}");
        *slot = Some(test.clone());
        self.updated = true;
        true
    }

    pub fn is_covered(&self, goal: &Goal) -> bool {
        matches!(self.targets.get(goal), Some(Some(_)))
    }

    pub fn witness(&self, goal: &Goal) -> Option<&TestChromosome> {
        self.targets.get(goal).and_then(Option::as_ref)
    }

    /// Whether a witness was added since the last [`reset`](Self::reset).
    pub fn has_been_updated(&self) -> bool {
        self.updated
    }

    /// Clear the update flag.
    pub fn reset(&mut self) {
        self.updated = false;
    }

    pub fn number_of_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn number_of_covered_targets(&self) -> usize {
        self.targets.values().filter(|w| w.is_some()).count()
    }

    pub fn uncovered_targets(&self) -> impl Iterator<Item = &Goal> {
        self.targets
            .iter()
            .filter(|(_, w)| w.is_none())
            .map(|(goal, _)| goal)
    }

    /// Distinct witness tests in goal order.
    pub fn solutions(&self) -> Vec<&TestChromosome> {
        let mut seen: HashSet<&TestCase> = HashSet::new();
        self.targets
            .values()
            .flatten()
            .filter(|test| seen.insert(test.test()))
            .collect()
    }

    /// A random witness, if any goal is covered.
    pub fn random_solution(&self, rng: &mut StdRng) -> Option<TestChromosome> {
        self.solutions().choose(rng).map(|test| (*test).clone())
    }

    /// The given suite extended with every witness it does not already hold.
    pub fn merge_archive_and_solution(&self, suite: &TestSuiteChromosome) -> TestSuiteChromosome {
        let mut merged = suite.clone();
        for witness in self.solutions() {
            if !merged.contains_test(witness.test()) {
                merged.add_test(witness.clone());
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Statement, Value};

    fn test_calling(method: &str) -> TestChromosome {
        TestChromosome::new(TestCase::from_statements(vec![
            Statement::primitive(Value::Int(1)),
            Statement::call("Calc", method, vec![0]),
        ]))
    }

    #[test]
    fn test_first_witness_wins() {
        let mut archive = CoverageArchive::new();
        let goal = Goal::root("Calc", "inc");
        archive.add_target(goal.clone());
        archive.add_target(goal.clone());
        assert_eq!(archive.number_of_targets(), 1);

        assert!(!archive.update_archive(&goal, &test_calling("inc"), 0.5));
        assert!(!archive.has_been_updated());

        let first = test_calling("inc");
        assert!(archive.update_archive(&goal, &first, 0.0));
        assert!(!archive.update_archive(&goal, &test_calling("other"), 0.0));
        assert_eq!(archive.witness(&goal).unwrap().test(), first.test());
        assert!(archive.has_been_updated());

        archive.reset();
        assert!(!archive.has_been_updated());
        assert!(archive.is_covered(&goal));
    }

    #[test]
    fn test_unregistered_goal_ignored() {
        let mut archive = CoverageArchive::new();
        let goal = Goal::root("Calc", "inc");
        assert!(!archive.update_archive(&goal, &test_calling("inc"), 0.0));
        assert!(!archive.is_covered(&goal));
    }

    #[test]
    fn test_merge_adds_missing_witnesses_once() {
        let mut archive = CoverageArchive::new();
        let inc = Goal::root("Calc", "inc");
        let dec = Goal::root("Calc", "dec");
        let neg = Goal::root("Calc", "neg");
        archive.add_targets([inc.clone(), dec.clone(), neg.clone()]);

        let shared = test_calling("inc");
        archive.update_archive(&inc, &shared, 0.0);
        archive.update_archive(&dec, &shared, 0.0);
        archive.update_archive(&neg, &test_calling("neg"), 0.0);
        assert_eq!(archive.solutions().len(), 2);
        assert_eq!(archive.uncovered_targets().count(), 0);

        let mut suite = TestSuiteChromosome::new();
        suite.add_test(test_calling("inc"));
        let merged = archive.merge_archive_and_solution(&suite);

        assert_eq!(merged.size(), 2);
        assert_eq!(suite.size(), 1);
    }

    #[test]
    fn test_random_solution() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut archive = CoverageArchive::new();
        assert!(archive.random_solution(&mut rng).is_none());

        let goal = Goal::root("Calc", "inc");
        archive.add_target(goal.clone());
        archive.update_archive(&goal, &test_calling("inc"), 0.0);
        assert!(archive.random_solution(&mut rng).is_some());
    }
}
