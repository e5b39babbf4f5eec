//! Control-flow distance between an execution and a coverage goal.
//!
//! The distance combines the approach level (how many controlling predicates
//! the execution missed) with the branch distance of the closest predicate it
//! did reach. Lower is better; zero means the goal is covered.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::schema::{BranchGoal, BranchId, ExecutionResult, Goal, MethodCall, MethodKey, RootGoal};

use super::registry::GoalRegistry;

/// Map a non-negative distance into `[0, 1)`.
///
/// Infinite distances map to 1.
pub fn normalize(x: f64) -> f64 {
    debug_assert!(x >= 0.0, "distance must be non-negative");
    if x.is_infinite() {
        return 1.0;
    }
    x / (x + 1.0)
}

/// Approach level plus branch distance.
#[derive(Debug, Clone, Copy)]
pub struct ControlFlowDistance {
    approach_level: u32,
    branch_distance: f64,
}

impl ControlFlowDistance {
    /// Covered.
    pub const ZERO: Self = Self {
        approach_level: 0,
        branch_distance: 0.0,
    };

    /// Worst possible distance, used for timeouts, unreached methods and
    /// cyclic control dependence.
    pub const WORST: Self = Self {
        approach_level: u32::MAX,
        branch_distance: 0.0,
    };

    pub fn new(approach_level: u32, branch_distance: f64) -> Self {
        let branch_distance = if branch_distance.is_nan() {
            f64::INFINITY
        } else {
            branch_distance.max(0.0)
        };
        Self {
            approach_level,
            branch_distance,
        }
    }

    pub fn approach_level(&self) -> u32 {
        self.approach_level
    }

    pub fn branch_distance(&self) -> f64 {
        self.branch_distance
    }

    /// One more unsatisfied control dependence step.
    pub fn increase_approach_level(self) -> Self {
        Self {
            approach_level: self.approach_level.saturating_add(1),
            ..self
        }
    }

    /// Scalar form: `approach_level + normalize(branch_distance)`.
    pub fn resulting_fitness(&self) -> f64 {
        f64::from(self.approach_level) + normalize(self.branch_distance)
    }

    pub fn is_zero(&self) -> bool {
        self.approach_level == 0 && self.branch_distance == 0.0
    }
}

impl PartialEq for ControlFlowDistance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ControlFlowDistance {}

impl PartialOrd for ControlFlowDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ControlFlowDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.approach_level
            .cmp(&other.approach_level)
            .then_with(|| self.branch_distance.total_cmp(&other.branch_distance))
    }
}

/// Outcome of walking the control dependence graph upwards.
enum Walk {
    Reached(ControlFlowDistance),
    Cycle,
}

/// Computes distances against the branches of one registry.
pub struct DistanceCalculator<'a> {
    registry: &'a GoalRegistry,
}

impl<'a> DistanceCalculator<'a> {
    pub fn new(registry: &'a GoalRegistry) -> Self {
        Self { registry }
    }

    /// Distance of `result` to `goal`.
    pub fn distance(&self, result: &ExecutionResult, goal: &Goal) -> ControlFlowDistance {
        if result.timed_out() || result.was_cancelled() {
            return ControlFlowDistance::WORST;
        }
        match goal {
            Goal::Root(root) => self.root_distance(result, root),
            Goal::Branch(branch) => self.branch_goal_distance(result, branch),
        }
    }

    fn root_distance(&self, result: &ExecutionResult, goal: &RootGoal) -> ControlFlowDistance {
        let method = MethodKey::new(&goal.class_name, &goal.method_name);
        if result.trace.was_called(&method) {
            ControlFlowDistance::ZERO
        } else {
            ControlFlowDistance::WORST
        }
    }

    fn branch_goal_distance(
        &self,
        result: &ExecutionResult,
        goal: &BranchGoal,
    ) -> ControlFlowDistance {
        let method = MethodKey::new(&goal.class_name, &goal.method_name);
        result
            .trace
            .calls_to(&method)
            .filter_map(|call| {
                match self.call_distance(call, goal.branch, goal.value, &BTreeSet::new()) {
                    Walk::Reached(distance) => Some(distance),
                    Walk::Cycle => None,
                }
            })
            .min()
            .unwrap_or(ControlFlowDistance::WORST)
    }

    /// Distance of one method invocation to `branch` taking `value`.
    ///
    /// `visited` holds the branches already on the current walk; it is
    /// extended into a fresh set for each recursive step.
    fn call_distance(
        &self,
        call: &MethodCall,
        branch: BranchId,
        value: bool,
        visited: &BTreeSet<BranchId>,
    ) -> Walk {
        if visited.contains(&branch) {
            return Walk::Cycle;
        }
        if let Some(distance) = call.min_distance(branch, value) {
            return Walk::Reached(ControlFlowDistance::new(0, distance));
        }
        let Some(info) = self.registry.branch(branch) else {
            return Walk::Cycle;
        };
        if info.control_dependencies.is_empty() {
            // Only the method entry controls this branch.
            return Walk::Reached(ControlFlowDistance::ZERO.increase_approach_level());
        }

        let mut visited = visited.clone();
        visited.insert(branch);

        info.control_dependencies
            .iter()
            .filter_map(
                |dependency| match self.call_distance(call, dependency.branch, dependency.value, &visited) {
                    Walk::Reached(distance) => Some(distance.increase_approach_level()),
                    Walk::Cycle => None,
                },
            )
            .min()
            .map_or(Walk::Cycle, Walk::Reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Branch, ExceptionKind};
    use proptest::prelude::*;

    fn registry() -> GoalRegistry {
        let mut registry = GoalRegistry::new();
        registry
            .register_branch(Branch::new(BranchId(1), "Calc", "classify", 3))
            .unwrap();
        registry
            .register_branch(Branch::new(BranchId(2), "Calc", "classify", 5).depends_on(BranchId(1), true))
            .unwrap();
        registry
            .register_branch(Branch::new(BranchId(3), "Calc", "classify", 7).depends_on(BranchId(2), false))
            .unwrap();
        registry
            .register_branchless_method("Calc", "reset", 12)
            .unwrap();
        registry
    }

    fn goal(registry: &GoalRegistry, id: u32, value: bool) -> Goal {
        Goal::branch(registry.branch(BranchId(id)).unwrap(), value)
    }

    fn result_with(predicates: &[(u32, f64, f64)]) -> ExecutionResult {
        let mut result = ExecutionResult::default();
        let call = result.trace.enter_method(MethodKey::new("Calc", "classify"));
        for &(id, t, f) in predicates {
            result.trace.record_predicate(call, BranchId(id), t, f);
        }
        result
    }

    #[test]
    fn test_reached_branch_uses_branch_distance() {
        let registry = registry();
        let calculator = DistanceCalculator::new(&registry);
        let result = result_with(&[(1, 4.0, 0.0)]);

        let d = calculator.distance(&result, &goal(&registry, 1, true));
        assert_eq!(d.approach_level(), 0);
        assert_eq!(d.branch_distance(), 4.0);

        assert!(calculator.distance(&result, &goal(&registry, 1, false)).is_zero());
    }

    #[test]
    fn test_unreached_branch_climbs_dependencies() {
        let registry = registry();
        let calculator = DistanceCalculator::new(&registry);
        let result = result_with(&[(1, 4.0, 0.0)]);

        // Branch 3 needs 2 == false, which needs 1 == true (distance 4).
        let d = calculator.distance(&result, &goal(&registry, 3, true));
        assert_eq!(d.approach_level(), 2);
        assert_eq!(d.branch_distance(), 4.0);
        assert!(d < calculator.distance(&ExecutionResult::default(), &goal(&registry, 3, true)));
    }

    #[test]
    fn test_independent_branch_missed_is_one_level_away() {
        let registry = registry();
        let calculator = DistanceCalculator::new(&registry);
        let result = result_with(&[]);

        let d = calculator.distance(&result, &goal(&registry, 1, true));
        assert_eq!(d.approach_level(), 1);
        assert_eq!(d.branch_distance(), 0.0);
    }

    #[test]
    fn test_cyclic_dependencies_terminate() {
        let mut registry = GoalRegistry::new();
        registry
            .register_branch(Branch::new(BranchId(1), "Calc", "loop", 1).depends_on(BranchId(2), true))
            .unwrap();
        registry
            .register_branch(Branch::new(BranchId(2), "Calc", "loop", 2).depends_on(BranchId(1), true))
            .unwrap();
        let calculator = DistanceCalculator::new(&registry);

        let mut result = ExecutionResult::default();
        result.trace.enter_method(MethodKey::new("Calc", "loop"));

        let d = calculator.distance(&result, &goal(&registry, 1, true));
        assert_eq!(d, ControlFlowDistance::WORST);
    }

    #[test]
    fn test_root_goal_is_binary() {
        let registry = registry();
        let calculator = DistanceCalculator::new(&registry);
        let root = Goal::root("Calc", "reset");

        assert_eq!(
            calculator.distance(&ExecutionResult::default(), &root),
            ControlFlowDistance::WORST
        );

        let mut result = ExecutionResult::default();
        result.trace.enter_method(MethodKey::new("Calc", "reset"));
        assert!(calculator.distance(&result, &root).is_zero());
    }

    #[test]
    fn test_timeout_is_worst_without_trace_analysis() {
        let registry = registry();
        let calculator = DistanceCalculator::new(&registry);
        let mut result = result_with(&[(1, 0.0, 1.0)]);
        result.report_exception(1, ExceptionKind::Timeout, "deadline");

        assert_eq!(
            calculator.distance(&result, &goal(&registry, 1, true)),
            ControlFlowDistance::WORST
        );
    }

    #[test]
    fn test_minimum_over_calls() {
        let registry = registry();
        let calculator = DistanceCalculator::new(&registry);
        let mut result = result_with(&[(1, 9.0, 0.0)]);
        let second = result.trace.enter_method(MethodKey::new("Calc", "classify"));
        result.trace.record_predicate(second, BranchId(1), 2.0, 0.0);

        let d = calculator.distance(&result, &goal(&registry, 1, true));
        assert_eq!(d.branch_distance(), 2.0);
    }

    proptest! {
        #[test]
        fn normalize_is_bounded(x in 0.0f64..1e12) {
            let n = normalize(x);
            prop_assert!(n >= 0.0);
            prop_assert!(n < 1.0);
        }

        #[test]
        fn approach_level_dominates(a in 0u32..100, d1 in 0.0f64..1e9, d2 in 0.0f64..1e9) {
            let near = ControlFlowDistance::new(a, d1);
            let far = ControlFlowDistance::new(a + 1, d2);
            prop_assert!(near < far);
            prop_assert!(near.resulting_fitness() < far.resulting_fitness());
            prop_assert!(near.resulting_fitness() >= 0.0);
        }
    }

    #[test]
    fn test_normalize_zero() {
        assert_eq!(normalize(0.0), 0.0);
        assert_eq!(normalize(1.0), 0.5);
        assert_eq!(normalize(f64::INFINITY), 1.0);
    }
}
