//! Declarative units under test and an interpreter that executes tests
//! against them.
//!
//! A [`SyntheticUnit`] describes a class as a list of methods whose bodies are
//! sequences of guarded comparisons. It is enough to exercise the whole
//! search: control dependence, branch distances, exceptions raised by the
//! unit, and runaway loops that must be cancelled.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::evolution::{GoalRegistry, RegistryError};
use crate::schema::{
    Branch, BranchId, CallableMethod, ExceptionKind, ExecutionResult, MethodKey, ParamKind,
    Statement, TestCase, TestCluster, Value,
};

use super::{CancellationToken, Executor};

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Outcome and branch distances `(outcome, true_distance, false_distance)`
    /// of `lhs op rhs`. Exactly one of the two distances is zero.
    pub fn evaluate(self, lhs: i64, rhs: i64) -> (bool, f64, f64) {
        let (a, b) = (lhs as f64, rhs as f64);
        let gap = (a - b).abs();
        match self {
            Self::Eq if lhs == rhs => (true, 0.0, 1.0),
            Self::Eq => (false, gap, 0.0),
            Self::Ne if lhs != rhs => (true, 0.0, gap),
            Self::Ne => (false, 1.0, 0.0),
            Self::Lt if lhs < rhs => (true, 0.0, gap),
            Self::Lt => (false, gap + 1.0, 0.0),
            Self::Le if lhs <= rhs => (true, 0.0, gap + 1.0),
            Self::Le => (false, gap, 0.0),
            Self::Gt if lhs > rhs => (true, 0.0, gap),
            Self::Gt => (false, gap + 1.0, 0.0),
            Self::Ge if lhs >= rhs => (true, 0.0, gap + 1.0),
            Self::Ge => (false, gap, 0.0),
        }
    }
}

/// `args[param] op constant`. Booleans compare as 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub param: usize,
    pub op: CmpOp,
    pub constant: i64,
}

impl Condition {
    fn evaluate(&self, args: &[Value]) -> Option<(bool, f64, f64)> {
        args.get(self.param)
            .map(|value| self.op.evaluate(value.as_i64(), self.constant))
    }
}

/// Requires an earlier branch of the same method to have taken `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Guard {
    /// Index of the controlling branch within the method.
    pub branch: usize,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticBranch {
    pub line: u32,
    pub condition: Condition,
    #[serde(default)]
    pub guard: Option<Guard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticMethod {
    pub name: String,
    pub line: u32,
    #[serde(default)]
    pub params: Vec<ParamKind>,
    #[serde(default)]
    pub branches: Vec<SyntheticBranch>,
    /// Raise an exception after the branches when this holds.
    #[serde(default)]
    pub throws_when: Option<Condition>,
    /// Loop until cancelled when this holds.
    #[serde(default)]
    pub spins_when: Option<Condition>,
}

/// A class under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticUnit {
    pub class_name: String,
    pub methods: Vec<SyntheticMethod>,
}

#[derive(Debug, thiserror::Error)]
pub enum SyntheticUnitError {
    #[error("Failed to read unit {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse unit: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Unit {0} declares no methods")]
    NoMethods(String),
    #[error("Method {0} is declared twice")]
    DuplicateMethod(String),
    #[error("Condition in {method} refers to missing parameter {param}")]
    UnknownParam { method: String, param: usize },
    #[error("Branch {branch} of {method} must be guarded by an earlier branch")]
    InvalidGuard { method: String, branch: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

const EXAMPLE_UNIT: &str = include_str!("../../demos/account.json");

impl SyntheticUnit {
    pub fn from_json_str(json: &str) -> Result<Self, SyntheticUnitError> {
        let unit: Self = serde_json::from_str(json)?;
        unit.validate()?;
        Ok(unit)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyntheticUnitError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|source| SyntheticUnitError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// The bundled bank account unit.
    pub fn example() -> Result<Self, SyntheticUnitError> {
        Self::from_json_str(EXAMPLE_UNIT)
    }

    pub fn validate(&self) -> Result<(), SyntheticUnitError> {
        if self.methods.is_empty() {
            return Err(SyntheticUnitError::NoMethods(self.class_name.clone()));
        }
        let mut names = BTreeSet::new();
        for method in &self.methods {
            if !names.insert(method.name.as_str()) {
                return Err(SyntheticUnitError::DuplicateMethod(method.name.clone()));
            }
            let conditions = method
                .branches
                .iter()
                .map(|b| &b.condition)
                .chain(method.throws_when.iter())
                .chain(method.spins_when.iter());
            for condition in conditions {
                if condition.param >= method.params.len() {
                    return Err(SyntheticUnitError::UnknownParam {
                        method: method.name.clone(),
                        param: condition.param,
                    });
                }
            }
            for (index, branch) in method.branches.iter().enumerate() {
                if let Some(guard) = branch.guard
                    && guard.branch >= index
                {
                    return Err(SyntheticUnitError::InvalidGuard {
                        method: method.name.clone(),
                        branch: index,
                    });
                }
            }
        }
        Ok(())
    }

    /// Callable methods for test construction.
    pub fn test_cluster(&self) -> TestCluster {
        TestCluster::new(
            self.methods
                .iter()
                .map(|m| CallableMethod {
                    class_name: self.class_name.clone(),
                    method_name: m.name.clone(),
                    params: m.params.clone(),
                })
                .collect(),
        )
    }

    /// Register every method and branch with freshly allocated ids and
    /// return an executor bound to those ids.
    pub fn register(
        &self,
        registry: &mut GoalRegistry,
    ) -> Result<SyntheticExecutor, SyntheticUnitError> {
        self.validate()?;
        let mut ids = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            if method.branches.is_empty() {
                registry.register_branchless_method(&self.class_name, &method.name, method.line)?;
                ids.push(Vec::new());
                continue;
            }
            let mut method_ids: Vec<BranchId> = Vec::with_capacity(method.branches.len());
            for branch in &method.branches {
                let id = registry.allocate_branch_id();
                let mut registered = Branch::new(id, &self.class_name, &method.name, branch.line);
                if let Some(guard) = branch.guard
                    && let Some(&controlling) = method_ids.get(guard.branch)
                {
                    registered = registered.depends_on(controlling, guard.value);
                }
                registry.register_branch(registered)?;
                method_ids.push(id);
            }
            ids.push(method_ids);
        }
        registry.check_dependencies()?;

        let lookup = self
            .methods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), i))
            .collect();
        Ok(SyntheticExecutor {
            unit: self.clone(),
            ids,
            lookup,
            spin_interval: Duration::from_millis(1),
        })
    }
}

/// Interprets tests against a registered [`SyntheticUnit`].
#[derive(Debug, Clone)]
pub struct SyntheticExecutor {
    unit: SyntheticUnit,
    ids: Vec<Vec<BranchId>>,
    lookup: BTreeMap<String, usize>,
    spin_interval: Duration,
}

/// How a statement ended.
enum Step {
    Continue,
    Stop(ExceptionKind, String),
}

impl SyntheticExecutor {
    pub fn unit(&self) -> &SyntheticUnit {
        &self.unit
    }

    fn call(
        &self,
        result: &mut ExecutionResult,
        test: &TestCase,
        class_name: &str,
        method_name: &str,
        args: &[usize],
        token: &CancellationToken,
    ) -> Step {
        let Some(&index) = self
            .lookup
            .get(method_name)
            .filter(|_| class_name == self.unit.class_name)
        else {
            return Step::Stop(
                ExceptionKind::Harness,
                format!("no method {class_name}.{method_name}"),
            );
        };
        let method = &self.unit.methods[index];
        if args.len() != method.params.len() {
            return Step::Stop(
                ExceptionKind::Harness,
                format!("{method_name} expects {} arguments", method.params.len()),
            );
        }

        let mut values = Vec::with_capacity(args.len());
        for (&arg, &kind) in args.iter().zip(&method.params) {
            match test.get(arg) {
                Some(Statement::Primitive { value }) if value.kind() == kind => values.push(*value),
                _ => {
                    return Step::Stop(
                        ExceptionKind::Harness,
                        format!("invalid argument v{arg} for {method_name}"),
                    );
                }
            }
        }

        let call = result
            .trace
            .enter_method(MethodKey::new(class_name, method_name));

        if let Some((true, _, _)) = method.spins_when.and_then(|c| c.evaluate(&values)) {
            loop {
                if token.checkpoint().is_err() {
                    return Step::Stop(token.stop_kind(), format!("{method_name} stopped"));
                }
                std::thread::sleep(self.spin_interval);
            }
        }

        let mut outcomes: Vec<Option<bool>> = Vec::with_capacity(method.branches.len());
        for (branch, &id) in method.branches.iter().zip(&self.ids[index]) {
            let reached = match branch.guard {
                None => true,
                Some(guard) => outcomes.get(guard.branch).copied().flatten() == Some(guard.value),
            };
            if !reached {
                outcomes.push(None);
                continue;
            }
            if token.checkpoint().is_err() {
                return Step::Stop(token.stop_kind(), format!("{method_name} stopped"));
            }
            let Some((outcome, t, f)) = branch.condition.evaluate(&values) else {
                outcomes.push(None);
                continue;
            };
            result.trace.record_predicate(call, id, t, f);
            outcomes.push(Some(outcome));
        }

        if let Some((true, _, _)) = method.throws_when.and_then(|c| c.evaluate(&values)) {
            return Step::Stop(ExceptionKind::Sut, format!("{method_name} raised"));
        }
        Step::Continue
    }
}

impl Executor for SyntheticExecutor {
    fn execute(&self, test: &TestCase, token: &CancellationToken) -> ExecutionResult {
        let started = Instant::now();
        let mut result = ExecutionResult::default();

        for (position, statement) in test.statements().iter().enumerate() {
            if token.checkpoint().is_err() {
                result.report_exception(position, token.stop_kind(), "stopped");
                break;
            }
            let step = match statement {
                Statement::Primitive { .. } => Step::Continue,
                Statement::Call {
                    class_name,
                    method_name,
                    args,
                } => self.call(&mut result, test, class_name, method_name, args, token),
            };
            result.executed_statement_count += 1;
            if let Step::Stop(kind, message) = step {
                result.report_exception(position, kind, message);
                break;
            }
        }

        result.execution_time_ms = started.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> SyntheticUnit {
        SyntheticUnit::from_json_str(
            r#"{
                "class_name": "Gate",
                "methods": [
                    {
                        "name": "check",
                        "line": 1,
                        "params": ["int", "bool"],
                        "branches": [
                            { "line": 2, "condition": { "param": 0, "op": "gt", "constant": 10 } },
                            { "line": 3, "condition": { "param": 1, "op": "eq", "constant": 1 },
                              "guard": { "branch": 0, "value": true } }
                        ],
                        "throws_when": { "param": 0, "op": "eq", "constant": 13 }
                    },
                    {
                        "name": "wait",
                        "line": 8,
                        "params": ["int"],
                        "spins_when": { "param": 0, "op": "lt", "constant": 0 }
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    fn call_check(x: i64, flag: bool) -> TestCase {
        TestCase::from_statements(vec![
            Statement::primitive(Value::Int(x)),
            Statement::primitive(Value::Bool(flag)),
            Statement::call("Gate", "check", vec![0, 1]),
        ])
    }

    #[test]
    fn test_korel_distances() {
        assert_eq!(CmpOp::Eq.evaluate(3, 3), (true, 0.0, 1.0));
        assert_eq!(CmpOp::Eq.evaluate(3, 7), (false, 4.0, 0.0));
        assert_eq!(CmpOp::Lt.evaluate(5, 5), (false, 1.0, 0.0));
        assert_eq!(CmpOp::Le.evaluate(5, 5), (true, 0.0, 1.0));
        assert_eq!(CmpOp::Gt.evaluate(2, 10), (false, 9.0, 0.0));
        assert_eq!(CmpOp::Ge.evaluate(12, 10), (true, 0.0, 3.0));
        assert_eq!(CmpOp::Ne.evaluate(1, 1), (false, 1.0, 0.0));
    }

    #[test]
    fn test_registration_allocates_dependent_ids() {
        let mut registry = GoalRegistry::new();
        let executor = unit().register(&mut registry).unwrap();

        let branches = registry.branches_of("Gate", "check");
        assert_eq!(branches.len(), 2);
        assert!(branches[1].id > branches[0].id);
        assert_eq!(branches[1].control_dependencies[0].branch, branches[0].id);
        assert_eq!(registry.branchless_methods_of("Gate"), vec![("wait", 8)]);
        assert_eq!(registry.total_goals(), 5);
        assert_eq!(executor.unit().test_cluster().len(), 2);
    }

    #[test]
    fn test_guarded_branch_only_reached_when_guard_holds() {
        let mut registry = GoalRegistry::new();
        let executor = unit().register(&mut registry).unwrap();
        let ids: Vec<BranchId> = registry
            .branches_of("Gate", "check")
            .iter()
            .map(|b| b.id)
            .collect();
        let token = CancellationToken::new();

        let low = executor.execute(&call_check(4, true), &token);
        assert_eq!(low.trace.predicate_execution_count.get(&ids[0]), Some(&1));
        assert_eq!(low.trace.true_distance[&ids[0]], 7.0);
        assert!(!low.trace.predicate_execution_count.contains_key(&ids[1]));

        let high = executor.execute(&call_check(11, true), &token);
        assert_eq!(high.trace.true_distance[&ids[1]], 0.0);
        assert!(high.thrown_exceptions.is_empty());
        assert_eq!(high.executed_statement_count, 3);
    }

    #[test]
    fn test_unit_exception_stops_test() {
        let mut registry = GoalRegistry::new();
        let executor = unit().register(&mut registry).unwrap();
        let mut test = call_check(13, false);
        test.push(Statement::call("Gate", "check", vec![0, 1]));

        let result = executor.execute(&test, &CancellationToken::new());
        assert_eq!(result.first_exception_position(), Some(2));
        assert!(!result.is_unreliable());
        assert_eq!(result.trace.calls_to(&MethodKey::new("Gate", "check")).count(), 1);
    }

    #[test]
    fn test_harness_exception_on_bad_call() {
        let mut registry = GoalRegistry::new();
        let executor = unit().register(&mut registry).unwrap();
        let test = TestCase::from_statements(vec![
            Statement::primitive(Value::Int(1)),
            Statement::call("Gate", "missing", vec![0]),
        ]);

        let result = executor.execute(&test, &CancellationToken::new());
        assert!(result.has_harness_exception());
    }

    #[test]
    fn test_spinning_call_times_out() {
        let mut registry = GoalRegistry::new();
        let executor = unit().register(&mut registry).unwrap();
        let test = TestCase::from_statements(vec![
            Statement::primitive(Value::Int(-1)),
            Statement::call("Gate", "wait", vec![0]),
        ]);

        let token = CancellationToken::new().with_timeout(Duration::from_millis(20));
        let result = executor.execute(&test, &token);
        assert!(result.timed_out());
        assert!(result.trace.was_called(&MethodKey::new("Gate", "wait")));
    }

    #[test]
    fn test_invalid_units_rejected() {
        let bad_param = r#"{"class_name": "A", "methods": [
            {"name": "f", "line": 1, "params": [],
             "branches": [{"line": 2, "condition": {"param": 0, "op": "eq", "constant": 1}}]}
        ]}"#;
        assert!(matches!(
            SyntheticUnit::from_json_str(bad_param),
            Err(SyntheticUnitError::UnknownParam { .. })
        ));

        let self_guard = r#"{"class_name": "A", "methods": [
            {"name": "f", "line": 1, "params": ["int"],
             "branches": [{"line": 2, "condition": {"param": 0, "op": "eq", "constant": 1},
                           "guard": {"branch": 0, "value": true}}]}
        ]}"#;
        assert!(matches!(
            SyntheticUnit::from_json_str(self_guard),
            Err(SyntheticUnitError::InvalidGuard { .. })
        ));

        assert!(SyntheticUnit::from_json_str(r#"{"class_name": "A", "methods": []}"#).is_err());
    }

    #[test]
    fn test_example_unit_loads() {
        let unit = SyntheticUnit::example().unwrap();
        let mut registry = GoalRegistry::new();
        unit.register(&mut registry).unwrap();
        assert!(registry.total_goals() > 0);
    }
}
