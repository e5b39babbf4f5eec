//! Execution outcome types produced by an executor for one test case.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{BranchId, MethodKey};

/// Classification of an exception observed while running a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// Raised by the code under test; an ordinary outcome.
    Sut,
    /// Raised by the harness while setting up or invoking a statement.
    Harness,
    /// The execution exceeded its time budget.
    Timeout,
    /// The whole search was interrupted while the test ran.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrownException {
    pub kind: ExceptionKind,
    pub message: String,
}

/// Branch trace of one method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: MethodKey,
    /// Predicates evaluated during the call, in execution order.
    pub branch_trace: Vec<BranchId>,
    pub true_distances: Vec<f64>,
    pub false_distances: Vec<f64>,
}

impl MethodCall {
    /// Minimal distance towards `value` over every evaluation of `branch`
    /// in this call, or `None` when the predicate was never reached.
    pub fn min_distance(&self, branch: BranchId, value: bool) -> Option<f64> {
        let distances = if value {
            &self.true_distances
        } else {
            &self.false_distances
        };
        self.branch_trace
            .iter()
            .zip(distances)
            .filter(|(id, _)| **id == branch)
            .map(|(_, d)| *d)
            .reduce(f64::min)
    }
}

/// Aggregated coverage trace of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub predicate_execution_count: BTreeMap<BranchId, usize>,
    pub true_distance: BTreeMap<BranchId, f64>,
    pub false_distance: BTreeMap<BranchId, f64>,
    pub method_call_count: BTreeMap<MethodKey, usize>,
    pub method_calls: Vec<MethodCall>,
}

impl Trace {
    /// Record entry into a method and return the index of the new call.
    pub fn enter_method(&mut self, method: MethodKey) -> usize {
        *self.method_call_count.entry(method.clone()).or_insert(0) += 1;
        self.method_calls.push(MethodCall {
            method,
            branch_trace: Vec::new(),
            true_distances: Vec::new(),
            false_distances: Vec::new(),
        });
        self.method_calls.len() - 1
    }

    /// Record one evaluation of `branch` inside call `call`.
    pub fn record_predicate(
        &mut self,
        call: usize,
        branch: BranchId,
        true_distance: f64,
        false_distance: f64,
    ) {
        *self.predicate_execution_count.entry(branch).or_insert(0) += 1;
        let t = self.true_distance.entry(branch).or_insert(f64::INFINITY);
        *t = t.min(true_distance);
        let f = self.false_distance.entry(branch).or_insert(f64::INFINITY);
        *f = f.min(false_distance);

        if let Some(method_call) = self.method_calls.get_mut(call) {
            method_call.branch_trace.push(branch);
            method_call.true_distances.push(true_distance);
            method_call.false_distances.push(false_distance);
        }
    }

    /// Invocations of one method.
    pub fn calls_to<'a>(&'a self, method: &'a MethodKey) -> impl Iterator<Item = &'a MethodCall> {
        self.method_calls.iter().filter(move |c| &c.method == method)
    }

    pub fn was_called(&self, method: &MethodKey) -> bool {
        self.method_call_count.get(method).copied().unwrap_or(0) > 0
    }
}

/// Outcome of running one test case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Exceptions by statement position.
    pub thrown_exceptions: BTreeMap<usize, ThrownException>,
    pub executed_statement_count: usize,
    pub execution_time_ms: u64,
    pub trace: Trace,
}

impl ExecutionResult {
    /// Record an exception at `position`.
    pub fn report_exception(&mut self, position: usize, kind: ExceptionKind, message: impl Into<String>) {
        self.thrown_exceptions.insert(
            position,
            ThrownException {
                kind,
                message: message.into(),
            },
        );
    }

    pub fn timed_out(&self) -> bool {
        self.thrown_exceptions
            .values()
            .any(|e| e.kind == ExceptionKind::Timeout)
    }

    /// Aborted by an external interrupt rather than by the test itself.
    pub fn was_cancelled(&self) -> bool {
        self.thrown_exceptions
            .values()
            .any(|e| e.kind == ExceptionKind::Cancelled)
    }

    /// Whether the harness failed to run the test as written.
    pub fn has_harness_exception(&self) -> bool {
        self.thrown_exceptions
            .values()
            .any(|e| e.kind == ExceptionKind::Harness)
    }

    /// Timed out, cancelled or hit a harness exception. Such results are
    /// not trusted.
    pub fn is_unreliable(&self) -> bool {
        self.timed_out() || self.was_cancelled() || self.has_harness_exception()
    }

    /// Position of the first exception, if any.
    pub fn first_exception_position(&self) -> Option<usize> {
        self.thrown_exceptions.keys().next().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_keeps_minimum_distance() {
        let mut trace = Trace::default();
        let method = MethodKey::new("Calc", "abs");
        let call = trace.enter_method(method.clone());
        trace.record_predicate(call, BranchId(1), 4.0, 0.0);
        trace.record_predicate(call, BranchId(1), 2.0, 0.0);

        assert_eq!(trace.predicate_execution_count[&BranchId(1)], 2);
        assert_eq!(trace.true_distance[&BranchId(1)], 2.0);
        assert_eq!(trace.false_distance[&BranchId(1)], 0.0);
        assert!(trace.was_called(&method));
        assert_eq!(trace.method_calls[call].min_distance(BranchId(1), true), Some(2.0));
        assert_eq!(trace.method_calls[call].min_distance(BranchId(2), true), None);
    }

    #[test]
    fn test_exception_classification() {
        let mut result = ExecutionResult::default();
        assert!(!result.is_unreliable());

        result.report_exception(3, ExceptionKind::Sut, "overflow");
        assert!(!result.is_unreliable());
        assert_eq!(result.first_exception_position(), Some(3));

        result.report_exception(1, ExceptionKind::Timeout, "deadline");
        assert!(result.timed_out());
        assert!(result.is_unreliable());
        assert_eq!(result.first_exception_position(), Some(1));
        assert!(!result.was_cancelled());

        let mut aborted = ExecutionResult::default();
        aborted.report_exception(0, ExceptionKind::Cancelled, "interrupted");
        assert!(aborted.was_cancelled());
        assert!(!aborted.timed_out());
        assert!(aborted.is_unreliable());
    }
}
