//! Coverage goal types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::MethodKey;

/// Identifier of an instrumented branch predicate, unique within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub u32);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A branch predicate that must take `value` for control to reach a dependent branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlDependency {
    pub branch: BranchId,
    pub value: bool,
}

/// A branch predicate reported by source analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub class_name: String,
    pub method_name: String,
    pub line_no: u32,
    #[serde(default)]
    pub is_switch: bool,
    #[serde(default)]
    pub target_case_value: Option<i64>,
    /// Branches introduced by instrumentation itself; never scored.
    #[serde(default)]
    pub is_instrumented: bool,
    /// Predicates this branch is directly control dependent on. Empty means
    /// the branch is reached whenever its method is entered.
    #[serde(default)]
    pub control_dependencies: Vec<ControlDependency>,
}

impl Branch {
    /// A plain branch with no control dependencies.
    pub fn new(id: BranchId, class_name: &str, method_name: &str, line_no: u32) -> Self {
        Self {
            id,
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            line_no,
            is_switch: false,
            target_case_value: None,
            is_instrumented: false,
            control_dependencies: Vec::new(),
        }
    }

    /// Add a control dependency.
    pub fn depends_on(mut self, branch: BranchId, value: bool) -> Self {
        self.control_dependencies
            .push(ControlDependency { branch, value });
        self
    }

    pub fn method_key(&self) -> MethodKey {
        MethodKey::new(&self.class_name, &self.method_name)
    }
}

/// Entry of a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RootGoal {
    pub class_name: String,
    pub method_name: String,
}

/// One outcome of a branch predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchGoal {
    pub branch: BranchId,
    pub class_name: String,
    pub method_name: String,
    pub value: bool,
}

/// A coverage goal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Goal {
    Root(RootGoal),
    Branch(BranchGoal),
}

impl Goal {
    pub fn root(class_name: &str, method_name: &str) -> Self {
        Self::Root(RootGoal {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
        })
    }

    pub fn branch(branch: &Branch, value: bool) -> Self {
        Self::Branch(BranchGoal {
            branch: branch.id,
            class_name: branch.class_name.clone(),
            method_name: branch.method_name.clone(),
            value,
        })
    }

    pub fn class_name(&self) -> &str {
        match self {
            Self::Root(goal) => &goal.class_name,
            Self::Branch(goal) => &goal.class_name,
        }
    }

    pub fn method_name(&self) -> &str {
        match self {
            Self::Root(goal) => &goal.method_name,
            Self::Branch(goal) => &goal.method_name,
        }
    }

    pub fn method_key(&self) -> MethodKey {
        MethodKey::new(self.class_name(), self.method_name())
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(goal) => write!(f, "{}.{}: root", goal.class_name, goal.method_name),
            Self::Branch(goal) => write!(
                f,
                "{}.{}: branch {} ({})",
                goal.class_name, goal.method_name, goal.branch, goal.value
            ),
        }
    }
}
