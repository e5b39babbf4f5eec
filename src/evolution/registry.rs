//! Catalog of coverage goals for one analyzed unit.
//!
//! Populated once by the analyzer before the search starts and only read
//! afterwards. Each search run owns its own registry.

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{Branch, BranchId, Goal, MethodKey};

/// Registration errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Branch {0} is already registered")]
    DuplicateBranch(BranchId),
    #[error("Method {method} is registered both with and without branches")]
    MethodKindConflict { method: MethodKey },
    #[error("Branch {branch} depends on unknown branch {dependency}")]
    UnknownDependency {
        branch: BranchId,
        dependency: BranchId,
    },
}

/// Branches and branchless methods per class.
#[derive(Debug, Clone, Default)]
pub struct GoalRegistry {
    branches: BTreeMap<BranchId, Branch>,
    class_method_branches: BTreeMap<String, BTreeMap<String, Vec<BranchId>>>,
    branchless_methods: BTreeMap<String, BTreeMap<String, u32>>,
    next_id: u32,
}

impl GoalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused branch id. Ids handed out are strictly increasing.
    pub fn allocate_branch_id(&mut self) -> BranchId {
        while self.branches.contains_key(&BranchId(self.next_id)) {
            self.next_id += 1;
        }
        let id = BranchId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a branch predicate.
    pub fn register_branch(&mut self, branch: Branch) -> Result<(), RegistryError> {
        if self.branches.contains_key(&branch.id) {
            return Err(RegistryError::DuplicateBranch(branch.id));
        }
        if self
            .branchless_methods
            .get(&branch.class_name)
            .is_some_and(|methods| methods.contains_key(&branch.method_name))
        {
            return Err(RegistryError::MethodKindConflict {
                method: branch.method_key(),
            });
        }

        self.next_id = self.next_id.max(branch.id.0.saturating_add(1));
        self.class_method_branches
            .entry(branch.class_name.clone())
            .or_default()
            .entry(branch.method_name.clone())
            .or_default()
            .push(branch.id);
        self.branches.insert(branch.id, branch);
        Ok(())
    }

    /// Register a method without branches. Re-registration updates the line.
    pub fn register_branchless_method(
        &mut self,
        class_name: &str,
        method_name: &str,
        line_no: u32,
    ) -> Result<(), RegistryError> {
        if !self.branches_of(class_name, method_name).is_empty() {
            return Err(RegistryError::MethodKindConflict {
                method: MethodKey::new(class_name, method_name),
            });
        }
        self.branchless_methods
            .entry(class_name.to_string())
            .or_default()
            .insert(method_name.to_string(), line_no);
        Ok(())
    }

    /// Check that every control dependency names a registered branch.
    pub fn check_dependencies(&self) -> Result<(), RegistryError> {
        for branch in self.branches.values() {
            for dependency in &branch.control_dependencies {
                if !self.branches.contains_key(&dependency.branch) {
                    return Err(RegistryError::UnknownDependency {
                        branch: branch.id,
                        dependency: dependency.branch,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(&id)
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn branches_of(&self, class_name: &str, method_name: &str) -> Vec<&Branch> {
        self.class_method_branches
            .get(class_name)
            .and_then(|methods| methods.get(method_name))
            .map(|ids| ids.iter().filter_map(|id| self.branches.get(id)).collect())
            .unwrap_or_default()
    }

    /// Branchless methods of a class with their line numbers.
    pub fn branchless_methods_of(&self, class_name: &str) -> Vec<(&str, u32)> {
        self.branchless_methods
            .get(class_name)
            .map(|methods| {
                methods
                    .iter()
                    .map(|(name, line)| (name.as_str(), *line))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every method of a class the registry knows about.
    pub fn known_methods(&self, class_name: &str) -> BTreeSet<&str> {
        let with_branches = self
            .class_method_branches
            .get(class_name)
            .into_iter()
            .flat_map(|methods| methods.keys());
        let branchless = self
            .branchless_methods
            .get(class_name)
            .into_iter()
            .flat_map(|methods| methods.keys());
        with_branches.chain(branchless).map(String::as_str).collect()
    }

    pub fn known_classes(&self) -> BTreeSet<&str> {
        self.class_method_branches
            .keys()
            .chain(self.branchless_methods.keys())
            .map(String::as_str)
            .collect()
    }

    /// Every known method across all classes.
    pub fn target_methods(&self) -> BTreeSet<MethodKey> {
        self.known_classes()
            .into_iter()
            .flat_map(|class| {
                self.known_methods(class)
                    .into_iter()
                    .map(move |method| MethodKey::new(class, method))
            })
            .collect()
    }

    /// Scored goals: one root goal per branchless method and a true/false
    /// pair per branch not introduced by instrumentation.
    pub fn goals(&self) -> Vec<Goal> {
        let roots = self.branchless_methods.iter().flat_map(|(class, methods)| {
            methods.keys().map(move |method| Goal::root(class, method))
        });
        let branches = self
            .branches
            .values()
            .filter(|b| !b.is_instrumented)
            .flat_map(|b| [Goal::branch(b, true), Goal::branch(b, false)]);
        roots.chain(branches).collect()
    }

    pub fn total_goals(&self) -> usize {
        self.branchless_method_count() + 2 * self.scored_branch_count()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn scored_branch_count(&self) -> usize {
        self.branches.values().filter(|b| !b.is_instrumented).count()
    }

    pub fn branchless_method_count(&self) -> usize {
        self.branchless_methods.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty() && self.branchless_methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> GoalRegistry {
        let mut registry = GoalRegistry::new();
        registry
            .register_branch(Branch::new(BranchId(1), "Stack", "push", 10))
            .unwrap();
        registry
            .register_branch(Branch::new(BranchId(2), "Stack", "push", 12).depends_on(BranchId(1), false))
            .unwrap();
        registry
            .register_branchless_method("Stack", "size", 20)
            .unwrap();
        registry
    }

    #[test]
    fn test_registry_lookup() {
        let registry = registry();

        assert_eq!(registry.branches_of("Stack", "push").len(), 2);
        assert!(registry.branches_of("Stack", "pop").is_empty());
        assert_eq!(registry.branchless_methods_of("Stack"), vec![("size", 20)]);
        assert_eq!(
            registry.known_methods("Stack").into_iter().collect::<Vec<_>>(),
            vec!["push", "size"]
        );
        assert_eq!(registry.total_goals(), 5);
        assert_eq!(registry.goals().len(), 5);
        assert!(registry.check_dependencies().is_ok());
    }

    #[test]
    fn test_duplicate_branch_rejected() {
        let mut registry = registry();
        let result = registry.register_branch(Branch::new(BranchId(2), "Stack", "pop", 30));
        assert!(matches!(result, Err(RegistryError::DuplicateBranch(BranchId(2)))));
    }

    #[test]
    fn test_method_kind_conflict() {
        let mut registry = registry();
        assert!(matches!(
            registry.register_branchless_method("Stack", "push", 10),
            Err(RegistryError::MethodKindConflict { .. })
        ));
        assert!(matches!(
            registry.register_branch(Branch::new(BranchId(9), "Stack", "size", 21)),
            Err(RegistryError::MethodKindConflict { .. })
        ));
    }

    #[test]
    fn test_allocated_ids_are_monotonic_and_unused() {
        let mut registry = registry();
        let a = registry.allocate_branch_id();
        let b = registry.allocate_branch_id();
        assert!(a > BranchId(2));
        assert!(b > a);

        registry
            .register_branch(Branch::new(a, "Stack", "pop", 31))
            .unwrap();
        assert!(registry.allocate_branch_id() > b);
    }

    #[test]
    fn test_instrumented_branches_not_scored() {
        let mut registry = GoalRegistry::new();
        let mut branch = Branch::new(BranchId(4), "Stack", "peek", 40);
        branch.is_instrumented = true;
        registry.register_branch(branch).unwrap();

        assert_eq!(registry.total_goals(), 0);
        assert!(registry.goals().is_empty());
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_unknown_dependency_reported() {
        let mut registry = GoalRegistry::new();
        registry
            .register_branch(Branch::new(BranchId(1), "Stack", "push", 10).depends_on(BranchId(7), true))
            .unwrap();
        assert!(matches!(
            registry.check_dependencies(),
            Err(RegistryError::UnknownDependency { .. })
        ));
    }
}
