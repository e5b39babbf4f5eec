//! Test case representation shared by the search core and executors.
//!
//! A test case is a straight-line sequence of statements. Primitive statements
//! bind a literal to their position; call statements invoke a method of the
//! unit under test with arguments referring to earlier primitive positions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a primitive value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Int,
    Bool,
}

/// A literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Int(i64),
    Bool(bool),
}

impl Value {
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Int(_) => ParamKind::Int,
            Self::Bool(_) => ParamKind::Bool,
        }
    }

    /// Integer view used for predicate evaluation; booleans map to 0/1.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Self::Int(v) => v,
            Self::Bool(b) => i64::from(b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// One statement of a test case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statement {
    Primitive {
        value: Value,
    },
    Call {
        class_name: String,
        method_name: String,
        /// Positions of the primitive statements passed as arguments.
        args: Vec<usize>,
    },
}

impl Statement {
    pub fn primitive(value: Value) -> Self {
        Self::Primitive { value }
    }

    pub fn call(class_name: &str, method_name: &str, args: Vec<usize>) -> Self {
        Self::Call {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            args,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Kind of the bound value, if this is a primitive.
    pub fn value_kind(&self) -> Option<ParamKind> {
        match self {
            Self::Primitive { value } => Some(value.kind()),
            Self::Call { .. } => None,
        }
    }

    fn shift_references(&mut self, from: usize, by: isize) {
        if let Self::Call { args, .. } = self {
            for arg in args.iter_mut().filter(|arg| **arg >= from) {
                *arg = arg.saturating_add_signed(by);
            }
        }
    }
}

/// An ordered statement sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCase {
    statements: Vec<Statement>,
}

impl TestCase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_statements(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Statement> {
        self.statements.get(position)
    }

    /// Append a statement and return its position.
    pub fn push(&mut self, statement: Statement) -> usize {
        self.statements.push(statement);
        self.statements.len() - 1
    }

    /// Replace the statement at `position` in place.
    pub fn replace(&mut self, position: usize, statement: Statement) {
        if let Some(slot) = self.statements.get_mut(position) {
            *slot = statement;
        }
    }

    /// Drop every statement from `len` on.
    pub fn truncate(&mut self, len: usize) {
        self.statements.truncate(len);
    }

    /// Number of call statements.
    pub fn call_count(&self) -> usize {
        self.statements.iter().filter(|s| s.is_call()).count()
    }

    /// Positions before `before` holding a primitive of the given kind.
    pub fn primitive_positions(&self, before: usize, kind: ParamKind) -> Vec<usize> {
        self.statements
            .iter()
            .take(before)
            .enumerate()
            .filter(|(_, s)| s.value_kind() == Some(kind))
            .map(|(i, _)| i)
            .collect()
    }

    /// Insert a block of statements at `position`.
    ///
    /// References inside `block` are absolute positions in the resulting test.
    /// References of statements after the insertion point are shifted.
    pub fn insert_block(&mut self, position: usize, block: Vec<Statement>) {
        let position = position.min(self.statements.len());
        let shift = block.len() as isize;
        for statement in &mut self.statements[position..] {
            statement.shift_references(position, shift);
        }
        self.statements.splice(position..position, block);
    }

    /// Remove the statement at `position` and return how many statements were
    /// removed in total.
    ///
    /// Calls that referenced a removed primitive are rebound to the closest
    /// earlier primitive of the same kind, or removed as well when none exists.
    pub fn remove(&mut self, position: usize) -> usize {
        if position >= self.statements.len() {
            return 0;
        }
        let removed = self.statements.remove(position);
        let replacement = removed
            .value_kind()
            .and_then(|kind| self.primitive_positions(position, kind).last().copied());

        let mut count = 1;
        let mut i = position;
        while i < self.statements.len() {
            let mut orphaned = false;
            if let Statement::Call { args, .. } = &mut self.statements[i] {
                for arg in args.iter_mut() {
                    if *arg == position {
                        match replacement {
                            Some(r) => *arg = r,
                            None => orphaned = true,
                        }
                    } else if *arg > position {
                        *arg -= 1;
                    }
                }
            }
            if orphaned {
                count += self.remove(i);
            } else {
                i += 1;
            }
        }
        count
    }

    /// Every call argument refers to an earlier primitive.
    pub fn is_valid(&self) -> bool {
        self.statements.iter().enumerate().all(|(i, s)| match s {
            Statement::Primitive { .. } => true,
            Statement::Call { args, .. } => args.iter().all(|&a| {
                a < i && matches!(self.statements[a], Statement::Primitive { .. })
            }),
        })
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, statement) in self.statements.iter().enumerate() {
            match statement {
                Statement::Primitive { value } => writeln!(f, "v{i} = {value};")?,
                Statement::Call {
                    class_name,
                    method_name,
                    args,
                } => {
                    let args: Vec<String> = args.iter().map(|a| format!("v{a}")).collect();
                    writeln!(f, "{class_name}.{method_name}({});", args.join(", "))?;
                }
            }
        }
        Ok(())
    }
}
