//! Description of the callable surface of the unit under test.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ParamKind;

/// Fully qualified method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodKey {
    pub class_name: String,
    pub method_name: String,
}

impl MethodKey {
    pub fn new(class_name: &str, method_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)
    }
}

/// A method the search may call, with its parameter kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableMethod {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<ParamKind>,
}

impl CallableMethod {
    pub fn key(&self) -> MethodKey {
        MethodKey::new(&self.class_name, &self.method_name)
    }
}

/// All methods available to test factories and insertion mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCluster {
    methods: Vec<CallableMethod>,
}

impl TestCluster {
    pub fn new(methods: Vec<CallableMethod>) -> Self {
        Self { methods }
    }

    pub fn methods(&self) -> &[CallableMethod] {
        &self.methods
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CallableMethod> {
        self.methods.get(index)
    }

    pub fn find(&self, key: &MethodKey) -> Option<&CallableMethod> {
        self.methods
            .iter()
            .find(|m| m.class_name == key.class_name && m.method_name == key.method_name)
    }
}
