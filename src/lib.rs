//! Suitegen - Search-based generation of unit test suites.
//!
//! This crate evolves whole test suites with a genetic algorithm, scoring
//! each suite by how close it comes to covering every branch and method of
//! the unit under test.
//!
//! # Architecture
//!
//! The crate is split into three modules:
//!
//! - `schema`: Configuration, goals, test cases, execution traces and reports
//! - `evolution`: Goal registry, fitness, coverage archive and the search
//! - `executor`: Test execution interface and a declarative synthetic unit
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use suitegen::{GeneticAlgorithm, GoalRegistry, SearchConfig, SyntheticUnit};
//!
//! let unit = SyntheticUnit::example().unwrap();
//! let mut registry = GoalRegistry::new();
//! let executor = unit.register(&mut registry).unwrap();
//!
//! let mut search = GeneticAlgorithm::new(
//!     SearchConfig::default(),
//!     registry,
//!     unit.test_cluster(),
//!     Arc::new(executor),
//! )
//! .unwrap();
//! let result = search.generate_solution().unwrap();
//!
//! println!("Coverage: {:.1}%", result.stats.coverage * 100.0);
//! ```

pub mod evolution;
pub mod executor;
pub mod schema;

// Re-export commonly used types
pub use evolution::{GeneticAlgorithm, GoalRegistry, SearchError};
pub use executor::{Executor, SyntheticUnit};
pub use schema::{SearchConfig, SearchResult};
