//! Schema module - Configuration, goal and execution types for test generation.

mod config;
mod execution;
mod goal;
mod report;
mod test_case;
mod unit;

pub use config::*;
pub use execution::*;
pub use goal::*;
pub use report::*;
pub use test_case::*;
pub use unit::*;
