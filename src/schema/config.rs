//! Search configuration types.
//!
//! Every field has a serde default so a configuration file only needs to name
//! what it changes. Unknown keys are rejected when the file is parsed.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration for one test generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    /// Population and suite shape settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Variation operator settings.
    #[serde(default)]
    pub operators: OperatorConfig,
    /// Parent selection.
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Stopping limits.
    #[serde(default)]
    pub stopping: StoppingConfig,
    /// Local search schedule.
    #[serde(default)]
    pub local_search: LocalSearchConfig,
    /// Secondary objectives and their gating policy.
    #[serde(default)]
    pub secondary: SecondaryObjectiveConfig,
    /// Suite fitness settings.
    #[serde(default)]
    pub fitness: FitnessConfig,
    /// Test execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Population size, elitism and initial suite shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopulationConfig {
    /// Number of suites per generation.
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Number of best suites copied unchanged into the next generation.
    #[serde(default = "default_elite")]
    pub elite: usize,
    /// Upper bound on the number of tests in a freshly generated suite.
    #[serde(default = "default_initial_tests")]
    pub initial_tests: usize,
    /// Upper bound on the number of tests a suite may grow to.
    #[serde(default = "default_max_tests")]
    pub max_tests: usize,
    /// Probability of seeding a new test from an archived witness.
    #[serde(default = "default_seed_clone")]
    pub seed_clone: f64,
    /// Maximum number of mutations applied to a cloned witness.
    #[serde(default = "default_seed_mutations")]
    pub seed_mutations: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            elite: default_elite(),
            initial_tests: default_initial_tests(),
            max_tests: default_max_tests(),
            seed_clone: default_seed_clone(),
            seed_mutations: default_seed_mutations(),
        }
    }
}

fn default_population_size() -> usize {
    50
}
fn default_elite() -> usize {
    1
}
fn default_initial_tests() -> usize {
    10
}
fn default_max_tests() -> usize {
    100
}
fn default_seed_clone() -> f64 {
    0.2
}
fn default_seed_mutations() -> usize {
    10
}

/// Crossover and mutation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    /// Probability of recombining two selected parents.
    #[serde(default = "default_crossover_rate")]
    pub crossover_rate: f64,
    /// Suite crossover operator.
    #[serde(default)]
    pub crossover: CrossoverKind,
    /// Length bound of a single test; longer tests are chopped at their
    /// first exception before mutation.
    #[serde(default = "default_chromosome_length")]
    pub chromosome_length: usize,
    /// Bloat limit on the total number of statements in a suite.
    #[serde(default = "default_max_suite_length")]
    pub max_suite_length: usize,
    /// Probability of the delete operator when a test is mutated.
    #[serde(default = "default_operator_probability")]
    pub p_test_delete: f64,
    /// Probability of the change operator when a test is mutated.
    #[serde(default = "default_operator_probability")]
    pub p_test_change: f64,
    /// Probability of the insert operator when a test is mutated.
    #[serde(default = "default_operator_probability")]
    pub p_test_insert: f64,
    /// Base of the exponentially decreasing statement insertion probability.
    #[serde(default = "default_statement_insertion")]
    pub p_statement_insertion: f64,
    /// Base of the exponentially decreasing test insertion probability.
    #[serde(default = "default_test_insertion")]
    pub p_test_insertion: f64,
    /// Standard deviation of the Gaussian delta applied to integer literals.
    #[serde(default = "default_primitive_delta")]
    pub primitive_delta: f64,
    /// Absolute bound of freshly drawn integer literals.
    #[serde(default = "default_max_int")]
    pub max_int: i64,
    /// Failed offspring constructions tolerated per generation before the
    /// remaining slots are filled with parent copies.
    #[serde(default = "default_max_construction_attempts")]
    pub max_construction_attempts: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            crossover_rate: default_crossover_rate(),
            crossover: CrossoverKind::default(),
            chromosome_length: default_chromosome_length(),
            max_suite_length: default_max_suite_length(),
            p_test_delete: default_operator_probability(),
            p_test_change: default_operator_probability(),
            p_test_insert: default_operator_probability(),
            p_statement_insertion: default_statement_insertion(),
            p_test_insertion: default_test_insertion(),
            primitive_delta: default_primitive_delta(),
            max_int: default_max_int(),
            max_construction_attempts: default_max_construction_attempts(),
        }
    }
}

fn default_crossover_rate() -> f64 {
    0.75
}
fn default_chromosome_length() -> usize {
    40
}
fn default_max_suite_length() -> usize {
    2000
}
fn default_operator_probability() -> f64 {
    1.0 / 3.0
}
fn default_statement_insertion() -> f64 {
    0.5
}
fn default_test_insertion() -> f64 {
    0.1
}
fn default_primitive_delta() -> f64 {
    20.0
}
fn default_max_int() -> i64 {
    2048
}
fn default_max_construction_attempts() -> usize {
    1000
}

/// Suite crossover operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverKind {
    /// One relative split point shared by both parents.
    #[default]
    SinglePointRelative,
    /// Independent split points in each parent.
    SinglePoint,
}

/// Parent selection method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SelectionConfig {
    /// Rank-based selection over the sorted population.
    Rank {
        #[serde(default = "default_rank_bias")]
        bias: f64,
    },
    /// Tournament selection with configurable size.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Selection proportional to inverted fitness.
    RouletteWheel,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::Rank {
            bias: default_rank_bias(),
        }
    }
}

fn default_rank_bias() -> f64 {
    1.7
}
fn default_tournament_size() -> usize {
    10
}

/// Stopping limits. A limit of `None` disables the condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoppingConfig {
    /// Maximum number of generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: Option<u64>,
    /// Wall-clock budget in seconds.
    #[serde(default = "default_max_time_secs")]
    pub max_time_secs: Option<u64>,
    /// Maximum number of suite fitness evaluations.
    #[serde(default)]
    pub max_evaluations: Option<u64>,
    /// Stop as soon as a suite reaches fitness zero.
    #[serde(default = "default_true")]
    pub stop_at_zero_fitness: bool,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            max_generations: default_max_generations(),
            max_time_secs: default_max_time_secs(),
            max_evaluations: None,
            stop_at_zero_fitness: true,
        }
    }
}

fn default_max_generations() -> Option<u64> {
    Some(100)
}
fn default_max_time_secs() -> Option<u64> {
    Some(60)
}
fn default_true() -> bool {
    true
}

/// Local search schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalSearchConfig {
    /// Apply local search every `rate` generations; 0 disables it.
    #[serde(default)]
    pub rate: usize,
    /// Initial probability of applying local search on a scheduled generation.
    #[serde(default = "default_local_search_probability")]
    pub probability: f64,
    /// Multiplicative adaptation factor for the probability.
    #[serde(default = "default_adaptation_rate")]
    pub adaptation_rate: f64,
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            rate: 0,
            probability: default_local_search_probability(),
            adaptation_rate: default_adaptation_rate(),
        }
    }
}

fn default_local_search_probability() -> f64 {
    1.0
}
fn default_adaptation_rate() -> f64 {
    3.0
}

/// Secondary objectives used to break fitness ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryObjectiveKind {
    /// Fewer statements in total.
    TotalLength,
    /// Fewer tests.
    Size,
}

/// Secondary objective list and gating policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecondaryObjectiveConfig {
    /// Ordered tie-breakers.
    #[serde(default = "default_secondary_objectives")]
    pub objectives: Vec<SecondaryObjectiveKind>,
    /// Enable the first objective once search progress exceeds this
    /// percentage; 0 keeps it enabled from the start.
    #[serde(default)]
    pub enable_after_percent: f64,
    /// Toggle the first objective on starvation instead.
    #[serde(default)]
    pub starvation: bool,
    /// Generations without improvement that count as starvation.
    #[serde(default = "default_starvation_after")]
    pub starvation_after_generation: usize,
}

impl Default for SecondaryObjectiveConfig {
    fn default() -> Self {
        Self {
            objectives: default_secondary_objectives(),
            enable_after_percent: 0.0,
            starvation: false,
            starvation_after_generation: default_starvation_after(),
        }
    }
}

fn default_secondary_objectives() -> Vec<SecondaryObjectiveKind> {
    vec![SecondaryObjectiveKind::TotalLength]
}
fn default_starvation_after() -> usize {
    500
}

/// Suite fitness settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitnessConfig {
    /// Contribution of a branch predicate that was executed exactly once.
    #[serde(default = "default_single_execution_penalty")]
    pub single_execution_penalty: f64,
    /// Bank covered goals in the archive and stop scoring them.
    #[serde(default = "default_true")]
    pub archive: bool,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            single_execution_penalty: default_single_execution_penalty(),
            archive: true,
        }
    }
}

fn default_single_execution_penalty() -> f64 {
    1.0
}

/// Test execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Per-test timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Execute the tests of a generation on the rayon thread pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            parallel: true,
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}

impl SearchConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population.size < 2 {
            return Err(ConfigError::PopulationTooSmall(self.population.size));
        }
        if self.population.elite >= self.population.size {
            return Err(ConfigError::EliteTooLarge {
                elite: self.population.elite,
                size: self.population.size,
            });
        }
        if self.population.initial_tests == 0 || self.population.max_tests == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "population.initial_tests/max_tests",
            });
        }
        if self.operators.chromosome_length == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "operators.chromosome_length",
            });
        }
        if self.operators.max_int <= 0 {
            return Err(ConfigError::InvalidLimit {
                field: "operators.max_int",
            });
        }
        if self.execution.timeout_ms == 0 {
            return Err(ConfigError::InvalidLimit {
                field: "execution.timeout_ms",
            });
        }

        let check_probability = |value: f64, field: &'static str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::InvalidProbability { field, value })
            }
        };

        check_probability(self.population.seed_clone, "population.seed_clone")?;
        check_probability(self.operators.crossover_rate, "operators.crossover_rate")?;
        check_probability(self.operators.p_test_delete, "operators.p_test_delete")?;
        check_probability(self.operators.p_test_change, "operators.p_test_change")?;
        check_probability(self.operators.p_test_insert, "operators.p_test_insert")?;
        check_probability(
            self.operators.p_statement_insertion,
            "operators.p_statement_insertion",
        )?;
        check_probability(self.operators.p_test_insertion, "operators.p_test_insertion")?;
        check_probability(self.local_search.probability, "local_search.probability")?;

        match self.selection {
            SelectionConfig::Rank { bias } if !(bias > 1.0 && bias <= 2.0) => {
                return Err(ConfigError::InvalidRankBias(bias));
            }
            SelectionConfig::Tournament { size } if size == 0 => {
                return Err(ConfigError::InvalidLimit {
                    field: "selection.size",
                });
            }
            _ => {}
        }

        if self.local_search.adaptation_rate < 1.0 {
            return Err(ConfigError::InvalidAdaptationRate(
                self.local_search.adaptation_rate,
            ));
        }
        if !(0.0..=100.0).contains(&self.secondary.enable_after_percent) {
            return Err(ConfigError::InvalidPercent(
                self.secondary.enable_after_percent,
            ));
        }
        if !(self.fitness.single_execution_penalty > 0.0) {
            return Err(ConfigError::InvalidPenalty(
                self.fitness.single_execution_penalty,
            ));
        }

        let limits = [
            self.stopping.max_generations,
            self.stopping.max_time_secs,
            self.stopping.max_evaluations,
        ];
        if limits.iter().all(|limit| limit.unwrap_or(0) == 0) {
            return Err(ConfigError::NoStoppingLimit);
        }

        Ok(())
    }
}

/// Configuration errors, reported before any generation runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Population size must be at least 2, got {0}")]
    PopulationTooSmall(usize),
    #[error("Elite count {elite} must be smaller than population size {size}")]
    EliteTooLarge { elite: usize, size: usize },
    #[error("{field} must be in [0, 1], got {value}")]
    InvalidProbability { field: &'static str, value: f64 },
    #[error("{field} must be positive")]
    InvalidLimit { field: &'static str },
    #[error("Rank bias must be in (1, 2], got {0}")]
    InvalidRankBias(f64),
    #[error("Local search adaptation rate must be at least 1, got {0}")]
    InvalidAdaptationRate(f64),
    #[error("Secondary objective percentage must be in [0, 100], got {0}")]
    InvalidPercent(f64),
    #[error("Single execution penalty must be positive, got {0}")]
    InvalidPenalty(f64),
    #[error("At least one of max_generations, max_time_secs or max_evaluations must be set")]
    NoStoppingLimit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SearchConfig::from_json_str(
            r#"{ "population": { "size": 8 }, "selection": { "method": "tournament" } }"#,
        )
        .unwrap();

        assert_eq!(config.population.size, 8);
        assert_eq!(config.population.elite, 1);
        assert_eq!(config.selection, SelectionConfig::Tournament { size: 10 });
        assert_eq!(config.fitness.single_execution_penalty, 1.0);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = SearchConfig::from_json_str(r#"{ "populaton": { "size": 8 } }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        let nested = SearchConfig::from_json_str(r#"{ "fitness": { "penalty": 2.0 } }"#);
        assert!(matches!(nested, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SearchConfig::default();
        config.population.elite = config.population.size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EliteTooLarge { .. })
        ));

        let mut config = SearchConfig::default();
        config.operators.crossover_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProbability {
                field: "operators.crossover_rate",
                ..
            })
        ));

        let config = SearchConfig::from_json_str(
            r#"{"operators": {"max_int": -9223372036854775808}}"#,
        );
        assert!(matches!(
            config,
            Err(ConfigError::InvalidLimit {
                field: "operators.max_int"
            })
        ));

        let mut config = SearchConfig::default();
        config.operators.max_int = 0;
        assert!(config.validate().is_err());

        let mut config = SearchConfig::default();
        config.selection = SelectionConfig::Rank { bias: 1.0 };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRankBias(_))
        ));

        let mut config = SearchConfig::default();
        config.stopping = StoppingConfig {
            max_generations: None,
            max_time_secs: Some(0),
            max_evaluations: None,
            stop_at_zero_fitness: true,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoStoppingLimit)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "stopping": {{ "max_generations": 7 }}, "random_seed": 42 }}"#
        )
        .unwrap();

        let config = SearchConfig::load(file.path()).unwrap();
        assert_eq!(config.stopping.max_generations, Some(7));
        assert_eq!(config.random_seed, Some(42));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = SearchConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn test_serialization_roundtrip_keeps_selection_tag() {
        let config = SearchConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""method":"rank""#));
        let parsed: SearchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
