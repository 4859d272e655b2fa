use std::fs;
use std::num::NonZero;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    BenchmarkPlan, Case, Error, Fill, IterationBudget, MAX_OUTER_SIZE, Result, Shape, Strategy,
};

/// Base sizes of the default cases, spanning small to large payloads.
const DEFAULT_BASE_SIZES: [usize; 4] = [50, 500, 5_000, 50_000];

/// Number of rows in every default case.
const DEFAULT_OUTER_SIZE: usize = 5;

/// User-facing benchmark configuration, usually loaded from a TOML file.
///
/// Every field has a default, so an empty file is a valid configuration. Unknown fields are
/// rejected to catch typos.
///
/// ```toml
/// ranks = 4
/// strategies = ["raw", "pack", "one-sided"]
/// shape = "square-classes"
/// fill = { constant = 42 }
/// trials = 5
/// verify = true
///
/// [budget]
/// target_bytes = 268435456
/// min = 10
/// max = 10000
///
/// [[cases]]
/// outer_size = 5
/// base_size = 50
///
/// [[cases]]
/// array_size = 100000
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct BenchConfig {
    /// Number of ranks. Rank 0 is the source, every other rank is a sink.
    pub ranks: usize,

    /// Strategies to benchmark, in order.
    pub strategies: Vec<Strategy>,

    /// Payload cases to benchmark every strategy with, in order.
    pub cases: Vec<Case>,

    /// Row length function of jagged cases.
    pub shape: Shape,

    /// Values stored in generated payloads.
    pub fill: Fill,

    /// Number of timed trials per strategy and case.
    pub trials: u32,

    /// Chooses the number of transfer iterations per trial.
    pub budget: IterationBudget,

    /// Whether every sink checks its reconstruction after the trials of each case.
    pub verify: bool,
}

impl BenchConfig {
    /// Parses a configuration from TOML text. The result is not validated yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if the text is not a valid configuration.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a configuration file. The result is not validated yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigRead`] if the file cannot be read and [`Error::ConfigParse`] if it
    /// is not a valid configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&text)
    }

    /// Checks that the configuration describes a benchmark that can run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.ranks == 0 {
            return Err(invalid("at least one rank is required"));
        }

        if self.trials == 0 {
            return Err(invalid("at least one trial is required"));
        }

        if self.strategies.is_empty() {
            return Err(invalid("at least one strategy is required"));
        }

        if self.cases.is_empty() {
            return Err(invalid("at least one case is required"));
        }

        for case in &self.cases {
            if case.outer_size() > MAX_OUTER_SIZE {
                return Err(invalid(format!(
                    "case {case} has more than the supported {MAX_OUTER_SIZE} rows"
                )));
            }

            let Some(bytes) = case.packed_bytes(self.shape) else {
                return Err(invalid(format!(
                    "case {case} has more values than fit in memory with shape {}",
                    self.shape
                )));
            };

            // Message lengths travel as i32, and the packed buffer is the largest message.
            if i32::try_from(bytes).is_err() {
                return Err(invalid(format!(
                    "case {case} packs into {bytes} bytes, more than one message can carry"
                )));
            }
        }

        Ok(())
    }

    /// Validates the configuration and turns it into a plan that [`crate::run_plan()`] accepts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if validation fails.
    pub fn into_plan(self) -> Result<BenchmarkPlan> {
        self.validate()?;

        Ok(BenchmarkPlan {
            ranks: NonZero::new(self.ranks).expect("guarded by validate()"),
            strategies: self.strategies,
            cases: self.cases,
            shape: self.shape,
            fill: self.fill,
            trials: NonZero::new(self.trials).expect("guarded by validate()"),
            budget: self.budget,
            verify: self.verify,
        })
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            ranks: 2,
            strategies: Strategy::ALL.to_vec(),
            cases: DEFAULT_BASE_SIZES
                .into_iter()
                .map(|base_size| Case::Jagged {
                    outer_size: DEFAULT_OUTER_SIZE,
                    base_size,
                })
                .collect(),
            shape: Shape::default(),
            fill: Fill::default(),
            trials: 10,
            budget: IterationBudget::default(),
            verify: false,
        }
    }
}

fn invalid(problem: impl Into<String>) -> Error {
    Error::InvalidConfig {
        problem: problem.into(),
    }
}
