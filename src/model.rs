//! # High-Level Model Interface
//!
//! The end-user facade: load `.rac` sources, compile for a date, run the
//! native binary over relational input, and compare baseline against
//! reform with distributional summaries.
//!
//! ```rust,ignore
//! use rac::Model;
//!
//! let baseline = Model::from_source(&[RULES], as_of)?;
//! let reform = Model::from_source(&[RULES, REFORM], as_of)?;
//!
//! let result = baseline.run(&data)?;
//! let compare = baseline.compare(&reform, &data)?;
//! let summary = compare.summary("person", "person/tax", None)?;
//! ```

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::compiler::{Compiler, IR};
use crate::config::Config;
use crate::error::Error;
use crate::executor::Executor;
use crate::native::{compile_to_binary, wire::Matrix, CompiledBinary, TableInput};
use crate::parser;
use crate::value::Value;

/// Failures specific to the model facade.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("no results for entity: {0}")]
    UnknownEntity(String),

    #[error("no output variable '{variable}' for entity '{entity}'")]
    UnknownVariable { entity: String, variable: String },

    #[error("income column has {got} rows, expected {expected}")]
    IncomeLengthMismatch { expected: usize, got: usize },
}

/// Result of running a model on data: per-entity output matrices plus the
/// variable names behind each column.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Raw arrays per entity; columns are output variables in IR order.
    pub arrays: HashMap<String, Matrix>,
    /// Variable names for each entity's output columns.
    pub output_names: HashMap<String, Vec<String>>,
}

impl RunResult {
    pub fn get(&self, entity: &str) -> Option<&Matrix> {
        self.arrays.get(entity)
    }

    /// Convert one entity's results to name-keyed rows.
    pub fn to_rows(&self, entity: &str) -> Result<Vec<HashMap<String, f64>>, ModelError> {
        let matrix = self
            .arrays
            .get(entity)
            .ok_or_else(|| ModelError::UnknownEntity(entity.to_string()))?;
        let names = &self.output_names[entity];
        Ok(matrix
            .iter_rows()
            .map(|row| {
                names
                    .iter()
                    .zip(row)
                    .map(|(name, value)| (name.clone(), *value))
                    .collect()
            })
            .collect())
    }

    fn column(&self, entity: &str, variable: &str) -> Result<Vec<f64>, ModelError> {
        let matrix = self
            .arrays
            .get(entity)
            .ok_or_else(|| ModelError::UnknownEntity(entity.to_string()))?;
        let names = self
            .output_names
            .get(entity)
            .ok_or_else(|| ModelError::UnknownEntity(entity.to_string()))?;
        let idx = names.iter().position(|n| n == variable).ok_or_else(|| {
            ModelError::UnknownVariable {
                entity: entity.to_string(),
                variable: variable.to_string(),
            }
        })?;
        Ok(matrix.column(idx))
    }
}

/// One decile row of an impact summary.
#[derive(Debug, Clone, Serialize)]
pub struct DecileImpact {
    pub decile: usize,
    pub avg_income: f64,
    pub avg_gain: f64,
    pub pct_winners: f64,
}

/// Distributional summary of a reform's impact on one variable.
/// Gains are monthly amounts; winners and losers are counted past a
/// one-unit threshold to ignore rounding noise.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactSummary {
    pub n: usize,
    pub total_annual: f64,
    pub mean_monthly: f64,
    pub winners: usize,
    pub losers: usize,
    pub winners_pct: f64,
    pub losers_pct: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub by_decile: Vec<DecileImpact>,
}

/// Result of comparing baseline vs reform on identical input.
#[derive(Debug, Clone)]
pub struct CompareResult {
    pub baseline: RunResult,
    pub reform: RunResult,
    pub n_rows: HashMap<String, usize>,
}

impl CompareResult {
    /// Per-row gain (`reform - baseline`) for a variable.
    pub fn gain(&self, entity: &str, variable: &str) -> Result<Vec<f64>, ModelError> {
        let base = self.baseline.column(entity, variable)?;
        let reform = self.reform.column(entity, variable)?;
        Ok(reform.iter().zip(&base).map(|(r, b)| r - b).collect())
    }

    /// Summarise impact on a variable, with an optional per-row income
    /// column for a decile breakdown.
    pub fn summary(
        &self,
        entity: &str,
        variable: &str,
        income: Option<&[f64]>,
    ) -> Result<ImpactSummary, ModelError> {
        let gain = self.gain(entity, variable)?;
        let n = gain.len();
        let total: f64 = gain.iter().sum();
        let winners = gain.iter().filter(|g| **g > 1.0).count();
        let losers = gain.iter().filter(|g| **g < -1.0).count();
        let pct = |count: usize| {
            if n == 0 {
                0.0
            } else {
                100.0 * count as f64 / n as f64
            }
        };

        let by_decile = match income {
            Some(income) => {
                if income.len() != n {
                    return Err(ModelError::IncomeLengthMismatch {
                        expected: n,
                        got: income.len(),
                    });
                }
                decile_breakdown(income, &gain)
            }
            None => Vec::new(),
        };

        Ok(ImpactSummary {
            n,
            total_annual: total * 12.0,
            mean_monthly: if n == 0 { 0.0 } else { total / n as f64 },
            winners,
            losers,
            winners_pct: pct(winners),
            losers_pct: pct(losers),
            by_decile,
        })
    }
}

/// Linear-interpolated percentile over unsorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}

fn decile_breakdown(income: &[f64], gain: &[f64]) -> Vec<DecileImpact> {
    let mut sorted = income.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let edges: Vec<f64> = (1..=10).map(|d| percentile(&sorted, d as f64 * 10.0)).collect();

    // bin index = number of edges at or below the value, clamped so the
    // maximum lands in the top decile
    let decile_of = |x: f64| {
        edges
            .iter()
            .filter(|edge| **edge <= x)
            .count()
            .min(9)
    };

    let mut breakdown = Vec::new();
    for d in 0..10 {
        let members: Vec<usize> = (0..income.len()).filter(|i| decile_of(income[*i]) == d).collect();
        if members.is_empty() {
            continue;
        }
        let count = members.len() as f64;
        let avg_income = members.iter().map(|i| income[*i]).sum::<f64>() / count;
        let avg_gain = members.iter().map(|i| gain[*i]).sum::<f64>() / count;
        let decile_winners = members.iter().filter(|i| gain[**i] > 1.0).count();
        breakdown.push(DecileImpact {
            decile: d + 1,
            avg_income,
            avg_gain,
            pct_winners: 100.0 * decile_winners as f64 / count,
        });
    }
    breakdown
}

/// A compiled RAC model ready for execution.
pub struct Model {
    ir: IR,
    binary: CompiledBinary,
}

impl Model {
    /// Create a model from `.rac` source strings. Later sources can amend
    /// earlier ones. Configuration comes from the default locations.
    pub fn from_source(sources: &[&str], as_of: NaiveDate) -> Result<Model, Error> {
        Self::from_source_with(sources, as_of, &Config::load()?)
    }

    /// [`Model::from_source`] with explicit configuration.
    pub fn from_source_with(
        sources: &[&str],
        as_of: NaiveDate,
        config: &Config,
    ) -> Result<Model, Error> {
        let modules = sources
            .iter()
            .map(|s| parser::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let ir = Compiler::new(modules).compile(as_of)?;
        debug!(variables = ir.order.len(), %as_of, "model compiled");
        let binary = compile_to_binary(&ir, &config.native)?;
        Ok(Model { ir, binary })
    }

    /// Create a model from `.rac` files. Later files can amend earlier
    /// ones.
    pub fn from_file<P: AsRef<Path>>(paths: &[P], as_of: NaiveDate) -> Result<Model, Error> {
        let sources = paths
            .iter()
            .map(|p| std::fs::read_to_string(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&str> = sources.iter().map(String::as_str).collect();
        Self::from_source(&refs, as_of)
    }

    pub fn ir(&self) -> &IR {
        &self.ir
    }

    /// Entities with at least one computed variable.
    pub fn entities(&self) -> Vec<&str> {
        self.binary.entities()
    }

    /// Output variable names for an entity, in result column order.
    pub fn outputs(&self, entity: &str) -> &[String] {
        self.binary.outputs(entity)
    }

    /// Input field names for an entity, in wire column order.
    pub fn inputs(&self, entity: &str) -> &[String] {
        self.binary.inputs(entity)
    }

    /// Compute and return scalar values (interpreter-evaluated; no input
    /// data or native invocation involved).
    pub fn scalars(&self) -> Result<HashMap<String, Value>, Error> {
        Ok(Executor::new(&self.ir).scalars()?)
    }

    /// Run the model on relational input via the native binary.
    pub fn run(&self, data: &HashMap<String, TableInput>) -> Result<RunResult, Error> {
        let arrays = self.binary.run(data)?;
        let output_names = arrays
            .keys()
            .map(|entity| (entity.clone(), self.binary.outputs(entity).to_vec()))
            .collect();
        Ok(RunResult {
            arrays,
            output_names,
        })
    }

    /// Compare this model (baseline) against a reform on the same input.
    /// The two executions share no in-process state and run in parallel.
    pub fn compare(
        &self,
        reform: &Model,
        data: &HashMap<String, TableInput>,
    ) -> Result<CompareResult, Error> {
        let (baseline, reform_result) = rayon::join(|| self.run(data), || reform.run(data));
        let baseline = baseline?;
        let reform_result = reform_result?;

        let n_rows = baseline
            .arrays
            .iter()
            .map(|(entity, matrix)| (entity.clone(), matrix.n_rows()))
            .collect();

        Ok(CompareResult {
            baseline,
            reform: reform_result,
            n_rows,
        })
    }
}
