//! # RAC - Rules as Code Engine
//!
//! A domain-specific language, temporal compiler, and execution runtime
//! for encoding time-varying statutory rules (tax, benefit, and
//! regulatory law) as explicit formulas over relational microdata.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! .rac Source Files
//!     |
//! [Parser]               -> Module AST (entities, variables, amendments)
//!     |
//! [Compiler(as_of)]      -> IR (temporal layers resolved, dependency-ordered)
//!     |
//! [Interpreter]          -> Result (scalars + per-entity arrays)
//!     |        \
//!     |    [Code Generator] -> native Rust source
//!     |         |
//!     |    [Native Driver]  -> cached release binary, wire-format I/O
//!     |         |
//!     +---------+
//!     |
//! [Model / Compare]      -> baseline-vs-reform distributional summaries
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chrono::NaiveDate;
//! use rac::Model;
//!
//! let rules = r#"
//! entity person:
//!   income: float
//!
//! variable gov/tax/rate:
//!   from 2020-01-01: 0.20
//!   from 2023-01-01: 0.22
//!
//! variable person/tax:
//!   entity: person
//!   from 2020-01-01: max(0, income - 12_500) * gov/tax/rate
//! "#;
//!
//! let as_of = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! let model = Model::from_source(&[rules], as_of)?;
//! let result = model.run(&data)?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `parser` | `.rac` source -> AST |
//! | `ast` | Expression and declaration nodes |
//! | `schema` | Entities, relations, indexed input data |
//! | `compiler` | Temporal resolution -> dependency-ordered IR |
//! | `executor` | Tree-walking interpreter |
//! | `codegen` | IR -> native Rust source |
//! | `native` | Toolchain, build cache, subprocess driver |
//! | `model` | High-level run/compare facade |
//! | `validation` | Structural/reference/convention source checks |
//! | `config` | Layered configuration (`rac.toml`, `RAC_*` env) |

pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod model;
pub mod native;
pub mod parser;
pub mod schema;
pub mod validation;
pub mod value;

// Re-export the public surface at the crate root.
pub use crate::ast::{
    AmendDecl, BinOpKind, EntityDecl, Expr, FieldDecl, MatchCase, Module, RelationDecl,
    TemporalValue, UnaryOpKind, VariableDecl,
};
pub use crate::compiler::{CompileError, Compiler, ResolvedVar, IR};
pub use crate::config::{Config, LoggingConfig, NativeConfig};
pub use crate::error::Error;
pub use crate::executor::{evaluate, Context, ExecutionError, ExecutionResult, Executor};
pub use crate::model::{CompareResult, ImpactSummary, Model, ModelError, RunResult};
pub use crate::native::{
    compile_to_binary, wire::Matrix, CompiledBinary, NativeError, TableInput,
};
pub use crate::parser::{parse, parse_file, ParseError};
pub use crate::schema::{Data, DataError, Entity, Field, Relation, Schema};
pub use crate::validation::{validate_source, validate_sources, ValidationRule, Violation};
pub use crate::value::{DataKey, FieldType, Row, Value};

use chrono::NaiveDate;

/// Compile modules for a specific date.
pub fn compile(modules: &[Module], as_of: NaiveDate) -> Result<IR, CompileError> {
    compiler::compile(modules, as_of)
}

/// Execute compiled IR against data with the interpreter.
pub fn execute(ir: &IR, data: &Data) -> Result<ExecutionResult, ExecutionError> {
    executor::run(ir, data)
}
