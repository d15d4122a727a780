//! Crate-level error type aggregating the per-module failure kinds.

use thiserror::Error;

use crate::compiler::CompileError;
use crate::executor::ExecutionError;
use crate::model::ModelError;
use crate::native::NativeError;
use crate::parser::ParseError;
use crate::schema::DataError;

/// Any failure surfaced by the crate's public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Native(#[from] NativeError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("config error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
