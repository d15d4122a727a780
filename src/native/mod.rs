//! # Native Driver
//!
//! Compiles IR to a standalone release binary and drives it over the
//! binary wire format, one subprocess invocation per entity.
//!
//! ## Build cache
//!
//! Projects are content-addressed under
//! `<cache>/rac/projects/<hash>/` where the hash is the first 16 hex
//! chars of SHA-256 over the stable IR serialization (evaluation order +
//! per-path expression JSON). A cache hit reuses the prebuilt executable;
//! concurrent builds for the same hash may race but produce identical
//! output, so last-writer-wins on the executable is safe.
//!
//! ## Toolchain
//!
//! `cargo` is discovered on `PATH`, then under `~/.cargo/bin`. When
//! missing and `native.auto_install` is set, rustup is bootstrapped under
//! the user profile (idempotent). Build failures surface the build tool's
//! diagnostics verbatim and are never retried.

pub mod wire;

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

use crate::codegen::{self, CodegenError};
use crate::compiler::IR;
use crate::config::NativeConfig;
use crate::value::Row;
use wire::Matrix;

const RUSTUP_URL: &str = "https://sh.rustup.rs";

#[cfg(windows)]
const BINARY_NAME: &str = "rac_native.exe";
#[cfg(not(windows))]
const BINARY_NAME: &str = "rac_native";

/// Native backend failure kinds.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error("rust toolchain not found; install rustup or enable native.auto_install")]
    ToolchainMissing,

    #[error("toolchain install failed: {0}")]
    InstallFailed(String),

    #[error("build failed:\n{0}")]
    BuildFailure(String),

    #[error("native binary failed for entity '{entity}': {stderr}")]
    BinaryFailure { entity: String, stderr: String },

    #[error("entity '{entity}' expects {expected} input columns, got {got}")]
    ShapeMismatch {
        entity: String,
        expected: usize,
        got: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-entity input rows: dict-shaped rows or a prebuilt wire matrix.
#[derive(Debug, Clone)]
pub enum TableInput {
    Rows(Vec<Row>),
    Matrix(Matrix),
}

impl From<Vec<Row>> for TableInput {
    fn from(rows: Vec<Row>) -> Self {
        TableInput::Rows(rows)
    }
}

impl From<Matrix> for TableInput {
    fn from(matrix: Matrix) -> Self {
        TableInput::Matrix(matrix)
    }
}

/// Root of the per-user build cache.
pub fn cache_root(config: &NativeConfig) -> PathBuf {
    if let Some(dir) = &config.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("rac")
}

/// Find a cargo binary without installing anything.
fn find_cargo(config: &NativeConfig) -> Option<PathBuf> {
    if let Some(cargo) = &config.cargo {
        return Some(cargo.clone());
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(if cfg!(windows) { "cargo.exe" } else { "cargo" });
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let cargo_home = dirs::home_dir()?.join(".cargo").join("bin").join("cargo");
    cargo_home.is_file().then_some(cargo_home)
}

/// Install the Rust toolchain via rustup (one-time, under the user
/// profile).
fn install_rust() -> Result<PathBuf, NativeError> {
    info!("installing rust toolchain (one-time setup)");

    if cfg!(windows) {
        return Err(NativeError::InstallFailed(
            "automatic install is not supported on windows; run rustup-init manually".to_string(),
        ));
    }

    let output = Command::new("sh")
        .arg("-c")
        .arg(format!(
            "curl --proto '=https' --tlsv1.2 -sSf {} | sh -s -- -y --quiet",
            RUSTUP_URL
        ))
        .output()?;
    if !output.status.success() {
        return Err(NativeError::InstallFailed(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let cargo = dirs::home_dir()
        .map(|home| home.join(".cargo").join("bin").join("cargo"))
        .filter(|p| p.is_file())
        .ok_or_else(|| NativeError::InstallFailed("cargo missing after install".to_string()))?;

    info!("rust installed successfully");
    Ok(cargo)
}

/// Ensure cargo is available, installing if permitted.
pub fn ensure_cargo(config: &NativeConfig) -> Result<PathBuf, NativeError> {
    if let Some(cargo) = find_cargo(config) {
        return Ok(cargo);
    }
    if config.auto_install {
        return install_rust();
    }
    Err(NativeError::ToolchainMissing)
}

/// Content hash of an IR: first 16 hex chars of SHA-256 over the stable
/// serialization (order + per-path expression JSON, sorted keys).
pub fn ir_hash(ir: &IR) -> Result<String, NativeError> {
    let mut vars = serde_json::Map::new();
    for (path, var) in &ir.variables {
        vars.insert(path.clone(), serde_json::to_value(&var.expr)?);
    }
    let stable = serde_json::json!({
        "order": ir.order,
        "vars": serde_json::Value::Object(vars),
    });

    let digest = Sha256::digest(serde_json::to_string(&stable)?.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(hex[..16].to_string())
}

/// A compiled RAC binary plus the table shapes it was compiled for.
#[derive(Debug, Clone)]
pub struct CompiledBinary {
    binary_path: PathBuf,
    entity_schemas: HashMap<String, Vec<String>>,
    entity_outputs: Vec<(String, Vec<String>)>,
}

impl CompiledBinary {
    /// Input field names (wire column order) for an entity.
    pub fn inputs(&self, entity: &str) -> &[String] {
        self.entity_schemas
            .get(entity)
            .map_or(&[], Vec::as_slice)
    }

    /// Output variable paths (wire column order) for an entity.
    pub fn outputs(&self, entity: &str) -> &[String] {
        self.entity_outputs
            .iter()
            .find(|(name, _)| name == entity)
            .map_or(&[], |(_, paths)| paths.as_slice())
    }

    /// Entities with at least one computed variable.
    pub fn entities(&self) -> Vec<&str> {
        self.entity_outputs
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Run the binary over relational input, one subprocess per entity.
    /// Entities without computed variables are skipped. Returned matrices
    /// are row-aligned with the input tables; columns follow
    /// [`CompiledBinary::outputs`].
    pub fn run(
        &self,
        data: &HashMap<String, TableInput>,
    ) -> Result<HashMap<String, Matrix>, NativeError> {
        let mut results = HashMap::new();

        for (entity, input) in data {
            let outputs = self.outputs(entity);
            if outputs.is_empty() {
                continue;
            }
            let fields = self.inputs(entity);

            let input_matrix = match input {
                TableInput::Rows(rows) => wire::encode_rows(rows, fields),
                TableInput::Matrix(matrix) => {
                    if matrix.n_cols() != fields.len() {
                        return Err(NativeError::ShapeMismatch {
                            entity: entity.clone(),
                            expected: fields.len(),
                            got: matrix.n_cols(),
                        });
                    }
                    matrix.clone()
                }
            };

            if input_matrix.n_rows() == 0 {
                results.insert(entity.clone(), Matrix::new(0, outputs.len()));
                continue;
            }

            results.insert(
                entity.clone(),
                self.run_entity(entity, &input_matrix, outputs.len())?,
            );
        }

        Ok(results)
    }

    fn run_entity(
        &self,
        entity: &str,
        input: &Matrix,
        n_outputs: usize,
    ) -> Result<Matrix, NativeError> {
        let input_file = tempfile::Builder::new().suffix(".bin").tempfile()?;
        {
            let mut writer = BufWriter::new(input_file.as_file());
            wire::write_table(&mut writer, input)?;
            writer.flush()?;
        }

        let output_file = tempfile::Builder::new().suffix(".bin").tempfile()?;

        debug!(entity, rows = input.n_rows(), "invoking native binary");
        let output = Command::new(&self.binary_path)
            .arg(entity)
            .arg(input_file.path())
            .arg(output_file.path())
            .output()?;
        if !output.status.success() {
            return Err(NativeError::BinaryFailure {
                entity: entity.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let mut reader = BufReader::new(fs::File::open(output_file.path())?);
        Ok(wire::read_table(&mut reader, n_outputs)?)
    }
}

/// Compile IR to a native binary, reusing the content-addressed cache.
pub fn compile_to_binary(ir: &IR, config: &NativeConfig) -> Result<CompiledBinary, NativeError> {
    let entity_outputs = ir.entity_outputs();
    let entity_schemas: HashMap<String, Vec<String>> = entity_outputs
        .iter()
        .map(|(entity, _)| (entity.clone(), codegen::input_fields(ir, entity)))
        .collect();

    let hash = ir_hash(ir)?;
    let project_dir = cache_root(config).join("projects").join(&hash);
    let binary_path = project_dir.join("target").join("release").join(BINARY_NAME);

    if config.cache && binary_path.is_file() {
        debug!(%hash, "native build cache hit");
        return Ok(CompiledBinary {
            binary_path,
            entity_schemas,
            entity_outputs,
        });
    }

    // Generate before touching the toolchain so unsupported IRs fail fast.
    let source = codegen::generate_program(ir)?;
    let cargo = ensure_cargo(config)?;

    scaffold_project(&project_dir, &source)?;

    info!(%hash, "compiling native binary");
    let output = Command::new(&cargo)
        .args(["build", "--release", "--quiet"])
        .current_dir(&project_dir)
        .output()?;
    if !output.status.success() {
        return Err(NativeError::BuildFailure(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    info!(%hash, "compilation complete");

    Ok(CompiledBinary {
        binary_path,
        entity_schemas,
        entity_outputs,
    })
}

/// Write the minimal cargo project around the generated source.
fn scaffold_project(project_dir: &Path, source: &str) -> Result<(), NativeError> {
    let src_dir = project_dir.join("src");
    fs::create_dir_all(&src_dir)?;

    fs::write(
        project_dir.join("Cargo.toml"),
        r#"[package]
name = "rac_native"
version = "0.1.0"
edition = "2021"

[dependencies]
rayon = "1.10"

[profile.release]
lto = true
codegen-units = 1
"#,
    )?;
    fs::write(src_dir.join("main.rs"), source)?;
    Ok(())
}
