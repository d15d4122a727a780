//! # Code Generator
//!
//! Lowers compiled IR to the source of a standalone Rust program that
//! reproduces the interpreter's results over the binary wire format.
//!
//! ## Emitted program shape
//!
//! ```text
//! struct Scalars { <mangled scalar path>: f64, ... }   + compute()
//! struct <Entity>Input  { <declared fields>: f64, ... }
//! struct <Entity>Output { <entity-scoped paths>: f64, ... } + compute()
//! fn main(entity, input.bin, output.bin)  - rayon par_chunks row loop
//! ```
//!
//! Lowering is all-f64: booleans are 1.0/0.0, comparisons select 1.0/0.0,
//! `and`/`or` evaluate both sides then select by truthiness, division
//! guards a zero denominator to 0.0, and `round` is ties-to-even -
//! matching the interpreter bit for bit. Strings, list built-ins, and
//! relation traversal cannot cross the all-f64 wire and are rejected here
//! rather than miscompiled.

use std::collections::HashSet;
use std::fmt::Write as _;
use thiserror::Error;

use crate::ast::{BinOpKind, Expr, UnaryOpKind};
use crate::compiler::IR;
use crate::value::{FieldType, Value};

/// Code generation failure kinds.
#[derive(Debug, Clone, Error)]
pub enum CodegenError {
    #[error("unsupported in native backend: {0}")]
    Unsupported(String),

    #[error("undefined reference: {0}")]
    UndefinedReference(String),
}

/// Identifier-safe form of a variable path (`gov/tax/rate` -> `gov_tax_rate`).
pub fn mangle(path: &str) -> String {
    path.replace('/', "_")
}

/// CamelCase type name for an entity (`tax_unit` -> `TaxUnit`).
pub fn entity_type_name(entity: &str) -> String {
    entity
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Generate the complete program for an IR.
pub fn generate_program(ir: &IR) -> Result<String, CodegenError> {
    let mut source = String::from("#![allow(unused_parens, dead_code, unused_variables)]\n\n");

    source.push_str(&generate_scalars(ir)?);

    let entity_outputs = ir.entity_outputs();
    for (entity, outputs) in &entity_outputs {
        source.push_str(&generate_entity(ir, entity, outputs)?);
    }

    source.push_str(&generate_main(ir, &entity_outputs));
    Ok(source)
}

/// The `Scalars` record and its `compute` function: one straight-line
/// binding per scalar variable in IR order.
fn generate_scalars(ir: &IR) -> Result<String, CodegenError> {
    let scalar_paths = ir.scalar_paths();

    let mut out = String::from("struct Scalars {\n");
    for path in &scalar_paths {
        writeln!(out, "    {}: f64,", mangle(path)).ok();
    }
    out.push_str("}\n\nimpl Scalars {\n    fn compute() -> Scalars {\n");

    for path in &scalar_paths {
        let var = &ir.variables[path];
        let ctx = LowerCtx {
            ir,
            scope: Scope::Scalars,
        };
        let expr = lower(&var.expr, &ctx)?;
        writeln!(out, "        let {}: f64 = {};", mangle(path), expr).ok();
    }

    out.push_str("        Scalars {");
    for (i, path) in scalar_paths.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push(' ');
        out.push_str(&mangle(path));
    }
    out.push_str(" }\n    }\n}\n\n");
    Ok(out)
}

/// Per-entity input/output records and the straight-line `compute`.
fn generate_entity(ir: &IR, entity: &str, outputs: &[String]) -> Result<String, CodegenError> {
    let type_name = entity_type_name(entity);
    let input_fields = input_fields(ir, entity);

    let mut out = String::new();
    writeln!(out, "struct {}Input {{", type_name).ok();
    for field in &input_fields {
        let rust_type = if is_int_field(ir, entity, field) {
            "i64"
        } else {
            "f64"
        };
        writeln!(out, "    {}: {},", field, rust_type).ok();
    }
    out.push_str("}\n\n");

    writeln!(out, "struct {}Output {{", type_name).ok();
    for path in outputs {
        writeln!(out, "    {}: f64,", mangle(path)).ok();
    }
    out.push_str("}\n\n");

    writeln!(out, "impl {}Output {{", type_name).ok();
    writeln!(
        out,
        "    fn compute(input: &{}Input, scalars: &Scalars) -> {}Output {{",
        type_name, type_name
    )
    .ok();

    let fields: HashSet<String> = input_fields.iter().cloned().collect();
    let mut computed: HashSet<String> = HashSet::new();
    for path in outputs {
        let var = &ir.variables[path];
        let ctx = LowerCtx {
            ir,
            scope: Scope::Entity {
                name: entity,
                fields: &fields,
                computed: &computed,
            },
        };
        let expr = lower(&var.expr, &ctx)?;
        writeln!(out, "        let {}: f64 = {};", mangle(path), expr).ok();
        computed.insert(path.clone());
    }

    write!(out, "        {}Output {{", type_name).ok();
    for (i, path) in outputs.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push(' ');
        out.push_str(&mangle(path));
    }
    out.push_str(" }\n    }\n}\n\n");
    Ok(out)
}

/// Declared field names for an entity, in wire order. Entities never
/// declared in the schema read as zero-column tables.
pub fn input_fields(ir: &IR, entity: &str) -> Vec<String> {
    ir.schema
        .entity(entity)
        .map(|e| e.fields.iter().map(|f| f.name.clone()).collect())
        .unwrap_or_default()
}

/// Integer-typed fields ride the wire as f64 but keep their declared type
/// on the input record.
fn is_int_field(ir: &IR, entity: &str, field: &str) -> bool {
    ir.schema
        .entity(entity)
        .and_then(|e| e.field(field))
        .is_some_and(|f| f.dtype == FieldType::Int)
}

/// The driver `main`: read the count-prefixed input table, map rows to
/// output rows in parallel, write the count-prefixed output table.
fn generate_main(ir: &IR, entity_outputs: &[(String, Vec<String>)]) -> String {
    let mut arms = String::new();

    for (entity, outputs) in entity_outputs {
        let type_name = entity_type_name(entity);
        let fields = input_fields(ir, entity);

        let mut field_reads = String::new();
        for (i, field) in fields.iter().enumerate() {
            let cast = if is_int_field(ir, entity, field) {
                " as i64"
            } else {
                ""
            };
            writeln!(
                field_reads,
                "                        {}: row[{}]{},",
                field, i, cast
            )
            .ok();
        }

        let mut output_writes = String::new();
        for (i, path) in outputs.iter().enumerate() {
            writeln!(
                output_writes,
                "                    out[{}] = o.{};",
                i,
                mangle(path)
            )
            .ok();
        }

        let row_loop = if fields.is_empty() {
            // zero-column entities still produce one output row per input row
            format!(
                r#"            output_data
                .par_chunks_mut(n_output_fields)
                .for_each(|out| {{
                    let input = {type_name}Input {{}};
                    let o = {type_name}Output::compute(&input, &scalars);
{output_writes}                }});"#
            )
        } else {
            format!(
                r#"            input_data
                .par_chunks(n_input_fields)
                .zip(output_data.par_chunks_mut(n_output_fields))
                .for_each(|(row, out)| {{
                    let input = {type_name}Input {{
{field_reads}                    }};
                    let o = {type_name}Output::compute(&input, &scalars);
{output_writes}                }});"#
            )
        };

        writeln!(
            arms,
            r#"        "{entity}" => {{
            let n_input_fields = {n_inputs};
            let n_output_fields = {n_outputs};

            let mut input_data = vec![0.0f64; n_rows * n_input_fields];
            for v in input_data.iter_mut() {{
                file.read_exact(&mut buf8).expect("failed to read input");
                *v = f64::from_le_bytes(buf8);
            }}

            let mut output_data = vec![0.0f64; n_rows * n_output_fields];

{row_loop}

            out_file
                .write_all(&(n_rows as u64).to_le_bytes())
                .expect("failed to write output");
            for v in output_data {{
                out_file.write_all(&v.to_le_bytes()).expect("failed to write output");
            }}
        }}"#,
            n_inputs = fields.len(),
            n_outputs = outputs.len(),
        )
        .ok();
    }

    format!(
        r#"use rayon::prelude::*;
use std::env;
use std::fs::File;
use std::io::{{BufReader, BufWriter, Read, Write}};

fn main() {{
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {{
        eprintln!("usage: {{}} <entity> <input.bin> <output.bin>", args[0]);
        std::process::exit(1);
    }}

    let entity = &args[1];
    let mut file = BufReader::new(File::open(&args[2]).expect("failed to open input"));
    let mut out_file = BufWriter::new(File::create(&args[3]).expect("failed to create output"));

    let mut buf8 = [0u8; 8];
    file.read_exact(&mut buf8).expect("failed to read row count");
    let n_rows = u64::from_le_bytes(buf8) as usize;

    let scalars = Scalars::compute();

    match entity.as_str() {{
{arms}        _ => {{
            eprintln!("unknown entity: {{}}", entity);
            std::process::exit(1);
        }}
    }}

    out_file.flush().expect("failed to flush output");
}}
"#
    )
}

// ============================================================================
// Expression lowering
// ============================================================================

enum Scope<'a> {
    /// Inside `Scalars::compute`; scalar paths are prior local bindings.
    Scalars,
    /// Inside `<Entity>Output::compute`; fields come off `input`, scalars
    /// off `scalars`, and prior same-entity outputs are local bindings.
    Entity {
        name: &'a str,
        fields: &'a HashSet<String>,
        computed: &'a HashSet<String>,
    },
}

struct LowerCtx<'a> {
    ir: &'a IR,
    scope: Scope<'a>,
}

/// Lower one expression to an f64-valued Rust expression string.
fn lower(expr: &Expr, ctx: &LowerCtx) -> Result<String, CodegenError> {
    match expr {
        Expr::Literal { value } => lower_literal(value),

        Expr::Var { path } => lower_var(path, ctx),

        Expr::BinOp { op, left, right } => {
            let l = lower(left, ctx)?;
            let r = lower(right, ctx)?;
            Ok(match op {
                BinOpKind::Add => format!("({} + {})", l, r),
                BinOpKind::Sub => format!("({} - {})", l, r),
                BinOpKind::Mul => format!("({} * {})", l, r),
                BinOpKind::Div => format!(
                    "{{ let __den = {}; if __den == 0.0 {{ 0.0 }} else {{ ({}) / __den }} }}",
                    r, l
                ),
                BinOpKind::Lt => format!("(if ({}) < ({}) {{ 1.0 }} else {{ 0.0 }})", l, r),
                BinOpKind::Le => format!("(if ({}) <= ({}) {{ 1.0 }} else {{ 0.0 }})", l, r),
                BinOpKind::Gt => format!("(if ({}) > ({}) {{ 1.0 }} else {{ 0.0 }})", l, r),
                BinOpKind::Ge => format!("(if ({}) >= ({}) {{ 1.0 }} else {{ 0.0 }})", l, r),
                BinOpKind::Eq => format!("(if ({}) == ({}) {{ 1.0 }} else {{ 0.0 }})", l, r),
                BinOpKind::Ne => format!("(if ({}) != ({}) {{ 1.0 }} else {{ 0.0 }})", l, r),
                BinOpKind::And => format!(
                    "{{ let __l = {}; let __r = {}; if __l != 0.0 {{ __r }} else {{ __l }} }}",
                    l, r
                ),
                BinOpKind::Or => format!(
                    "{{ let __l = {}; let __r = {}; if __l != 0.0 {{ __l }} else {{ __r }} }}",
                    l, r
                ),
            })
        }

        Expr::UnaryOp { op, operand } => {
            let v = lower(operand, ctx)?;
            Ok(match op {
                UnaryOpKind::Neg => format!("(-({}))", v),
                UnaryOpKind::Not => format!("(if ({}) != 0.0 {{ 0.0 }} else {{ 1.0 }})", v),
            })
        }

        Expr::Call { func, args } => lower_call(func, args, ctx),

        Expr::FieldAccess { .. } => Err(CodegenError::Unsupported(
            "relation traversal does not cross the native wire".to_string(),
        )),

        Expr::Match {
            subject,
            cases,
            default,
        } => {
            let mut out = format!("{{ let __subject = {}; ", lower(subject, ctx)?);
            for (i, case) in cases.iter().enumerate() {
                if i > 0 {
                    out.push_str(" else ");
                }
                write!(
                    out,
                    "if __subject == ({}) {{ {} }}",
                    lower(&case.pattern, ctx)?,
                    lower(&case.result, ctx)?
                )
                .ok();
            }
            match (default, cases.is_empty()) {
                (Some(default), true) => {
                    write!(out, "{}", lower(default, ctx)?).ok();
                }
                (Some(default), false) => {
                    write!(out, " else {{ {} }}", lower(default, ctx)?).ok();
                }
                (None, false) => {
                    write!(out, " else {{ panic!(\"no match\") }}").ok();
                }
                (None, true) => {
                    write!(out, "panic!(\"no match\")").ok();
                }
            }
            out.push_str(" }");
            Ok(out)
        }

        Expr::Cond {
            condition,
            then_expr,
            else_expr,
        } => Ok(format!(
            "(if ({}) != 0.0 {{ {} }} else {{ {} }})",
            lower(condition, ctx)?,
            lower(then_expr, ctx)?,
            lower(else_expr, ctx)?
        )),
    }
}

fn lower_literal(value: &Value) -> Result<String, CodegenError> {
    match value {
        Value::Int(i) => Ok(format!("{:?}", *i as f64)),
        Value::Float(f) => Ok(format!("{:?}", f)),
        Value::Bool(true) => Ok("1.0".to_string()),
        Value::Bool(false) => Ok("0.0".to_string()),
        other => Err(CodegenError::Unsupported(format!(
            "{} literal in native backend",
            other.type_name()
        ))),
    }
}

fn lower_var(path: &str, ctx: &LowerCtx) -> Result<String, CodegenError> {
    if path.contains('/') {
        let Some(var) = ctx.ir.variables.get(path) else {
            return Err(CodegenError::UndefinedReference(path.to_string()));
        };
        return match (&var.entity, &ctx.scope) {
            (None, Scope::Scalars) => Ok(mangle(path)),
            (None, Scope::Entity { .. }) => Ok(format!("scalars.{}", mangle(path))),
            (Some(var_entity), Scope::Entity { name, computed, .. })
                if var_entity == name && computed.contains(path) =>
            {
                Ok(mangle(path))
            }
            _ => Err(CodegenError::Unsupported(format!(
                "cross-entity reference: {}",
                path
            ))),
        };
    }

    match &ctx.scope {
        Scope::Entity { name, fields, .. } => {
            if fields.contains(path) {
                // declared ints come back to f64 at use sites
                if is_int_field(ctx.ir, name, path) {
                    return Ok(format!("(input.{} as f64)", path));
                }
                return Ok(format!("input.{}", path));
            }
            let is_relation = ctx
                .ir
                .schema
                .entity(*name)
                .and_then(|e| e.relation(path))
                .is_some();
            if is_relation {
                return Err(CodegenError::Unsupported(format!(
                    "relation '{}' does not cross the native wire",
                    path
                )));
            }
            Err(CodegenError::UndefinedReference(path.to_string()))
        }
        Scope::Scalars => Err(CodegenError::UndefinedReference(path.to_string())),
    }
}

fn lower_call(func: &str, args: &[Expr], ctx: &LowerCtx) -> Result<String, CodegenError> {
    let lowered: Vec<String> = args
        .iter()
        .map(|a| lower(a, ctx))
        .collect::<Result<_, _>>()?;

    match func {
        "min" | "max" => {
            if lowered.len() < 2 {
                return Err(CodegenError::Unsupported(format!(
                    "{}() over a list in native backend",
                    func
                )));
            }
            let method = if func == "min" { "min" } else { "max" };
            let mut out = format!("({})", lowered[0]);
            for arg in &lowered[1..] {
                out = format!("{}.{}({})", out, method, arg);
            }
            Ok(out)
        }
        "abs" => one_arg(func, &lowered).map(|x| format!("({}).abs()", x)),
        "round" => one_arg(func, &lowered).map(|x| format!("({}).round_ties_even()", x)),
        "clip" => {
            if lowered.len() != 3 {
                return Err(CodegenError::Unsupported(format!(
                    "clip() expects 3 arguments, got {}",
                    lowered.len()
                )));
            }
            Ok(format!(
                "({}).min({}).max({})",
                lowered[0], lowered[2], lowered[1]
            ))
        }
        "sum" | "len" | "any" | "all" => Err(CodegenError::Unsupported(format!(
            "{}() over a list in native backend",
            func
        ))),
        other => Err(CodegenError::Unsupported(format!(
            "unknown function: {}",
            other
        ))),
    }
}

fn one_arg<'a>(func: &str, args: &'a [String]) -> Result<&'a String, CodegenError> {
    if args.len() == 1 {
        Ok(&args[0])
    } else {
        Err(CodegenError::Unsupported(format!(
            "{}() expects 1 argument, got {}",
            func,
            args.len()
        )))
    }
}
