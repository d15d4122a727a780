//! # Interpreter
//!
//! Tree-walking evaluator over compiled IR.
//!
//! Evaluation is single-threaded and strictly follows IR order: scalars
//! land in the computed map, entity-scoped variables are evaluated row by
//! row against an *augmented* row (input fields plus previously computed
//! same-entity outputs for the same row index). Rows are independent;
//! results are index-aligned with the input tables.
//!
//! Numeric contract shared with the native backend: division always
//! produces a float and division by zero produces `0.0` (never an error);
//! `and`/`or` evaluate both operands, then select by truthiness; `round`
//! is ties-to-even.

use std::collections::HashMap;
use thiserror::Error;

use crate::ast::{BinOpKind, Expr, UnaryOpKind};
use crate::compiler::IR;
use crate::schema::{Data, Schema, PRIMARY_KEY};
use crate::value::{Row, Value};

/// The fixed built-in function set.
pub const BUILTINS: &[&str] = &[
    "min", "max", "abs", "round", "sum", "len", "clip", "any", "all",
];

/// Runtime failure kinds.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("undefined: {0}")]
    UndefinedReference(String),

    #[error("unknown function: {0}")]
    UnknownBuiltin(String),

    #[error("no match for: {0}")]
    NonExhaustiveMatch(String),

    #[error("{0}")]
    InvalidOperation(String),
}

fn invalid(message: impl Into<String>) -> ExecutionError {
    ExecutionError::InvalidOperation(message.into())
}

/// Runtime context for evaluation.
pub struct Context<'a> {
    pub data: &'a Data,
    pub schema: &'a Schema,
    /// Computed scalar values, path -> value.
    pub computed: HashMap<String, Value>,
    /// Set while evaluating entity-scoped variables.
    pub current_row: Option<Row>,
    pub current_entity: Option<String>,
}

impl<'a> Context<'a> {
    pub fn new(data: &'a Data, schema: &'a Schema) -> Self {
        Context {
            data,
            schema,
            computed: HashMap::new(),
            current_row: None,
            current_entity: None,
        }
    }

    /// Resolve a variable reference: computed scalars first, then the
    /// current row (foreign-key fields dereference to their target row),
    /// then reverse relations on the current entity.
    pub fn get(&self, path: &str) -> Result<Value, ExecutionError> {
        if let Some(value) = self.computed.get(path) {
            return Ok(value.clone());
        }

        if let (Some(row), Some(entity_name)) = (&self.current_row, &self.current_entity) {
            let entity = self.schema.entity(entity_name);

            if let Some(value) = row.get(path) {
                let fk = entity.and_then(|e| e.relation(path)).filter(|r| !r.many);
                if let Some(relation) = fk {
                    return Ok(self
                        .data
                        .get_row(&relation.target, value)
                        .map(|target| Value::Row(target.clone()))
                        .unwrap_or(Value::Null));
                }
                return Ok(value.clone());
            }

            let reverse = entity.and_then(|e| e.relation(path)).filter(|r| r.many);
            if let Some(relation) = reverse {
                return self.get_related(entity_name, relation.target.as_str(), row);
            }
        } else if let Some(row) = &self.current_row {
            if let Some(value) = row.get(path) {
                return Ok(value.clone());
            }
        }

        Err(ExecutionError::UndefinedReference(path.to_string()))
    }

    /// Rows of `child` whose FK back to `parent` matches the current row's
    /// primary key.
    fn get_related(&self, parent: &str, child: &str, row: &Row) -> Result<Value, ExecutionError> {
        let fk_field = self
            .schema
            .fk_field_to(child, parent)
            .ok_or_else(|| invalid(format!("no foreign key from {} to {}", child, parent)))?;
        let pk = row
            .get(PRIMARY_KEY)
            .ok_or_else(|| invalid(format!("current {} row has no primary key", parent)))?;
        let related = self
            .data
            .get_related(child, fk_field, pk)
            .into_iter()
            .map(|r| Value::Row(r.clone()))
            .collect();
        Ok(Value::List(related))
    }
}

/// Evaluate an expression in context.
pub fn evaluate(expr: &Expr, ctx: &Context) -> Result<Value, ExecutionError> {
    match expr {
        Expr::Literal { value } => Ok(value.clone()),

        Expr::Var { path } => ctx.get(path),

        Expr::BinOp { op, left, right } => {
            let l = evaluate(left, ctx)?;
            let r = evaluate(right, ctx)?;
            eval_binop(*op, l, r)
        }

        Expr::UnaryOp { op, operand } => {
            let v = evaluate(operand, ctx)?;
            match op {
                UnaryOpKind::Neg => match v {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
                    other => Err(invalid(format!("cannot negate {}", other.type_name()))),
                },
                UnaryOpKind::Not => Ok(Value::Bool(!v.is_truthy())),
            }
        }

        Expr::Call { func, args } => {
            if !BUILTINS.contains(&func.as_str()) {
                return Err(ExecutionError::UnknownBuiltin(func.clone()));
            }
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, ctx)?);
            }
            call_builtin(func, values)
        }

        Expr::FieldAccess { obj, field } => {
            let target = evaluate(obj, ctx)?;
            match target {
                // missing fields project as null, matching row semantics
                Value::Row(row) => Ok(row.get(field).cloned().unwrap_or(Value::Null)),
                Value::List(items) => {
                    let mut projected = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::Row(row) => {
                                projected.push(row.get(field).cloned().unwrap_or(Value::Null));
                            }
                            other => {
                                return Err(invalid(format!(
                                    "cannot access field '{}' on {}",
                                    field,
                                    other.type_name()
                                )));
                            }
                        }
                    }
                    Ok(Value::List(projected))
                }
                other => Err(invalid(format!(
                    "cannot access field '{}' on {}",
                    field,
                    other.type_name()
                ))),
            }
        }

        Expr::Match {
            subject,
            cases,
            default,
        } => {
            let value = evaluate(subject, ctx)?;
            for case in cases {
                let pattern = evaluate(&case.pattern, ctx)?;
                if value.loose_eq(&pattern) {
                    return evaluate(&case.result, ctx);
                }
            }
            if let Some(default) = default {
                return evaluate(default, ctx);
            }
            Err(ExecutionError::NonExhaustiveMatch(value.to_string()))
        }

        Expr::Cond {
            condition,
            then_expr,
            else_expr,
        } => {
            if evaluate(condition, ctx)?.is_truthy() {
                evaluate(then_expr, ctx)
            } else {
                evaluate(else_expr, ctx)
            }
        }
    }
}

fn eval_binop(op: BinOpKind, l: Value, r: Value) -> Result<Value, ExecutionError> {
    match op {
        BinOpKind::Add => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            _ => numeric_pair(&l, &r, "+").map(|(a, b)| Value::Float(a + b)),
        },
        BinOpKind::Sub => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a - b)),
            _ => numeric_pair(&l, &r, "-").map(|(a, b)| Value::Float(a - b)),
        },
        BinOpKind::Mul => match (&l, &r) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a * b)),
            _ => numeric_pair(&l, &r, "*").map(|(a, b)| Value::Float(a * b)),
        },
        BinOpKind::Div => {
            let (a, b) = numeric_pair(&l, &r, "/")?;
            if b == 0.0 {
                Ok(Value::Float(0.0))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        BinOpKind::Lt | BinOpKind::Le | BinOpKind::Gt | BinOpKind::Ge => {
            let ordering = l.compare(&r).ok_or_else(|| {
                invalid(format!(
                    "cannot compare {} and {}",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            let result = match op {
                BinOpKind::Lt => ordering.is_lt(),
                BinOpKind::Le => ordering.is_le(),
                BinOpKind::Gt => ordering.is_gt(),
                BinOpKind::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOpKind::Eq => Ok(Value::Bool(l.loose_eq(&r))),
        BinOpKind::Ne => Ok(Value::Bool(!l.loose_eq(&r))),
        // both operands are already evaluated; selection keeps the operand
        // value rather than collapsing to a bool
        BinOpKind::And => Ok(if l.is_truthy() { r } else { l }),
        BinOpKind::Or => Ok(if l.is_truthy() { l } else { r }),
    }
}

fn numeric_pair(l: &Value, r: &Value, op: &str) -> Result<(f64, f64), ExecutionError> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(invalid(format!(
            "unsupported operands for '{}': {} and {}",
            op,
            l.type_name(),
            r.type_name()
        ))),
    }
}

/// Dispatch a built-in call over already-evaluated arguments.
fn call_builtin(func: &str, args: Vec<Value>) -> Result<Value, ExecutionError> {
    match func {
        "min" => extremum(func, args, std::cmp::Ordering::Less),
        "max" => extremum(func, args, std::cmp::Ordering::Greater),
        "abs" => {
            let [v] = take_args::<1>(func, args)?;
            match v {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                other => Err(invalid(format!("abs() expects a number, got {}", other.type_name()))),
            }
        }
        "round" => {
            let [v] = take_args::<1>(func, args)?;
            match v {
                Value::Int(i) => Ok(Value::Int(i)),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                Value::Float(f) => Ok(Value::Int(f.round_ties_even() as i64)),
                other => Err(invalid(format!(
                    "round() expects a number, got {}",
                    other.type_name()
                ))),
            }
        }
        "sum" => {
            let [v] = take_args::<1>(func, args)?;
            let items = as_list(func, v)?;
            let mut total = Value::Int(0);
            for item in items {
                total = eval_binop(BinOpKind::Add, total, item)?;
            }
            Ok(total)
        }
        "len" => {
            let [v] = take_args::<1>(func, args)?;
            match v {
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(invalid(format!(
                    "len() expects a list or string, got {}",
                    other.type_name()
                ))),
            }
        }
        "clip" => {
            let [x, lo, hi] = take_args::<3>(func, args)?;
            let capped = pick(x, hi, std::cmp::Ordering::Less)?;
            pick(capped, lo, std::cmp::Ordering::Greater)
        }
        "any" => {
            let [v] = take_args::<1>(func, args)?;
            Ok(Value::Bool(
                as_list(func, v)?.iter().any(Value::is_truthy),
            ))
        }
        "all" => {
            let [v] = take_args::<1>(func, args)?;
            Ok(Value::Bool(
                as_list(func, v)?.iter().all(Value::is_truthy),
            ))
        }
        other => Err(ExecutionError::UnknownBuiltin(other.to_string())),
    }
}

fn take_args<const N: usize>(func: &str, args: Vec<Value>) -> Result<[Value; N], ExecutionError> {
    let got = args.len();
    args.try_into()
        .map_err(|_| invalid(format!("{}() expects {} argument(s), got {}", func, N, got)))
}

fn as_list(func: &str, v: Value) -> Result<Vec<Value>, ExecutionError> {
    match v {
        Value::List(items) => Ok(items),
        other => Err(invalid(format!(
            "{}() expects a list, got {}",
            func,
            other.type_name()
        ))),
    }
}

/// `min`/`max`: one list argument or two-or-more scalars.
fn extremum(func: &str, args: Vec<Value>, keep: std::cmp::Ordering) -> Result<Value, ExecutionError> {
    let candidates = if args.len() == 1 {
        as_list(func, args.into_iter().next().unwrap_or(Value::Null))?
    } else {
        args
    };
    let mut iter = candidates.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| invalid(format!("{}() of empty sequence", func)))?;
    for candidate in iter {
        best = pick(best, candidate, keep)?;
    }
    Ok(best)
}

/// Return whichever of `a`/`b` sorts toward `keep` (ties keep `a`).
fn pick(a: Value, b: Value, keep: std::cmp::Ordering) -> Result<Value, ExecutionError> {
    let ordering = b.compare(&a).ok_or_else(|| {
        invalid(format!(
            "cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))
    })?;
    Ok(if ordering == keep { b } else { a })
}

/// Execution result: computed scalars plus per-entity output columns,
/// index-aligned with the input tables.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub scalars: HashMap<String, Value>,
    pub entities: HashMap<String, HashMap<String, Vec<Value>>>,
}

/// Executes compiled IR against data.
pub struct Executor<'a> {
    ir: &'a IR,
}

impl<'a> Executor<'a> {
    pub fn new(ir: &'a IR) -> Self {
        Executor { ir }
    }

    /// Evaluate every variable in IR order.
    pub fn execute(&self, data: &Data) -> Result<ExecutionResult, ExecutionError> {
        let mut ctx = Context::new(data, &self.ir.schema);
        let mut entities: HashMap<String, HashMap<String, Vec<Value>>> = HashMap::new();

        for path in &self.ir.order {
            let Some(var) = self.ir.variables.get(path) else {
                continue;
            };

            match &var.entity {
                None => {
                    let value = evaluate(&var.expr, &ctx)?;
                    ctx.computed.insert(path.clone(), value);
                }
                Some(entity_name) => {
                    let rows = data.get_rows(entity_name);
                    let mut column = Vec::with_capacity(rows.len());

                    for (i, row) in rows.iter().enumerate() {
                        let mut augmented = row.clone();
                        if let Some(outputs) = entities.get(entity_name) {
                            for (prev_path, prev_values) in outputs {
                                if let Some(value) = prev_values.get(i) {
                                    augmented.insert(prev_path.clone(), value.clone());
                                }
                            }
                        }
                        ctx.current_row = Some(augmented);
                        ctx.current_entity = Some(entity_name.clone());
                        let value = evaluate(&var.expr, &ctx);
                        ctx.current_row = None;
                        ctx.current_entity = None;
                        column.push(value?);
                    }

                    entities
                        .entry(entity_name.clone())
                        .or_default()
                        .insert(path.clone(), column);
                }
            }
        }

        Ok(ExecutionResult {
            scalars: ctx.computed,
            entities,
        })
    }

    /// Evaluate only the scalar variables (no input data required).
    pub fn scalars(&self) -> Result<HashMap<String, Value>, ExecutionError> {
        let data = Data::default();
        let mut ctx = Context::new(&data, &self.ir.schema);
        for path in &self.ir.order {
            let Some(var) = self.ir.variables.get(path) else {
                continue;
            };
            if var.entity.is_none() {
                let value = evaluate(&var.expr, &ctx)?;
                ctx.computed.insert(path.clone(), value);
            }
        }
        Ok(ctx.computed)
    }
}

/// Execute IR against data.
pub fn run(ir: &IR, data: &Data) -> Result<ExecutionResult, ExecutionError> {
    Executor::new(ir).execute(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::BinOpKind;

    fn eval(expr: &Expr) -> Result<Value, ExecutionError> {
        let data = Data::default();
        let schema = Schema::new();
        let ctx = Context::new(&data, &schema);
        evaluate(expr, &ctx)
    }

    #[test]
    fn test_arithmetic_int_preserving() {
        assert_eq!(eval(&add(lit(2), lit(3))).unwrap(), Value::Int(5));
        assert_eq!(eval(&mul(lit(2), lit(3.5))).unwrap(), Value::Float(7.0));
    }

    #[test]
    fn test_division_always_float_and_zero_guard() {
        assert_eq!(eval(&div(lit(7), lit(2))).unwrap(), Value::Float(3.5));
        assert_eq!(eval(&div(lit(7), lit(0))).unwrap(), Value::Float(0.0));
        assert_eq!(eval(&div(lit(7.0), lit(0.0))).unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_and_or_keep_operand_values() {
        assert_eq!(
            eval(&binop(BinOpKind::And, lit(1), lit(5))).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            eval(&binop(BinOpKind::And, lit(0), lit(5))).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            eval(&binop(BinOpKind::Or, lit(0), lit(5))).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            eval(&binop(BinOpKind::Or, lit(3), lit(5))).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(eval(&neg(lit(3))).unwrap(), Value::Int(-3));
        assert_eq!(eval(&not(lit(0))).unwrap(), Value::Bool(true));
        assert_eq!(eval(&not(lit(2))).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_builtins() {
        assert_eq!(
            eval(&call("max", vec![lit(0), lit(-5)])).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            eval(&call("min", vec![lit(2), lit(7), lit(1)])).unwrap(),
            Value::Int(1)
        );
        assert_eq!(eval(&call("abs", vec![lit(-4.5)])).unwrap(), Value::Float(4.5));
        assert_eq!(
            eval(&call("clip", vec![lit(15), lit(0), lit(10)])).unwrap(),
            Value::Int(10)
        );
        assert_eq!(
            eval(&call("clip", vec![lit(-3), lit(0), lit(10)])).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_round_ties_even() {
        assert_eq!(eval(&call("round", vec![lit(2.5)])).unwrap(), Value::Int(2));
        assert_eq!(eval(&call("round", vec![lit(3.5)])).unwrap(), Value::Int(4));
        assert_eq!(eval(&call("round", vec![lit(2.4)])).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(matches!(
            eval(&call("sqrt", vec![lit(4)])),
            Err(ExecutionError::UnknownBuiltin(name)) if name == "sqrt"
        ));
    }

    #[test]
    fn test_match_first_wins_and_default() {
        let expr = match_expr(
            lit("low"),
            vec![(lit("low"), lit(1)), (lit("low"), lit(99))],
            None,
        );
        assert_eq!(eval(&expr).unwrap(), Value::Int(1));

        let expr = match_expr(lit("other"), vec![(lit("low"), lit(1))], Some(lit(42)));
        assert_eq!(eval(&expr).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_match_non_exhaustive() {
        let expr = match_expr(lit("other"), vec![(lit("low"), lit(1))], None);
        assert!(matches!(
            eval(&expr),
            Err(ExecutionError::NonExhaustiveMatch(_))
        ));
    }

    #[test]
    fn test_cond_evaluates_selected_branch_only() {
        // the untaken branch would fail with an undefined reference
        let expr = cond(lit(true), lit(1), var("missing"));
        assert_eq!(eval(&expr).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_undefined_reference() {
        assert!(matches!(
            eval(&var("nowhere")),
            Err(ExecutionError::UndefinedReference(path)) if path == "nowhere"
        ));
    }

    #[test]
    fn test_sum_over_list() {
        let data = Data::default();
        let schema = Schema::new();
        let mut ctx = Context::new(&data, &schema);
        let mut row = Row::new();
        row.insert(
            "xs".into(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Float(0.5)]),
        );
        ctx.current_row = Some(row);
        assert_eq!(
            evaluate(&call("sum", vec![var("xs")]), &ctx).unwrap(),
            Value::Float(3.5)
        );
    }
}
