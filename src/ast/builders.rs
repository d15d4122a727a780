//! Fluent constructors for AST nodes.
//!
//! Tests and programmatic callers build expression trees with these instead
//! of spelling out boxed struct variants.

use chrono::NaiveDate;

use super::{
    AmendDecl, BinOpKind, Expr, MatchCase, TemporalValue, UnaryOpKind, VariableDecl,
};
use crate::value::Value;

/// Literal from anything convertible to a [`Value`].
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal {
        value: value.into(),
    }
}

/// Variable reference (bare identifier or `/`-path).
pub fn var(path: impl Into<String>) -> Expr {
    Expr::Var { path: path.into() }
}

/// Binary operation.
pub fn binop(op: BinOpKind, left: Expr, right: Expr) -> Expr {
    Expr::BinOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binop(BinOpKind::Add, left, right)
}

pub fn sub(left: Expr, right: Expr) -> Expr {
    binop(BinOpKind::Sub, left, right)
}

pub fn mul(left: Expr, right: Expr) -> Expr {
    binop(BinOpKind::Mul, left, right)
}

pub fn div(left: Expr, right: Expr) -> Expr {
    binop(BinOpKind::Div, left, right)
}

pub fn neg(operand: Expr) -> Expr {
    Expr::UnaryOp {
        op: UnaryOpKind::Neg,
        operand: Box::new(operand),
    }
}

pub fn not(operand: Expr) -> Expr {
    Expr::UnaryOp {
        op: UnaryOpKind::Not,
        operand: Box::new(operand),
    }
}

/// Built-in function call.
pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call {
        func: func.into(),
        args,
    }
}

/// Field projection (`obj.field`).
pub fn field(obj: Expr, name: impl Into<String>) -> Expr {
    Expr::FieldAccess {
        obj: Box::new(obj),
        field: name.into(),
    }
}

/// Conditional (`if cond: then else: else`).
pub fn cond(condition: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
    Expr::Cond {
        condition: Box::new(condition),
        then_expr: Box::new(then_expr),
        else_expr: Box::new(else_expr),
    }
}

/// Match expression from `(pattern, result)` pairs and an optional default.
pub fn match_expr(subject: Expr, cases: Vec<(Expr, Expr)>, default: Option<Expr>) -> Expr {
    Expr::Match {
        subject: Box::new(subject),
        cases: cases
            .into_iter()
            .map(|(pattern, result)| MatchCase { pattern, result })
            .collect(),
        default: default.map(Box::new),
    }
}

/// Temporal value with an open end.
pub fn from_date(start: NaiveDate, expr: Expr) -> TemporalValue {
    TemporalValue {
        start,
        end: None,
        expr,
    }
}

/// Temporal value with an inclusive end.
pub fn from_to(start: NaiveDate, end: NaiveDate, expr: Expr) -> TemporalValue {
    TemporalValue {
        start,
        end: Some(end),
        expr,
    }
}

/// Scalar variable declaration.
pub fn scalar_var(path: impl Into<String>, values: Vec<TemporalValue>) -> VariableDecl {
    VariableDecl {
        path: path.into(),
        entity: None,
        values,
    }
}

/// Entity-scoped variable declaration.
pub fn entity_var(
    path: impl Into<String>,
    entity: impl Into<String>,
    values: Vec<TemporalValue>,
) -> VariableDecl {
    VariableDecl {
        path: path.into(),
        entity: Some(entity.into()),
        values,
    }
}

/// Amendment targeting an existing variable path.
pub fn amend(target: impl Into<String>, values: Vec<TemporalValue>) -> AmendDecl {
    AmendDecl {
        target: target.into(),
        values,
    }
}
