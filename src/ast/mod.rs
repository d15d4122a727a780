//! # RAC AST - Abstract Syntax Tree Types
//!
//! Expression and declaration nodes produced by the parser and consumed by
//! the compiler, interpreter, and code generator.
//!
//! Expressions form a closed sum with owned children (`Box`/`Vec`), so a
//! tree never back-references its parent. Nodes are serde-serializable with
//! an internal `type` tag; the stable JSON form doubles as the input to the
//! native build cache key.
//!
//! ## Builders
//!
//! For programmatic construction of expression trees (used heavily by the
//! unit and property tests), see the [`builders`] module.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::value::{FieldType, Value};

pub mod builders;

// ============================================================================
// Expressions
// ============================================================================

/// Binary operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOpKind {
    /// Surface syntax for the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
            BinOpKind::Lt => "<",
            BinOpKind::Le => "<=",
            BinOpKind::Gt => ">",
            BinOpKind::Ge => ">=",
            BinOpKind::Eq => "==",
            BinOpKind::Ne => "!=",
            BinOpKind::And => "and",
            BinOpKind::Or => "or",
        }
    }

    /// True for `<`, `<=`, `>`, `>=`, `==`, `!=`.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOpKind::Lt
                | BinOpKind::Le
                | BinOpKind::Gt
                | BinOpKind::Ge
                | BinOpKind::Eq
                | BinOpKind::Ne
        )
    }
}

/// Unary operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOpKind {
    Neg,
    Not,
}

/// One `pattern => result` arm of a match expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    pub pattern: Expr,
    pub result: Expr,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    /// Literal constant (int, float, string, bool).
    Literal { value: Value },
    /// Variable reference: a bare identifier (entity-local field) or a
    /// `/`-delimited absolute path (scalar or cross-variable reference).
    Var { path: String },
    BinOp {
        op: BinOpKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
    },
    /// Function call over the fixed built-in set (e.g. `max(0, x)`).
    Call { func: String, args: Vec<Expr> },
    /// Field projection on a row, or broadcast over a list of rows
    /// (e.g. `members.income`).
    FieldAccess { obj: Box<Expr>, field: String },
    /// First-match-wins equality dispatch with an optional `else =>` default.
    Match {
        subject: Box<Expr>,
        cases: Vec<MatchCase>,
        default: Option<Box<Expr>>,
    },
    /// Strict three-way conditional: `if cond: then else: else`.
    Cond {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}

impl Expr {
    /// Bare-identifier check: paths without `/` resolve against the current
    /// row, not the global variable map.
    pub fn is_local_ref(&self) -> bool {
        matches!(self, Expr::Var { path } if !path.contains('/'))
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// A value with temporal bounds. `end` is inclusive; `None` means open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalValue {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub expr: Expr,
}

impl TemporalValue {
    /// Whether this interval covers `as_of`.
    pub fn contains(&self, as_of: NaiveDate) -> bool {
        self.start <= as_of && self.end.map_or(true, |end| as_of <= end)
    }
}

/// Variable declaration: an absolute path, an optional entity binding
/// (scalar when absent), and an ordered list of temporal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    pub path: String,
    pub entity: Option<String>,
    pub values: Vec<TemporalValue>,
}

/// Amendment: additional temporal values layered onto an already-declared
/// variable path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendDecl {
    pub target: String,
    pub values: Vec<TemporalValue>,
}

/// A declared field on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub dtype: FieldType,
}

/// A declared relation: `->target` foreign key (`many = false`) or
/// `[target]` reverse relation (`many = true`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDecl {
    pub name: String,
    pub target: String,
    pub many: bool,
}

/// Entity type declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub relations: Vec<RelationDecl>,
}

/// The parse result of one `.rac` source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Source path, empty for in-memory sources.
    pub path: String,
    pub entities: Vec<EntityDecl>,
    pub variables: Vec<VariableDecl>,
    pub amendments: Vec<AmendDecl>,
}
