//! # RAC Parser
//!
//! Lexes and parses `.rac` source into a [`Module`] AST.
//!
//! Grammar (simplified):
//!
//! ```text
//! module      = (entity | variable | amend)*
//! entity      = "entity" NAME ":" member*
//! member      = NAME ":" type | NAME ":" "->" NAME | NAME ":" "[" NAME "]"
//! variable    = "variable" PATH ":" ["entity" ":" NAME] temporal+
//! temporal    = "from" DATE ["to" DATE] ":" expr
//! amend       = "amend" PATH ":" temporal+
//! expr        = match | cond | or_expr
//! match       = "match" or_expr ":" case+ ["else" "=>" expr]
//! case        = primary "=>" expr
//! cond        = "if" or_expr ":" expr "else" ":" expr
//! or_expr     = and_expr ("or" and_expr)*
//! and_expr    = cmp_expr ("and" cmp_expr)*
//! cmp_expr    = add_expr (("<"|">"|"<="|">="|"=="|"!=") add_expr)?
//! add_expr    = mul_expr (("+"|"-") mul_expr)*
//! mul_expr    = unary (("*"|"/") unary)*
//! unary       = "-" unary | "not" unary | postfix
//! postfix     = primary ("(" args ")" | "." NAME)*
//! primary     = NUMBER | STRING | "true" | "false" | NAME | PATH | "(" expr ")"
//! ```
//!
//! Pure recursive descent, one production per function. The first error
//! aborts with its source position; no recovery is attempted.

pub mod lexer;

use chrono::NaiveDate;
use thiserror::Error;

use crate::ast::{
    AmendDecl, BinOpKind, EntityDecl, Expr, FieldDecl, MatchCase, Module, RelationDecl,
    TemporalValue, UnaryOpKind, VariableDecl,
};
use crate::value::{FieldType, Value};
use lexer::{Lexer, Token, TokenKind};

/// Lexing or parsing failure, with 1-based source position.
#[derive(Debug, Clone, Error)]
#[error("line {line}, col {col}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        ParseError {
            message: message.into(),
            line,
            col,
        }
    }
}

/// Parse `.rac` source into a module.
pub fn parse(source: &str) -> Result<Module, ParseError> {
    parse_with_path(source, "")
}

/// Parse `.rac` source, recording the originating path on the module.
pub fn parse_with_path(source: &str, path: &str) -> Result<Module, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_module(path)
}

/// Parse a `.rac` file.
pub fn parse_file(path: impl AsRef<std::path::Path>) -> Result<Module, crate::Error> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    Ok(parse_with_path(&source, &path.to_string_lossy())?)
}

/// Recursive descent parser over a lexed token stream.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        // the stream always ends with Eof
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens
                .last()
                .expect("token stream is never empty")
        })
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.peek().kind)
    }

    fn consume(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        let tok = self.peek().clone();
        if tok.kind != kind {
            return Err(ParseError::new(
                format!("expected {:?}, got {:?}", kind, tok.kind),
                tok.line,
                tok.col,
            ));
        }
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            let tok = self.peek().clone();
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let tok = self.peek();
        ParseError::new(message, tok.line, tok.col)
    }

    /// Parse a complete module.
    pub fn parse_module(&mut self, path: &str) -> Result<Module, ParseError> {
        let mut module = Module {
            path: path.to_string(),
            ..Module::default()
        };

        while !self.at(TokenKind::Eof) {
            if self.at(TokenKind::Entity) {
                module.entities.push(self.parse_entity()?);
            } else if self.at(TokenKind::Variable) {
                module.variables.push(self.parse_variable()?);
            } else if self.at(TokenKind::Amend) {
                module.amendments.push(self.parse_amend()?);
            } else {
                return Err(self.error_here(format!(
                    "unexpected token: {:?}",
                    self.peek().kind
                )));
            }
        }

        Ok(module)
    }

    /// Entity declaration: typed fields plus `->target` / `[target]`
    /// relations.
    fn parse_entity(&mut self) -> Result<EntityDecl, ParseError> {
        self.consume(TokenKind::Entity)?;
        let name = self.consume(TokenKind::Ident)?.value;
        self.consume(TokenKind::Colon)?;

        let mut fields = Vec::new();
        let mut relations = Vec::new();

        while self.at(TokenKind::Ident) {
            let member = self.consume(TokenKind::Ident)?;
            self.consume(TokenKind::Colon)?;

            if self.eat(TokenKind::Fk).is_some() {
                let target = self.consume(TokenKind::Ident)?.value;
                relations.push(RelationDecl {
                    name: member.value,
                    target,
                    many: false,
                });
            } else if self.eat(TokenKind::LBracket).is_some() {
                let target = self.consume(TokenKind::Ident)?.value;
                self.consume(TokenKind::RBracket)?;
                relations.push(RelationDecl {
                    name: member.value,
                    target,
                    many: true,
                });
            } else {
                let dtype_tok = self.consume(TokenKind::Ident)?;
                let dtype = FieldType::parse(&dtype_tok.value).ok_or_else(|| {
                    ParseError::new(
                        format!("unknown field type: {}", dtype_tok.value),
                        dtype_tok.line,
                        dtype_tok.col,
                    )
                })?;
                fields.push(FieldDecl {
                    name: member.value,
                    dtype,
                });
            }
        }

        Ok(EntityDecl {
            name,
            fields,
            relations,
        })
    }

    /// Variable declaration with optional entity binding.
    fn parse_variable(&mut self) -> Result<VariableDecl, ParseError> {
        self.consume(TokenKind::Variable)?;
        let path = self.parse_path()?;
        self.consume(TokenKind::Colon)?;

        let mut entity = None;
        if self.eat(TokenKind::Entity).is_some() {
            self.consume(TokenKind::Colon)?;
            entity = Some(self.consume(TokenKind::Ident)?.value);
        }

        let values = self.parse_temporal_values()?;
        Ok(VariableDecl {
            path,
            entity,
            values,
        })
    }

    /// Amendment declaration.
    fn parse_amend(&mut self) -> Result<AmendDecl, ParseError> {
        self.consume(TokenKind::Amend)?;
        let target = self.parse_path()?;
        self.consume(TokenKind::Colon)?;
        let values = self.parse_temporal_values()?;
        Ok(AmendDecl { target, values })
    }

    /// A path token, or a bare identifier promoted to a one-segment path.
    fn parse_path(&mut self) -> Result<String, ParseError> {
        if self.at(TokenKind::Path) {
            return Ok(self.consume(TokenKind::Path)?.value);
        }
        Ok(self.consume(TokenKind::Ident)?.value)
    }

    /// `from DATE [to DATE]: expr` blocks.
    fn parse_temporal_values(&mut self) -> Result<Vec<TemporalValue>, ParseError> {
        let mut values = Vec::new();

        while self.at(TokenKind::From) {
            self.consume(TokenKind::From)?;
            let start = self.parse_date()?;
            let end = if self.eat(TokenKind::To).is_some() {
                Some(self.parse_date()?)
            } else {
                None
            };
            self.consume(TokenKind::Colon)?;
            let expr = self.parse_expr()?;
            values.push(TemporalValue { start, end, expr });
        }

        Ok(values)
    }

    fn parse_date(&mut self) -> Result<NaiveDate, ParseError> {
        let tok = self.consume(TokenKind::Date)?;
        NaiveDate::parse_from_str(&tok.value, "%Y-%m-%d").map_err(|_| {
            ParseError::new(format!("invalid date: {}", tok.value), tok.line, tok.col)
        })
    }

    /// Expression entry point.
    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::Match) {
            return self.parse_match();
        }
        if self.at(TokenKind::If) {
            return self.parse_cond();
        }
        self.parse_or()
    }

    /// Match expression; an `else => expr` arm supplies the default.
    fn parse_match(&mut self) -> Result<Expr, ParseError> {
        self.consume(TokenKind::Match)?;
        let subject = self.parse_or()?;
        self.consume(TokenKind::Colon)?;

        const PATTERN_START: &[TokenKind] = &[
            TokenKind::Str,
            TokenKind::Int,
            TokenKind::Float,
            TokenKind::True,
            TokenKind::False,
            TokenKind::Ident,
            TokenKind::Path,
        ];

        let mut cases = Vec::new();
        let mut default = None;

        loop {
            if self.eat(TokenKind::Else).is_some() {
                self.consume(TokenKind::Arrow)?;
                default = Some(Box::new(self.parse_expr()?));
                break;
            }
            if !self.at_any(PATTERN_START) {
                break;
            }
            let pattern = self.parse_primary()?;
            self.consume(TokenKind::Arrow)?;
            let result = self.parse_expr()?;
            cases.push(MatchCase { pattern, result });
        }

        Ok(Expr::Match {
            subject: Box::new(subject),
            cases,
            default,
        })
    }

    /// Conditional expression: `if cond: then else: else`.
    fn parse_cond(&mut self) -> Result<Expr, ParseError> {
        self.consume(TokenKind::If)?;
        let condition = self.parse_or()?;
        self.consume(TokenKind::Colon)?;
        let then_expr = self.parse_expr()?;
        self.consume(TokenKind::Else)?;
        self.consume(TokenKind::Colon)?;
        let else_expr = self.parse_expr()?;
        Ok(Expr::Cond {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(TokenKind::Or).is_some() {
            let right = self.parse_and()?;
            left = Expr::BinOp {
                op: BinOpKind::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_cmp()?;
        while self.eat(TokenKind::And).is_some() {
            let right = self.parse_cmp()?;
            left = Expr::BinOp {
                op: BinOpKind::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Comparisons are non-associative: at most one per level.
    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_add()?;
        let op = match self.peek().kind {
            TokenKind::Lt => Some(BinOpKind::Lt),
            TokenKind::Gt => Some(BinOpKind::Gt),
            TokenKind::Le => Some(BinOpKind::Le),
            TokenKind::Ge => Some(BinOpKind::Ge),
            TokenKind::EqEq => Some(BinOpKind::Eq),
            TokenKind::Ne => Some(BinOpKind::Ne),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.parse_add()?;
            return Ok(Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = if self.eat(TokenKind::Plus).is_some() {
                BinOpKind::Add
            } else if self.eat(TokenKind::Minus).is_some() {
                BinOpKind::Sub
            } else {
                break;
            };
            let right = self.parse_mul()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat(TokenKind::Star).is_some() {
                BinOpKind::Mul
            } else if self.eat(TokenKind::Slash).is_some() {
                BinOpKind::Div
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(TokenKind::Minus).is_some() {
            return Ok(Expr::UnaryOp {
                op: UnaryOpKind::Neg,
                operand: Box::new(self.parse_unary()?),
            });
        }
        if self.eat(TokenKind::Not).is_some() {
            return Ok(Expr::UnaryOp {
                op: UnaryOpKind::Not,
                operand: Box::new(self.parse_unary()?),
            });
        }
        self.parse_postfix()
    }

    /// Postfix operations: calls and field access.
    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.at(TokenKind::LParen) {
                let func = match expr {
                    Expr::Var { ref path } => path.clone(),
                    _ => return Err(self.error_here("can only call named functions")),
                };
                self.consume(TokenKind::LParen)?;
                let mut args = Vec::new();
                if !self.at(TokenKind::RParen) {
                    args.push(self.parse_expr()?);
                    while self.eat(TokenKind::Comma).is_some() {
                        args.push(self.parse_expr()?);
                    }
                }
                self.consume(TokenKind::RParen)?;
                expr = Expr::Call { func, args };
            } else if self.eat(TokenKind::Dot).is_some() {
                let field = self.consume(TokenKind::Ident)?.value;
                expr = Expr::FieldAccess {
                    obj: Box::new(expr),
                    field,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        if self.at(TokenKind::Int) {
            let tok = self.consume(TokenKind::Int)?;
            let digits = tok.value.replace('_', "");
            let value = digits.parse::<i64>().map_err(|_| {
                ParseError::new(
                    format!("integer literal out of range: {}", tok.value),
                    tok.line,
                    tok.col,
                )
            })?;
            return Ok(Expr::Literal {
                value: Value::Int(value),
            });
        }
        if self.at(TokenKind::Float) {
            let tok = self.consume(TokenKind::Float)?;
            let digits = tok.value.replace('_', "");
            let value = digits.parse::<f64>().map_err(|_| {
                ParseError::new(
                    format!("invalid float literal: {}", tok.value),
                    tok.line,
                    tok.col,
                )
            })?;
            return Ok(Expr::Literal {
                value: Value::Float(value),
            });
        }
        if self.at(TokenKind::Str) {
            let tok = self.consume(TokenKind::Str)?;
            return Ok(Expr::Literal {
                value: Value::Str(tok.value),
            });
        }
        if self.eat(TokenKind::True).is_some() {
            return Ok(Expr::Literal {
                value: Value::Bool(true),
            });
        }
        if self.eat(TokenKind::False).is_some() {
            return Ok(Expr::Literal {
                value: Value::Bool(false),
            });
        }
        if self.at(TokenKind::Path) {
            let tok = self.consume(TokenKind::Path)?;
            return Ok(Expr::Var { path: tok.value });
        }
        if self.at(TokenKind::Ident) {
            let tok = self.consume(TokenKind::Ident)?;
            return Ok(Expr::Var { path: tok.value });
        }
        if self.eat(TokenKind::LParen).is_some() {
            let expr = self.parse_expr()?;
            self.consume(TokenKind::RParen)?;
            return Ok(expr);
        }

        Err(self.error_here(format!(
            "unexpected token in expression: {:?}",
            self.peek().kind
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{add, lit, mul};

    fn parse_one_expr(source: &str) -> Expr {
        let tokens = Lexer::new(source).tokenize().unwrap();
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expr().unwrap();
        assert!(parser.at(TokenKind::Eof), "trailing tokens in {:?}", source);
        expr
    }

    #[test]
    fn test_precedence_mul_over_add() {
        assert_eq!(
            parse_one_expr("1 + 2 * 3"),
            add(lit(1), mul(lit(2), lit(3)))
        );
    }

    #[test]
    fn test_parens_override_precedence() {
        assert_eq!(
            parse_one_expr("(1 + 2) * 3"),
            mul(add(lit(1), lit(2)), lit(3))
        );
    }

    #[test]
    fn test_underscore_literals() {
        assert_eq!(parse_one_expr("12_500"), lit(12_500));
        assert_eq!(parse_one_expr("1_000.25"), lit(1000.25));
    }

    #[test]
    fn test_call_requires_named_callee() {
        let tokens = Lexer::new("(a + b)(1)").tokenize().unwrap();
        let err = Parser::new(tokens).parse_expr().unwrap_err();
        assert!(err.to_string().contains("named functions"));
    }

    #[test]
    fn test_variable_with_entity_binding() {
        let module = parse(
            "variable person/tax:\n  entity: person\n  from 2020-01-01: income * 0.2",
        )
        .unwrap();
        assert_eq!(module.variables.len(), 1);
        let decl = &module.variables[0];
        assert_eq!(decl.path, "person/tax");
        assert_eq!(decl.entity.as_deref(), Some("person"));
        assert_eq!(decl.values.len(), 1);
    }

    #[test]
    fn test_entity_with_fields_and_relations() {
        let module = parse(
            "entity person:\n  id: int\n  income: float\n  household: ->household\n\
             entity household:\n  id: int\n  members: [person]",
        )
        .unwrap();
        let person = &module.entities[0];
        assert_eq!(person.fields.len(), 2);
        assert_eq!(person.relations.len(), 1);
        assert!(!person.relations[0].many);
        let household = &module.entities[1];
        assert!(household.relations[0].many);
    }

    #[test]
    fn test_match_with_else_default() {
        let expr = parse_one_expr("match band: 'low' => 1 'high' => 2 else => 0");
        match expr {
            Expr::Match { cases, default, .. } => {
                assert_eq!(cases.len(), 2);
                assert!(default.is_some());
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_match_without_default() {
        let expr = parse_one_expr("match x: 1 => 10 2 => 20");
        match expr {
            Expr::Match { default, .. } => assert!(default.is_none()),
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_amendment() {
        let module =
            parse("amend gov/uc/standard_allowance:\n  from 2024-04-01: 400.00").unwrap();
        assert_eq!(module.amendments.len(), 1);
        assert_eq!(module.amendments[0].target, "gov/uc/standard_allowance");
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let err = parse("entity person:\n  income: money").unwrap_err();
        assert!(err.to_string().contains("unknown field type"));
    }

    #[test]
    fn test_syntax_error_has_position() {
        let err = parse("variable gov/x:\n  from 2020-01-01: +").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_temporal_with_end_date() {
        let module = parse(
            "variable gov/rate:\n  from 2020-01-01 to 2022-12-31: 0.20\n  from 2023-01-01: 0.22",
        )
        .unwrap();
        let values = &module.variables[0].values;
        assert_eq!(values.len(), 2);
        assert!(values[0].end.is_some());
        assert!(values[1].end.is_none());
    }
}
