//! # Temporal Compiler
//!
//! Resolves parsed modules at a point in time into a flat, dependency-
//! ordered intermediate representation.
//!
//! ## Pipeline
//!
//! ```text
//! Modules + as_of date
//!     |
//! [Merge schemas]        -> union of entity declarations
//!     |
//! [Collect variables]    -> duplicate detection
//!     |
//! [Resolve temporal]     -> last interval containing as_of wins
//!     |
//! [Apply amendments]     -> source-ordered overrides
//!     |
//! [Dependency analysis]  -> absolute paths referenced per expression
//!     |
//! [Topological sort]     -> evaluation order, cycle detection
//!     |
//!     v
//!    IR
//! ```
//!
//! Compilation errors abort; a partial IR is never returned.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::ast::{AmendDecl, Expr, Module, TemporalValue, VariableDecl};
use crate::schema::{Entity, Schema};
use crate::value::FieldType;

/// Compilation failure kinds.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("duplicate variable: {0}")]
    DuplicateDeclaration(String),

    #[error("amending unknown variable: {0}")]
    UnknownAmendmentTarget(String),

    #[error("no value for {path} at {as_of}")]
    NoTemporalValue { path: String, as_of: NaiveDate },

    #[error("field '{field}' on entity '{entity}' declared as both {existing} and {conflicting}")]
    FieldTypeConflict {
        entity: String,
        field: String,
        existing: FieldType,
        conflicting: FieldType,
    },

    #[error("circular dependency involving {0}")]
    CircularDependency(String),
}

/// A variable resolved to a single expression for a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVar {
    pub path: String,
    pub entity: Option<String>,
    pub expr: Expr,
    /// Absolute paths this expression references. Bare identifiers resolve
    /// against the current row and create no graph edges.
    pub deps: BTreeSet<String>,
}

/// Intermediate representation: date-resolved variable graph + schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IR {
    pub schema: Schema,
    pub variables: HashMap<String, ResolvedVar>,
    /// Topologically sorted variable paths; dependencies precede dependents.
    pub order: Vec<String>,
}

impl IR {
    /// Entity-scoped output paths grouped by entity, both in IR order.
    pub fn entity_outputs(&self) -> Vec<(String, Vec<String>)> {
        let mut outputs: Vec<(String, Vec<String>)> = Vec::new();
        for path in &self.order {
            let Some(var) = self.variables.get(path) else {
                continue;
            };
            if let Some(entity) = &var.entity {
                match outputs.iter_mut().find(|(name, _)| name == entity) {
                    Some((_, paths)) => paths.push(path.clone()),
                    None => outputs.push((entity.clone(), vec![path.clone()])),
                }
            }
        }
        outputs
    }

    /// Scalar paths in IR order.
    pub fn scalar_paths(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|path| {
                self.variables
                    .get(*path)
                    .is_some_and(|v| v.entity.is_none())
            })
            .cloned()
            .collect()
    }
}

/// Compile modules for a specific date.
pub fn compile(modules: &[Module], as_of: NaiveDate) -> Result<IR, CompileError> {
    Compiler::new(modules.to_vec()).compile(as_of)
}

/// Compiles parsed modules into IR.
pub struct Compiler {
    modules: Vec<Module>,
    schema: Schema,
    decl_order: Vec<String>,
    var_decls: HashMap<String, VariableDecl>,
    amendments: Vec<AmendDecl>,
}

impl Compiler {
    pub fn new(modules: Vec<Module>) -> Self {
        Compiler {
            modules,
            schema: Schema::new(),
            decl_order: Vec::new(),
            var_decls: HashMap::new(),
            amendments: Vec::new(),
        }
    }

    /// Run every phase for `as_of`.
    pub fn compile(mut self, as_of: NaiveDate) -> Result<IR, CompileError> {
        let modules = std::mem::take(&mut self.modules);
        for module in &modules {
            self.collect_entities(module)?;
            self.collect_variables(module)?;
            self.amendments.extend(module.amendments.iter().cloned());
        }
        debug!(
            variables = self.decl_order.len(),
            entities = self.schema.entities.len(),
            amendments = self.amendments.len(),
            "declarations collected"
        );

        let mut resolved = self.resolve_temporal(as_of)?;

        for var in resolved.values_mut() {
            var.deps = find_deps(&var.expr);
        }

        let order = self.topo_sort(&resolved)?;
        debug!(order = order.len(), %as_of, "compiled");

        Ok(IR {
            schema: self.schema,
            variables: resolved,
            order,
        })
    }

    /// Union entity declarations across modules; same-name entities merge
    /// field-by-field, and a type disagreement is fatal.
    fn collect_entities(&mut self, module: &Module) -> Result<(), CompileError> {
        for decl in &module.entities {
            let incoming = Entity::from(decl);
            match self.schema.entities.get_mut(&incoming.name) {
                None => self.schema.add_entity(incoming),
                Some(existing) => {
                    for field in incoming.fields {
                        match existing.field(&field.name) {
                            None => existing.fields.push(field),
                            Some(prior) if prior.dtype != field.dtype => {
                                return Err(CompileError::FieldTypeConflict {
                                    entity: existing.name.clone(),
                                    field: field.name,
                                    existing: prior.dtype,
                                    conflicting: field.dtype,
                                });
                            }
                            Some(_) => {}
                        }
                    }
                    for relation in incoming.relations {
                        if existing.relation(&relation.name).is_none() {
                            existing.relations.push(relation);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn collect_variables(&mut self, module: &Module) -> Result<(), CompileError> {
        for decl in &module.variables {
            if self.var_decls.contains_key(&decl.path) {
                return Err(CompileError::DuplicateDeclaration(decl.path.clone()));
            }
            self.decl_order.push(decl.path.clone());
            self.var_decls.insert(decl.path.clone(), decl.clone());
        }
        Ok(())
    }

    /// Resolve which temporal value applies per variable, then layer
    /// amendments over the result in source order.
    fn resolve_temporal(
        &self,
        as_of: NaiveDate,
    ) -> Result<HashMap<String, ResolvedVar>, CompileError> {
        let mut resolved = HashMap::new();

        for path in &self.decl_order {
            let decl = &self.var_decls[path];
            let expr =
                pick_temporal(&decl.values, as_of).ok_or_else(|| CompileError::NoTemporalValue {
                    path: path.clone(),
                    as_of,
                })?;
            resolved.insert(
                path.clone(),
                ResolvedVar {
                    path: path.clone(),
                    entity: decl.entity.clone(),
                    expr: expr.clone(),
                    deps: BTreeSet::new(),
                },
            );
        }

        // Later amendments override earlier ones; an amendment with no
        // interval covering as_of leaves the base untouched.
        for amendment in &self.amendments {
            let Some(var) = resolved.get_mut(&amendment.target) else {
                return Err(CompileError::UnknownAmendmentTarget(
                    amendment.target.clone(),
                ));
            };
            if let Some(expr) = pick_temporal(&amendment.values, as_of) {
                debug!(path = %amendment.target, "amendment applied");
                var.expr = expr.clone();
            }
        }

        Ok(resolved)
    }

    /// Depth-first postorder emit; a node re-entered while on the stack is
    /// a cycle. Paths referenced but never declared are visited for cycle
    /// soundness yet excluded from the order - they resolve at evaluation
    /// as current-row fields or fail there.
    fn topo_sort(
        &self,
        variables: &HashMap<String, ResolvedVar>,
    ) -> Result<Vec<String>, CompileError> {
        let mut visited = HashSet::new();
        let mut temp = HashSet::new();
        let mut order = Vec::new();

        for path in &self.decl_order {
            visit(path, variables, &mut temp, &mut visited, &mut order)?;
        }

        Ok(order)
    }
}

fn visit(
    path: &str,
    variables: &HashMap<String, ResolvedVar>,
    temp: &mut HashSet<String>,
    visited: &mut HashSet<String>,
    order: &mut Vec<String>,
) -> Result<(), CompileError> {
    if temp.contains(path) {
        return Err(CompileError::CircularDependency(path.to_string()));
    }
    if visited.contains(path) {
        return Ok(());
    }
    temp.insert(path.to_string());
    if let Some(var) = variables.get(path) {
        for dep in &var.deps {
            visit(dep, variables, temp, visited, order)?;
        }
    }
    temp.remove(path);
    visited.insert(path.to_string());
    if variables.contains_key(path) {
        order.push(path.to_string());
    }
    Ok(())
}

/// Pick the applicable temporal value for a date. Later values win.
pub fn pick_temporal(values: &[TemporalValue], as_of: NaiveDate) -> Option<&Expr> {
    let mut result = None;
    for tv in values {
        if tv.contains(as_of) {
            result = Some(&tv.expr);
        }
    }
    result
}

/// Absolute paths referenced by an expression. Only `/`-paths create graph
/// edges; bare identifiers are entity-local.
pub fn find_deps(expr: &Expr) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    walk_deps(expr, &mut deps);
    deps
}

fn walk_deps(expr: &Expr, deps: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal { .. } => {}
        Expr::Var { path } => {
            if path.contains('/') {
                deps.insert(path.clone());
            }
        }
        Expr::BinOp { left, right, .. } => {
            walk_deps(left, deps);
            walk_deps(right, deps);
        }
        Expr::UnaryOp { operand, .. } => walk_deps(operand, deps),
        Expr::Call { args, .. } => {
            for arg in args {
                walk_deps(arg, deps);
            }
        }
        Expr::FieldAccess { obj, .. } => walk_deps(obj, deps),
        Expr::Match {
            subject,
            cases,
            default,
        } => {
            walk_deps(subject, deps);
            for case in cases {
                walk_deps(&case.pattern, deps);
                walk_deps(&case.result, deps);
            }
            if let Some(default) = default {
                walk_deps(default, deps);
            }
        }
        Expr::Cond {
            condition,
            then_expr,
            else_expr,
        } => {
            walk_deps(condition, deps);
            walk_deps(then_expr, deps);
            walk_deps(else_expr, deps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{add, amend, from_date, from_to, lit, scalar_var, var};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn module_of(variables: Vec<VariableDecl>, amendments: Vec<AmendDecl>) -> Module {
        Module {
            variables,
            amendments,
            ..Module::default()
        }
    }

    #[test]
    fn test_last_interval_wins() {
        let module = module_of(
            vec![scalar_var(
                "gov/tax/rate",
                vec![
                    from_date(d(2020, 1, 1), lit(0.20)),
                    from_date(d(2023, 1, 1), lit(0.22)),
                ],
            )],
            vec![],
        );
        let ir = compile(&[module], d(2024, 6, 1)).unwrap();
        assert_eq!(
            ir.variables["gov/tax/rate"].expr,
            lit(0.22),
            "the later layer covers 2024"
        );
    }

    #[test]
    fn test_earlier_date_uses_earlier_layer() {
        let module = module_of(
            vec![scalar_var(
                "gov/tax/rate",
                vec![
                    from_date(d(2020, 1, 1), lit(0.20)),
                    from_date(d(2023, 1, 1), lit(0.22)),
                ],
            )],
            vec![],
        );
        let ir = compile(&[module], d(2022, 6, 1)).unwrap();
        assert_eq!(ir.variables["gov/tax/rate"].expr, lit(0.20));
    }

    #[test]
    fn test_bounded_interval_expires() {
        let module = module_of(
            vec![scalar_var(
                "gov/temporary",
                vec![from_to(d(2020, 1, 1), d(2020, 12, 31), lit(1))],
            )],
            vec![],
        );
        let err = compile(&[module], d(2021, 6, 1)).unwrap_err();
        assert!(matches!(err, CompileError::NoTemporalValue { .. }));
        assert!(err.to_string().contains("gov/temporary"));
    }

    #[test]
    fn test_amendment_overrides_at_covered_dates_only() {
        let base = module_of(
            vec![scalar_var(
                "gov/uc/standard_allowance",
                vec![from_date(d(2022, 1, 1), lit(368.74))],
            )],
            vec![],
        );
        let reform = module_of(
            vec![],
            vec![amend(
                "gov/uc/standard_allowance",
                vec![from_date(d(2024, 4, 1), lit(400.00))],
            )],
        );

        let ir = compile(&[base.clone(), reform.clone()], d(2024, 6, 1)).unwrap();
        assert_eq!(ir.variables["gov/uc/standard_allowance"].expr, lit(400.00));

        let ir = compile(&[base, reform], d(2023, 1, 1)).unwrap();
        assert_eq!(ir.variables["gov/uc/standard_allowance"].expr, lit(368.74));
    }

    #[test]
    fn test_later_amendment_wins() {
        let base = module_of(
            vec![scalar_var("gov/x", vec![from_date(d(2020, 1, 1), lit(1))])],
            vec![],
        );
        let first = module_of(
            vec![],
            vec![amend("gov/x", vec![from_date(d(2021, 1, 1), lit(2))])],
        );
        let second = module_of(
            vec![],
            vec![amend("gov/x", vec![from_date(d(2021, 1, 1), lit(3))])],
        );
        let ir = compile(&[base, first, second], d(2022, 1, 1)).unwrap();
        assert_eq!(ir.variables["gov/x"].expr, lit(3));
    }

    #[test]
    fn test_unknown_amendment_target() {
        let module = module_of(
            vec![],
            vec![amend("gov/ghost", vec![from_date(d(2020, 1, 1), lit(1))])],
        );
        let err = compile(&[module], d(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, CompileError::UnknownAmendmentTarget(path) if path == "gov/ghost"));
    }

    #[test]
    fn test_duplicate_declaration_across_modules() {
        let decl = scalar_var("gov/x", vec![from_date(d(2020, 1, 1), lit(1))]);
        let err = compile(
            &[
                module_of(vec![decl.clone()], vec![]),
                module_of(vec![decl], vec![]),
            ],
            d(2024, 1, 1),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateDeclaration(path) if path == "gov/x"));
    }

    #[test]
    fn test_dependency_ordering() {
        let module = module_of(
            vec![
                scalar_var(
                    "gov/b",
                    vec![from_date(d(2020, 1, 1), add(var("gov/a"), lit(1)))],
                ),
                scalar_var("gov/a", vec![from_date(d(2020, 1, 1), lit(10))]),
            ],
            vec![],
        );
        let ir = compile(&[module], d(2024, 1, 1)).unwrap();
        let pos = |p: &str| ir.order.iter().position(|x| x == p).unwrap();
        assert!(pos("gov/a") < pos("gov/b"));
    }

    #[test]
    fn test_cycle_detected() {
        let module = module_of(
            vec![
                scalar_var(
                    "gov/a",
                    vec![from_date(d(2020, 1, 1), add(var("gov/b"), lit(1)))],
                ),
                scalar_var(
                    "gov/b",
                    vec![from_date(d(2020, 1, 1), add(var("gov/a"), lit(1)))],
                ),
            ],
            vec![],
        );
        let err = compile(&[module], d(2024, 1, 1)).unwrap_err();
        match err {
            CompileError::CircularDependency(path) => {
                assert!(path == "gov/a" || path == "gov/b");
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle_detected() {
        let module = module_of(
            vec![scalar_var(
                "gov/a",
                vec![from_date(d(2020, 1, 1), add(var("gov/a"), lit(1)))],
            )],
            vec![],
        );
        assert!(matches!(
            compile(&[module], d(2024, 1, 1)),
            Err(CompileError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_undeclared_dependency_not_in_order() {
        let module = module_of(
            vec![scalar_var(
                "gov/a",
                vec![from_date(d(2020, 1, 1), add(var("gov/missing"), lit(1)))],
            )],
            vec![],
        );
        let ir = compile(&[module], d(2024, 1, 1)).unwrap();
        assert_eq!(ir.order, vec!["gov/a".to_string()]);
    }

    #[test]
    fn test_bare_identifiers_create_no_edges() {
        let module = module_of(
            vec![scalar_var(
                "gov/a",
                vec![from_date(d(2020, 1, 1), add(var("income"), lit(1)))],
            )],
            vec![],
        );
        let ir = compile(&[module], d(2024, 1, 1)).unwrap();
        assert!(ir.variables["gov/a"].deps.is_empty());
    }

    #[test]
    fn test_field_type_conflict() {
        use crate::ast::{EntityDecl, FieldDecl};
        let m1 = Module {
            entities: vec![EntityDecl {
                name: "person".into(),
                fields: vec![FieldDecl {
                    name: "income".into(),
                    dtype: FieldType::Float,
                }],
                relations: vec![],
            }],
            ..Module::default()
        };
        let m2 = Module {
            entities: vec![EntityDecl {
                name: "person".into(),
                fields: vec![FieldDecl {
                    name: "income".into(),
                    dtype: FieldType::Str,
                }],
                relations: vec![],
            }],
            ..Module::default()
        };
        assert!(matches!(
            compile(&[m1, m2], d(2024, 1, 1)),
            Err(CompileError::FieldTypeConflict { .. })
        ));
    }

    #[test]
    fn test_entity_merge_unions_fields() {
        use crate::ast::{EntityDecl, FieldDecl};
        let m1 = Module {
            entities: vec![EntityDecl {
                name: "person".into(),
                fields: vec![FieldDecl {
                    name: "income".into(),
                    dtype: FieldType::Float,
                }],
                relations: vec![],
            }],
            ..Module::default()
        };
        let m2 = Module {
            entities: vec![EntityDecl {
                name: "person".into(),
                fields: vec![FieldDecl {
                    name: "age".into(),
                    dtype: FieldType::Int,
                }],
                relations: vec![],
            }],
            ..Module::default()
        };
        let ir = compile(&[m1, m2], d(2024, 1, 1)).unwrap();
        let person = ir.schema.entity("person").unwrap();
        assert_eq!(person.fields.len(), 2);
    }

    #[test]
    fn test_deps_include_match_patterns() {
        use crate::ast::builders::match_expr;
        let expr = match_expr(var("band"), vec![(var("gov/low"), lit(1))], None);
        let deps = find_deps(&expr);
        assert!(deps.contains("gov/low"));
    }
}
