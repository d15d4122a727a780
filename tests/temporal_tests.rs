//! Temporal compilation tests
//!
//! Layered value resolution, amendment precedence, and the two dated
//! bracket scenarios: picking the 2024 layer of a two-layer rate, and an
//! amendment that overrides only at covered dates.

use chrono::NaiveDate;
use rac::ast::builders::lit;
use rac::{compile, parse, CompileError, Expr, Value};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn compile_at(sources: &[&str], as_of: &str) -> Result<rac::IR, rac::Error> {
    let modules = sources
        .iter()
        .map(|s| parse(s))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(compile(&modules, date(as_of))?)
}

fn scalar_literal(ir: &rac::IR, path: &str) -> Value {
    match &ir.variables[path].expr {
        Expr::Literal { value } => value.clone(),
        other => panic!("expected literal for {}, got {:?}", path, other),
    }
}

#[test]
fn test_two_layer_bracket_picks_2024_layer() {
    let source = "variable gov/tax/rate:\n  from 2020-01-01: 0.20\n  from 2023-01-01: 0.22\n";
    let ir = compile_at(&[source], "2024-06-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/tax/rate"), Value::Float(0.22));
}

#[test]
fn test_two_layer_bracket_earlier_date() {
    let source = "variable gov/tax/rate:\n  from 2020-01-01: 0.20\n  from 2023-01-01: 0.22\n";
    let ir = compile_at(&[source], "2021-06-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/tax/rate"), Value::Float(0.20));
}

#[test]
fn test_before_first_layer_fails() {
    let source = "variable gov/tax/rate:\n  from 2020-01-01: 0.20\n";
    let err = compile_at(&[source], "2019-12-31").unwrap_err();
    assert!(err.to_string().contains("no value for gov/tax/rate"));
}

#[test]
fn test_layer_start_date_is_inclusive() {
    let source = "variable gov/tax/rate:\n  from 2020-01-01: 0.20\n  from 2023-01-01: 0.22\n";
    let ir = compile_at(&[source], "2023-01-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/tax/rate"), Value::Float(0.22));
}

#[test]
fn test_layer_end_date_is_inclusive() {
    let source = "variable gov/relief:\n  from 2020-01-01 to 2020-12-31: 100\n";
    let ir = compile_at(&[source], "2020-12-31").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/relief"), Value::Int(100));
    assert!(compile_at(&[source], "2021-01-01").is_err());
}

#[test]
fn test_last_declared_layer_wins_on_overlap() {
    // both intervals cover 2021; declaration order breaks the tie
    let source = "variable gov/x:\n  from 2020-01-01: 1\n  from 2020-06-01 to 2022-01-01: 2\n";
    let ir = compile_at(&[source], "2021-06-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/x"), Value::Int(2));

    // past the second interval's end the first (open) layer applies again
    let ir = compile_at(&[source], "2023-01-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/x"), Value::Int(1));
}

#[test]
fn test_amendment_overrides_at_covered_date() {
    let base = "variable gov/uc/standard_allowance:\n  from 2022-01-01: 368.74\n";
    let reform = "amend gov/uc/standard_allowance:\n  from 2024-04-01: 400.00\n";

    let ir = compile_at(&[base, reform], "2024-06-01").unwrap();
    assert_eq!(
        scalar_literal(&ir, "gov/uc/standard_allowance"),
        Value::Float(400.00)
    );

    let ir = compile_at(&[base, reform], "2023-01-01").unwrap();
    assert_eq!(
        scalar_literal(&ir, "gov/uc/standard_allowance"),
        Value::Float(368.74)
    );
}

#[test]
fn test_amendment_in_same_module() {
    let source = "variable gov/x:\n  from 2020-01-01: 1\n\
                  amend gov/x:\n  from 2021-01-01: 2\n";
    let ir = compile_at(&[source], "2022-01-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/x"), Value::Int(2));
}

#[test]
fn test_later_module_amendment_wins() {
    let base = "variable gov/x:\n  from 2020-01-01: 1\n";
    let first = "amend gov/x:\n  from 2021-01-01: 2\n";
    let second = "amend gov/x:\n  from 2021-01-01: 3\n";
    let ir = compile_at(&[base, first, second], "2022-01-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/x"), Value::Int(3));
}

#[test]
fn test_amendment_with_bounded_interval_expires() {
    let base = "variable gov/x:\n  from 2020-01-01: 1\n";
    let reform = "amend gov/x:\n  from 2021-01-01 to 2021-12-31: 2\n";
    let ir = compile_at(&[base, reform], "2023-01-01").unwrap();
    assert_eq!(scalar_literal(&ir, "gov/x"), Value::Int(1));
}

#[test]
fn test_temporal_monotonicity_over_layer_table() {
    // last index whose interval contains T wins, for every T
    let source = r#"
variable gov/x:
  from 2020-01-01 to 2020-12-31: 1
  from 2021-01-01: 2
  from 2023-01-01 to 2023-12-31: 3
"#;
    let expectations = [
        ("2020-06-01", 1),
        ("2021-06-01", 2),
        ("2023-06-01", 3),
        ("2024-06-01", 2),
    ];
    for (as_of, expected) in expectations {
        let ir = compile_at(&[source], as_of).unwrap();
        assert_eq!(
            scalar_literal(&ir, "gov/x"),
            Value::Int(expected),
            "at {}",
            as_of
        );
    }
}

#[test]
fn test_amendment_expression_can_reference_other_variables() {
    let base = "variable gov/base:\n  from 2020-01-01: 100\n\
                variable gov/x:\n  from 2020-01-01: 1\n";
    let reform = "amend gov/x:\n  from 2021-01-01: gov/base * 2\n";
    let ir = compile_at(&[base, reform], "2022-01-01").unwrap();
    // dependency analysis runs after amendments are applied
    assert!(ir.variables["gov/x"].deps.contains("gov/base"));
    let pos = |p: &str| ir.order.iter().position(|x| x == p).unwrap();
    assert!(pos("gov/base") < pos("gov/x"));
}

#[test]
fn test_unknown_amendment_target_is_fatal() {
    let err = compile_at(&["amend gov/ghost:\n  from 2020-01-01: 1\n"], "2024-01-01").unwrap_err();
    assert!(matches!(
        err,
        rac::Error::Compile(CompileError::UnknownAmendmentTarget(_))
    ));
}

#[test]
fn test_duplicate_declaration_is_fatal() {
    let source = "variable gov/x:\n  from 2020-01-01: 1\n";
    let err = compile_at(&[source, source], "2024-01-01").unwrap_err();
    assert!(matches!(
        err,
        rac::Error::Compile(CompileError::DuplicateDeclaration(_))
    ));
}

#[test]
fn test_amendment_literal_builder_equivalence() {
    // the parsed form and the builder form compile identically
    let parsed = compile_at(
        &["variable gov/x:\n  from 2020-01-01: 5\n"],
        "2024-01-01",
    )
    .unwrap();
    assert_eq!(parsed.variables["gov/x"].expr, lit(5));
}
