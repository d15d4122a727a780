//! Property-based tests (proptest).
//!
//! Universal properties of the engine: the division-by-zero contract,
//! temporal layer resolution as a fold, row independence under
//! permutation, and topological correctness of the IR order.

use chrono::NaiveDate;
use proptest::prelude::*;
use rac::ast::builders::{add, div, from_to, lit, scalar_var, var};
use rac::{compile, execute, parse, Data, Module, Row, Value};
use std::collections::HashMap;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn day_of_2020(offset: i64) -> NaiveDate {
    date("2020-01-01") + chrono::Duration::days(offset)
}

fn eval_scalar(expr: rac::Expr) -> Result<Value, rac::Error> {
    let module = Module {
        variables: vec![scalar_var("gov/x", vec![from_to(
            date("2000-01-01"),
            date("2100-01-01"),
            expr,
        )])],
        ..Module::default()
    };
    let ir = compile(&[module], date("2024-01-01"))?;
    let result = execute(&ir, &Data::default())?;
    Ok(result.scalars["gov/x"].clone())
}

proptest! {
    /// a / 0 == 0 for every finite numerator.
    #[test]
    fn prop_division_by_zero_is_zero(a in -1.0e12f64..1.0e12) {
        let value = eval_scalar(div(lit(a), lit(0.0))).unwrap();
        prop_assert_eq!(value, Value::Float(0.0));
    }

    /// Division agrees with f64 division away from zero.
    #[test]
    fn prop_division_matches_f64(a in -1.0e6f64..1.0e6, b in 1.0e-3f64..1.0e6) {
        let value = eval_scalar(div(lit(a), lit(b))).unwrap();
        prop_assert_eq!(value, Value::Float(a / b));
    }

    /// The resolved layer is the last (in declaration order) whose
    /// interval contains the compilation date.
    #[test]
    fn prop_temporal_last_wins(
        intervals in prop::collection::vec((0i64..1000, 0i64..1000), 1..8),
        query in 0i64..1000,
    ) {
        let values: Vec<_> = intervals
            .iter()
            .enumerate()
            .map(|(i, (a, b))| {
                let (start, end) = (*a.min(b), *a.max(b));
                from_to(day_of_2020(start), day_of_2020(end), lit(i as i64))
            })
            .collect();
        let module = Module {
            variables: vec![scalar_var("gov/x", values.clone())],
            ..Module::default()
        };
        let as_of = day_of_2020(query);

        // reference fold over the declaration list
        let expected = values
            .iter()
            .enumerate()
            .filter(|(_, tv)| tv.start <= as_of && as_of <= tv.end.unwrap())
            .map(|(i, _)| i as i64)
            .last();

        match (compile(&[module], as_of), expected) {
            (Ok(ir), Some(i)) => {
                let result = execute(&ir, &Data::default()).unwrap();
                prop_assert_eq!(result.scalars["gov/x"].clone(), Value::Int(i));
            }
            (Err(_), None) => {}
            (Ok(_), None) => prop_assert!(false, "compiled with no covering interval"),
            (Err(e), Some(_)) => prop_assert!(false, "failed with covering interval: {}", e),
        }
    }

    /// Permuting input rows permutes outputs identically; rows never
    /// influence each other.
    #[test]
    fn prop_row_independence(
        incomes in prop::collection::vec(-1.0e6f64..1.0e6, 1..40),
        seed in 0u64..1000,
    ) {
        let source = "entity person:\n  income: float\n\
                      variable person/tax:\n  entity: person\n  from 2020-01-01: max(0, income - 12_500) * 0.2\n";
        let ir = compile(&[parse(source).unwrap()], date("2024-01-01")).unwrap();

        let rows: Vec<Row> = incomes
            .iter()
            .map(|i| {
                let mut row = Row::new();
                row.insert("income".to_string(), Value::Float(*i));
                row
            })
            .collect();

        // deterministic pseudo-shuffle
        let mut permutation: Vec<usize> = (0..rows.len()).collect();
        let mut state = seed.wrapping_add(1);
        for i in (1..permutation.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            permutation.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let shuffled: Vec<Row> = permutation.iter().map(|i| rows[*i].clone()).collect();

        let run = |rows: Vec<Row>| {
            let mut tables = HashMap::new();
            tables.insert("person".to_string(), rows);
            let result = execute(&ir, &Data::new(tables)).unwrap();
            result.entities["person"]["person/tax"]
                .iter()
                .map(|v| v.as_f64().unwrap())
                .collect::<Vec<f64>>()
        };

        let original = run(rows);
        let permuted = run(shuffled);
        for (out_idx, in_idx) in permutation.iter().enumerate() {
            prop_assert_eq!(permuted[out_idx], original[*in_idx]);
        }
    }

    /// For every dependency edge u -> v, v precedes u in IR order.
    #[test]
    fn prop_topological_order(chain_len in 1usize..20) {
        // a chain with fan-in: each variable depends on its predecessor
        let mut variables = vec![scalar_var(
            "gov/v0",
            vec![from_to(date("2000-01-01"), date("2100-01-01"), lit(1))],
        )];
        for i in 1..chain_len {
            variables.push(scalar_var(
                format!("gov/v{}", i),
                vec![from_to(
                    date("2000-01-01"),
                    date("2100-01-01"),
                    add(var(format!("gov/v{}", i - 1)), lit(1)),
                )],
            ));
        }
        // declare in reverse so order must come from dependencies
        variables.reverse();
        let module = Module { variables, ..Module::default() };
        let ir = compile(&[module], date("2024-01-01")).unwrap();

        for path in &ir.order {
            let var = &ir.variables[path];
            let position = ir.order.iter().position(|p| p == path).unwrap();
            for dep in &var.deps {
                let dep_position = ir.order.iter().position(|p| p == dep).unwrap();
                prop_assert!(dep_position < position, "{} should precede {}", dep, path);
            }
        }
    }
}
