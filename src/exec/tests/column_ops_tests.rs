use polars::prelude::*;
use serde_json::{json, Value};

use super::common::*;
use crate::exec::discretize::{DiscretizeModel, Side};
use crate::operation::{ColumnOp, FunctionRef};
use crate::schema::{Column, Registry};
use crate::scripts::{FunctionRegistry, Udf};

fn column(table: &str, name: &str) -> Column {
    Column { table: table.into(), name: name.into(), target_table: None }
}

fn facts_and_groups() -> Registry {
    let mut reg = Registry::new();
    source(&mut reg, "Facts", df!("A" => ["a", "a", "b", "b"], "M" => [1i64, 2, 3, 4], "N" => [4.0f64, 3.0, 2.0, 1.0]).unwrap());
    source(&mut reg, "Groups", df!("A" => ["a", "b", "c"], "B" => [1.0f64, 2.0, 3.0]).unwrap());
    reg.add_column(
        Column { table: "Facts".into(), name: "Link".into(), target_table: Some("Groups".into()) },
        ColumnOp::Link { keys: vec!["A".into()], linked_keys: vec!["A".into()] },
    );
    reg
}

#[test]
fn test_calculate_row_function() {
    let mut reg = facts_and_groups();
    let plus_one = Udf::row(|row, _| Ok(AnyValue::Float64(row[0].extract::<f64>().unwrap_or(f64::NAN) + 1.0)));
    reg.add_column(column("Facts", "M1"), ColumnOp::Calculate { function: plus_one.into(), inputs: vec!["M".into()], model: Value::Null });
    run_column(&mut reg, &FunctionRegistry::new(), false, "Facts", "M1").unwrap();
    assert_eq!(f64s(&reg, "Facts", "M1"), vec![Some(2.0), Some(3.0), Some(4.0), Some(5.0)]);
}

#[test]
fn test_calculate_lua_with_keyword_model() {
    let mut reg = facts_and_groups();
    reg.add_column(column("Facts", "Scaled"), ColumnOp::Calculate {
        function: FunctionRef::Lua("function(m, n, model) return m * model.k + n end".into()),
        inputs: vec!["M".into(), "N".into()],
        model: json!({"k": 10}),
    });
    run_column(&mut reg, &FunctionRegistry::new(), false, "Facts", "Scaled").unwrap();
    assert_eq!(f64s(&reg, "Facts", "Scaled"), vec![Some(14.0), Some(23.0), Some(32.0), Some(41.0)]);
}

#[test]
fn test_compute_column_function() {
    let mut reg = facts_and_groups();
    let double = Udf::column(|df, _| {
        let ca = df.column("M")?.i64()?;
        Ok(ca.into_iter().map(|v| v.map(|x| x * 2)).collect::<Int64Chunked>().into_series())
    });
    reg.add_column(column("Facts", "M2"), ColumnOp::Compute { function: double.into(), inputs: vec!["M".into()], model: Value::Null });
    run_column(&mut reg, &FunctionRegistry::new(), false, "Facts", "M2").unwrap();
    assert_eq!(f64s(&reg, "Facts", "M2"), vec![Some(2.0), Some(4.0), Some(6.0), Some(8.0)]);
}

#[test]
fn test_compute_rejects_wrong_length() {
    let mut reg = facts_and_groups();
    let short = Udf::column(|_, _| Ok(Series::new("x".into(), [1i64])));
    reg.add_column(column("Facts", "X"), ColumnOp::Compute { function: short.into(), inputs: vec!["M".into()], model: Value::Null });
    let err = run_column(&mut reg, &FunctionRegistry::new(), false, "Facts", "X").unwrap_err();
    assert_eq!(err.code_str(), "udf_output_length");
}

#[test]
fn test_link_first_match_and_nulls() {
    let mut reg = Registry::new();
    source(&mut reg, "Facts", df!("K" => ["x", "y", "z", "x"]).unwrap());
    source(&mut reg, "Dim", df!("K" => ["y", "x", "x"]).unwrap());
    reg.add_column(
        Column { table: "Facts".into(), name: "L".into(), target_table: Some("Dim".into()) },
        ColumnOp::Link { keys: vec!["K".into()], linked_keys: vec!["K".into()] },
    );
    run_column(&mut reg, &FunctionRegistry::new(), false, "Facts", "L").unwrap();
    assert_eq!(u64s(&reg, "Facts", "L"), vec![Some(1), Some(0), None, Some(1)]);
}

#[test]
fn test_merge_follows_link() {
    let mut reg = facts_and_groups();
    reg.add_column(column("Facts", "Link::B"), ColumnOp::Merge { path: vec!["Link".into(), "B".into()] });
    let functions = FunctionRegistry::new();
    run_column(&mut reg, &functions, false, "Facts", "Link").unwrap();
    run_column(&mut reg, &functions, false, "Facts", "Link::B").unwrap();
    assert_eq!(f64s(&reg, "Facts", "Link::B"), vec![Some(1.0), Some(1.0), Some(2.0), Some(2.0)]);
}

#[test]
fn test_aggregate_sum_with_fill() {
    let mut reg = facts_and_groups();
    reg.add_column(column("Groups", "Total"), ColumnOp::Aggregate {
        fact_table: "Facts".into(), link: "Link".into(), function: FunctionRef::Named("sum".into()),
        inputs: vec!["M".into()], model: Value::Null, fill: Some(0.0),
    });
    let functions = FunctionRegistry::with_builtins();
    run_column(&mut reg, &functions, false, "Facts", "Link").unwrap();
    run_column(&mut reg, &functions, false, "Groups", "Total").unwrap();
    assert_eq!(f64s(&reg, "Groups", "Total"), vec![Some(3.0), Some(7.0), Some(0.0)]);
}

#[test]
fn test_aggregate_without_measures_counts() {
    let mut reg = facts_and_groups();
    reg.add_column(column("Groups", "Size"), ColumnOp::Aggregate {
        fact_table: "Facts".into(), link: "Link".into(), function: FunctionRef::Named("unused".into()),
        inputs: vec![], model: Value::Null, fill: Some(0.0),
    });
    let functions = FunctionRegistry::new();
    run_column(&mut reg, &functions, false, "Facts", "Link").unwrap();
    run_column(&mut reg, &functions, false, "Groups", "Size").unwrap();
    assert_eq!(u64s(&reg, "Groups", "Size"), vec![Some(2), Some(2), Some(0)]);
}

#[test]
fn test_aggregate_group_sees_facts_in_source_order() {
    let mut reg = facts_and_groups();
    // first minus last of each group exposes the row order handed to the function
    let spread = Udf::group(|df, _| {
        let ca = df.column("N")?.f64()?;
        let first = ca.get(0).unwrap_or(0.0);
        let last = ca.get(ca.len() - 1).unwrap_or(0.0);
        Ok(AnyValue::Float64(first - last))
    });
    reg.add_column(column("Groups", "Spread"), ColumnOp::Aggregate {
        fact_table: "Facts".into(), link: "Link".into(), function: spread.into(),
        inputs: vec!["N".into()], model: Value::Null, fill: None,
    });
    let functions = FunctionRegistry::new();
    run_column(&mut reg, &functions, false, "Facts", "Link").unwrap();
    run_column(&mut reg, &functions, false, "Groups", "Spread").unwrap();
    assert_eq!(f64s(&reg, "Groups", "Spread"), vec![Some(1.0), Some(1.0), None]);
}

#[test]
fn test_roll_ungrouped_and_grouped() {
    let mut reg = Registry::new();
    source(&mut reg, "T", df!("A" => [1.0f64, 2.0, 3.0]).unwrap());
    reg.add_column(column("T", "R"), ColumnOp::Roll {
        window: 2, group: None, function: FunctionRef::Named("sum".into()), inputs: vec!["A".into()], model: Value::Null,
    });
    let functions = FunctionRegistry::with_builtins();
    run_column(&mut reg, &functions, false, "T", "R").unwrap();
    assert_eq!(f64s(&reg, "T", "R"), vec![None, Some(3.0), Some(5.0)]);

    let mut reg = Registry::new();
    source(&mut reg, "T", df!("G" => [1i64, 2, 1, 2], "A" => [1.0f64, 2.0, 3.0, 4.0]).unwrap());
    reg.add_column(column("T", "R"), ColumnOp::Roll {
        window: 2, group: Some("G".into()), function: FunctionRef::Named("sum".into()), inputs: vec!["A".into()], model: Value::Null,
    });
    run_column(&mut reg, &functions, false, "T", "R").unwrap();
    assert_eq!(f64s(&reg, "T", "R"), vec![None, None, Some(4.0), Some(6.0)]);
}

#[test]
fn test_row_function_cannot_accumulate() {
    let mut reg = Registry::new();
    source(&mut reg, "T", df!("A" => [1.0f64, 2.0]).unwrap());
    let row = Udf::row(|_, _| Ok(AnyValue::Null));
    reg.add_column(column("T", "R"), ColumnOp::Roll { window: 1, group: None, function: row.into(), inputs: vec!["A".into()], model: Value::Null });
    let err = run_column(&mut reg, &FunctionRegistry::new(), false, "T", "R").unwrap_err();
    assert_eq!(err.code_str(), "accumulate");
    assert!(matches!(err, crate::error::FlowError::Unimplemented { .. }));
}

#[test]
fn test_discretize_column() {
    let mut reg = Registry::new();
    source(&mut reg, "T", df!("A" => [1i64, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap());
    let model = DiscretizeModel { origin: 5.0, step: 3.0, label: Side::Right, closed: Side::Right, ..Default::default() };
    reg.add_column(column("T", "D"), ColumnOp::Discretize { input: "A".into(), model });
    run_column(&mut reg, &FunctionRegistry::new(), false, "T", "D").unwrap();
    let d: Vec<Option<i64>> = reg.get_table("T").unwrap().store.column_values("D").unwrap().i64().unwrap().into_iter().collect();
    assert_eq!(d, vec![Some(-1), Some(-1), Some(0), Some(0), Some(0), Some(1), Some(1), Some(1), Some(2)]);
}

#[test]
fn test_missing_input_is_a_data_error() {
    let mut reg = Registry::new();
    source(&mut reg, "T", df!("A" => [1.0f64]).unwrap());
    reg.add_column(column("T", "C"), ColumnOp::Calculate { function: FunctionRef::Named("f".into()), inputs: vec!["Nope".into()], model: Value::Null });
    let functions = FunctionRegistry::new();
    functions.register("f", Udf::row(|_, _| Ok(AnyValue::Null)));
    let err = run_column(&mut reg, &functions, false, "T", "C").unwrap_err();
    assert!(err.is_data());
}

#[test]
fn test_incremental_evaluates_added_rows_only() {
    let mut reg = Registry::new();
    source(&mut reg, "T", df!("A" => [1.0f64, 2.0]).unwrap());
    let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = calls.clone();
    let plus = Udf::row(move |row, _| {
        seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(AnyValue::Float64(row[0].extract::<f64>().unwrap_or(0.0) + 10.0))
    });
    reg.add_column(column("T", "B"), ColumnOp::Calculate { function: plus.into(), inputs: vec!["A".into()], model: Value::Null });
    let functions = FunctionRegistry::new();
    run_column(&mut reg, &functions, true, "T", "B").unwrap();
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    let store = &mut reg.get_table_mut("T").unwrap().store;
    store.clear_change_status();
    store.add(df!("A" => [3.0f64]).unwrap()).unwrap();
    run_column(&mut reg, &functions, true, "T", "B").unwrap();
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(f64s(&reg, "T", "B"), vec![Some(11.0), Some(12.0), Some(13.0)]);
}

#[test]
fn test_incremental_link_follows_replaced_target_rows() {
    let mut reg = Registry::new();
    source(&mut reg, "Facts", df!("K" => ["a", "b", "a"]).unwrap());
    source(&mut reg, "Dim", df!("K" => ["a", "b"]).unwrap());
    reg.add_column(
        Column { table: "Facts".into(), name: "L".into(), target_table: Some("Dim".into()) },
        ColumnOp::Link { keys: vec!["K".into()], linked_keys: vec!["K".into()] },
    );
    let functions = FunctionRegistry::new();
    run_column(&mut reg, &functions, true, "Facts", "L").unwrap();
    assert_eq!(u64s(&reg, "Facts", "L"), vec![Some(0), Some(1), Some(0)]);
    for name in ["Facts", "Dim"] {
        reg.get_table_mut(name).unwrap().store.clear_change_status();
    }

    // same target rows under fresh ids, no new facts
    let dim = &mut reg.get_table_mut("Dim").unwrap().store;
    dim.remove_all();
    dim.add(df!("K" => ["a", "b"]).unwrap()).unwrap();
    run_column(&mut reg, &functions, true, "Facts", "L").unwrap();
    assert_eq!(u64s(&reg, "Facts", "L"), vec![Some(2), Some(3), Some(2)]);
}

#[test]
fn test_incremental_link_keeps_old_rows_when_target_unchanged() {
    let mut reg = Registry::new();
    source(&mut reg, "Facts", df!("K" => ["a", "b"]).unwrap());
    source(&mut reg, "Dim", df!("K" => ["a", "b"]).unwrap());
    reg.add_column(
        Column { table: "Facts".into(), name: "L".into(), target_table: Some("Dim".into()) },
        ColumnOp::Link { keys: vec!["K".into()], linked_keys: vec!["K".into()] },
    );
    let functions = FunctionRegistry::new();
    run_column(&mut reg, &functions, true, "Facts", "L").unwrap();
    for name in ["Facts", "Dim"] {
        reg.get_table_mut(name).unwrap().store.clear_change_status();
    }
    // an out-of-band edit of an evaluated row stays invisible
    let facts = &mut reg.get_table_mut("Facts").unwrap().store;
    facts.set_range(&df!("L" => [7u64]).unwrap(), &(0..1), None).unwrap();
    facts.add(df!("K" => ["b"]).unwrap()).unwrap();
    run_column(&mut reg, &functions, true, "Facts", "L").unwrap();
    assert_eq!(u64s(&reg, "Facts", "L"), vec![Some(7), Some(1), Some(1)]);
}
