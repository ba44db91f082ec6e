use serde_json::Value;

use super::*;
use crate::error::FlowError;
use crate::operation::{ColumnOp, FunctionRef, TableOp};
use crate::schema::{Column, Table};

fn col(table: &str, name: &str) -> Column {
    Column { table: table.into(), name: name.into(), target_table: None }
}

fn link(table: &str, name: &str, target: &str) -> Column {
    Column { table: table.into(), name: name.into(), target_table: Some(target.into()) }
}

fn calc(inputs: &[&str]) -> ColumnOp {
    ColumnOp::Calculate {
        function: FunctionRef::Named("f".into()),
        inputs: inputs.iter().map(|s| s.to_string()).collect(),
        model: Value::Null,
    }
}

/// Facts -> Groups -> SuperGroups through two link columns.
fn chain() -> Registry {
    let mut r = Registry::new();
    r.add_table(Table::new("Facts", vec!["A".into(), "M".into()]), None);
    r.add_table(Table::new("Groups", vec!["A".into(), "B".into()]), None);
    r.add_table(Table::new("SuperGroups", vec!["B".into(), "C".into()]), None);
    r.add_column(link("Facts", "Link", "Groups"), ColumnOp::Link { keys: vec!["A".into()], linked_keys: vec!["A".into()] });
    r.add_column(link("Groups", "SuperLink", "SuperGroups"), ColumnOp::Link { keys: vec!["B".into()], linked_keys: vec!["B".into()] });
    r
}

#[test]
fn test_merge_path_synthesizes_intermediate_merge() {
    let mut r = chain();
    r.add_column(col("Facts", "C"), ColumnOp::Merge { path: vec!["Link".into(), "SuperLink".into(), "C".into()] });
    let topo = Topology::build(&mut r, &EngineConfig::default()).unwrap();
    assert_eq!(topo.synthesized.len(), 1);
    assert_eq!(
        topo.describe(&r),
        vec![
            vec!["Facts.Link (link)".to_string(), "Groups.SuperLink (link)".to_string()],
            vec!["Groups.SuperLink::C (merge)".to_string()],
            vec!["Facts.C (merge)".to_string()],
        ]
    );
    assert_eq!(topo.operation_count(), 4);
    assert_eq!(topo.elem_layers[1], vec![EntityRef::Column { table: "Groups".into(), column: "SuperLink::C".into() }]);
}

#[test]
fn test_path_input_becomes_merge() {
    let mut r = chain();
    r.add_column(col("Facts", "X"), calc(&["Link::B", "M"]));
    let topo = Topology::build(&mut r, &EngineConfig::default()).unwrap();
    let synth = r.operation(topo.synthesized[0]).unwrap();
    assert!(synth.synthesized);
    assert_eq!(synth.label(), "Facts.Link::B (merge)");
    assert_eq!(topo.describe(&r).last().unwrap(), &vec!["Facts.X (calculate)".to_string()]);
}

#[test]
fn test_filter_inherits_base_columns() {
    let mut r = Registry::new();
    r.add_table(Table::new("Facts", vec!["A".into(), "M".into()]), None);
    r.add_column(col("Facts", "keep"), calc(&["A"]));
    r.add_table(Table::new("Big", vec!["super".into()]), Some(TableOp::Filter { base: "Facts".into(), column: "keep".into() }));
    r.add_column(col("Big", "M1"), calc(&["M"]));
    let topo = Topology::build(&mut r, &EngineConfig::default()).unwrap();
    assert_eq!(
        topo.describe(&r),
        vec![
            vec!["Facts.keep (calculate)".to_string()],
            vec!["Big (filter)".to_string()],
            vec!["Big.M (merge)".to_string()],
            vec!["Big.M1 (calculate)".to_string()],
        ]
    );
    let merge = r.get_column_operations("Big", "M")[0];
    match &merge.definition {
        Definition::Column { op: ColumnOp::Merge { path }, .. } => assert_eq!(path, &vec!["super".to_string(), "M".to_string()]),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_product_inherits_through_matching_attribute() {
    let mut r = Registry::new();
    r.add_table(Table::new("T1", vec!["A".into()]), None);
    r.add_table(Table::new("T2", vec!["B".into()]), None);
    r.add_table(Table::new("P", vec!["t1".into(), "t2".into()]), Some(TableOp::Product { tables: vec!["T1".into(), "T2".into()] }));
    r.add_column(col("P", "AB"), calc(&["A", "B"]));
    Topology::build(&mut r, &EngineConfig::default()).unwrap();
    let path_of = |name: &str| match &r.get_column_operations("P", name)[0].definition {
        Definition::Column { op: ColumnOp::Merge { path }, .. } => path.clone(),
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(path_of("A"), vec!["t1".to_string(), "A".to_string()]);
    assert_eq!(path_of("B"), vec!["t2".to_string(), "B".to_string()]);
}

#[test]
fn test_cycle_is_reported_with_its_operations() {
    let mut r = Registry::new();
    r.add_table(Table::new("T", vec!["A".into()]), None);
    r.add_column(col("T", "X"), calc(&["Y"]));
    r.add_column(col("T", "Y"), calc(&["X"]));
    r.add_column(col("T", "Z"), calc(&["A"]));
    match Topology::build(&mut r, &EngineConfig::default()) {
        Err(FlowError::Cycle { operations, .. }) => {
            assert_eq!(operations, vec!["T.X (calculate)".to_string(), "T.Y (calculate)".to_string()]);
        }
        other => panic!("expected a cycle, got {:?}", other.map(|t| t.layers)),
    }
}

#[test]
fn test_translate_twice_is_stable() {
    let mut r = chain();
    r.add_column(col("Facts", "X"), calc(&["Link::SuperLink::C"]));
    let first = Topology::build(&mut r, &EngineConfig::default()).unwrap();
    let count = r.operation_count();
    let second = Topology::build(&mut r, &EngineConfig::default()).unwrap();
    assert_eq!(r.operation_count(), count);
    assert_eq!(first.describe(&r), second.describe(&r));
    assert_eq!(first.synthesized.len(), second.synthesized.len());
}

#[test]
fn test_path_longer_than_limit() {
    let mut r = chain();
    r.add_column(col("Facts", "X"), calc(&["Link::SuperLink::C"]));
    let config = EngineConfig { max_path_depth: 2, ..EngineConfig::default() };
    let err = Topology::build(&mut r, &config).unwrap_err();
    assert_eq!(err.code_str(), "path_too_long");
}

#[test]
fn test_merge_must_start_at_link() {
    let mut r = chain();
    r.add_column(col("Facts", "X"), calc(&["M::B"]));
    let err = Topology::build(&mut r, &EngineConfig::default()).unwrap_err();
    assert_eq!(err.code_str(), "merge_path");
}

#[test]
fn test_unknown_input_fails_translate() {
    let mut r = chain();
    r.add_column(col("Facts", "X"), calc(&["Nope"]));
    let err = Topology::build(&mut r, &EngineConfig::default()).unwrap_err();
    assert!(err.is_structural());
    assert_eq!(err.code_str(), "column_not_found");
}

#[test]
fn test_build_resets_produced_tables() {
    let mut r = Registry::new();
    r.add_table(Table::new("Src", vec!["A".into()]), None);
    r.add_table(Table::new("Big", vec!["super".into()]), Some(TableOp::Filter { base: "Src".into(), column: "A".into() }));
    r.get_table_mut("Src").unwrap().store.add(polars::df!("A" => [true, false]).unwrap()).unwrap();
    r.get_table_mut("Big").unwrap().store.add(polars::df!("super" => [0u64]).unwrap()).unwrap();
    Topology::build(&mut r, &EngineConfig::default()).unwrap();
    assert_eq!(r.get_table("Src").unwrap().store.len(), 2);
    assert_eq!(r.get_table("Big").unwrap().store.len(), 0);
}

#[test]
fn test_augment_twice_adds_nothing() {
    let mut r = chain();
    r.add_column(col("Facts", "X"), calc(&["Link::SuperLink::C", "M"]));
    let config = EngineConfig::default();
    let first = augment::augment(&mut r, &config).unwrap();
    assert_eq!(first.len(), 2);
    let count = r.operation_count();
    let second = augment::augment(&mut r, &config).unwrap();
    assert!(second.is_empty());
    assert_eq!(r.operation_count(), count);
}
