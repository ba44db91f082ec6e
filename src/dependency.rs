//! What each operation reads.
//!
//! [`declared_dependencies`] reports names (a column name may be a path that no
//! entity carries yet); augmentation uses it to find what must be synthesized.
//! [`dependency_entities`] resolves those names once augmentation is done.

use std::collections::BTreeMap;

use crate::error::{FlowError, FlowResult};
use crate::ident;
use crate::operation::{ColumnOp, Definition, Operation, TableOp};
use crate::schema::{EntityRef, Registry};

/// Table name -> column names read from it. A table listed with no columns is
/// still a dependency on the table's rows.
pub type Declared = BTreeMap<String, Vec<String>>;

fn need(deps: &mut Declared, table: &str, columns: impl IntoIterator<Item = String>) {
    let entry = deps.entry(table.to_string()).or_default();
    for c in columns {
        if !entry.contains(&c) { entry.push(c); }
    }
}

pub fn declared_dependencies(op: &Operation, registry: &Registry) -> Declared {
    let mut deps = Declared::new();
    match &op.definition {
        Definition::Table { op: top, .. } => match top {
            TableOp::Populate { tables, .. } | TableOp::Product { tables } => {
                for t in tables { need(&mut deps, t, []); }
            }
            TableOp::Filter { base, column } => need(&mut deps, base, [column.clone()]),
            TableOp::Project { source, link } => {
                let keys = registry.get_column_operations(source, link).first().and_then(|o| match &o.definition {
                    Definition::Column { op: ColumnOp::Link { keys, .. }, .. } => Some(keys.clone()),
                    _ => None,
                });
                need(&mut deps, source, keys.unwrap_or_default());
            }
        },
        Definition::Column { table, output, op: cop } => {
            need(&mut deps, table, []);
            match cop {
                ColumnOp::Compute { inputs, .. } | ColumnOp::Calculate { inputs, .. } => {
                    need(&mut deps, table, inputs.iter().cloned());
                }
                ColumnOp::Discretize { input, .. } => need(&mut deps, table, [input.clone()]),
                ColumnOp::Link { keys, linked_keys } => {
                    need(&mut deps, table, keys.iter().cloned());
                    if let Some(target) = registry.get_column(table, output).and_then(|c| c.target_table.as_deref()) {
                        let linked = if linked_keys.is_empty() {
                            registry.get_table(target).map(|t| t.attributes.clone()).unwrap_or_default()
                        } else {
                            linked_keys.clone()
                        };
                        need(&mut deps, target, linked);
                    }
                }
                ColumnOp::Merge { path } => {
                    if let Some(first) = path.first() {
                        need(&mut deps, table, [first.clone()]);
                        if let (Some(target), Some(tail)) = (registry.link_target(table, first), ident::path_tail(path)) {
                            need(&mut deps, &target, [tail]);
                        }
                    }
                }
                ColumnOp::Roll { inputs, group, .. } => {
                    need(&mut deps, table, inputs.iter().cloned().chain(group.clone()));
                }
                ColumnOp::Aggregate { fact_table, link, inputs, .. } => {
                    need(&mut deps, fact_table, std::iter::once(link.clone()).chain(inputs.iter().cloned()));
                }
            }
        }
    }
    deps
}

/// Resolved entities the operation depends on. Every table named is included;
/// a column resolves to itself when an operation produces it and to its table
/// when it is an attribute.
pub fn dependency_entities(op: &Operation, registry: &Registry) -> FlowResult<Vec<EntityRef>> {
    let mut out = Vec::new();
    for (table, columns) in declared_dependencies(op, registry) {
        if registry.get_table(&table).is_none() {
            return Err(FlowError::not_found(
                "table_not_found".to_string(),
                format!("table '{}' not found (needed by {})", table, op.label()),
            ));
        }
        for column in columns {
            if !registry.get_column_operations(&table, &column).is_empty() {
                out.push(EntityRef::Column { table: table.clone(), column });
            } else if !registry.has_attribute(&table, &column) {
                return Err(FlowError::not_found(
                    "column_not_found".to_string(),
                    format!("column '{}.{}' not found (needed by {})", table, column, op.label()),
                ));
            }
        }
        out.push(EntityRef::Table(table));
    }
    Ok(out)
}
