//! Table-producing kernels: populate, product, filter, project.

use std::collections::HashSet;
use std::ops::Range;

use polars::prelude::*;
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::exec::keys::{gather, row_keys};
use crate::exec::{require_columns, RunContext};
use crate::operation::{ColumnOp, Definition, FunctionRef, Model, TableOp};
use crate::schema::Registry;
use crate::storage::RowId;

const ALL_COLUMNS: &[&str] = &[];

/// Replace the rows of `output` with the result of `op`.
pub fn evaluate(output: &str, op: &TableOp, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    let attributes = registry.require_table(output)?.attributes.clone();
    let rows = match op {
        TableOp::Populate { function, tables, model } => populate(&attributes, function, tables, model, registry, ctx)?,
        TableOp::Product { tables } => product(output, &attributes, tables, registry)?,
        TableOp::Filter { base, column } => filter(output, &attributes, base, column, registry)?,
        TableOp::Project { source, link } => project(output, &attributes, source, link, registry)?,
    };
    let height = rows.height();
    let table = registry.require_table_mut(output)?;
    table.store.remove_all();
    let first = table.store.add(rows)?;
    debug!(target: "colflow::exec", "table '{}': {} rows from id {}", output, height, first);
    Ok(())
}

fn populate(attributes: &[String], function: &FunctionRef, tables: &[String], model: &Model, registry: &Registry, ctx: &RunContext) -> FlowResult<DataFrame> {
    let callable = ctx.functions.resolve(function)?;
    let mut inputs = Vec::with_capacity(tables.len());
    for name in tables {
        inputs.push(registry.require_table(name)?.store.full_slice(ALL_COLUMNS)?);
    }
    let df = callable.call_table(&inputs, model)?;
    let missing: Vec<&str> = attributes.iter().map(|a| a.as_str()).filter(|a| df.column(a).is_err()).collect();
    if !missing.is_empty() {
        return Err(FlowError::data(
            "populate_attributes".to_string(),
            format!("declared attribute(s) {} not in the populated data", missing.join(", ")),
        ));
    }
    Ok(df)
}

fn product(output: &str, attributes: &[String], tables: &[String], registry: &Registry) -> FlowResult<DataFrame> {
    if attributes.len() != tables.len() {
        return Err(FlowError::config(
            "product_attributes".to_string(),
            format!("product table '{}' has {} attributes for {} input tables", output, attributes.len(), tables.len()),
        ));
    }
    let mut ranges: Vec<Range<RowId>> = Vec::with_capacity(tables.len());
    for name in tables {
        ranges.push(registry.require_table(name)?.store.valid_range());
    }
    let lens: Vec<u64> = ranges.iter().map(|r| r.end - r.start).collect();
    let Some((total, strides)) = product_layout(&lens) else {
        return Err(FlowError::config(
            "product_size".to_string(),
            format!("product table '{}' of inputs with {:?} rows has too many rows", output, lens),
        ));
    };
    let mut columns: Vec<Column> = Vec::with_capacity(attributes.len());
    for (i, attr) in attributes.iter().enumerate() {
        let stride = strides[i];
        let ids: Vec<u64> = (0..total).map(|r| ranges[i].start + (r / stride) % lens[i]).collect();
        columns.push(Series::new(attr.as_str().into(), ids).into());
    }
    Ok(DataFrame::new(columns)?)
}

/// Total row count of a product of inputs with `lens` rows, and the stride of
/// each input (the first input varies slowest). `None` on overflow.
pub(crate) fn product_layout(lens: &[u64]) -> Option<(u64, Vec<u64>)> {
    if lens.contains(&0) { return Some((0, vec![1; lens.len()])); }
    let mut strides = vec![1u64; lens.len()];
    let mut acc = 1u64;
    for i in (0..lens.len()).rev() {
        strides[i] = acc;
        acc = acc.checked_mul(lens[i])?;
    }
    Some((acc, strides))
}

fn filter(output: &str, attributes: &[String], base: &str, column: &str, registry: &Registry) -> FlowResult<DataFrame> {
    let [attr] = attributes else {
        return Err(FlowError::config(
            "filter_attributes".to_string(),
            format!("filter table '{}' must have exactly one attribute, has {}", output, attributes.len()),
        ));
    };
    let base_t = registry.require_table(base)?;
    require_columns(base_t, &[column])?;
    let start = base_t.store.valid_range().start;
    let mask = base_t.store.column_values(column)?.cast(&DataType::Boolean)?;
    let ids: Vec<u64> = mask.bool()?.into_iter()
        .enumerate()
        .filter_map(|(i, keep)| (keep == Some(true)).then_some(start + i as u64))
        .collect();
    Ok(DataFrame::new(vec![Series::new(attr.as_str().into(), ids).into()])?)
}

/// Key columns of the link `source.link`.
fn link_keys(registry: &Registry, source: &str, link: &str) -> FlowResult<Vec<String>> {
    let ops = registry.get_column_operations(source, link);
    match ops.first().map(|o| &o.definition) {
        Some(Definition::Column { op: ColumnOp::Link { keys, .. }, .. }) => Ok(keys.clone()),
        _ => Err(FlowError::config(
            "project_link".to_string(),
            format!("column '{}.{}' is not produced by a link operation", source, link),
        )),
    }
}

fn project(output: &str, attributes: &[String], source: &str, link: &str, registry: &Registry) -> FlowResult<DataFrame> {
    let keys = link_keys(registry, source, link)?;
    if keys.len() != attributes.len() {
        return Err(FlowError::config(
            "project_attributes".to_string(),
            format!("project table '{}' has {} attributes for {} link keys", output, attributes.len(), keys.len()),
        ));
    }
    let src = registry.require_table(source)?;
    require_columns(src, &keys)?;
    let frame = src.store.full_slice(&keys)?;
    let mut seen = HashSet::new();
    let mut positions = Vec::new();
    for (i, key) in row_keys(&frame, &keys)?.into_iter().enumerate() {
        // a key with a missing part can never be linked back
        if key.iter().any(|k| k.is_null()) { continue; }
        if seen.insert(key) { positions.push(i); }
    }
    let distinct = gather(&frame, &positions)?;
    let mut columns: Vec<Column> = Vec::with_capacity(keys.len());
    for (k, a) in keys.iter().zip(attributes) {
        columns.push(distinct.column(k)?.clone().with_name(a.as_str().into()));
    }
    Ok(DataFrame::new(columns)?)
}
