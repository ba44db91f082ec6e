//! Column-producing kernels.
//!
//! Map-like kernels (compute, calculate, link, merge, discretize) evaluate the
//! added rows in incremental mode and all live rows otherwise. Roll and
//! aggregate always evaluate all live rows.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use polars::prelude::*;
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::exec::discretize::{DiscretizeModel, Label, LabelValue};
use crate::exec::keys::{gather, row_keys, GroupIndex, GroupKey};
use crate::exec::{require_columns, RunContext};
use crate::ident;
use crate::operation::{ColumnOp, FunctionRef, Model};
use crate::schema::Registry;
use crate::scripts::Callable;
use crate::storage::RowId;

pub fn evaluate(table: &str, output: &str, op: &ColumnOp, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    match op {
        ColumnOp::Compute { function, inputs, model } => compute(table, output, function, inputs, model, registry, ctx),
        ColumnOp::Calculate { function, inputs, model } => calculate(table, output, function, inputs, model, registry, ctx),
        ColumnOp::Link { keys, linked_keys } => link(table, output, keys, linked_keys, registry, ctx),
        ColumnOp::Merge { path } => merge(table, output, path, registry, ctx),
        ColumnOp::Roll { window, group, function, inputs, model } => {
            roll(table, output, *window, group.as_deref(), function, inputs, model, registry, ctx)
        }
        ColumnOp::Aggregate { fact_table, link, function, inputs, model, fill } => {
            aggregate(table, output, fact_table, link, function, inputs, model, *fill, registry, ctx)
        }
        ColumnOp::Discretize { input, model } => discretize(table, output, input, model, registry, ctx),
    }
}

/// Rows a map-like kernel evaluates.
fn eval_range(registry: &Registry, table: &str, ctx: &RunContext) -> FlowResult<Range<RowId>> {
    let t = registry.require_table(table)?;
    Ok(if ctx.incremental { t.store.live_added_range() } else { t.store.valid_range() })
}

/// Rows a kernel holding row ids of `target` evaluates. Once the target has
/// added or removed rows this run, ids stored for older rows may be stale or
/// newly matchable, so every live row is evaluated again.
fn eval_range_into(registry: &Registry, table: &str, target: &str, ctx: &RunContext) -> FlowResult<Range<RowId>> {
    let target_store = &registry.require_table(target)?.store;
    if ctx.incremental && (target_store.added_length() > 0 || target_store.removed_length() > 0) {
        debug!(target: "colflow::exec", "'{}' changed: re-evaluating all rows of '{}'", target, table);
        return Ok(registry.require_table(table)?.store.valid_range());
    }
    eval_range(registry, table, ctx)
}

fn write(registry: &mut Registry, table: &str, output: &str, values: Series, range: &Range<RowId>, default: Option<AnyValue<'static>>) -> FlowResult<()> {
    let update = DataFrame::new(vec![values.with_name(output.into()).into()])?;
    registry.require_table_mut(table)?.store.set_range(&update, range, default.as_ref())?;
    debug!(target: "colflow::exec", "column '{}.{}': wrote ids {:?}", table, output, range);
    Ok(())
}

fn check_len(table: &str, output: &str, got: usize, expected: usize) -> FlowResult<()> {
    if got == expected { return Ok(()); }
    Err(FlowError::exec(
        "udf_output_length".to_string(),
        format!("function for '{}.{}' returned {} values for {} rows", table, output, got, expected),
    ))
}

fn resolve_accumulating(ctx: &RunContext, function: &FunctionRef, table: &str, output: &str) -> FlowResult<Callable> {
    let callable = ctx.functions.resolve(function)?;
    if callable.is_row() {
        return Err(FlowError::unimplemented(
            "accumulate".to_string(),
            format!("'{}.{}': row-at-a-time accumulation is not supported, use a group function", table, output),
        ));
    }
    Ok(callable)
}

fn compute(table: &str, output: &str, function: &FunctionRef, inputs: &[String], model: &Model, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    let range = eval_range(registry, table, ctx)?;
    if range.is_empty() { return Ok(()); }
    let callable = ctx.functions.resolve(function)?;
    let t = registry.require_table(table)?;
    require_columns(t, inputs)?;
    let frame = t.store.slice(&range, inputs)?;
    let out = callable.call_column(&frame, model)?;
    check_len(table, output, out.len(), frame.height())?;
    write(registry, table, output, out, &range, None)
}

fn calculate(table: &str, output: &str, function: &FunctionRef, inputs: &[String], model: &Model, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    let range = eval_range(registry, table, ctx)?;
    if range.is_empty() { return Ok(()); }
    let callable = ctx.functions.resolve(function)?;
    let t = registry.require_table(table)?;
    require_columns(t, inputs)?;
    let frame = t.store.slice(&range, inputs)?;
    let cols: Vec<&Column> = inputs.iter().map(|c| frame.column(c)).collect::<PolarsResult<_>>()?;
    let height = (range.end - range.start) as usize;
    let mut vals: Vec<AnyValue<'static>> = Vec::with_capacity(height);
    let mut row: Vec<AnyValue> = Vec::with_capacity(cols.len());
    for i in 0..height {
        row.clear();
        for c in cols.iter() { row.push(c.get(i)?); }
        vals.push(callable.call_row(&row, model)?);
    }
    let out = Series::from_any_values(output.into(), &vals, false)?;
    write(registry, table, output, out, &range, None)
}

fn link(table: &str, output: &str, keys: &[String], linked_keys: &[String], registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    let target = registry.get_column(table, output).and_then(|c| c.target_table.clone()).ok_or_else(|| {
        FlowError::config("link_target".to_string(), format!("link column '{}.{}' has no target table", table, output))
    })?;
    let target_t = registry.require_table(&target)?;
    let linked: Vec<String> = if linked_keys.is_empty() { target_t.attributes.clone() } else { linked_keys.to_vec() };
    if keys.len() != linked.len() || keys.is_empty() {
        return Err(FlowError::config(
            "link_keys".to_string(),
            format!("link '{}.{}' matches {} key(s) against {} target key(s)", table, output, keys.len(), linked.len()),
        ));
    }
    require_columns(target_t, &linked)?;
    let target_start = target_t.store.valid_range().start;
    let target_frame = target_t.store.full_slice(&linked)?;
    let mut index: HashMap<Vec<GroupKey>, u64> = HashMap::new();
    for (i, key) in row_keys(&target_frame, &linked)?.into_iter().enumerate() {
        if key.iter().any(|k| k.is_null()) { continue; }
        // first matching target row wins
        index.entry(key).or_insert(target_start + i as u64);
    }

    let range = eval_range_into(registry, table, &target, ctx)?;
    if range.is_empty() { return Ok(()); }
    let t = registry.require_table(table)?;
    require_columns(t, keys)?;
    let frame = t.store.slice(&range, keys)?;
    let ids: Vec<Option<u64>> = row_keys(&frame, keys)?.iter().map(|k| index.get(k).copied()).collect();
    write(registry, table, output, Series::new(output.into(), ids), &range, None)
}

fn merge(table: &str, output: &str, path: &[String], registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    let (Some(link), Some(tail)) = (path.first(), ident::path_tail(path)) else {
        return Err(FlowError::config(
            "merge_path".to_string(),
            format!("merge '{}.{}' needs a path of at least two segments, got {:?}", table, output, path),
        ));
    };
    let target = registry.link_target(table, link).ok_or_else(|| {
        FlowError::config("merge_link".to_string(), format!("'{}.{}' is not a link column", table, link))
    })?;
    let range = eval_range_into(registry, table, &target, ctx)?;
    if range.is_empty() { return Ok(()); }
    let out = {
        let t = registry.require_table(table)?;
        require_columns(t, &[link])?;
        let target_t = registry.require_table(&target)?;
        require_columns(target_t, &[tail.as_str()])?;
        let ids = t.store.slice(&range, &[link])?.column(link)?.cast(&DataType::UInt64)?;
        let mut vals: Vec<AnyValue> = Vec::with_capacity(ids.len());
        for id in ids.u64()?.into_iter() {
            vals.push(match id {
                Some(id) => target_t.store.value(&tail, id)?,
                None => AnyValue::Null,
            });
        }
        Series::from_any_values(output.into(), &vals, false)?
    };
    write(registry, table, output, out, &range, None)
}

#[allow(clippy::too_many_arguments)]
fn roll(table: &str, output: &str, window: usize, group: Option<&str>, function: &FunctionRef, inputs: &[String], model: &Model, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    if window == 0 {
        return Err(FlowError::config("roll_window".to_string(), format!("roll '{}.{}' needs a positive window", table, output)));
    }
    let callable = resolve_accumulating(ctx, function, table, output)?;
    let t = registry.require_table(table)?;
    require_columns(t, inputs)?;
    let range = t.store.valid_range();
    if range.is_empty() { return Ok(()); }
    let frame = t.store.full_slice(inputs)?;
    let height = frame.height();
    let groups = match group {
        Some(g) => ctx.group_index(registry, table, g)?,
        None => Arc::new(GroupIndex::single(height)),
    };
    let mut vals: Vec<AnyValue<'static>> = vec![AnyValue::Null; height];
    for (_, rows) in groups.iter() {
        for k in (window - 1)..rows.len() {
            let members = &rows[k + 1 - window..=k];
            let win = if group.is_none() {
                frame.slice(members[0] as i64, window)
            } else {
                gather(&frame, members)?
            };
            vals[rows[k]] = callable.call_group(&win, model)?;
        }
    }
    let out = Series::from_any_values(output.into(), &vals, false)?;
    write(registry, table, output, out, &range, None)
}

#[allow(clippy::too_many_arguments)]
fn aggregate(table: &str, output: &str, fact_table: &str, link: &str, function: &FunctionRef, inputs: &[String], model: &Model, fill: Option<f64>, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    match registry.link_target(fact_table, link) {
        Some(target) if target == table => {}
        other => {
            return Err(FlowError::config(
                "aggregate_link".to_string(),
                format!("'{}.{}' must link to '{}', links to {:?}", fact_table, link, table, other),
            ));
        }
    }
    let callable = if inputs.is_empty() { None } else { Some(resolve_accumulating(ctx, function, table, output)?) };
    let fact = registry.require_table(fact_table)?;
    require_columns(fact, &[link])?;
    require_columns(fact, inputs)?;
    let groups = ctx.group_index(registry, fact_table, link)?;
    let measures = if inputs.is_empty() { None } else { Some(fact.store.full_slice(inputs)?) };

    let range = registry.require_table(table)?.store.valid_range();
    let mut vals: Vec<AnyValue<'static>> = Vec::with_capacity((range.end - range.start) as usize);
    for id in range.clone() {
        let v = match groups.get(&GroupKey::Int(id as i128)) {
            None => AnyValue::Null,
            Some(rows) => match (&callable, &measures) {
                (Some(f), Some(m)) => f.call_group(&gather(m, rows)?, model)?,
                _ => AnyValue::UInt64(rows.len() as u64),
            },
        };
        vals.push(v);
    }
    let out = Series::from_any_values(output.into(), &vals, false)?;
    write(registry, table, output, out, &range, fill.map(AnyValue::Float64))
}

fn discretize(table: &str, output: &str, input: &str, model: &DiscretizeModel, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    if !model.is_valid() {
        return Err(FlowError::config(
            "discretize_model".to_string(),
            format!("discretize '{}.{}' needs a positive finite step, got {}", table, output, model.step),
        ));
    }
    let range = eval_range(registry, table, ctx)?;
    if range.is_empty() { return Ok(()); }
    let t = registry.require_table(table)?;
    require_columns(t, &[input])?;
    let values = t.store.slice(&range, &[input])?.column(input)?.cast(&DataType::Float64)?;
    let labels: Vec<Option<Label>> = values.f64()?.into_iter().map(|v| v.and_then(|v| model.assign(v))).collect();
    let out = match model.label_value {
        LabelValue::Interval => {
            let ns: Vec<Option<i64>> = labels.iter().map(|l| match l { Some(Label::Interval(n)) => Some(*n), _ => None }).collect();
            Series::new(output.into(), ns)
        }
        LabelValue::Border => {
            let bs: Vec<Option<f64>> = labels.iter().map(|l| match l { Some(Label::Border(b)) => Some(*b), _ => None }).collect();
            Series::new(output.into(), bs)
        }
    };
    write(registry, table, output, out, &range, None)
}
