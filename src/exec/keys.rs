//! Hashable row keys and group indexes used by link, project, roll and aggregate.

use std::collections::HashMap;

use polars::prelude::*;

/// Normalized cell value usable as a hash key. Integers of any width compare
/// equal, and floats with no fractional part compare equal to integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Null,
    Bool(bool),
    Int(i128),
    Float(u64),
    Str(String),
}

impl GroupKey {
    pub fn from_any(v: &AnyValue<'_>) -> Self {
        match v {
            AnyValue::Null => GroupKey::Null,
            AnyValue::Boolean(b) => GroupKey::Bool(*b),
            AnyValue::Int8(i) => GroupKey::Int(*i as i128),
            AnyValue::Int16(i) => GroupKey::Int(*i as i128),
            AnyValue::Int32(i) => GroupKey::Int(*i as i128),
            AnyValue::Int64(i) => GroupKey::Int(*i as i128),
            AnyValue::UInt8(i) => GroupKey::Int(*i as i128),
            AnyValue::UInt16(i) => GroupKey::Int(*i as i128),
            AnyValue::UInt32(i) => GroupKey::Int(*i as i128),
            AnyValue::UInt64(i) => GroupKey::Int(*i as i128),
            AnyValue::Float32(f) => Self::from_float(*f as f64),
            AnyValue::Float64(f) => Self::from_float(*f),
            AnyValue::String(s) => GroupKey::Str(s.to_string()),
            AnyValue::StringOwned(s) => GroupKey::Str(s.to_string()),
            other => GroupKey::Str(other.to_string()),
        }
    }

    fn from_float(f: f64) -> Self {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e30 {
            GroupKey::Int(f as i128)
        } else if f.is_nan() {
            GroupKey::Null
        } else {
            // -0.0 and 0.0 are integral and handled above
            GroupKey::Float(f.to_bits())
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, GroupKey::Null) }
}

/// Composite key of each row over `columns`.
pub fn row_keys<S: AsRef<str>>(frame: &DataFrame, columns: &[S]) -> PolarsResult<Vec<Vec<GroupKey>>> {
    let cols: Vec<&Column> = columns.iter().map(|c| frame.column(c.as_ref())).collect::<PolarsResult<_>>()?;
    let mut out = Vec::with_capacity(frame.height());
    for i in 0..frame.height() {
        let mut key = Vec::with_capacity(cols.len());
        for c in cols.iter() {
            key.push(GroupKey::from_any(&c.get(i)?));
        }
        out.push(key);
    }
    Ok(out)
}

/// Row positions of each distinct value of one column. Positions within a
/// group keep the order of the rows they came from; groups keep first-seen order.
#[derive(Debug, Clone, Default)]
pub struct GroupIndex {
    groups: HashMap<GroupKey, Vec<usize>>,
    order: Vec<GroupKey>,
}

impl GroupIndex {
    pub fn build(series: &Series) -> PolarsResult<Self> {
        let mut idx = GroupIndex::default();
        for i in 0..series.len() {
            let key = GroupKey::from_any(&series.get(i)?);
            if key.is_null() { continue; }
            match idx.groups.get_mut(&key) {
                Some(rows) => rows.push(i),
                None => {
                    idx.order.push(key.clone());
                    idx.groups.insert(key, vec![i]);
                }
            }
        }
        Ok(idx)
    }

    /// One group holding every row.
    pub fn single(len: usize) -> Self {
        let key = GroupKey::Int(0);
        let mut groups = HashMap::new();
        groups.insert(key.clone(), (0..len).collect());
        GroupIndex { groups, order: vec![key] }
    }

    pub fn get(&self, key: &GroupKey) -> Option<&[usize]> { self.groups.get(key).map(|v| v.as_slice()) }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &[usize])> {
        self.order.iter().filter_map(|k| self.groups.get(k).map(|v| (k, v.as_slice())))
    }
}

/// Rows of `frame` at `positions`, in the given order.
pub fn gather(frame: &DataFrame, positions: &[usize]) -> PolarsResult<DataFrame> {
    let idx: Vec<IdxSize> = positions.iter().map(|p| *p as IdxSize).collect();
    frame.take(&IdxCa::from_vec("rows".into(), idx))
}
