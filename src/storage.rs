//!
//! colflow storage module
//! ----------------------
//! In-memory incremental store backing one table. Rows carry contiguous,
//! never-reused integer ids; physical row `i` of the frame has id
//! `physical_start + i`. Three cursors form two half-open ranges:
//!
//! - `removed`: rows logically deleted since the last change-status clear,
//! - `added`: rows appended since the last change-status clear,
//!
//! and the live rows are `removed.end..added.end`. Removal is always from the
//! low end; `gc` physically drops rows whose removal has been acknowledged.
//!
//! Column values live in a polars `DataFrame`. Operations write a column back
//! into an id range with [`TableStore::set_range`], which leaves values outside
//! the range untouched.

use std::ops::Range;

use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

pub type RowId = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot remove {requested} rows: only {live} rows are live")]
    RemoveBeyondLive { requested: u64, live: u64 },
    #[error("update column '{column}' has {got} rows but range {start}..{end} spans {expected}")]
    LengthMismatch { column: String, got: usize, expected: usize, start: RowId, end: RowId },
    #[error("range {start}..{end} is outside the stored rows {first}..{last}")]
    OutOfRange { start: RowId, end: RowId, first: RowId, last: RowId },
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct TableStore {
    frame: DataFrame,
    physical_start: RowId,
    removed: Range<RowId>,
    added: Range<RowId>,
}

impl Default for TableStore {
    fn default() -> Self { Self::new() }
}

impl TableStore {
    pub fn new() -> Self {
        Self { frame: DataFrame::empty(), physical_start: 0, removed: 0..0, added: 0..0 }
    }

    /// Physical frame including removed rows not yet garbage collected.
    pub fn frame(&self) -> &DataFrame { &self.frame }

    pub fn physical_start(&self) -> RowId { self.physical_start }

    pub fn valid_range(&self) -> Range<RowId> { self.removed.end..self.added.end }

    pub fn added_range(&self) -> Range<RowId> { self.added.clone() }

    pub fn removed_range(&self) -> Range<RowId> { self.removed.clone() }

    /// Added rows that are still live.
    pub fn live_added_range(&self) -> Range<RowId> {
        self.added.start.max(self.removed.end)..self.added.end
    }

    pub fn added_length(&self) -> u64 { self.added.end - self.added.start }

    pub fn removed_length(&self) -> u64 { self.removed.end - self.removed.start }

    /// Number of live rows.
    pub fn len(&self) -> usize { (self.added.end - self.removed.end) as usize }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Id the next appended row will receive.
    pub fn next_id(&self) -> RowId { self.added.end }

    pub fn column_names(&self) -> Vec<String> {
        self.frame.get_column_names().iter().map(|c| c.to_string()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_names().iter().any(|c| c.as_str() == name)
    }

    /// Names from `columns` that have no physical column.
    pub fn missing_columns<S: AsRef<str>>(&self, columns: &[S]) -> Vec<String> {
        columns.iter().map(|c| c.as_ref()).filter(|c| !self.has_column(c)).map(|c| c.to_string()).collect()
    }

    /// Append rows at the end of the id space and return the id of the first one.
    /// Columns present on only one side are null-filled on the other.
    pub fn add(&mut self, rows: DataFrame) -> StoreResult<RowId> {
        let start = self.added.end;
        let count = rows.height() as u64;
        if self.frame.width() == 0 && self.frame.height() == 0 {
            self.frame = rows;
        } else {
            let aligned = self.align_incoming(rows)?;
            self.frame.vstack_mut(&aligned)?;
        }
        self.added.end += count;
        debug!(target: "colflow::storage", "add: rows={} first_id={} added={:?}", count, start, self.added);
        Ok(start)
    }

    fn align_incoming(&mut self, mut rows: DataFrame) -> StoreResult<DataFrame> {
        let height = self.frame.height();
        let incoming_height = rows.height();
        let existing: Vec<(PlSmallStr, DataType)> = self.frame.get_columns().iter()
            .map(|c| (c.name().clone(), c.dtype().clone()))
            .collect();
        for (name, dtype) in existing.iter() {
            match rows.column(name.as_str()) {
                Ok(col) => {
                    if col.dtype() != dtype {
                        let cast = col.cast(dtype)?;
                        rows.with_column(cast)?;
                    }
                }
                Err(_) => {
                    let s = Series::new_null(name.clone(), incoming_height).cast(dtype)?;
                    rows.with_column(s)?;
                }
            }
        }
        let extra: Vec<(PlSmallStr, DataType)> = rows.get_columns().iter()
            .filter(|c| !existing.iter().any(|(n, _)| n == c.name()))
            .map(|c| (c.name().clone(), c.dtype().clone()))
            .collect();
        for (name, dtype) in extra.iter() {
            let s = Series::new_null(name.clone(), height).cast(dtype)?;
            self.frame.with_column(s)?;
        }
        let order: Vec<PlSmallStr> = self.frame.get_column_names().into_iter().cloned().collect();
        Ok(rows.select(order)?)
    }

    /// Logically delete the `count` oldest live rows.
    pub fn remove(&mut self, count: u64) -> StoreResult<()> {
        let live = self.len() as u64;
        if count > live {
            return Err(StoreError::RemoveBeyondLive { requested: count, live });
        }
        self.removed.end += count;
        debug!(target: "colflow::storage", "remove: rows={} removed={:?}", count, self.removed);
        Ok(())
    }

    pub fn remove_all(&mut self) {
        self.removed.end = self.added.end;
        debug!(target: "colflow::storage", "remove_all: removed={:?}", self.removed);
    }

    /// Acknowledge all changes: both ranges collapse to empty ranges at their ends.
    pub fn clear_change_status(&mut self) {
        self.added.start = self.added.end;
        self.removed.start = self.removed.end;
    }

    /// Physically drop rows below `removed.start`.
    pub fn gc(&mut self) {
        let drop = (self.removed.start - self.physical_start) as usize;
        if drop == 0 { return; }
        let keep = self.frame.height().saturating_sub(drop);
        self.frame = self.frame.slice(drop as i64, keep);
        self.physical_start = self.removed.start;
        debug!(target: "colflow::storage", "gc: dropped={} physical_start={}", drop, self.physical_start);
    }

    /// Frame position of a live row id.
    pub fn position(&self, id: RowId) -> Option<usize> {
        if self.valid_range().contains(&id) { Some((id - self.physical_start) as usize) } else { None }
    }

    fn check_stored(&self, range: &Range<RowId>) -> StoreResult<()> {
        if range.start > range.end || range.start < self.physical_start || range.end > self.added.end {
            return Err(StoreError::OutOfRange { start: range.start, end: range.end, first: self.physical_start, last: self.added.end });
        }
        Ok(())
    }

    /// Rows of `range`, restricted to `columns` (all columns when empty).
    pub fn slice<S: AsRef<str>>(&self, range: &Range<RowId>, columns: &[S]) -> StoreResult<DataFrame> {
        self.check_stored(range)?;
        let offset = (range.start - self.physical_start) as i64;
        let len = (range.end - range.start) as usize;
        let df = if columns.is_empty() {
            self.frame.clone()
        } else {
            self.frame.select(columns.iter().map(|c| c.as_ref()))?
        };
        Ok(df.slice(offset, len))
    }

    /// All live rows.
    pub fn full_slice<S: AsRef<str>>(&self, columns: &[S]) -> StoreResult<DataFrame> {
        self.slice(&self.valid_range(), columns)
    }

    /// Live rows added since the last change-status clear.
    pub fn added_slice<S: AsRef<str>>(&self, columns: &[S]) -> StoreResult<DataFrame> {
        self.slice(&self.live_added_range(), columns)
    }

    /// One column over all live rows.
    pub fn column_values(&self, name: &str) -> StoreResult<Series> {
        let df = self.full_slice(&[name])?;
        Ok(df.column(name)?.as_materialized_series().clone())
    }

    /// Value of `column` at row `id`, null when the id is not live.
    pub fn value(&self, column: &str, id: RowId) -> StoreResult<AnyValue<'_>> {
        match self.position(id) {
            Some(pos) => Ok(self.frame.column(column)?.get(pos)?),
            None => Ok(AnyValue::Null),
        }
    }

    /// Overwrite each column of `update` over `range`. Missing values in the
    /// update take `default` (or stay null). Columns not yet stored are created
    /// null outside the range.
    pub fn set_range(&mut self, update: &DataFrame, range: &Range<RowId>, default: Option<&AnyValue<'static>>) -> StoreResult<()> {
        self.check_stored(range)?;
        let expected = (range.end - range.start) as usize;
        let offset = (range.start - self.physical_start) as usize;
        let height = self.frame.height();
        for col in update.get_columns() {
            let name = col.name().clone();
            let incoming = col.as_materialized_series();
            if incoming.len() != expected {
                return Err(StoreError::LengthMismatch { column: name.to_string(), got: incoming.len(), expected, start: range.start, end: range.end });
            }
            let existing = self.frame.column(name.as_str()).ok().map(|c| c.as_materialized_series().clone());
            let dtype = match incoming.dtype() {
                DataType::Null => default.map(|d| d.dtype())
                    .or_else(|| existing.as_ref().map(|s| s.dtype().clone()))
                    .unwrap_or(DataType::Null),
                dt => dt.clone(),
            };
            let middle = match default {
                Some(d) if incoming.null_count() > 0 => {
                    let mut vals: Vec<AnyValue> = Vec::with_capacity(expected);
                    for i in 0..expected {
                        let v = incoming.get(i)?;
                        vals.push(if v.is_null() { d.clone() } else { v });
                    }
                    Series::from_any_values_and_dtype(name.clone(), &vals, &dtype, false)?
                }
                _ => incoming.cast(&dtype)?.with_name(name.clone()),
            };
            let base = match existing {
                Some(s) => s.cast(&dtype)?,
                None => Series::full_null(name.clone(), height, &dtype),
            };
            let mut out = base.slice(0, offset);
            out.append(&middle)?;
            out.append(&base.slice((offset + expected) as i64, height - offset - expected))?;
            self.frame.with_column(out)?;
        }
        Ok(())
    }

    /// Physical snapshot of the cursors, handy in logs and tests.
    pub fn cursors(&self) -> (RowId, Range<RowId>, Range<RowId>) {
        (self.physical_start, self.removed.clone(), self.added.clone())
    }
}
