//! Operation definitions.
//!
//! An operation produces either a whole table (`TableOp`) or one column of an
//! existing table (`ColumnOp`). Each kind carries only the parameters it needs;
//! dispatch everywhere is exhaustive matching on these enums.

use std::fmt;

use crate::exec::discretize::DiscretizeModel;
use crate::scripts::Udf;

/// Arguments handed to a function together with its data: `null` means none,
/// an array is positional, an object is keyword, anything else is one opaque value.
pub type Model = serde_json::Value;

/// Stable identity of an operation inside one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// How a user function is referenced by a definition.
#[derive(Clone)]
pub enum FunctionRef {
    /// Looked up in the workflow's function registry.
    Named(String),
    /// Inline Lua source evaluating to a function, e.g. `function(a) return a + 1 end`.
    Lua(String),
    /// A closure handed over directly.
    Native(Udf),
}

impl FunctionRef {
    pub fn describe(&self) -> String {
        match self {
            FunctionRef::Named(n) => n.clone(),
            FunctionRef::Lua(_) => "<lua>".to_string(),
            FunctionRef::Native(u) => format!("<native {}>", u.shape()),
        }
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.describe()) }
}

impl From<&str> for FunctionRef {
    fn from(s: &str) -> Self {
        if s.trim_start().starts_with("function") { FunctionRef::Lua(s.to_string()) } else { FunctionRef::Named(s.to_string()) }
    }
}

impl From<String> for FunctionRef {
    fn from(s: String) -> Self { FunctionRef::from(s.as_str()) }
}

impl From<Udf> for FunctionRef {
    fn from(u: Udf) -> Self { FunctionRef::Native(u) }
}

#[derive(Debug, Clone)]
pub enum TableOp {
    /// Rows come from a function of zero or more input tables.
    Populate { function: FunctionRef, tables: Vec<String>, model: Model },
    /// Cartesian product of the input tables' row ids; attribute i holds ids of table i.
    Product { tables: Vec<String> },
    /// Subset of `base` rows where the boolean `column` is true; the single attribute holds base row ids.
    Filter { base: String, column: String },
    /// Distinct key combinations of the link column `link` declared on `source`.
    Project { source: String, link: String },
}

#[derive(Debug, Clone)]
pub enum ColumnOp {
    /// Whole-column function over the input columns.
    Compute { function: FunctionRef, inputs: Vec<String>, model: Model },
    /// Row-wise function over the input columns.
    Calculate { function: FunctionRef, inputs: Vec<String>, model: Model },
    /// Row ids of the target table matched on `keys` = `linked_keys` (target attributes when empty).
    Link { keys: Vec<String>, linked_keys: Vec<String> },
    /// Value reached by following the link columns of `path`.
    Merge { path: Vec<String> },
    /// Fixed-width row window ending at the current row, optionally within groups.
    Roll { window: usize, group: Option<String>, function: FunctionRef, inputs: Vec<String>, model: Model },
    /// Reduction of fact rows grouped by the fact table's link column to this table.
    Aggregate { fact_table: String, link: String, function: FunctionRef, inputs: Vec<String>, model: Model, fill: Option<f64> },
    /// Interval number (or border) of a numeric input.
    Discretize { input: String, model: DiscretizeModel },
}

#[derive(Debug, Clone)]
pub enum Definition {
    Table { output: String, op: TableOp },
    Column { table: String, output: String, op: ColumnOp },
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OpId,
    pub definition: Definition,
    /// Inserted by augmentation rather than declared.
    pub synthesized: bool,
}

impl Operation {
    pub fn kind_name(&self) -> &'static str {
        match &self.definition {
            Definition::Table { op, .. } => match op {
                TableOp::Populate { .. } => "populate",
                TableOp::Product { .. } => "product",
                TableOp::Filter { .. } => "filter",
                TableOp::Project { .. } => "project",
            },
            Definition::Column { op, .. } => match op {
                ColumnOp::Compute { .. } => "compute",
                ColumnOp::Calculate { .. } => "calculate",
                ColumnOp::Link { .. } => "link",
                ColumnOp::Merge { .. } => "merge",
                ColumnOp::Roll { .. } => "roll",
                ColumnOp::Aggregate { .. } => "aggregate",
                ColumnOp::Discretize { .. } => "discretize",
            },
        }
    }

    /// The table this operation writes into.
    pub fn output_table(&self) -> &str {
        match &self.definition {
            Definition::Table { output, .. } => output,
            Definition::Column { table, .. } => table,
        }
    }

    pub fn output_column(&self) -> Option<&str> {
        match &self.definition {
            Definition::Table { .. } => None,
            Definition::Column { output, .. } => Some(output),
        }
    }

    pub fn is_table_op(&self) -> bool { matches!(self.definition, Definition::Table { .. }) }

    /// Short label used in logs and cycle reports, e.g. `Groups.Count (aggregate)`.
    pub fn label(&self) -> String {
        match &self.definition {
            Definition::Table { output, .. } => format!("{} ({})", output, self.kind_name()),
            Definition::Column { table, output, .. } => format!("{}.{} ({})", table, output, self.kind_name()),
        }
    }
}
