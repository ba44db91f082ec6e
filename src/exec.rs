//! Operation execution.
//!
//! `execute` evaluates one operation against the current contents of the
//! registry's stores. Table operations replace the rows of their output table;
//! column operations overwrite one column over an id range of their table.

pub mod column_ops;
pub mod discretize;
pub mod keys;
pub mod table_ops;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FlowError, FlowResult};
use crate::operation::{Definition, Operation};
use crate::schema::Registry;
use crate::scripts::FunctionRegistry;

use self::keys::GroupIndex;

/// State that lives for one run of a workflow.
pub struct RunContext<'a> {
    pub functions: &'a FunctionRegistry,
    pub incremental: bool,
    groups: HashMap<(String, String), Arc<GroupIndex>>,
}

impl<'a> RunContext<'a> {
    pub fn new(functions: &'a FunctionRegistry, incremental: bool) -> Self {
        Self { functions, incremental, groups: HashMap::new() }
    }

    /// Group index of `column` over the live rows of `table`, built once per run.
    pub fn group_index(&mut self, registry: &Registry, table: &str, column: &str) -> FlowResult<Arc<GroupIndex>> {
        let key = (table.to_string(), column.to_string());
        if let Some(idx) = self.groups.get(&key) {
            return Ok(idx.clone());
        }
        let t = registry.require_table(table)?;
        require_columns(t, &[column])?;
        let series = t.store.column_values(column)?;
        let idx = Arc::new(GroupIndex::build(&series)?);
        tracing::debug!(target: "colflow::exec", "group_index: built table='{}' column='{}' groups={}", table, column, idx.len());
        self.groups.insert(key, idx.clone());
        Ok(idx)
    }

    pub fn cached_groups(&self) -> usize { self.groups.len() }
}

/// Data error when any of `columns` is not physically present in the table.
pub(crate) fn require_columns<S: AsRef<str>>(table: &crate::schema::Table, columns: &[S]) -> FlowResult<()> {
    let missing = table.store.missing_columns(columns);
    if missing.is_empty() { return Ok(()); }
    Err(FlowError::data(
        "missing_input".to_string(),
        format!("table '{}' has no data for column(s): {}", table.name, missing.join(", ")),
    ))
}

pub fn execute(op: &Operation, registry: &mut Registry, ctx: &mut RunContext) -> FlowResult<()> {
    match &op.definition {
        Definition::Table { output, op: top } => table_ops::evaluate(output, top, registry, ctx),
        Definition::Column { table, output, op: cop } => column_ops::evaluate(table, output, cop, registry, ctx),
    }
}
