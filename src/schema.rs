//! Entity registry.
//!
//! Tables, columns and operations of one workflow live in flat collections and
//! reference each other only by name (tables, columns) or by [`OpId`]
//! (operations). Redefining an entity replaces the previous one together with the
//! operation that produced it.

use std::collections::BTreeMap;

use crate::error::{FlowError, FlowResult};
use crate::operation::{ColumnOp, Definition, OpId, Operation, TableOp};
use crate::storage::TableStore;

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    /// Raw fields with no producing operation.
    pub attributes: Vec<String>,
    pub store: TableStore,
}

impl Table {
    pub fn new(name: impl Into<String>, attributes: Vec<String>) -> Self {
        Self { name: name.into(), attributes, store: TableStore::new() }
    }

    pub fn has_attribute(&self, name: &str) -> bool { self.attributes.iter().any(|a| a == name) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub table: String,
    pub name: String,
    /// Set for link columns: values are row ids of this table.
    pub target_table: Option<String>,
}

/// Something an operation can depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Table(String),
    Column { table: String, column: String },
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Table(t) => write!(f, "{}", t),
            EntityRef::Column { table, column } => write!(f, "{}.{}", table, column),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: Vec<Table>,
    columns: Vec<Column>,
    operations: BTreeMap<OpId, Operation>,
    next_op: u64,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    fn push_operation(&mut self, definition: Definition, synthesized: bool) -> OpId {
        let id = OpId(self.next_op);
        self.next_op += 1;
        self.operations.insert(id, Operation { id, definition, synthesized });
        id
    }

    /// Register a table, replacing any previous table of that name and its producer.
    pub fn add_table(&mut self, table: Table, op: Option<TableOp>) -> Option<OpId> {
        let name = table.name.clone();
        self.tables.retain(|t| t.name != name);
        self.operations.retain(|_, o| !(o.is_table_op() && o.output_table() == name));
        self.tables.push(table);
        op.map(|op| self.push_operation(Definition::Table { output: name, op }, false))
    }

    /// Register a column with its producing operation, replacing any previous definition.
    pub fn add_column(&mut self, column: Column, op: ColumnOp) -> OpId {
        self.insert_column(column, op, false)
    }

    pub(crate) fn insert_column(&mut self, column: Column, op: ColumnOp, synthesized: bool) -> OpId {
        let (table, name) = (column.table.clone(), column.name.clone());
        self.columns.retain(|c| !(c.table == table && c.name == name));
        self.operations.retain(|_, o| !(o.output_table() == table && o.output_column() == Some(name.as_str())));
        self.columns.push(column);
        self.push_operation(Definition::Column { table, output: name, op }, synthesized)
    }

    /// Append an operation without replacing anything. Only tests use this to
    /// build registries that the declaration API cannot produce.
    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, definition: Definition) -> OpId {
        self.push_operation(definition, false)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> { self.tables.iter() }

    pub fn table_names(&self) -> Vec<String> { self.tables.iter().map(|t| t.name.clone()).collect() }

    pub fn get_table(&self, name: &str) -> Option<&Table> { self.tables.iter().find(|t| t.name == name) }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> { self.tables.iter_mut().find(|t| t.name == name) }

    pub fn require_table(&self, name: &str) -> FlowResult<&Table> {
        self.get_table(name).ok_or_else(|| FlowError::not_found("table_not_found", format!("table '{}' not found", name).as_str()))
    }

    pub fn require_table_mut(&mut self, name: &str) -> FlowResult<&mut Table> {
        self.get_table_mut(name).ok_or_else(|| FlowError::not_found("table_not_found", format!("table '{}' not found", name).as_str()))
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> { self.columns.iter() }

    pub fn get_column(&self, table: &str, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.table == table && c.name == name)
    }

    pub fn table_columns(&self, table: &str) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.table == table).collect()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> { self.operations.values() }

    pub fn operation(&self, id: OpId) -> Option<&Operation> { self.operations.get(&id) }

    pub fn operation_count(&self) -> usize { self.operations.len() }

    /// Operations whose output is the whole table `name`.
    pub fn get_table_operations(&self, name: &str) -> Vec<&Operation> {
        self.operations.values().filter(|o| o.is_table_op() && o.output_table() == name).collect()
    }

    /// Operations whose output is column `name` of `table`.
    pub fn get_column_operations(&self, table: &str, name: &str) -> Vec<&Operation> {
        self.operations.values()
            .filter(|o| o.output_table() == table && o.output_column() == Some(name))
            .collect()
    }

    /// The single producer of an entity, if any. More than one is a configuration error.
    pub fn producer(&self, entity: &EntityRef) -> FlowResult<Option<OpId>> {
        let ops = match entity {
            EntityRef::Table(t) => self.get_table_operations(t),
            EntityRef::Column { table, column } => self.get_column_operations(table, column),
        };
        match ops.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(one.id)),
            many => Err(FlowError::config(
                "multiple_producers".to_string(),
                format!("{} is produced by {} operations: {}", entity, many.len(),
                    many.iter().map(|o| o.label()).collect::<Vec<_>>().join(", ")),
            )),
        }
    }

    pub fn has_attribute(&self, table: &str, name: &str) -> bool {
        self.get_table(table).map(|t| t.has_attribute(name)).unwrap_or(false)
    }

    /// True when `name` on `table` is an attribute or has a producing operation.
    pub fn resolves(&self, table: &str, name: &str) -> bool {
        self.has_attribute(table, name) || !self.get_column_operations(table, name).is_empty()
    }

    /// `(attribute, parent table)` pairs through which a filter or product table
    /// inherits columns from the tables it was derived from.
    pub fn parent_links(&self, table: &str) -> FlowResult<Vec<(String, String)>> {
        let Some(t) = self.get_table(table) else { return Ok(Vec::new()) };
        let ops = self.get_table_operations(table);
        let Some(op) = ops.first() else { return Ok(Vec::new()) };
        match &op.definition {
            Definition::Table { op: TableOp::Filter { base, .. }, .. } => {
                if t.attributes.len() != 1 {
                    return Err(FlowError::config("filter_attributes".to_string(),
                        format!("filter table '{}' must have exactly one attribute, has {}", table, t.attributes.len())));
                }
                Ok(vec![(t.attributes[0].clone(), base.clone())])
            }
            Definition::Table { op: TableOp::Product { tables }, .. } => {
                if t.attributes.len() != tables.len() {
                    return Err(FlowError::config("product_attributes".to_string(),
                        format!("product table '{}' has {} attributes for {} input tables", table, t.attributes.len(), tables.len())));
                }
                Ok(t.attributes.iter().cloned().zip(tables.iter().cloned()).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Table whose row ids the column `name` of `table` holds: a declared link
    /// column's target, a filter table's base, or the matching product input.
    pub fn link_target(&self, table: &str, name: &str) -> Option<String> {
        if let Some(target) = self.get_column(table, name).and_then(|c| c.target_table.clone()) {
            return Some(target);
        }
        self.parent_links(table).ok()?
            .into_iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, parent)| parent)
    }

    /// Drop every operation inserted by augmentation, and the columns they produced.
    pub fn remove_synthesized(&mut self) -> usize {
        let synth: Vec<(String, Option<String>)> = self.operations.values()
            .filter(|o| o.synthesized)
            .map(|o| (o.output_table().to_string(), o.output_column().map(|c| c.to_string())))
            .collect();
        self.operations.retain(|_, o| !o.synthesized);
        for (table, column) in synth.iter() {
            if let Some(c) = column {
                self.columns.retain(|x| !(&x.table == table && &x.name == c));
            }
        }
        synth.len()
    }
}
