//! Workflow: declaration API and the translate/run entry points.
//!
//! ```no_run
//! use colflow::{Workflow, scripts::Udf};
//! use polars::prelude::*;
//! use serde_json::Value;
//!
//! let mut wf = Workflow::new("demo");
//! wf.create_table("Facts", &["A", "M"]);
//! wf.calculate("M2", "Facts", Udf::row(|r, _| Ok(AnyValue::Float64(r[0].extract::<f64>().unwrap_or(0.0) * 2.0))), &["M"], Value::Null);
//! wf.table_mut("Facts").unwrap().store.add(df!("A" => ["a"], "M" => [1.0]).unwrap()).unwrap();
//! wf.run().unwrap();
//! ```

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{FlowError, FlowResult};
use crate::exec::discretize::DiscretizeModel;
use crate::exec::{self, RunContext};
use crate::operation::{ColumnOp, FunctionRef, Model, OpId, TableOp};
use crate::schema::{Column, EntityRef, Registry, Table};
use crate::scripts::FunctionRegistry;
use crate::topology::Topology;

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub executed: Vec<String>,
    /// Operations skipped because their input data was missing, with the reason.
    pub skipped: Vec<(String, String)>,
}

pub struct Workflow {
    pub name: String,
    registry: Registry,
    functions: FunctionRegistry,
    config: EngineConfig,
    topology: Option<Topology>,
}

fn owned(names: &[&str]) -> Vec<String> { names.iter().map(|s| s.to_string()).collect() }

impl Workflow {
    pub fn new(name: &str) -> Self { Self::with_config(name, EngineConfig::default()) }

    pub fn with_config(name: &str, config: EngineConfig) -> Self {
        Self { name: name.to_string(), registry: Registry::new(), functions: FunctionRegistry::with_builtins(), config, topology: None }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn set_incremental(&mut self, on: bool) { self.config.incremental = on; }

    pub fn functions(&self) -> &FunctionRegistry { &self.functions }

    pub fn registry(&self) -> &Registry { &self.registry }

    pub fn topology(&self) -> Option<&Topology> { self.topology.as_ref() }

    pub fn table(&self, name: &str) -> Option<&Table> { self.registry.get_table(name) }

    /// Mutable access, e.g. to feed a source table through its store.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> { self.registry.get_table_mut(name) }

    /// Live values of one column.
    pub fn column_values(&self, table: &str, column: &str) -> FlowResult<Series> {
        let t = self.registry.require_table(table)?;
        if !t.store.has_column(column) {
            return Err(FlowError::not_found("column_not_found".to_string(), format!("table '{}' has no data for '{}'", table, column)));
        }
        Ok(t.store.column_values(column)?)
    }

    fn declare_table(&mut self, name: &str, attributes: &[&str], op: Option<TableOp>) -> EntityRef {
        self.topology = None;
        self.registry.add_table(Table::new(name, owned(attributes)), op);
        EntityRef::Table(name.to_string())
    }

    fn declare_column(&mut self, name: &str, table: &str, target: Option<&str>, op: ColumnOp) -> EntityRef {
        self.topology = None;
        let column = Column { table: table.to_string(), name: name.to_string(), target_table: target.map(|t| t.to_string()) };
        self.registry.add_column(column, op);
        EntityRef::Column { table: table.to_string(), column: name.to_string() }
    }

    /// A table with no producing operation; rows are added through its store.
    pub fn create_table(&mut self, name: &str, attributes: &[&str]) -> EntityRef {
        self.declare_table(name, attributes, None)
    }

    pub fn populate(&mut self, name: &str, attributes: &[&str], function: impl Into<FunctionRef>, tables: &[&str], model: Model) -> EntityRef {
        let op = TableOp::Populate { function: function.into(), tables: owned(tables), model };
        self.declare_table(name, attributes, Some(op))
    }

    pub fn product(&mut self, name: &str, attributes: &[&str], tables: &[&str]) -> EntityRef {
        self.declare_table(name, attributes, Some(TableOp::Product { tables: owned(tables) }))
    }

    /// Rows of `base` where `column` is true; `attribute` holds the base row ids.
    pub fn filter(&mut self, name: &str, attribute: &str, base: &str, column: &str) -> EntityRef {
        let op = TableOp::Filter { base: base.to_string(), column: column.to_string() };
        self.declare_table(name, &[attribute], Some(op))
    }

    /// Distinct keys of the link column `source.link`, stored as `attributes`.
    pub fn project(&mut self, name: &str, attributes: &[&str], source: &str, link: &str) -> EntityRef {
        let op = TableOp::Project { source: source.to_string(), link: link.to_string() };
        self.declare_table(name, attributes, Some(op))
    }

    pub fn compute(&mut self, name: &str, table: &str, function: impl Into<FunctionRef>, inputs: &[&str], model: Model) -> EntityRef {
        let op = ColumnOp::Compute { function: function.into(), inputs: owned(inputs), model };
        self.declare_column(name, table, None, op)
    }

    pub fn calculate(&mut self, name: &str, table: &str, function: impl Into<FunctionRef>, inputs: &[&str], model: Model) -> EntityRef {
        let op = ColumnOp::Calculate { function: function.into(), inputs: owned(inputs), model };
        self.declare_column(name, table, None, op)
    }

    /// Link rows of `table` to rows of `target` where `keys` equal `linked_keys`
    /// (the target's attributes when empty).
    pub fn link(&mut self, name: &str, table: &str, target: &str, keys: &[&str], linked_keys: &[&str]) -> EntityRef {
        let op = ColumnOp::Link { keys: owned(keys), linked_keys: owned(linked_keys) };
        self.declare_column(name, table, Some(target), op)
    }

    /// `path` is either one `a::b::c` string or already split segments.
    pub fn merge(&mut self, name: &str, table: &str, path: &[&str]) -> EntityRef {
        let segments: Vec<String> = path.iter().flat_map(|p| crate::ident::split_path(p)).collect();
        self.declare_column(name, table, None, ColumnOp::Merge { path: segments })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn roll(&mut self, name: &str, table: &str, window: usize, group: Option<&str>, function: impl Into<FunctionRef>, inputs: &[&str], model: Model) -> EntityRef {
        let op = ColumnOp::Roll { window, group: group.map(|g| g.to_string()), function: function.into(), inputs: owned(inputs), model };
        self.declare_column(name, table, None, op)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn aggregate(&mut self, name: &str, table: &str, fact_table: &str, link: &str, function: impl Into<FunctionRef>, inputs: &[&str], model: Model) -> EntityRef {
        let op = ColumnOp::Aggregate {
            fact_table: fact_table.to_string(),
            link: link.to_string(),
            function: function.into(),
            inputs: owned(inputs),
            model,
            fill: Some(0.0),
        };
        self.declare_column(name, table, None, op)
    }

    pub fn discretize(&mut self, name: &str, table: &str, input: &str, model: DiscretizeModel) -> EntityRef {
        self.declare_column(name, table, None, ColumnOp::Discretize { input: input.to_string(), model })
    }

    /// Build the topology: augment the registry, layer operations, reset the
    /// stores of tables that operations produce.
    pub fn translate(&mut self) -> FlowResult<&Topology> {
        let topology = Topology::build(&mut self.registry, &self.config)?;
        Ok(self.topology.insert(topology))
    }

    /// Execute every layer, then acknowledge all changes and garbage collect.
    /// Data errors skip the affected operation; any other error stops the run.
    pub fn run(&mut self) -> FlowResult<RunReport> {
        info!(target: "colflow::exec", "Start executing workflow '{}'", self.name);
        if self.topology.is_none() {
            self.translate()?;
        }
        let layers: Vec<Vec<OpId>> = self.topology.as_ref().map(|t| t.layers.clone()).unwrap_or_default();
        let mut report = RunReport::default();
        let mut ctx = RunContext::new(&self.functions, self.config.incremental);
        for layer in layers.iter() {
            for id in layer {
                let Some(op) = self.registry.operation(*id).cloned() else {
                    return Err(FlowError::internal("missing_operation".to_string(), format!("operation {} vanished from the registry", id)));
                };
                let label = op.label();
                info!(target: "colflow::exec", "---> Start {}: id={} {}", op.kind_name(), op.id, label);
                match exec::execute(&op, &mut self.registry, &mut ctx) {
                    Ok(()) => {
                        info!(target: "colflow::exec", "<--- Finish {}", label);
                        report.executed.push(label);
                    }
                    Err(e) if e.is_data() => {
                        warn!(target: "colflow::exec", "skipping {}: {}", label, e);
                        report.skipped.push((label, e.to_string()));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        for name in self.registry.table_names() {
            if let Some(t) = self.registry.get_table_mut(&name) {
                t.store.clear_change_status();
                t.store.gc();
            }
        }
        info!(target: "colflow::exec", "Finished executing workflow '{}': executed={} skipped={}",
            self.name, report.executed.len(), report.skipped.len());
        Ok(report)
    }
}
