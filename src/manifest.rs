//! JSON workflow definitions.
//!
//! ```json
//! {
//!   "name": "sales",
//!   "config": { "incremental": false },
//!   "tables": [
//!     { "operation": "populate", "name": "Facts", "attributes": ["A", "M"],
//!       "function": "read_parquet", "model": { "path": "facts.parquet" } }
//!   ],
//!   "columns": [
//!     { "operation": "calculate", "name": "M2", "table": "Facts",
//!       "function": "function(m) return m * 2 end", "inputs": ["M"] }
//!   ]
//! }
//! ```
//!
//! Function strings starting with `function` are inline Lua; anything else is a
//! registered function name.

use std::path::Path;

use serde::Deserialize;

use crate::config::{ConfigOverrides, EngineConfig};
use crate::error::FlowResult;
use crate::exec::discretize::DiscretizeModel;
use crate::operation::{FunctionRef, Model};
use crate::workflow::Workflow;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowManifest {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub config: Option<ConfigOverrides>,
    #[serde(default)]
    pub tables: Vec<TableManifest>,
    #[serde(default)]
    pub columns: Vec<ColumnManifest>,
}

fn default_name() -> String { "workflow".to_string() }

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TableManifest {
    /// Table without an operation; stays empty unless rows are added elsewhere.
    Source { name: String, #[serde(default)] attributes: Vec<String> },
    Populate {
        name: String,
        #[serde(default)]
        attributes: Vec<String>,
        function: String,
        #[serde(default)]
        tables: Vec<String>,
        #[serde(default)]
        model: Model,
    },
    Product { name: String, attributes: Vec<String>, tables: Vec<String> },
    Filter { name: String, attribute: String, base: String, column: String },
    Project { name: String, attributes: Vec<String>, source: String, link: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ColumnManifest {
    Compute { name: String, table: String, function: String, #[serde(default)] inputs: Vec<String>, #[serde(default)] model: Model },
    Calculate { name: String, table: String, function: String, #[serde(default)] inputs: Vec<String>, #[serde(default)] model: Model },
    Link { name: String, table: String, target: String, keys: Vec<String>, #[serde(default)] linked_keys: Vec<String> },
    Merge { name: String, table: String, path: Vec<String> },
    Roll {
        name: String,
        table: String,
        window: usize,
        #[serde(default)]
        group: Option<String>,
        function: String,
        #[serde(default)]
        inputs: Vec<String>,
        #[serde(default)]
        model: Model,
    },
    Aggregate {
        name: String,
        table: String,
        fact_table: String,
        link: String,
        function: String,
        #[serde(default)]
        inputs: Vec<String>,
        #[serde(default)]
        model: Model,
    },
    Discretize { name: String, table: String, input: String, #[serde(default)] model: DiscretizeModel },
}

fn strs(v: &[String]) -> Vec<&str> { v.iter().map(|s| s.as_str()).collect() }

impl WorkflowManifest {
    pub fn from_json(text: &str) -> FlowResult<Self> { Ok(serde_json::from_str(text)?) }

    pub fn from_path(path: &Path) -> FlowResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Declare every table and column on a new workflow, with the manifest's
    /// settings over the defaults.
    pub fn into_workflow(self) -> Workflow { self.into_workflow_with(EngineConfig::default()) }

    /// Like [`into_workflow`](Self::into_workflow), with the manifest's
    /// settings layered over `base`.
    pub fn into_workflow_with(self, base: EngineConfig) -> Workflow {
        let config = match self.config.as_ref() {
            Some(o) => base.overlay(o),
            None => base,
        };
        let mut wf = Workflow::with_config(&self.name, config);
        for t in self.tables.iter() {
            match t {
                TableManifest::Source { name, attributes } => { wf.create_table(name, &strs(attributes)); }
                TableManifest::Populate { name, attributes, function, tables, model } => {
                    wf.populate(name, &strs(attributes), FunctionRef::from(function.as_str()), &strs(tables), model.clone());
                }
                TableManifest::Product { name, attributes, tables } => { wf.product(name, &strs(attributes), &strs(tables)); }
                TableManifest::Filter { name, attribute, base, column } => { wf.filter(name, attribute, base, column); }
                TableManifest::Project { name, attributes, source, link } => { wf.project(name, &strs(attributes), source, link); }
            }
        }
        for c in self.columns.iter() {
            match c {
                ColumnManifest::Compute { name, table, function, inputs, model } => {
                    wf.compute(name, table, function.as_str(), &strs(inputs), model.clone());
                }
                ColumnManifest::Calculate { name, table, function, inputs, model } => {
                    wf.calculate(name, table, function.as_str(), &strs(inputs), model.clone());
                }
                ColumnManifest::Link { name, table, target, keys, linked_keys } => {
                    wf.link(name, table, target, &strs(keys), &strs(linked_keys));
                }
                ColumnManifest::Merge { name, table, path } => { wf.merge(name, table, &strs(path)); }
                ColumnManifest::Roll { name, table, window, group, function, inputs, model } => {
                    wf.roll(name, table, *window, group.as_deref(), function.as_str(), &strs(inputs), model.clone());
                }
                ColumnManifest::Aggregate { name, table, fact_table, link, function, inputs, model } => {
                    wf.aggregate(name, table, fact_table, link, function.as_str(), &strs(inputs), model.clone());
                }
                ColumnManifest::Discretize { name, table, input, model } => { wf.discretize(name, table, input, model.clone()); }
            }
        }
        wf
    }
}
