//! Topology of a workflow: augmentation followed by layering.

pub mod augment;
pub mod layers;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::FlowResult;
use crate::operation::{Definition, OpId};
use crate::schema::{EntityRef, Registry};
use crate::storage::TableStore;

#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Operations in execution order, one vector per layer.
    pub layers: Vec<Vec<OpId>>,
    /// Entities produced by each layer, parallel to `layers`.
    pub elem_layers: Vec<Vec<EntityRef>>,
    /// Operations inserted by augmentation.
    pub synthesized: Vec<OpId>,
}

impl Topology {
    /// Augment the registry, layer its operations, and give every table that an
    /// operation populates a fresh store. Merges synthesized by an earlier
    /// build are dropped first so the result only reflects current definitions.
    pub fn build(registry: &mut Registry, config: &EngineConfig) -> FlowResult<Self> {
        let dropped = registry.remove_synthesized();
        if dropped > 0 {
            debug!(target: "colflow::topology", "translate: dropped {} previously synthesized operation(s)", dropped);
        }
        let synthesized = augment::augment(registry, config)?;
        let layers = layers::layer_operations(registry)?;

        let mut elem_layers = Vec::with_capacity(layers.len());
        let mut produced_tables = Vec::new();
        for layer in layers.iter() {
            let mut elems = Vec::with_capacity(layer.len());
            for id in layer {
                let Some(op) = registry.operation(*id) else { continue };
                match &op.definition {
                    Definition::Table { output, .. } => {
                        produced_tables.push(output.clone());
                        elems.push(EntityRef::Table(output.clone()));
                    }
                    Definition::Column { table, output, .. } => {
                        elems.push(EntityRef::Column { table: table.clone(), column: output.clone() });
                    }
                }
            }
            elem_layers.push(elems);
        }
        for name in produced_tables {
            if let Some(t) = registry.get_table_mut(&name) {
                t.store = TableStore::new();
            }
        }
        info!(target: "colflow::topology", "translate: {} operation(s) in {} layer(s), {} synthesized",
            registry.operation_count(), layers.len(), synthesized.len());
        Ok(Self { layers, elem_layers, synthesized })
    }

    pub fn operation_count(&self) -> usize { self.layers.iter().map(|l| l.len()).sum() }

    /// Layer labels such as `Facts.Link (link)`, sorted within each layer.
    pub fn describe(&self, registry: &Registry) -> Vec<Vec<String>> {
        self.layers.iter()
            .map(|layer| {
                let mut labels: Vec<String> = layer.iter().filter_map(|id| registry.operation(*id).map(|o| o.label())).collect();
                labels.sort();
                labels
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
