//! Layering: order operations so that each one runs after everything it reads.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::dependency::dependency_entities;
use crate::error::{FlowError, FlowResult};
use crate::operation::OpId;
use crate::schema::Registry;

/// Prerequisite operations of every operation.
pub fn prerequisites(registry: &Registry) -> FlowResult<BTreeMap<OpId, BTreeSet<OpId>>> {
    let mut prereqs = BTreeMap::new();
    for op in registry.operations() {
        let mut deps = BTreeSet::new();
        for entity in dependency_entities(op, registry)? {
            if let Some(producer) = registry.producer(&entity)? {
                deps.insert(producer);
            }
        }
        prereqs.insert(op.id, deps);
    }
    Ok(prereqs)
}

/// Group operations into layers. Layer `k` holds every operation whose
/// prerequisites all sit in layers before `k`. Operations that can never be
/// placed form a cycle and are reported together.
pub fn layer_operations(registry: &Registry) -> FlowResult<Vec<Vec<OpId>>> {
    let prereqs = prerequisites(registry)?;
    let mut done: BTreeSet<OpId> = BTreeSet::new();
    let mut layers: Vec<Vec<OpId>> = Vec::new();
    loop {
        let layer: Vec<OpId> = prereqs.iter()
            .filter(|(id, deps)| !done.contains(*id) && deps.is_subset(&done))
            .map(|(id, _)| *id)
            .collect();
        if layer.is_empty() { break; }
        debug!(target: "colflow::topology", "layer {}: {} operation(s)", layers.len(), layer.len());
        done.extend(layer.iter().copied());
        layers.push(layer);
    }
    if done.len() < prereqs.len() {
        let stuck: Vec<String> = prereqs.keys()
            .filter(|id| !done.contains(*id))
            .filter_map(|id| registry.operation(*id).map(|o| o.label()))
            .collect();
        return Err(FlowError::cycle(stuck));
    }
    Ok(layers)
}
