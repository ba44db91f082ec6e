//! Augmentation: insert merge operations for dependency names nobody produces.
//!
//! Two cases are handled. A path name (`Link::B`) becomes a merge along that
//! path. A plain name missing from a filter or product table is looked up in
//! the tables it was derived from and becomes a merge through the attribute
//! holding their row ids. Insertions can expose new unresolved names (the tail
//! of a path lives on another table), so the pass repeats until nothing changes.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::dependency::declared_dependencies;
use crate::error::{FlowError, FlowResult};
use crate::ident;
use crate::operation::{ColumnOp, Definition, OpId, Operation};
use crate::schema::{Column, Registry};

/// Run augmentation to a fixpoint and return the ids of inserted operations.
pub fn augment(registry: &mut Registry, config: &EngineConfig) -> FlowResult<Vec<OpId>> {
    let mut inserted = Vec::new();
    let mut round = 0usize;
    loop {
        if round >= config.max_augment_rounds {
            return Err(FlowError::config(
                "augment_rounds".to_string(),
                format!("augmentation did not converge within {} rounds", config.max_augment_rounds),
            ));
        }
        round += 1;
        let snapshot: Vec<Operation> = registry.operations().cloned().collect();
        let before = inserted.len();
        for op in snapshot.iter() {
            for (table, columns) in declared_dependencies(op, registry) {
                // unknown tables are reported when dependencies are resolved
                if registry.get_table(&table).is_none() { continue; }
                for name in columns {
                    if registry.resolves(&table, &name) { continue; }
                    if let Some(id) = synthesize(registry, &table, &name, config)? {
                        inserted.push(id);
                    }
                }
            }
        }
        if inserted.len() == before { break; }
    }
    debug!(target: "colflow::topology", "augment: inserted={} rounds={}", inserted.len(), round);
    validate_merges(registry)?;
    Ok(inserted)
}

fn synthesize(registry: &mut Registry, table: &str, name: &str, config: &EngineConfig) -> FlowResult<Option<OpId>> {
    let segments = ident::split_path(name);
    let path = if segments.len() > 1 {
        if segments.len() > config.max_path_depth {
            return Err(FlowError::config(
                "path_too_long".to_string(),
                format!("column path '{}' on '{}' has {} segments, limit is {}", name, table, segments.len(), config.max_path_depth),
            ));
        }
        segments
    } else {
        match inherited_path(registry, table, name, config.max_path_depth)? {
            Some(path) => path,
            None => return Ok(None),
        }
    };
    debug!(target: "colflow::topology", "augment: merge {}.{} along {:?}", table, name, path);
    let column = Column { table: table.to_string(), name: name.to_string(), target_table: None };
    Ok(Some(registry.insert_column(column, ColumnOp::Merge { path }, true)))
}

/// Path from `table` to the nearest ancestor table that resolves `name`,
/// following filter and product attributes.
pub fn inherited_path(registry: &Registry, table: &str, name: &str, max_depth: usize) -> FlowResult<Option<Vec<String>>> {
    let mut visited = HashSet::new();
    visited.insert(table.to_string());
    search(registry, table, name, &mut visited, 1, max_depth)
}

fn search(registry: &Registry, table: &str, name: &str, visited: &mut HashSet<String>, depth: usize, max_depth: usize) -> FlowResult<Option<Vec<String>>> {
    let parents = registry.parent_links(table)?;
    if parents.is_empty() { return Ok(None); }
    if depth > max_depth {
        return Err(FlowError::config(
            "inheritance_depth".to_string(),
            format!("looking up '{}' through derived tables exceeded depth {}", name, max_depth),
        ));
    }
    let direct: Vec<&str> = parents.iter().filter(|(_, p)| registry.resolves(p, name)).map(|(a, _)| a.as_str()).collect();
    if direct.len() > 1 {
        warn!(target: "colflow::topology", "'{}.{}' is inherited through {:?}; using '{}'", table, name, direct, direct[0]);
    }
    for (attr, parent) in parents {
        if !visited.insert(parent.clone()) { continue; }
        if registry.resolves(&parent, name) {
            return Ok(Some(vec![attr, name.to_string()]));
        }
        if let Some(mut rest) = search(registry, &parent, name, visited, depth + 1, max_depth)? {
            rest.insert(0, attr);
            return Ok(Some(rest));
        }
    }
    Ok(None)
}

/// Every merge must start at a column whose values are row ids of some table.
fn validate_merges(registry: &Registry) -> FlowResult<()> {
    for op in registry.operations() {
        let Definition::Column { table, output, op: ColumnOp::Merge { path } } = &op.definition else { continue };
        let valid = path.len() >= 2 && registry.link_target(table, &path[0]).is_some();
        if !valid {
            return Err(FlowError::config(
                "merge_path".to_string(),
                format!("merge '{}.{}' path {:?} does not start with a link column", table, output, path),
            ));
        }
    }
    Ok(())
}
