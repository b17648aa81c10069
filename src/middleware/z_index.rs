use std::collections::BTreeMap;

use anyhow::Result;

use crate::model::{EdgeField, EdgeUpdate, FlowStateUpdate, NodeField, NodeUpdate};
use crate::pipeline::{ActionType, Middleware, Next, PipelineContext};

/// Assigns stacking order: base from state insertion order with group
/// children above their group, a configurable boost for selected entities,
/// and edges inheriting the higher of their endpoints.
pub struct ZIndexMiddleware;

impl Middleware for ZIndexMiddleware {
    fn name(&self) -> &str {
        "z-index"
    }

    fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> Result<()> {
        let structural = matches!(
            ctx.action,
            ActionType::Init | ActionType::ChangeSelection | ActionType::DeleteSelection
        );
        let relevant = structural
            || ctx.any_nodes_added()
            || ctx.any_edges_added()
            || ctx.any_node_fields_changed(&[NodeField::Selected, NodeField::GroupId])
            || ctx.any_edge_fields_changed(&[EdgeField::Selected]);
        if !relevant {
            return next.run(ctx, None);
        }

        let boost = ctx.config.z_order.selected_boost;
        let assigned = assign_node_z(ctx, boost);

        let mut delta = FlowStateUpdate::default();
        for (id, z) in &assigned {
            if ctx.nodes_map[id].z_order != Some(*z) {
                let mut update = NodeUpdate::new(id.clone());
                update.z_order = Some(*z);
                delta.nodes_to_update.push(update);
            }
        }
        for id in ctx.edge_order() {
            let edge = &ctx.edges_map[id];
            if edge.temporary {
                // The routing middleware stamps the temporary edge.
                continue;
            }
            let source_z = assigned.get(&edge.source).copied().unwrap_or(0);
            let target_z = assigned.get(&edge.target).copied().unwrap_or(0);
            let mut z = source_z.max(target_z);
            if edge.selected {
                z += boost;
            }
            if edge.z_order != Some(z) {
                let mut update = EdgeUpdate::new(id.clone());
                update.z_order = Some(z);
                delta.edges_to_update.push(update);
            }
        }
        next.run(ctx, Some(delta))
    }
}

/// Depth-first over the group hierarchy in state order: every node gets a
/// strictly increasing counter, so children always stack above their group.
fn assign_node_z(ctx: &PipelineContext<'_>, boost: i32) -> BTreeMap<String, i32> {
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut roots: Vec<&str> = Vec::new();
    for id in ctx.node_order() {
        let node = &ctx.nodes_map[id];
        match node
            .group_id
            .as_deref()
            .filter(|parent| ctx.nodes_map.contains_key(*parent))
        {
            Some(parent) => children.entry(parent).or_default().push(id.as_str()),
            None => roots.push(id.as_str()),
        }
    }

    let mut assigned: BTreeMap<String, i32> = BTreeMap::new();
    let mut counter = 0;
    let mut stack: Vec<&str> = roots.into_iter().rev().collect();
    while let Some(id) = stack.pop() {
        if assigned.contains_key(id) {
            continue;
        }
        let node = &ctx.nodes_map[id];
        let mut z = counter;
        counter += 1;
        if node.selected {
            z += boost;
        }
        assigned.insert(id.to_string(), z);
        if let Some(kids) = children.get(id) {
            for kid in kids.iter().rev() {
                stack.push(*kid);
            }
        }
    }
    assigned
}
