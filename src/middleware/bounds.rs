use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::geometry::{self, Bounds};
use crate::model::{FlowStateUpdate, Node, NodeField, NodeUpdate};
use crate::pipeline::{ActionType, Middleware, Next, PipelineContext};

/// Node fields whose change invalidates measured bounds.
const TRIGGER_FIELDS: [NodeField; 4] = [
    NodeField::Position,
    NodeField::Size,
    NodeField::Angle,
    NodeField::MeasuredPorts,
];

/// Recomputes `measured_bounds` for nodes whose geometry inputs changed.
/// Emits only `{id, measured_bounds}` so unrelated concurrent updates are
/// never clobbered.
pub struct BoundsMiddleware;

impl Middleware for BoundsMiddleware {
    fn name(&self) -> &str {
        "bounds"
    }

    fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> Result<()> {
        let targets: Vec<String> = if ctx.action == ActionType::Init {
            // Nodes without a size defer until their measurement arrives.
            ctx.node_order()
                .iter()
                .filter(|id| ctx.nodes_map[*id].size.is_some())
                .cloned()
                .collect()
        } else {
            ctx.affected_node_ids(&TRIGGER_FIELDS)
        };
        if targets.is_empty() {
            return next.run(ctx, None);
        }

        // A moved child invalidates every enclosing group.
        let mut group_targets: BTreeSet<String> = targets
            .iter()
            .filter(|id| ctx.nodes_map.get(*id).is_some_and(|node| node.group))
            .cloned()
            .collect();
        for id in &targets {
            let mut parent = ctx
                .nodes_map
                .get(id)
                .and_then(|node| node.group_id.clone());
            while let Some(group_id) = parent {
                if !group_targets.insert(group_id.clone()) {
                    break;
                }
                parent = ctx
                    .nodes_map
                    .get(&group_id)
                    .and_then(|node| node.group_id.clone());
            }
        }

        let mut fresh: BTreeMap<String, Bounds> = BTreeMap::new();
        for id in &targets {
            let Some(node) = ctx.nodes_map.get(id) else {
                continue;
            };
            if node.group {
                continue;
            }
            if let Some(bounds) = plain_node_bounds(node) {
                fresh.insert(id.clone(), bounds);
            }
        }

        // Deepest groups first so nested groups aggregate fresh child
        // bounds.
        let mut groups: Vec<String> = group_targets.into_iter().collect();
        groups.sort_by_key(|id| std::cmp::Reverse(group_depth(&ctx.nodes_map, id)));
        for id in groups {
            let Some(node) = ctx.nodes_map.get(&id) else {
                continue;
            };
            if let Some(bounds) = group_node_bounds(&ctx.nodes_map, &fresh, node) {
                fresh.insert(id, bounds);
            }
        }

        let mut delta = FlowStateUpdate::default();
        for (id, bounds) in fresh {
            if ctx.nodes_map[&id].measured_bounds != Some(bounds) {
                let mut update = NodeUpdate::new(id);
                update.measured_bounds = Some(bounds);
                delta.nodes_to_update.push(update);
            }
        }
        next.run(ctx, Some(delta))
    }
}

fn plain_node_bounds(node: &Node) -> Option<Bounds> {
    let rect = node.rect()?;
    Some(geometry::node_bounds(rect, node.angle, &node.port_rects()))
}

/// Group bounds cover the group's own rectangle plus every child's bounds.
fn group_node_bounds(
    nodes: &BTreeMap<String, Node>,
    fresh: &BTreeMap<String, Bounds>,
    group: &Node,
) -> Option<Bounds> {
    let children = nodes.values().filter(|node| {
        node.group_id.as_deref() == Some(group.id.as_str()) && node.id != group.id
    });
    let child_bounds = children.filter_map(|child| {
        fresh
            .get(&child.id)
            .copied()
            .or(child.measured_bounds)
    });
    let own = plain_node_bounds(group);
    geometry::aggregate_bounds(child_bounds.chain(own))
}

fn group_depth(nodes: &BTreeMap<String, Node>, id: &str) -> usize {
    let mut depth = 0;
    let mut current = nodes.get(id).and_then(|node| node.group_id.clone());
    while let Some(parent) = current {
        depth += 1;
        if depth > nodes.len() {
            break;
        }
        current = nodes.get(&parent).and_then(|node| node.group_id.clone());
    }
    depth
}
