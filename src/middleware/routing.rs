use std::collections::BTreeSet;

use anyhow::Result;

use crate::geometry::{Point, Rect};
use crate::model::{
    Edge, EdgeField, EdgeLabel, EdgeUpdate, FlowStateUpdate, Node, NodeField, PortSide,
    RoutingMode,
};
use crate::pipeline::{ActionType, Middleware, Next, PipelineContext};
use crate::routing::EdgeRoutingContext;

/// Node fields whose change re-routes the node's edges.
const NODE_TRIGGERS: [NodeField; 4] = [
    NodeField::Position,
    NodeField::Size,
    NodeField::Angle,
    NodeField::MeasuredPorts,
];

/// Edge fields whose change re-routes the edge itself.
const EDGE_TRIGGERS: [EdgeField; 9] = [
    EdgeField::SourcePosition,
    EdgeField::TargetPosition,
    EdgeField::Points,
    EdgeField::SourcePort,
    EdgeField::TargetPort,
    EdgeField::Source,
    EdgeField::Target,
    EdgeField::Routing,
    EdgeField::RoutingMode,
];

/// Re-routes affected edges and refreshes their label positions. Skips
/// viewport-only actions and active resize gestures; the end of a resize
/// gesture re-routes the resized node's edges.
pub struct RoutingMiddleware;

impl Middleware for RoutingMiddleware {
    fn name(&self) -> &str {
        "edge-routing"
    }

    fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> Result<()> {
        if ctx.action.is_viewport_only() {
            return next.run(ctx, None);
        }
        if ctx.action_state.is_resizing() && ctx.action != ActionType::EndResize {
            // Ports emit their own follow-up update once the gesture
            // settles.
            return next.run(ctx, None);
        }

        let resize_target = if ctx.action == ActionType::EndResize {
            ctx.action_state.resize().map(|r| r.node_id.clone())
        } else {
            None
        };
        let linking_active = ctx.action_state.linking().is_some();

        let needs = ctx.action == ActionType::Init
            || ctx.any_edges_added()
            || ctx.any_node_fields_changed(&NODE_TRIGGERS)
            || ctx.any_edge_fields_changed(&EDGE_TRIGGERS)
            || resize_target.is_some()
            || linking_active;
        if !needs {
            return next.run(ctx, None);
        }

        let mut affected_nodes: BTreeSet<String> =
            ctx.affected_node_ids(&NODE_TRIGGERS).into_iter().collect();
        if let Some(id) = resize_target {
            affected_nodes.insert(id);
        }

        let mut delta = FlowStateUpdate::default();
        for id in ctx.edge_order().to_vec() {
            let Some(edge) = ctx.edges_map.get(&id) else {
                continue;
            };
            let must = ctx.action == ActionType::Init
                || edge.temporary
                || ctx.edge_added(&id)
                || ctx.edge_fields_changed(&id, &EDGE_TRIGGERS)
                || affected_nodes.contains(&edge.source)
                || affected_nodes.contains(&edge.target);
            if !must {
                continue;
            }
            if let Some(update) = route_edge(ctx, edge) {
                delta.edges_to_update.push(update);
            }
        }
        next.run(ctx, Some(delta))
    }
}

fn route_edge(ctx: &PipelineContext<'_>, edge: &Edge) -> Option<EdgeUpdate> {
    let linking = ctx
        .action_state
        .linking()
        .filter(|state| state.edge_id == edge.id);
    let source_node = ctx.nodes_map.get(&edge.source);
    let target_node = if edge.target.is_empty() {
        None
    } else {
        ctx.nodes_map.get(&edge.target)
    };

    let source_ref = source_node.map(node_reference);
    let target_ref = target_node
        .map(node_reference)
        .or_else(|| linking.map(|state| state.pointer));

    let anchors = match (source_node, source_ref, target_ref) {
        (Some(source), Some(_), Some(target_ref)) => {
            resolve_anchor(source, edge.source_port.as_deref(), target_ref).and_then(
                |(source_point, source_side)| {
                    let target_anchor = match target_node {
                        Some(target) => resolve_anchor(
                            target,
                            edge.target_port.as_deref(),
                            source_ref.unwrap_or(source_point),
                        ),
                        // Floating end of a linking gesture follows the
                        // pointer.
                        None => Some((target_ref, source_side.opposite())),
                    };
                    target_anchor.map(|target| ((source_point, source_side), target))
                },
            )
        }
        _ => None,
    };

    let Some(((source_point, source_side), (target_point, target_side))) = anchors else {
        return suppress(edge);
    };

    let routing_name = edge.routing.as_deref();
    let routing_ctx = EdgeRoutingContext {
        source: source_point,
        source_side,
        target: target_point,
        target_side,
    };

    let mut update = EdgeUpdate::new(&edge.id);
    let mut changed = false;

    let final_points = match edge.routing_mode {
        RoutingMode::Auto => {
            let points =
                ctx.routing
                    .compute_points(routing_name, &routing_ctx, &ctx.config.routing);
            if points != edge.points {
                update.points = Some(points.clone());
                changed = true;
            }
            points
        }
        RoutingMode::Manual => {
            if edge.points.is_empty() {
                // Nothing user-supplied yet; seed with a computed route.
                let points =
                    ctx.routing
                        .compute_points(routing_name, &routing_ctx, &ctx.config.routing);
                update.points = Some(points.clone());
                changed = true;
                points
            } else {
                edge.points.clone()
            }
        }
    };

    if edge.source_position != Some(source_point) {
        update.source_position = Some(source_point);
        changed = true;
    }
    if edge.target_position != Some(target_point) {
        update.target_position = Some(target_point);
        changed = true;
    }

    if !edge.measured_labels.is_empty() {
        let labels: Vec<EdgeLabel> = edge
            .measured_labels
            .iter()
            .map(|label| {
                let mut resolved = label.clone();
                resolved.position = Some(ctx.routing.resolve_label_position(
                    routing_name,
                    &final_points,
                    label.position_on_edge,
                ));
                resolved
            })
            .collect();
        if labels != edge.measured_labels {
            update.measured_labels = Some(labels);
            changed = true;
        }
    }

    if edge.temporary {
        let z = ctx.config.z_order.temporary_edge_z_index;
        if edge.z_order != Some(z) {
            update.z_order = Some(z);
            changed = true;
        }
    }

    changed.then_some(update)
}

/// Required geometry is missing: empty the points so the renderer draws
/// nothing instead of a stale route. Manual edges keep their user-supplied
/// points.
fn suppress(edge: &Edge) -> Option<EdgeUpdate> {
    if edge.routing_mode == RoutingMode::Manual && !edge.points.is_empty() {
        return None;
    }
    if edge.points.is_empty() {
        return None;
    }
    let mut update = EdgeUpdate::new(&edge.id);
    update.points = Some(Vec::new());
    Some(update)
}

fn node_reference(node: &Node) -> Point {
    node.rect()
        .map(|rect| rect.center())
        .unwrap_or(node.position)
}

/// Anchor an edge end on a node: the named port's center when one is
/// required, otherwise the midpoint of the side facing the other end.
/// `None` means the geometry has not been measured yet.
fn resolve_anchor(node: &Node, port_id: Option<&str>, toward: Point) -> Option<(Point, PortSide)> {
    if let Some(port_id) = port_id {
        let port = node.port(port_id)?;
        return Some((port.center_at(node.position), port.side));
    }
    let rect = node.rect()?;
    let side = facing_side(rect.center(), toward);
    Some((side_midpoint(rect, side), side))
}

fn facing_side(from: Point, toward: Point) -> PortSide {
    let dx = toward.x - from.x;
    let dy = toward.y - from.y;
    if dx.abs() >= dy.abs() {
        if dx >= 0.0 {
            PortSide::Right
        } else {
            PortSide::Left
        }
    } else if dy >= 0.0 {
        PortSide::Bottom
    } else {
        PortSide::Top
    }
}

fn side_midpoint(rect: Rect, side: PortSide) -> Point {
    match side {
        PortSide::Top => Point::new(rect.x + rect.width / 2.0, rect.y),
        PortSide::Right => Point::new(rect.x + rect.width, rect.y + rect.height / 2.0),
        PortSide::Bottom => Point::new(rect.x + rect.width / 2.0, rect.y + rect.height),
        PortSide::Left => Point::new(rect.x, rect.y + rect.height / 2.0),
    }
}
