use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::event::{
    DiagramInitEvent, DomainEvent, EdgeDrawnEvent, SelectionChangedEvent, ViewportChangedEvent,
};
use crate::model::{Edge, Node};
use crate::pipeline::{ActionType, Middleware, Next, PipelineContext};

/// Derives the domain events from the before/after diff once the rest of
/// the chain has run, and queues them for post-commit emission.
pub struct EventsMiddleware;

impl Middleware for EventsMiddleware {
    fn name(&self) -> &str {
        "events"
    }

    fn execute(&self, ctx: &mut PipelineContext<'_>, next: Next<'_>) -> Result<()> {
        // Derive after the downstream chain so custom middlewares' deltas
        // are part of the observed final state.
        next.run(ctx, None)?;
        derive_selection_changed(ctx);
        derive_viewport_changed(ctx);
        derive_edge_drawn(ctx);
        derive_diagram_init(ctx);
        Ok(())
    }
}

/// Fires only when the *set* of selected ids differs, regardless of map
/// insertion order.
fn derive_selection_changed(ctx: &mut PipelineContext<'_>) {
    let before_nodes: BTreeSet<&str> = selected_ids(&ctx.initial_nodes, |node| node.selected);
    let after_nodes: BTreeSet<&str> = selected_ids(&ctx.nodes_map, |node| node.selected);
    let before_edges: BTreeSet<&str> = selected_ids(&ctx.initial_edges, |edge| edge.selected);
    let after_edges: BTreeSet<&str> = selected_ids(&ctx.edges_map, |edge| edge.selected);

    if before_nodes == after_nodes && before_edges == after_edges {
        return;
    }
    let event = SelectionChangedEvent {
        selected_nodes: to_owned(&after_nodes),
        selected_edges: to_owned(&after_edges),
        added_nodes: to_owned(&(&after_nodes - &before_nodes)),
        removed_nodes: to_owned(&(&before_nodes - &after_nodes)),
        added_edges: to_owned(&(&after_edges - &before_edges)),
        removed_edges: to_owned(&(&before_edges - &after_edges)),
    };
    ctx.events.push(DomainEvent::SelectionChanged(event));
}

fn derive_viewport_changed(ctx: &mut PipelineContext<'_>) {
    let previous = ctx.initial_metadata.viewport;
    let current = ctx.metadata.viewport;
    if previous != current {
        ctx.events
            .push(DomainEvent::ViewportChanged(ViewportChangedEvent {
                viewport: current,
                previous,
            }));
    }
}

/// One event per edge that exists after `finishLinking` but not before,
/// with both endpoints resolved. Edges with a missing endpoint never fire.
fn derive_edge_drawn(ctx: &mut PipelineContext<'_>) {
    if ctx.action != ActionType::FinishLinking {
        return;
    }
    let drawn: Vec<EdgeDrawnEvent> = ctx
        .added_edges()
        .into_iter()
        .filter(|edge| !edge.temporary)
        .filter_map(|edge| {
            let source = ctx.nodes_map.get(&edge.source)?;
            let target = ctx.nodes_map.get(&edge.target)?;
            Some(EdgeDrawnEvent {
                edge: edge.clone(),
                source: source.clone(),
                target: target.clone(),
                source_port: edge.source_port.clone(),
                target_port: edge.target_port.clone(),
            })
        })
        .collect();
    for event in drawn {
        ctx.events.push(DomainEvent::EdgeDrawn(event));
    }
}

fn derive_diagram_init(ctx: &mut PipelineContext<'_>) {
    if ctx.action == ActionType::Init {
        ctx.init_tracker.arm(&ctx.nodes_map, &ctx.edges_map);
    } else {
        ctx.init_tracker.observe(&ctx.nodes_map, &ctx.edges_map);
    }
    if ctx.init_tracker.take_ready() {
        let nodes: Vec<Node> = ctx
            .node_order()
            .iter()
            .filter_map(|id| ctx.nodes_map.get(id).cloned())
            .collect();
        let edges: Vec<Edge> = ctx
            .edge_order()
            .iter()
            .filter_map(|id| ctx.edges_map.get(id).cloned())
            .filter(|edge| !edge.temporary)
            .collect();
        ctx.events
            .push(DomainEvent::DiagramInit(DiagramInitEvent { nodes, edges }));
    }
}

fn selected_ids<T>(map: &BTreeMap<String, T>, is_selected: impl Fn(&T) -> bool) -> BTreeSet<&str> {
    map.iter()
        .filter(|(_, value)| is_selected(value))
        .map(|(id, _)| id.as_str())
        .collect()
}

fn to_owned(set: &BTreeSet<&str>) -> Vec<String> {
    set.iter().map(|id| id.to_string()).collect()
}

/// Tracks which entities still owe their asynchronous measurement after an
/// `init`, so `diagramInit` fires exactly once and never early.
///
/// Pending sets are populated when the tracker arms and only ever drain:
/// an entity leaves the set when its geometry arrives or when it is
/// removed before being measured.
#[derive(Debug, Default)]
pub struct InitTracker {
    armed: bool,
    fired: bool,
    pending_nodes: BTreeSet<String>,
    pending_labels: BTreeSet<(String, String)>,
}

impl InitTracker {
    pub fn arm(&mut self, nodes: &BTreeMap<String, Node>, edges: &BTreeMap<String, Edge>) {
        self.armed = true;
        self.fired = false;
        self.pending_nodes = nodes
            .values()
            .filter(|node| !node.is_measured())
            .map(|node| node.id.clone())
            .collect();
        self.pending_labels = edges
            .values()
            .flat_map(|edge| {
                edge.measured_labels
                    .iter()
                    .filter(|label| label.size.is_none())
                    .map(|label| (edge.id.clone(), label.id.clone()))
            })
            .collect();
    }

    pub fn observe(&mut self, nodes: &BTreeMap<String, Node>, edges: &BTreeMap<String, Edge>) {
        if !self.armed || self.fired {
            return;
        }
        self.pending_nodes
            .retain(|id| nodes.get(id).is_some_and(|node| !node.is_measured()));
        self.pending_labels.retain(|(edge_id, label_id)| {
            edges.get(edge_id).is_some_and(|edge| {
                edge.measured_labels
                    .iter()
                    .any(|label| &label.id == label_id && label.size.is_none())
            })
        });
    }

    /// True exactly once: when armed and every pending measurement has
    /// drained.
    pub fn take_ready(&mut self) -> bool {
        if self.armed
            && !self.fired
            && self.pending_nodes.is_empty()
            && self.pending_labels.is_empty()
        {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn is_pending(&self) -> bool {
        self.armed && !self.fired
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
