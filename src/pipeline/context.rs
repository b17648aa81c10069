use std::collections::BTreeMap;

use crate::config::FlowConfig;
use crate::event::DomainEvent;
use crate::middleware::events::InitTracker;
use crate::model::{
    Edge, EdgeField, FlowState, FlowStateUpdate, Metadata, Node, NodeField, edge_field_changed,
    node_field_changed,
};
use crate::routing::RoutingManager;

use super::action::ActionType;
use super::action_state::ActionStateManager;

/// Everything one pipeline run sees: the pre-action snapshot, the live view
/// with deltas applied, gesture state and the shared managers.
///
/// Diff helpers compare the live maps against the initial snapshot, never
/// the raw update, so every middleware observes the same consistent view
/// regardless of what ran before it.
pub struct PipelineContext<'a> {
    pub action: ActionType,
    /// The raw update the action entered the pipeline with.
    pub initial_update: FlowStateUpdate,
    pub nodes_map: BTreeMap<String, Node>,
    pub edges_map: BTreeMap<String, Edge>,
    pub initial_nodes: BTreeMap<String, Node>,
    pub initial_edges: BTreeMap<String, Edge>,
    pub metadata: Metadata,
    pub initial_metadata: Metadata,
    pub config: &'a FlowConfig,
    pub routing: &'a RoutingManager,
    pub action_state: &'a mut ActionStateManager,
    pub init_tracker: &'a mut InitTracker,
    /// Domain events derived this run, published after the commit.
    pub events: Vec<DomainEvent>,
    node_order: Vec<String>,
    edge_order: Vec<String>,
    accumulated: FlowStateUpdate,
}

impl<'a> PipelineContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &FlowState,
        action: ActionType,
        update: FlowStateUpdate,
        config: &'a FlowConfig,
        routing: &'a RoutingManager,
        action_state: &'a mut ActionStateManager,
        init_tracker: &'a mut InitTracker,
    ) -> Self {
        let initial_nodes: BTreeMap<String, Node> = state
            .nodes
            .iter()
            .map(|node| (node.id.clone(), node.clone()))
            .collect();
        let initial_edges: BTreeMap<String, Edge> = state
            .edges
            .iter()
            .map(|edge| (edge.id.clone(), edge.clone()))
            .collect();
        let mut ctx = Self {
            action,
            initial_update: update.clone(),
            nodes_map: initial_nodes.clone(),
            edges_map: initial_edges.clone(),
            initial_nodes,
            initial_edges,
            metadata: state.metadata.clone(),
            initial_metadata: state.metadata.clone(),
            config,
            routing,
            action_state,
            init_tracker,
            events: Vec::new(),
            node_order: state.nodes.iter().map(|node| node.id.clone()).collect(),
            edge_order: state.edges.iter().map(|edge| edge.id.clone()).collect(),
            accumulated: FlowStateUpdate::default(),
        };
        ctx.merge_delta(update);
        ctx
    }

    /// Apply a middleware's delta to the live view and fold it into the
    /// final commit. Later writers win field-wise per entity id.
    pub fn merge_delta(&mut self, delta: FlowStateUpdate) {
        self.apply_to_view(&delta);
        self.accumulated.merge(delta);
    }

    pub fn accumulated(&self) -> &FlowStateUpdate {
        &self.accumulated
    }

    fn apply_to_view(&mut self, delta: &FlowStateUpdate) {
        for node in &delta.nodes_to_add {
            if self
                .nodes_map
                .insert(node.id.clone(), node.clone())
                .is_none()
            {
                self.node_order.push(node.id.clone());
            }
        }
        for update in &delta.nodes_to_update {
            if let Some(node) = self.nodes_map.get_mut(&update.id) {
                update.apply_to(node);
            }
        }
        for id in &delta.nodes_to_remove {
            if self.nodes_map.remove(id).is_some() {
                self.node_order.retain(|existing| existing != id);
            }
        }
        for edge in &delta.edges_to_add {
            if self
                .edges_map
                .insert(edge.id.clone(), edge.clone())
                .is_none()
            {
                self.edge_order.push(edge.id.clone());
            }
        }
        for update in &delta.edges_to_update {
            if let Some(edge) = self.edges_map.get_mut(&update.id) {
                update.apply_to(edge);
            }
        }
        for id in &delta.edges_to_remove {
            if self.edges_map.remove(id).is_some() {
                self.edge_order.retain(|existing| existing != id);
            }
        }
        if let Some(metadata) = &delta.metadata {
            metadata.apply_to(&mut self.metadata);
        }
    }

    /// Materialize the next committed state, preserving insertion order.
    pub fn into_commit(self) -> (FlowState, FlowStateUpdate, Vec<DomainEvent>) {
        let nodes = self
            .node_order
            .iter()
            .filter_map(|id| self.nodes_map.get(id).cloned())
            .collect();
        let edges = self
            .edge_order
            .iter()
            .filter_map(|id| self.edges_map.get(id).cloned())
            .collect();
        (
            FlowState {
                nodes,
                edges,
                metadata: self.metadata,
            },
            self.accumulated,
            self.events,
        )
    }

    pub fn node_order(&self) -> &[String] {
        &self.node_order
    }

    pub fn edge_order(&self) -> &[String] {
        &self.edge_order
    }

    // ── Diff helpers ────────────────────────────────────────────────

    pub fn node_changed(&self, id: &str) -> bool {
        match (self.initial_nodes.get(id), self.nodes_map.get(id)) {
            (Some(initial), Some(current)) => initial != current,
            (None, None) => false,
            _ => true,
        }
    }

    pub fn edge_changed(&self, id: &str) -> bool {
        match (self.initial_edges.get(id), self.edges_map.get(id)) {
            (Some(initial), Some(current)) => initial != current,
            (None, None) => false,
            _ => true,
        }
    }

    /// True when any listed field of the node differs from its pre-action
    /// snapshot. Nodes without a snapshot (just added) count as changed.
    pub fn node_fields_changed(&self, id: &str, fields: &[NodeField]) -> bool {
        match (self.initial_nodes.get(id), self.nodes_map.get(id)) {
            (Some(initial), Some(current)) => fields
                .iter()
                .any(|field| node_field_changed(initial, current, *field)),
            (None, Some(_)) => true,
            _ => false,
        }
    }

    pub fn edge_fields_changed(&self, id: &str, fields: &[EdgeField]) -> bool {
        match (self.initial_edges.get(id), self.edges_map.get(id)) {
            (Some(initial), Some(current)) => fields
                .iter()
                .any(|field| edge_field_changed(initial, current, *field)),
            (None, Some(_)) => true,
            _ => false,
        }
    }

    pub fn any_node_fields_changed(&self, fields: &[NodeField]) -> bool {
        self.nodes_map
            .keys()
            .any(|id| self.node_fields_changed(id, fields))
    }

    pub fn any_edge_fields_changed(&self, fields: &[EdgeField]) -> bool {
        self.edges_map
            .keys()
            .any(|id| self.edge_fields_changed(id, fields))
    }

    pub fn affected_node_ids(&self, fields: &[NodeField]) -> Vec<String> {
        self.nodes_map
            .keys()
            .filter(|id| self.node_fields_changed(id, fields))
            .cloned()
            .collect()
    }

    pub fn added_nodes(&self) -> Vec<&Node> {
        self.node_order
            .iter()
            .filter(|id| !self.initial_nodes.contains_key(*id))
            .filter_map(|id| self.nodes_map.get(id))
            .collect()
    }

    pub fn any_nodes_added(&self) -> bool {
        self.nodes_map
            .keys()
            .any(|id| !self.initial_nodes.contains_key(id))
    }

    pub fn removed_node_ids(&self) -> Vec<String> {
        self.initial_nodes
            .keys()
            .filter(|id| !self.nodes_map.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn edge_added(&self, id: &str) -> bool {
        self.edges_map.contains_key(id) && !self.initial_edges.contains_key(id)
    }

    pub fn any_edges_added(&self) -> bool {
        self.edges_map
            .keys()
            .any(|id| !self.initial_edges.contains_key(id))
    }

    pub fn added_edges(&self) -> Vec<&Edge> {
        self.edge_order
            .iter()
            .filter(|id| !self.initial_edges.contains_key(*id))
            .filter_map(|id| self.edges_map.get(id))
            .collect()
    }
}
