//! The engine instance: owns the committed state, runs the pipeline, and
//! exposes the command, read, registration and event interfaces.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::event::{DomainEvent, DomainEventKind, EventManager, SubscriptionId};
use crate::geometry::{Point, Rect, Size};
use crate::middleware::{self, InitTracker};
use crate::model::{
    Edge, EdgeUpdate, FlowState, FlowStateUpdate, Metadata, MetadataUpdate, Node, NodeUpdate,
    Port, Viewport,
};
use crate::pipeline::{
    ActionStateManager, ActionType, LinkingState, Middleware, Pipeline, PipelineContext,
    ResizeState, RotationState,
};
use crate::routing::{EdgeRouting, RoutingManager};

/// Smallest viewport scale a zoom action may commit.
const MIN_ZOOM_SCALE: f32 = 1e-3;

/// Nodes and edges an injected auto-layout hands back.
pub struct LayoutResult {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// The auto-layout collaborator: the engine never lays out anything itself.
pub type LayoutFn = dyn Fn(&[Node], &[Edge]) -> anyhow::Result<LayoutResult>;

pub struct FlowEngine {
    state: FlowState,
    config: FlowConfig,
    pipeline: Pipeline,
    routing: RoutingManager,
    events: EventManager<DomainEvent>,
    action_state: ActionStateManager,
    init_tracker: InitTracker,
    layout: Option<Box<LayoutFn>>,
    in_transaction: bool,
    id_seq: u64,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new(FlowConfig::default())
    }
}

impl FlowEngine {
    pub fn new(config: FlowConfig) -> Self {
        let routing = RoutingManager::new(config.routing.default_routing.as_deref());
        Self {
            state: FlowState::default(),
            pipeline: Pipeline::new(middleware::builtin_stack()),
            routing,
            events: EventManager::new(),
            action_state: ActionStateManager::default(),
            init_tracker: InitTracker::default(),
            layout: None,
            in_transaction: false,
            id_seq: 0,
            config,
        }
    }

    /// One synchronous pipeline run. On error the previous committed state
    /// stays authoritative; on success the new state replaces it wholesale
    /// and derived events publish (deferred inside a transaction).
    fn dispatch(
        &mut self,
        action: ActionType,
        update: FlowStateUpdate,
    ) -> Result<&FlowState, FlowError> {
        let mut ctx = PipelineContext::new(
            &self.state,
            action,
            update,
            &self.config,
            &self.routing,
            &mut self.action_state,
            &mut self.init_tracker,
        );
        self.pipeline.run(&mut ctx)?;
        let (next_state, _delta, events) = ctx.into_commit();
        self.state = next_state;
        for event in events {
            self.events.deferred_emit(event);
        }
        if !self.in_transaction {
            self.events.flush_deferred();
        }
        Ok(&self.state)
    }

    // ── Command interface ───────────────────────────────────────────

    /// Reset to a fresh diagram. Re-arms the `diagramInit` measurement
    /// tracking.
    pub fn init(
        &mut self,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        metadata: Option<Metadata>,
    ) -> Result<&FlowState, FlowError> {
        let mut node_ids: BTreeSet<&str> = BTreeSet::new();
        for node in &nodes {
            if !node_ids.insert(node.id.as_str()) {
                return Err(FlowError::DuplicateId {
                    kind: "node",
                    id: node.id.clone(),
                });
            }
        }
        let mut edge_ids: BTreeSet<&str> = BTreeSet::new();
        for edge in &edges {
            if !edge_ids.insert(edge.id.as_str()) {
                return Err(FlowError::DuplicateId {
                    kind: "edge",
                    id: edge.id.clone(),
                });
            }
            for endpoint in [&edge.source, &edge.target] {
                if !node_ids.contains(endpoint.as_str()) {
                    return Err(FlowError::DanglingEdge {
                        edge: edge.id.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
        }

        self.state = FlowState::default();
        self.action_state.clear();
        self.init_tracker.reset();

        let mut update = FlowStateUpdate {
            nodes_to_add: nodes,
            edges_to_add: edges,
            ..FlowStateUpdate::default()
        };
        if let Some(metadata) = metadata {
            update.metadata = Some(MetadataUpdate {
                viewport: Some(metadata.viewport),
                middleware_config: metadata.middleware_config,
            });
        }
        self.dispatch(ActionType::Init, update)
    }

    pub fn add_nodes(&mut self, nodes: Vec<Node>) -> Result<&FlowState, FlowError> {
        self.ensure_new_node_ids(&nodes)?;
        self.dispatch(ActionType::AddNodes, FlowStateUpdate::add_nodes(nodes))
    }

    pub fn update_node(&mut self, update: NodeUpdate) -> Result<&FlowState, FlowError> {
        self.ensure_node_exists(&update.id)?;
        self.dispatch(
            ActionType::UpdateNode,
            FlowStateUpdate::update_nodes(vec![update]),
        )
    }

    pub fn update_nodes(&mut self, updates: Vec<NodeUpdate>) -> Result<&FlowState, FlowError> {
        for update in &updates {
            self.ensure_node_exists(&update.id)?;
        }
        self.dispatch(
            ActionType::UpdateNodes,
            FlowStateUpdate::update_nodes(updates),
        )
    }

    /// Translate the given nodes by `delta`.
    pub fn move_nodes(&mut self, ids: &[&str], delta: Point) -> Result<&FlowState, FlowError> {
        let mut updates = Vec::with_capacity(ids.len());
        for id in ids {
            let node = self.state.node(id).ok_or_else(|| {
                FlowError::UnknownNode((*id).to_string())
            })?;
            let mut update = NodeUpdate::new(*id);
            update.position = Some(Point::new(
                node.position.x + delta.x,
                node.position.y + delta.y,
            ));
            updates.push(update);
        }
        self.dispatch(ActionType::MoveNodes, FlowStateUpdate::update_nodes(updates))
    }

    pub fn add_edges(&mut self, edges: Vec<Edge>) -> Result<&FlowState, FlowError> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for edge in &edges {
            if !seen.insert(edge.id.as_str()) || self.state.edge(&edge.id).is_some() {
                return Err(FlowError::DuplicateId {
                    kind: "edge",
                    id: edge.id.clone(),
                });
            }
            if !edge.temporary {
                for endpoint in [&edge.source, &edge.target] {
                    if self.state.node(endpoint).is_none() {
                        return Err(FlowError::DanglingEdge {
                            edge: edge.id.clone(),
                            node: endpoint.clone(),
                        });
                    }
                }
            }
        }
        self.dispatch(ActionType::AddEdges, FlowStateUpdate::add_edges(edges))
    }

    pub fn update_edge(&mut self, update: EdgeUpdate) -> Result<&FlowState, FlowError> {
        self.ensure_edge_exists(&update.id)?;
        self.dispatch(
            ActionType::UpdateEdge,
            FlowStateUpdate::update_edges(vec![update]),
        )
    }

    pub fn update_edges(&mut self, updates: Vec<EdgeUpdate>) -> Result<&FlowState, FlowError> {
        for update in &updates {
            self.ensure_edge_exists(&update.id)?;
        }
        self.dispatch(
            ActionType::UpdateEdges,
            FlowStateUpdate::update_edges(updates),
        )
    }

    /// Delete every selected node and edge, cascading to the edges of the
    /// removed nodes. Children of a removed group are released, not
    /// deleted.
    pub fn delete_selection(&mut self) -> Result<&FlowState, FlowError> {
        let removed_nodes: BTreeSet<String> = self
            .state
            .selected_node_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut removed_edges: BTreeSet<String> = self
            .state
            .selected_edge_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        for edge in &self.state.edges {
            if removed_nodes.contains(&edge.source) || removed_nodes.contains(&edge.target) {
                removed_edges.insert(edge.id.clone());
            }
        }

        let mut update = FlowStateUpdate {
            nodes_to_remove: removed_nodes.iter().cloned().collect(),
            edges_to_remove: removed_edges.iter().cloned().collect(),
            ..FlowStateUpdate::default()
        };
        for node in &self.state.nodes {
            if let Some(group_id) = &node.group_id
                && removed_nodes.contains(group_id)
                && !removed_nodes.contains(&node.id)
            {
                let mut release = NodeUpdate::new(&node.id);
                release.group_id = Some(None);
                update.nodes_to_update.push(release);
            }
        }

        // An in-flight linking gesture dies with its temporary edge.
        let linking_edge = self.action_state.linking().map(|l| l.edge_id.clone());
        if linking_edge.is_some_and(|id| removed_edges.contains(&id)) {
            self.action_state.end_linking();
        }
        self.dispatch(ActionType::DeleteSelection, update)
    }

    /// Replace the selection. Unknown ids are ignored.
    pub fn change_selection(
        &mut self,
        node_ids: &[&str],
        edge_ids: &[&str],
    ) -> Result<&FlowState, FlowError> {
        let wanted_nodes: BTreeSet<&str> = node_ids.iter().copied().collect();
        let wanted_edges: BTreeSet<&str> = edge_ids.iter().copied().collect();
        let mut update = FlowStateUpdate::default();
        for node in &self.state.nodes {
            let selected = wanted_nodes.contains(node.id.as_str());
            if node.selected != selected {
                let mut patch = NodeUpdate::new(&node.id);
                patch.selected = Some(selected);
                update.nodes_to_update.push(patch);
            }
        }
        for edge in &self.state.edges {
            let selected = wanted_edges.contains(edge.id.as_str());
            if edge.selected != selected {
                let mut patch = EdgeUpdate::new(&edge.id);
                patch.selected = Some(selected);
                update.edges_to_update.push(patch);
            }
        }
        self.dispatch(ActionType::ChangeSelection, update)
    }

    /// Add to the selection without touching what is already selected.
    pub fn select(&mut self, node_ids: &[&str], edge_ids: &[&str]) -> Result<&FlowState, FlowError> {
        let mut nodes: Vec<String> = self
            .state
            .selected_node_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        nodes.extend(node_ids.iter().map(|id| id.to_string()));
        let mut edges: Vec<String> = self
            .state
            .selected_edge_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        edges.extend(edge_ids.iter().map(|id| id.to_string()));
        let node_refs: Vec<&str> = nodes.iter().map(String::as_str).collect();
        let edge_refs: Vec<&str> = edges.iter().map(String::as_str).collect();
        self.change_selection(&node_refs, &edge_refs)
    }

    pub fn deselect_all(&mut self) -> Result<&FlowState, FlowError> {
        self.change_selection(&[], &[])
    }

    pub fn zoom(&mut self, x: f32, y: f32, scale: f32) -> Result<&FlowState, FlowError> {
        let mut viewport = self.state.metadata.viewport;
        viewport.x = x;
        viewport.y = y;
        viewport.scale = scale.max(MIN_ZOOM_SCALE);
        self.dispatch(
            ActionType::Zoom,
            FlowStateUpdate::update_metadata(MetadataUpdate::viewport(viewport)),
        )
    }

    pub fn move_viewport(&mut self, x: f32, y: f32) -> Result<&FlowState, FlowError> {
        let mut viewport = self.state.metadata.viewport;
        viewport.x = x;
        viewport.y = y;
        self.dispatch(
            ActionType::MoveViewport,
            FlowStateUpdate::update_metadata(MetadataUpdate::viewport(viewport)),
        )
    }

    /// The renderer reports the canvas size here.
    pub fn set_viewport_size(&mut self, width: f32, height: f32) -> Result<&FlowState, FlowError> {
        let mut viewport = self.state.metadata.viewport;
        viewport.width = width;
        viewport.height = height;
        self.dispatch(
            ActionType::MoveViewport,
            FlowStateUpdate::update_metadata(MetadataUpdate::viewport(viewport)),
        )
    }

    pub fn update_metadata(&mut self, update: MetadataUpdate) -> Result<&FlowState, FlowError> {
        self.dispatch(
            ActionType::UpdateMetadata,
            FlowStateUpdate::update_metadata(update),
        )
    }

    // ── Linking gesture ─────────────────────────────────────────────

    /// Begin drawing an edge from `source`. Creates the temporary edge that
    /// follows the pointer until the gesture finishes or cancels.
    pub fn start_linking(
        &mut self,
        source: &str,
        source_port: Option<&str>,
        pointer: Point,
    ) -> Result<&FlowState, FlowError> {
        self.ensure_node_exists(source)?;
        let edge_id = self.next_id("linking");
        self.action_state.begin_linking(LinkingState {
            edge_id: edge_id.clone(),
            source: source.to_string(),
            source_port: source_port.map(str::to_string),
            pointer,
            target: None,
            target_port: None,
        });
        let mut edge = Edge::new(edge_id, source, "");
        edge.temporary = true;
        edge.source_port = source_port.map(str::to_string);
        self.dispatch(ActionType::StartLinking, FlowStateUpdate::add_edges(vec![edge]))
    }

    /// Move the floating end of the temporary edge, optionally snapped to a
    /// hovered target node/port.
    pub fn update_linking(
        &mut self,
        pointer: Point,
        target: Option<(&str, Option<&str>)>,
    ) -> Result<&FlowState, FlowError> {
        if let Some((target_id, _)) = target {
            self.ensure_node_exists(target_id)?;
        }
        let linking = self
            .action_state
            .linking_mut()
            .ok_or(FlowError::NoActiveLinking)?;
        linking.pointer = pointer;
        linking.target = target.map(|(id, _)| id.to_string());
        linking.target_port = target.and_then(|(_, port)| port.map(str::to_string));
        let edge_id = linking.edge_id.clone();

        let mut patch = EdgeUpdate::new(edge_id);
        patch.target = Some(target.map(|(id, _)| id.to_string()).unwrap_or_default());
        patch.target_port = Some(target.and_then(|(_, port)| port.map(str::to_string)));
        self.dispatch(
            ActionType::UpdateLinking,
            FlowStateUpdate::update_edges(vec![patch]),
        )
    }

    /// Resolve the gesture into a real edge. The temporary edge is removed
    /// in the same commit, so it never reaches persisted state.
    pub fn finish_linking(
        &mut self,
        target: &str,
        target_port: Option<&str>,
    ) -> Result<&FlowState, FlowError> {
        let linking = self
            .action_state
            .end_linking()
            .ok_or(FlowError::NoActiveLinking)?;
        if self.state.node(target).is_none() {
            // Leave the gesture active so the caller may retry or cancel.
            self.action_state.begin_linking(linking);
            return Err(FlowError::UnknownNode(target.to_string()));
        }
        let edge_id = self.next_id("edge");
        let mut edge = Edge::new(edge_id, linking.source.clone(), target);
        edge.source_port = linking.source_port.clone();
        edge.target_port = target_port.map(str::to_string);
        let update = FlowStateUpdate {
            edges_to_add: vec![edge],
            edges_to_remove: vec![linking.edge_id],
            ..FlowStateUpdate::default()
        };
        self.dispatch(ActionType::FinishLinking, update)
    }

    pub fn cancel_linking(&mut self) -> Result<&FlowState, FlowError> {
        let linking = self
            .action_state
            .end_linking()
            .ok_or(FlowError::NoActiveLinking)?;
        let update = FlowStateUpdate {
            edges_to_remove: vec![linking.edge_id],
            ..FlowStateUpdate::default()
        };
        self.dispatch(ActionType::CancelLinking, update)
    }

    // ── Resize / rotation gestures ──────────────────────────────────

    pub fn start_resize(&mut self, node_id: &str) -> Result<&FlowState, FlowError> {
        let node = self
            .state
            .node(node_id)
            .ok_or_else(|| FlowError::UnknownNode(node_id.to_string()))?;
        self.action_state.begin_resize(ResizeState {
            node_id: node_id.to_string(),
            initial_position: node.position,
            initial_size: node.size,
        });
        self.dispatch(ActionType::StartResize, FlowStateUpdate::default())
    }

    /// Apply an intermediate size during the gesture. Edge re-routing is
    /// deferred until the gesture ends.
    pub fn resize_node(
        &mut self,
        size: Size,
        position: Option<Point>,
    ) -> Result<&FlowState, FlowError> {
        let resize = self
            .action_state
            .resize()
            .ok_or(FlowError::NoActiveResize)?;
        let mut update = NodeUpdate::new(resize.node_id.clone());
        update.size = Some(size);
        update.position = position;
        self.dispatch(
            ActionType::ResizeNode,
            FlowStateUpdate::update_nodes(vec![update]),
        )
    }

    /// End the gesture; the resized node's edges re-route in this commit.
    pub fn end_resize(&mut self) -> Result<&FlowState, FlowError> {
        if !self.action_state.is_resizing() {
            return Err(FlowError::NoActiveResize);
        }
        self.dispatch(ActionType::EndResize, FlowStateUpdate::default())?;
        self.action_state.end_resize();
        Ok(&self.state)
    }

    pub fn start_rotation(&mut self, node_id: &str) -> Result<&FlowState, FlowError> {
        let node = self
            .state
            .node(node_id)
            .ok_or_else(|| FlowError::UnknownNode(node_id.to_string()))?;
        self.action_state.begin_rotation(RotationState {
            node_id: node_id.to_string(),
            initial_angle: node.angle,
        });
        Ok(&self.state)
    }

    pub fn rotate_node(&mut self, angle: f32) -> Result<&FlowState, FlowError> {
        let node_id = match self.action_state.rotation() {
            Some(rotation) => rotation.node_id.clone(),
            None => return Err(FlowError::NoActiveRotation),
        };
        let mut update = NodeUpdate::new(node_id);
        update.angle = Some(angle);
        self.dispatch(
            ActionType::RotateNode,
            FlowStateUpdate::update_nodes(vec![update]),
        )
    }

    pub fn end_rotation(&mut self) -> Result<&FlowState, FlowError> {
        self.action_state.end_rotation();
        Ok(&self.state)
    }

    // ── Layout collaborator ─────────────────────────────────────────

    pub fn set_layout_function<F>(&mut self, layout: F)
    where
        F: Fn(&[Node], &[Edge]) -> anyhow::Result<LayoutResult> + 'static,
    {
        self.layout = Some(Box::new(layout));
    }

    /// Call out to the injected layout and feed the result back through the
    /// pipeline. Node positions always apply; returned edge points apply
    /// only to manual-mode edges, auto edges re-route from the moved nodes.
    pub fn apply_layout(&mut self) -> Result<&FlowState, FlowError> {
        let layout = self.layout.as_deref().ok_or(FlowError::NoLayoutFunction)?;
        let nodes: Vec<Node> = self.state.nodes.clone();
        let edges: Vec<Edge> = self
            .state
            .edges
            .iter()
            .filter(|edge| !edge.temporary)
            .cloned()
            .collect();
        let result = layout(&nodes, &edges).map_err(FlowError::Layout)?;

        let mut update = FlowStateUpdate::default();
        for node in result.nodes {
            if let Some(existing) = self.state.node(&node.id)
                && existing.position != node.position
            {
                let mut patch = NodeUpdate::new(&node.id);
                patch.position = Some(node.position);
                update.nodes_to_update.push(patch);
            }
        }
        for edge in result.edges {
            if let Some(existing) = self.state.edge(&edge.id)
                && existing.routing_mode == crate::model::RoutingMode::Manual
                && existing.points != edge.points
            {
                let mut patch = EdgeUpdate::new(&edge.id);
                patch.points = Some(edge.points);
                update.edges_to_update.push(patch);
            }
        }
        self.dispatch(ActionType::ApplyLayout, update)
    }

    // ── Registration interface ──────────────────────────────────────

    pub fn register_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.pipeline.register(middleware);
    }

    pub fn unregister_middleware(&mut self, name: &str) -> bool {
        self.pipeline.unregister(name)
    }

    pub fn register_routing(&mut self, name: &str, routing: Arc<dyn EdgeRouting>) {
        self.routing.register(name, routing);
    }

    pub fn unregister_routing(&mut self, name: &str) -> bool {
        self.routing.unregister(name)
    }

    // ── Event subscription interface ────────────────────────────────

    pub fn on_event<F>(&mut self, kind: DomainEventKind, callback: F) -> SubscriptionId
    where
        F: FnMut(&DomainEvent) + 'static,
    {
        self.events.on(kind, callback)
    }

    pub fn once_event<F>(&mut self, kind: DomainEventKind, callback: F) -> SubscriptionId
    where
        F: FnMut(&DomainEvent) + 'static,
    {
        self.events.once(kind, callback)
    }

    pub fn off_event(&mut self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    pub fn off_all_events(&mut self, kind: Option<DomainEventKind>) {
        self.events.off_all(kind);
    }

    pub fn set_events_enabled(&mut self, enabled: bool) {
        self.events.set_enabled(enabled);
    }

    // ── Read interface ──────────────────────────────────────────────

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn nodes(&self) -> &[Node] {
        &self.state.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.state.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.state.node(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.state.edge(id)
    }

    pub fn viewport(&self) -> Viewport {
        self.state.metadata.viewport
    }

    pub fn metadata(&self) -> &Metadata {
        &self.state.metadata
    }

    /// Snapshot with linking artifacts stripped, suitable for saving.
    pub fn persistable_state(&self) -> FlowState {
        self.state.persistable()
    }

    pub fn action_state(&self) -> &ActionStateManager {
        &self.action_state
    }

    pub fn routing_manager(&self) -> &RoutingManager {
        &self.routing
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Closest node within `radius` of `point`, by measured bounds when
    /// available.
    pub fn nearest_node(&self, point: Point, radius: f32) -> Option<&Node> {
        self.state
            .nodes
            .iter()
            .filter_map(|node| {
                let distance = node
                    .measured_bounds
                    .map(|bounds| bounds.to_rect().distance_to_point(point))
                    .or_else(|| node.rect().map(|rect| rect.distance_to_point(point)))
                    .unwrap_or_else(|| node.position.distance_to(point));
                (distance <= radius).then_some((node, distance))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(node, _)| node)
    }

    /// Closest measured port within `radius` of `point`.
    pub fn nearest_port(&self, point: Point, radius: f32) -> Option<(&Node, &Port)> {
        self.state
            .nodes
            .iter()
            .flat_map(|node| {
                node.measured_ports
                    .as_deref()
                    .unwrap_or(&[])
                    .iter()
                    .map(move |port| (node, port))
            })
            .filter_map(|(node, port)| {
                let distance = port.rect_at(node.position).distance_to_point(point);
                (distance <= radius).then_some((node, port, distance))
            })
            .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal))
            .map(|(node, port, _)| (node, port))
    }

    /// Nodes whose measured bounds (or raw rect) intersect `rect`.
    pub fn nodes_in_rect(&self, rect: Rect) -> Vec<&Node> {
        self.state
            .nodes
            .iter()
            .filter(|node| {
                node.measured_bounds
                    .map(|bounds| bounds.intersects_rect(&rect))
                    .or_else(|| node.rect().map(|own| own.intersects(&rect)))
                    .unwrap_or_else(|| rect.contains_point(node.position))
            })
            .collect()
    }

    // ── Transactions ────────────────────────────────────────────────

    /// Batch several actions into one atomic commit. The closure failing
    /// (or an unhandled step failure propagated with `?`) restores the
    /// pre-transaction state and drops any queued events.
    pub fn transaction<F>(&mut self, f: F) -> Result<(), FlowError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<(), FlowError>,
    {
        if self.in_transaction {
            return Err(FlowError::TransactionActive);
        }
        let base = self.state.clone();
        self.in_transaction = true;
        let mut tx = Transaction {
            base: base.clone(),
            savepoints: Vec::new(),
            engine: self,
        };
        let outcome = f(&mut tx);
        match outcome {
            Ok(()) => {
                self.in_transaction = false;
                self.events.flush_deferred();
                Ok(())
            }
            Err(error) => {
                self.state = base;
                self.events.truncate_deferred(0);
                self.in_transaction = false;
                Err(error)
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn ensure_node_exists(&self, id: &str) -> Result<(), FlowError> {
        if self.state.node(id).is_none() {
            return Err(FlowError::UnknownNode(id.to_string()));
        }
        Ok(())
    }

    fn ensure_edge_exists(&self, id: &str) -> Result<(), FlowError> {
        if self.state.edge(id).is_none() {
            return Err(FlowError::UnknownEdge(id.to_string()));
        }
        Ok(())
    }

    fn ensure_new_node_ids(&self, nodes: &[Node]) -> Result<(), FlowError> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for node in nodes {
            if !seen.insert(node.id.as_str()) || self.state.node(&node.id).is_some() {
                return Err(FlowError::DuplicateId {
                    kind: "node",
                    id: node.id.clone(),
                });
            }
        }
        Ok(())
    }

    fn next_id(&mut self, prefix: &str) -> String {
        loop {
            self.id_seq += 1;
            let id = format!("{prefix}-{}", self.id_seq);
            if self.state.edge(&id).is_none() && self.state.node(&id).is_none() {
                return id;
            }
        }
    }
}

/// Scope handle inside [`FlowEngine::transaction`]. Dereferences to the
/// engine, so every command is available; adds savepoints and rollback.
pub struct Transaction<'a> {
    engine: &'a mut FlowEngine,
    base: FlowState,
    savepoints: Vec<Savepoint>,
}

struct Savepoint {
    name: String,
    state: FlowState,
    deferred_events: usize,
}

impl Transaction<'_> {
    pub fn savepoint(&mut self, name: &str) {
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            state: self.engine.state.clone(),
            deferred_events: self.engine.events.deferred_len(),
        });
    }

    /// Restore the state captured at the most recent savepoint with this
    /// name, discarding later sub-steps and their queued events.
    pub fn rollback_to(&mut self, name: &str) -> Result<(), FlowError> {
        let index = self
            .savepoints
            .iter()
            .rposition(|savepoint| savepoint.name == name)
            .ok_or_else(|| FlowError::UnknownSavepoint(name.to_string()))?;
        let savepoint = &self.savepoints[index];
        self.engine.state = savepoint.state.clone();
        self.engine.events.truncate_deferred(savepoint.deferred_events);
        self.savepoints.truncate(index + 1);
        Ok(())
    }

    /// Restore the pre-transaction state.
    pub fn rollback(&mut self) {
        self.engine.state = self.base.clone();
        self.engine.events.truncate_deferred(0);
        self.savepoints.clear();
    }
}

impl Deref for Transaction<'_> {
    type Target = FlowEngine;

    fn deref(&self) -> &FlowEngine {
        self.engine
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut FlowEngine {
        self.engine
    }
}
