use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds, Point, Rect, Size};

static PX_OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(-?\d+(?:\.\d+)?)px\s*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSide {
    Top,
    Right,
    Bottom,
    Left,
}

impl PortSide {
    /// Unit vector pointing away from the node.
    pub fn direction(self) -> Point {
        match self {
            PortSide::Top => Point::new(0.0, -1.0),
            PortSide::Right => Point::new(1.0, 0.0),
            PortSide::Bottom => Point::new(0.0, 1.0),
            PortSide::Left => Point::new(-1.0, 0.0),
        }
    }

    pub fn opposite(self) -> PortSide {
        match self {
            PortSide::Top => PortSide::Bottom,
            PortSide::Right => PortSide::Left,
            PortSide::Bottom => PortSide::Top,
            PortSide::Left => PortSide::Right,
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, PortSide::Left | PortSide::Right)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Source,
    Target,
    Both,
}

impl PortKind {
    pub fn accepts_source(self) -> bool {
        matches!(self, PortKind::Source | PortKind::Both)
    }

    pub fn accepts_target(self) -> bool {
        matches!(self, PortKind::Target | PortKind::Both)
    }
}

/// Port geometry as measured by the renderer, local to the owning node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub node_id: String,
    pub side: PortSide,
    pub position: Point,
    pub size: Size,
    pub kind: PortKind,
}

impl Port {
    pub fn rect_at(&self, node_position: Point) -> Rect {
        Rect::new(
            node_position.x + self.position.x,
            node_position.y + self.position.y,
            self.size.width,
            self.size.height,
        )
    }

    pub fn center_at(&self, node_position: Point) -> Point {
        self.rect_at(node_position).center()
    }
}

/// Where a label sits on its edge: a fraction of the path length, or an
/// absolute pixel offset (negative = from the end). Serializes the pixel
/// form as a `"12px"` string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionOnEdge {
    Fraction(f32),
    Pixels(f32),
}

impl PositionOnEdge {
    pub fn parse(text: &str) -> Option<Self> {
        let caps = PX_OFFSET_RE.captures(text)?;
        caps[1].parse().ok().map(PositionOnEdge::Pixels)
    }
}

impl Default for PositionOnEdge {
    fn default() -> Self {
        PositionOnEdge::Fraction(0.5)
    }
}

impl Serialize for PositionOnEdge {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            PositionOnEdge::Fraction(value) => serializer.serialize_f32(*value),
            PositionOnEdge::Pixels(px) => serializer.serialize_str(&format!("{px}px")),
        }
    }
}

impl<'de> Deserialize<'de> for PositionOnEdge {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(PositionOnEdge::Fraction(value)),
            Raw::Text(text) => PositionOnEdge::parse(&text).ok_or_else(|| {
                serde::de::Error::custom(format!("invalid position-on-edge `{text}`"))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub id: String,
    pub position_on_edge: PositionOnEdge,
    /// Resolved pixel position on the routed path.
    pub position: Option<Point>,
    /// Measured by the renderer once the label exists in the DOM.
    pub size: Option<Size>,
}

impl EdgeLabel {
    pub fn new(id: impl Into<String>, position_on_edge: PositionOnEdge) -> Self {
        Self {
            id: id.into(),
            position_on_edge,
            position: None,
            size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub id: String,
    pub position: Point,
    pub size: Option<Size>,
    /// Rotation in degrees, clockwise.
    pub angle: f32,
    pub z_order: Option<i32>,
    pub selected: bool,
    pub resizable: bool,
    pub rotatable: bool,
    /// Group nodes contain other nodes and aggregate their bounds.
    pub group: bool,
    /// Owning group, if any.
    pub group_id: Option<String>,
    pub data: serde_json::Value,
    /// Port geometry once rendered. `Some(vec![])` means measured with no
    /// ports; `None` means the renderer has not reported yet.
    pub measured_ports: Option<Vec<Port>>,
    /// Derived by the bounds middleware; never hand-edited.
    pub measured_bounds: Option<Bounds>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            id: String::new(),
            position: Point::default(),
            size: None,
            angle: 0.0,
            z_order: None,
            selected: false,
            resizable: true,
            rotatable: true,
            group: false,
            group_id: None,
            data: serde_json::Value::Null,
            measured_ports: None,
            measured_bounds: None,
        }
    }
}

impl Node {
    pub fn new(id: impl Into<String>, position: Point) -> Self {
        Self {
            id: id.into(),
            position,
            ..Self::default()
        }
    }

    pub fn rect(&self) -> Option<Rect> {
        self.size.map(|size| Rect::from_parts(self.position, size))
    }

    /// A node counts as measured once both its size and its port set have
    /// been reported by the renderer.
    pub fn is_measured(&self) -> bool {
        self.size.is_some() && self.measured_ports.is_some()
    }

    pub fn port(&self, port_id: &str) -> Option<&Port> {
        self.measured_ports
            .as_deref()?
            .iter()
            .find(|port| port.id == port_id)
    }

    /// Absolute rects of all measured ports.
    pub fn port_rects(&self) -> Vec<Rect> {
        self.measured_ports
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|port| port.rect_at(self.position))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Edge {
    pub id: String,
    pub source: String,
    /// Empty while a linking gesture has not resolved a target yet.
    pub target: String,
    pub source_port: Option<String>,
    pub target_port: Option<String>,
    /// Named routing algorithm; `None` uses the manager default.
    pub routing: Option<String>,
    pub routing_mode: RoutingMode,
    pub points: Vec<Point>,
    pub source_position: Option<Point>,
    pub target_position: Option<Point>,
    pub measured_labels: Vec<EdgeLabel>,
    pub selected: bool,
    /// Set only on the in-progress linking edge; never part of persisted
    /// state.
    pub temporary: bool,
    pub z_order: Option<i32>,
    pub data: serde_json::Value,
}

impl Default for Edge {
    fn default() -> Self {
        Self {
            id: String::new(),
            source: String::new(),
            target: String::new(),
            source_port: None,
            target_port: None,
            routing: None,
            routing_mode: RoutingMode::Auto,
            points: Vec::new(),
            source_position: None,
            target_position: None,
            measured_labels: Vec::new(),
            selected: false,
            temporary: false,
            z_order: None,
            data: serde_json::Value::Null,
        }
    }
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            width: 0.0,
            height: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub viewport: Viewport,
    /// Per-middleware configuration, keyed by middleware name.
    pub middleware_config: BTreeMap<String, serde_json::Value>,
}

/// The single source of truth. Replaced wholesale on every committed
/// action, never mutated in place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowState {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub metadata: Metadata,
}

impl FlowState {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.id == id)
    }

    pub fn selected_node_ids(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| node.selected)
            .map(|node| node.id.as_str())
            .collect()
    }

    pub fn selected_edge_ids(&self) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|edge| edge.selected)
            .map(|edge| edge.id.as_str())
            .collect()
    }

    /// The state with in-progress linking artifacts stripped, suitable for
    /// saving.
    pub fn persistable(&self) -> FlowState {
        FlowState {
            nodes: self.nodes.clone(),
            edges: self
                .edges
                .iter()
                .filter(|edge| !edge.temporary)
                .cloned()
                .collect(),
            metadata: self.metadata.clone(),
        }
    }
}

// ── Partial updates ─────────────────────────────────────────────────

/// Per-field node patch. `None` leaves the field untouched; double options
/// distinguish "leave" from "clear".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub id: String,
    pub position: Option<Point>,
    pub size: Option<Size>,
    pub angle: Option<f32>,
    pub z_order: Option<i32>,
    pub selected: Option<bool>,
    pub group_id: Option<Option<String>>,
    pub data: Option<serde_json::Value>,
    pub measured_ports: Option<Vec<Port>>,
    pub measured_bounds: Option<Bounds>,
}

impl NodeUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, node: &mut Node) {
        if let Some(position) = self.position {
            node.position = position;
        }
        if let Some(size) = self.size {
            node.size = Some(size);
        }
        if let Some(angle) = self.angle {
            node.angle = angle;
        }
        if let Some(z_order) = self.z_order {
            node.z_order = Some(z_order);
        }
        if let Some(selected) = self.selected {
            node.selected = selected;
        }
        if let Some(group_id) = &self.group_id {
            node.group_id = group_id.clone();
        }
        if let Some(data) = &self.data {
            node.data = data.clone();
        }
        if let Some(ports) = &self.measured_ports {
            node.measured_ports = Some(ports.clone());
        }
        if let Some(bounds) = self.measured_bounds {
            node.measured_bounds = Some(bounds);
        }
    }

    fn merge_from(&mut self, other: NodeUpdate) {
        if other.position.is_some() {
            self.position = other.position;
        }
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.angle.is_some() {
            self.angle = other.angle;
        }
        if other.z_order.is_some() {
            self.z_order = other.z_order;
        }
        if other.selected.is_some() {
            self.selected = other.selected;
        }
        if other.group_id.is_some() {
            self.group_id = other.group_id;
        }
        if other.data.is_some() {
            self.data = other.data;
        }
        if other.measured_ports.is_some() {
            self.measured_ports = other.measured_ports;
        }
        if other.measured_bounds.is_some() {
            self.measured_bounds = other.measured_bounds;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeUpdate {
    pub id: String,
    pub source: Option<String>,
    pub target: Option<String>,
    pub source_port: Option<Option<String>>,
    pub target_port: Option<Option<String>>,
    pub routing: Option<Option<String>>,
    pub routing_mode: Option<RoutingMode>,
    pub points: Option<Vec<Point>>,
    pub source_position: Option<Point>,
    pub target_position: Option<Point>,
    pub measured_labels: Option<Vec<EdgeLabel>>,
    pub selected: Option<bool>,
    pub z_order: Option<i32>,
    pub data: Option<serde_json::Value>,
}

impl EdgeUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, edge: &mut Edge) {
        if let Some(source) = &self.source {
            edge.source = source.clone();
        }
        if let Some(target) = &self.target {
            edge.target = target.clone();
        }
        if let Some(source_port) = &self.source_port {
            edge.source_port = source_port.clone();
        }
        if let Some(target_port) = &self.target_port {
            edge.target_port = target_port.clone();
        }
        if let Some(routing) = &self.routing {
            edge.routing = routing.clone();
        }
        if let Some(routing_mode) = self.routing_mode {
            edge.routing_mode = routing_mode;
        }
        if let Some(points) = &self.points {
            edge.points = points.clone();
        }
        if let Some(position) = self.source_position {
            edge.source_position = Some(position);
        }
        if let Some(position) = self.target_position {
            edge.target_position = Some(position);
        }
        if let Some(labels) = &self.measured_labels {
            edge.measured_labels = labels.clone();
        }
        if let Some(selected) = self.selected {
            edge.selected = selected;
        }
        if let Some(z_order) = self.z_order {
            edge.z_order = Some(z_order);
        }
        if let Some(data) = &self.data {
            edge.data = data.clone();
        }
    }

    fn merge_from(&mut self, other: EdgeUpdate) {
        if other.source.is_some() {
            self.source = other.source;
        }
        if other.target.is_some() {
            self.target = other.target;
        }
        if other.source_port.is_some() {
            self.source_port = other.source_port;
        }
        if other.target_port.is_some() {
            self.target_port = other.target_port;
        }
        if other.routing.is_some() {
            self.routing = other.routing;
        }
        if other.routing_mode.is_some() {
            self.routing_mode = other.routing_mode;
        }
        if other.points.is_some() {
            self.points = other.points;
        }
        if other.source_position.is_some() {
            self.source_position = other.source_position;
        }
        if other.target_position.is_some() {
            self.target_position = other.target_position;
        }
        if other.measured_labels.is_some() {
            self.measured_labels = other.measured_labels;
        }
        if other.selected.is_some() {
            self.selected = other.selected;
        }
        if other.z_order.is_some() {
            self.z_order = other.z_order;
        }
        if other.data.is_some() {
            self.data = other.data;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    pub viewport: Option<Viewport>,
    /// Entries overwrite the existing key wholesale.
    pub middleware_config: BTreeMap<String, serde_json::Value>,
}

impl MetadataUpdate {
    pub fn viewport(viewport: Viewport) -> Self {
        Self {
            viewport: Some(viewport),
            middleware_config: BTreeMap::new(),
        }
    }

    pub fn apply_to(&self, metadata: &mut Metadata) {
        if let Some(viewport) = self.viewport {
            metadata.viewport = viewport;
        }
        for (key, value) in &self.middleware_config {
            metadata
                .middleware_config
                .insert(key.clone(), value.clone());
        }
    }

    fn merge_from(&mut self, other: MetadataUpdate) {
        if other.viewport.is_some() {
            self.viewport = other.viewport;
        }
        self.middleware_config.extend(other.middleware_config);
    }
}

/// The partial delta one action (or one middleware) contributes. Merging is
/// field-wise per entity id; the later writer wins.
#[derive(Debug, Clone, Default)]
pub struct FlowStateUpdate {
    pub nodes_to_add: Vec<Node>,
    pub nodes_to_update: Vec<NodeUpdate>,
    pub nodes_to_remove: Vec<String>,
    pub edges_to_add: Vec<Edge>,
    pub edges_to_update: Vec<EdgeUpdate>,
    pub edges_to_remove: Vec<String>,
    pub metadata: Option<MetadataUpdate>,
}

impl FlowStateUpdate {
    pub fn add_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes_to_add: nodes,
            ..Self::default()
        }
    }

    pub fn add_edges(edges: Vec<Edge>) -> Self {
        Self {
            edges_to_add: edges,
            ..Self::default()
        }
    }

    pub fn update_nodes(updates: Vec<NodeUpdate>) -> Self {
        Self {
            nodes_to_update: updates,
            ..Self::default()
        }
    }

    pub fn update_edges(updates: Vec<EdgeUpdate>) -> Self {
        Self {
            edges_to_update: updates,
            ..Self::default()
        }
    }

    pub fn update_metadata(update: MetadataUpdate) -> Self {
        Self {
            metadata: Some(update),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_to_add.is_empty()
            && self.nodes_to_update.is_empty()
            && self.nodes_to_remove.is_empty()
            && self.edges_to_add.is_empty()
            && self.edges_to_update.is_empty()
            && self.edges_to_remove.is_empty()
            && self.metadata.is_none()
    }

    pub fn merge(&mut self, other: FlowStateUpdate) {
        for node in other.nodes_to_add {
            match self.nodes_to_add.iter_mut().find(|n| n.id == node.id) {
                Some(existing) => *existing = node,
                None => self.nodes_to_add.push(node),
            }
        }
        for update in other.nodes_to_update {
            match self
                .nodes_to_update
                .iter_mut()
                .find(|u| u.id == update.id)
            {
                Some(existing) => existing.merge_from(update),
                None => self.nodes_to_update.push(update),
            }
        }
        for id in other.nodes_to_remove {
            if !self.nodes_to_remove.contains(&id) {
                self.nodes_to_remove.push(id);
            }
        }
        for edge in other.edges_to_add {
            match self.edges_to_add.iter_mut().find(|e| e.id == edge.id) {
                Some(existing) => *existing = edge,
                None => self.edges_to_add.push(edge),
            }
        }
        for update in other.edges_to_update {
            match self
                .edges_to_update
                .iter_mut()
                .find(|u| u.id == update.id)
            {
                Some(existing) => existing.merge_from(update),
                None => self.edges_to_update.push(update),
            }
        }
        for id in other.edges_to_remove {
            if !self.edges_to_remove.contains(&id) {
                self.edges_to_remove.push(id);
            }
        }
        if let Some(metadata) = other.metadata {
            match &mut self.metadata {
                Some(existing) => existing.merge_from(metadata),
                None => self.metadata = Some(metadata),
            }
        }
    }
}

// ── Field-level diffing ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeField {
    Position,
    Size,
    Angle,
    ZOrder,
    Selected,
    GroupId,
    Data,
    MeasuredPorts,
    MeasuredBounds,
}

pub fn node_field_changed(a: &Node, b: &Node, field: NodeField) -> bool {
    match field {
        NodeField::Position => a.position != b.position,
        NodeField::Size => a.size != b.size,
        NodeField::Angle => a.angle != b.angle,
        NodeField::ZOrder => a.z_order != b.z_order,
        NodeField::Selected => a.selected != b.selected,
        NodeField::GroupId => a.group_id != b.group_id,
        NodeField::Data => a.data != b.data,
        NodeField::MeasuredPorts => a.measured_ports != b.measured_ports,
        NodeField::MeasuredBounds => a.measured_bounds != b.measured_bounds,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeField {
    Source,
    Target,
    SourcePort,
    TargetPort,
    Routing,
    RoutingMode,
    Points,
    SourcePosition,
    TargetPosition,
    MeasuredLabels,
    Selected,
    ZOrder,
    Data,
}

pub fn edge_field_changed(a: &Edge, b: &Edge, field: EdgeField) -> bool {
    match field {
        EdgeField::Source => a.source != b.source,
        EdgeField::Target => a.target != b.target,
        EdgeField::SourcePort => a.source_port != b.source_port,
        EdgeField::TargetPort => a.target_port != b.target_port,
        EdgeField::Routing => a.routing != b.routing,
        EdgeField::RoutingMode => a.routing_mode != b.routing_mode,
        EdgeField::Points => a.points != b.points,
        EdgeField::SourcePosition => a.source_position != b.source_position,
        EdgeField::TargetPosition => a.target_position != b.target_position,
        EdgeField::MeasuredLabels => a.measured_labels != b.measured_labels,
        EdgeField::Selected => a.selected != b.selected,
        EdgeField::ZOrder => a.z_order != b.z_order,
        EdgeField::Data => a.data != b.data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_on_edge_parses_pixel_offsets() {
        assert_eq!(
            PositionOnEdge::parse("24px"),
            Some(PositionOnEdge::Pixels(24.0))
        );
        assert_eq!(
            PositionOnEdge::parse("-30.5px"),
            Some(PositionOnEdge::Pixels(-30.5))
        );
        assert_eq!(PositionOnEdge::parse("24"), None);
        assert_eq!(PositionOnEdge::parse("px"), None);
    }

    #[test]
    fn position_on_edge_round_trips_through_serde() {
        let fraction: PositionOnEdge = serde_json::from_str("0.25").unwrap();
        assert_eq!(fraction, PositionOnEdge::Fraction(0.25));

        let pixels: PositionOnEdge = serde_json::from_str("\"-16px\"").unwrap();
        assert_eq!(pixels, PositionOnEdge::Pixels(-16.0));

        let json = serde_json::to_string(&PositionOnEdge::Pixels(12.0)).unwrap();
        assert_eq!(json, "\"12px\"");
    }

    #[test]
    fn later_update_wins_per_field() {
        let mut base = FlowStateUpdate::update_nodes(vec![NodeUpdate {
            id: "a".into(),
            position: Some(Point::new(1.0, 1.0)),
            selected: Some(true),
            ..NodeUpdate::default()
        }]);
        base.merge(FlowStateUpdate::update_nodes(vec![NodeUpdate {
            id: "a".into(),
            position: Some(Point::new(9.0, 9.0)),
            ..NodeUpdate::default()
        }]));

        assert_eq!(base.nodes_to_update.len(), 1);
        let merged = &base.nodes_to_update[0];
        assert_eq!(merged.position, Some(Point::new(9.0, 9.0)));
        // Untouched fields from the earlier writer survive.
        assert_eq!(merged.selected, Some(true));
    }

    #[test]
    fn persistable_state_drops_temporary_edges() {
        let mut state = FlowState::default();
        state.edges.push(Edge::new("e1", "a", "b"));
        let mut temp = Edge::new("linking", "a", "");
        temp.temporary = true;
        state.edges.push(temp);

        let persisted = state.persistable();
        assert_eq!(persisted.edges.len(), 1);
        assert_eq!(persisted.edges[0].id, "e1");
    }
}
