use crate::geometry::{Point, Size};

/// An in-progress link-drawing gesture and its temporary edge.
#[derive(Debug, Clone)]
pub struct LinkingState {
    /// Id of the temporary edge created for the gesture.
    pub edge_id: String,
    pub source: String,
    pub source_port: Option<String>,
    /// Current pointer position, the floating end of the temporary edge.
    pub pointer: Point,
    /// Snapped target while the pointer hovers a valid node/port.
    pub target: Option<String>,
    pub target_port: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResizeState {
    pub node_id: String,
    pub initial_position: Point,
    pub initial_size: Option<Size>,
}

#[derive(Debug, Clone)]
pub struct RotationState {
    pub node_id: String,
    pub initial_angle: f32,
}

/// Transient interaction state. Gestures are explicit: they begin with a
/// start action and are cleared only by an end/cancel action, never by
/// timeout.
#[derive(Debug, Default)]
pub struct ActionStateManager {
    linking: Option<LinkingState>,
    resize: Option<ResizeState>,
    rotation: Option<RotationState>,
}

impl ActionStateManager {
    pub fn begin_linking(&mut self, state: LinkingState) {
        self.linking = Some(state);
    }

    pub fn linking(&self) -> Option<&LinkingState> {
        self.linking.as_ref()
    }

    pub fn linking_mut(&mut self) -> Option<&mut LinkingState> {
        self.linking.as_mut()
    }

    pub fn end_linking(&mut self) -> Option<LinkingState> {
        self.linking.take()
    }

    pub fn is_linking(&self) -> bool {
        self.linking.is_some()
    }

    pub fn begin_resize(&mut self, state: ResizeState) {
        self.resize = Some(state);
    }

    pub fn resize(&self) -> Option<&ResizeState> {
        self.resize.as_ref()
    }

    pub fn end_resize(&mut self) -> Option<ResizeState> {
        self.resize.take()
    }

    pub fn is_resizing(&self) -> bool {
        self.resize.is_some()
    }

    pub fn begin_rotation(&mut self, state: RotationState) {
        self.rotation = Some(state);
    }

    pub fn rotation(&self) -> Option<&RotationState> {
        self.rotation.as_ref()
    }

    pub fn end_rotation(&mut self) -> Option<RotationState> {
        self.rotation.take()
    }

    pub fn is_rotating(&self) -> bool {
        self.rotation.is_some()
    }

    pub fn clear(&mut self) {
        self.linking = None;
        self.resize = None;
        self.rotation = None;
    }
}
