use serde::{Deserialize, Serialize};

/// Engine-level configuration. Per-middleware overrides ride in
/// `Metadata::middleware_config`, keyed by middleware name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    pub routing: RoutingConfig,
    pub z_order: ZOrderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Routing used when an edge names none. Unset falls back to
    /// `orthogonal`.
    pub default_routing: Option<String>,
    /// Straight lead-out length from the source port.
    pub first_segment_length: f32,
    /// Straight lead-in length into the target port.
    pub last_segment_length: f32,
    /// Cap on the corner radius of orthogonal paths.
    pub max_corner_radius: f32,
    /// Points closer than this to the segment between their neighbours are
    /// elided before path generation.
    pub collinear_epsilon: f32,
    /// Distance of the bezier control points from their endpoints.
    pub bezier_control_distance: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_routing: None,
            first_segment_length: 20.0,
            last_segment_length: 20.0,
            max_corner_radius: 16.0,
            collinear_epsilon: 1.0,
            bezier_control_distance: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZOrderConfig {
    /// Added to the computed z-order of selected nodes and edges.
    pub selected_boost: i32,
    /// Stamped on the temporary linking edge so it renders above everything.
    pub temporary_edge_z_index: i32,
}

impl Default for ZOrderConfig {
    fn default() -> Self {
        Self {
            selected_boost: 1000,
            temporary_edge_z_index: 10_000,
        }
    }
}
