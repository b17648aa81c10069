//! Registry of named edge-routing algorithms.

mod bezier;
mod orthogonal;
mod polyline;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::RoutingConfig;
use crate::geometry::{self, Point};
use crate::model::{PortSide, PositionOnEdge};

pub use bezier::BezierRouting;
pub use orthogonal::OrthogonalRouting;
pub use polyline::PolylineRouting;

pub const ORTHOGONAL: &str = "orthogonal";
pub const BEZIER: &str = "bezier";
pub const POLYLINE: &str = "polyline";

/// Resolved endpoints an algorithm routes between.
#[derive(Debug, Clone, Copy)]
pub struct EdgeRoutingContext {
    pub source: Point,
    pub source_side: PortSide,
    pub target: Point,
    pub target_side: PortSide,
}

pub trait EdgeRouting {
    fn compute_points(&self, ctx: &EdgeRoutingContext, config: &RoutingConfig) -> Vec<Point>;

    fn compute_svg_path(&self, points: &[Point], config: &RoutingConfig) -> String;

    /// Point at `fraction` in [0,1] of the path. `None` delegates to the
    /// manager's linear fallback.
    fn compute_point_on_path(&self, points: &[Point], fraction: f32) -> Option<Point>;

    /// Point at a signed pixel distance along the path (negative = from the
    /// end). `None` delegates to the manager's linear fallback.
    fn compute_point_at_distance(&self, points: &[Point], distance: f32) -> Option<Point>;
}

/// Per-engine registry. Built-ins are registered at construction; custom
/// algorithms are pure additions. Resolution never fails: unknown names warn
/// and fall back to the default, then to a straight line.
pub struct RoutingManager {
    routings: BTreeMap<String, Arc<dyn EdgeRouting>>,
    default_routing: String,
}

impl RoutingManager {
    pub fn new(default_routing: Option<&str>) -> Self {
        let mut routings: BTreeMap<String, Arc<dyn EdgeRouting>> = BTreeMap::new();
        routings.insert(ORTHOGONAL.to_string(), Arc::new(OrthogonalRouting));
        routings.insert(BEZIER.to_string(), Arc::new(BezierRouting));
        routings.insert(POLYLINE.to_string(), Arc::new(PolylineRouting));
        Self {
            routings,
            default_routing: default_routing.unwrap_or(ORTHOGONAL).to_string(),
        }
    }

    pub fn default_routing(&self) -> &str {
        &self.default_routing
    }

    pub fn register(&mut self, name: &str, routing: Arc<dyn EdgeRouting>) {
        if name.trim().is_empty() {
            tracing::warn!("refusing to register a routing with an empty name");
            return;
        }
        self.routings.insert(name.to_string(), routing);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.routings.remove(name).is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.routings.contains_key(name)
    }

    fn resolve(&self, name: Option<&str>) -> Option<&Arc<dyn EdgeRouting>> {
        if let Some(name) = name {
            if let Some(routing) = self.routings.get(name) {
                return Some(routing);
            }
            tracing::warn!(
                routing = name,
                fallback = %self.default_routing,
                "unknown routing, falling back to default"
            );
        }
        self.routings.get(&self.default_routing)
    }

    pub fn compute_points(
        &self,
        name: Option<&str>,
        ctx: &EdgeRoutingContext,
        config: &RoutingConfig,
    ) -> Vec<Point> {
        match self.resolve(name) {
            Some(routing) => routing.compute_points(ctx, config),
            None => vec![ctx.source, ctx.target],
        }
    }

    pub fn compute_svg_path(
        &self,
        name: Option<&str>,
        points: &[Point],
        config: &RoutingConfig,
    ) -> String {
        match self.resolve(name) {
            Some(routing) => routing.compute_svg_path(points, config),
            None => linear_svg_path(points),
        }
    }

    pub fn point_on_path(&self, name: Option<&str>, points: &[Point], fraction: f32) -> Point {
        self.resolve(name)
            .and_then(|routing| routing.compute_point_on_path(points, fraction))
            .unwrap_or_else(|| endpoint_lerp(points, fraction.clamp(0.0, 1.0)))
    }

    pub fn point_at_distance(&self, name: Option<&str>, points: &[Point], distance: f32) -> Point {
        self.resolve(name)
            .and_then(|routing| routing.compute_point_at_distance(points, distance))
            .unwrap_or_else(|| {
                let total = geometry::path_length(points);
                let target = if distance < 0.0 {
                    total + distance
                } else {
                    distance
                };
                let fraction = if total > f32::EPSILON {
                    (target / total).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                endpoint_lerp(points, fraction)
            })
    }

    /// Resolve a label's pixel position, dispatching on how the position on
    /// the edge is expressed.
    pub fn resolve_label_position(
        &self,
        name: Option<&str>,
        points: &[Point],
        position_on_edge: PositionOnEdge,
    ) -> Point {
        match position_on_edge {
            PositionOnEdge::Fraction(fraction) => self.point_on_path(name, points, fraction),
            PositionOnEdge::Pixels(px) => self.point_at_distance(name, points, px),
        }
    }
}

/// `M .. L ..` chain through every point.
pub(crate) fn linear_svg_path(points: &[Point]) -> String {
    let Some(first) = points.first() else {
        return String::new();
    };
    let mut d = format!("M {:.2} {:.2}", first.x, first.y);
    for point in points.iter().skip(1) {
        d.push_str(&format!(" L {:.2} {:.2}", point.x, point.y));
    }
    d
}

/// Straight-line interpolation between the first and last point, the safe
/// fallback when an algorithm has no distance/percentage queries.
fn endpoint_lerp(points: &[Point], t: f32) -> Point {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) => first.lerp(*last, t),
        _ => Point::default(),
    }
}
