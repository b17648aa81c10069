use crate::config::RoutingConfig;
use crate::geometry::{self, Point};

use super::{EdgeRouting, EdgeRoutingContext, linear_svg_path};

/// Straight segments through every point; the simplest routing and the
/// reference for length-based queries.
pub struct PolylineRouting;

impl EdgeRouting for PolylineRouting {
    fn compute_points(&self, ctx: &EdgeRoutingContext, _config: &RoutingConfig) -> Vec<Point> {
        vec![ctx.source, ctx.target]
    }

    fn compute_svg_path(&self, points: &[Point], _config: &RoutingConfig) -> String {
        linear_svg_path(points)
    }

    fn compute_point_on_path(&self, points: &[Point], fraction: f32) -> Option<Point> {
        geometry::point_at_fraction(points, fraction)
    }

    fn compute_point_at_distance(&self, points: &[Point], distance: f32) -> Option<Point> {
        geometry::point_at_distance(points, distance)
    }
}
