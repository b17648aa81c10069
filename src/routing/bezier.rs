use crate::config::RoutingConfig;
use crate::geometry::{self, Point};

use super::{EdgeRouting, EdgeRoutingContext, linear_svg_path};

/// Segments used to approximate the cubic when walking it by length.
const CURVE_SAMPLES: usize = 32;

/// Cubic bezier routing. The two interior points of the four-point result
/// are the control points.
pub struct BezierRouting;

impl EdgeRouting for BezierRouting {
    fn compute_points(&self, ctx: &EdgeRoutingContext, config: &RoutingConfig) -> Vec<Point> {
        let offset = config.bezier_control_distance.max(0.0);
        let start_dir = ctx.source_side.direction();
        let end_dir = ctx.target_side.direction();
        vec![
            ctx.source,
            Point::new(
                ctx.source.x + start_dir.x * offset,
                ctx.source.y + start_dir.y * offset,
            ),
            Point::new(
                ctx.target.x + end_dir.x * offset,
                ctx.target.y + end_dir.y * offset,
            ),
            ctx.target,
        ]
    }

    fn compute_svg_path(&self, points: &[Point], _config: &RoutingConfig) -> String {
        if points.len() < 4 {
            // Too few points for a cubic; degrade to a straight line.
            return match (points.first(), points.last()) {
                (Some(first), Some(last)) if points.len() >= 2 => {
                    linear_svg_path(&[*first, *last])
                }
                _ => linear_svg_path(points),
            };
        }
        let [p0, p1, p2] = [points[0], points[1], points[2]];
        let p3 = points[points.len() - 1];
        format!(
            "M {:.2} {:.2} C {:.2} {:.2}, {:.2} {:.2}, {:.2} {:.2}",
            p0.x, p0.y, p1.x, p1.y, p2.x, p2.y, p3.x, p3.y
        )
    }

    fn compute_point_on_path(&self, points: &[Point], fraction: f32) -> Option<Point> {
        if points.len() < 4 {
            return geometry::point_at_fraction(points, fraction);
        }
        let samples = sample_cubic(points, CURVE_SAMPLES);
        geometry::point_at_fraction(&samples, fraction)
    }

    fn compute_point_at_distance(&self, points: &[Point], distance: f32) -> Option<Point> {
        if points.len() < 4 {
            return geometry::point_at_distance(points, distance);
        }
        let samples = sample_cubic(points, CURVE_SAMPLES);
        geometry::point_at_distance(&samples, distance)
    }
}

fn cubic_at(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let u = 1.0 - t;
    let a = u * u * u;
    let b = 3.0 * u * u * t;
    let c = 3.0 * u * t * t;
    let d = t * t * t;
    Point {
        x: a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        y: a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    }
}

/// Flatten the cubic into a polyline so length-based queries line up with
/// the curve the renderer draws.
fn sample_cubic(points: &[Point], samples: usize) -> Vec<Point> {
    let [p0, p1, p2] = [points[0], points[1], points[2]];
    let p3 = points[points.len() - 1];
    let samples = samples.max(2);
    (0..=samples)
        .map(|i| cubic_at(p0, p1, p2, p3, i as f32 / samples as f32))
        .collect()
}
