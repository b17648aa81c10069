use crate::config::RoutingConfig;
use crate::geometry::{self, Point};
use crate::model::PortSide;

use super::{EdgeRouting, EdgeRoutingContext, linear_svg_path};

/// Radii below this produce arcs indistinguishable from a corner.
const MIN_ARC_RADIUS: f32 = 0.5;

/// Right-angle routing with straight port lead-outs and rounded corners.
pub struct OrthogonalRouting;

impl EdgeRouting for OrthogonalRouting {
    fn compute_points(&self, ctx: &EdgeRoutingContext, config: &RoutingConfig) -> Vec<Point> {
        let lead_out = config.first_segment_length.max(0.0);
        let lead_in = config.last_segment_length.max(0.0);
        let start_dir = ctx.source_side.direction();
        let end_dir = ctx.target_side.direction();
        let start = Point::new(
            ctx.source.x + start_dir.x * lead_out,
            ctx.source.y + start_dir.y * lead_out,
        );
        let end = Point::new(
            ctx.target.x + end_dir.x * lead_in,
            ctx.target.y + end_dir.y * lead_in,
        );

        let mut points = Vec::with_capacity(6);
        points.push(ctx.source);
        points.push(start);
        points.extend(middle_points(
            start,
            end,
            ctx.source_side,
            ctx.target_side,
        ));
        points.push(end);
        points.push(ctx.target);
        dedupe_consecutive(points)
    }

    fn compute_svg_path(&self, points: &[Point], config: &RoutingConfig) -> String {
        let points = geometry::compress_collinear(points, config.collinear_epsilon.max(0.0));
        if points.len() < 2 {
            return linear_svg_path(&points);
        }
        if points.len() == 2 {
            return linear_svg_path(&points);
        }

        let max_radius = config.max_corner_radius.max(0.0);
        let mut d = format!("M {:.2} {:.2}", points[0].x, points[0].y);
        for idx in 1..points.len() - 1 {
            let prev = points[idx - 1];
            let corner = points[idx];
            let next = points[idx + 1];
            let len_in = prev.distance_to(corner);
            let len_out = corner.distance_to(next);
            let radius = (len_in / 2.0).min(len_out / 2.0).min(max_radius);
            if radius < MIN_ARC_RADIUS {
                d.push_str(&format!(" L {:.2} {:.2}", corner.x, corner.y));
                continue;
            }
            let arc_start = corner.lerp(prev, radius / len_in);
            let arc_end = corner.lerp(next, radius / len_out);
            let sweep = arc_sweep(prev, corner, next);
            d.push_str(&format!(
                " L {:.2} {:.2} A {radius:.2} {radius:.2} 0 0 {sweep} {:.2} {:.2}",
                arc_start.x, arc_start.y, arc_end.x, arc_end.y
            ));
        }
        let last = points[points.len() - 1];
        d.push_str(&format!(" L {:.2} {:.2}", last.x, last.y));
        d
    }

    fn compute_point_on_path(&self, points: &[Point], fraction: f32) -> Option<Point> {
        geometry::point_at_fraction(points, fraction)
    }

    fn compute_point_at_distance(&self, points: &[Point], distance: f32) -> Option<Point> {
        geometry::point_at_distance(points, distance)
    }
}

/// Interior waypoints connecting the two lead-out endpoints with
/// right-angle segments.
fn middle_points(start: Point, end: Point, start_side: PortSide, end_side: PortSide) -> Vec<Point> {
    match (start_side.is_horizontal(), end_side.is_horizontal()) {
        // Both ports exit horizontally: one vertical channel halfway.
        (true, true) => {
            let mid_x = (start.x + end.x) / 2.0;
            vec![Point::new(mid_x, start.y), Point::new(mid_x, end.y)]
        }
        // Both exit vertically: one horizontal channel halfway.
        (false, false) => {
            let mid_y = (start.y + end.y) / 2.0;
            vec![Point::new(start.x, mid_y), Point::new(end.x, mid_y)]
        }
        // Mixed axes need a single corner.
        (true, false) => vec![Point::new(end.x, start.y)],
        (false, true) => vec![Point::new(start.x, end.y)],
    }
}

/// SVG arc sweep flag for the turn at `corner`: 1 for a clockwise arc in
/// screen coordinates, 0 for counter-clockwise, from the cross product of
/// the incoming and outgoing directions.
fn arc_sweep(prev: Point, corner: Point, next: Point) -> u8 {
    let cross = (corner.x - prev.x) * (next.y - corner.y) - (corner.y - prev.y) * (next.x - corner.x);
    if cross > 0.0 { 1 } else { 0 }
}

fn dedupe_consecutive(points: Vec<Point>) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for point in points {
        if out
            .last()
            .is_none_or(|last| last.distance_to(point) > f32::EPSILON)
        {
            out.push(point);
        }
    }
    out
}
