use serde::{Deserialize, Serialize};

/// Two collinear segments whose middle point deviates less than this are
/// treated as one segment.
pub const COLLINEAR_EPSILON: f32 = 1.0;

/// Rotations within this many degrees of a full turn are treated as none.
const ANGLE_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(self, other: Point, t: f32) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Rotate this point about `center` by `degrees` (clockwise in screen
    /// coordinates, where y grows downward).
    pub fn rotate_around(self, center: Point, degrees: f32) -> Point {
        if degrees.rem_euclid(360.0).abs() < ANGLE_EPSILON
            || (degrees.rem_euclid(360.0) - 360.0).abs() < ANGLE_EPSILON
        {
            return self;
        }
        let radians = degrees.to_radians();
        let (sin, cos) = radians.sin_cos();
        let dx = self.x - center.x;
        let dy = self.y - center.y;
        Point {
            x: center.x + dx * cos - dy * sin,
            y: center.y + dx * sin + dy * cos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_parts(position: Point, size: Size) -> Self {
        Self {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.x + self.width, self.y),
            Point::new(self.x + self.width, self.y + self.height),
            Point::new(self.x, self.y + self.height),
        ]
    }

    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    /// Distance from `point` to the closest edge of the rect, 0 when inside.
    pub fn distance_to_point(&self, point: Point) -> f32 {
        let dx = (self.x - point.x).max(0.0).max(point.x - (self.x + self.width));
        let dy = (self.y - point.y)
            .max(0.0)
            .max(point.y - (self.y + self.height));
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn from_rect(rect: Rect) -> Self {
        Self {
            min_x: rect.x,
            min_y: rect.y,
            max_x: rect.x + rect.width,
            max_y: rect.y + rect.height,
        }
    }

    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Point>,
    {
        let mut bounds: Option<Bounds> = None;
        for point in points {
            bounds = Some(match bounds {
                Some(b) => Bounds {
                    min_x: b.min_x.min(point.x),
                    min_y: b.min_y.min(point.y),
                    max_x: b.max_x.max(point.x),
                    max_y: b.max_y.max(point.y),
                },
                None => Bounds {
                    min_x: point.x,
                    min_y: point.y,
                    max_x: point.x,
                    max_y: point.y,
                },
            });
        }
        bounds
    }

    pub fn to_rect(&self) -> Rect {
        Rect {
            x: self.min_x,
            y: self.min_y,
            width: self.max_x - self.min_x,
            height: self.max_y - self.min_y,
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.min_x + self.max_x) / 2.0,
            y: (self.min_y + self.max_y) / 2.0,
        }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn contains_point(&self, point: Point) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        self.to_rect().intersects(rect)
    }
}

/// Axis-aligned bounds of a node: the node rectangle expanded by any port
/// rectangle protruding past its edges, then (for a rotated node) the
/// bounding box of the expanded rectangle's rotated corners.
///
/// Port rects are absolute (already offset by the node position).
pub fn node_bounds(rect: Rect, angle: f32, port_rects: &[Rect]) -> Bounds {
    let mut expanded = Bounds::from_rect(rect);
    for port in port_rects {
        expanded = expanded.union(&Bounds::from_rect(*port));
    }
    if angle.rem_euclid(360.0).abs() < ANGLE_EPSILON
        || (angle.rem_euclid(360.0) - 360.0).abs() < ANGLE_EPSILON
    {
        return expanded;
    }
    let center = expanded.center();
    let rotated = expanded
        .to_rect()
        .corners()
        .map(|corner| corner.rotate_around(center, angle));
    Bounds::from_points(rotated).unwrap_or(expanded)
}

/// Union of child bounds, used for group nodes.
pub fn aggregate_bounds<I>(children: I) -> Option<Bounds>
where
    I: IntoIterator<Item = Bounds>,
{
    children.into_iter().reduce(|acc, b| acc.union(&b))
}

pub fn path_length(points: &[Point]) -> f32 {
    points
        .windows(2)
        .map(|pair| pair[0].distance_to(pair[1]))
        .sum()
}

/// Point at `fraction` (clamped to [0,1]) of the polyline's total length.
pub fn point_at_fraction(points: &[Point], fraction: f32) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let total = path_length(points);
    if total <= f32::EPSILON {
        return Some(points[0]);
    }
    point_at_distance(points, total * fraction.clamp(0.0, 1.0))
}

/// Point at `distance` pixels along the polyline. Negative distances walk
/// back from the end. Out-of-range distances clamp to the endpoints.
pub fn point_at_distance(points: &[Point], distance: f32) -> Option<Point> {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return None,
    };
    let total = path_length(points);
    let target = if distance < 0.0 {
        total + distance
    } else {
        distance
    };
    if target <= 0.0 {
        return Some(first);
    }
    if target >= total {
        return Some(last);
    }
    let mut walked = 0.0;
    for pair in points.windows(2) {
        let segment = pair[0].distance_to(pair[1]);
        if segment <= f32::EPSILON {
            continue;
        }
        if walked + segment >= target {
            let t = (target - walked) / segment;
            return Some(pair[0].lerp(pair[1], t));
        }
        walked += segment;
    }
    Some(last)
}

/// Drop points that sit on the segment between their neighbours (within
/// `epsilon` of the line) and consecutive duplicates.
pub fn compress_collinear(points: &[Point], epsilon: f32) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    out.push(points[0]);
    for idx in 1..points.len() - 1 {
        let prev = out[out.len() - 1];
        let curr = points[idx];
        let next = points[idx + 1];
        if curr.distance_to(prev) <= f32::EPSILON {
            continue;
        }
        if point_to_segment_distance(curr, prev, next) <= epsilon {
            continue;
        }
        out.push(curr);
    }
    let last = points[points.len() - 1];
    if last.distance_to(out[out.len() - 1]) > f32::EPSILON || out.len() == 1 {
        out.push(last);
    }
    out
}

fn point_to_segment_distance(point: Point, a: Point, b: Point) -> f32 {
    let len = a.distance_to(b);
    if len <= f32::EPSILON {
        return point.distance_to(a);
    }
    let cross = (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x);
    (cross / len).abs()
}
