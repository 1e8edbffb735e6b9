// Planar geometry used by the labeling pipeline. Everything is in map units
// with y growing upwards; conversion to device space happens in MapToPixel.

use serde::{Deserialize, Serialize};

const NEAR_ZERO: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Rotate clockwise by `degrees` around `center`, the way map rotation is
    /// expressed.
    pub fn rotated(&self, degrees: f64, center: Point) -> Point {
        let rad = -degrees.to_radians();
        let (sin, cos) = rad.sin_cos();
        let dx = self.x - center.x;
        let dy = self.y - center.y;
        Point {
            x: center.x + dx * cos - dy * sin,
            y: center.y + dx * sin + dy * cos,
        }
    }
}

impl From<(f64, f64)> for Point {
    fn from(value: (f64, f64)) -> Self {
        Point::new(value.0, value.1)
    }
}

/// Axis-aligned rectangle anchored at its lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x: x_min.min(x_max),
            y: y_min.min(y_max),
            width: (x_max - x_min).abs(),
            height: (y_max - y_min).abs(),
        }
    }

    pub fn centered(center: Point, width: f64, height: f64) -> Self {
        Self::new(center.x - width / 2.0, center.y - height / 2.0, width, height)
    }

    pub fn x_max(&self) -> f64 {
        self.x + self.width
    }

    pub fn y_max(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.x_max(), self.y),
            Point::new(self.x_max(), self.y_max()),
            Point::new(self.x, self.y_max()),
        ]
    }

    pub fn grow(&self, delta: f64) -> Rect {
        Rect::new(
            self.x - delta,
            self.y - delta,
            self.width + delta * 2.0,
            self.height + delta * 2.0,
        )
    }

    /// Closed-interval intersection test; touching edges count as intersecting,
    /// matching the spatial index used for tile consistency.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.x_max()
            && other.x <= self.x_max()
            && self.y <= other.y_max()
            && other.y <= self.y_max()
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x_max() && p.y >= self.y && p.y <= self.y_max()
    }

    pub fn overlap_area(&self, other: &Rect) -> f64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x_max().min(other.x_max());
        let y1 = self.y_max().min(other.y_max());
        (x1 - x0).max(0.0) * (y1 - y0).max(0.0)
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.x_max().max(other.x_max()),
            self.y_max().max(other.y_max()),
        )
    }

    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(self.corners().to_vec())
    }
}

/// Simple polygon given by its exterior ring. The ring is stored open (the
/// first vertex is not repeated at the end).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    pub ring: Vec<Point>,
}

impl Polygon {
    pub fn new(mut ring: Vec<Point>) -> Self {
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        Self { ring }
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len() < 3
    }

    pub fn bounding_box(&self) -> Option<Rect> {
        bounding_box(&self.ring)
    }

    pub fn signed_area(&self) -> f64 {
        let n = self.ring.len();
        if n < 3 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..n {
            let a = self.ring[i];
            let b = self.ring[(i + 1) % n];
            sum += a.x * b.y - b.x * a.y;
        }
        sum / 2.0
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn centroid(&self) -> Option<Point> {
        let area = self.signed_area();
        if area.abs() < NEAR_ZERO {
            return vertex_mean(&self.ring);
        }
        let n = self.ring.len();
        let mut cx = 0.0;
        let mut cy = 0.0;
        for i in 0..n {
            let a = self.ring[i];
            let b = self.ring[(i + 1) % n];
            let cross = a.x * b.y - b.x * a.y;
            cx += (a.x + b.x) * cross;
            cy += (a.y + b.y) * cross;
        }
        Some(Point::new(cx / (6.0 * area), cy / (6.0 * area)))
    }

    /// Even-odd ray casting; points on the boundary may land on either side.
    pub fn contains_point(&self, p: Point) -> bool {
        let n = self.ring.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.ring[i];
            let b = self.ring[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    pub fn rotated(&self, degrees: f64, center: Point) -> Polygon {
        Polygon {
            ring: self
                .ring
                .iter()
                .map(|p| p.rotated(degrees, center))
                .collect(),
        }
    }

    /// True when any edge of the ring crosses any edge of the rectangle, or
    /// one contains a vertex of the other.
    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        let Some(bbox) = self.bounding_box() else {
            return false;
        };
        if !bbox.intersects(rect) {
            return false;
        }
        if rect.corners().iter().any(|c| self.contains_point(*c)) {
            return true;
        }
        if self.ring.iter().any(|p| rect.contains_point(*p)) {
            return true;
        }
        let corners = rect.corners();
        let n = self.ring.len();
        for i in 0..n {
            let a = self.ring[i];
            let b = self.ring[(i + 1) % n];
            for k in 0..4 {
                if segments_intersect(a, b, corners[k], corners[(k + 1) % 4]) {
                    return true;
                }
            }
        }
        false
    }
}

pub fn bounding_box(points: &[Point]) -> Option<Rect> {
    let first = points.first()?;
    let mut x_min = first.x;
    let mut y_min = first.y;
    let mut x_max = first.x;
    let mut y_max = first.y;
    for p in &points[1..] {
        x_min = x_min.min(p.x);
        y_min = y_min.min(p.y);
        x_max = x_max.max(p.x);
        y_max = y_max.max(p.y);
    }
    Some(Rect::from_corners(x_min, y_min, x_max, y_max))
}

fn vertex_mean(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    p.x >= a.x.min(b.x) - NEAR_ZERO
        && p.x <= a.x.max(b.x) + NEAR_ZERO
        && p.y >= a.y.min(b.y) - NEAR_ZERO
        && p.y <= a.y.max(b.y) + NEAR_ZERO
}

pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let o1 = orientation(a, b, c);
    let o2 = orientation(a, b, d);
    let o3 = orientation(c, d, a);
    let o4 = orientation(c, d, b);
    if ((o1 > 0.0 && o2 < 0.0) || (o1 < 0.0 && o2 > 0.0))
        && ((o3 > 0.0 && o4 < 0.0) || (o3 < 0.0 && o4 > 0.0))
    {
        return true;
    }
    (o1.abs() < NEAR_ZERO && on_segment(c, a, b))
        || (o2.abs() < NEAR_ZERO && on_segment(d, a, b))
        || (o3.abs() < NEAR_ZERO && on_segment(a, c, d))
        || (o4.abs() < NEAR_ZERO && on_segment(b, c, d))
}

pub fn polyline_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

/// Point and segment direction (degrees, counter-clockwise from +x) at
/// fraction `t` of the polyline's length.
pub fn point_along(points: &[Point], t: f64) -> Option<(Point, f64)> {
    if points.len() < 2 {
        return None;
    }
    let total = polyline_length(points);
    if total <= NEAR_ZERO {
        return None;
    }
    let target = total * t.clamp(0.0, 1.0);
    let mut walked = 0.0;
    for w in points.windows(2) {
        let seg = w[0].distance(&w[1]);
        if seg <= NEAR_ZERO {
            continue;
        }
        if walked + seg >= target {
            let local = (target - walked) / seg;
            let p = Point::new(
                w[0].x + (w[1].x - w[0].x) * local,
                w[0].y + (w[1].y - w[0].y) * local,
            );
            let angle = (w[1].y - w[0].y).atan2(w[1].x - w[0].x).to_degrees();
            return Some((p, angle));
        }
        walked += seg;
    }
    let n = points.len();
    let angle = (points[n - 1].y - points[n - 2].y)
        .atan2(points[n - 1].x - points[n - 2].x)
        .to_degrees();
    Some((points[n - 1], angle))
}

/// Axis-aligned bounds of a `width` x `height` box centred on `center` and
/// rotated counter-clockwise by `angle` degrees.
pub fn rotated_box_bounds(center: Point, width: f64, height: f64, angle: f64) -> Rect {
    if angle.abs() < NEAR_ZERO {
        return Rect::centered(center, width, height);
    }
    let (sin, cos) = angle.to_radians().sin_cos();
    let w = (width * cos).abs() + (height * sin).abs();
    let h = (width * sin).abs() + (height * cos).abs();
    Rect::centered(center, w, h)
}

/// The region labels may legally occupy: an outer polygon with blocking
/// regions chopped away from it.
///
/// The difference is kept symbolic (outer ring plus exclusions) instead of
/// being materialised, which is all the containment tests need.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelBoundary {
    pub outer: Polygon,
    pub exclusions: Vec<Polygon>,
}

impl LabelBoundary {
    pub fn new(outer: Polygon) -> Self {
        Self {
            outer,
            exclusions: Vec::new(),
        }
    }

    pub fn difference(mut self, region: &Polygon) -> Self {
        if !region.is_empty() {
            self.exclusions.push(region.clone());
        }
        self
    }

    pub fn rotated(&self, degrees: f64, center: Point) -> Self {
        Self {
            outer: self.outer.rotated(degrees, center),
            exclusions: self
                .exclusions
                .iter()
                .map(|p| p.rotated(degrees, center))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outer.is_empty()
    }

    pub fn contains_point(&self, p: Point) -> bool {
        self.outer.contains_point(p) && !self.exclusions.iter().any(|e| e.contains_point(p))
    }

    /// Whole rectangle lies inside the outer ring and clear of every
    /// exclusion.
    pub fn contains_rect(&self, rect: &Rect) -> bool {
        if !rect.corners().iter().all(|c| self.outer.contains_point(*c)) {
            return false;
        }
        if self
            .outer
            .ring
            .iter()
            .any(|p| p.x > rect.x && p.x < rect.x_max() && p.y > rect.y && p.y < rect.y_max())
        {
            return false;
        }
        !self.exclusions.iter().any(|e| e.intersects_rect(rect))
    }

    /// Rectangle touches the permissible area at all.
    pub fn touches_rect(&self, rect: &Rect) -> bool {
        if !self.outer.intersects_rect(rect) {
            return false;
        }
        !self.exclusions.iter().any(|e| {
            rect.corners().iter().all(|c| e.contains_point(*c))
                && !e.ring.iter().any(|p| rect.contains_point(*p))
        })
    }
}
