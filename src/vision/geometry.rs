//! Box geometry
//!
//! Points, oriented boxes and the minimum-area enclosing rectangle used to turn
//! a component's foreground pixels into a text box, plus the corrections
//! applied before a box leaves detection space:
//! - diamond correction for near-square rotated boxes
//! - clockwise ordering starting at the vertex with the smallest `x + y`
//! - rescaling back to original-image pixels

use serde::{Deserialize, Serialize};

/// Boxes whose side ratio is within this distance of 1 are treated as diamonds
pub const DIAMOND_TOLERANCE: f32 = 0.1;

/// A 2D point in pixel coordinates (x right, y down)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A possibly rotated quadrilateral around one text region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub points: [Point; 4],
}

impl OrientedBox {
    pub fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    /// Axis-aligned box, listed top-left, top-right, bottom-right, bottom-left
    pub fn from_bounds(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            points: [
                Point::new(left, top),
                Point::new(right, top),
                Point::new(right, bottom),
                Point::new(left, bottom),
            ],
        }
    }

    /// Lengths of the first two sides: `|p0 - p1|` and `|p1 - p2|`
    pub fn side_lengths(&self) -> (f32, f32) {
        let [p0, p1, p2, _] = self.points;
        (p0.distance(&p1), p1.distance(&p2))
    }

    /// Whether the two side lengths are within `tolerance` of a 1:1 ratio
    pub fn is_near_square(&self, tolerance: f32) -> bool {
        let (w, h) = self.side_lengths();
        let ratio = w.max(h) / (w.min(h) + 1e-5);
        (1.0 - ratio).abs() <= tolerance
    }

    /// Shoelace area
    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }

    /// Positive when the vertices run clockwise on screen (y pointing down)
    fn signed_area(&self) -> f32 {
        let mut sum = 0.0;
        for i in 0..4 {
            let a = self.points[i];
            let b = self.points[(i + 1) % 4];
            sum += a.x * b.y - b.x * a.y;
        }
        sum / 2.0
    }

    pub fn is_clockwise(&self) -> bool {
        self.signed_area() >= 0.0
    }

    /// Rotate the vertex list so it starts at the vertex with the smallest
    /// `x + y`, keeping the relative order. Ties keep the earliest vertex.
    pub fn canonicalize(self) -> Self {
        let mut start = 0;
        for (i, p) in self.points.iter().enumerate().skip(1) {
            let best = self.points[start];
            if p.x + p.y < best.x + best.y {
                start = i;
            }
        }

        let mut points = self.points;
        points.rotate_left(start);
        Self { points }
    }

    /// Multiply every point by `(scale_x, scale_y)`
    pub fn scale(self, scale_x: f32, scale_y: f32) -> Self {
        Self {
            points: self
                .points
                .map(|p| Point::new(p.x * scale_x, p.y * scale_y)),
        }
    }

    /// Map a detection-space box back to original-image pixels
    pub fn rescale(self, ratio_w: f32, ratio_h: f32, ratio_net: f32) -> Self {
        self.scale(ratio_w * ratio_net, ratio_h * ratio_net)
    }

    /// Integer min/max corner pair; coordinates are truncated toward zero
    pub fn crop_rect(&self) -> CropRect {
        let xs = self.points.map(|p| p.x as i32);
        let ys = self.points.map(|p| p.y as i32);
        CropRect {
            x_min: xs.iter().copied().min().unwrap_or(0),
            y_min: ys.iter().copied().min().unwrap_or(0),
            x_max: xs.iter().copied().max().unwrap_or(0),
            y_max: ys.iter().copied().max().unwrap_or(0),
        }
    }
}

/// Axis-aligned integer rectangle `[x_min, x_max) x [y_min, y_max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl CropRect {
    pub fn width(&self) -> u32 {
        (self.x_max - self.x_min).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y_max - self.y_min).max(0) as u32
    }

    /// Intersect with an image of the given size, returning `(x, y, width, height)`.
    /// The extent may be zero.
    pub fn clamp_to(&self, img_width: u32, img_height: u32) -> (u32, u32, u32, u32) {
        let clamp = |v: i32, hi: u32| v.clamp(0, hi as i32) as u32;
        let x0 = clamp(self.x_min, img_width);
        let y0 = clamp(self.y_min, img_height);
        let x1 = clamp(self.x_max, img_width).max(x0);
        let y1 = clamp(self.y_max, img_height).max(y0);
        (x0, y0, x1 - x0, y1 - y0)
    }

    /// `[[x_min, y_min], [x_max, y_max]]`
    pub fn corners(&self) -> [[i32; 2]; 2] {
        [[self.x_min, self.y_min], [self.x_max, self.y_max]]
    }
}

/// A rotated rectangle described by its center, side lengths and the
/// direction of its first side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinAreaRect {
    pub center: Point,
    pub width: f32,
    pub height: f32,
    /// Angle of the width side in radians
    pub angle: f32,
}

impl MinAreaRect {
    /// The four corners, clockwise on screen
    pub fn corners(&self) -> [Point; 4] {
        let (sin, cos) = self.angle.sin_cos();
        let (hw, hh) = (self.width / 2.0, self.height / 2.0);
        [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)].map(|(a, b)| {
            Point::new(
                self.center.x + a * cos - b * sin,
                self.center.y + a * sin + b * cos,
            )
        })
    }

    pub fn to_box(&self) -> OrientedBox {
        OrientedBox::new(self.corners())
    }
}

/// Axis-aligned extrema `(left, top, right, bottom)` of a point set
pub fn bounds(points: &[Point]) -> Option<(f32, f32, f32, f32)> {
    let first = points.first()?;
    let init = (first.x, first.y, first.x, first.y);
    Some(points.iter().fold(init, |(l, t, r, b), p| {
        (l.min(p.x), t.min(p.y), r.max(p.x), b.max(p.y))
    }))
}

fn cross(o: &Point, a: &Point, b: &Point) -> f32 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull (monotone chain). Collinear points are dropped.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();

    if sorted.len() < 3 {
        return sorted;
    }

    let mut lower: Vec<Point> = Vec::with_capacity(sorted.len());
    for p in &sorted {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<Point> = Vec::with_capacity(sorted.len());
    for p in sorted.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Minimum-area enclosing rectangle via rotating calipers over the convex hull.
///
/// Fewer than three non-collinear points give the axis-aligned bounds
/// (possibly with zero width or height).
pub fn min_area_rect(points: &[Point]) -> MinAreaRect {
    let hull = convex_hull(points);

    if hull.len() < 3 {
        let (l, t, r, b) = bounds(points).unwrap_or_default();
        return MinAreaRect {
            center: Point::new((l + r) / 2.0, (t + b) / 2.0),
            width: r - l,
            height: b - t,
            angle: 0.0,
        };
    }

    let mut best: Option<(f32, MinAreaRect)> = None;
    let n = hull.len();

    for i in 0..n {
        let origin = hull[i];
        let next = hull[(i + 1) % n];
        let (ex, ey) = (next.x - origin.x, next.y - origin.y);
        let len = (ex * ex + ey * ey).sqrt();
        if len < f32::EPSILON {
            continue;
        }

        // Edge direction and its perpendicular
        let (ux, uy) = (ex / len, ey / len);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u) = (f32::MAX, f32::MIN);
        let (mut min_v, mut max_v) = (f32::MAX, f32::MIN);
        for p in &hull {
            let (dx, dy) = (p.x - origin.x, p.y - origin.y);
            let u = dx * ux + dy * uy;
            let v = dx * vx + dy * vy;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let width = max_u - min_u;
        let height = max_v - min_v;
        let area = width * height;

        if best.as_ref().map_or(true, |(a, _)| area < *a) {
            let cu = (min_u + max_u) / 2.0;
            let cv = (min_v + max_v) / 2.0;
            best = Some((
                area,
                MinAreaRect {
                    center: Point::new(origin.x + cu * ux + cv * vx, origin.y + cu * uy + cv * vy),
                    width,
                    height,
                    angle: uy.atan2(ux),
                },
            ));
        }
    }

    match best {
        Some((_, rect)) => rect,
        None => MinAreaRect {
            center: hull[0],
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        },
    }
}

/// Replace a near-square candidate with the axis-aligned bounds of the
/// foreground pixels it was fitted to. Other candidates pass through.
pub fn correct_diamond(candidate: OrientedBox, foreground: &[Point]) -> OrientedBox {
    if !candidate.is_near_square(DIAMOND_TOLERANCE) {
        return candidate;
    }
    match bounds(foreground) {
        Some((l, t, r, b)) => OrientedBox::from_bounds(l, t, r, b),
        None => candidate,
    }
}
