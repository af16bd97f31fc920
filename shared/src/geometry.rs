use std::f32::consts::PI;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

pub const TAU: f32 = 2.0 * PI;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn mag(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dist(self, other: Point) -> f32 {
        (other - self).mag()
    }

    pub fn unit(self) -> Point {
        let m = self.mag();
        if m == 0.0 { self } else { self * (1.0 / m) }
    }

    /// Perpendicular, rotated a quarter turn counter-clockwise.
    pub fn perp(self) -> Point {
        Point::new(-self.y, self.x)
    }

    pub fn rotate(self, angle: f32) -> Point {
        let (sin, cos) = angle.sin_cos();
        Point::new(cos * self.x - sin * self.y, sin * self.x + cos * self.y)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// Signed angle that rotates `a` onto `b`, in `(-PI, PI]`.
pub fn angle_between(a: Point, b: Point) -> f32 {
    (a.x * b.y - a.y * b.x).atan2(a.x * b.x + a.y * b.y)
}

pub fn interpolate(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Folds any angle into `[0, 2PI)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// Axis-aligned rectangle given by its top-left and bottom-right corners,
/// usually relative to a label anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionRect {
    pub tl: Point,
    pub br: Point,
}

impl CollisionRect {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            tl: Point::new(x1, y1),
            br: Point::new(x2, y2),
        }
    }

    /// Rectangle of the given size centered on the origin.
    pub fn centered(width: f32, height: f32) -> Self {
        Self::new(-width / 2.0, -height / 2.0, width / 2.0, height / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.br.x - self.tl.x
    }

    pub fn height(&self) -> f32 {
        self.br.y - self.tl.y
    }

    /// Corners in winding order: tl, bl, br, tr.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.tl.x, self.tl.y),
            Point::new(self.tl.x, self.br.y),
            Point::new(self.br.x, self.br.y),
            Point::new(self.br.x, self.tl.y),
        ]
    }

    pub fn translate(&self, offset: Point) -> CollisionRect {
        CollisionRect {
            tl: self.tl + offset,
            br: self.br + offset,
        }
    }

    pub fn scale(&self, factor: f32) -> CollisionRect {
        CollisionRect {
            tl: self.tl * factor,
            br: self.br * factor,
        }
    }

    pub fn pad(&self, padding: f32) -> CollisionRect {
        CollisionRect::new(
            self.tl.x - padding,
            self.tl.y - padding,
            self.br.x + padding,
            self.br.y + padding,
        )
    }

    pub fn union(&self, other: &CollisionRect) -> CollisionRect {
        CollisionRect::new(
            self.tl.x.min(other.tl.x),
            self.tl.y.min(other.tl.y),
            self.br.x.max(other.br.x),
            self.br.y.max(other.br.y),
        )
    }

    /// Strict containment: points on an edge are outside.
    pub fn contains_point(&self, p: Point) -> bool {
        p.x > self.tl.x && p.x < self.br.x && p.y > self.tl.y && p.y < self.br.y
    }

    /// Strict overlap: rectangles sharing only an edge do not overlap.
    pub fn overlaps(&self, other: &CollisionRect) -> bool {
        self.tl.x < other.br.x
            && other.tl.x < self.br.x
            && self.tl.y < other.br.y
            && other.tl.y < self.br.y
    }

    /// Distance from the origin to the farthest corner.
    pub fn max_corner_distance(&self) -> f32 {
        self.corners()
            .iter()
            .map(|corner| corner.mag())
            .fold(0.0, f32::max)
    }
}
