//! Angular collision ranges between pairs of label boxes.
//!
//! Angles are map bearings in radians. At bearing `a` a viewport-aligned box
//! keeps its screen orientation, which in the map frame means its corners are
//! rotated by `-a` around its anchor. Map-aligned boxes never move relative
//! to the map.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{CollisionRect, Point, TAU, angle_between, interpolate, normalize_angle};

const ANGLE_EPSILON: f32 = 1e-5;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum CollisionError {
    #[error("expected an even number of edge intersections, found {count}")]
    OddIntersectionCount { count: usize },
}

/// Closed interval of bearings `[start, end]`. `EMPTY` has `start > end` and
/// contains nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionRange {
    pub start: f32,
    pub end: f32,
}

pub type PlacementRange = CollisionRange;
pub type CollisionList = Vec<CollisionRange>;

impl CollisionRange {
    pub const EMPTY: CollisionRange = CollisionRange { start: TAU, end: 0.0 };
    pub const FULL: CollisionRange = CollisionRange { start: 0.0, end: TAU };

    pub const fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, angle: f32) -> bool {
        self.start <= angle && angle <= self.end
    }

    /// Mirror image of the range, used when the roles of the swept corner and
    /// the box are swapped.
    pub fn flip(&self) -> CollisionRange {
        CollisionRange::new(TAU - self.end, TAU - self.start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    /// Rotates with the map.
    Map,
    /// Stays upright on screen while the map rotates underneath.
    Viewport,
}

/// A label box: an anchor in tile units and a rect in pixels relative to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionBox {
    pub anchor: Point,
    pub rect: CollisionRect,
    pub alignment: Alignment,
}

impl CollisionBox {
    pub fn new(anchor: Point, rect: CollisionRect, alignment: Alignment) -> Self {
        Self {
            anchor,
            rect,
            alignment,
        }
    }
}

/// Folds `collisions` into one conservative range. Collisions that fall
/// entirely inside `ignore` are dropped; collisions straddling one of its
/// ends are clipped to it.
pub fn merge_collisions(collisions: &[CollisionRange], ignore: CollisionRange) -> CollisionRange {
    let mut min = TAU;
    let mut max = 0.0f32;

    for collision in collisions {
        let entry_ignored = ignore.contains(collision.start);
        let exit_ignored = ignore.contains(collision.end);

        match (entry_ignored, exit_ignored) {
            (true, true) => {}
            (true, false) => {
                min = min.min(ignore.end);
                max = max.max(collision.end);
            }
            (false, true) => {
                min = min.min(collision.start);
                max = max.max(ignore.start);
            }
            (false, false) => {
                min = min.min(collision.start);
                max = max.max(collision.end);
            }
        }
    }

    CollisionRange::new(min, max)
}

/// Turns sorted crossing angles into the ranges where `inside` holds. Each
/// arc between neighbouring crossings is sampled at its midpoint, which keeps
/// tangent touches and corner hits from breaking the pairing.
fn ranges_between_crossings(crossings: &[f32], inside: impl Fn(f32) -> bool) -> CollisionList {
    if crossings.is_empty() {
        return if inside(0.0) {
            vec![CollisionRange::FULL]
        } else {
            Vec::new()
        };
    }

    let mut ranges = Vec::new();
    for pair in crossings.windows(2) {
        if inside((pair[0] + pair[1]) / 2.0) {
            ranges.push(CollisionRange::new(pair[0], pair[1]));
        }
    }

    let first = crossings[0];
    let last = crossings[crossings.len() - 1];
    if inside(normalize_angle((last + first + TAU) / 2.0)) {
        ranges.push(CollisionRange::new(last, TAU));
        ranges.insert(0, CollisionRange::new(0.0, first));
    }
    ranges
}

fn sort_and_dedup(angles: &mut Vec<f32>) {
    angles.sort_by(f32::total_cmp);
    angles.dedup_by(|b, a| (*b - *a).abs() < ANGLE_EPSILON);
}

/// Ranges for two viewport-aligned boxes. On screen their offset is
/// `anchor_to_anchor` rotated by the bearing, so the boxes overlap exactly
/// while that rotated vector lies inside the rectangle
/// `(-lr, rl) x (-bt, tb)`. The crossings of the swept circle with that
/// rectangle are solved with `asin`/`acos`.
pub fn rotating_rotating_collisions(
    a: &CollisionRect,
    b: &CollisionRect,
    anchor_to_anchor: Point,
) -> CollisionList {
    let rl = a.br.x - b.tl.x;
    let lr = -a.tl.x + b.br.x;
    let tb = a.br.y - b.tl.y;
    let bt = -a.tl.y + b.br.y;

    let inside_at = |v: Point| v.x > -lr && v.x < rl && v.y > -bt && v.y < tb;

    let d = anchor_to_anchor.mag();
    if d == 0.0 {
        return if inside_at(Point::ZERO) {
            vec![CollisionRange::FULL]
        } else {
            Vec::new()
        };
    }
    let d_sq = d * d;
    let angle_between_anchors = angle_between(anchor_to_anchor, Point::new(1.0, 0.0));

    // Direction of the on-screen offset at each crossing, the squared length
    // of the farther end of the edge it crosses, and whether the other
    // coordinate stays inside that edge.
    let top_asin = (tb / d).asin();
    let bottom_asin = (-bt / d).asin();
    let right_acos = (rl / d).acos();
    let left_acos = (-lr / d).acos();

    let e_right = rl * rl + tb.max(bt).powi(2);
    let e_left = lr * lr + tb.max(bt).powi(2);
    let e_top = tb * tb + rl.max(lr).powi(2);
    let e_bottom = bt * bt + rl.max(lr).powi(2);

    let candidates = [
        (top_asin, e_top),
        (std::f32::consts::PI - top_asin, e_top),
        (bottom_asin, e_bottom),
        (std::f32::consts::PI - bottom_asin, e_bottom),
        (right_acos, e_right),
        (-right_acos, e_right),
        (left_acos, e_left),
        (-left_acos, e_left),
    ];

    let mut crossings = Vec::with_capacity(candidates.len());
    for (psi, e) in candidates {
        if psi.is_nan() || d_sq > e {
            continue;
        }
        let v = Point::new(d * psi.cos(), d * psi.sin());
        let on_edge = v.x >= -lr - ANGLE_EPSILON * d
            && v.x <= rl + ANGLE_EPSILON * d
            && v.y >= -bt - ANGLE_EPSILON * d
            && v.y <= tb + ANGLE_EPSILON * d;
        if on_edge {
            crossings.push(normalize_angle(psi + angle_between_anchors));
        }
    }
    sort_and_dedup(&mut crossings);

    ranges_between_crossings(&crossings, |angle| inside_at(anchor_to_anchor.rotate(angle)))
}

/// Angles at which `corner`, swept around the origin on a circle of
/// `radius`, crosses the open segment `p1..p2`. Each angle is the rotation
/// that carries the crossing point back onto `corner`.
pub fn circle_edge_collisions(
    angles: &mut Vec<f32>,
    corner: Point,
    radius: f32,
    p1: Point,
    p2: Point,
) {
    let edge_x = p2.x - p1.x;
    let edge_y = p2.y - p1.y;

    let a = edge_x * edge_x + edge_y * edge_y;
    let b = (edge_x * p1.x + edge_y * p1.y) * 2.0;
    let c = p1.x * p1.x + p1.y * p1.y - radius * radius;

    let discriminant = b * b - 4.0 * a * c;
    if discriminant <= 0.0 || a == 0.0 {
        return;
    }

    let root = discriminant.sqrt();
    for t in [(-b - root) / (2.0 * a), (-b + root) / (2.0 * a)] {
        if 0.0 < t && t < 1.0 {
            let hit = Point::new(interpolate(p1.x, p2.x, t), interpolate(p1.y, p2.y, t));
            angles.push(normalize_angle(angle_between(hit, corner)));
        }
    }
}

/// Appends the ranges during which `corner`, rotated around the origin, lies
/// inside `rect`. With `flip` the ranges are mirrored, for when the box is
/// the one rotating.
pub fn corner_box_collisions(
    collisions: &mut CollisionList,
    corner: Point,
    rect: &CollisionRect,
    flip: bool,
) -> Result<(), CollisionError> {
    let radius = corner.mag();
    let box_corners = rect.corners();

    let mut angles = Vec::new();
    for i in 0..4 {
        let j = (i + 3) % 4;
        circle_edge_collisions(&mut angles, corner, radius, box_corners[j], box_corners[i]);
    }

    if angles.len() % 2 != 0 {
        return Err(CollisionError::OddIntersectionCount {
            count: angles.len(),
        });
    }
    angles.sort_by(f32::total_cmp);

    let mut ranges = Vec::with_capacity(angles.len() / 2 + 1);
    if rect.contains_point(corner) {
        let mut previous = 0.0;
        for pair in angles.chunks_exact(2) {
            ranges.push(CollisionRange::new(previous, pair[0]));
            previous = pair[1];
        }
        ranges.push(CollisionRange::new(previous, TAU));
    } else {
        for pair in angles.chunks_exact(2) {
            ranges.push(CollisionRange::new(pair[0], pair[1]));
        }
    }

    collisions.extend(
        ranges
            .into_iter()
            .map(|range| if flip { range.flip() } else { range }),
    );
    Ok(())
}

/// Ranges for a viewport-aligned `rotating` box against a map-aligned `fixed`
/// box already expressed relative to the rotating box's anchor.
pub fn rotating_fixed_collisions(
    rotating: &CollisionRect,
    fixed: &CollisionRect,
) -> Result<CollisionList, CollisionError> {
    let rotating_corners = rotating.corners();
    let fixed_corners = fixed.corners();

    let mut collisions = Vec::new();
    for i in 0..4 {
        corner_box_collisions(&mut collisions, rotating_corners[i], fixed, false)?;
        corner_box_collisions(&mut collisions, fixed_corners[i], rotating, true)?;
    }
    Ok(collisions)
}

/// Bearings at which `inserting` would overlap `blocker`, folded into one
/// range. `scale` converts tile units between the anchors into the pixel
/// space of the rects; `ignore` is where the blocker itself is hidden.
pub fn rotation_range(
    inserting: &CollisionBox,
    blocker: &CollisionBox,
    ignore: CollisionRange,
    scale: f32,
) -> Result<CollisionRange, CollisionError> {
    let relative_anchor = (blocker.anchor - inserting.anchor) * scale;

    let collisions = match (inserting.alignment, blocker.alignment) {
        (Alignment::Viewport, Alignment::Viewport) => {
            rotating_rotating_collisions(&inserting.rect, &blocker.rect, relative_anchor)
        }
        (Alignment::Viewport, Alignment::Map) => {
            let fixed = blocker.rect.translate(relative_anchor);
            rotating_fixed_collisions(&inserting.rect, &fixed)?
        }
        (Alignment::Map, Alignment::Viewport) => {
            let fixed = inserting.rect.translate(Point::ZERO - relative_anchor);
            rotating_fixed_collisions(&blocker.rect, &fixed)?
        }
        (Alignment::Map, Alignment::Map) => {
            if inserting.rect.overlaps(&blocker.rect.translate(relative_anchor)) {
                vec![CollisionRange::FULL]
            } else {
                Vec::new()
            }
        }
    };

    Ok(merge_collisions(&collisions, ignore))
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn label(x: f32, y: f32, alignment: Alignment) -> CollisionBox {
        CollisionBox::new(Point::new(x, y), CollisionRect::centered(20.0, 10.0), alignment)
    }

    #[test]
    fn identical_boxes_collide_at_every_angle() {
        for alignment in [Alignment::Viewport, Alignment::Map] {
            let a = label(100.0, 100.0, alignment);
            let range = rotation_range(&a, &a, CollisionRange::EMPTY, 1.0).unwrap();
            assert_eq!(range, CollisionRange::FULL);
            for step in 0..16 {
                assert!(range.contains(step as f32 * TAU / 16.0));
            }
        }
    }

    #[test]
    fn distant_boxes_never_collide() {
        let a = CollisionRect::centered(20.0, 10.0);
        let collisions = rotating_rotating_collisions(&a, &a, Point::new(300.0, -40.0));
        assert!(collisions.is_empty());

        let merged = merge_collisions(&collisions, CollisionRange::EMPTY);
        assert!(merged.is_empty());
        assert!(!merged.contains(0.0));
    }

    #[test]
    fn close_viewport_labels_collide_everywhere() {
        let a = label(0.0, 0.0, Alignment::Viewport);
        let b = label(2.0, 0.0, Alignment::Viewport);
        let range = rotation_range(&a, &b, CollisionRange::EMPTY, 1.0).unwrap();
        assert_eq!(range, CollisionRange::FULL);
    }

    #[test]
    fn viewport_pair_collides_only_when_rotated_into_line() {
        // Wide boxes stacked vertically, 15 px apart: clear at bearing 0,
        // overlapping once the offset turns horizontal.
        let a = CollisionRect::centered(20.0, 10.0);
        let collisions = rotating_rotating_collisions(&a, &a, Point::new(0.0, 15.0));
        assert!(!collisions.is_empty());
        assert!(collisions.iter().all(|range| !range.contains(0.0)));
        assert!(collisions.iter().any(|range| range.contains(PI / 2.0)));
        assert!(collisions.iter().any(|range| range.contains(1.5 * PI)));
        assert!(collisions.iter().all(|range| !range.contains(PI)));
    }

    #[test]
    fn rotating_bar_sweeps_over_fixed_box() {
        let bar = CollisionRect::new(-10.0, -2.0, 10.0, 2.0);
        let fixed = CollisionRect::new(-1.0, 5.0, 1.0, 7.0);
        let collisions = rotating_fixed_collisions(&bar, &fixed).unwrap();
        let merged = merge_collisions(&collisions, CollisionRange::EMPTY);

        assert!(!merged.contains(0.0));
        assert!(!merged.contains(0.2));
        assert!(merged.contains(PI / 2.0));
        assert!(merged.contains(1.5 * PI));
    }

    #[test]
    fn mixed_alignment_is_symmetric_in_bearing() {
        let viewport = CollisionBox::new(
            Point::new(0.0, 0.0),
            CollisionRect::new(-10.0, -2.0, 10.0, 2.0),
            Alignment::Viewport,
        );
        let map = CollisionBox::new(
            Point::new(0.0, 6.0),
            CollisionRect::centered(2.0, 2.0),
            Alignment::Map,
        );
        let forward = rotation_range(&viewport, &map, CollisionRange::EMPTY, 1.0).unwrap();
        let backward = rotation_range(&map, &viewport, CollisionRange::EMPTY, 1.0).unwrap();
        assert!(forward.contains(PI / 2.0));
        assert!(backward.contains(PI / 2.0));
        assert!(!forward.contains(0.0));
        assert!(!backward.contains(0.0));
    }

    #[test]
    fn merge_respects_ignore_range() {
        let collisions = [
            CollisionRange::new(0.5, 1.0),
            CollisionRange::new(2.0, 3.0),
            CollisionRange::new(4.0, 4.5),
        ];

        let all = merge_collisions(&collisions, CollisionRange::EMPTY);
        assert_eq!(all, CollisionRange::new(0.5, 4.5));

        // Entirely ignored collision drops out.
        let skip_first = merge_collisions(&collisions, CollisionRange::new(0.0, 1.5));
        assert_eq!(skip_first, CollisionRange::new(2.0, 4.5));

        // Entry ignored: clipped to the end of the ignore range.
        let clipped = merge_collisions(&collisions[1..2], CollisionRange::new(1.5, 2.5));
        assert_eq!(clipped, CollisionRange::new(2.5, 3.0));

        // Exit ignored: clipped to the start of the ignore range.
        let clipped = merge_collisions(&collisions[1..2], CollisionRange::new(2.5, 3.5));
        assert_eq!(clipped, CollisionRange::new(2.0, 2.5));

        assert!(merge_collisions(&[], CollisionRange::EMPTY).is_empty());
    }

    #[test]
    fn flip_mirrors_range() {
        let flipped = CollisionRange::new(1.0, 2.0).flip();
        assert!((flipped.start - (TAU - 2.0)).abs() < 1e-6);
        assert!((flipped.end - (TAU - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn corner_grazing_a_vertex_reports_odd_count() {
        // The circle of radius 5 passes exactly through the vertex (3, 4), so
        // only one of the two crossings lands strictly inside an edge.
        let rect = CollisionRect::new(3.0, -10.0, 10.0, 4.0);
        let mut collisions = Vec::new();
        let err = corner_box_collisions(&mut collisions, Point::new(5.0, 0.0), &rect, false)
            .unwrap_err();
        assert_eq!(err, CollisionError::OddIntersectionCount { count: 1 });
        assert!(collisions.is_empty());
    }

    #[test]
    fn corner_inside_box_pairs_from_zero() {
        let rect = CollisionRect::new(-1.0, -1.0, 10.0, 1.0);
        let mut collisions = Vec::new();
        corner_box_collisions(&mut collisions, Point::new(5.0, 0.0), &rect, false).unwrap();
        assert_eq!(collisions.len(), 2);
        assert_eq!(collisions[0].start, 0.0);
        assert_eq!(collisions[1].end, TAU);
        assert!(collisions.iter().all(|range| !range.contains(PI)));
    }
}
