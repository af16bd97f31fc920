//! Camera matrices and along-line glyph placement.

use cgmath::{Matrix4, Rad, SquareMatrix, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::geometry::Point;
use crate::tile_id::{EXTENT, TILE_SIZE, UnwrappedTileId};

/// The camera. `center_x`/`center_y` are in normalized world units (`0..1`
/// across the whole world at any zoom), `angle` is the bearing in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    pub width: f64,
    pub height: f64,
    pub zoom: f64,
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub pitch: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            width: 512.0,
            height: 512.0,
            zoom: 0.0,
            angle: 0.0,
            pitch: 0.0,
            center_x: 0.5,
            center_y: 0.5,
        }
    }
}

impl TransformState {
    pub fn world_size(&self) -> f64 {
        f64::from(TILE_SIZE) * 2f64.powf(self.zoom)
    }

    /// Maps tile units of `tile` to clip space. The camera looks straight
    /// down; pitch only affects which label plane is chosen.
    pub fn matrix_for(&self, tile: &UnwrappedTileId) -> Matrix4<f64> {
        let tiles_per_axis = f64::from(1u32 << tile.canonical.z);
        let tile_px = self.world_size() / tiles_per_axis;
        let origin_x = (f64::from(tile.canonical.x) + f64::from(tile.wrap) * tiles_per_axis) * tile_px;
        let origin_y = f64::from(tile.canonical.y) * tile_px;
        let center_x = self.center_x * self.world_size();
        let center_y = self.center_y * self.world_size();

        let to_clip = Matrix4::from_nonuniform_scale(2.0 / self.width, -2.0 / self.height, 1.0);
        let rotate = Matrix4::from_angle_z(Rad(self.angle));
        let to_center = Matrix4::from_translation(Vector3::new(
            origin_x - center_x,
            origin_y - center_y,
            0.0,
        ));
        let tile_scale = tile_px / f64::from(EXTENT);
        let to_pixels = Matrix4::from_nonuniform_scale(tile_scale, tile_scale, 1.0);

        to_clip * rotate * to_center * to_pixels
    }
}

pub fn project(point: Point, matrix: &Matrix4<f64>) -> Point {
    let p = *matrix * Vector4::new(f64::from(point.x), f64::from(point.y), 0.0, 1.0);
    if p.w == 0.0 {
        return Point::new(p.x as f32, p.y as f32);
    }
    Point::new((p.x / p.w) as f32, (p.y / p.w) as f32)
}

/// Matrix from tile units into the plane glyphs are laid out and collided
/// in.
pub fn label_plane_matrix(
    pos_matrix: &Matrix4<f64>,
    pitch_with_map: bool,
    rotate_with_map: bool,
    transform: &TransformState,
    pixels_to_tile_units: f64,
) -> Matrix4<f64> {
    if pitch_with_map {
        let inv = 1.0 / pixels_to_tile_units;
        let mut m = Matrix4::from_nonuniform_scale(inv, inv, 1.0);
        if !rotate_with_map {
            m = m * Matrix4::from_angle_z(Rad(transform.angle));
        }
        m
    } else {
        Matrix4::from_nonuniform_scale(transform.width / 2.0, -transform.height / 2.0, 1.0)
            * Matrix4::from_translation(Vector3::new(1.0, -1.0, 0.0))
            * *pos_matrix
    }
}

/// Matrix from the label plane back into clip space.
pub fn gl_coord_matrix(
    pos_matrix: &Matrix4<f64>,
    pitch_with_map: bool,
    rotate_with_map: bool,
    transform: &TransformState,
    pixels_to_tile_units: f64,
) -> Matrix4<f64> {
    if pitch_with_map {
        let mut m = *pos_matrix
            * Matrix4::from_nonuniform_scale(pixels_to_tile_units, pixels_to_tile_units, 1.0);
        if !rotate_with_map {
            m = m * Matrix4::from_angle_z(Rad(-transform.angle));
        }
        m
    } else {
        Matrix4::from_translation(Vector3::new(-1.0, 1.0, 0.0))
            * Matrix4::from_nonuniform_scale(2.0 / transform.width, -2.0 / transform.height, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedGlyph {
    pub point: Point,
    pub angle: f32,
}

/// A line label: the line in tile units, the anchor on it and the segment
/// the anchor sits on (`line[anchor_segment]..line[anchor_segment + 1]`).
#[derive(Debug, Clone, Copy)]
pub struct LineLabel<'a> {
    pub line: &'a [Point],
    pub anchor: Point,
    pub anchor_segment: usize,
    pub line_offset_x: f32,
    pub line_offset_y: f32,
}

/// Walks the projected line from the anchor by `offset_x` label-plane
/// pixels. Returns `None` when the line ends first.
pub fn place_glyph_along_line(
    offset_x: f32,
    flip: bool,
    label: &LineLabel<'_>,
    projected_anchor: Point,
    label_plane_matrix: &Matrix4<f64>,
) -> Option<PlacedGlyph> {
    let combined_offset_x = if flip {
        offset_x - label.line_offset_x
    } else {
        offset_x + label.line_offset_x
    };

    let mut dir: isize = if combined_offset_x > 0.0 { 1 } else { -1 };
    let mut angle = 0.0;
    if flip {
        dir *= -1;
        angle = std::f32::consts::PI;
    }
    if dir < 0 {
        angle += std::f32::consts::PI;
    }

    let mut current_index = label.anchor_segment as isize + if dir > 0 { 0 } else { 1 };
    let mut current = projected_anchor;
    let mut prev = projected_anchor;
    let mut distance_to_prev = 0.0;
    let mut current_segment_distance = 0.0;
    let abs_offset_x = combined_offset_x.abs();

    while distance_to_prev + current_segment_distance <= abs_offset_x {
        current_index += dir;
        if current_index < 0 || current_index as usize >= label.line.len() {
            return None;
        }
        prev = current;
        current = project(label.line[current_index as usize], label_plane_matrix);
        distance_to_prev += current_segment_distance;
        current_segment_distance = prev.dist(current);
    }

    let t = (abs_offset_x - distance_to_prev) / current_segment_distance;
    let prev_to_current = current - prev;
    let point = prev + prev_to_current * t
        + prev_to_current.perp().unit() * (label.line_offset_y * dir as f32);
    let segment_angle = angle + (current.y - prev.y).atan2(current.x - prev.x);

    Some(PlacedGlyph {
        point,
        angle: segment_angle,
    })
}

pub fn place_first_and_last_glyph(
    font_scale: f32,
    first_offset: f32,
    last_offset: f32,
    flip: bool,
    label: &LineLabel<'_>,
    label_plane_matrix: &Matrix4<f64>,
) -> Option<(PlacedGlyph, PlacedGlyph)> {
    let projected_anchor = project(label.anchor, label_plane_matrix);
    let first = place_glyph_along_line(
        font_scale * first_offset,
        flip,
        label,
        projected_anchor,
        label_plane_matrix,
    )?;
    let last = place_glyph_along_line(
        font_scale * last_offset,
        flip,
        label,
        projected_anchor,
        label_plane_matrix,
    )?;
    Some((first, last))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlyphRunPlacement {
    Placed {
        first: PlacedGlyph,
        last: PlacedGlyph,
        flipped: bool,
    },
    /// The line is too short for the run; the whole run is hidden.
    NotEnoughRoom,
    /// The run would read upside down.
    NeedsFlipping,
}

fn place_glyph_run_once(
    font_scale: f32,
    first_offset: f32,
    last_offset: f32,
    flip: bool,
    keep_upright: bool,
    label: &LineLabel<'_>,
    label_plane_matrix: &Matrix4<f64>,
) -> GlyphRunPlacement {
    match place_first_and_last_glyph(
        font_scale,
        first_offset,
        last_offset,
        flip,
        label,
        label_plane_matrix,
    ) {
        None => GlyphRunPlacement::NotEnoughRoom,
        Some((first, last)) if keep_upright && !flip && first.point.x > last.point.x => {
            GlyphRunPlacement::NeedsFlipping
        }
        Some((first, last)) => GlyphRunPlacement::Placed {
            first,
            last,
            flipped: flip,
        },
    }
}

/// Places the first and last glyph of a run, retrying flipped once when
/// `keep_upright` finds the run upside down.
pub fn place_glyph_run(
    font_scale: f32,
    first_offset: f32,
    last_offset: f32,
    keep_upright: bool,
    label: &LineLabel<'_>,
    label_plane_matrix: &Matrix4<f64>,
) -> GlyphRunPlacement {
    let placement = place_glyph_run_once(
        font_scale,
        first_offset,
        last_offset,
        false,
        keep_upright,
        label,
        label_plane_matrix,
    );
    if placement == GlyphRunPlacement::NeedsFlipping {
        return place_glyph_run_once(
            font_scale,
            first_offset,
            last_offset,
            true,
            keep_upright,
            label,
            label_plane_matrix,
        );
    }
    placement
}

pub fn identity_matrix() -> Matrix4<f64> {
    Matrix4::identity()
}
