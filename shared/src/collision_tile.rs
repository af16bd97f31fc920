use serde::{Deserialize, Serialize};

use crate::geometry::{CollisionRect, Point, normalize_angle};
use crate::grid_index::{BBox, Circle, GridIndex, Shape};
use crate::projection::TransformState;
use crate::rotation_range::{
    Alignment, CollisionBox, CollisionError, CollisionRange, PlacementRange, rotation_range,
};
use crate::tile_id::{EXTENT, OverscaledTileId};

pub const DEFAULT_CELL_SIZE: u32 = 512;

/// The replaceable placement context a worker places labels against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    pub transform: TransformState,
    #[serde(default)]
    pub show_collision_boxes: bool,
    #[serde(default = "default_cell_size")]
    pub cell_size: u32,
}

fn default_cell_size() -> u32 {
    DEFAULT_CELL_SIZE
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            transform: TransformState::default(),
            show_collision_boxes: false,
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

/// All boxes of one label. The label is placed or rejected as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionFeature {
    pub boxes: Vec<CollisionBox>,
}

impl CollisionFeature {
    pub fn new(boxes: Vec<CollisionBox>) -> Self {
        Self { boxes }
    }

    pub fn single(collision_box: CollisionBox) -> Self {
        Self {
            boxes: vec![collision_box],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementOptions {
    /// Place without testing, but still occupy space.
    pub allow_overlap: bool,
    /// Place, but never block later labels.
    pub ignore_placement: bool,
    /// Reject labels whose footprint leaves the tile.
    pub avoid_edges: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DebugBox {
    pub collision_box: CollisionBox,
    pub placed: bool,
}

#[derive(Debug, Clone, Copy)]
struct PlacedBox {
    collision_box: CollisionBox,
    hidden: PlacementRange,
}

/// Collision state for one placement pass over one tile.
pub struct CollisionTile {
    pub tile: OverscaledTileId,
    pub config: PlacementConfig,
    angle: f32,
    tile_units_per_pixel: f32,
    grid: GridIndex<usize>,
    placed: Vec<PlacedBox>,
    placed_features: usize,
    debug_boxes: Vec<DebugBox>,
}

impl std::fmt::Debug for CollisionTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollisionTile")
            .field("tile", &self.tile)
            .field("angle", &self.angle)
            .field("placed_features", &self.placed_features)
            .finish()
    }
}

impl CollisionTile {
    pub fn new(tile: OverscaledTileId, config: PlacementConfig) -> Self {
        let tile_units_per_pixel = tile
            .to_unwrapped()
            .pixels_to_tile_units(1.0, config.transform.zoom);
        Self {
            tile,
            config,
            angle: normalize_angle(config.transform.angle as f32),
            tile_units_per_pixel,
            grid: GridIndex::new(EXTENT, EXTENT, config.cell_size),
            placed: Vec::new(),
            placed_features: 0,
            debug_boxes: Vec::new(),
        }
    }

    /// Current bearing, folded into `[0, 2PI)`.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn tile_units_per_pixel(&self) -> f32 {
        self.tile_units_per_pixel
    }

    pub fn placed_feature_count(&self) -> usize {
        self.placed_features
    }

    pub fn debug_boxes(&self) -> &[DebugBox] {
        &self.debug_boxes
    }

    fn footprint(&self, collision_box: &CollisionBox) -> Shape {
        let units = self.tile_units_per_pixel;
        let anchor = collision_box.anchor;
        match collision_box.alignment {
            Alignment::Map => {
                let rect = collision_box.rect.scale(units).translate(anchor);
                Shape::Box(BBox::new(rect.tl.x, rect.tl.y, rect.br.x, rect.br.y))
            }
            Alignment::Viewport => Shape::Circle(Circle::new(
                anchor.x,
                anchor.y,
                collision_box.rect.max_corner_distance() * units,
            )),
        }
    }

    fn leaves_tile(&self, collision_box: &CollisionBox) -> bool {
        let (min, max) = match self.footprint(collision_box) {
            Shape::Box(bbox) => (bbox.min, bbox.max),
            Shape::Circle(circle) => (
                circle.center - Point::new(circle.radius, circle.radius),
                circle.center + Point::new(circle.radius, circle.radius),
            ),
        };
        min.x < 0.0 || min.y < 0.0 || max.x > EXTENT || max.y > EXTENT
    }

    /// Bearings at which `feature` would collide with something already
    /// placed, folded into one range.
    pub fn placement_range(&self, feature: &CollisionFeature) -> Result<PlacementRange, CollisionError> {
        let scale = 1.0 / self.tile_units_per_pixel;
        let mut range = CollisionRange::EMPTY;

        for collision_box in &feature.boxes {
            let mut blockers = Vec::new();
            self.grid.visit(&self.footprint(collision_box), |&index, _| {
                blockers.push(index);
                false
            });

            for index in blockers {
                let blocker = &self.placed[index];
                let blocked = if blocker.collision_box.anchor == collision_box.anchor {
                    CollisionRange::FULL
                } else {
                    rotation_range(collision_box, &blocker.collision_box, blocker.hidden, scale)?
                };
                range.start = range.start.min(blocked.start);
                range.end = range.end.max(blocked.end);
            }
        }

        Ok(range)
    }

    pub fn can_place(&self, feature: &CollisionFeature) -> Result<bool, CollisionError> {
        Ok(!self.placement_range(feature)?.contains(self.angle))
    }

    /// Records `feature` as placed and hidden over `hidden`. With
    /// `ignore_placement` it is counted but never blocks anything.
    pub fn insert(&mut self, feature: &CollisionFeature, hidden: PlacementRange, ignore_placement: bool) {
        self.placed_features += 1;
        if ignore_placement {
            return;
        }
        for collision_box in &feature.boxes {
            let index = self.placed.len();
            match self.footprint(collision_box) {
                Shape::Box(bbox) => self.grid.insert_box(index, bbox),
                Shape::Circle(circle) => self.grid.insert_circle(index, circle),
            }
            self.placed.push(PlacedBox {
                collision_box: *collision_box,
                hidden,
            });
        }
    }

    /// Tests and, when it fits, inserts `feature`. Returns the range over
    /// which the placed label is hidden, or `None` when it was rejected.
    pub fn place_feature(
        &mut self,
        feature: &CollisionFeature,
        options: PlacementOptions,
    ) -> Result<Option<PlacementRange>, CollisionError> {
        let outside = feature.boxes.iter().any(|b| {
            b.anchor.x < 0.0 || b.anchor.y < 0.0 || b.anchor.x > EXTENT || b.anchor.y > EXTENT
        });
        let crosses_edge = options.avoid_edges && feature.boxes.iter().any(|b| self.leaves_tile(b));

        let placed = if outside || crosses_edge {
            None
        } else {
            let range = if options.allow_overlap {
                CollisionRange::EMPTY
            } else {
                self.placement_range(feature)?
            };
            (!range.contains(self.angle)).then_some(range)
        };

        if self.config.show_collision_boxes {
            self.debug_boxes
                .extend(feature.boxes.iter().map(|collision_box| DebugBox {
                    collision_box: *collision_box,
                    placed: placed.is_some(),
                }));
        }

        if let Some(range) = placed {
            self.insert(feature, range, options.ignore_placement);
        }
        Ok(placed)
    }
}

/// Text box of a point label: a `width x height` pixel rect centered on the
/// anchor, grown by `padding`.
pub fn label_box(
    anchor: Point,
    width: f32,
    height: f32,
    padding: f32,
    alignment: Alignment,
) -> CollisionBox {
    CollisionBox::new(anchor, CollisionRect::centered(width, height).pad(padding), alignment)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;
    use crate::tile_id::CanonicalTileId;

    fn tile() -> OverscaledTileId {
        OverscaledTileId::new(8, 0, CanonicalTileId::new(8, 3, 5))
    }

    fn config(angle: f64) -> PlacementConfig {
        PlacementConfig {
            transform: TransformState {
                zoom: 8.0,
                angle,
                ..TransformState::default()
            },
            ..PlacementConfig::default()
        }
    }

    fn point_label(x: f32, y: f32) -> CollisionFeature {
        CollisionFeature::single(label_box(Point::new(x, y), 20.0, 10.0, 0.0, Alignment::Viewport))
    }

    #[test]
    fn labels_two_pixels_apart_place_only_one() {
        let mut tile = CollisionTile::new(tile(), config(0.0));
        assert_eq!(tile.tile_units_per_pixel(), 16.0);

        let first = tile.place_feature(&point_label(4000.0, 4000.0), PlacementOptions::default());
        let second = tile.place_feature(&point_label(4032.0, 4000.0), PlacementOptions::default());
        assert_eq!(first.unwrap(), Some(CollisionRange::EMPTY));
        assert_eq!(second.unwrap(), None);
        assert_eq!(tile.placed_feature_count(), 1);
    }

    #[test]
    fn distant_labels_both_place() {
        let mut tile = CollisionTile::new(tile(), config(0.0));
        let options = PlacementOptions::default();
        assert!(tile.place_feature(&point_label(1000.0, 1000.0), options).unwrap().is_some());
        assert!(tile.place_feature(&point_label(6000.0, 6000.0), options).unwrap().is_some());
        assert_eq!(tile.placed_feature_count(), 2);
    }

    #[test]
    fn bearing_decides_stacked_labels() {
        // 15 px apart vertically: clear at bearing 0, colliding at 90 degrees.
        let upright = point_label(4000.0, 4000.0);
        let below = point_label(4000.0, 4240.0);

        let mut tile = CollisionTile::new(tile(), config(0.0));
        tile.place_feature(&upright, PlacementOptions::default()).unwrap();
        let range = tile
            .place_feature(&below, PlacementOptions::default())
            .unwrap()
            .expect("placed at bearing 0");
        assert!(range.contains(std::f32::consts::FRAC_PI_2));

        let mut rotated = CollisionTile::new(tile.tile, config(FRAC_PI_2));
        rotated.place_feature(&upright, PlacementOptions::default()).unwrap();
        assert_eq!(rotated.place_feature(&below, PlacementOptions::default()).unwrap(), None);
    }

    #[test]
    fn allow_overlap_and_ignore_placement() {
        let mut tile = CollisionTile::new(tile(), config(0.0));
        let ignore = PlacementOptions {
            ignore_placement: true,
            ..PlacementOptions::default()
        };
        assert!(tile.place_feature(&point_label(4000.0, 4000.0), ignore).unwrap().is_some());
        // The first label does not block.
        assert!(tile.place_feature(&point_label(4016.0, 4000.0), PlacementOptions::default()).unwrap().is_some());

        let overlap = PlacementOptions {
            allow_overlap: true,
            ..PlacementOptions::default()
        };
        assert!(tile.place_feature(&point_label(4032.0, 4000.0), overlap).unwrap().is_some());
        assert!(!tile.can_place(&point_label(4040.0, 4000.0)).unwrap());
        assert_eq!(tile.placed_feature_count(), 3);
    }

    #[test]
    fn anchors_outside_tile_are_rejected() {
        let mut tile = CollisionTile::new(tile(), config(0.0));
        let options = PlacementOptions::default();
        assert_eq!(tile.place_feature(&point_label(-1.0, 100.0), options).unwrap(), None);
        assert_eq!(tile.place_feature(&point_label(100.0, EXTENT + 1.0), options).unwrap(), None);
        assert_eq!(tile.place_feature(&point_label(EXTENT + 0.5, 100.0), options).unwrap(), None);
    }

    #[test]
    fn grazing_a_map_aligned_corner_is_an_error_not_a_placement() {
        let mut tile = CollisionTile::new(tile(), config(0.0));
        let shield = CollisionFeature::single(label_box(Point::new(4104.0, 3952.0), 7.0, 14.0, 0.0, Alignment::Map));
        let options = PlacementOptions::default();
        assert!(tile.place_feature(&shield, options).unwrap().is_some());

        let label = CollisionFeature::single(label_box(Point::new(4000.0, 4000.0), 6.0, 8.0, 0.0, Alignment::Viewport));
        assert_eq!(
            tile.place_feature(&label, options),
            Err(CollisionError::OddIntersectionCount { count: 1 })
        );
        assert_eq!(tile.placed_feature_count(), 1);
    }

    #[test]
    fn anchors_on_the_far_edges_are_inside() {
        let mut tile = CollisionTile::new(tile(), config(0.0));
        let options = PlacementOptions::default();
        assert!(tile.place_feature(&point_label(100.0, EXTENT), options).unwrap().is_some());
        assert!(tile.place_feature(&point_label(EXTENT, 4000.0), options).unwrap().is_some());
        assert_eq!(tile.placed_feature_count(), 2);

        let edges = PlacementOptions {
            avoid_edges: true,
            ..options
        };
        assert_eq!(tile.place_feature(&point_label(EXTENT, 100.0), edges).unwrap(), None);
    }

    #[test]
    fn avoid_edges_rejects_labels_crossing_the_border() {
        let mut tile = CollisionTile::new(tile(), config(0.0));
        let avoid = PlacementOptions {
            avoid_edges: true,
            ..PlacementOptions::default()
        };
        assert_eq!(tile.place_feature(&point_label(10.0, 4000.0), avoid).unwrap(), None);
        assert!(tile.place_feature(&point_label(10.0, 4000.0), PlacementOptions::default()).unwrap().is_some());
        assert!(tile.place_feature(&point_label(4000.0, 4000.0), avoid).unwrap().is_some());
    }

    #[test]
    fn map_aligned_labels_collide_regardless_of_bearing() {
        let map_label = |x: f32| {
            CollisionFeature::single(label_box(Point::new(x, 4000.0), 20.0, 10.0, 0.0, Alignment::Map))
        };
        for angle in [0.0, 1.0, 2.5] {
            let mut tile = CollisionTile::new(tile(), config(angle));
            tile.place_feature(&map_label(4000.0), PlacementOptions::default()).unwrap();
            assert_eq!(tile.place_feature(&map_label(4100.0), PlacementOptions::default()).unwrap(), None);
            assert!(tile.place_feature(&map_label(4400.0), PlacementOptions::default()).unwrap().is_some());
        }
    }

    #[test]
    fn debug_boxes_are_recorded_when_enabled() {
        let mut cfg = config(0.0);
        cfg.show_collision_boxes = true;
        let mut tile = CollisionTile::new(tile(), cfg);
        tile.place_feature(&point_label(4000.0, 4000.0), PlacementOptions::default()).unwrap();
        tile.place_feature(&point_label(4010.0, 4000.0), PlacementOptions::default()).unwrap();
        let placed: Vec<bool> = tile.debug_boxes().iter().map(|b| b.placed).collect();
        assert_eq!(placed, vec![true, false]);

        let mut quiet = CollisionTile::new(tile.tile, config(0.0));
        quiet.place_feature(&point_label(4000.0, 4000.0), PlacementOptions::default()).unwrap();
        assert!(quiet.debug_boxes().is_empty());
    }
}
