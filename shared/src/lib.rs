pub mod collision_tile;
pub mod geometry;
pub mod grid_index;
pub mod projection;
pub mod rotation_range;
pub mod tile_id;

pub use collision_tile::{
    CollisionFeature, CollisionTile, DebugBox, PlacementConfig, PlacementOptions, label_box,
};
pub use geometry::{CollisionRect, Point};
pub use grid_index::{BBox, Circle, GridIndex};
pub use projection::TransformState;
pub use rotation_range::{
    Alignment, CollisionBox, CollisionError, CollisionList, CollisionRange, PlacementRange,
};
pub use tile_id::*;
