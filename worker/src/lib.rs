pub mod bucket;
pub mod config;
pub mod error;
pub mod feature_index;
pub mod geometry_tile;
pub mod geometry_tile_worker;
pub mod registry;
pub mod stats;
pub mod style;
pub mod symbol_layout;
pub mod tile_data;

pub use error::WorkerError;
pub use geometry_tile::{GeometryTile, TileUpdate};
pub use geometry_tile_worker::{
    LayoutResult, PlacementResult, TileEvent, WorkerContext, WorkerHandle, WorkerMessage,
    WorkerState,
};
pub use registry::DependencyRegistry;
pub use stats::{WorkerCounters, WorkerCountersSnapshot};
