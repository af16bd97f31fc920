use serde::Serialize;
use vectile_shared::projection::PlacedGlyph;
use vectile_shared::{DebugBox, PlacementRange, Point};

use crate::tile_data::Geometry;

/// Render-ready output for one bucket name on one tile.
#[derive(Debug, Clone)]
pub enum Bucket {
    Fill(GeometryBucket),
    Line(GeometryBucket),
    Circle(GeometryBucket),
    Symbol(SymbolBucket),
}

impl Bucket {
    pub fn layer_ids(&self) -> &[String] {
        match self {
            Bucket::Fill(b) | Bucket::Line(b) | Bucket::Circle(b) => &b.layer_ids,
            Bucket::Symbol(b) => &b.layer_ids,
        }
    }

    pub fn has_data(&self) -> bool {
        match self {
            Bucket::Fill(b) | Bucket::Line(b) | Bucket::Circle(b) => !b.features.is_empty(),
            Bucket::Symbol(b) => !b.symbols.is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Bucket::Fill(_) => "fill",
            Bucket::Line(_) => "line",
            Bucket::Circle(_) => "circle",
            Bucket::Symbol(_) => "symbol",
        }
    }

    pub fn as_symbol(&self) -> Option<&SymbolBucket> {
        match self {
            Bucket::Symbol(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BucketFeature {
    pub index: usize,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, Default)]
pub struct GeometryBucket {
    pub layer_ids: Vec<String>,
    pub features: Vec<BucketFeature>,
    pub vertex_count: usize,
}

impl GeometryBucket {
    pub fn new(layer_ids: Vec<String>) -> Self {
        Self {
            layer_ids,
            ..Self::default()
        }
    }

    pub fn add_feature(&mut self, index: usize, geometry: Geometry) {
        self.vertex_count += geometry.vertex_count();
        self.features.push(BucketFeature { index, geometry });
    }
}

/// One label that survived placement.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedSymbol {
    pub feature_index: usize,
    pub anchor: Point,
    pub text: Option<String>,
    pub icon: Option<String>,
    /// Bearings at which the label must be hidden.
    pub hidden_range: PlacementRange,
    /// First and last glyph of a line label, in label-plane pixels.
    #[serde(skip)]
    pub glyph_run: Option<(PlacedGlyph, PlacedGlyph)>,
    pub flipped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolBucket {
    pub layer_ids: Vec<String>,
    pub symbols: Vec<PlacedSymbol>,
    pub collision_boxes: Vec<DebugBox>,
}
