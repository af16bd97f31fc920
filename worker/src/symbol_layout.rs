use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;
use vectile_shared::projection::{
    GlyphRunPlacement, LineLabel, PlacedGlyph, label_plane_matrix, place_glyph_run,
};
use vectile_shared::{
    Alignment, CollisionBox, CollisionFeature, CollisionRect, CollisionTile, PlacementOptions,
    Point, label_box,
};

use crate::bucket::{PlacedSymbol, SymbolBucket};
use crate::config::GLYPH_BASE_SIZE;
use crate::error::WorkerError;
use crate::feature_index::FeatureIndex;
use crate::registry::{DependencyRegistry, SymbolDependencies};
use crate::style::{Layer, LayerKind, SymbolLayerProperties, SymbolPlacement};
use crate::tile_data::{Geometry, GeometryType, TileLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLayoutState {
    /// Waiting on glyphs or icons.
    Pending,
    /// Shaped and ready to place.
    Prepared,
    /// Placed at least once; can be placed again against a new collision
    /// tile.
    Placed,
}

#[derive(Debug, Clone)]
struct SymbolFeature {
    index: usize,
    text: Option<String>,
    icon: Option<String>,
    geometry: Geometry,
}

#[derive(Debug, Clone)]
struct LineAnchor {
    line: Vec<Point>,
    segment: usize,
}

#[derive(Debug, Clone)]
struct SymbolInstance {
    feature_index: usize,
    text: Option<String>,
    icon: Option<String>,
    anchor: Point,
    line: Option<LineAnchor>,
    /// Shaped text size in pixels.
    text_box: Option<(f32, f32)>,
    /// Boxes of point labels; line labels build theirs at placement time.
    collision: CollisionFeature,
}

/// Result of placing one layout against a collision tile.
#[derive(Debug, Default)]
pub struct SymbolPlacementResult {
    pub bucket: Option<SymbolBucket>,
    pub dropped_labels: u64,
}

/// Per-layer, per-tile symbol state between layout and placement.
#[derive(Debug)]
pub struct SymbolLayout {
    pub bucket_name: String,
    pub layer_ids: Vec<String>,
    properties: SymbolLayerProperties,
    state: SymbolLayoutState,
    features: Vec<SymbolFeature>,
    dependencies: SymbolDependencies,
    instances: Vec<SymbolInstance>,
}

impl SymbolLayout {
    /// Collects the labelled features of `source` and what they depend on.
    /// Every collected feature is also added to `feature_index`.
    pub fn new(
        layer: &Layer,
        layer_ids: Vec<String>,
        source: &TileLayer,
        feature_index: &mut FeatureIndex,
    ) -> Result<Self, WorkerError> {
        let LayerKind::Symbol(properties) = &layer.kind else {
            return Err(WorkerError::InvalidLayer {
                layer: layer.id.clone(),
                reason: "not a symbol layer".to_string(),
            });
        };
        layer.validate()?;

        let bucket_name = layer.bucket_name().to_string();
        let mut features = Vec::new();
        let mut dependencies = SymbolDependencies::default();

        for (index, feature) in source.features.iter().enumerate() {
            if !layer.filter.matches(feature) {
                continue;
            }
            let text = properties
                .text_field
                .as_deref()
                .and_then(|key| feature.text(key))
                .filter(|text| !text.trim().is_empty());
            let icon = properties.icon_image.clone();
            if text.is_none() && icon.is_none() {
                continue;
            }
            feature.geometry.validate(&layer.id, index)?;

            if let Some(text) = &text {
                dependencies.add_text(&properties.font_stack, text);
            }
            if let Some(icon) = &icon {
                dependencies.add_icon(icon);
            }
            if let Some(bbox) = feature.geometry.bounds() {
                feature_index.insert(bbox, &layer.source_layer, &bucket_name, index);
            }
            features.push(SymbolFeature {
                index,
                text,
                icon,
                geometry: feature.geometry.clone(),
            });
        }

        Ok(Self {
            bucket_name,
            layer_ids,
            properties: properties.clone(),
            state: SymbolLayoutState::Pending,
            features,
            dependencies,
            instances: Vec::new(),
        })
    }

    pub fn state(&self) -> SymbolLayoutState {
        self.state
    }

    pub fn dependencies(&self) -> &SymbolDependencies {
        &self.dependencies
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn can_prepare(&self, registry: &DependencyRegistry) -> bool {
        registry.can_prepare(&self.dependencies)
    }

    /// Shapes text and icons and picks anchors. Moves `Pending` to
    /// `Prepared`; later calls do nothing.
    pub fn prepare(&mut self, registry: &DependencyRegistry, pixel_ratio: f32) {
        if self.state != SymbolLayoutState::Pending {
            return;
        }
        let props = &self.properties;
        let scale = props.text_size / GLYPH_BASE_SIZE / pixel_ratio;
        let alignment = props.alignment();

        let mut instances = Vec::new();
        for feature in &self.features {
            let text_box = feature
                .text
                .as_deref()
                .map(|text| shape_text(registry, &props.font_stack, text, scale));
            let icon_box = feature.icon.as_deref().and_then(|name| {
                registry.icon(name).map(|icon| {
                    (
                        icon.width * props.icon_size / pixel_ratio,
                        icon.height * props.icon_size / pixel_ratio,
                    )
                })
            });

            for (anchor, line) in anchors(&feature.geometry) {
                let mut boxes = Vec::new();
                if let Some((width, height)) = text_box {
                    boxes.push(label_box(anchor, width, height, props.padding, alignment));
                }
                if let Some((width, height)) = icon_box {
                    boxes.push(label_box(anchor, width, height, props.padding, alignment));
                }
                instances.push(SymbolInstance {
                    feature_index: feature.index,
                    text: feature.text.clone(),
                    icon: feature.icon.clone(),
                    anchor,
                    line,
                    text_box,
                    collision: CollisionFeature::new(boxes),
                });
            }
        }

        self.instances = instances;
        self.state = SymbolLayoutState::Prepared;
    }

    /// Places every instance against `collision_tile`. Returns `None` when
    /// `obsolete` was raised part way through.
    pub fn place(
        &mut self,
        collision_tile: &mut CollisionTile,
        obsolete: &AtomicBool,
    ) -> Option<SymbolPlacementResult> {
        if self.state == SymbolLayoutState::Pending {
            return Some(SymbolPlacementResult::default());
        }

        let props = &self.properties;
        let transform = collision_tile.config.transform;
        let units = collision_tile.tile_units_per_pixel();
        let rotate_with_map = props.alignment() == Alignment::Map;
        let pos_matrix = transform.matrix_for(&collision_tile.tile.to_unwrapped());
        let label_plane = label_plane_matrix(
            &pos_matrix,
            rotate_with_map,
            rotate_with_map,
            &transform,
            f64::from(units),
        );
        let options = PlacementOptions {
            allow_overlap: props.allow_overlap,
            ignore_placement: props.ignore_placement,
            avoid_edges: props.avoid_edges,
        };
        let debug_start = collision_tile.debug_boxes().len();

        let mut symbols = Vec::new();
        let mut dropped_labels = 0;

        for instance in &self.instances {
            if obsolete.load(Ordering::Acquire) {
                return None;
            }

            let mut glyph_run: Option<(PlacedGlyph, PlacedGlyph)> = None;
            let mut flipped = false;
            let line_label = match (&instance.line, instance.text_box, props.placement) {
                (Some(line), Some(text_box), SymbolPlacement::Line) => Some((line, text_box)),
                _ => None,
            };

            let feature = match line_label {
                Some((line, (width, height))) => {
                    let label = LineLabel {
                        line: &line.line,
                        anchor: instance.anchor,
                        anchor_segment: line.segment,
                        line_offset_x: 0.0,
                        line_offset_y: 0.0,
                    };
                    match place_glyph_run(1.0, -width / 2.0, width / 2.0, props.keep_upright, &label, &label_plane) {
                        GlyphRunPlacement::Placed { first, last, flipped: f } => {
                            glyph_run = Some((first, last));
                            flipped = f;
                        }
                        GlyphRunPlacement::NotEnoughRoom | GlyphRunPlacement::NeedsFlipping => continue,
                    }
                    line_collision_feature(line, instance.anchor, width, height, props.padding, units)
                }
                None => instance.collision.clone(),
            };

            match collision_tile.place_feature(&feature, options) {
                Ok(Some(hidden_range)) => symbols.push(PlacedSymbol {
                    feature_index: instance.feature_index,
                    anchor: instance.anchor,
                    text: instance.text.clone(),
                    icon: instance.icon.clone(),
                    hidden_range,
                    glyph_run,
                    flipped,
                }),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        bucket = %self.bucket_name,
                        feature = instance.feature_index,
                        "dropping label with degenerate collision geometry: {e}"
                    );
                    dropped_labels += 1;
                }
            }
        }

        self.state = SymbolLayoutState::Placed;
        let collision_boxes = collision_tile.debug_boxes()[debug_start..].to_vec();
        let bucket = (!symbols.is_empty()).then(|| SymbolBucket {
            layer_ids: self.layer_ids.clone(),
            symbols,
            collision_boxes,
        });
        Some(SymbolPlacementResult {
            bucket,
            dropped_labels,
        })
    }
}

fn shape_text(registry: &DependencyRegistry, font_stack: &str, text: &str, scale: f32) -> (f32, f32) {
    let mut width = 0.0;
    let mut height: f32 = 0.0;
    for c in text.chars() {
        if c.is_whitespace() {
            width += GLYPH_BASE_SIZE / 4.0;
            continue;
        }
        if let Some(glyph) = registry.glyph(font_stack, c) {
            width += glyph.advance;
            height = height.max(glyph.height);
        }
    }
    if height == 0.0 {
        height = GLYPH_BASE_SIZE;
    }
    (width * scale, height * scale)
}

/// Label anchors of a geometry. Lines are labelled at half their length,
/// polygons at the mean of their outer ring.
fn anchors(geometry: &Geometry) -> Vec<(Point, Option<LineAnchor>)> {
    match geometry.kind {
        GeometryType::Point => geometry
            .parts
            .iter()
            .flatten()
            .map(|p| (*p, None))
            .collect(),
        GeometryType::LineString => geometry
            .parts
            .iter()
            .filter_map(|line| {
                let (anchor, segment) = line_midpoint(line)?;
                Some((
                    anchor,
                    Some(LineAnchor {
                        line: line.clone(),
                        segment,
                    }),
                ))
            })
            .collect(),
        GeometryType::Polygon => geometry
            .parts
            .first()
            .filter(|ring| !ring.is_empty())
            .map(|ring| {
                let sum = ring.iter().fold(Point::ZERO, |acc, p| acc + *p);
                vec![(sum * (1.0 / ring.len() as f32), None)]
            })
            .unwrap_or_default(),
    }
}

fn line_length(line: &[Point]) -> f32 {
    line.windows(2).map(|w| w[0].dist(w[1])).sum()
}

fn line_midpoint(line: &[Point]) -> Option<(Point, usize)> {
    let half = line_length(line) / 2.0;
    point_along(line, half)
}

/// Point at `distance` along `line` and the segment it falls on.
fn point_along(line: &[Point], distance: f32) -> Option<(Point, usize)> {
    if distance < 0.0 {
        return None;
    }
    let mut travelled = 0.0;
    for (segment, pair) in line.windows(2).enumerate() {
        let length = pair[0].dist(pair[1]);
        if length > 0.0 && travelled + length >= distance {
            let t = (distance - travelled) / length;
            return Some((pair[0] + (pair[1] - pair[0]) * t, segment));
        }
        travelled += length;
    }
    None
}

/// Square boxes of the text height laid along the line under the label.
fn line_collision_feature(
    line: &LineAnchor,
    anchor: Point,
    width: f32,
    height: f32,
    padding: f32,
    tile_units_per_pixel: f32,
) -> CollisionFeature {
    let before_anchor: f32 = line.line[..=line.segment]
        .windows(2)
        .map(|w| w[0].dist(w[1]))
        .sum::<f32>()
        + line.line[line.segment].dist(anchor);

    let step = height.max(1.0);
    let count = (width / step).ceil().max(1.0) as usize;
    let start = before_anchor - (width / 2.0) * tile_units_per_pixel;
    let rect = CollisionRect::centered(step, step).pad(padding);

    let boxes = (0..count)
        .filter_map(|i| {
            let along = start + (i as f32 + 0.5) * step * tile_units_per_pixel;
            point_along(&line.line, along)
        })
        .map(|(p, _)| CollisionBox::new(p, rect, Alignment::Map))
        .collect();
    CollisionFeature::new(boxes)
}
