use serde::{Deserialize, Serialize};
use serde_json::Value;
use vectile_shared::Alignment;

use crate::error::WorkerError;
use crate::tile_data::Feature;

/// A resolved style layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub source_layer: String,
    /// Layers naming another layer here share its bucket.
    #[serde(default, rename = "ref")]
    pub ref_layer: Option<String>,
    #[serde(default)]
    pub min_zoom: f32,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,
    #[serde(default)]
    pub filter: Filter,
    #[serde(flatten)]
    pub kind: LayerKind,
}

fn default_max_zoom() -> f32 {
    24.0
}

impl Layer {
    pub fn new(id: impl Into<String>, source_layer: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            id: id.into(),
            source_layer: source_layer.into(),
            ref_layer: None,
            min_zoom: 0.0,
            max_zoom: default_max_zoom(),
            filter: Filter::default(),
            kind,
        }
    }

    pub fn bucket_name(&self) -> &str {
        self.ref_layer.as_deref().unwrap_or(&self.id)
    }

    /// Whether a tile requested at `overscaled_z` renders this layer.
    pub fn visible_at(&self, overscaled_z: u8) -> bool {
        let z = f32::from(overscaled_z);
        z >= self.min_zoom.floor() && z < self.max_zoom.ceil()
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self.kind, LayerKind::Symbol(_))
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        let invalid = |reason: &str| WorkerError::InvalidLayer {
            layer: self.id.clone(),
            reason: reason.to_string(),
        };
        if self.min_zoom > self.max_zoom {
            return Err(invalid("min_zoom is above max_zoom"));
        }
        if let LayerKind::Symbol(symbol) = &self.kind {
            if symbol.text_field.is_none() && symbol.icon_image.is_none() {
                return Err(invalid("symbol layer has neither text nor icon"));
            }
            if !(symbol.text_size.is_finite() && symbol.text_size > 0.0) {
                return Err(invalid("text_size must be positive"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerKind {
    Fill,
    Line,
    Circle,
    Symbol(SymbolLayerProperties),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolPlacement {
    #[default]
    Point,
    Line,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationAlignment {
    Map,
    Viewport,
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolLayerProperties {
    /// Feature property holding the label text.
    pub text_field: Option<String>,
    pub icon_image: Option<String>,
    pub font_stack: String,
    pub text_size: f32,
    pub icon_size: f32,
    pub placement: SymbolPlacement,
    pub rotation_alignment: RotationAlignment,
    pub allow_overlap: bool,
    pub ignore_placement: bool,
    pub avoid_edges: bool,
    pub padding: f32,
    pub keep_upright: bool,
}

impl Default for SymbolLayerProperties {
    fn default() -> Self {
        Self {
            text_field: None,
            icon_image: None,
            font_stack: "Open Sans Regular".to_string(),
            text_size: 16.0,
            icon_size: 1.0,
            placement: SymbolPlacement::Point,
            rotation_alignment: RotationAlignment::Auto,
            allow_overlap: false,
            ignore_placement: false,
            avoid_edges: false,
            padding: 2.0,
            keep_upright: true,
        }
    }
}

impl SymbolLayerProperties {
    /// `Auto` follows the line for line labels and stays upright otherwise.
    pub fn alignment(&self) -> Alignment {
        match (self.rotation_alignment, self.placement) {
            (RotationAlignment::Map, _) | (RotationAlignment::Auto, SymbolPlacement::Line) => {
                Alignment::Map
            }
            (RotationAlignment::Viewport, _) | (RotationAlignment::Auto, SymbolPlacement::Point) => {
                Alignment::Viewport
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Filter {
    All { filters: Vec<Filter> },
    Any { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
    Has { key: String },
    Equals { key: String, value: Value },
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All {
            filters: Vec::new(),
        }
    }
}

impl Filter {
    pub fn matches(&self, feature: &Feature) -> bool {
        match self {
            Filter::All { filters } => filters.iter().all(|f| f.matches(feature)),
            Filter::Any { filters } => filters.iter().any(|f| f.matches(feature)),
            Filter::Not { filter } => !filter.matches(feature),
            Filter::Has { key } => feature.property(key).is_some(),
            Filter::Equals { key, value } => feature.property(key) == Some(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use vectile_shared::Point;

    use super::*;
    use crate::tile_data::Geometry;

    fn feature(properties: Value) -> Feature {
        let properties: HashMap<String, Value> =
            serde_json::from_value(properties).expect("object properties");
        Feature {
            id: None,
            geometry: Geometry::points(vec![Point::new(1.0, 1.0)]),
            properties,
        }
    }

    #[test]
    fn layers_parse_from_json() {
        let layer: Layer = serde_json::from_value(json!({
            "id": "poi-labels",
            "source_layer": "poi",
            "type": "symbol",
            "text_field": "name",
            "min_zoom": 4,
            "filter": {"op": "has", "key": "name"}
        }))
        .expect("parse layer");
        assert!(layer.is_symbol());
        assert_eq!(layer.bucket_name(), "poi-labels");
        assert_eq!(layer.max_zoom, 24.0);
        let LayerKind::Symbol(props) = &layer.kind else {
            panic!("expected a symbol layer");
        };
        assert_eq!(props.text_field.as_deref(), Some("name"));
        assert_eq!(props.text_size, 16.0);
        assert_eq!(props.alignment(), Alignment::Viewport);

        let fill: Layer = serde_json::from_value(json!({
            "id": "water-outline",
            "ref": "water",
            "source_layer": "water",
            "type": "line"
        }))
        .expect("parse ref layer");
        assert_eq!(fill.bucket_name(), "water");
    }

    #[test]
    fn zoom_range_uses_floor_and_ceil() {
        let mut layer = Layer::new("roads", "roads", LayerKind::Line);
        layer.min_zoom = 7.5;
        layer.max_zoom = 9.2;
        assert!(!layer.visible_at(6));
        assert!(layer.visible_at(7));
        assert!(layer.visible_at(9));
        assert!(!layer.visible_at(10));
    }

    #[test]
    fn filters_combine() {
        let filter = Filter::All {
            filters: vec![
                Filter::Has { key: "name".into() },
                Filter::Not {
                    filter: Box::new(Filter::Equals {
                        key: "class".into(),
                        value: json!("service"),
                    }),
                },
                Filter::Any {
                    filters: vec![
                        Filter::Equals { key: "rank".into(), value: json!(1) },
                        Filter::Equals { key: "rank".into(), value: json!(2) },
                    ],
                },
            ],
        };
        assert!(filter.matches(&feature(json!({"name": "A", "class": "primary", "rank": 2}))));
        assert!(!filter.matches(&feature(json!({"name": "A", "class": "service", "rank": 1}))));
        assert!(!filter.matches(&feature(json!({"class": "primary", "rank": 1}))));
        assert!(!filter.matches(&feature(json!({"name": "A", "rank": 3}))));
        assert!(Filter::default().matches(&feature(json!({}))));
    }

    #[test]
    fn line_labels_follow_the_map_by_default() {
        let props = SymbolLayerProperties {
            placement: SymbolPlacement::Line,
            ..SymbolLayerProperties::default()
        };
        assert_eq!(props.alignment(), Alignment::Map);
        let pinned = SymbolLayerProperties {
            rotation_alignment: RotationAlignment::Viewport,
            ..props
        };
        assert_eq!(pinned.alignment(), Alignment::Viewport);
    }

    #[test]
    fn symbol_layers_need_text_or_icon() {
        let layer = Layer::new(
            "empty",
            "poi",
            LayerKind::Symbol(SymbolLayerProperties::default()),
        );
        assert!(matches!(layer.validate(), Err(WorkerError::InvalidLayer { .. })));
    }
}
