use std::collections::HashMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vectile_shared::{BBox, Point};

use crate::error::WorkerError;

/// Decoded tile content, as handed over by the tile decoder.
pub trait GeometryTileData: Debug + Send + Sync {
    fn layer(&self, name: &str) -> Option<&TileLayer>;

    fn layer_names(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
}

/// Geometry in tile units. Points are a single part holding every point,
/// lines one part per line, polygons one part per ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: GeometryType,
    pub parts: Vec<Vec<Point>>,
}

impl Geometry {
    pub fn points(points: Vec<Point>) -> Self {
        Self {
            kind: GeometryType::Point,
            parts: vec![points],
        }
    }

    pub fn line(line: Vec<Point>) -> Self {
        Self {
            kind: GeometryType::LineString,
            parts: vec![line],
        }
    }

    pub fn polygon(rings: Vec<Vec<Point>>) -> Self {
        Self {
            kind: GeometryType::Polygon,
            parts: rings,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }

    pub fn bounds(&self) -> Option<BBox> {
        let mut points = self.parts.iter().flatten();
        let first = points.next()?;
        let mut bbox = BBox::new(first.x, first.y, first.x, first.y);
        for p in points {
            bbox.min.x = bbox.min.x.min(p.x);
            bbox.min.y = bbox.min.y.min(p.y);
            bbox.max.x = bbox.max.x.max(p.x);
            bbox.max.y = bbox.max.y.max(p.y);
        }
        Some(bbox)
    }

    /// Rejects geometry no bucket can be built from.
    pub fn validate(&self, layer: &str, feature: usize) -> Result<(), WorkerError> {
        let malformed = |reason: String| WorkerError::MalformedGeometry {
            layer: layer.to_string(),
            feature,
            reason,
        };

        if self.parts.is_empty() {
            return Err(malformed("no geometry parts".to_string()));
        }
        if let Some(p) = self.parts.iter().flatten().find(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(malformed(format!("non-finite coordinate ({}, {})", p.x, p.y)));
        }

        let min_len = match self.kind {
            GeometryType::Point => 1,
            GeometryType::LineString => 2,
            GeometryType::Polygon => 3,
        };
        for (i, part) in self.parts.iter().enumerate() {
            if part.len() < min_len {
                return Err(malformed(format!(
                    "{:?} part {i} has {} vertices, needs at least {min_len}",
                    self.kind,
                    part.len()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub id: Option<u64>,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl Feature {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property rendered as label text.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileLayer {
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// In-memory tile content, also the JSON fixture format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileData {
    pub layers: HashMap<String, TileLayer>,
}

impl TileData {
    pub fn with_layer(mut self, name: impl Into<String>, features: Vec<Feature>) -> Self {
        self.layers.insert(name.into(), TileLayer { features });
        self
    }
}

impl GeometryTileData for TileData {
    fn layer(&self, name: &str) -> Option<&TileLayer> {
        self.layers.get(name)
    }

    fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_round_trips_through_json() {
        let json = r#"{
            "id": 7,
            "geometry": {"type": "LineString", "parts": [[{"x": 0, "y": 0}, {"x": 10, "y": 5}]]},
            "properties": {"name": "Main St", "lanes": 2}
        }"#;
        let feature: Feature = serde_json::from_str(json).expect("parse feature");
        assert_eq!(feature.id, Some(7));
        assert_eq!(feature.geometry.kind, GeometryType::LineString);
        assert_eq!(feature.text("name").as_deref(), Some("Main St"));
        assert_eq!(feature.text("lanes").as_deref(), Some("2"));
        assert_eq!(feature.text("missing"), None);
    }

    #[test]
    fn validate_rejects_short_lines_and_nan() {
        let short = Geometry::line(vec![Point::new(0.0, 0.0)]);
        assert!(matches!(
            short.validate("roads", 3),
            Err(WorkerError::MalformedGeometry { feature: 3, .. })
        ));

        let nan = Geometry::points(vec![Point::new(f32::NAN, 1.0)]);
        assert!(nan.validate("pois", 0).is_err());

        let ok = Geometry::polygon(vec![vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
        ]]);
        assert!(ok.validate("water", 0).is_ok());
        assert_eq!(ok.vertex_count(), 3);
    }

    #[test]
    fn bounds_cover_every_part() {
        let geometry = Geometry::polygon(vec![
            vec![Point::new(5.0, 5.0), Point::new(20.0, 8.0), Point::new(6.0, 30.0)],
            vec![Point::new(-3.0, 9.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)],
        ]);
        let bbox = geometry.bounds().unwrap();
        assert_eq!(bbox, BBox::new(-3.0, 1.0, 20.0, 30.0));
        assert_eq!(Geometry::points(Vec::new()).bounds(), None);
    }
}
