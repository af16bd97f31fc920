use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};
use vectile_shared::{BBox, OverscaledTileId, PlacementConfig};

use crate::error::WorkerError;
use crate::feature_index::IndexedFeature;
use crate::geometry_tile_worker::{
    self, LayoutResult, PlacementResult, TileEvent, WorkerContext, WorkerHandle,
};
use crate::style::{Filter, Layer};
use crate::tile_data::{Feature, GeometryTileData};

/// Which kind of worker event a tile just applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileUpdate {
    Layout,
    Placement,
    Error,
}

/// Owner side of a tile: forwards updates to its worker and keeps the
/// latest results it reported.
pub struct GeometryTile {
    id: OverscaledTileId,
    worker: WorkerHandle,
    events: UnboundedReceiver<TileEvent>,
    correlation_id: u64,
    placement_config: PlacementConfig,
    pending: bool,
    loaded: bool,
    layout: Option<LayoutResult>,
    placement: Option<PlacementResult>,
    error: Option<WorkerError>,
}

impl GeometryTile {
    pub fn new(id: OverscaledTileId, placement_config: PlacementConfig, context: WorkerContext) -> Self {
        let (parent, events) = mpsc::unbounded_channel();
        let worker = geometry_tile_worker::spawn(id, placement_config, context, parent);
        Self {
            id,
            worker,
            events,
            correlation_id: 0,
            placement_config,
            pending: false,
            loaded: false,
            layout: None,
            placement: None,
            error: None,
        }
    }

    pub fn id(&self) -> OverscaledTileId {
        self.id
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// Waiting on a result for the latest update.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_obsolete(&self) -> bool {
        self.worker.obsolete_flag().load(Ordering::Acquire)
    }

    pub fn layout(&self) -> Option<&LayoutResult> {
        self.layout.as_ref()
    }

    pub fn placement(&self) -> Option<&PlacementResult> {
        self.placement.as_ref()
    }

    pub fn error(&self) -> Option<&WorkerError> {
        self.error.as_ref()
    }

    fn next_correlation_id(&mut self) -> u64 {
        self.pending = true;
        self.correlation_id += 1;
        self.correlation_id
    }

    pub fn set_data(&mut self, data: Option<Arc<dyn GeometryTileData>>) {
        let correlation_id = self.next_correlation_id();
        self.worker.set_data(data, correlation_id);
    }

    /// Forwards the layers whose zoom range covers this tile.
    pub fn set_layers(&mut self, layers: &[Arc<Layer>]) {
        let visible: Vec<Arc<Layer>> = layers
            .iter()
            .filter(|layer| layer.visible_at(self.id.overscaled_z))
            .cloned()
            .collect();
        debug!(
            tile = %self.id,
            layers = visible.len(),
            hidden = layers.len() - visible.len(),
            "forwarding layers"
        );
        let correlation_id = self.next_correlation_id();
        self.worker.set_layers(visible, correlation_id);
    }

    pub fn set_placement_config(&mut self, config: PlacementConfig) {
        self.placement_config = config;
        let correlation_id = self.next_correlation_id();
        self.worker.set_placement_config(config, correlation_id);
    }

    pub fn set_show_collision_boxes(&mut self, show: bool) {
        if self.placement_config.show_collision_boxes == show {
            return;
        }
        let config = PlacementConfig {
            show_collision_boxes: show,
            ..self.placement_config
        };
        self.set_placement_config(config);
    }

    /// Drops data and layers; the worker lays out again once both are set.
    pub fn reset(&mut self) {
        let correlation_id = self.next_correlation_id();
        self.worker.reset(correlation_id);
    }

    pub fn cancel(&self) {
        self.worker.mark_obsolete();
    }

    pub fn apply(&mut self, event: TileEvent) -> TileUpdate {
        match event {
            TileEvent::Layout(result) => {
                self.settle(result.correlation_id);
                self.layout = Some(result);
                TileUpdate::Layout
            }
            TileEvent::Placement(result) => {
                self.settle(result.correlation_id);
                self.placement = Some(result);
                TileUpdate::Placement
            }
            TileEvent::Error {
                error,
                correlation_id,
            } => {
                warn!(tile = %self.id, correlation_id, "tile failed: {error}");
                self.settle(correlation_id);
                self.error = Some(error);
                TileUpdate::Error
            }
        }
    }

    fn settle(&mut self, correlation_id: u64) {
        self.loaded = true;
        if correlation_id == self.correlation_id {
            self.pending = false;
        }
    }

    /// Waits for the worker's next event and applies it. `None` once the
    /// worker has stopped.
    pub async fn next_event(&mut self) -> Option<TileUpdate> {
        let event = self.events.recv().await?;
        Some(self.apply(event))
    }

    /// Features of the current tile data in `source_layers` that pass
    /// `filter`.
    pub fn query_source_features(&self, source_layers: &[&str], filter: &Filter) -> Vec<Feature> {
        let Some(data) = self.layout.as_ref().and_then(|layout| layout.tile_data.as_ref()) else {
            return Vec::new();
        };
        source_layers
            .iter()
            .filter_map(|name| data.layer(name))
            .flat_map(|layer| layer.features.iter())
            .filter(|feature| filter.matches(feature))
            .cloned()
            .collect()
    }

    /// Features whose bounds intersect `bbox`, in tile units.
    pub fn query_rendered_features(&self, bbox: &BBox) -> Vec<IndexedFeature> {
        self.layout
            .as_ref()
            .map(|layout| layout.feature_index.query(bbox).into_iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for GeometryTile {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use vectile_shared::{CanonicalTileId, Point};

    use super::*;
    use crate::feature_index::FeatureIndex;
    use crate::registry::DependencyRegistry;
    use crate::stats::WorkerCounters;
    use crate::style::{LayerKind, SymbolLayerProperties};
    use crate::tile_data::{Geometry, TileData};

    fn context() -> WorkerContext {
        WorkerContext::new(
            Arc::new(DependencyRegistry::new()),
            Arc::new(WorkerCounters::default()),
            1.0,
        )
    }

    fn tile() -> GeometryTile {
        GeometryTile::new(
            OverscaledTileId::new(8, 0, CanonicalTileId::new(8, 3, 5)),
            PlacementConfig::default(),
            context(),
        )
    }

    fn data() -> Arc<dyn GeometryTileData> {
        let park = Feature {
            id: Some(1),
            geometry: Geometry::polygon(vec![vec![
                Point::new(100.0, 100.0),
                Point::new(500.0, 100.0),
                Point::new(500.0, 500.0),
            ]]),
            properties: [("class".to_string(), json!("park"))].into_iter().collect(),
        };
        let school = Feature {
            id: Some(2),
            geometry: Geometry::polygon(vec![vec![
                Point::new(6000.0, 6000.0),
                Point::new(6500.0, 6000.0),
                Point::new(6500.0, 6500.0),
            ]]),
            properties: [("class".to_string(), json!("school"))].into_iter().collect(),
        };
        Arc::new(TileData::default().with_layer("landuse", vec![park, school]))
    }

    async fn settle(tile: &mut GeometryTile) {
        while tile.is_pending() {
            tile.next_event().await.expect("worker alive");
        }
    }

    #[tokio::test]
    async fn pending_clears_on_the_latest_result() {
        let mut tile = tile();
        assert!(!tile.is_pending());

        tile.set_layers(&[Arc::new(Layer::new("landuse", "landuse", LayerKind::Fill))]);
        tile.set_data(Some(data()));
        assert!(tile.is_pending());
        assert_eq!(tile.correlation_id(), 2);

        settle(&mut tile).await;
        assert!(tile.is_loaded());
        let layout = tile.layout().expect("layout result");
        assert_eq!(layout.correlation_id, 2);
        assert!(layout.buckets.contains_key("landuse"));
    }

    #[tokio::test]
    async fn stale_results_keep_the_tile_pending() {
        let mut tile = tile();
        tile.set_data(None);
        tile.set_data(None);
        let stale = TileEvent::Layout(LayoutResult {
            buckets: HashMap::new(),
            feature_index: FeatureIndex::new(512),
            tile_data: None,
            correlation_id: 1,
        });
        assert_eq!(tile.apply(stale), TileUpdate::Layout);
        assert!(tile.is_loaded());
        assert!(tile.is_pending());

        let error = TileEvent::Error {
            error: WorkerError::InvalidLayer {
                layer: "roads".into(),
                reason: "broken".into(),
            },
            correlation_id: 2,
        };
        assert_eq!(tile.apply(error), TileUpdate::Error);
        assert!(!tile.is_pending());
        assert!(tile.error().is_some());
    }

    #[tokio::test]
    async fn layers_outside_the_zoom_range_are_dropped() {
        let mut tile = tile();
        let mut detail = Layer::new("landuse-detail", "landuse", LayerKind::Line);
        detail.min_zoom = 10.0;
        tile.set_layers(&[
            Arc::new(Layer::new("landuse", "landuse", LayerKind::Fill)),
            Arc::new(detail),
        ]);
        tile.set_data(Some(data()));
        settle(&mut tile).await;

        let buckets = &tile.layout().expect("layout result").buckets;
        assert!(buckets.contains_key("landuse"));
        assert!(!buckets.contains_key("landuse-detail"));
    }

    #[tokio::test]
    async fn collision_box_toggle_only_sends_changes() {
        let mut tile = tile();
        tile.set_show_collision_boxes(false);
        assert_eq!(tile.correlation_id(), 0);
        tile.set_show_collision_boxes(true);
        assert_eq!(tile.correlation_id(), 1);
        tile.set_show_collision_boxes(true);
        assert_eq!(tile.correlation_id(), 1);
    }

    #[tokio::test]
    async fn queries_read_the_latest_layout() {
        let mut tile = tile();
        let mut filter_layer = Layer::new(
            "landuse-labels",
            "landuse",
            LayerKind::Symbol(SymbolLayerProperties {
                text_field: Some("class".to_string()),
                ..SymbolLayerProperties::default()
            }),
        );
        filter_layer.filter = Filter::Equals {
            key: "class".into(),
            value: json!("park"),
        };
        tile.set_layers(&[
            Arc::new(Layer::new("landuse", "landuse", LayerKind::Fill)),
            Arc::new(filter_layer),
        ]);
        tile.set_data(Some(data()));
        settle(&mut tile).await;

        let parks = tile.query_source_features(
            &["landuse", "missing"],
            &Filter::Equals {
                key: "class".into(),
                value: json!("park"),
            },
        );
        assert_eq!(parks.len(), 1);
        assert_eq!(parks[0].id, Some(1));

        let hits = tile.query_rendered_features(&BBox::new(200.0, 200.0, 250.0, 250.0));
        let buckets: Vec<&str> = hits.iter().map(|hit| hit.bucket_name.as_str()).collect();
        assert_eq!(buckets, vec!["landuse", "landuse-labels"]);
        assert!(tile.query_rendered_features(&BBox::new(3000.0, 3000.0, 3100.0, 3100.0)).is_empty());
    }

    #[test]
    fn tile_ids_from_json_are_validated() {
        let id: OverscaledTileId = serde_json::from_value(json!({
            "overscaled_z": 9,
            "wrap": 0,
            "canonical": { "z": 8, "x": 3, "y": 5 }
        }))
        .expect("valid id");
        assert_eq!(id.overscale_factor(), Some(2));

        let inverted = serde_json::from_value::<OverscaledTileId>(json!({
            "overscaled_z": 40,
            "wrap": 0,
            "canonical": { "z": 41, "x": 0, "y": 0 }
        }));
        assert!(inverted.is_err());
        let below = serde_json::from_value::<OverscaledTileId>(json!({
            "overscaled_z": 2,
            "wrap": 0,
            "canonical": { "z": 8, "x": 3, "y": 5 }
        }));
        assert!(below.is_err());
        assert!(serde_json::from_value::<CanonicalTileId>(json!({ "z": 2, "x": 4, "y": 0 })).is_err());
    }

    #[tokio::test]
    async fn cancel_marks_the_tile_obsolete() {
        let tile = tile();
        assert!(!tile.is_obsolete());
        tile.cancel();
        assert!(tile.is_obsolete());
    }
}
