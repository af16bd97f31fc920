use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tracing::{debug, error, warn};
use vectile_shared::{CollisionTile, OverscaledTileId, PlacementConfig};

use crate::bucket::{Bucket, GeometryBucket};
use crate::error::WorkerError;
use crate::feature_index::FeatureIndex;
use crate::registry::DependencyRegistry;
use crate::stats::WorkerCounters;
use crate::style::{Layer, LayerKind};
use crate::symbol_layout::{SymbolLayout, SymbolLayoutState};
use crate::tile_data::GeometryTileData;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    /// A pass just finished; updates arriving now are batched.
    Coalescing,
    NeedLayout,
    NeedPlacement,
}

#[derive(Debug)]
pub enum WorkerMessage {
    /// `None` data means the tile could not be loaded and has no content.
    SetData {
        data: Option<Arc<dyn GeometryTileData>>,
        correlation_id: u64,
    },
    SetLayers {
        layers: Vec<Arc<Layer>>,
        correlation_id: u64,
    },
    SetPlacementConfig {
        config: PlacementConfig,
        correlation_id: u64,
    },
    Reset {
        correlation_id: u64,
    },
    SymbolDependenciesChanged,
    /// Self-sent after every pass.
    Coalesced,
}

#[derive(Debug)]
pub struct LayoutResult {
    pub buckets: HashMap<String, Bucket>,
    pub feature_index: FeatureIndex,
    pub tile_data: Option<Arc<dyn GeometryTileData>>,
    pub correlation_id: u64,
}

#[derive(Debug)]
pub struct PlacementResult {
    pub buckets: HashMap<String, Bucket>,
    pub collision_tile: CollisionTile,
    pub correlation_id: u64,
}

/// What a worker reports back to its tile.
#[derive(Debug)]
pub enum TileEvent {
    Layout(LayoutResult),
    Placement(PlacementResult),
    Error {
        error: WorkerError,
        correlation_id: u64,
    },
}

/// Resources shared by every worker of a process.
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: Arc<DependencyRegistry>,
    pub counters: Arc<WorkerCounters>,
    pub pixel_ratio: f32,
}

impl WorkerContext {
    pub fn new(registry: Arc<DependencyRegistry>, counters: Arc<WorkerCounters>, pixel_ratio: f32) -> Self {
        Self {
            registry,
            counters,
            pixel_ratio,
        }
    }
}

/// Lays out and places one tile. Driven only through its mailbox, one
/// message at a time.
pub struct GeometryTileWorker {
    id: u64,
    tile: OverscaledTileId,
    mailbox: WeakUnboundedSender<WorkerMessage>,
    parent: UnboundedSender<TileEvent>,
    obsolete: Arc<AtomicBool>,
    context: WorkerContext,
    state: WorkerState,
    /// Outer `None` until data arrives; inner `None` for a tile without
    /// content.
    data: Option<Option<Arc<dyn GeometryTileData>>>,
    layers: Option<Vec<Arc<Layer>>>,
    placement_config: PlacementConfig,
    correlation_id: u64,
    symbol_layouts: Vec<SymbolLayout>,
    failed: bool,
}

impl GeometryTileWorker {
    pub fn new(
        tile: OverscaledTileId,
        placement_config: PlacementConfig,
        context: WorkerContext,
        obsolete: Arc<AtomicBool>,
        mailbox: WeakUnboundedSender<WorkerMessage>,
        parent: UnboundedSender<TileEvent>,
    ) -> Self {
        Self {
            id: NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed),
            tile,
            mailbox,
            parent,
            obsolete,
            context,
            state: WorkerState::Idle,
            data: None,
            layers: None,
            placement_config,
            correlation_id: 0,
            symbol_layouts: Vec::new(),
            failed: false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub async fn run(mut self, mut mailbox: UnboundedReceiver<WorkerMessage>) {
        while let Some(message) = mailbox.recv().await {
            self.handle(message);
        }
        debug!(tile = %self.tile, "tile worker stopped");
    }

    pub fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::SetData {
                data,
                correlation_id,
            } => {
                self.data = Some(data);
                self.correlation_id = correlation_id;
                self.failed = false;
                self.on_layout_input();
            }
            WorkerMessage::SetLayers {
                layers,
                correlation_id,
            } => {
                self.layers = Some(layers);
                self.correlation_id = correlation_id;
                self.on_layout_input();
            }
            WorkerMessage::SetPlacementConfig {
                config,
                correlation_id,
            } => {
                self.placement_config = config;
                self.correlation_id = correlation_id;
                self.on_placement_input();
            }
            WorkerMessage::Reset { correlation_id } => {
                self.data = None;
                self.layers = None;
                self.symbol_layouts.clear();
                self.correlation_id = correlation_id;
                if matches!(self.state, WorkerState::Coalescing | WorkerState::NeedPlacement) {
                    self.state = WorkerState::NeedLayout;
                }
            }
            WorkerMessage::SymbolDependenciesChanged => self.on_symbol_dependencies_changed(),
            WorkerMessage::Coalesced => self.on_coalesced(),
        }
    }

    fn on_layout_input(&mut self) {
        match self.state {
            WorkerState::Idle => {
                self.redo_layout();
                self.coalesce();
            }
            WorkerState::Coalescing | WorkerState::NeedPlacement => {
                self.state = WorkerState::NeedLayout;
            }
            WorkerState::NeedLayout => {}
        }
    }

    fn on_placement_input(&mut self) {
        match self.state {
            WorkerState::Idle => {
                self.attempt_placement();
                self.coalesce();
            }
            WorkerState::Coalescing => self.state = WorkerState::NeedPlacement,
            WorkerState::NeedLayout | WorkerState::NeedPlacement => {}
        }
    }

    fn on_symbol_dependencies_changed(&mut self) {
        if !self.has_pending_symbol_layouts() {
            return;
        }
        match self.state {
            WorkerState::Idle => {
                self.attempt_placement();
                self.coalesce();
            }
            WorkerState::Coalescing => self.state = WorkerState::NeedPlacement,
            WorkerState::NeedLayout | WorkerState::NeedPlacement => {}
        }
    }

    fn on_coalesced(&mut self) {
        debug_assert!(
            self.state != WorkerState::Idle,
            "coalesced message received while idle"
        );
        match self.state {
            WorkerState::Idle => {
                error!(tile = %self.tile, "coalesced message received while idle");
            }
            WorkerState::Coalescing => self.state = WorkerState::Idle,
            WorkerState::NeedLayout => {
                self.redo_layout();
                self.coalesce();
            }
            WorkerState::NeedPlacement => {
                self.attempt_placement();
                self.coalesce();
            }
        }
    }

    /// Enters `Coalescing` and queues `Coalesced` behind everything already
    /// in the mailbox.
    fn coalesce(&mut self) {
        self.state = WorkerState::Coalescing;
        match self.mailbox.upgrade() {
            Some(mailbox) => {
                if mailbox.send(WorkerMessage::Coalesced).is_err() {
                    debug!(tile = %self.tile, "mailbox closed while coalescing");
                }
            }
            None => debug!(tile = %self.tile, "no handles left, not coalescing"),
        }
    }

    fn has_pending_symbol_layouts(&self) -> bool {
        self.symbol_layouts
            .iter()
            .any(|layout| layout.state() == SymbolLayoutState::Pending)
    }

    fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    fn report(&self, event: TileEvent) {
        if self.parent.send(event).is_err() {
            warn!(tile = %self.tile, "tile is gone, dropping worker result");
        }
    }

    fn fail(&mut self, error: WorkerError) {
        error!(
            tile = %self.tile,
            correlation_id = self.correlation_id,
            "tile worker pass failed: {error}"
        );
        self.failed = true;
        self.context.counters.record_failed_pass();
        self.report(TileEvent::Error {
            error,
            correlation_id: self.correlation_id,
        });
    }

    fn redo_layout(&mut self) {
        if self.failed {
            return;
        }
        let (Some(data), Some(layers)) = (self.data.clone(), self.layers.clone()) else {
            return;
        };

        let started = Instant::now();
        match self.layout(data.as_deref(), &layers) {
            Ok(Some((buckets, feature_index, symbol_layouts))) => {
                self.symbol_layouts = symbol_layouts;
                self.context.counters.record_layout_pass();
                debug!(
                    tile = %self.tile,
                    correlation_id = self.correlation_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    buckets = buckets.len(),
                    "layout pass finished"
                );
                self.report(TileEvent::Layout(LayoutResult {
                    buckets,
                    feature_index,
                    tile_data: data,
                    correlation_id: self.correlation_id,
                }));
                self.attempt_placement();
            }
            Ok(None) => {
                self.context.counters.record_cancelled_pass();
                debug!(tile = %self.tile, "layout pass cancelled");
            }
            Err(error) => self.fail(error),
        }
    }

    /// Builds every bucket of the tile. `Ok(None)` when the tile went
    /// obsolete part way through.
    #[allow(clippy::type_complexity)]
    fn layout(
        &self,
        data: Option<&dyn GeometryTileData>,
        layers: &[Arc<Layer>],
    ) -> Result<Option<(HashMap<String, Bucket>, FeatureIndex, Vec<SymbolLayout>)>, WorkerError> {
        // Layers sharing a bucket name are laid out once, by the first of them.
        let mut groups: Vec<(&str, Vec<&Arc<Layer>>)> = Vec::new();
        for layer in layers {
            match groups.iter_mut().find(|(name, _)| *name == layer.bucket_name()) {
                Some((_, group)) => group.push(layer),
                None => groups.push((layer.bucket_name(), vec![layer])),
            }
        }

        let mut buckets = HashMap::new();
        let mut feature_index = FeatureIndex::new(self.placement_config.cell_size);
        let mut symbol_layouts = Vec::new();

        for (bucket_name, group) in groups {
            if self.is_obsolete() {
                return Ok(None);
            }
            let leader = group[0];
            leader.validate()?;

            let Some(source) = data.and_then(|data| data.layer(&leader.source_layer)) else {
                continue;
            };
            let layer_ids: Vec<String> = group.iter().map(|layer| layer.id.clone()).collect();

            let mut geometry = GeometryBucket::new(layer_ids.clone());
            let wrap: fn(GeometryBucket) -> Bucket = match &leader.kind {
                LayerKind::Symbol(_) => {
                    symbol_layouts.push(SymbolLayout::new(leader, layer_ids, source, &mut feature_index)?);
                    continue;
                }
                LayerKind::Fill => Bucket::Fill,
                LayerKind::Line => Bucket::Line,
                LayerKind::Circle => Bucket::Circle,
            };

            for (index, feature) in source.features.iter().enumerate() {
                if !leader.filter.matches(feature) {
                    continue;
                }
                feature.geometry.validate(&leader.id, index)?;
                if let Some(bbox) = feature.geometry.bounds() {
                    feature_index.insert(bbox, &leader.source_layer, bucket_name, index);
                }
                geometry.add_feature(index, feature.geometry.clone());
            }
            let bucket = wrap(geometry);
            if bucket.has_data() {
                buckets.insert(bucket_name.to_string(), bucket);
            }
        }

        Ok(Some((buckets, feature_index, symbol_layouts)))
    }

    fn attempt_placement(&mut self) {
        if self.failed || self.data.is_none() || self.layers.is_none() {
            return;
        }

        let registry = self.context.registry.clone();
        let mut can_place = true;
        for layout in &mut self.symbol_layouts {
            if self.obsolete.load(Ordering::Acquire) {
                self.context.counters.record_cancelled_pass();
                return;
            }
            if layout.state() != SymbolLayoutState::Pending {
                continue;
            }
            if layout.can_prepare(&registry) {
                layout.prepare(&registry, self.context.pixel_ratio);
            } else {
                can_place = false;
            }
        }

        if !can_place {
            self.defer_placement(&registry);
            return;
        }
        registry.unregister(self.id);

        let started = Instant::now();
        let mut collision_tile = CollisionTile::new(self.tile, self.placement_config);
        let mut buckets = HashMap::new();
        let mut dropped_labels = 0;

        for layout in &mut self.symbol_layouts {
            let Some(result) = layout.place(&mut collision_tile, &self.obsolete) else {
                self.context.counters.record_cancelled_pass();
                debug!(tile = %self.tile, "placement pass cancelled");
                return;
            };
            dropped_labels += result.dropped_labels;
            if let Some(bucket) = result.bucket {
                buckets.insert(layout.bucket_name.clone(), Bucket::Symbol(bucket));
            }
        }

        if dropped_labels > 0 {
            self.context.counters.record_dropped_labels(dropped_labels);
        }
        self.context.counters.record_placement_pass();
        debug!(
            tile = %self.tile,
            correlation_id = self.correlation_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            placed = collision_tile.placed_feature_count(),
            "placement pass finished"
        );
        self.report(TileEvent::Placement(PlacementResult {
            buckets,
            collision_tile,
            correlation_id: self.correlation_id,
        }));
    }

    /// Waits for the registry to announce new glyphs or icons.
    fn defer_placement(&self, registry: &DependencyRegistry) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            registry.register(self.id, &mailbox);
            // Glyphs may have landed between the check and the registration.
            let ready = self.symbol_layouts.iter().all(|layout| {
                layout.state() != SymbolLayoutState::Pending || layout.can_prepare(registry)
            });
            if ready && mailbox.send(WorkerMessage::SymbolDependenciesChanged).is_err() {
                debug!(tile = %self.tile, "mailbox closed while deferring placement");
            }
        }
        self.context.counters.record_deferred_placement();
        debug!(tile = %self.tile, "placement deferred until glyphs and icons arrive");
    }
}

impl Drop for GeometryTileWorker {
    fn drop(&mut self) {
        self.context.registry.unregister(self.id);
    }
}

/// Sending side of a worker's mailbox.
#[derive(Clone)]
pub struct WorkerHandle {
    mailbox: UnboundedSender<WorkerMessage>,
    obsolete: Arc<AtomicBool>,
}

impl WorkerHandle {
    fn send(&self, message: WorkerMessage) {
        if self.mailbox.send(message).is_err() {
            warn!("tile worker has stopped, dropping message");
        }
    }

    pub fn set_data(&self, data: Option<Arc<dyn GeometryTileData>>, correlation_id: u64) {
        self.send(WorkerMessage::SetData {
            data,
            correlation_id,
        });
    }

    pub fn set_layers(&self, layers: Vec<Arc<Layer>>, correlation_id: u64) {
        self.send(WorkerMessage::SetLayers {
            layers,
            correlation_id,
        });
    }

    pub fn set_placement_config(&self, config: PlacementConfig, correlation_id: u64) {
        self.send(WorkerMessage::SetPlacementConfig {
            config,
            correlation_id,
        });
    }

    pub fn reset(&self, correlation_id: u64) {
        self.send(WorkerMessage::Reset { correlation_id });
    }

    pub fn symbol_dependencies_changed(&self) {
        self.send(WorkerMessage::SymbolDependenciesChanged);
    }

    /// Cancels whatever pass is running; the worker notices at its next
    /// loop boundary.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn obsolete_flag(&self) -> Arc<AtomicBool> {
        self.obsolete.clone()
    }
}

/// Starts a worker for `tile` on the current tokio runtime.
pub fn spawn(
    tile: OverscaledTileId,
    placement_config: PlacementConfig,
    context: WorkerContext,
    parent: UnboundedSender<TileEvent>,
) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let obsolete = Arc::new(AtomicBool::new(false));
    let worker = GeometryTileWorker::new(
        tile,
        placement_config,
        context,
        obsolete.clone(),
        tx.downgrade(),
        parent,
    );
    tokio::spawn(worker.run(rx));
    WorkerHandle {
        mailbox: tx,
        obsolete,
    }
}
