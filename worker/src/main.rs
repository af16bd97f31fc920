use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vectile_shared::{OverscaledTileId, TransformState};
use vectile_worker::bucket::PlacedSymbol;
use vectile_worker::config;
use vectile_worker::registry::{GlyphMetrics, IconMetrics};
use vectile_worker::style::Layer;
use vectile_worker::tile_data::{GeometryTileData, TileData};
use vectile_worker::{
    DependencyRegistry, GeometryTile, WorkerContext, WorkerCounters, WorkerCountersSnapshot,
};

const DEFAULT_FIXTURE: &str = include_str!("../fixtures/demo.json");
const TILE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum DemoError {
    #[error("failed to read fixture: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse fixture: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tile task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Deserialize)]
struct Fixture {
    transform: TransformState,
    layers: Vec<Layer>,
    #[serde(default)]
    glyphs: HashMap<String, FixtureFont>,
    #[serde(default)]
    icons: HashMap<String, IconMetrics>,
    tiles: Vec<FixtureTile>,
}

/// Every glyph of a font shares one set of metrics in fixtures.
#[derive(Debug, Deserialize)]
struct FixtureFont {
    chars: String,
    advance: f32,
    height: f32,
}

#[derive(Debug, Deserialize)]
struct FixtureTile {
    id: OverscaledTileId,
    data: Option<TileData>,
}

#[derive(Debug, Serialize)]
struct BucketSummary {
    kind: &'static str,
    layer_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TileSummary {
    tile: String,
    loaded: bool,
    pending: bool,
    buckets: BTreeMap<String, BucketSummary>,
    labels: BTreeMap<String, Vec<PlacedSymbol>>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct Summary {
    generated_at: String,
    tiles: Vec<TileSummary>,
    counters: WorkerCountersSnapshot,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = config::worker_threads() {
        builder.worker_threads(threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start tokio runtime");
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(std::env::args().nth(1))) {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!(error = %e, "failed to encode summary");
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run(fixture_path: Option<String>) -> Result<Summary, DemoError> {
    let fixture: Fixture = match fixture_path {
        Some(path) => {
            info!(path = %path, "loading fixture");
            serde_json::from_str(&tokio::fs::read_to_string(&path).await?)?
        }
        None => serde_json::from_str(DEFAULT_FIXTURE)?,
    };

    let registry = Arc::new(DependencyRegistry::new());
    let counters = Arc::new(WorkerCounters::default());
    let context = WorkerContext::new(registry.clone(), counters.clone(), config::pixel_ratio());
    let placement_config = config::placement_config(fixture.transform);
    let layers: Vec<Arc<Layer>> = fixture.layers.into_iter().map(Arc::new).collect();
    info!(
        tiles = fixture.tiles.len(),
        layers = layers.len(),
        cell_size = placement_config.cell_size,
        "starting tile workers"
    );

    let mut tasks = Vec::new();
    for fixture_tile in fixture.tiles {
        let mut tile = GeometryTile::new(fixture_tile.id, placement_config, context.clone());
        tile.set_layers(&layers);
        tile.set_data(
            fixture_tile
                .data
                .map(|data| Arc::new(data) as Arc<dyn GeometryTileData>),
        );
        tasks.push(tokio::spawn(settle(tile)));
    }

    // Glyphs and icons show up after the tiles, as they would from the network.
    for (font_stack, font) in fixture.glyphs {
        let metrics = GlyphMetrics {
            advance: font.advance,
            height: font.height,
        };
        registry.add_glyphs(&font_stack, font.chars.chars().map(|c| (c, metrics)));
    }
    registry.add_icons(fixture.icons);

    let mut tiles = Vec::with_capacity(tasks.len());
    for task in tasks {
        tiles.push(task.await?);
    }

    Ok(Summary {
        generated_at: chrono::Utc::now().to_rfc3339(),
        tiles,
        counters: counters.snapshot(),
    })
}

/// Drives a tile until it has placed its labels or failed.
async fn settle(mut tile: GeometryTile) -> TileSummary {
    let done = |tile: &GeometryTile| {
        !tile.is_pending() && (tile.placement().is_some() || tile.error().is_some())
    };
    let waited = tokio::time::timeout(TILE_TIMEOUT, async {
        while !done(&tile) {
            if tile.next_event().await.is_none() {
                break;
            }
        }
    })
    .await;
    if waited.is_err() {
        warn!(tile = %tile.id(), "tile did not settle in time");
    }
    summarize(&tile)
}

fn summarize(tile: &GeometryTile) -> TileSummary {
    let buckets = tile
        .layout()
        .map(|layout| {
            layout
                .buckets
                .iter()
                .map(|(name, bucket)| {
                    (
                        name.clone(),
                        BucketSummary {
                            kind: bucket.kind(),
                            layer_ids: bucket.layer_ids().to_vec(),
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    let labels = tile
        .placement()
        .map(|placement| {
            placement
                .buckets
                .iter()
                .filter_map(|(name, bucket)| {
                    bucket.as_symbol().map(|symbols| (name.clone(), symbols.symbols.clone()))
                })
                .collect()
        })
        .unwrap_or_default();

    TileSummary {
        tile: tile.id().to_string(),
        loaded: tile.is_loaded(),
        pending: tile.is_pending(),
        buckets,
        labels,
        error: tile.error().map(ToString::to_string),
    }
}
