use vectile_shared::collision_tile::DEFAULT_CELL_SIZE;
use vectile_shared::{PlacementConfig, TransformState};

pub const DEFAULT_PIXEL_RATIO: f32 = 1.0;
/// Size glyph metrics are rasterized at; text is scaled from this.
pub const GLYPH_BASE_SIZE: f32 = 24.0;

pub fn collision_cell_size() -> u32 {
    std::env::var("VECTILE_COLLISION_CELL_SIZE")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_CELL_SIZE)
}

pub fn pixel_ratio() -> f32 {
    std::env::var("VECTILE_PIXEL_RATIO")
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(DEFAULT_PIXEL_RATIO)
}

pub fn show_collision_boxes() -> bool {
    std::env::var("VECTILE_SHOW_COLLISION_BOXES")
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}

/// Runtime worker threads for the demo binary; `None` keeps tokio's default.
pub fn worker_threads() -> Option<usize> {
    std::env::var("VECTILE_WORKER_THREADS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

pub fn placement_config(transform: TransformState) -> PlacementConfig {
    PlacementConfig {
        transform,
        show_collision_boxes: show_collision_boxes(),
        cell_size: collision_cell_size(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        temp_env::with_vars_unset(
            [
                "VECTILE_COLLISION_CELL_SIZE",
                "VECTILE_PIXEL_RATIO",
                "VECTILE_SHOW_COLLISION_BOXES",
                "VECTILE_WORKER_THREADS",
            ],
            || {
                assert_eq!(collision_cell_size(), DEFAULT_CELL_SIZE);
                assert_eq!(pixel_ratio(), DEFAULT_PIXEL_RATIO);
                assert!(!show_collision_boxes());
                assert_eq!(worker_threads(), None);
            },
        );
    }

    #[test]
    fn env_overrides_are_parsed() {
        temp_env::with_vars(
            [
                ("VECTILE_COLLISION_CELL_SIZE", Some("256")),
                ("VECTILE_PIXEL_RATIO", Some("2")),
                ("VECTILE_SHOW_COLLISION_BOXES", Some(" Yes ")),
                ("VECTILE_WORKER_THREADS", Some("3")),
            ],
            || {
                let config = placement_config(TransformState::default());
                assert_eq!(config.cell_size, 256);
                assert!(config.show_collision_boxes);
                assert_eq!(pixel_ratio(), 2.0);
                assert_eq!(worker_threads(), Some(3));
            },
        );
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                ("VECTILE_COLLISION_CELL_SIZE", Some("0")),
                ("VECTILE_PIXEL_RATIO", Some("-1.5")),
                ("VECTILE_SHOW_COLLISION_BOXES", Some("maybe")),
                ("VECTILE_WORKER_THREADS", Some("lots")),
            ],
            || {
                assert_eq!(collision_cell_size(), DEFAULT_CELL_SIZE);
                assert_eq!(pixel_ratio(), DEFAULT_PIXEL_RATIO);
                assert!(!show_collision_boxes());
                assert_eq!(worker_threads(), None);
            },
        );
    }
}
