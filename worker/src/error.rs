use thiserror::Error;

/// Failures that end processing for a tile until it receives new data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("layer {layer}: feature {feature} has malformed geometry: {reason}")]
    MalformedGeometry {
        layer: String,
        feature: usize,
        reason: String,
    },
    #[error("layer {layer} is invalid: {reason}")]
    InvalidLayer { layer: String, reason: String },
}
