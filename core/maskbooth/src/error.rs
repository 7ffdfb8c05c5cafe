use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoothError {
    #[error("failed to load overlay asset {path}: {reason}")]
    AssetLoad { path: String, reason: String },

    #[error("unknown overlay: {0}")]
    UnknownOverlay(String),

    #[error("overlay manifest unavailable: {0}")]
    Manifest(String),

    #[error("face detector failed to initialize: {0}")]
    DetectorInit(String),

    #[error("face detection tick failed: {0}")]
    DetectorTick(String),

    #[error("calibration storage error: {0}")]
    Storage(String),

    #[error("degenerate overlay geometry: {width}x{height}")]
    DegenerateGeometry { width: f64, height: f64 },

    #[error("invalid calibration for {overlay_id}: {reason}")]
    InvalidCalibration { overlay_id: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no face detected, look at the camera and try again")]
    FaceNotDetected,

    #[error("calibration wizard cannot {action} while {state}")]
    WizardState {
        action: &'static str,
        state: &'static str,
    },

    #[error("surface error: {0}")]
    Surface(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BoothError>;
