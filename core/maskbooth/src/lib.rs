//! Face-relative overlay compositing for live photo booths: track a noisy face
//! estimate, place a mask overlay on it with smoothing and per-overlay
//! calibration, and composite it onto the video feed.
//!
//! # Example
//!
//! ```no_run
//! use futures::executor::block_on;
//! use maskbooth::catalog::{FsAssetLoader, StaticManifest};
//! use maskbooth::storage::JsonFileStore;
//! use maskbooth::{
//!     BoothConfig, CalibrationStore, CompositorLoop, FaceSignalSource, OverlayCatalog,
//!     OverlaySession, RasterSurface, SurfaceSize, VideoFrame,
//! };
//!
//! let config = BoothConfig::default().smoothing_factor(0.35);
//! let manifest = StaticManifest::new(std::fs::read_to_string("masks.json").unwrap());
//! let catalog = block_on(OverlayCatalog::load(&manifest, &FsAssetLoader::new("assets")));
//! let store = CalibrationStore::new(Box::new(JsonFileStore::open("calibration.json")));
//! let mut session = OverlaySession::new(catalog, store, &config);
//! session.select("vader-mask").unwrap();
//!
//! let mut signal = FaceSignalSource::synthetic(&config);
//! let frame = VideoFrame::opaque(640, 480);
//! block_on(signal.tick(0.0, &frame));
//!
//! let mut surface = RasterSurface::new(SurfaceSize::new(640, 480));
//! let mut compositor = CompositorLoop::new(&config);
//! compositor.start();
//! # struct Camera;
//! # impl maskbooth::VideoSource for Camera {
//! #     fn current_frame(&self) -> Option<VideoFrame<'_>> { Some(VideoFrame::opaque(640, 480)) }
//! # }
//! compositor.tick(&mut session, signal.latest_estimate(), &Camera, &mut surface);
//! std::fs::write("snapshot.png", surface.snapshot_png().unwrap()).unwrap();
//! ```
#![warn(missing_docs)]

mod calibration;
/// Overlay definitions, manifests and asset loading.
pub mod catalog;
mod compositor;
mod config;
/// Keyboard-style manual adjustment of the active overlay.
pub mod controls;
mod error;
/// Face detection traits and data types.
pub mod face_detector;
mod geometry;
/// Face-relative overlay placement.
pub mod placement;
#[cfg(feature = "rustface")]
/// Built-in SeetaFace-based face detector backend.
pub mod rustface_backend;
mod session;
mod signal;
/// Durable key-value backends for calibration records.
pub mod storage;
mod surface;
#[cfg(test)]
mod test_log;
mod wizard;

/// Persisted per-overlay calibration.
pub use calibration::{CalibrationEntry, CalibrationOrigin, CalibrationStore};
/// Overlay catalog and definitions.
pub use catalog::{OverlayCatalog, OverlayCategory, OverlayDefinition, OverlayImage};
/// Per-frame render loop and the surfaces it draws on.
pub use compositor::{CompositorLoop, LoopState, StopHandle, Surface, TickOutcome, VideoSource};
/// Tunable settings.
pub use config::{is_debug_query, BoothConfig, FallbackFace, MAX_SMOOTHING_FACTOR};
/// Error type returned by maskbooth operations.
pub use error::{BoothError, Result};
/// Face detection trait and face estimate types.
pub use face_detector::{
    CoordinateSpace, EstimateSource, FaceDetector, FaceEstimate, Landmark, SyntheticDetector,
    VideoFrame,
};
/// Geometry primitives.
pub use geometry::{PlacementResult, Point, Rect, Size, SurfaceSize};
/// Placement engine.
pub use placement::{PlacementEngine, SmoothingState};
#[cfg(feature = "rustface")]
/// Detector that runs the SeetaFace engine on frame pixels.
pub use rustface_backend::RustfaceDetector;
/// Explicit per-booth context.
pub use session::OverlaySession;
/// Stabilized face signal.
pub use signal::FaceSignalSource;
/// Durable storage contract.
pub use storage::KeyValueStore;
/// In-memory raster output.
pub use surface::RasterSurface;
/// Multi-sample calibration flow.
pub use wizard::{CalibrationWizard, FaceSample, WizardState, REQUIRED_SAMPLES};
