use futures::future::{self, FutureExt, LocalBoxFuture};
use log::debug;

use crate::error::{BoothError, Result};
use crate::face_detector::{CoordinateSpace, FaceDetector, FaceEstimate, VideoFrame};
use crate::geometry::Rect;

/// SeetaFace scores at which the reported confidence reaches 0.5.
const SCORE_HALF_CONFIDENCE: f64 = 5.0;

/// Face detector backed by the `rustface` crate (SeetaFace engine).
///
/// The model is supplied as bytes (e.g. `seeta_fd_frontal_v1.0.bin` fetched
/// at startup) and parsed in [`FaceDetector::initialize`], so a bad model
/// takes the signal source's synthetic fallback path instead of failing at
/// construction.
pub struct RustfaceDetector {
    model_bytes: Vec<u8>,
    model: Option<rustface::Model>,
    min_face_size: u32,
}

impl RustfaceDetector {
    /// Create a detector from raw SeetaFace model bytes.
    pub fn new(model_bytes: Vec<u8>) -> Self {
        Self {
            model_bytes,
            model: None,
            min_face_size: 20,
        }
    }

    /// Read the model from `path`.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }

    /// Smallest face edge in pixels to search for (default: 20).
    pub fn min_face_size(mut self, pixels: u32) -> Self {
        self.min_face_size = pixels;
        self
    }

    fn run(&self, frame: &VideoFrame<'_>) -> Result<Vec<FaceEstimate>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BoothError::DetectorTick("model not initialized".into()))?;
        let gray = frame
            .grayscale()
            .ok_or_else(|| BoothError::DetectorTick("frame carries no pixels".into()))?;

        let mut detector = rustface::create_detector_with_model(model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(&gray, frame.width, frame.height));
        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                let score = face.score().max(0.0);
                FaceEstimate::from_box(
                    Rect::new(
                        bbox.x() as f64,
                        bbox.y() as f64,
                        bbox.width() as f64,
                        bbox.height() as f64,
                    ),
                    score / (score + SCORE_HALF_CONFIDENCE),
                    CoordinateSpace::Absolute,
                )
            })
            .collect())
    }
}

impl FaceDetector for RustfaceDetector {
    fn name(&self) -> &str {
        "rustface"
    }

    fn initialize(&mut self) -> LocalBoxFuture<'_, Result<()>> {
        let result = rustface::read_model(std::io::Cursor::new(&self.model_bytes))
            .map(|model| {
                debug!("SeetaFace model loaded ({} bytes)", self.model_bytes.len());
                self.model = Some(model);
            })
            .map_err(|e| BoothError::DetectorInit(format!("invalid SeetaFace model: {e}")));
        future::ready(result).boxed_local()
    }

    fn detect<'a>(
        &'a mut self,
        frame: &'a VideoFrame<'_>,
    ) -> LocalBoxFuture<'a, Result<Vec<FaceEstimate>>> {
        future::ready(self.run(frame)).boxed_local()
    }
}
