use futures::future::{self, FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::config::FallbackFace;
use crate::error::Result;
use crate::geometry::{Point, Rect, Size, SurfaceSize};

/// How the coordinates of a [`FaceEstimate`] are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoordinateSpace {
    /// Fractions of the frame in [0, 1].
    Normalized,
    /// Pixels of the frame.
    Absolute,
    /// Not tagged by the detector; resolved by magnitude (sizes ≤ 1 are
    /// taken as normalized).
    #[default]
    Unspecified,
}

/// Whether an estimate came from a real detection or the synthetic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EstimateSource {
    /// A detector found a face.
    #[default]
    Detected,
    /// Centered stand-in used when nothing was detected.
    Fallback,
}

/// A single facial landmark in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Horizontal pixel coordinate.
    pub x: f64,
    /// Vertical pixel coordinate.
    pub y: f64,
    /// Optional depth, as reported by 3D mesh detectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Landmark {
    /// Create a 2D landmark.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    /// The landmark projected to the image plane.
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A detector's best guess at the face location for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceEstimate {
    /// Top-left corner of the face box.
    pub top_left: Point,
    /// Face box dimensions.
    pub size: Size,
    /// Face box center.
    pub center: Point,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Space the box fields are expressed in.
    #[serde(default)]
    pub coordinate_space: CoordinateSpace,
    /// Ordered landmark points, always in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<Landmark>>,
    /// Real detection or synthetic fallback.
    #[serde(default)]
    pub source: EstimateSource,
}

impl FaceEstimate {
    /// Build a detected estimate from a face box.
    pub fn from_box(bounds: Rect, confidence: f64, coordinate_space: CoordinateSpace) -> Self {
        Self {
            top_left: Point::new(bounds.x, bounds.y),
            size: Size::new(bounds.width, bounds.height),
            center: bounds.center(),
            confidence: confidence.clamp(0.0, 1.0),
            coordinate_space,
            landmarks: None,
            source: EstimateSource::Detected,
        }
    }

    /// Attach landmark points.
    pub fn with_landmarks(mut self, landmarks: Vec<Landmark>) -> Self {
        self.landmarks = if landmarks.is_empty() {
            None
        } else {
            Some(landmarks)
        };
        self
    }

    /// The face box as a rectangle.
    pub fn bounds(&self) -> Rect {
        Rect::new(self.top_left.x, self.top_left.y, self.size.width, self.size.height)
    }

    /// True when the estimate satisfies its invariants.
    pub fn is_valid(&self) -> bool {
        self.size.width > 0.0
            && self.size.height > 0.0
            && self.size.width.is_finite()
            && self.size.height.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }

    /// True for the synthetic centered estimate.
    pub fn is_fallback(&self) -> bool {
        self.source == EstimateSource::Fallback
    }

    /// Resolve the coordinate space, applying the magnitude heuristic to
    /// untagged estimates.
    pub fn resolved_space(&self) -> CoordinateSpace {
        match self.coordinate_space {
            CoordinateSpace::Unspecified => {
                if self.size.width <= 1.0 && self.size.height <= 1.0 {
                    CoordinateSpace::Normalized
                } else {
                    CoordinateSpace::Absolute
                }
            }
            space => space,
        }
    }

    /// Express the box fields in pixels of `surface`.
    ///
    /// Landmarks are already in pixels and are left untouched.
    pub fn to_absolute(&self, surface: SurfaceSize) -> FaceEstimate {
        let mut out = self.clone();
        out.coordinate_space = CoordinateSpace::Absolute;
        if self.resolved_space() == CoordinateSpace::Normalized {
            let (sx, sy) = (surface.width as f64, surface.height as f64);
            out.top_left = Point::new(self.top_left.x * sx, self.top_left.y * sy);
            out.size = Size::new(self.size.width * sx, self.size.height * sy);
            out.center = Point::new(self.center.x * sx, self.center.y * sy);
        }
        out
    }

    /// Map pixel coordinates measured on a `from` frame onto a `to` surface.
    ///
    /// Normalized estimates are resolution independent and pass through.
    pub fn rescaled(&self, from: SurfaceSize, to: SurfaceSize) -> FaceEstimate {
        if from == to || from.is_empty() || self.resolved_space() == CoordinateSpace::Normalized {
            return self.clone();
        }
        let sx = to.width as f64 / from.width as f64;
        let sy = to.height as f64 / from.height as f64;
        let mut out = self.clone();
        out.coordinate_space = CoordinateSpace::Absolute;
        out.top_left = Point::new(self.top_left.x * sx, self.top_left.y * sy);
        out.size = Size::new(self.size.width * sx, self.size.height * sy);
        out.center = Point::new(self.center.x * sx, self.center.y * sy);
        out.landmarks = self.landmarks.as_ref().map(|points| {
            points
                .iter()
                .map(|l| Landmark {
                    x: l.x * sx,
                    y: l.y * sy,
                    z: l.z,
                })
                .collect()
        });
        out
    }
}

/// The synthetic centered face used when no detection is available.
///
/// Width is a fixed fraction of the frame width, height a fixed multiple of
/// that, centered horizontally and biased above the vertical center.
pub fn fallback_estimate(frame: SurfaceSize, params: &FallbackFace) -> Option<FaceEstimate> {
    if frame.is_empty() {
        return None;
    }
    let (fw, fh) = (frame.width as f64, frame.height as f64);
    let width = fw * params.width_fraction;
    let height = width * params.aspect;
    let center = Point::new(fw * 0.5, fh * params.center_y_fraction);
    let mut estimate = FaceEstimate::from_box(
        Rect::centered_on(center, Size::new(width, height)),
        params.confidence,
        CoordinateSpace::Absolute,
    );
    estimate.source = EstimateSource::Fallback;
    Some(estimate)
}

/// One frame from the video source, opaque to the placement pipeline.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    /// Native frame width in pixels.
    pub width: u32,
    /// Native frame height in pixels.
    pub height: u32,
    /// Row-major RGBA8 pixels when the source exposes them.
    pub rgba: Option<&'a [u8]>,
}

impl<'a> VideoFrame<'a> {
    /// A frame without pixel access (dimensions only).
    pub const fn opaque(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: None,
        }
    }

    /// A frame backed by RGBA8 pixels.
    pub fn with_rgba(width: u32, height: u32, rgba: &'a [u8]) -> Self {
        Self {
            width,
            height,
            rgba: Some(rgba),
        }
    }

    /// Frame dimensions.
    pub fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.width, self.height)
    }

    /// Luma plane of the frame (Rec. 601 weights), if pixels are available.
    pub fn grayscale(&self) -> Option<Vec<u8>> {
        let rgba = self.rgba?;
        let expected = self.width as usize * self.height as usize * 4;
        if rgba.len() < expected {
            return None;
        }
        Some(
            rgba[..expected]
                .chunks_exact(4)
                .map(|px| {
                    let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                    luma.round().clamp(0.0, 255.0) as u8
                })
                .collect(),
        )
    }
}

/// Pluggable face detection backend.
///
/// Implement this trait to feed any detector (ML-backed, remote, or
/// synthetic) into [`crate::FaceSignalSource`]. Both calls may suspend; the
/// render path never awaits them.
pub trait FaceDetector {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Prepare the backend (load models, warm up). Defaults to ready.
    fn initialize(&mut self) -> LocalBoxFuture<'_, Result<()>> {
        future::ready(Ok(())).boxed_local()
    }

    /// Detect faces in `frame`. An empty vector means no face was found.
    fn detect<'a>(&'a mut self, frame: &'a VideoFrame<'_>)
        -> LocalBoxFuture<'a, Result<Vec<FaceEstimate>>>;

    /// True for backends that never see real faces.
    fn is_synthetic(&self) -> bool {
        false
    }
}

/// Detector that always reports the centered fallback face.
#[derive(Debug, Clone, Default)]
pub struct SyntheticDetector {
    params: FallbackFace,
}

impl SyntheticDetector {
    /// Create a synthetic detector with the given fallback geometry.
    pub fn new(params: FallbackFace) -> Self {
        Self { params }
    }
}

impl FaceDetector for SyntheticDetector {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn detect<'a>(
        &'a mut self,
        frame: &'a VideoFrame<'_>,
    ) -> LocalBoxFuture<'a, Result<Vec<FaceEstimate>>> {
        let faces = fallback_estimate(frame.size(), &self.params)
            .into_iter()
            .collect();
        future::ready(Ok(faces)).boxed_local()
    }

    fn is_synthetic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_centered_and_biased_up() {
        let est = fallback_estimate(SurfaceSize::new(640, 480), &FallbackFace::default()).unwrap();
        assert!((est.size.width - 192.0).abs() < 1e-9); // 30% of 640
        assert!((est.size.height - 249.6).abs() < 1e-9); // 1.3x width
        assert!((est.center.x - 320.0).abs() < 1e-9);
        assert!((est.center.y - 192.0).abs() < 1e-9); // 40% of 480
        assert!(est.is_fallback());
        assert!((est.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn fallback_requires_frame() {
        assert!(fallback_estimate(SurfaceSize::new(0, 480), &FallbackFace::default()).is_none());
    }

    #[test]
    fn untagged_small_sizes_are_normalized() {
        let est = FaceEstimate::from_box(
            Rect::new(0.25, 0.2, 0.5, 0.6),
            0.9,
            CoordinateSpace::Unspecified,
        );
        assert_eq!(est.resolved_space(), CoordinateSpace::Normalized);
        let abs = est.to_absolute(SurfaceSize::new(640, 480));
        assert_eq!(abs.top_left, Point::new(160.0, 96.0));
        assert_eq!(abs.size, Size::new(320.0, 288.0));
        assert_eq!(abs.center, Point::new(320.0, 240.0));
    }

    #[test]
    fn explicit_tag_overrides_heuristic() {
        // A one-pixel face near the corner is absolute when tagged so.
        let bounds = Rect::new(0.0, 0.0, 1.0, 1.0);
        let est = FaceEstimate::from_box(bounds, 0.5, CoordinateSpace::Absolute);
        let abs = est.to_absolute(SurfaceSize::new(640, 480));
        assert_eq!(abs.size, Size::new(1.0, 1.0));
    }

    #[test]
    fn rescale_maps_frame_pixels_to_surface() {
        let bounds = Rect::new(100.0, 100.0, 200.0, 200.0);
        let est = FaceEstimate::from_box(bounds, 0.9, CoordinateSpace::Absolute)
            .with_landmarks(vec![Landmark::new(150.0, 150.0)]);
        let out = est.rescaled(SurfaceSize::new(1280, 960), SurfaceSize::new(640, 480));
        assert_eq!(out.bounds(), Rect::new(50.0, 50.0, 100.0, 100.0));
        assert_eq!(out.landmarks.unwrap()[0].point(), Point::new(75.0, 75.0));
    }

    #[test]
    fn grayscale_uses_luma_weights() {
        let pixels = [255u8, 255, 255, 255, 0, 0, 0, 255];
        let frame = VideoFrame::with_rgba(2, 1, &pixels);
        assert_eq!(frame.grayscale().unwrap(), vec![255, 0]);
        assert!(VideoFrame::opaque(2, 1).grayscale().is_none());
    }

    #[test]
    fn synthetic_detector_reports_fallback() {
        let mut detector = SyntheticDetector::default();
        let frame = VideoFrame::opaque(640, 480);
        let faces = futures::executor::block_on(detector.detect(&frame)).unwrap();
        assert_eq!(faces.len(), 1);
        assert!(faces[0].is_fallback());
        assert!(detector.is_synthetic());
    }
}
