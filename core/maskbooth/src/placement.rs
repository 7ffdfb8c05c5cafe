//! Face-relative overlay placement.
//!
//! [`PlacementEngine::compute_rect`] turns a (possibly absent) face estimate,
//! an overlay definition and its calibration into the rectangle the overlay
//! is drawn into this frame:
//!
//! 1. Without auto-positioning or a face, the overlay takes a fixed fraction
//!    of the surface width, centered and raised above the middle.
//! 2. Otherwise the estimate is resolved to surface pixels, preferring the
//!    landmark extent over the coarse box, and the overlay is sized from the
//!    face width and anchored by its [`OverlayCategory`].
//! 3. Calibration offsets are added, the result is blended with the previous
//!    frame's rectangle and finally clamped inside the surface.

use std::collections::HashSet;

use log::warn;

use crate::calibration::CalibrationEntry;
use crate::catalog::{OverlayCategory, OverlayDefinition};
use crate::config::{BoothConfig, MAX_SMOOTHING_FACTOR};
use crate::error::{BoothError, Result};
use crate::face_detector::{FaceEstimate, Landmark};
use crate::geometry::{fit_with_aspect, PlacementResult, Point, Rect, Size, SurfaceSize};

/// Helmet tops sit this fraction of the overlay height above the face center.
const HELMET_TOP_FRACTION: f64 = 0.55;

/// Estimated nose height above the face center, as a fraction of face height.
const NOSE_RAISE_FRACTION: f64 = 0.05;

/// Index of the nose tip in the 68-point (iBUG 300-W) layout.
const NOSE_TIP_68: usize = 30;
/// Index of the nose tip in the 468/478-point face mesh layout.
const NOSE_TIP_MESH: usize = 1;

/// Vertical anchoring rule for an overlay category.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Anchor {
    /// Overlay top at `center.y - height * fraction`.
    AboveCenter(f64),
    /// Overlay centered on the nose point.
    Nose,
    /// Overlay centered on the face center.
    Center,
}

fn anchor_for(category: OverlayCategory) -> Anchor {
    match category {
        OverlayCategory::Helmet => Anchor::AboveCenter(HELMET_TOP_FRACTION),
        OverlayCategory::FaceMask => Anchor::Nose,
        OverlayCategory::Hood | OverlayCategory::Unknown => Anchor::Center,
    }
}

/// Face geometry resolved to surface pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceGeometry {
    /// Face center.
    pub center: Point,
    /// Face extent.
    pub size: Size,
    /// Nose tip when landmarks identify it.
    pub nose: Option<Point>,
    /// Roll of the eye line in radians (0 without 68-point landmarks).
    pub roll: f64,
}

impl FaceGeometry {
    /// Resolve `estimate` against `surface`.
    ///
    /// Landmarks, when present and non-degenerate, replace the box-derived
    /// center and size with their bounding extent. Returns `None` when the
    /// resulting face has no area.
    pub fn resolve(estimate: &FaceEstimate, surface: SurfaceSize) -> Option<Self> {
        let abs = estimate.to_absolute(surface);

        let from_landmarks = abs.landmarks.as_deref().and_then(|points| {
            let extent = Rect::bounding(points.iter().map(Landmark::point))?;
            (extent.width > 0.0 && extent.height > 0.0).then(|| Self {
                center: extent.center(),
                size: Size::new(extent.width, extent.height),
                nose: landmark_nose(points),
                roll: eye_roll(points),
            })
        });

        let face = from_landmarks.unwrap_or(Self {
            center: abs.center,
            size: abs.size,
            nose: None,
            roll: 0.0,
        });
        (face.size.width > 0.0 && face.size.height > 0.0 && face.size.width.is_finite())
            .then_some(face)
    }

    /// The nose point, estimated from the face box when landmarks lack one.
    pub fn nose_point(&self) -> Point {
        self.nose.unwrap_or(Point::new(
            self.center.x,
            self.center.y - self.size.height * NOSE_RAISE_FRACTION,
        ))
    }
}

fn landmark_nose(points: &[Landmark]) -> Option<Point> {
    match points.len() {
        68 => Some(points[NOSE_TIP_68].point()),
        468 | 478 => Some(points[NOSE_TIP_MESH].point()),
        _ => None,
    }
}

fn eye_roll(points: &[Landmark]) -> f64 {
    if points.len() != 68 {
        return 0.0;
    }
    let mean = |range: std::ops::Range<usize>| {
        let n = range.len() as f64;
        let (sx, sy) = points[range]
            .iter()
            .fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
        Point::new(sx / n, sy / n)
    };
    // Image-left eye (subject's right) is 36..42, image-right eye is 42..48.
    let left = mean(36..42);
    let right = mean(42..48);
    (right.y - left.y).atan2(right.x - left.x)
}

/// Transient state carried between frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmoothingState {
    /// Rectangle drawn on the previous frame.
    pub last_rect: Option<Rect>,
    /// Overlay the previous rectangle belongs to.
    pub last_overlay: Option<String>,
}

/// Computes per-frame overlay rectangles with temporal smoothing.
#[derive(Debug, Clone)]
pub struct PlacementEngine {
    smoothing_factor: f64,
    default_width_fraction: f64,
    default_vertical_divisor: f64,
    max_surface_fraction: f64,
    state: SmoothingState,
    degenerate_logged: HashSet<String>,
}

impl Default for PlacementEngine {
    fn default() -> Self {
        Self::new(&BoothConfig::default())
    }
}

impl PlacementEngine {
    /// Create an engine with the geometry settings from `config`.
    pub fn new(config: &BoothConfig) -> Self {
        Self {
            smoothing_factor: config.smoothing_factor.clamp(0.0, MAX_SMOOTHING_FACTOR),
            default_width_fraction: config.default_width_fraction,
            default_vertical_divisor: config.default_vertical_divisor,
            max_surface_fraction: config.max_surface_fraction,
            state: SmoothingState::default(),
            degenerate_logged: HashSet::new(),
        }
    }

    /// Current smoothing factor.
    pub fn smoothing_factor(&self) -> f64 {
        self.smoothing_factor
    }

    /// Change the smoothing factor; must be in [0, 0.9].
    pub fn set_smoothing_factor(&mut self, k: f64) -> Result<()> {
        if !(0.0..=MAX_SMOOTHING_FACTOR).contains(&k) {
            return Err(BoothError::InvalidConfig(format!(
                "smoothing factor must be in [0, {MAX_SMOOTHING_FACTOR}], got {k}"
            )));
        }
        self.smoothing_factor = k;
        Ok(())
    }

    /// Smoothing state after the last computed frame.
    pub fn state(&self) -> &SmoothingState {
        &self.state
    }

    /// Forget the previous rectangle so the next frame snaps.
    pub fn reset(&mut self) {
        self.state = SmoothingState::default();
    }

    /// Compute this frame's rectangle and remember it for smoothing.
    ///
    /// Returns [`PlacementResult::degenerate`] for an empty surface or an
    /// overlay raster without area; callers skip drawing it.
    pub fn compute_rect(
        &mut self,
        estimate: Option<&FaceEstimate>,
        overlay: &OverlayDefinition,
        calibration: &CalibrationEntry,
        surface: SurfaceSize,
        auto_position: bool,
    ) -> PlacementResult {
        if surface.is_empty() {
            return PlacementResult::degenerate();
        }
        let Some((target, rotation)) =
            self.target_rect(estimate, overlay, calibration, surface, auto_position)
        else {
            if self.degenerate_logged.insert(overlay.id.clone()) {
                warn!("overlay {} has no drawable area; skipping", overlay.id);
            }
            return PlacementResult::degenerate();
        };

        let same_overlay = self.state.last_overlay.as_deref() == Some(overlay.id.as_str());
        let rect = match self.state.last_rect {
            Some(prev) if auto_position && same_overlay => {
                prev.blend(&target, self.smoothing_factor).clamp_within(surface)
            }
            _ => target,
        };

        self.state.last_rect = Some(rect);
        if !same_overlay {
            self.state.last_overlay = Some(overlay.id.clone());
        }
        PlacementResult::from_rect(rect, rotation)
    }

    /// The unsmoothed, clamped rectangle and rotation for one frame.
    ///
    /// Does not touch smoothing state. `None` when the overlay raster or the
    /// surface has no area.
    pub fn target_rect(
        &self,
        estimate: Option<&FaceEstimate>,
        overlay: &OverlayDefinition,
        calibration: &CalibrationEntry,
        surface: SurfaceSize,
        auto_position: bool,
    ) -> Option<(Rect, f64)> {
        if surface.is_empty() {
            return None;
        }
        let aspect = match &overlay.image {
            Some(image) => image.aspect_ratio()?,
            None => overlay.intrinsic_aspect_ratio,
        };
        if !(aspect.is_finite() && aspect > 0.0) {
            return None;
        }

        let (sw, sh) = (surface.width as f64, surface.height as f64);
        let (max_w, max_h) = (sw * self.max_surface_fraction, sh * self.max_surface_fraction);

        let face = if auto_position {
            estimate.and_then(|e| FaceGeometry::resolve(e, surface))
        } else {
            None
        };

        let (rect, rotation) = match face {
            None => {
                let size = fit_with_aspect(sw * self.default_width_fraction, aspect, max_w, max_h);
                let x = (sw - size.width) / 2.0;
                let y = (sh - size.height) / self.default_vertical_divisor;
                (Rect::new(x, y, size.width, size.height), 0.0)
            }
            Some(face) => {
                let width = face.size.width * overlay.default_scale_factor * calibration.scale;
                let size = fit_with_aspect(width, aspect, max_w, max_h);
                let (cx, top) = match anchor_for(overlay.category) {
                    Anchor::AboveCenter(fraction) => {
                        (face.center.x, face.center.y - size.height * fraction)
                    }
                    Anchor::Nose => {
                        let nose = face.nose_point();
                        (nose.x, nose.y - size.height / 2.0)
                    }
                    Anchor::Center => (face.center.x, face.center.y - size.height / 2.0),
                };
                let top = top + overlay.default_vertical_bias_fraction * face.size.height;
                (
                    Rect::new(cx - size.width / 2.0, top, size.width, size.height),
                    face.roll,
                )
            }
        };

        if !(rect.width > 0.0 && rect.height > 0.0) {
            return None;
        }
        let shifted = Rect::new(
            rect.x + calibration.offset_x,
            rect.y + calibration.offset_y,
            rect.width,
            rect.height,
        );
        Some((shifted.clamp_within(surface), rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::OverlayImage;
    use crate::face_detector::CoordinateSpace;
    use image::RgbaImage;

    fn overlay(
        id: &str,
        category: OverlayCategory,
        w: u32,
        h: u32,
        scale: f64,
    ) -> OverlayDefinition {
        let image = OverlayImage::new(RgbaImage::new(w, h));
        let mut def = OverlayDefinition::with_image(id, id, category, image);
        def.default_scale_factor = scale;
        def
    }

    fn face(x: f64, y: f64, w: f64, h: f64) -> FaceEstimate {
        FaceEstimate::from_box(Rect::new(x, y, w, h), 0.9, CoordinateSpace::Absolute)
    }

    const SURFACE: SurfaceSize = SurfaceSize::new(640, 480);

    fn identity(id: &str) -> CalibrationEntry {
        CalibrationEntry::identity(id)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn sizes_from_face_width_and_scale_factor() {
        let mut engine = PlacementEngine::default();
        let def = overlay("m", OverlayCategory::Unknown, 400, 300, 1.2);
        let est = face(160.0, 96.0, 320.0, 288.0);
        let r = engine.compute_rect(Some(&est), &def, &identity("m"), SURFACE, true);
        assert!(close(r.width, 384.0));
        assert!(close(r.height, 288.0));
        // Centered on (320, 240).
        assert!(close(r.x, 128.0));
        assert!(close(r.y, 96.0));
    }

    #[test]
    fn clamps_to_eighty_percent_of_surface() {
        let mut engine = PlacementEngine::default();
        let def = overlay("m", OverlayCategory::Unknown, 100, 100, 1.2);
        let est = face(0.0, 0.0, 600.0, 400.0);
        let r = engine.compute_rect(Some(&est), &def, &identity("m"), SURFACE, true);
        // 720 wide → 512 by width, then 512 high > 384 → 384 x 384.
        assert!(close(r.width, 384.0));
        assert!(close(r.height, 384.0));
    }

    #[test]
    fn default_placement_without_face() {
        let mut engine = PlacementEngine::default();
        let def = overlay("m", OverlayCategory::Helmet, 400, 500, 1.3);
        let r = engine.compute_rect(None, &def, &identity("m"), SURFACE, true);
        assert!(close(r.width, 256.0)); // 40% of 640
        assert!(close(r.height, 320.0));
        assert!(close(r.x, 192.0));
        assert!(close(r.y, 64.0)); // (480 - 320) / 2.5
        assert!(r.is_drawable());
    }

    #[test]
    fn auto_position_off_ignores_face() {
        let mut engine = PlacementEngine::default();
        let def = overlay("m", OverlayCategory::Helmet, 400, 500, 1.3);
        let est = face(0.0, 0.0, 100.0, 100.0);
        let with_face = engine.compute_rect(Some(&est), &def, &identity("m"), SURFACE, false);
        let without =
            PlacementEngine::default().compute_rect(None, &def, &identity("m"), SURFACE, true);
        assert_eq!(with_face, without);
    }

    #[test]
    fn helmet_sits_above_face_center() {
        let engine = PlacementEngine::default();
        let def = overlay("h", OverlayCategory::Helmet, 100, 100, 1.0);
        let est = face(270.0, 190.0, 100.0, 100.0);
        let (rect, _) = engine
            .target_rect(Some(&est), &def, &identity("h"), SURFACE, true)
            .unwrap();
        assert!(close(rect.y, 240.0 - 100.0 * 0.55));
        assert!(close(rect.x, 270.0));
    }

    #[test]
    fn face_mask_centers_on_estimated_nose() {
        let engine = PlacementEngine::default();
        let def = overlay("f", OverlayCategory::FaceMask, 100, 100, 1.0);
        let est = face(270.0, 190.0, 100.0, 100.0);
        let (rect, _) = engine
            .target_rect(Some(&est), &def, &identity("f"), SURFACE, true)
            .unwrap();
        // Nose at 240 - 100 * 0.05 = 235.
        assert!(close(rect.center().y, 235.0));
    }

    #[test]
    fn face_mask_uses_landmark_nose() {
        let engine = PlacementEngine::default();
        let def = overlay("f", OverlayCategory::FaceMask, 100, 100, 1.0);
        let mut points: Vec<Landmark> = (0..68)
            .map(|i| Landmark::new(300.0 + (i % 2) as f64 * 80.0, 200.0 + (i % 3) as f64 * 40.0))
            .collect();
        points[NOSE_TIP_68] = Landmark::new(330.0, 250.0);
        let est = face(0.0, 0.0, 50.0, 50.0).with_landmarks(points);
        let (rect, _) = engine
            .target_rect(Some(&est), &def, &identity("f"), SURFACE, true)
            .unwrap();
        assert!(close(rect.center().x, 330.0));
        assert!(close(rect.center().y, 250.0));
    }

    #[test]
    fn landmarks_override_box_geometry() {
        let engine = PlacementEngine::default();
        let def = overlay("u", OverlayCategory::Unknown, 100, 100, 1.0);
        let points = vec![
            Landmark::new(200.0, 150.0),
            Landmark::new(400.0, 150.0),
            Landmark::new(300.0, 350.0),
        ];
        // Box says a tiny face in the corner; landmarks say 200 wide at (300, 250).
        let est = face(0.0, 0.0, 10.0, 10.0).with_landmarks(points);
        let (rect, rotation) = engine
            .target_rect(Some(&est), &def, &identity("u"), SURFACE, true)
            .unwrap();
        assert!(close(rect.width, 200.0));
        assert!(close(rect.center().x, 300.0));
        assert!(close(rect.center().y, 250.0));
        assert_eq!(rotation, 0.0);
    }

    #[test]
    fn roll_follows_eye_line() {
        let mut points = vec![Landmark::new(300.0, 240.0); 68];
        for p in &mut points[36..42] {
            *p = Landmark::new(280.0, 220.0);
        }
        for p in &mut points[42..48] {
            *p = Landmark::new(380.0, 320.0);
        }
        let est = face(0.0, 0.0, 10.0, 10.0).with_landmarks(points);
        let geometry = FaceGeometry::resolve(&est, SURFACE).unwrap();
        assert!(close(geometry.roll, std::f64::consts::FRAC_PI_4));
    }

    #[test]
    fn vertical_bias_shifts_by_face_height() {
        let engine = PlacementEngine::default();
        let mut def = overlay("hood", OverlayCategory::Hood, 100, 100, 1.0);
        let est = face(270.0, 190.0, 100.0, 100.0);
        let (base, _) = engine
            .target_rect(Some(&est), &def, &identity("hood"), SURFACE, true)
            .unwrap();
        def.default_vertical_bias_fraction = -0.15;
        let (biased, _) = engine
            .target_rect(Some(&est), &def, &identity("hood"), SURFACE, true)
            .unwrap();
        assert!(close(base.y - biased.y, 15.0));
    }

    #[test]
    fn calibration_scales_and_offsets() {
        let engine = PlacementEngine::default();
        let def = overlay("u", OverlayCategory::Unknown, 100, 100, 1.0);
        let est = face(270.0, 190.0, 100.0, 100.0);
        let cal = CalibrationEntry {
            overlay_id: "u".into(),
            scale: 1.5,
            offset_x: 10.0,
            offset_y: -20.0,
        };
        let (rect, _) = engine.target_rect(Some(&est), &def, &cal, SURFACE, true).unwrap();
        assert!(close(rect.width, 150.0));
        assert!(close(rect.center().x, 330.0));
        assert!(close(rect.center().y, 220.0));
    }

    #[test]
    fn normalized_and_absolute_agree() {
        let mut a = PlacementEngine::default();
        let mut b = PlacementEngine::default();
        let def = overlay("m", OverlayCategory::Helmet, 400, 300, 1.2);
        let abs = face(160.0, 96.0, 320.0, 288.0);
        let norm = FaceEstimate::from_box(
            Rect::new(0.25, 0.2, 0.5, 0.6),
            0.9,
            CoordinateSpace::Unspecified,
        );
        let ra = a.compute_rect(Some(&abs), &def, &identity("m"), SURFACE, true);
        let rb = b.compute_rect(Some(&norm), &def, &identity("m"), SURFACE, true);
        assert!(close(ra.x, rb.x) && close(ra.y, rb.y));
        assert!(close(ra.width, rb.width) && close(ra.height, rb.height));
    }

    #[test]
    fn smoothing_blends_with_previous_frame() {
        let mut engine = PlacementEngine::default();
        let def = overlay("u", OverlayCategory::Unknown, 100, 100, 1.0);
        let cal = identity("u");
        let (near, far) = (face(100.0, 100.0, 100.0, 100.0), face(200.0, 100.0, 100.0, 100.0));
        let first = engine.compute_rect(Some(&near), &def, &cal, SURFACE, true);
        let second = engine.compute_rect(Some(&far), &def, &cal, SURFACE, true);
        // prev 100, target 200 → 100 * 0.35 + 200 * 0.65 = 165
        assert!(close(first.x, 100.0));
        assert!(close(second.x, 165.0));
    }

    #[test]
    fn converges_to_target() {
        let mut engine = PlacementEngine::default();
        let def = overlay("u", OverlayCategory::Unknown, 100, 100, 1.0);
        let start = face(50.0, 50.0, 80.0, 80.0);
        engine.compute_rect(Some(&start), &def, &identity("u"), SURFACE, true);
        let est = face(300.0, 200.0, 150.0, 150.0);
        let (target, _) = engine
            .target_rect(Some(&est), &def, &identity("u"), SURFACE, true)
            .unwrap();
        let last = (0..30)
            .map(|_| engine.compute_rect(Some(&est), &def, &identity("u"), SURFACE, true))
            .last()
            .unwrap();
        assert!(close(last.x, target.x) && close(last.y, target.y));
        assert!(close(last.width, target.width) && close(last.height, target.height));
    }

    #[test]
    fn overlay_switch_snaps() {
        let mut engine = PlacementEngine::default();
        let a = overlay("a", OverlayCategory::Unknown, 100, 100, 1.0);
        let b = overlay("b", OverlayCategory::Unknown, 100, 100, 1.0);
        let start = face(0.0, 0.0, 100.0, 100.0);
        engine.compute_rect(Some(&start), &a, &identity("a"), SURFACE, true);
        let est = face(400.0, 300.0, 100.0, 100.0);
        let r = engine.compute_rect(Some(&est), &b, &identity("b"), SURFACE, true);
        let (target, _) = engine
            .target_rect(Some(&est), &b, &identity("b"), SURFACE, true)
            .unwrap();
        assert_eq!(r.rect(), target);
        assert_eq!(engine.state().last_overlay.as_deref(), Some("b"));
    }

    #[test]
    fn zero_smoothing_snaps() {
        let mut engine = PlacementEngine::default();
        engine.set_smoothing_factor(0.0).unwrap();
        let def = overlay("u", OverlayCategory::Unknown, 100, 100, 1.0);
        let cal = identity("u");
        engine.compute_rect(Some(&face(0.0, 0.0, 100.0, 100.0)), &def, &cal, SURFACE, true);
        let moved = face(300.0, 0.0, 100.0, 100.0);
        let r = engine.compute_rect(Some(&moved), &def, &cal, SURFACE, true);
        assert!(close(r.x, 300.0));
        assert!(engine.set_smoothing_factor(0.95).is_err());
    }

    #[test]
    fn zero_surface_is_degenerate() {
        let mut engine = PlacementEngine::default();
        let def = overlay("u", OverlayCategory::Unknown, 100, 100, 1.0);
        let r = engine.compute_rect(None, &def, &identity("u"), SurfaceSize::new(0, 480), true);
        assert!(!r.is_drawable());
        assert!(engine.state().last_rect.is_none());
    }

    #[test]
    fn zero_sized_image_is_degenerate() {
        let mut engine = PlacementEngine::default();
        let def = overlay("empty", OverlayCategory::Unknown, 0, 0, 1.0);
        let est = face(0.0, 0.0, 100.0, 100.0);
        let r = engine.compute_rect(Some(&est), &def, &identity("empty"), SURFACE, true);
        assert!(!r.is_drawable());
        let again = engine.compute_rect(None, &def, &identity("empty"), SURFACE, true);
        assert!(!again.is_drawable());
    }

    #[test]
    fn result_is_always_inside_surface() {
        let surfaces = [
            SurfaceSize::new(640, 480),
            SurfaceSize::new(320, 640),
            SurfaceSize::new(37, 19),
        ];
        let categories = [
            OverlayCategory::Helmet,
            OverlayCategory::FaceMask,
            OverlayCategory::Hood,
            OverlayCategory::Unknown,
        ];
        let offsets: [f64; 3] = [-500.0, 0.0, 500.0];
        for surface in surfaces {
            for category in categories {
                let def = overlay("p", category, 300, 500, 1.4);
                let mut engine = PlacementEngine::default();
                for (i, &dx) in offsets.iter().enumerate() {
                    for &dy in &offsets {
                        let est = face(-50.0 + i as f64 * 300.0, 400.0, 350.0 + dx.abs(), 280.0);
                        let cal = CalibrationEntry {
                            overlay_id: "p".into(),
                            scale: 2.0,
                            offset_x: dx,
                            offset_y: dy,
                        };
                        let r = engine.compute_rect(Some(&est), &def, &cal, surface, true);
                        assert!(
                            r.rect().is_within(surface, 1e-6),
                            "{r:?} escapes {surface:?} for {category:?}"
                        );
                    }
                }
            }
        }
    }
}
