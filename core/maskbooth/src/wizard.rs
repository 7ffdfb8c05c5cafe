use log::info;

use crate::calibration::CalibrationEntry;
use crate::error::{BoothError, Result};
use crate::face_detector::{CoordinateSpace, FaceEstimate};
use crate::geometry::{Point, Rect, Size, SurfaceSize};
use crate::placement::FaceGeometry;
use crate::session::OverlaySession;

/// Samples collected before a preset can be computed.
pub const REQUIRED_SAMPLES: usize = 3;

/// Progress of the calibration flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    /// Not running.
    Closed,
    /// Started, no samples yet.
    AwaitingSamples,
    /// Holding this many samples (fewer than [`REQUIRED_SAMPLES`]).
    Collected(usize),
    /// All samples captured; `finish` may run.
    ReadyToFinish,
}

impl WizardState {
    fn describe(self) -> &'static str {
        match self {
            WizardState::Closed => "closed",
            WizardState::AwaitingSamples | WizardState::Collected(_) => "collecting samples",
            WizardState::ReadyToFinish => "ready to finish",
        }
    }
}

/// One captured face, in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceSample {
    /// Face center.
    pub center: Point,
    /// Face extent.
    pub size: Size,
}

/// Multi-sample flow that derives a calibration preset for the active overlay.
///
/// The user holds still while three samples are captured; `finish` averages
/// them, places the overlay for the averaged face without calibration and
/// stores the offset that moves the overlay center onto the face center.
#[derive(Debug, Clone)]
pub struct CalibrationWizard {
    state: WizardState,
    samples: Vec<FaceSample>,
}

impl Default for CalibrationWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationWizard {
    /// A closed wizard.
    pub fn new() -> Self {
        Self {
            state: WizardState::Closed,
            samples: Vec::with_capacity(REQUIRED_SAMPLES),
        }
    }

    /// Current state.
    pub fn state(&self) -> WizardState {
        self.state
    }

    /// Samples captured so far.
    pub fn samples(&self) -> &[FaceSample] {
        &self.samples
    }

    /// Open the wizard. Restarting an open wizard discards its samples.
    pub fn start(&mut self) {
        self.samples.clear();
        self.state = WizardState::AwaitingSamples;
    }

    /// Discard samples and close.
    pub fn cancel(&mut self) {
        self.samples.clear();
        self.state = WizardState::Closed;
    }

    /// Record the current estimate as a sample.
    ///
    /// Absent, invalid and synthetic estimates are rejected with
    /// [`BoothError::FaceNotDetected`] and leave the state unchanged.
    pub fn capture(
        &mut self,
        estimate: Option<&FaceEstimate>,
        surface: SurfaceSize,
    ) -> Result<WizardState> {
        if !matches!(self.state, WizardState::AwaitingSamples | WizardState::Collected(_)) {
            return Err(BoothError::WizardState {
                action: "capture a sample",
                state: self.state.describe(),
            });
        }
        let face = estimate
            .filter(|e| e.is_valid() && !e.is_fallback())
            .and_then(|e| FaceGeometry::resolve(e, surface))
            .ok_or(BoothError::FaceNotDetected)?;

        self.samples.push(FaceSample {
            center: face.center,
            size: face.size,
        });
        self.state = match self.samples.len() {
            n if n >= REQUIRED_SAMPLES => WizardState::ReadyToFinish,
            n => WizardState::Collected(n),
        };
        Ok(self.state)
    }

    /// Mean center and size of the captured samples.
    pub fn averaged_sample(&self) -> Option<FaceSample> {
        if self.samples.is_empty() {
            return None;
        }
        let n = self.samples.len() as f64;
        let sum = self.samples.iter().fold([0.0; 4], |acc, s| {
            [
                acc[0] + s.center.x,
                acc[1] + s.center.y,
                acc[2] + s.size.width,
                acc[3] + s.size.height,
            ]
        });
        Some(FaceSample {
            center: Point::new(sum[0] / n, sum[1] / n),
            size: Size::new(sum[2] / n, sum[3] / n),
        })
    }

    /// Compute the preset for the session's active overlay, commit it and
    /// close.
    ///
    /// On a storage failure the wizard stays ready so the user can retry.
    pub fn finish(
        &mut self,
        session: &mut OverlaySession,
        surface: SurfaceSize,
    ) -> Result<CalibrationEntry> {
        if self.state != WizardState::ReadyToFinish {
            return Err(BoothError::WizardState {
                action: "finish",
                state: self.state.describe(),
            });
        }
        let overlay = session.active_overlay().ok_or(BoothError::WizardState {
            action: "finish",
            state: "no overlay is selected",
        })?;
        let sample = self.averaged_sample().ok_or(BoothError::FaceNotDetected)?;

        let averaged = FaceEstimate::from_box(
            Rect::centered_on(sample.center, sample.size),
            1.0,
            CoordinateSpace::Absolute,
        );
        let identity = CalibrationEntry::identity(&overlay.id);
        let (rect, _) = session
            .engine()
            .target_rect(Some(&averaged), overlay, &identity, surface, true)
            .ok_or_else(|| {
                BoothError::DegenerateGeometry {
                    width: surface.width as f64,
                    height: surface.height as f64,
                }
            })?;

        let placed = rect.center();
        let preset = CalibrationEntry {
            offset_x: sample.center.x - placed.x,
            offset_y: sample.center.y - placed.y,
            ..identity
        };
        let overlay_id = overlay.id.clone();
        session.apply_preset(&overlay_id, &preset)?;
        info!(
            "calibration preset for {overlay_id}: offset ({:.1}, {:.1})",
            preset.offset_x, preset.offset_y
        );
        self.cancel();
        Ok(preset)
    }
}
