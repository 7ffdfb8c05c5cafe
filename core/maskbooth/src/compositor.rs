use std::cell::Cell;
use std::rc::Rc;

use log::{debug, warn};

use crate::catalog::OverlayImage;
use crate::config::BoothConfig;
use crate::error::Result;
use crate::face_detector::{FaceEstimate, VideoFrame};
use crate::geometry::{PlacementResult, Point, Rect, SurfaceSize};
use crate::placement::FaceGeometry;
use crate::session::OverlaySession;

const DEBUG_BOX_COLOR: [u8; 4] = [0, 255, 0, 255];
const DEBUG_LANDMARK_COLOR: [u8; 4] = [255, 255, 0, 255];
const DEBUG_ANCHOR_COLOR: [u8; 4] = [255, 0, 0, 255];
const DEBUG_NOSE_COLOR: [u8; 4] = [0, 160, 255, 255];

/// Supplies the most recent video frame.
pub trait VideoSource {
    /// The current frame, or `None` before the source has produced one.
    fn current_frame(&self) -> Option<VideoFrame<'_>>;
}

/// A drawable output surface.
pub trait Surface {
    /// Current pixel size.
    fn size(&self) -> SurfaceSize;

    /// Change the pixel size, discarding contents.
    fn resize(&mut self, size: SurfaceSize) -> Result<()>;

    /// Erase to transparent.
    fn clear(&mut self) -> Result<()>;

    /// Draw `frame` stretched to the whole surface.
    fn draw_frame(&mut self, frame: &VideoFrame<'_>) -> Result<()>;

    /// Draw `image` into the placement rectangle, rotated about its center
    /// and scaled by the placement opacity.
    fn draw_image(&mut self, image: &OverlayImage, placement: &PlacementResult) -> Result<()>;

    /// Outline `rect` in `color`.
    fn stroke_rect(&mut self, rect: Rect, color: [u8; 4]) -> Result<()>;

    /// Fill a disc of `radius` around `at`.
    fn fill_point(&mut self, at: Point, radius: f64, color: [u8; 4]) -> Result<()>;
}

/// Whether the loop is producing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not started, or stopped.
    Idle,
    /// Drawing on every tick.
    Running,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was drawn; `overlay` tells whether an overlay was composited.
    Drawn {
        /// An overlay image was drawn on top of the video.
        overlay: bool,
    },
    /// Nothing to draw this tick (no frame yet, empty surface or a contained
    /// surface error); keep scheduling.
    Skipped,
    /// The loop is stopped; stop scheduling.
    Stopped,
}

/// Cloneable handle that stops a [`CompositorLoop`] from anywhere.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Rc<Cell<bool>>,
}

impl StopHandle {
    /// Stop the loop. Calling it again has no effect.
    pub fn stop(&self) {
        self.running.set(false);
    }

    /// True once the loop is not running.
    pub fn is_stopped(&self) -> bool {
        !self.running.get()
    }
}

/// Per-frame render cycle: video first, then the overlay.
///
/// The loop is driven externally, one [`tick`](Self::tick) per display
/// refresh. A tick never fails; surface errors are logged and the frame is
/// skipped.
#[derive(Debug)]
pub struct CompositorLoop {
    running: Rc<Cell<bool>>,
    debug: bool,
    output_size: Option<SurfaceSize>,
    frames_drawn: u64,
}

impl CompositorLoop {
    /// Create an idle loop; `config.debug` enables the detection overlay.
    pub fn new(config: &BoothConfig) -> Self {
        Self {
            running: Rc::new(Cell::new(false)),
            debug: config.debug,
            output_size: None,
            frames_drawn: 0,
        }
    }

    /// Render at a fixed resolution instead of the video frame's own.
    pub fn with_output_size(mut self, size: SurfaceSize) -> Self {
        self.output_size = Some(size);
        self
    }

    /// Enter [`LoopState::Running`].
    pub fn start(&mut self) {
        if !self.running.replace(true) {
            debug!("compositor started");
        }
    }

    /// Return to [`LoopState::Idle`]. Idempotent.
    pub fn stop(&self) {
        if self.running.replace(false) {
            debug!("compositor stopped after {} frames", self.frames_drawn);
        }
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        if self.running.get() {
            LoopState::Running
        } else {
            LoopState::Idle
        }
    }

    /// A handle that stops this loop.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Rc::clone(&self.running),
        }
    }

    /// Enable or disable the detection overlay.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Frames drawn since creation.
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Draw one frame.
    ///
    /// `estimate` is the signal source's latest estimate in video-frame
    /// coordinates; it is rescaled to the surface before placement.
    pub fn tick(
        &mut self,
        session: &mut OverlaySession,
        estimate: Option<&FaceEstimate>,
        video: &dyn VideoSource,
        surface: &mut dyn Surface,
    ) -> TickOutcome {
        if !self.running.get() {
            return TickOutcome::Stopped;
        }
        let Some(frame) = video.current_frame() else {
            return TickOutcome::Skipped;
        };
        let target = self.output_size.unwrap_or(frame.size());
        if target.is_empty() {
            return TickOutcome::Skipped;
        }
        match self.render(session, estimate, &frame, target, surface) {
            Ok(overlay) => {
                self.frames_drawn += 1;
                TickOutcome::Drawn { overlay }
            }
            Err(e) => {
                warn!("frame skipped: {e}");
                TickOutcome::Skipped
            }
        }
    }

    fn render(
        &self,
        session: &mut OverlaySession,
        estimate: Option<&FaceEstimate>,
        frame: &VideoFrame<'_>,
        target: SurfaceSize,
        surface: &mut dyn Surface,
    ) -> Result<bool> {
        if surface.size() != target {
            surface.resize(target)?;
        }
        surface.clear()?;
        surface.draw_frame(frame)?;

        let estimate = estimate.map(|e| e.rescaled(frame.size(), target));
        let placed = session.place(estimate.as_ref(), target);
        if let Some((image, placement)) = &placed {
            surface.draw_image(image, placement)?;
        }
        if self.debug {
            draw_debug(surface, estimate.as_ref(), placed.as_ref().map(|p| &p.1), target)?;
        }
        Ok(placed.is_some())
    }
}

fn draw_debug(
    surface: &mut dyn Surface,
    estimate: Option<&FaceEstimate>,
    placement: Option<&PlacementResult>,
    target: SurfaceSize,
) -> Result<()> {
    if let Some(estimate) = estimate {
        let abs = estimate.to_absolute(target);
        surface.stroke_rect(abs.bounds(), DEBUG_BOX_COLOR)?;
        for landmark in abs.landmarks.iter().flatten() {
            surface.fill_point(landmark.point(), 1.5, DEBUG_LANDMARK_COLOR)?;
        }
        if let Some(face) = FaceGeometry::resolve(estimate, target) {
            surface.fill_point(face.nose_point(), 4.0, DEBUG_NOSE_COLOR)?;
        }
    }
    if let Some(placement) = placement {
        surface.fill_point(placement.rect().center(), 4.0, DEBUG_ANCHOR_COLOR)?;
    }
    Ok(())
}
