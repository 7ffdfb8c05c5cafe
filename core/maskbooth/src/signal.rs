use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use futures::future::{select, Either};
use futures::pin_mut;
use log::{debug, info, warn};

use crate::config::{BoothConfig, FallbackFace};
use crate::error::BoothError;
use crate::face_detector::{
    fallback_estimate, FaceDetector, FaceEstimate, Landmark, SyntheticDetector, VideoFrame,
};
use crate::geometry::{Point, Size, SurfaceSize};

/// Weight of detector confidence when choosing among several faces.
const CONFIDENCE_WEIGHT: f64 = 0.7;
/// Weight of proximity to the frame center when choosing among several faces.
const CENTER_WEIGHT: f64 = 0.3;

/// Periodically runs a [`FaceDetector`] and publishes a stabilized estimate.
///
/// Detection is throttled to the configured interval and decoupled from the
/// render cadence: renderers call [`FaceSignalSource::latest_estimate`], which
/// never waits on the detector. When nothing is detected the source publishes
/// the synthetic centered estimate so placement always has coordinates while
/// a frame exists.
pub struct FaceSignalSource {
    detector: Box<dyn FaceDetector>,
    fallback: FallbackFace,
    interval_ms: f64,
    init_timeout: Duration,
    history_len: usize,
    history: VecDeque<FaceEstimate>,
    latest: Option<FaceEstimate>,
    last_tick_ms: Option<f64>,
    face_detected: bool,
    running: bool,
    status_listener: Option<Box<dyn FnMut(bool)>>,
}

impl FaceSignalSource {
    /// Wrap `detector` using the timing and fallback settings from `config`.
    pub fn new(detector: Box<dyn FaceDetector>, config: &BoothConfig) -> Self {
        Self {
            detector,
            fallback: config.fallback.clone(),
            interval_ms: config.detection_interval_ms,
            init_timeout: Duration::try_from_secs_f64(config.detector_init_timeout_ms / 1000.0)
                .unwrap_or_default(),
            history_len: config.history_len.max(1),
            history: VecDeque::with_capacity(config.history_len.max(1)),
            latest: None,
            last_tick_ms: None,
            face_detected: false,
            running: true,
            status_listener: None,
        }
    }

    /// A source that only ever reports the synthetic face.
    pub fn synthetic(config: &BoothConfig) -> Self {
        Self::new(
            Box::new(SyntheticDetector::new(config.fallback.clone())),
            config,
        )
    }

    /// Initialize the detector, racing it against `deadline`.
    ///
    /// Failure or expiry is not fatal: the source switches permanently to the
    /// synthetic detector. Returns `true` when the real detector is active.
    pub async fn initialize<D>(&mut self, deadline: D) -> bool
    where
        D: Future<Output = ()>,
    {
        if self.detector.is_synthetic() {
            return false;
        }
        let name = self.detector.name().to_string();
        pin_mut!(deadline);
        let outcome = match select(self.detector.initialize(), deadline).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => Err(BoothError::DetectorInit(format!(
                "{name} did not become ready in time"
            ))),
        };
        match outcome {
            Ok(()) => {
                info!("face detector {name} ready");
                true
            }
            Err(e) => {
                warn!("{e}; using synthetic centered face from now on");
                self.detector = Box::new(SyntheticDetector::new(self.fallback.clone()));
                self.history.clear();
                false
            }
        }
    }

    /// How long [`initialize_with_timer`](Self::initialize_with_timer) waits
    /// for the detector.
    pub fn init_timeout(&self) -> Duration {
        self.init_timeout
    }

    /// Initialize the detector with the configured timeout.
    ///
    /// `timer` turns a duration into a future that completes once it has
    /// elapsed, so the host picks the clock (a browser timeout, a native
    /// sleep, a test double).
    pub async fn initialize_with_timer<T, D>(&mut self, timer: T) -> bool
    where
        T: FnOnce(Duration) -> D,
        D: Future<Output = ()>,
    {
        let deadline = timer(self.init_timeout);
        self.initialize(deadline).await
    }

    /// Register a callback fired whenever the face-detected status flips.
    pub fn on_status_change<F>(&mut self, listener: F)
    where
        F: FnMut(bool) + 'static,
    {
        self.status_listener = Some(Box::new(listener));
    }

    /// True when enough time has passed since the previous detection tick.
    pub fn is_due(&self, now_ms: f64) -> bool {
        match self.last_tick_ms {
            Some(last) => now_ms - last >= self.interval_ms,
            None => true,
        }
    }

    /// Run one detection tick if the source is running and the interval has
    /// elapsed. Returns whether the detector was consulted.
    ///
    /// A failing detector keeps the previous estimate.
    pub async fn tick(&mut self, now_ms: f64, frame: &VideoFrame<'_>) -> bool {
        if !self.running || !self.is_due(now_ms) {
            return false;
        }
        self.last_tick_ms = Some(now_ms);

        match self.detector.detect(frame).await {
            Ok(faces) => self.ingest(faces, frame.size()),
            Err(e) => {
                debug!("detector {} tick failed: {e}", self.detector.name());
                if self.latest.is_none() {
                    self.latest = fallback_estimate(frame.size(), &self.fallback);
                }
            }
        }
        true
    }

    fn ingest(&mut self, faces: Vec<FaceEstimate>, frame: SurfaceSize) {
        let synthetic = self.detector.is_synthetic();
        let best = if synthetic {
            None
        } else {
            select_best(faces.into_iter().filter(FaceEstimate::is_valid), frame)
        };

        match best {
            Some(face) => {
                let space_changed = self
                    .history
                    .back()
                    .is_some_and(|prev| prev.resolved_space() != face.resolved_space());
                if space_changed {
                    self.history.clear();
                }
                self.history.push_back(face);
                while self.history.len() > self.history_len {
                    self.history.pop_front();
                }
                self.latest = stabilize(&self.history);
                self.set_status(true);
            }
            None => {
                self.history.clear();
                self.latest = fallback_estimate(frame, &self.fallback);
                self.set_status(false);
            }
        }
    }

    fn set_status(&mut self, detected: bool) {
        if self.face_detected != detected {
            self.face_detected = detected;
            debug!("face detected: {}", if detected { "yes" } else { "no" });
            if let Some(listener) = self.status_listener.as_mut() {
                listener(detected);
            }
        }
    }

    /// The most recent stabilized estimate, if any tick has completed.
    pub fn latest_estimate(&self) -> Option<&FaceEstimate> {
        self.latest.as_ref()
    }

    /// Whether the latest estimate came from a real detection.
    pub fn face_detected(&self) -> bool {
        self.face_detected
    }

    /// True once the source has fallen back to the synthetic detector.
    pub fn is_synthetic(&self) -> bool {
        self.detector.is_synthetic()
    }

    /// Stop detecting. Idempotent; later ticks do nothing.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            debug!("face signal source stopped");
        }
    }

    /// Whether ticks are still processed.
    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Pick the face with the best blend of confidence and centrality.
fn select_best<I>(faces: I, frame: SurfaceSize) -> Option<FaceEstimate>
where
    I: IntoIterator<Item = FaceEstimate>,
{
    let center = frame.center();
    let max_distance = center.distance(&Point::new(0.0, 0.0));

    let mut best: Option<(f64, FaceEstimate)> = None;
    for face in faces {
        let face_center = face.to_absolute(frame).center;
        let center_score = if max_distance > 0.0 {
            1.0 - face_center.distance(&center) / max_distance
        } else {
            1.0
        };
        let score = face.confidence * CONFIDENCE_WEIGHT + center_score * CENTER_WEIGHT;
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, face));
        }
    }
    best.map(|(_, face)| face)
}

/// Arithmetic mean of the history's box, size and center.
///
/// Confidence comes from the newest sample. Landmarks are averaged point by
/// point when every sample carries the same number, otherwise the newest set
/// is used.
fn stabilize(history: &VecDeque<FaceEstimate>) -> Option<FaceEstimate> {
    let newest = history.back()?;
    let n = history.len() as f64;

    let mut top_left = Point::default();
    let mut size = Size::default();
    let mut center = Point::default();
    for face in history {
        top_left.x += face.top_left.x;
        top_left.y += face.top_left.y;
        size.width += face.size.width;
        size.height += face.size.height;
        center.x += face.center.x;
        center.y += face.center.y;
    }

    let mut out = newest.clone();
    out.top_left = Point::new(top_left.x / n, top_left.y / n);
    out.size = Size::new(size.width / n, size.height / n);
    out.center = Point::new(center.x / n, center.y / n);
    out.landmarks = average_landmarks(history).or_else(|| newest.landmarks.clone());
    Some(out)
}

fn average_landmarks(history: &VecDeque<FaceEstimate>) -> Option<Vec<Landmark>> {
    let count = history.back()?.landmarks.as_ref()?.len();
    let sets: Vec<_> = history
        .iter()
        .map(|f| f.landmarks.as_ref().filter(|l| l.len() == count))
        .collect::<Option<_>>()?;
    let n = sets.len() as f64;
    Some(
        (0..count)
            .map(|i| {
                let (sx, sy) = sets
                    .iter()
                    .fold((0.0, 0.0), |(ax, ay), set| (ax + set[i].x, ay + set[i].y));
                Landmark::new(sx / n, sy / n)
            })
            .collect(),
    )
}
