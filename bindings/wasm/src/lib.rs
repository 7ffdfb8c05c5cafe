use std::cell::RefCell;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use maskbooth::catalog::{placeholder_image, ManifestEntry};
use maskbooth::controls::{self, AdjustCommand};
use maskbooth::storage::MemoryStore;
use maskbooth::{
    BoothConfig, BoothError, CalibrationEntry, CalibrationStore, CalibrationWizard,
    CoordinateSpace, EstimateSource, FaceDetector, FaceEstimate, FaceSignalSource, KeyValueStore,
    Landmark, OverlayCatalog, OverlayDefinition, OverlayImage, OverlaySession, Rect, SurfaceSize,
    VideoFrame, WizardState,
};
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

/// A face estimate as produced by a JavaScript detector.
///
/// Only the box is required; `confidence` defaults to 1 and
/// `coordinateSpace` to `"unspecified"` (sizes ≤ 1 are taken as normalized).
/// `fallback: true` marks the synthetic centered face from [`FaceSignal`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateInput {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub coordinate_space: CoordinateSpace,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    #[serde(default)]
    pub fallback: bool,
}

fn full_confidence() -> f64 {
    1.0
}

impl From<EstimateInput> for FaceEstimate {
    fn from(input: EstimateInput) -> Self {
        let mut estimate = FaceEstimate::from_box(
            Rect::new(input.x, input.y, input.width, input.height),
            input.confidence,
            input.coordinate_space,
        )
        .with_landmarks(input.landmarks);
        if input.fallback {
            estimate.source = EstimateSource::Fallback;
        }
        estimate
    }
}

/// A face estimate handed back to JavaScript, in the shape `EstimateInput` reads.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EstimateOutput<'a> {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    confidence: f64,
    coordinate_space: CoordinateSpace,
    #[serde(skip_serializing_if = "Option::is_none")]
    landmarks: Option<&'a [Landmark]>,
    fallback: bool,
}

impl<'a> From<&'a FaceEstimate> for EstimateOutput<'a> {
    fn from(estimate: &'a FaceEstimate) -> Self {
        Self {
            x: estimate.top_left.x,
            y: estimate.top_left.y,
            width: estimate.size.width,
            height: estimate.size.height,
            confidence: estimate.confidence,
            coordinate_space: estimate.coordinate_space,
            landmarks: estimate.landmarks.as_deref(),
            fallback: estimate.is_fallback(),
        }
    }
}

/// Selector entry returned by `PlacementSession.overlays()`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OverlaySummary<'a> {
    id: &'a str,
    name: &'a str,
    description: &'a str,
    category: maskbooth::OverlayCategory,
    placeholder: bool,
}

/// Create a JS `Error` with a `code` property.
fn make_error(code: &str, message: &str) -> JsValue {
    let err = js_sys::Error::new(message);
    let _ = js_sys::Reflect::set(&err, &"code".into(), &JsValue::from_str(code));
    JsValue::from(err)
}

/// Convert a `BoothError` into a JS `Error` with a machine-readable `code` property.
fn to_js_error(e: BoothError) -> JsValue {
    let code = match &e {
        BoothError::AssetLoad { .. } => "ASSET_LOAD",
        BoothError::UnknownOverlay(_) => "UNKNOWN_OVERLAY",
        BoothError::Manifest(_) => "MANIFEST",
        BoothError::DetectorInit(_) => "DETECTOR_INIT",
        BoothError::DetectorTick(_) => "DETECTOR_TICK",
        BoothError::Storage(_) => "STORAGE",
        BoothError::DegenerateGeometry { .. } => "DEGENERATE_GEOMETRY",
        BoothError::InvalidCalibration { .. } => "INVALID_CALIBRATION",
        BoothError::InvalidConfig(_) => "INVALID_CONFIG",
        BoothError::FaceNotDetected => "FACE_NOT_DETECTED",
        BoothError::WizardState { .. } => "WIZARD_STATE",
        BoothError::Surface(_) => "SURFACE",
        BoothError::Serialization(_) => "SERIALIZATION",
        BoothError::Io(_) => "IO",
    };
    make_error(code, &e.to_string())
}

fn from_js<T: serde::de::DeserializeOwned>(value: JsValue, what: &str) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|e| make_error("INVALID_OPTIONS", &format!("invalid {what}: {e}")))
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| make_error("SERIALIZATION", &format!("cannot convert result: {e}")))
}

fn parse_estimate(estimate: JsValue) -> Result<Option<FaceEstimate>, JsValue> {
    if estimate.is_undefined() || estimate.is_null() {
        Ok(None)
    } else {
        Ok(Some(from_js::<EstimateInput>(estimate, "face estimate")?.into()))
    }
}

fn parse_config(config: JsValue) -> Result<BoothConfig, JsValue> {
    let config = if config.is_undefined() || config.is_null() {
        BoothConfig::default()
    } else {
        from_js::<BoothConfig>(config, "options")?
    };
    config.validate().map_err(to_js_error)?;
    Ok(config)
}

/// Result of the next detection tick, filled in by JavaScript.
type Inbox = Rc<RefCell<Option<maskbooth::Result<Vec<FaceEstimate>>>>>;

/// Detector fed from JavaScript: each tick consumes whatever was pushed.
struct PushedDetector {
    inbox: Inbox,
    init_error: Rc<RefCell<Option<String>>>,
}

impl FaceDetector for PushedDetector {
    fn name(&self) -> &str {
        "javascript"
    }

    fn initialize(&mut self) -> LocalBoxFuture<'_, maskbooth::Result<()>> {
        let result = match self.init_error.borrow_mut().take() {
            Some(reason) => Err(BoothError::DetectorInit(reason)),
            None => Ok(()),
        };
        future::ready(result).boxed_local()
    }

    fn detect<'a>(
        &'a mut self,
        _frame: &'a VideoFrame<'_>,
    ) -> LocalBoxFuture<'a, maskbooth::Result<Vec<FaceEstimate>>> {
        let next = self.inbox.borrow_mut().take().unwrap_or_else(|| Ok(Vec::new()));
        future::ready(next).boxed_local()
    }
}

/// `KeyValueStore` over the page's `window.localStorage`.
struct LocalStorageStore {
    storage: web_sys::Storage,
}

impl LocalStorageStore {
    /// `None` outside a browser window or when storage access is denied.
    fn open() -> Option<Self> {
        let storage = web_sys::window()?.local_storage().ok()??;
        Some(Self { storage })
    }
}

fn storage_error(e: JsValue) -> BoothError {
    BoothError::Storage(
        e.as_string()
            .or_else(|| e.dyn_ref::<js_sys::Error>().map(|err| String::from(err.message())))
            .unwrap_or_else(|| "localStorage unavailable".into()),
    )
}

impl KeyValueStore for LocalStorageStore {
    fn get(&self, key: &str) -> maskbooth::Result<Option<String>> {
        self.storage.get_item(key).map_err(storage_error)
    }

    fn set(&mut self, key: &str, value: &str) -> maskbooth::Result<()> {
        self.storage.set_item(key, value).map_err(storage_error)
    }

    fn remove(&mut self, key: &str) -> maskbooth::Result<()> {
        self.storage.remove_item(key).map_err(storage_error)
    }
}

/// Calibration store on localStorage, or in memory when it is unavailable.
fn browser_store() -> CalibrationStore {
    match LocalStorageStore::open() {
        Some(store) => CalibrationStore::new(Box::new(store)),
        None => CalibrationStore::new(Box::new(MemoryStore::new())),
    }
}

fn wizard_state_name(state: WizardState) -> String {
    match state {
        WizardState::Closed => "closed".into(),
        WizardState::AwaitingSamples => "awaiting-samples".into(),
        WizardState::Collected(n) => format!("collected-{n}"),
        WizardState::ReadyToFinish => "ready-to-finish".into(),
    }
}

/// True when a page query string asks for debug drawing.
///
/// @param query - `location.search`, e.g. `"?debug"` or `"?a=1&debug=true"`
#[wasm_bindgen(js_name = "isDebugQuery")]
pub fn is_debug_query(query: &str) -> bool {
    maskbooth::is_debug_query(query)
}

/// Overlay selection, calibration and per-frame placement for one booth.
///
/// JavaScript owns the camera, the detector and the canvas; it feeds face
/// estimates in and draws the overlay image at the returned placement.
#[wasm_bindgen]
pub struct PlacementSession {
    session: OverlaySession,
    wizard: CalibrationWizard,
}

#[wasm_bindgen]
impl PlacementSession {
    /// Create a session.
    ///
    /// @param config - Optional object with BoothConfig fields (camelCase),
    ///   e.g. `{ smoothingFactor: 0.35, debug: true }`
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<PlacementSession, JsValue> {
        let config = parse_config(config)?;
        Ok(Self {
            session: OverlaySession::new(OverlayCatalog::default(), browser_store(), &config),
            wizard: CalibrationWizard::new(),
        })
    }

    /// Add or replace an overlay.
    ///
    /// @param entry - Manifest record `{ id, name, description?, category?,
    ///   scaleFactor?, verticalBias? }`
    /// @param image - PNG or JPEG bytes; a placeholder is drawn when absent
    ///   or undecodable
    #[wasm_bindgen(js_name = "registerOverlay")]
    pub fn register_overlay(
        &mut self,
        entry: JsValue,
        image: Option<Vec<u8>>,
    ) -> Result<(), JsValue> {
        let entry: ManifestEntry = from_js(entry, "overlay entry")?;
        let mut def = OverlayDefinition::from_entry(&entry);
        let raster = image
            .and_then(|bytes| OverlayImage::decode(&bytes).ok())
            .unwrap_or_else(|| placeholder_image(&entry.id));
        def.attach_image(raster);
        self.session.register_overlay(def);
        Ok(())
    }

    /// Selector entries in order, starting with "none".
    pub fn overlays(&self) -> Result<JsValue, JsValue> {
        let list: Vec<OverlaySummary<'_>> = self
            .session
            .catalog()
            .entries()
            .iter()
            .map(|def| OverlaySummary {
                id: &def.id,
                name: &def.display_name,
                description: &def.description,
                category: def.category,
                placeholder: def.image.as_ref().is_some_and(OverlayImage::is_placeholder),
            })
            .collect();
        to_js(&list)
    }

    /// Select an overlay by id; `"none"` clears the selection.
    pub fn select(&mut self, id: &str) -> Result<(), JsValue> {
        self.session.select(id).map(|_| ()).map_err(to_js_error)
    }

    /// Id of the selected overlay, or `undefined`.
    #[wasm_bindgen(js_name = "activeOverlay")]
    pub fn active_overlay(&self) -> Option<String> {
        self.session.active_id().map(str::to_string)
    }

    /// This frame's placement `{ x, y, width, height, rotation, opacity }`,
    /// or `null` when nothing should be drawn.
    ///
    /// @param estimate - Face estimate in surface coordinates, or null
    pub fn place(
        &mut self,
        estimate: JsValue,
        width: u32,
        height: u32,
    ) -> Result<JsValue, JsValue> {
        let estimate = parse_estimate(estimate)?;
        match self.session.place(estimate.as_ref(), SurfaceSize::new(width, height)) {
            Some((_, placement)) => to_js(&placement),
            None => Ok(JsValue::NULL),
        }
    }

    /// Apply a keyboard shortcut. Returns the notification text, if any.
    ///
    /// @param key - `KeyboardEvent.key`
    /// @param shift - Whether shift is held (larger nudges)
    #[wasm_bindgen(js_name = "handleKey")]
    pub fn handle_key(&mut self, key: &str, shift: bool) -> Result<Option<String>, JsValue> {
        match controls::command_for_key(key, shift) {
            Some(command) => controls::apply(&mut self.session, command).map_err(to_js_error),
            None => Ok(None),
        }
    }

    /// Delete the saved calibration and preset of the selected overlay.
    #[wasm_bindgen(js_name = "clearSavedCalibration")]
    pub fn clear_saved_calibration(&mut self) -> Result<Option<String>, JsValue> {
        controls::apply(&mut self.session, AdjustCommand::ResetSaved).map_err(to_js_error)
    }

    /// Whether placement follows the detected face.
    #[wasm_bindgen(getter = autoPosition)]
    pub fn auto_position(&self) -> bool {
        self.session.auto_position()
    }

    /// Turn face tracking on or off.
    #[wasm_bindgen(setter = autoPosition)]
    pub fn set_auto_position(&mut self, enabled: bool) {
        self.session.set_auto_position(enabled);
    }

    /// Change the smoothing factor (0 to 0.9).
    #[wasm_bindgen(js_name = "setSmoothingFactor")]
    pub fn set_smoothing_factor(&mut self, k: f64) -> Result<(), JsValue> {
        self.session.engine_mut().set_smoothing_factor(k).map_err(to_js_error)
    }

    /// The working calibration `{ overlayId, scale, offsetX, offsetY }`.
    pub fn calibration(&self) -> Result<JsValue, JsValue> {
        to_js(self.session.calibration())
    }

    /// Begin the three-sample calibration flow.
    #[wasm_bindgen(js_name = "startCalibration")]
    pub fn start_calibration(&mut self) {
        self.wizard.start();
    }

    /// Capture the current estimate; returns the new wizard state name.
    ///
    /// Throws `FACE_NOT_DETECTED` for a missing or synthetic face.
    #[wasm_bindgen(js_name = "captureSample")]
    pub fn capture_sample(
        &mut self,
        estimate: JsValue,
        width: u32,
        height: u32,
    ) -> Result<String, JsValue> {
        let estimate = parse_estimate(estimate)?;
        self.wizard
            .capture(estimate.as_ref(), SurfaceSize::new(width, height))
            .map(wizard_state_name)
            .map_err(to_js_error)
    }

    /// Compute and store the preset; returns the committed calibration.
    #[wasm_bindgen(js_name = "finishCalibration")]
    pub fn finish_calibration(&mut self, width: u32, height: u32) -> Result<JsValue, JsValue> {
        let entry = self
            .wizard
            .finish(&mut self.session, SurfaceSize::new(width, height))
            .map_err(to_js_error)?;
        to_js(&entry)
    }

    /// Abandon the calibration flow.
    #[wasm_bindgen(js_name = "cancelCalibration")]
    pub fn cancel_calibration(&mut self) {
        self.wizard.cancel();
    }

    /// Current wizard state name.
    #[wasm_bindgen(getter = calibrationState)]
    pub fn calibration_state(&self) -> String {
        wizard_state_name(self.wizard.state())
    }
}

/// Stabilized face signal fed by a JavaScript detector.
///
/// Push each detector result with `submit`; `latest()` returns the averaged
/// estimate, or the synthetic centered face when nothing was found. Pass it
/// straight to `PlacementSession.place`.
#[wasm_bindgen]
pub struct FaceSignal {
    source: FaceSignalSource,
    inbox: Inbox,
    init_error: Rc<RefCell<Option<String>>>,
}

#[wasm_bindgen]
impl FaceSignal {
    /// Create a signal using the timing, history and fallback settings.
    ///
    /// @param config - Optional BoothConfig fields, e.g. `{ historyLen: 5 }`
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<FaceSignal, JsValue> {
        let config = parse_config(config)?;
        let inbox = Inbox::default();
        let init_error = Rc::new(RefCell::new(None));
        let detector = PushedDetector {
            inbox: Rc::clone(&inbox),
            init_error: Rc::clone(&init_error),
        };
        Ok(Self {
            source: FaceSignalSource::new(Box::new(detector), &config),
            inbox,
            init_error,
        })
    }

    /// Record that the JavaScript detector could not start; from now on
    /// only the synthetic centered face is published.
    #[wasm_bindgen(js_name = "detectorUnavailable")]
    pub fn detector_unavailable(&mut self, reason: &str) {
        *self.init_error.borrow_mut() = Some(reason.to_string());
        let _ = self.source.initialize(future::pending::<()>()).now_or_never();
    }

    /// Feed one detection result. Returns whether it was consumed; results
    /// arriving faster than the detection interval are dropped.
    ///
    /// @param faces - Array of face estimates; empty or null for no face
    /// @param nowMs - Timestamp, e.g. `performance.now()`
    pub fn submit(
        &mut self,
        faces: JsValue,
        width: u32,
        height: u32,
        now_ms: f64,
    ) -> Result<bool, JsValue> {
        let faces: Vec<EstimateInput> = if faces.is_undefined() || faces.is_null() {
            Vec::new()
        } else {
            from_js(faces, "face list")?
        };
        let faces = faces.into_iter().map(FaceEstimate::from).collect();
        Ok(self.tick(Ok(faces), width, height, now_ms))
    }

    /// Report a failed detector run; the previous estimate is kept.
    #[wasm_bindgen(js_name = "reportError")]
    pub fn report_error(&mut self, message: &str, width: u32, height: u32, now_ms: f64) -> bool {
        self.tick(Err(BoothError::DetectorTick(message.to_string())), width, height, now_ms)
    }

    /// The current estimate, or `null` before the first result.
    pub fn latest(&self) -> Result<JsValue, JsValue> {
        match self.source.latest_estimate() {
            Some(estimate) => to_js(&EstimateOutput::from(estimate)),
            None => Ok(JsValue::NULL),
        }
    }

    /// Whether the last result contained a real face.
    #[wasm_bindgen(getter = faceDetected)]
    pub fn face_detected(&self) -> bool {
        self.source.face_detected()
    }

    /// Whether only the synthetic face is published.
    #[wasm_bindgen(getter)]
    pub fn synthetic(&self) -> bool {
        self.source.is_synthetic()
    }

    /// Stop consuming results.
    pub fn stop(&mut self) {
        self.source.stop();
    }
}

impl FaceSignal {
    fn tick(
        &mut self,
        result: maskbooth::Result<Vec<FaceEstimate>>,
        width: u32,
        height: u32,
        now_ms: f64,
    ) -> bool {
        *self.inbox.borrow_mut() = Some(result);
        let frame = VideoFrame::opaque(width, height);
        let consumed = self.source.tick(now_ms, &frame).now_or_never().unwrap_or(false);
        self.inbox.borrow_mut().take();
        consumed
    }
}

/// Direct access to persisted calibrations.
#[wasm_bindgen]
pub struct Calibrations {
    store: CalibrationStore,
}

#[wasm_bindgen]
impl Calibrations {
    /// Open the store on localStorage (in memory outside a browser).
    #[wasm_bindgen(constructor)]
    pub fn new() -> Calibrations {
        Self {
            store: browser_store(),
        }
    }

    /// Manual calibration for `overlay_id`; identity when none is saved.
    pub fn get(&self, overlay_id: &str) -> Result<JsValue, JsValue> {
        to_js(&self.store.get(overlay_id))
    }

    /// Wizard preset for `overlay_id`, or `null`.
    pub fn preset(&self, overlay_id: &str) -> Result<JsValue, JsValue> {
        match self.store.preset(overlay_id) {
            Some(entry) => to_js(&entry),
            None => Ok(JsValue::NULL),
        }
    }

    /// The calibration applied on selection: `{ entry, origin }`.
    pub fn resolve(&self, overlay_id: &str) -> Result<JsValue, JsValue> {
        let (entry, origin) = self.store.resolve(overlay_id);
        let obj = js_sys::Object::new();
        js_sys::Reflect::set(&obj, &"entry".into(), &to_js(&entry)?)?;
        js_sys::Reflect::set(
            &obj,
            &"origin".into(),
            &JsValue::from_str(match origin {
                maskbooth::CalibrationOrigin::Default => "default",
                maskbooth::CalibrationOrigin::Manual => "manual",
                maskbooth::CalibrationOrigin::Preset => "preset",
            }),
        )?;
        Ok(JsValue::from(obj))
    }

    /// Save a manual calibration `{ overlayId, scale, offsetX, offsetY }`.
    pub fn save(&mut self, entry: JsValue) -> Result<(), JsValue> {
        let entry: CalibrationEntry = from_js(entry, "calibration")?;
        self.store.save(&entry).map_err(to_js_error)
    }

    /// Delete the manual calibration and preset for `overlay_id`.
    pub fn reset(&mut self, overlay_id: &str) -> Result<(), JsValue> {
        self.store.reset(overlay_id).map_err(to_js_error)
    }
}

impl Default for Calibrations {
    fn default() -> Self {
        Self::new()
    }
}
