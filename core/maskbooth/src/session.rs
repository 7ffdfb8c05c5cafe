use log::{debug, info};

use crate::calibration::{CalibrationEntry, CalibrationOrigin, CalibrationStore};
use crate::catalog::{OverlayCatalog, OverlayDefinition, OverlayImage, NONE_ID};
use crate::config::BoothConfig;
use crate::error::{BoothError, Result};
use crate::face_detector::FaceEstimate;
use crate::geometry::{PlacementResult, SurfaceSize};
use crate::placement::PlacementEngine;

/// Everything one booth needs between frames: the overlay catalog, the active
/// selection and its working calibration, persisted calibrations and the
/// placement engine.
///
/// The session is an explicit value owned by whoever drives the frame loop;
/// nothing here is global.
pub struct OverlaySession {
    catalog: OverlayCatalog,
    calibrations: CalibrationStore,
    engine: PlacementEngine,
    active: Option<String>,
    calibration: CalibrationEntry,
    origin: CalibrationOrigin,
    auto_position: bool,
}

impl OverlaySession {
    /// Start with no overlay selected and auto-positioning on.
    pub fn new(
        catalog: OverlayCatalog,
        calibrations: CalibrationStore,
        config: &BoothConfig,
    ) -> Self {
        Self {
            catalog,
            calibrations,
            engine: PlacementEngine::new(config),
            active: None,
            calibration: CalibrationEntry::identity(NONE_ID),
            origin: CalibrationOrigin::Default,
            auto_position: true,
        }
    }

    /// Select the overlay `id`; `"none"` clears the selection.
    ///
    /// Loads the overlay's saved calibration and drops smoothing history so
    /// the new overlay snaps to its target.
    pub fn select(&mut self, id: &str) -> Result<&OverlayDefinition> {
        let def = self
            .catalog
            .get(id)
            .ok_or_else(|| BoothError::UnknownOverlay(id.to_string()))?;
        self.engine.reset();
        if def.is_none() {
            self.active = None;
            self.calibration = CalibrationEntry::identity(NONE_ID);
            self.origin = CalibrationOrigin::Default;
            debug!("overlay cleared");
        } else {
            let (calibration, origin) = self.calibrations.resolve(id);
            info!("selected overlay {id} ({origin:?} calibration)");
            self.active = Some(id.to_string());
            self.calibration = calibration;
            self.origin = origin;
        }
        Ok(def)
    }

    /// Select the `index`-th overlay in catalog order (0 is "none").
    pub fn select_index(&mut self, index: usize) -> Result<&OverlayDefinition> {
        let id = self
            .catalog
            .entries()
            .get(index)
            .map(|def| def.id.clone())
            .ok_or_else(|| BoothError::UnknownOverlay(format!("#{index}")))?;
        self.select(&id)
    }

    /// The selected overlay, if any.
    pub fn active_overlay(&self) -> Option<&OverlayDefinition> {
        self.active.as_deref().and_then(|id| self.catalog.get(id))
    }

    /// Id of the selected overlay, if any.
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// The working calibration for the selected overlay.
    pub fn calibration(&self) -> &CalibrationEntry {
        &self.calibration
    }

    /// Where the working calibration was loaded from.
    pub fn calibration_origin(&self) -> CalibrationOrigin {
        self.origin
    }

    /// Replace the working calibration without persisting it.
    pub fn set_calibration(&mut self, entry: CalibrationEntry) -> Result<()> {
        let Some(id) = self.active.as_deref() else {
            return Ok(());
        };
        let entry = CalibrationEntry {
            overlay_id: id.to_string(),
            ..entry
        };
        entry.validate()?;
        self.calibration = entry;
        Ok(())
    }

    /// Persist the working calibration as the overlay's manual entry.
    pub fn save_calibration(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Ok(());
        }
        self.calibrations.save(&self.calibration)?;
        self.origin = CalibrationOrigin::Manual;
        Ok(())
    }

    /// Delete every saved calibration for the selected overlay and fall back
    /// to identity.
    pub fn reset_calibration(&mut self) -> Result<()> {
        let Some(id) = self.active.clone() else {
            return Ok(());
        };
        self.calibrations.reset(&id)?;
        self.calibration = CalibrationEntry::identity(&id);
        self.origin = CalibrationOrigin::Default;
        Ok(())
    }

    /// Commit a wizard preset for `overlay_id`, applying it at once when that
    /// overlay is selected.
    pub fn apply_preset(&mut self, overlay_id: &str, entry: &CalibrationEntry) -> Result<()> {
        self.calibrations.save_preset(overlay_id, entry)?;
        if self.active.as_deref() == Some(overlay_id) {
            let (calibration, origin) = self.calibrations.resolve(overlay_id);
            self.calibration = calibration;
            self.origin = origin;
            self.engine.reset();
        }
        Ok(())
    }

    /// Whether placement follows the detected face.
    pub fn auto_position(&self) -> bool {
        self.auto_position
    }

    /// Turn face tracking on or off.
    pub fn set_auto_position(&mut self, enabled: bool) {
        if self.auto_position != enabled {
            self.auto_position = enabled;
            self.engine.reset();
        }
    }

    /// Flip auto-positioning and return the new value.
    pub fn toggle_auto_position(&mut self) -> bool {
        self.set_auto_position(!self.auto_position);
        self.auto_position
    }

    /// This frame's placement for the selected overlay.
    ///
    /// `None` when nothing is selected or the placement is not drawable.
    /// `estimate` must already be in `surface` coordinates or normalized.
    pub fn place(
        &mut self,
        estimate: Option<&FaceEstimate>,
        surface: SurfaceSize,
    ) -> Option<(OverlayImage, PlacementResult)> {
        let def = self.active.as_deref().and_then(|id| self.catalog.get(id))?;
        let image = def.image.clone()?;
        let placement = self.engine.compute_rect(
            estimate,
            def,
            &self.calibration,
            surface,
            self.auto_position,
        );
        placement.is_drawable().then_some((image, placement))
    }

    /// The overlay catalog.
    pub fn catalog(&self) -> &OverlayCatalog {
        &self.catalog
    }

    /// Register an overlay at runtime.
    pub fn register_overlay(&mut self, def: OverlayDefinition) {
        let replaces_active = self.active.as_deref() == Some(def.id.as_str());
        self.catalog.register(def);
        if replaces_active {
            self.engine.reset();
        }
    }

    /// Persisted calibrations.
    pub fn calibrations(&self) -> &CalibrationStore {
        &self.calibrations
    }

    /// The placement engine.
    pub fn engine(&self) -> &PlacementEngine {
        &self.engine
    }

    /// Mutable access to the placement engine.
    pub fn engine_mut(&mut self) -> &mut PlacementEngine {
        &mut self.engine
    }
}
