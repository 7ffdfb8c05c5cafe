use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{BoothError, Result};
use crate::storage::KeyValueStore;

const MANUAL_PREFIX: &str = "maskbooth.calibration.";
const PRESET_PREFIX: &str = "maskbooth.preset.";

/// Per-overlay correction applied on top of the default placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationEntry {
    /// Overlay this entry belongs to.
    pub overlay_id: String,
    /// Size multiplier, > 0.
    pub scale: f64,
    /// Horizontal shift in surface pixels.
    pub offset_x: f64,
    /// Vertical shift in surface pixels.
    pub offset_y: f64,
}

impl CalibrationEntry {
    /// The neutral correction: scale 1, no offset.
    pub fn identity(overlay_id: &str) -> Self {
        Self {
            overlay_id: overlay_id.to_string(),
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }

    /// True when this entry changes nothing.
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset_x == 0.0 && self.offset_y == 0.0
    }

    /// Reject non-positive scales and non-finite values.
    pub fn validate(&self) -> Result<()> {
        let reason = if !(self.scale.is_finite() && self.scale > 0.0) {
            Some(format!("scale must be > 0, got {}", self.scale))
        } else if !self.offset_x.is_finite() || !self.offset_y.is_finite() {
            Some("offsets must be finite".to_string())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(BoothError::InvalidCalibration {
                overlay_id: self.overlay_id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Which record a resolved calibration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOrigin {
    /// Nothing saved; identity.
    Default,
    /// Manual adjustment saved by the user.
    Manual,
    /// Preset committed by the calibration wizard.
    Preset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(flatten)]
    entry: CalibrationEntry,
    revision: u64,
}

/// Persistent per-overlay calibration: manual entries and wizard presets.
///
/// Reads never fail: missing or corrupt records read as absent. Writes return
/// [`BoothError::Storage`] so the UI can notify the user.
pub struct CalibrationStore {
    backend: Box<dyn KeyValueStore>,
}

impl CalibrationStore {
    /// Use `backend` for persistence.
    pub fn new(backend: Box<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    fn read(&self, key: &str) -> Option<StoredEntry> {
        let raw = match self.backend.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("calibration read {key} failed: {e}");
                return None;
            }
        };
        match serde_json::from_str::<StoredEntry>(&raw) {
            Ok(stored) if stored.entry.validate().is_ok() => Some(stored),
            Ok(_) => {
                warn!("ignoring invalid calibration record {key}");
                None
            }
            Err(e) => {
                warn!("ignoring corrupt calibration record {key}: {e}");
                None
            }
        }
    }

    fn next_revision(&self, overlay_id: &str) -> u64 {
        let manual = self.read(&manual_key(overlay_id)).map_or(0, |s| s.revision);
        let preset = self.read(&preset_key(overlay_id)).map_or(0, |s| s.revision);
        manual.max(preset) + 1
    }

    fn write(&mut self, key: &str, entry: CalibrationEntry, revision: u64) -> Result<()> {
        let json = serde_json::to_string(&StoredEntry { entry, revision })?;
        self.backend.set(key, &json).map_err(|e| {
            warn!("calibration write {key} failed: {e}");
            match e {
                BoothError::Storage(_) => e,
                other => BoothError::Storage(other.to_string()),
            }
        })
    }

    /// The manual entry for `overlay_id`, or identity when none is saved.
    pub fn get(&self, overlay_id: &str) -> CalibrationEntry {
        self.read(&manual_key(overlay_id))
            .map(|s| s.entry)
            .unwrap_or_else(|| CalibrationEntry::identity(overlay_id))
    }

    /// The wizard preset for `overlay_id`, if any.
    pub fn preset(&self, overlay_id: &str) -> Option<CalibrationEntry> {
        self.read(&preset_key(overlay_id)).map(|s| s.entry)
    }

    /// The calibration to apply when `overlay_id` is selected.
    ///
    /// A preset wins over the manual entry unless the manual entry was saved
    /// after it.
    pub fn resolve(&self, overlay_id: &str) -> (CalibrationEntry, CalibrationOrigin) {
        let manual = self.read(&manual_key(overlay_id));
        let preset = self.read(&preset_key(overlay_id));
        match (manual, preset) {
            (Some(m), Some(p)) if m.revision > p.revision => (m.entry, CalibrationOrigin::Manual),
            (_, Some(p)) => (p.entry, CalibrationOrigin::Preset),
            (Some(m), None) => (m.entry, CalibrationOrigin::Manual),
            (None, None) => (
                CalibrationEntry::identity(overlay_id),
                CalibrationOrigin::Default,
            ),
        }
    }

    /// Save a manual adjustment.
    pub fn save(&mut self, entry: &CalibrationEntry) -> Result<()> {
        entry.validate()?;
        let revision = self.next_revision(&entry.overlay_id);
        self.write(&manual_key(&entry.overlay_id), entry.clone(), revision)?;
        debug!("saved manual calibration for {} (rev {revision})", entry.overlay_id);
        Ok(())
    }

    /// Save a wizard-derived preset for `overlay_id`.
    pub fn save_preset(&mut self, overlay_id: &str, entry: &CalibrationEntry) -> Result<()> {
        let mut entry = entry.clone();
        entry.overlay_id = overlay_id.to_string();
        entry.validate()?;
        let revision = self.next_revision(overlay_id);
        self.write(&preset_key(overlay_id), entry, revision)?;
        debug!("saved calibration preset for {overlay_id} (rev {revision})");
        Ok(())
    }

    /// Delete both the manual entry and the preset for `overlay_id`.
    pub fn reset(&mut self, overlay_id: &str) -> Result<()> {
        let manual = self.backend.remove(&manual_key(overlay_id));
        let preset = self.backend.remove(&preset_key(overlay_id));
        manual.and(preset).map_err(|e| {
            warn!("calibration reset for {overlay_id} failed: {e}");
            BoothError::Storage(e.to_string())
        })
    }
}

fn manual_key(overlay_id: &str) -> String {
    format!("{MANUAL_PREFIX}{overlay_id}")
}

fn preset_key(overlay_id: &str) -> String {
    format!("{PRESET_PREFIX}{overlay_id}")
}
