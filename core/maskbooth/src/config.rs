use serde::{Deserialize, Serialize};

use crate::error::{BoothError, Result};

/// Upper bound for the smoothing factor; higher values lag too far behind.
pub const MAX_SMOOTHING_FACTOR: f64 = 0.9;

/// Geometry of the synthetic face used when detection is unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackFace {
    /// Face width as a fraction of frame width.
    pub width_fraction: f64,
    /// Face height as a multiple of face width.
    pub aspect: f64,
    /// Face center height as a fraction of frame height.
    pub center_y_fraction: f64,
    /// Confidence reported for the synthetic face.
    pub confidence: f64,
}

impl Default for FallbackFace {
    fn default() -> Self {
        Self {
            width_fraction: 0.3,
            aspect: 1.3,
            center_y_fraction: 0.4,
            confidence: 0.8,
        }
    }
}

/// Tunables for the overlay pipeline.
///
/// Deserializes from camelCase JSON with every field optional, so a partial
/// object (or `{}`) yields the defaults for whatever is missing.
///
/// ```
/// use maskbooth::BoothConfig;
///
/// let config = BoothConfig::default()
///     .smoothing_factor(0.5)
///     .detection_interval_ms(100.0)
///     .debug(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoothConfig {
    /// Weight of the previous rectangle in exponential smoothing, in [0, 0.9].
    pub smoothing_factor: f64,
    /// Minimum milliseconds between detection ticks.
    pub detection_interval_ms: f64,
    /// Number of recent estimates averaged by the signal source.
    pub history_len: usize,
    /// Overlay width as a fraction of surface width when not face-anchored.
    pub default_width_fraction: f64,
    /// Divisor placing the unanchored overlay above center: y = (H - h) / divisor.
    pub default_vertical_divisor: f64,
    /// Largest overlay extent as a fraction of each surface dimension.
    pub max_surface_fraction: f64,
    /// Synthetic face geometry.
    pub fallback: FallbackFace,
    /// How long detector initialization may take before falling back.
    pub detector_init_timeout_ms: f64,
    /// Draw raw detection boxes and anchor points.
    pub debug: bool,
}

impl Default for BoothConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.35,
            detection_interval_ms: 150.0,
            history_len: 5,
            default_width_fraction: 0.4,
            default_vertical_divisor: 2.5,
            max_surface_fraction: 0.8,
            fallback: FallbackFace::default(),
            detector_init_timeout_ms: 5000.0,
            debug: false,
        }
    }
}

impl BoothConfig {
    /// Parse a JSON configuration object.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BoothConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the smoothing factor (default: 0.35).
    pub fn smoothing_factor(mut self, k: f64) -> Self {
        self.smoothing_factor = k;
        self
    }

    /// Set the detection interval in milliseconds (default: 150).
    pub fn detection_interval_ms(mut self, ms: f64) -> Self {
        self.detection_interval_ms = ms;
        self
    }

    /// Set the estimate history length (default: 5).
    pub fn history_len(mut self, len: usize) -> Self {
        self.history_len = len;
        self
    }

    /// Set the fallback face geometry.
    pub fn fallback(mut self, fallback: FallbackFace) -> Self {
        self.fallback = fallback;
        self
    }

    /// Set the detector initialization timeout (default: 5000 ms).
    pub fn detector_init_timeout_ms(mut self, ms: f64) -> Self {
        self.detector_init_timeout_ms = ms;
        self
    }

    /// Enable or disable debug drawing (default: false).
    pub fn debug(mut self, enable: bool) -> Self {
        self.debug = enable;
        self
    }

    /// Check every field is in range.
    pub fn validate(&self) -> Result<()> {
        let k = self.smoothing_factor;
        if !(0.0..=MAX_SMOOTHING_FACTOR).contains(&k) {
            return Err(BoothError::InvalidConfig(format!(
                "smoothing factor must be in [0, {MAX_SMOOTHING_FACTOR}], got {k}"
            )));
        }
        if !(self.detection_interval_ms >= 0.0) {
            return Err(BoothError::InvalidConfig(
                "detection interval must be >= 0".into(),
            ));
        }
        if !(self.detector_init_timeout_ms >= 0.0 && self.detector_init_timeout_ms.is_finite()) {
            return Err(BoothError::InvalidConfig(
                "detector init timeout must be a finite number of ms >= 0".into(),
            ));
        }
        if self.history_len == 0 {
            return Err(BoothError::InvalidConfig("history length must be > 0".into()));
        }
        for (name, value) in [
            ("default width fraction", self.default_width_fraction),
            ("max surface fraction", self.max_surface_fraction),
            ("fallback width fraction", self.fallback.width_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(BoothError::InvalidConfig(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if !(self.default_vertical_divisor > 0.0) {
            return Err(BoothError::InvalidConfig(
                "vertical divisor must be > 0".into(),
            ));
        }
        if !(self.fallback.aspect > 0.0) || !(0.0..=1.0).contains(&self.fallback.confidence) {
            return Err(BoothError::InvalidConfig("invalid fallback face".into()));
        }
        Ok(())
    }
}

/// True when a page query string asks for debug drawing (`?debug`, `&debug=1`).
pub fn is_debug_query(query: &str) -> bool {
    query
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split('=').next())
        .any(|key| key == "debug")
}
