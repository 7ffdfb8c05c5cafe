use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{self, join_all, FutureExt, LocalBoxFuture};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_ellipse_mut;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{BoothError, Result};

/// Id of the always-present "no overlay" entry.
pub const NONE_ID: &str = "none";

/// Scale factor for overlays without a catalog-specific value.
pub const DEFAULT_SCALE_FACTOR: f64 = 1.2;

/// Dimensions of synthesized placeholder rasters.
const PLACEHOLDER_WIDTH: u32 = 400;
const PLACEHOLDER_HEIGHT: u32 = 500;
const PLACEHOLDER_STROKE: i32 = 3;

/// How an overlay is anchored to the face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverlayCategory {
    /// Covers the whole head; sits above the face center.
    Helmet,
    /// Covers the face; centered on the nose.
    FaceMask,
    /// Hood or cowl; centered with a per-item bias.
    Hood,
    /// No anchoring rule; pure centering.
    #[default]
    Unknown,
}

/// A decoded overlay raster shared between the catalog and renderers.
#[derive(Debug, Clone)]
pub struct OverlayImage {
    pixels: Arc<RgbaImage>,
    placeholder: bool,
}

impl OverlayImage {
    /// Wrap decoded pixels.
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            placeholder: false,
        }
    }

    /// Decode PNG or JPEG bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).map_err(|e| BoothError::AssetLoad {
            path: "<memory>".into(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(decoded.to_rgba8()))
    }

    /// The RGBA pixels.
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Height / width, or `None` for an empty raster.
    pub fn aspect_ratio(&self) -> Option<f64> {
        (self.width() > 0 && self.height() > 0)
            .then(|| self.height() as f64 / self.width() as f64)
    }

    /// True when this raster was synthesized after a load failure.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

/// One selectable overlay.
#[derive(Debug, Clone)]
pub struct OverlayDefinition {
    /// Stable unique id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Short description for the selector.
    pub description: String,
    /// Anchoring rule.
    pub category: OverlayCategory,
    /// Manifest path of the raster, if any.
    pub image_path: Option<String>,
    /// Loaded raster, `None` for "no overlay".
    pub image: Option<OverlayImage>,
    /// Height / width of the raster.
    pub intrinsic_aspect_ratio: f64,
    /// Overlay width as a multiple of face width.
    pub default_scale_factor: f64,
    /// Extra vertical shift as a fraction of face height (negative is up).
    pub default_vertical_bias_fraction: f64,
}

impl OverlayDefinition {
    /// The "no overlay" entry.
    pub fn none() -> Self {
        Self {
            id: NONE_ID.into(),
            display_name: "No Mask".into(),
            description: "Original camera feed".into(),
            category: OverlayCategory::Unknown,
            image_path: None,
            image: None,
            intrinsic_aspect_ratio: 1.0,
            default_scale_factor: DEFAULT_SCALE_FACTOR,
            default_vertical_bias_fraction: 0.0,
        }
    }

    /// Build a definition around an already loaded raster.
    pub fn with_image(
        id: &str,
        display_name: &str,
        category: OverlayCategory,
        image: OverlayImage,
    ) -> Self {
        let mut def = Self::from_entry(&ManifestEntry {
            id: id.into(),
            name: display_name.into(),
            image: None,
            description: String::new(),
            category: Some(category),
            scale_factor: None,
            vertical_bias: None,
        });
        def.attach_image(image);
        def
    }

    /// Build a definition from a manifest record, filling unset heuristics
    /// from the built-in table. The raster is attached separately.
    pub fn from_entry(entry: &ManifestEntry) -> Self {
        let known = builtin_heuristics(&entry.id);
        Self {
            id: entry.id.clone(),
            display_name: entry.name.clone(),
            description: entry.description.clone(),
            category: entry
                .category
                .or(known.map(|k| k.category))
                .unwrap_or_default(),
            image_path: entry.image.clone(),
            image: None,
            intrinsic_aspect_ratio: PLACEHOLDER_HEIGHT as f64 / PLACEHOLDER_WIDTH as f64,
            default_scale_factor: entry
                .scale_factor
                .or(known.map(|k| k.scale_factor))
                .unwrap_or(DEFAULT_SCALE_FACTOR),
            default_vertical_bias_fraction: entry
                .vertical_bias
                .or(known.map(|k| k.vertical_bias))
                .unwrap_or(0.0),
        }
    }

    /// Attach a raster and adopt its aspect ratio.
    pub fn attach_image(&mut self, image: OverlayImage) {
        if let Some(aspect) = image.aspect_ratio() {
            self.intrinsic_aspect_ratio = aspect;
        }
        self.image = Some(image);
    }

    /// True for the "no overlay" entry or any entry without a raster.
    pub fn is_none(&self) -> bool {
        self.id == NONE_ID || self.image.is_none()
    }
}

/// One record of the overlay manifest (`/api/masks` style JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Overlay id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Image path or URL, `null` for "no overlay".
    #[serde(default)]
    pub image: Option<String>,
    /// Description text.
    #[serde(default)]
    pub description: String,
    /// Anchoring rule override.
    #[serde(default)]
    pub category: Option<OverlayCategory>,
    /// Scale factor override.
    #[serde(default)]
    pub scale_factor: Option<f64>,
    /// Vertical bias override.
    #[serde(default)]
    pub vertical_bias: Option<f64>,
}

/// Parse a JSON manifest.
pub fn parse_manifest(json: &str) -> Result<Vec<ManifestEntry>> {
    serde_json::from_str(json).map_err(|e| BoothError::Manifest(e.to_string()))
}

#[derive(Debug, Clone, Copy)]
struct Heuristics {
    category: OverlayCategory,
    scale_factor: f64,
    vertical_bias: f64,
    color: [u8; 3],
}

/// Placement heuristics and placeholder colors for the built-in overlays.
fn builtin_heuristics(id: &str) -> Option<Heuristics> {
    use OverlayCategory::*;
    let (category, scale_factor, vertical_bias, color) = match id {
        "vader-mask" => (Helmet, 1.3, 0.0, [0x00, 0x00, 0x00]),
        "sith-lord" => (FaceMask, 1.1, 0.0, [0x8B, 0x00, 0x00]),
        "storm-trooper" => (Helmet, 1.4, 0.0, [0xFF, 0xFF, 0xFF]),
        "emperor" => (Hood, 1.2, -0.15, [0x4B, 0x00, 0x82]),
        "kylo-ren" => (Helmet, 1.25, 0.0, [0x2F, 0x4F, 0x4F]),
        "jedi" => (Hood, 1.15, -0.12, [0x8B, 0x45, 0x13]),
        _ => return None,
    };
    Some(Heuristics {
        category,
        scale_factor,
        vertical_bias,
        color,
    })
}

/// The built-in manifest used when the real one cannot be fetched.
pub fn default_manifest() -> Vec<ManifestEntry> {
    let entry = |id: &str, name: &str, image: Option<&str>, description: &str| ManifestEntry {
        id: id.into(),
        name: name.into(),
        image: image.map(Into::into),
        description: description.into(),
        category: None,
        scale_factor: None,
        vertical_bias: None,
    };
    vec![
        entry(NONE_ID, "No Mask", None, "Original camera feed"),
        entry(
            "vader-mask",
            "Darth Vader",
            Some("/static/masks/vader-mask.png"),
            "Dark Lord of the Sith",
        ),
        entry(
            "sith-lord",
            "Sith Lord",
            Some("/static/masks/sith-lord-mask.png"),
            "Ancient Sith warrior",
        ),
    ]
}

/// Where the overlay manifest comes from.
pub trait ManifestSource {
    /// Fetch the manifest entries.
    fn fetch(&self) -> LocalBoxFuture<'_, Result<Vec<ManifestEntry>>>;
}

/// Manifest held in memory as JSON text.
#[derive(Debug, Clone)]
pub struct StaticManifest {
    json: String,
}

impl StaticManifest {
    /// Wrap JSON manifest text.
    pub fn new(json: impl Into<String>) -> Self {
        Self { json: json.into() }
    }
}

impl ManifestSource for StaticManifest {
    fn fetch(&self) -> LocalBoxFuture<'_, Result<Vec<ManifestEntry>>> {
        future::ready(parse_manifest(&self.json)).boxed_local()
    }
}

/// Loads overlay rasters by manifest path.
pub trait AssetLoader {
    /// Load and decode the raster at `path`.
    fn load<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Result<OverlayImage>>;
}

/// Loads overlay rasters from a directory on disk.
///
/// Manifest paths are resolved relative to `root`, with any leading `/`
/// stripped, so web paths such as `/static/masks/a.png` map into the tree.
#[derive(Debug, Clone)]
pub struct FsAssetLoader {
    root: PathBuf,
}

impl FsAssetLoader {
    /// Resolve assets under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetLoader for FsAssetLoader {
    fn load<'a>(&'a self, path: &'a str) -> LocalBoxFuture<'a, Result<OverlayImage>> {
        let full = self.root.join(path.trim_start_matches('/'));
        let result = std::fs::read(&full)
            .map_err(|e| BoothError::AssetLoad {
                path: path.into(),
                reason: e.to_string(),
            })
            .and_then(|bytes| {
                OverlayImage::decode(&bytes).map_err(|e| BoothError::AssetLoad {
                    path: path.into(),
                    reason: e.to_string(),
                })
            });
        future::ready(result).boxed_local()
    }
}

/// Synthesize a stand-in raster for an overlay whose image failed to load.
///
/// An outlined ellipse in the overlay's color with two transparent eye holes,
/// at the canonical 4:5 aspect.
pub fn placeholder_image(overlay_id: &str) -> OverlayImage {
    let [r, g, b] = builtin_heuristics(overlay_id)
        .map(|h| h.color)
        .unwrap_or([0x66, 0x66, 0x66]);
    let fill = Rgba([r, g, b, 255]);
    let outline = Rgba([0, 0, 0, 255]);
    let clear = Rgba([0, 0, 0, 0]);

    let mut img = RgbaImage::from_pixel(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, clear);
    let (center, rx, ry) = ((200, 250), 150, 200);
    draw_filled_ellipse_mut(&mut img, center, rx, ry, outline);
    let (inner_rx, inner_ry) = (rx - PLACEHOLDER_STROKE, ry - PLACEHOLDER_STROKE);
    draw_filled_ellipse_mut(&mut img, center, inner_rx, inner_ry, fill);
    for eye in [(170, 200), (230, 200)] {
        draw_filled_ellipse_mut(&mut img, eye, 25, 35, clear);
    }

    OverlayImage {
        pixels: Arc::new(img),
        placeholder: true,
    }
}

/// Ordered set of overlays with their loaded rasters.
///
/// Always contains the `none` entry first.
#[derive(Debug, Clone)]
pub struct OverlayCatalog {
    entries: Vec<OverlayDefinition>,
}

impl Default for OverlayCatalog {
    fn default() -> Self {
        Self {
            entries: vec![OverlayDefinition::none()],
        }
    }
}

impl OverlayCatalog {
    /// Fetch the manifest and load every raster in parallel.
    ///
    /// Never fails: a manifest error falls back to [`default_manifest`], and
    /// each failed image is replaced by [`placeholder_image`].
    pub async fn load(source: &dyn ManifestSource, loader: &dyn AssetLoader) -> Self {
        let manifest = match source.fetch().await {
            Ok(entries) => {
                info!("loaded {} overlays", entries.len());
                entries
            }
            Err(e) => {
                warn!("{e}; using built-in overlays");
                default_manifest()
            }
        };
        Self::from_manifest(&manifest, loader).await
    }

    /// Build a catalog from already parsed entries.
    pub async fn from_manifest(manifest: &[ManifestEntry], loader: &dyn AssetLoader) -> Self {
        let mut catalog = Self::default();
        let mut pending = Vec::new();

        for entry in manifest {
            if entry.id == NONE_ID {
                continue;
            }
            let def = OverlayDefinition::from_entry(entry);
            pending.push(async move {
                let image = match def.image_path.as_deref() {
                    Some(path) => Some(match loader.load(path).await {
                        Ok(image) => {
                            let (w, h) = (image.width(), image.height());
                            debug!("loaded overlay image {} ({w}x{h})", def.id);
                            image
                        }
                        Err(e) => {
                            warn!("{e}; using placeholder for {}", def.id);
                            placeholder_image(&def.id)
                        }
                    }),
                    None => None,
                };
                (def, image)
            });
        }

        for (mut def, image) in join_all(pending).await {
            if let Some(image) = image {
                def.attach_image(image);
            }
            catalog.register(def);
        }
        catalog
    }

    /// Add an overlay at runtime, replacing any entry with the same id.
    ///
    /// The `none` entry cannot be replaced.
    pub fn register(&mut self, def: OverlayDefinition) {
        if def.id == NONE_ID {
            return;
        }
        match self.entries.iter_mut().find(|e| e.id == def.id) {
            Some(existing) => *existing = def,
            None => self.entries.push(def),
        }
    }

    /// Look up an overlay by id.
    pub fn get(&self, id: &str) -> Option<&OverlayDefinition> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// All overlays in selector order.
    pub fn entries(&self) -> &[OverlayDefinition] {
        &self.entries
    }

    /// The "no overlay" entry.
    pub fn none(&self) -> &OverlayDefinition {
        &self.entries[0]
    }

    /// Number of overlays including `none`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the catalog holds at least the `none` entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
