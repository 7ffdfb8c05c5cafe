use futures::executor::block_on;
use futures::future::{self, FutureExt, LocalBoxFuture};
use image::{Rgba, RgbaImage};
use maskbooth::catalog::{FsAssetLoader, StaticManifest};
use maskbooth::controls::{self, AdjustCommand};
use maskbooth::storage::{JsonFileStore, MemoryStore};
use maskbooth::{
    BoothConfig, BoothError, CalibrationOrigin, CalibrationStore, CalibrationWizard,
    CompositorLoop, CoordinateSpace, FaceDetector, FaceEstimate, FaceSignalSource,
    OverlayCatalog, OverlayCategory, OverlayDefinition, OverlayImage, OverlaySession,
    PlacementEngine, RasterSurface, Rect, Surface, SurfaceSize, TickOutcome, VideoFrame,
    VideoSource,
};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const GRAY: [u8; 4] = [90, 90, 90, 255];

/// Detector that always reports the same face box.
struct FixedFace(Rect);

impl FaceDetector for FixedFace {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect<'a>(
        &'a mut self,
        _frame: &'a VideoFrame<'_>,
    ) -> LocalBoxFuture<'a, maskbooth::Result<Vec<FaceEstimate>>> {
        let face = FaceEstimate::from_box(self.0, 0.9, CoordinateSpace::Absolute);
        future::ready(Ok(vec![face])).boxed_local()
    }
}

/// Detector whose initialization never completes.
struct Hung;

impl FaceDetector for Hung {
    fn name(&self) -> &str {
        "hung"
    }

    fn initialize(&mut self) -> LocalBoxFuture<'_, maskbooth::Result<()>> {
        future::pending().boxed_local()
    }

    fn detect<'a>(
        &'a mut self,
        _frame: &'a VideoFrame<'_>,
    ) -> LocalBoxFuture<'a, maskbooth::Result<Vec<FaceEstimate>>> {
        future::ready(Err(BoothError::DetectorTick("unreachable".into()))).boxed_local()
    }
}

struct Camera {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Camera {
    fn gray(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: GRAY.repeat((width * height) as usize),
        }
    }
}

impl VideoSource for Camera {
    fn current_frame(&self) -> Option<VideoFrame<'_>> {
        Some(VideoFrame::with_rgba(self.width, self.height, &self.pixels))
    }
}

fn catalog_with(id: &str, category: OverlayCategory, image: RgbaImage) -> OverlayCatalog {
    let mut catalog = OverlayCatalog::default();
    catalog.register(OverlayDefinition::with_image(id, id, category, OverlayImage::new(image)));
    catalog
}

fn absolute_face(x: f64, y: f64, width: f64, height: f64) -> FaceEstimate {
    FaceEstimate::from_box(Rect::new(x, y, width, height), 0.9, CoordinateSpace::Absolute)
}

fn memory_session(catalog: OverlayCatalog) -> OverlaySession {
    OverlaySession::new(
        catalog,
        CalibrationStore::new(Box::new(MemoryStore::new())),
        &BoothConfig::default(),
    )
}

#[test]
fn detected_face_is_composited_onto_video() {
    let config = BoothConfig::default();
    let camera = Camera::gray(64, 48);
    let detector = FixedFace(Rect::new(22.0, 14.0, 20.0, 20.0));
    let mut signal = FaceSignalSource::new(Box::new(detector), &config);
    assert!(block_on(signal.initialize(future::pending::<()>())));

    let frame = camera.current_frame().unwrap();
    assert!(block_on(signal.tick(0.0, &frame)));
    assert!(signal.face_detected());

    let mut session = memory_session(catalog_with(
        "pirate",
        OverlayCategory::Unknown,
        RgbaImage::from_pixel(10, 10, RED),
    ));
    session.select("pirate").unwrap();

    let mut compositor = CompositorLoop::new(&config);
    compositor.start();
    let mut surface = RasterSurface::new(SurfaceSize::new(1, 1));
    let outcome = compositor.tick(&mut session, signal.latest_estimate(), &camera, &mut surface);
    assert_eq!(outcome, TickOutcome::Drawn { overlay: true });
    assert_eq!(surface.size(), SurfaceSize::new(64, 48));

    // 20px face * 1.2 = 24px overlay centered on (32, 24).
    let image = surface.image();
    assert_eq!(image.get_pixel(32, 24), &RED);
    assert_eq!(image.get_pixel(21, 13), &RED);
    assert_eq!(image.get_pixel(19, 24), &Rgba(GRAY));
    assert_eq!(image.get_pixel(2, 2), &Rgba(GRAY));

    let png = surface.snapshot_png().unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
    assert_eq!(decoded.get_pixel(32, 24), &RED);
}

#[test]
fn hung_detector_falls_back_to_synthetic_face() {
    let config = BoothConfig::default();
    let mut signal = FaceSignalSource::new(Box::new(Hung), &config);
    assert!(!block_on(signal.initialize(future::ready(()))));
    assert!(signal.is_synthetic());

    let frame = VideoFrame::opaque(640, 480);
    block_on(signal.tick(0.0, &frame));
    let estimate = signal.latest_estimate().unwrap();
    assert!(estimate.is_fallback());
    assert!(!signal.face_detected());

    // The overlay still has somewhere to go, but the wizard refuses the sample.
    let catalog = catalog_with("vader-mask", OverlayCategory::Helmet, RgbaImage::new(40, 50));
    let mut session = memory_session(catalog);
    session.select("vader-mask").unwrap();
    assert!(session.place(Some(estimate), frame.size()).is_some());

    let mut wizard = CalibrationWizard::new();
    wizard.start();
    let err = wizard.capture(Some(estimate), frame.size()).unwrap_err();
    assert!(matches!(err, BoothError::FaceNotDetected));
}

#[test]
fn reference_scenario_sizes_overlay_from_face_width() {
    // Surface 640x480, face box (160, 96) 320x288, scale factor 1.2,
    // identity calibration: width 384, height 384 * aspect.
    let catalog = catalog_with("pirate", OverlayCategory::Unknown, RgbaImage::new(400, 300));
    let mut engine = PlacementEngine::default();
    let overlay = catalog.get("pirate").unwrap();
    let face = absolute_face(160.0, 96.0, 320.0, 288.0);
    let placement = engine.compute_rect(
        Some(&face),
        overlay,
        &maskbooth::CalibrationEntry::identity("pirate"),
        SurfaceSize::new(640, 480),
        true,
    );
    assert!((placement.width - 384.0).abs() < 1e-9);
    assert!((placement.height - 288.0).abs() < 1e-9);
    assert!((placement.x - 128.0).abs() < 1e-9);
    assert!((placement.y - 96.0).abs() < 1e-9);
}

#[test]
fn normalized_and_absolute_faces_place_identically() {
    let surface = SurfaceSize::new(640, 480);
    let jedi = || catalog_with("jedi", OverlayCategory::Hood, RgbaImage::new(80, 100));
    let mut a = memory_session(jedi());
    let mut b = memory_session(jedi());
    a.select("jedi").unwrap();
    b.select("jedi").unwrap();

    let absolute = absolute_face(256.0, 144.0, 128.0, 192.0);
    let bounds = Rect::new(0.4, 0.3, 0.2, 0.4);
    let normalized = FaceEstimate::from_box(bounds, 0.9, CoordinateSpace::Unspecified);

    let (_, pa) = a.place(Some(&absolute), surface).unwrap();
    let (_, pb) = b.place(Some(&normalized), surface).unwrap();
    for (x, y) in [(pa.x, pb.x), (pa.y, pb.y), (pa.width, pb.width), (pa.height, pb.height)] {
        assert!((x - y).abs() < 1e-6, "{x} != {y}");
    }
}

#[test]
fn calibration_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.json");
    let face = absolute_face(260.0, 150.0, 120.0, 150.0);
    let surface = SurfaceSize::new(640, 480);

    {
        let mut session = OverlaySession::new(
            catalog_with("kylo-ren", OverlayCategory::Helmet, RgbaImage::new(100, 100)),
            CalibrationStore::new(Box::new(JsonFileStore::open(&path))),
            &BoothConfig::default(),
        );
        session.select("kylo-ren").unwrap();
        let mut wizard = CalibrationWizard::new();
        wizard.start();
        for _ in 0..3 {
            wizard.capture(Some(&face), surface).unwrap();
        }
        wizard.finish(&mut session, surface).unwrap();

        // A later manual nudge, saved, takes precedence over the preset.
        controls::apply(&mut session, AdjustCommand::Nudge { dx: 4.0, dy: 0.0 }).unwrap();
        controls::apply(&mut session, AdjustCommand::Save).unwrap();
    }

    let mut session = OverlaySession::new(
        catalog_with("kylo-ren", OverlayCategory::Helmet, RgbaImage::new(100, 100)),
        CalibrationStore::new(Box::new(JsonFileStore::open(&path))),
        &BoothConfig::default(),
    );
    session.select("kylo-ren").unwrap();
    assert_eq!(session.calibration_origin(), CalibrationOrigin::Manual);
    assert_eq!(session.calibration().offset_x, 4.0);
    assert!(session.calibrations().preset("kylo-ren").is_some());

    controls::apply(&mut session, AdjustCommand::ResetSaved).unwrap();
    session.select("kylo-ren").unwrap();
    assert_eq!(session.calibration_origin(), CalibrationOrigin::Default);
}

#[test]
fn manifest_on_disk_with_missing_asset() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("static/masks")).unwrap();
    RgbaImage::from_pixel(30, 40, RED)
        .save(dir.path().join("static/masks/jedi.png"))
        .unwrap();
    let manifest = StaticManifest::new(
        r#"[
            {"id": "none", "name": "No Mask", "image": null},
            {"id": "jedi", "name": "Jedi", "image": "/static/masks/jedi.png"},
            {"id": "emperor", "name": "Emperor", "image": "/static/masks/emperor.png"}
        ]"#,
    );
    let catalog = block_on(OverlayCatalog::load(&manifest, &FsAssetLoader::new(dir.path())));

    assert_eq!(catalog.len(), 3);
    let jedi = catalog.get("jedi").unwrap();
    assert_eq!(jedi.image.as_ref().unwrap().pixels().get_pixel(0, 0), &RED);
    let emperor = catalog.get("emperor").unwrap();
    assert!(emperor.image.as_ref().unwrap().is_placeholder());
    assert_eq!(emperor.category, OverlayCategory::Hood);
}

#[test]
fn stopping_from_a_handle_ends_the_loop() {
    let mut session = memory_session(OverlayCatalog::default());
    let camera = Camera::gray(8, 8);
    let mut compositor = CompositorLoop::new(&BoothConfig::default());
    compositor.start();
    let handle = compositor.stop_handle();
    let mut surface = RasterSurface::new(SurfaceSize::new(8, 8));

    let mut frames = 0;
    loop {
        match compositor.tick(&mut session, None, &camera, &mut surface) {
            TickOutcome::Stopped => break,
            _ => frames += 1,
        }
        if frames == 3 {
            handle.stop();
        }
    }
    assert_eq!(frames, 3);
    assert_eq!(compositor.frames_drawn(), 3);
}
