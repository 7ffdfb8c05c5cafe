//! Composite an overlay onto a still photo and write the result as PNG.
//!
//! The face is the synthetic centered estimate unless built with the
//! `rustface` feature and given a SeetaFace model.
//!
//! Usage:
//!   cargo run --example render_snapshot -- <photo> <overlay-id> <out.png> [model.bin]

use std::future::Future;
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::block_on;
use futures::FutureExt;
use maskbooth::catalog::{default_manifest, FsAssetLoader};
use maskbooth::storage::MemoryStore;
use maskbooth::{
    BoothConfig, CalibrationStore, CompositorLoop, FaceSignalSource, OverlayCatalog,
    OverlaySession, RasterSurface, SurfaceSize, TickOutcome, VideoFrame, VideoSource,
};

struct Still {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl VideoSource for Still {
    fn current_frame(&self) -> Option<VideoFrame<'_>> {
        Some(VideoFrame::with_rgba(self.width, self.height, &self.pixels))
    }
}

/// Completes once `duration` has passed, timed on a helper thread.
fn sleep(duration: Duration) -> impl Future<Output = ()> {
    let (done, elapsed) = oneshot::channel();
    std::thread::spawn(move || {
        std::thread::sleep(duration);
        let _ = done.send(());
    });
    elapsed.map(|_| ())
}

#[cfg(feature = "rustface")]
fn signal_for(config: &BoothConfig, model: Option<&str>) -> FaceSignalSource {
    let Some(path) = model else {
        return FaceSignalSource::synthetic(config);
    };
    match maskbooth::RustfaceDetector::from_path(path) {
        Ok(detector) => FaceSignalSource::new(Box::new(detector), config),
        Err(e) => {
            eprintln!("cannot read model {path}: {e}");
            FaceSignalSource::synthetic(config)
        }
    }
}

#[cfg(not(feature = "rustface"))]
fn signal_for(config: &BoothConfig, model: Option<&str>) -> FaceSignalSource {
    if model.is_some() {
        eprintln!("built without the rustface feature; ignoring model");
    }
    FaceSignalSource::synthetic(config)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: render_snapshot <photo> <overlay-id> <out.png> [model.bin]");
        std::process::exit(2);
    }

    let photo = image::open(&args[1]).expect("failed to open photo").to_rgba8();
    let still = Still {
        width: photo.width(),
        height: photo.height(),
        pixels: photo.into_raw(),
    };

    let config = BoothConfig::default().debug(std::env::var_os("MASKBOOTH_DEBUG").is_some());
    let mut signal = signal_for(&config, args.get(4).map(String::as_str));
    let real = block_on(signal.initialize_with_timer(sleep));
    let frame = still.current_frame().expect("still image always has a frame");
    block_on(signal.tick(0.0, &frame));
    println!(
        "detector: {}, face detected: {}",
        if real { "model" } else { "synthetic" },
        signal.face_detected()
    );

    // Overlay images resolve relative to the working directory.
    let catalog = block_on(OverlayCatalog::from_manifest(
        &default_manifest(),
        &FsAssetLoader::new("."),
    ));
    let store = CalibrationStore::new(Box::new(MemoryStore::new()));
    let mut session = OverlaySession::new(catalog, store, &config);
    session.select(&args[2]).expect("unknown overlay id");

    let mut surface = RasterSurface::new(SurfaceSize::new(still.width, still.height));
    let mut compositor = CompositorLoop::new(&config);
    compositor.start();
    match compositor.tick(&mut session, signal.latest_estimate(), &still, &mut surface) {
        TickOutcome::Drawn { overlay } => println!("frame drawn (overlay: {overlay})"),
        other => println!("nothing drawn: {other:?}"),
    }

    std::fs::write(&args[3], surface.snapshot_png().expect("PNG encoding failed"))
        .expect("failed to write snapshot");
    println!("wrote {}", args[3]);
}
