use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use docscan_vision::{
    Artifact, CaptureOutcome, DetectorProfile, DocumentScanner, Quad, QuadDetector, RawFrame, ScanError,
    ScanObserver, ScannerConfig, StillCaptureDevice, event_channel, spawn_dispatcher,
};
use image::{ImageFormat, RgbaImage};
use parking_lot::Mutex;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Replays recorded frames through the document scanner and writes what it shows and captures.
#[derive(Debug, Parser)]
#[command(name = "scan_tester", version)]
struct Args {
    /// Directory of frames (png/jpg), replayed in file-name order.
    #[arg(long)]
    frames: PathBuf,
    /// JSON array with one list of candidate quads per frame.
    #[arg(long)]
    quads: PathBuf,
    /// Where composited frames and captured artifacts are written.
    #[arg(long)]
    output: PathBuf,
    /// Optional scanner configuration (JSON); missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Replay rate in frames per second.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,
    /// Take one manual capture after the last frame.
    #[arg(long)]
    manual_capture: bool,
}

/// The frame currently "in front of the camera", shared by the replay detector and camera.
struct Replay {
    quads: Vec<Vec<Quad>>,
    index: AtomicUsize,
    current: Mutex<Option<RgbaImage>>,
}

impl Replay {
    fn advance(&self, index: usize, frame: &RgbaImage) {
        self.index.store(index, Ordering::SeqCst);
        *self.current.lock() = Some(frame.clone());
    }
}

/// Hands back the recorded candidates for the frame being replayed, rescaled to the image.
struct ReplayDetector {
    replay: Arc<Replay>,
    frame_size: (u32, u32),
}

impl QuadDetector for ReplayDetector {
    fn detect(&self, image: &RgbaImage, _profile: DetectorProfile) -> Vec<Quad> {
        let index = self.replay.index.load(Ordering::SeqCst);
        let sx = image.width() as f32 / self.frame_size.0 as f32;
        let sy = image.height() as f32 / self.frame_size.1 as f32;
        self.replay
            .quads
            .get(index)
            .map(|candidates| candidates.iter().map(|q| q.scaled(sx, sy)).collect())
            .unwrap_or_default()
    }
}

/// A "camera" whose stills are the frame currently being replayed.
struct ReplayCamera {
    replay: Arc<Replay>,
}

#[async_trait]
impl StillCaptureDevice for ReplayCamera {
    async fn capture_full_resolution(&self) -> Result<Vec<u8>, ScanError> {
        let Some(frame) = self.replay.current.lock().clone() else {
            return Err(ScanError::Device("no frame has been replayed yet".into()));
        };
        let mut bytes = Cursor::new(Vec::new());
        frame
            .write_to(&mut bytes, ImageFormat::Png)
            .map_err(|err| ScanError::Device(err.to_string()))?;
        Ok(bytes.into_inner())
    }
}

/// Logs every event and saves automatic captures.
struct ArtifactWriter {
    dir: PathBuf,
    saved: usize,
}

impl ArtifactWriter {
    fn save(&mut self, artifact: &Artifact, kind: &str) {
        self.saved += 1;
        let path = self.dir.join(format!("{kind}_{:03}.png", self.saved));
        match artifact.image.save(&path) {
            Ok(()) => info!(path = %path.display(), corrected = artifact.corrected, "artifact written"),
            Err(err) => warn!(path = %path.display(), %err, "could not write artifact"),
        }
    }
}

impl ScanObserver for ArtifactWriter {
    fn on_rectangle_detected(&mut self, confidence: u32) {
        tracing::debug!(confidence, "rectangle detected");
    }

    fn on_full_confidence(&mut self, artifact: Option<Arc<Artifact>>) {
        match artifact {
            Some(artifact) => self.save(&artifact, "auto"),
            None => info!("full confidence reached, capture produced nothing"),
        }
    }

    fn on_confidence_lost(&mut self) {
        tracing::trace!("confidence lost");
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"));
        if is_image {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    if !(args.fps > 0.0 && args.fps.is_finite()) {
        bail!("--fps must be a positive number");
    }

    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            ScannerConfig::from_json(&text)?
        }
        None => ScannerConfig::default(),
    };

    let frames = list_frames(&args.frames)?;
    let Some(first) = frames.first() else {
        bail!("no frames found in {}", args.frames.display());
    };
    let frame_size = image::image_dimensions(first).with_context(|| format!("reading {}", first.display()))?;

    let quads: Vec<Vec<Quad>> = serde_json::from_str(
        &fs::read_to_string(&args.quads).with_context(|| format!("reading {}", args.quads.display()))?,
    )
    .context("parsing quads")?;
    if quads.len() < frames.len() {
        warn!(frames = frames.len(), quads = quads.len(), "fewer quad lists than frames; the rest detect nothing");
    }
    fs::create_dir_all(&args.output)?;

    // --- 2. Scanner Initialization ---
    let replay = Arc::new(Replay {
        quads,
        index: AtomicUsize::new(0),
        current: Mutex::new(None),
    });
    let detector = Arc::new(ReplayDetector {
        replay: Arc::clone(&replay),
        frame_size,
    });
    let camera = Arc::new(ReplayCamera {
        replay: Arc::clone(&replay),
    });

    let (events, receiver) = event_channel();
    let (scanner, mut pipeline) = DocumentScanner::new(config, detector, camera, events)?;
    let writer = ArtifactWriter {
        dir: args.output.clone(),
        saved: 0,
    };
    let dispatcher = spawn_dispatcher(&Handle::current(), receiver, writer);

    // --- 3. Main Processing Loop ---
    scanner.start();
    let mut ticker = interval(Duration::from_secs_f64(1.0 / args.fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    for (index, path) in frames.iter().enumerate() {
        ticker.tick().await;
        let image = image::open(path)
            .with_context(|| format!("decoding {}", path.display()))?
            .to_rgba8();
        replay.advance(index, &image);

        if let Some(out) = pipeline.process(RawFrame::new(image, Instant::now())) {
            out.image.save(args.output.join(format!("frame_{index:05}.png")))?;
            if let Some(confidence) = out.confidence {
                tracing::debug!(index, confidence, "frame composited");
            }
        }
    }

    if args.manual_capture {
        match scanner.capture().await {
            CaptureOutcome::Captured(artifact) => {
                let path = args.output.join("manual.png");
                artifact.image.save(&path)?;
                info!(path = %path.display(), corrected = artifact.corrected, "manual capture written");
            }
            CaptureOutcome::Rejected(reason) => warn!(%reason, "manual capture rejected"),
            CaptureOutcome::Failed(err) => warn!(%err, "manual capture failed"),
        }
    }

    // --- 4. Shutdown ---
    // Let an automatic capture land before stopping, or its result is discarded.
    timeout(Duration::from_secs(30), async {
        while scanner.is_capturing() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("capture did not finish")?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    scanner.stop();
    drop(pipeline);
    dispatcher.await.context("event dispatcher")?;
    info!(frames = frames.len(), "replay finished");
    Ok(())
}
