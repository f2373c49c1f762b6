//! floodwatchd - flood monitoring daemon
//!
//! Webcam mode:
//! 1. Connects to a local HTTP camera (MJPEG stream or snapshot URL)
//! 2. Submits frames to the remote inference service, throttled
//! 3. Draws detection overlays and the water level indicator
//! 4. Publishes the annotated frame to the output path
//!
//! CCTV mode:
//! 1. Polls a monitoring station for pre-rendered frames and status
//! 2. Keeps a viewer-presence heartbeat alive
//! 3. Publishes each fetched frame to the output path

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use floodwatch::overlay::OverlayStyle;
use floodwatch::poller::{FeedPoller, FrameHandle, FrameSink};
use floodwatch::{
    CaptureLoop, FloodwatchConfig, HttpCameraSource, HttpStation, Mode, RemoteDetector,
};

#[derive(Parser, Debug)]
#[command(name = "floodwatchd", version, about = "Flood marker monitoring daemon")]
struct Args {
    /// Operating mode; overrides the config file.
    #[arg(long, value_parser = ["webcam", "cctv"])]
    mode: Option<String>,

    /// Where annotated/fetched frames are written (atomic replace).
    #[arg(long, env = "FLOODWATCH_OUTPUT", default_value = "floodwatch_latest.jpg")]
    output: PathBuf,

    /// Use the canned offline detector instead of the inference service
    /// (webcam mode demo runs without network access).
    #[arg(long)]
    stub_detect: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(mode) = &args.mode {
        std::env::set_var("FLOODWATCH_MODE", mode);
    }
    let cfg = FloodwatchConfig::load()?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_in_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        stop_in_handler.store(true, Ordering::Release);
    })
    .context("install signal handler")?;

    log::info!("floodwatchd {} starting in {:?} mode", env!("CARGO_PKG_VERSION"), cfg.mode);

    match cfg.mode {
        Mode::Webcam => run_webcam(&cfg, &args.output, args.stub_detect, &stop),
        Mode::Cctv => run_cctv(&cfg, &args.output, &stop),
    }
}

fn run_webcam(
    cfg: &FloodwatchConfig,
    output: &Path,
    stub_detect: bool,
    stop: &AtomicBool,
) -> Result<()> {
    let source = HttpCameraSource::new(cfg.camera.clone())?;
    let detector: Arc<dyn floodwatch::DetectionApi + Sync> = if stub_detect {
        log::info!("using canned offline detector");
        Arc::new(floodwatch::StubDetector::new(["green", "yellow"]))
    } else {
        Arc::new(RemoteDetector::new(cfg.detect.clone()))
    };
    let style = overlay_style(cfg)?;

    let mut capture = CaptureLoop::new(Box::new(source), detector, style);
    capture.start()?;
    log::info!("camera connected: {}", cfg.camera.url);

    let mut last_health_log = Instant::now();
    let mut frame_count = 0u64;
    while !stop.load(Ordering::Acquire) {
        match capture.tick() {
            Ok(view) => {
                frame_count += 1;
                publish_jpeg(output, &view.frame)?;
                if last_health_log.elapsed() >= Duration::from_secs(5) {
                    log::info!(
                        "level={} labels={:?} frames={}",
                        view.level,
                        view.labels,
                        frame_count
                    );
                    last_health_log = Instant::now();
                }
            }
            Err(e) => {
                log::warn!("capture tick failed: {}", e);
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }

    capture.stop();
    log::info!("webcam loop stopped after {} frames", frame_count);
    Ok(())
}

fn run_cctv(cfg: &FloodwatchConfig, output: &Path, stop: &AtomicBool) -> Result<()> {
    let station = Arc::new(HttpStation::new(&cfg.station_url));
    let mut poller = FeedPoller::new(station, cfg.poller.clone());
    poller.start(Box::new(FileSink {
        path: output.to_path_buf(),
    }))?;
    log::info!("polling station {}", cfg.station_url);

    let mut last_health_log = Instant::now();
    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(200));
        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let status = poller.status();
            match &status.message {
                Some(message) => log::info!("station: {}", message),
                None => log::info!(
                    "station connected={} level={} alarm={} viewers={}",
                    status.connected,
                    status.water_level,
                    status.alarm_active,
                    status.viewer_count
                ),
            }
            last_health_log = Instant::now();
        }
    }

    poller.shutdown();
    let ledger = poller.ledger();
    if ledger.leaked() > 0 {
        log::warn!("{} frame handles leaked during this session", ledger.leaked());
    }
    log::info!("cctv loop stopped, {} frames released", ledger.released());
    Ok(())
}

fn overlay_style(cfg: &FloodwatchConfig) -> Result<OverlayStyle> {
    let font = match &cfg.overlay.font_path {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("read overlay font {}", path))?;
            Some(
                ab_glyph::FontArc::try_from_vec(bytes)
                    .map_err(|e| anyhow!("invalid overlay font {}: {}", path, e))?,
            )
        }
        None => {
            log::warn!("no overlay font configured; detection labels will be omitted");
            None
        }
    };
    Ok(OverlayStyle {
        font,
        font_scale: cfg.overlay.font_scale,
    })
}

/// Replace the output file atomically so readers never see a torn frame.
fn publish_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

fn publish_jpeg(path: &Path, frame: &image::RgbImage) -> Result<()> {
    let mut bytes = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 85);
    frame
        .write_with_encoder(encoder)
        .context("encode output jpeg")?;
    publish_bytes(path, &bytes)
}

struct FileSink {
    path: PathBuf,
}

impl FrameSink for FileSink {
    fn present(&mut self, frame: &FrameHandle) -> Result<()> {
        publish_bytes(&self.path, frame.bytes())
    }
}
