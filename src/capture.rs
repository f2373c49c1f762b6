//! Local capture loop (webcam mode).
//!
//! Owns a camera source and a continuous redraw cycle. Every tick copies
//! the newest camera frame and repaints the most recently completed
//! detection result, so overlays persist between inference completions
//! instead of flickering empty. On a much slower cadence (one call per
//! throttle interval, never more than one outstanding) a worker thread
//! ships the frame to the detection backend; completions that land after
//! `stop()` are discarded without touching any state.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::detect::{DetectionApi, DetectionResult};
use crate::ingest::FrameSource;
use crate::overlay::{render_with_indicator, OverlayStyle};

/// Minimum spacing between inference launches (at most 5 calls/second).
pub const INFER_THROTTLE: Duration = Duration::from_millis(200);

/// Capture loop lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Streaming,
    /// Camera denied or stream failed; `start()` retries from here.
    Error(String),
    Stopped,
}

/// One rendered tick: the processed frame, the labels drawn on it, and the
/// level derived from exactly those labels.
pub struct TickView {
    pub frame: RgbImage,
    pub labels: Vec<String>,
    pub level: u8,
}

/// State shared with the inference worker thread.
struct InferShared {
    /// Cleared by `stop()`; checked by the worker before every mutation.
    live: AtomicBool,
    in_flight: AtomicBool,
    /// Most recently completed result; replaced wholesale per completion.
    last_result: Mutex<Option<DetectionResult>>,
    /// Bumps once per stored completion (observability, tests).
    completions: AtomicU64,
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    detector: Arc<dyn DetectionApi + Sync>,
    style: OverlayStyle,
    state: CaptureState,
    shared: Arc<InferShared>,
    last_launch: Option<Instant>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Arc<dyn DetectionApi + Sync>,
        style: OverlayStyle,
    ) -> Self {
        Self {
            source,
            detector,
            style,
            state: CaptureState::Idle,
            shared: Arc::new(InferShared {
                live: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                last_result: Mutex::new(None),
                completions: AtomicU64::new(0),
            }),
            last_launch: None,
            worker: None,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// Completed inference count since start.
    pub fn completions(&self) -> u64 {
        self.shared.completions.load(Ordering::Acquire)
    }

    /// Acquire the camera and enter `Streaming`. Denial lands in `Error`
    /// with a user-facing message; calling `start()` again retries.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            CaptureState::Idle | CaptureState::Error(_) => {}
            CaptureState::Stopped => {
                self.state = CaptureState::Idle;
            }
            CaptureState::Starting | CaptureState::Streaming => return Ok(()),
        }
        self.state = CaptureState::Starting;
        if let Err(e) = self.source.connect() {
            let message = format!("camera unavailable ({}): {}", self.source.describe(), e);
            log::warn!("{}", message);
            self.state = CaptureState::Error(message.clone());
            return Err(e.context(message));
        }
        self.shared.live.store(true, Ordering::Release);
        self.state = CaptureState::Streaming;
        log::info!("capture streaming from {}", self.source.describe());
        Ok(())
    }

    /// One redraw tick. Pulls the newest frame, repaints the last completed
    /// result, and launches a throttled inference if none is outstanding.
    /// A failed tick leaves the loop in `Streaming`; the next tick retries.
    pub fn tick(&mut self) -> Result<TickView> {
        if self.state != CaptureState::Streaming {
            anyhow::bail!("capture loop is not streaming (state: {:?})", self.state);
        }

        let mut frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("frame read failed, reconnecting: {}", e);
                // Per-tick reconnect attempt; the loop itself stays up.
                if let Err(re) = self.source.connect() {
                    log::warn!("reconnect failed: {}", re);
                }
                return Err(e.context("read camera frame"));
            }
        };

        self.reap_worker();
        self.maybe_launch_inference(&frame);

        let result = self
            .shared
            .last_result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let (labels, level) = render_with_indicator(&mut frame, result.as_ref(), &self.style);
        Ok(TickView {
            frame,
            labels,
            level,
        })
    }

    /// Launch an inference worker when the throttle interval has elapsed
    /// and no call is outstanding. Skipped ticks are dropped, not queued.
    fn maybe_launch_inference(&mut self, frame: &RgbImage) {
        let throttled = self
            .last_launch
            .map(|at| at.elapsed() < INFER_THROTTLE)
            .unwrap_or(false);
        if throttled || self.shared.in_flight.load(Ordering::Acquire) {
            return;
        }

        self.shared.in_flight.store(true, Ordering::Release);
        self.last_launch = Some(Instant::now());

        let detector = Arc::clone(&self.detector);
        let shared = Arc::clone(&self.shared);
        let frame = frame.clone();
        self.worker = Some(std::thread::spawn(move || {
            let outcome = detector.infer(&frame);
            // Completions after stop() must not mutate anything.
            if shared.live.load(Ordering::Acquire) {
                match outcome {
                    Ok(result) => {
                        let mut slot = shared
                            .last_result
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        *slot = Some(result);
                        drop(slot);
                        shared.completions.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(e) => {
                        log::warn!("inference call failed: {}", e);
                    }
                }
            }
            shared.in_flight.store(false, Ordering::Release);
        }));
    }

    /// Join the worker once it has settled, so handles do not accumulate.
    fn reap_worker(&mut self) {
        if self.shared.in_flight.load(Ordering::Acquire) {
            return;
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Tear down: suppress any in-flight completion, join the worker, and
    /// release the camera. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.state == CaptureState::Stopped {
            return;
        }
        self.shared.live.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.source.disconnect();
        self.state = CaptureState::Stopped;
        log::info!("capture stopped ({})", self.source.describe());
    }

    pub fn is_source_healthy(&self) -> bool {
        self.source.is_healthy()
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
