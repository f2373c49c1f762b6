//! Camera frame sources for webcam mode.
//!
//! A source owns exclusive access to one camera and hands decoded RGB
//! frames to the capture loop. Sources:
//! - HTTP cameras (multipart MJPEG streams or single-JPEG snapshot URLs)
//! - Stub source (testing, offline demos)

pub mod http;
pub mod stub;

pub use http::{HttpCameraSource, HttpCameraConfig};
pub use stub::StubSource;

use anyhow::Result;
use image::RgbImage;
use std::time::Duration;

/// One camera feed. `connect` acquires the device or stream; `next_frame`
/// blocks until a frame is available. Implementations must release their
/// underlying stream on drop.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Release the underlying device/stream. Idempotent; `connect` may be
    /// called again afterwards.
    fn disconnect(&mut self);

    fn next_frame(&mut self) -> Result<RgbImage>;

    /// False once frames have stopped arriving at a plausible rate.
    fn is_healthy(&self) -> bool;

    /// Human-readable identity for log lines and error messages.
    fn describe(&self) -> String;
}

/// Minimum spacing between frames at the requested rate.
pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// How long a source may go without frames before it reads as unhealthy.
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
