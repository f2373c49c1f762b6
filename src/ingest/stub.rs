//! Synthetic frame source for tests and offline demo runs.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::FrameSource;

/// Produces flat gray frames of a fixed size, brightening slightly each
/// frame so consumers can tell frames apart. Optionally refuses to connect,
/// to exercise the capture loop's error path.
pub struct StubSource {
    width: u32,
    height: u32,
    counter: u8,
    connected: bool,
    deny_connect: bool,
}

impl StubSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            counter: 0,
            connected: false,
            deny_connect: false,
        }
    }

    /// A source whose `connect` always fails, like a camera in use elsewhere.
    pub fn unavailable() -> Self {
        Self {
            deny_connect: true,
            ..Self::new(64, 48)
        }
    }
}

impl FrameSource for StubSource {
    fn connect(&mut self) -> Result<()> {
        if self.deny_connect {
            return Err(anyhow!("camera unavailable"));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        if !self.connected {
            return Err(anyhow!("stub source not connected"));
        }
        self.counter = self.counter.wrapping_add(1);
        let shade = self.counter.wrapping_mul(8);
        Ok(RgbImage::from_pixel(
            self.width,
            self.height,
            Rgb([shade, shade, shade]),
        ))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        format!("stub camera {}x{}", self.width, self.height)
    }
}
