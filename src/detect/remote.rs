//! HTTP inference client for the external detection service.
//!
//! One call = downscale, JPEG-encode, submit, parse, rescale. The service
//! expects a base64 JPEG body with api key and thresholds as query
//! parameters, and answers with prediction JSON in the coordinate space of
//! the submitted image.

use anyhow::{Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

use super::{rescale_result, DetectionApi, DetectionResult};

/// Largest dimension submitted for inference. Bigger frames are downscaled
/// preserving aspect ratio and the returned geometry is scaled back up.
pub const MAX_INFER_DIMENSION: u32 = 640;

const JPEG_QUALITY: u8 = 85;

/// Configuration for one detection endpoint.
#[derive(Clone, Debug)]
pub struct RemoteDetectorConfig {
    /// Full model endpoint URL, e.g. `https://detect.example.com/flood-pixel/4`.
    pub url: String,
    pub api_key: String,
    /// Minimum confidence, percent (0-100).
    pub confidence: u8,
    /// Overlap threshold, percent (0-100).
    pub overlap: u8,
}

impl Default for RemoteDetectorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9001/flood-pixel/1".to_string(),
            api_key: String::new(),
            confidence: 40,
            overlap: 30,
        }
    }
}

pub struct RemoteDetector {
    config: RemoteDetectorConfig,
    agent: ureq::Agent,
}

impl RemoteDetector {
    pub fn new(config: RemoteDetectorConfig) -> Self {
        Self {
            config,
            agent: ureq::Agent::new(),
        }
    }
}

impl DetectionApi for RemoteDetector {
    fn infer(&self, frame: &RgbImage) -> Result<DetectionResult> {
        let (scale, encoded) = encode_for_inference(frame)?;
        let body = base64::engine::general_purpose::STANDARD.encode(&encoded);

        let response = self
            .agent
            .post(&self.config.url)
            .query("api_key", &self.config.api_key)
            .query("confidence", &self.config.confidence.to_string())
            .query("overlap", &self.config.overlap.to_string())
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&body)
            .context("submit frame to detection service")?;

        let result: DetectionResult = response
            .into_json()
            .context("parse detection service response")?;
        Ok(rescale_result(result, scale))
    }
}

/// Downscale to the inference cap and JPEG-encode. Returns the scale factor
/// that was applied (1.0 when no resize occurred) and the encoded bytes.
fn encode_for_inference(frame: &RgbImage) -> Result<(f64, Vec<u8>)> {
    let (width, height) = frame.dimensions();
    let largest = width.max(height);

    let (scale, submitted) = if largest > MAX_INFER_DIMENSION {
        let scale = MAX_INFER_DIMENSION as f64 / largest as f64;
        let new_w = ((width as f64) * scale).round().max(1.0) as u32;
        let new_h = ((height as f64) * scale).round().max(1.0) as u32;
        let resized = DynamicImage::ImageRgb8(frame.clone())
            .resize_exact(new_w, new_h, FilterType::Triangle)
            .into_rgb8();
        (scale, resized)
    } else {
        (1.0, frame.clone())
    };

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    submitted
        .write_with_encoder(encoder)
        .context("encode frame as jpeg")?;
    Ok((scale, bytes))
}
