//! Offline detection backend for tests and demo runs.

use anyhow::Result;
use image::RgbImage;

use super::{DetectionApi, DetectionResult, Point, Prediction};

/// Returns the same canned predictions on every call. With no labels
/// configured it reports "nothing detected".
pub struct StubDetector {
    labels: Vec<String>,
}

impl StubDetector {
    pub fn new<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self { labels: Vec::new() }
    }
}

impl DetectionApi for StubDetector {
    fn infer(&self, frame: &RgbImage) -> Result<DetectionResult> {
        let (width, height) = frame.dimensions();
        let count = self.labels.len().max(1) as f64;
        let predictions = self
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                // Spread boxes across the frame so overlays do not pile up.
                let cx = (i as f64 + 0.5) / count * width as f64;
                let cy = height as f64 / 2.0;
                let w = width as f64 / (count * 2.0);
                let h = height as f64 / 4.0;
                Prediction {
                    class: label.clone(),
                    confidence: 0.9,
                    x: cx,
                    y: cy,
                    width: w,
                    height: h,
                    points: Some(vec![
                        Point { x: cx - w / 2.0, y: cy - h / 2.0 },
                        Point { x: cx + w / 2.0, y: cy - h / 2.0 },
                        Point { x: cx + w / 2.0, y: cy + h / 2.0 },
                        Point { x: cx - w / 2.0, y: cy + h / 2.0 },
                    ]),
                }
            })
            .collect();
        Ok(DetectionResult {
            predictions,
            image: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_reports_configured_labels() {
        let stub = StubDetector::new(["green-marker", "red-marker"]);
        let frame = RgbImage::new(640, 480);
        let result = stub.infer(&frame).unwrap();
        assert_eq!(result.labels(), vec!["green-marker", "red-marker"]);
    }

    #[test]
    fn empty_stub_detects_nothing() {
        let stub = StubDetector::empty();
        let result = stub.infer(&RgbImage::new(64, 64)).unwrap();
        assert!(result.is_empty());
    }
}
