//! Detection data model and backend seam.
//!
//! Predictions come back from an external instance-segmentation service in
//! the coordinate space of whatever image was submitted. `rescale_result`
//! restores original-resolution coordinates after a downscaled submission;
//! it always produces a new value so a result retained by one consumer is
//! never mutated under another.

pub mod remote;
pub mod stub;

pub use remote::{RemoteDetector, RemoteDetectorConfig, MAX_INFER_DIMENSION};
pub use stub::StubDetector;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// One vertex of a segmentation polygon, in source-image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// One detected instance.
///
/// `x`/`y` are the bounding-box center. `points`, when present, is the
/// ordered polygon outline produced by segmentation models; box-only models
/// omit it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
}

/// Dimensions of the image the predictions were computed against.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ImageDims {
    pub width: u32,
    pub height: u32,
}

/// Full response from one inference call.
///
/// An empty prediction list is a valid "nothing detected" result, not an
/// error.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageDims>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Class labels of every prediction, in order.
    pub fn labels(&self) -> Vec<String> {
        self.predictions.iter().map(|p| p.class.clone()).collect()
    }
}

/// Detection backend seam.
///
/// Implementations submit a frame to whatever capability does the actual
/// inference and return predictions in the frame's own coordinate space.
/// Callers own throttling: at most one call in flight, minimum interval
/// between calls.
pub trait DetectionApi: Send {
    fn infer(&self, frame: &RgbImage) -> Result<DetectionResult>;
}

/// Restore original-resolution coordinates after a downscaled submission.
///
/// Every geometry field of every prediction, nested polygon points
/// included, is divided by `scale`. A `scale` of exactly 1.0 is an identity
/// pass-through of the input.
pub fn rescale_result(result: DetectionResult, scale: f64) -> DetectionResult {
    if scale == 1.0 {
        return result;
    }
    let predictions = result
        .predictions
        .into_iter()
        .map(|pred| Prediction {
            class: pred.class,
            confidence: pred.confidence,
            x: pred.x / scale,
            y: pred.y / scale,
            width: pred.width / scale,
            height: pred.height / scale,
            points: pred.points.map(|points| {
                points
                    .into_iter()
                    .map(|p| Point {
                        x: p.x / scale,
                        y: p.y / scale,
                    })
                    .collect()
            }),
        })
        .collect();
    DetectionResult {
        predictions,
        image: result.image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> DetectionResult {
        DetectionResult {
            predictions: vec![Prediction {
                class: "green-marker".to_string(),
                confidence: 0.92,
                x: 160.0,
                y: 120.0,
                width: 40.0,
                height: 60.0,
                points: Some(vec![
                    Point { x: 140.0, y: 90.0 },
                    Point { x: 180.0, y: 90.0 },
                    Point { x: 180.0, y: 150.0 },
                    Point { x: 140.0, y: 150.0 },
                ]),
            }],
            image: Some(ImageDims {
                width: 320,
                height: 240,
            }),
        }
    }

    #[test]
    fn rescale_restores_original_coordinates() {
        let scale = 0.5;
        let rescaled = rescale_result(sample_result(), scale);
        let pred = &rescaled.predictions[0];
        assert!((pred.x - 320.0).abs() < 1e-9);
        assert!((pred.y - 240.0).abs() < 1e-9);
        assert!((pred.width - 80.0).abs() < 1e-9);
        assert!((pred.height - 120.0).abs() < 1e-9);
        let points = pred.points.as_ref().unwrap();
        assert!((points[0].x - 280.0).abs() < 1e-9);
        assert!((points[2].y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn rescale_at_unit_scale_is_identity() {
        let original = sample_result();
        let rescaled = rescale_result(original.clone(), 1.0);
        let a = &original.predictions[0];
        let b = &rescaled.predictions[0];
        assert_eq!(a.x, b.x);
        assert_eq!(a.points, b.points);
    }

    #[test]
    fn rescale_handles_boxes_without_points() {
        let mut result = sample_result();
        result.predictions[0].points = None;
        let rescaled = rescale_result(result, 0.25);
        assert!(rescaled.predictions[0].points.is_none());
        assert!((rescaled.predictions[0].x - 640.0).abs() < 1e-9);
    }

    #[test]
    fn empty_result_deserializes_as_nothing_detected() {
        let result: DetectionResult = serde_json::from_str("{}").unwrap();
        assert!(result.is_empty());
        assert!(result.image.is_none());
    }

    #[test]
    fn parses_backend_response_shape() {
        let json = r#"{
            "predictions": [
                {"class": "red-marker", "confidence": 0.71,
                 "x": 10.0, "y": 20.0, "width": 4.0, "height": 8.0,
                 "points": [{"x": 8.0, "y": 16.0}, {"x": 12.0, "y": 24.0}]}
            ],
            "image": {"width": 640, "height": 480}
        }"#;
        let result: DetectionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.labels(), vec!["red-marker"]);
        assert_eq!(result.image.unwrap().width, 640);
    }
}
