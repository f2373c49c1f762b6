//! Water level derivation from visible reference markers.
//!
//! Four color-coded marker posts are mounted low-to-high on the gauge wall.
//! Rising water occludes them bottom-up, so the water level is read off
//! which markers the detector can still see: every marker visible means
//! dry (0%), every marker submerged means 100%.

use image::Rgb;

/// Reference markers ordered low-to-high on the gauge (green sits lowest).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    Green,
    Yellow,
    Orange,
    Red,
}

impl Marker {
    pub const ALL: [Marker; 4] = [Marker::Green, Marker::Yellow, Marker::Orange, Marker::Red];

    /// Substring matched case-insensitively against detected class labels.
    pub fn name(self) -> &'static str {
        match self {
            Marker::Green => "green",
            Marker::Yellow => "yellow",
            Marker::Orange => "orange",
            Marker::Red => "red",
        }
    }

    /// Overlay color for this marker's detections.
    pub fn color(self) -> Rgb<u8> {
        match self {
            Marker::Green => Rgb([0, 255, 0]),
            Marker::Yellow => Rgb([255, 255, 0]),
            Marker::Orange => Rgb([255, 165, 0]),
            Marker::Red => Rgb([255, 0, 0]),
        }
    }

    /// Level reading reached once this marker and everything below it are gone.
    pub fn level(self) -> u8 {
        match self {
            Marker::Green => 25,
            Marker::Yellow => 50,
            Marker::Orange => 75,
            Marker::Red => 100,
        }
    }
}

/// Overlay color for labels that match no marker.
pub const DEFAULT_LABEL_COLOR: Rgb<u8> = Rgb([0, 100, 255]);

/// First marker whose name appears in the label (case-insensitive), if any.
pub fn marker_for_label(label: &str) -> Option<Marker> {
    let lower = label.to_lowercase();
    Marker::ALL
        .into_iter()
        .find(|marker| lower.contains(marker.name()))
}

/// Overlay color for an arbitrary detected label.
pub fn label_color(label: &str) -> Rgb<u8> {
    marker_for_label(label)
        .map(Marker::color)
        .unwrap_or(DEFAULT_LABEL_COLOR)
}

/// Derive the water level from the set of labels detected in one pass.
///
/// A marker is visible if any label contains its name as a case-insensitive
/// substring. Each tier only engages once its own marker and every marker
/// below it are invisible, so an isolated gap higher up (say red missing
/// while green/yellow/orange are still in frame) reads 0, not partial
/// credit. The result is always one of {0, 25, 50, 75, 100}; an empty label
/// set reads 100.
pub fn classify<S: AsRef<str>>(labels: &[S]) -> u8 {
    let mut visible = [false; 4];
    for label in labels {
        let lower = label.as_ref().to_lowercase();
        for (slot, marker) in visible.iter_mut().zip(Marker::ALL) {
            if lower.contains(marker.name()) {
                *slot = true;
            }
        }
    }
    let [green, yellow, orange, red] = visible;

    let mut level = 0;
    if !green {
        level = 25;
    }
    if !yellow && !green {
        level = 50;
    }
    if !orange && !yellow && !green {
        level = 75;
    }
    if !red && !orange && !yellow && !green {
        level = 100;
    }
    level
}
