//! Overlay rendering: segmentation masks, bounding boxes, labels, and the
//! water level gauge.
//!
//! `render` paints one detection result onto a frame and reports exactly
//! the label set it drew, so the caller can feed the same set to the
//! classifier without any staleness between what is shown and what is
//! measured.

use ab_glyph::FontArc;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
    draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use crate::detect::{DetectionResult, Prediction};
use crate::level::{classify, label_color, Marker};

/// Fill opacity for segmentation masks.
const MASK_ALPHA: f32 = 0.4;

/// Gauge geometry, fixed relative to the right frame edge.
const BAR_WIDTH: i32 = 40;
const BAR_HEIGHT: i32 = 200;
const BAR_MARGIN: i32 = 20;

const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const GAUGE_FRAME_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const GAUGE_BACKDROP_COLOR: Rgb<u8> = Rgb([50, 50, 50]);

/// Font and sizing used for label text. With no font configured the
/// renderer still draws label backgrounds using approximate metrics, which
/// keeps headless deployments and tests free of font assets.
#[derive(Clone, Default)]
pub struct OverlayStyle {
    pub font: Option<FontArc>,
    pub font_scale: f32,
}

impl OverlayStyle {
    pub fn with_font(font: FontArc) -> Self {
        Self {
            font: Some(font),
            font_scale: 16.0,
        }
    }

    fn scale(&self) -> f32 {
        if self.font_scale > 0.0 {
            self.font_scale
        } else {
            16.0
        }
    }

    fn measure(&self, text: &str) -> (i32, i32) {
        let scale = self.scale();
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(scale, font, text);
                (w as i32, h as i32)
            }
            // Fixed advance close enough for background sizing.
            None => ((text.len() as f32 * scale * 0.6) as i32, scale as i32),
        }
    }

    fn draw_text(&self, frame: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(frame, color, x, y, self.scale(), font, text);
        }
    }
}

/// Paint every prediction onto the frame and return the labels drawn, in
/// pass order. A `None` or empty result is a no-op returning no labels.
pub fn render(
    frame: &mut RgbImage,
    result: Option<&DetectionResult>,
    style: &OverlayStyle,
) -> Vec<String> {
    let Some(result) = result else {
        return Vec::new();
    };
    if result.is_empty() {
        return Vec::new();
    }

    // Masks are filled on a copy and blended back at MASK_ALPHA, so
    // overlapping instances do not compound to full opacity.
    let mut mask_layer = frame.clone();
    let mut drawn = Vec::with_capacity(result.predictions.len());

    for pred in &result.predictions {
        let color = label_color(&pred.class);
        match &pred.points {
            Some(points) if !points.is_empty() => {
                fill_polygon(&mut mask_layer, points, color);
            }
            _ => {
                let (x1, y1, x2, y2) = box_corners(pred);
                fill_rect(&mut mask_layer, x1, y1, x2, y2, color);
            }
        }
        drawn.push(pred.class.clone());
    }

    blend_into(frame, &mask_layer, MASK_ALPHA);

    // Outlines and labels go on at full alpha after the blend.
    for pred in &result.predictions {
        let color = label_color(&pred.class);
        let text = format!("{} {}%", pred.class, (pred.confidence * 100.0).round());
        match &pred.points {
            Some(points) if !points.is_empty() => {
                stroke_polygon(frame, points, color);
                let (cx, cy) = centroid(points);
                draw_label(frame, style, &text, color, cx as i32, cy as i32);
            }
            _ => {
                let (x1, y1, x2, y2) = box_corners(pred);
                stroke_rect(frame, x1, y1, x2, y2, color);
                // Anchor the label just above the box's top edge.
                let (_, text_h) = style.measure(&text);
                let anchor_x = (x1 + x2) / 2;
                draw_label(frame, style, &text, color, anchor_x, y1 - text_h / 2 - 6);
            }
        }
    }

    drawn
}

/// Draw the vertical four-section water level gauge at the right edge.
pub fn draw_level_indicator(frame: &mut RgbImage, level: u8, style: &OverlayStyle) {
    let width = frame.width() as i32;
    let height = frame.height() as i32;
    let bar_x = width - BAR_WIDTH - BAR_MARGIN;
    let bar_y = height / 2 - BAR_HEIGHT / 2;
    if bar_x < 0 || bar_y < 0 {
        return;
    }

    fill_rect(
        frame,
        bar_x,
        bar_y,
        bar_x + BAR_WIDTH,
        bar_y + BAR_HEIGHT,
        GAUGE_BACKDROP_COLOR,
    );
    stroke_rect(
        frame,
        bar_x,
        bar_y,
        bar_x + BAR_WIDTH,
        bar_y + BAR_HEIGHT,
        GAUGE_FRAME_COLOR,
    );

    // Section outlines, bottom-up in marker order.
    let section_height = BAR_HEIGHT / 4;
    for (i, marker) in Marker::ALL.into_iter().enumerate() {
        let section_y = bar_y + BAR_HEIGHT - (i as i32 + 1) * section_height;
        stroke_rect(
            frame,
            bar_x,
            section_y,
            bar_x + BAR_WIDTH,
            section_y + section_height,
            marker.color(),
        );
    }

    if level > 0 {
        let fill_height = BAR_HEIGHT * level as i32 / 100;
        let fill_y = bar_y + BAR_HEIGHT - fill_height;
        let fill_color = Marker::ALL
            .into_iter()
            .rev()
            .find(|marker| level >= marker.level())
            .map(Marker::color)
            .unwrap_or_else(|| Marker::Green.color());
        fill_rect(
            frame,
            bar_x + 2,
            fill_y,
            bar_x + BAR_WIDTH - 2,
            bar_y + BAR_HEIGHT - 2,
            fill_color,
        );
    }

    style.draw_text(
        frame,
        GAUGE_FRAME_COLOR,
        bar_x - 5,
        bar_y - (style.scale() as i32) - 6,
        &format!("{}%", level),
    );
}

/// Render a complete processed view: overlays plus gauge. Returns the level
/// derived from exactly the labels that were drawn.
pub fn render_with_indicator(
    frame: &mut RgbImage,
    result: Option<&DetectionResult>,
    style: &OverlayStyle,
) -> (Vec<String>, u8) {
    let labels = render(frame, result, style);
    let level = classify(&labels);
    draw_level_indicator(frame, level, style);
    (labels, level)
}

fn box_corners(pred: &Prediction) -> (i32, i32, i32, i32) {
    let x1 = (pred.x - pred.width / 2.0) as i32;
    let y1 = (pred.y - pred.height / 2.0) as i32;
    let x2 = (pred.x + pred.width / 2.0) as i32;
    let y2 = (pred.y + pred.height / 2.0) as i32;
    (x1, y1, x2, y2)
}

/// Arithmetic centroid of the polygon's vertices.
fn centroid(points: &[crate::detect::Point]) -> (f64, f64) {
    let n = points.len() as f64;
    let sum = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    (sum.0 / n, sum.1 / n)
}

fn fill_polygon(frame: &mut RgbImage, points: &[crate::detect::Point], color: Rgb<u8>) {
    let mut poly: Vec<imageproc::point::Point<i32>> = points
        .iter()
        .map(|p| imageproc::point::Point::new(p.x as i32, p.y as i32))
        .collect();
    // draw_polygon_mut rejects an explicitly closed ring.
    if poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    poly.dedup();
    if poly.len() < 3 {
        return;
    }
    draw_polygon_mut(frame, &poly, color);
}

fn stroke_polygon(frame: &mut RgbImage, points: &[crate::detect::Point], color: Rgb<u8>) {
    if points.len() < 2 {
        return;
    }
    for window in points.windows(2) {
        draw_line_segment_mut(
            frame,
            (window[0].x as f32, window[0].y as f32),
            (window[1].x as f32, window[1].y as f32),
            color,
        );
    }
    let first = points[0];
    let last = points[points.len() - 1];
    draw_line_segment_mut(
        frame,
        (last.x as f32, last.y as f32),
        (first.x as f32, first.y as f32),
        color,
    );
}

fn fill_rect(frame: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    let w = (x2 - x1).max(1) as u32;
    let h = (y2 - y1).max(1) as u32;
    draw_filled_rect_mut(frame, Rect::at(x1, y1).of_size(w, h), color);
}

fn stroke_rect(frame: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    let w = (x2 - x1).max(1) as u32;
    let h = (y2 - y1).max(1) as u32;
    draw_hollow_rect_mut(frame, Rect::at(x1, y1).of_size(w, h), color);
}

/// Label text on a filled background, centered horizontally on the anchor.
fn draw_label(
    frame: &mut RgbImage,
    style: &OverlayStyle,
    text: &str,
    bg_color: Rgb<u8>,
    anchor_x: i32,
    anchor_y: i32,
) {
    let (text_w, text_h) = style.measure(text);
    let label_x = anchor_x - text_w / 2;
    let label_y = anchor_y - text_h / 2;
    fill_rect(
        frame,
        label_x - 5,
        label_y - 5,
        label_x + text_w + 5,
        label_y + text_h + 5,
        bg_color,
    );
    style.draw_text(frame, TEXT_COLOR, label_x, label_y, text);
}

fn blend_into(base: &mut RgbImage, layer: &RgbImage, alpha: f32) {
    for (dst, src) in base.pixels_mut().zip(layer.pixels()) {
        if *dst != *src {
            for c in 0..3 {
                dst.0[c] =
                    (src.0[c] as f32 * alpha + dst.0[c] as f32 * (1.0 - alpha)).round() as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionResult, Point, Prediction};

    fn polygon_prediction(class: &str) -> Prediction {
        Prediction {
            class: class.to_string(),
            confidence: 0.88,
            x: 32.0,
            y: 32.0,
            width: 20.0,
            height: 20.0,
            points: Some(vec![
                Point { x: 22.0, y: 22.0 },
                Point { x: 42.0, y: 22.0 },
                Point { x: 42.0, y: 42.0 },
                Point { x: 22.0, y: 42.0 },
            ]),
        }
    }

    #[test]
    fn null_result_is_a_noop() {
        let mut frame = RgbImage::new(64, 64);
        let before = frame.clone();
        let drawn = render(&mut frame, None, &OverlayStyle::default());
        assert!(drawn.is_empty());
        assert_eq!(frame, before);
    }

    #[test]
    fn empty_result_is_a_noop() {
        let mut frame = RgbImage::new(64, 64);
        let before = frame.clone();
        let drawn = render(
            &mut frame,
            Some(&DetectionResult::default()),
            &OverlayStyle::default(),
        );
        assert!(drawn.is_empty());
        assert_eq!(frame, before);
    }

    #[test]
    fn returns_labels_in_pass_order() {
        let mut frame = RgbImage::new(128, 64);
        let result = DetectionResult {
            predictions: vec![polygon_prediction("green-marker"), {
                let mut p = polygon_prediction("red-marker");
                p.points = None;
                p.x = 96.0;
                p
            }],
            image: None,
        };
        let drawn = render(&mut frame, Some(&result), &OverlayStyle::default());
        assert_eq!(drawn, vec!["green-marker", "red-marker"]);
    }

    #[test]
    fn polygon_fill_changes_pixels_at_reduced_alpha() {
        let mut frame = RgbImage::new(128, 128);
        let result = DetectionResult {
            predictions: vec![Prediction {
                class: "green-marker".to_string(),
                confidence: 0.88,
                x: 60.0,
                y: 60.0,
                width: 100.0,
                height: 100.0,
                points: Some(vec![
                    Point { x: 10.0, y: 10.0 },
                    Point { x: 110.0, y: 10.0 },
                    Point { x: 110.0, y: 110.0 },
                    Point { x: 10.0, y: 110.0 },
                ]),
            }],
            image: None,
        };
        render(&mut frame, Some(&result), &OverlayStyle::default());
        // Interior pixel away from the outline and the centroid label strip:
        // 40% of pure green over black.
        let inside = frame.get_pixel(20, 20);
        assert_eq!(inside.0[1], 102);
        // Corner outside the polygon untouched.
        assert_eq!(frame.get_pixel(126, 126).0, [0, 0, 0]);
    }

    #[test]
    fn drawn_labels_feed_classifier_consistently() {
        let mut frame = RgbImage::new(640, 480);
        let result = DetectionResult {
            predictions: vec![polygon_prediction("green-marker")],
            image: None,
        };
        let (labels, level) =
            render_with_indicator(&mut frame, Some(&result), &OverlayStyle::default());
        assert_eq!(labels, vec!["green-marker"]);
        assert_eq!(level, 0);
    }

    #[test]
    fn indicator_fits_small_frames_without_panic() {
        let mut frame = RgbImage::new(32, 32);
        draw_level_indicator(&mut frame, 75, &OverlayStyle::default());
    }

    #[test]
    fn indicator_fill_tracks_level() {
        let mut empty = RgbImage::new(640, 480);
        let mut full = RgbImage::new(640, 480);
        draw_level_indicator(&mut empty, 0, &OverlayStyle::default());
        draw_level_indicator(&mut full, 100, &OverlayStyle::default());
        assert_ne!(empty, full);
        // Full gauge paints red inside the bar.
        let x = (640 - BAR_WIDTH - BAR_MARGIN + BAR_WIDTH / 2) as u32;
        let y = (480 / 2) as u32;
        assert_eq!(*full.get_pixel(x, y), Marker::Red.color());
    }
}
