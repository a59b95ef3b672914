//! Rendering post-processed results onto the frame they belong to.

use image::{Rgb, RgbImage};

use crate::detection::{BoundingBox, Detection};
use crate::segmentation::Mask;

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([230, 25, 75]),
    Rgb([60, 180, 75]),
    Rgb([255, 225, 25]),
    Rgb([0, 130, 200]),
    Rgb([245, 130, 48]),
    Rgb([145, 30, 180]),
    Rgb([70, 240, 240]),
    Rgb([240, 50, 230]),
];

/// Outline colour used for `class_id`.
pub fn class_color(class_id: u32) -> Rgb<u8> {
    PALETTE[class_id as usize % PALETTE.len()]
}

/// Fills `[x0, x1) x [y0, y1)` clipped to the frame.
fn fill(frame: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    for y in y0.max(0)..y1.min(h) {
        for x in x0.max(0)..x1.min(w) {
            frame.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn outline(frame: &mut RgbImage, bbox: &BoundingBox, thickness: u32, color: Rgb<u8>) {
    let t = thickness.max(1) as i64;
    let (x0, y0) = (bbox.xmin as i64, bbox.ymin as i64);
    let (x1, y1) = (bbox.xmax as i64, bbox.ymax as i64);
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    fill(frame, x0, y0, x1, (y0 + t).min(y1), color);
    fill(frame, x0, (y1 - t).max(y0), x1, y1, color);
    fill(frame, x0, y0, (x0 + t).min(x1), y1, color);
    fill(frame, (x1 - t).max(x0), y0, x1, y1, color);
}

/// Draws every detection as a rectangle outline, `thickness` pixels wide,
/// inside its box. Parts outside the frame are clipped.
pub fn draw_detections(frame: &mut RgbImage, detections: &[Detection], thickness: u32) {
    for detection in detections {
        outline(frame, &detection.bbox, thickness, class_color(detection.class_id));
    }
}

/// Tints the frame with `color` wherever `mask` is set.
///
/// The mask is stretched to the frame with nearest-neighbour sampling.
/// `alpha` is the weight of `color`, clamped to `[0, 1]`.
pub fn blend_mask(frame: &mut RgbImage, mask: &Mask, color: Rgb<u8>, alpha: f32) {
    if mask.is_empty() {
        return;
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let (w, h) = frame.dimensions();
    for (x, y, pixel) in frame.enumerate_pixels_mut() {
        let mx = (x as u64 * mask.width as u64 / w as u64) as u32;
        let my = (y as u64 * mask.height as u64 / h as u64) as u32;
        if !mask.get(mx, my) {
            continue;
        }
        for (channel, tint) in pixel.0.iter_mut().zip(color.0) {
            let mixed = *channel as f32 * (1.0 - alpha) + tint as f32 * alpha;
            *channel = mixed.round() as u8;
        }
    }
}
