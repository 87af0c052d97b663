//! Diagnostic images
//!
//! Writes the frame annotated with the calibrated center, the digit crop and
//! the labeled tick, together with the crop handed to OCR.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::debug;

use crate::capture::Frame;
use crate::vision::{BoundingBox, Calibration, DigitSelection};

const CENTER_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
const CROP_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TICK_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const SPLIT_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

fn draw_box(image: &mut RgbImage, b: BoundingBox, color: Rgb<u8>) {
    if b.width == 0 || b.height == 0 {
        return;
    }
    draw_hollow_rect_mut(
        image,
        Rect::at(b.x as i32, b.y as i32).of_size(b.width, b.height),
        color,
    );
}

fn draw_column(image: &mut RgbImage, x: i32, color: Rgb<u8>) {
    let bottom = image.height() as f32;
    draw_line_segment_mut(image, (x as f32, 0.0), (x as f32, bottom), color);
}

/// Frame with the reading's geometry drawn over it
pub fn annotate(frame: &Frame, calibration: &Calibration, digits: &DigitSelection) -> RgbImage {
    let mut image = frame.color().clone();
    let right = image.width() as f32;

    draw_line_segment_mut(
        &mut image,
        (0.0, calibration.split_y as f32),
        (right, calibration.split_y as f32),
        SPLIT_COLOR,
    );
    draw_column(&mut image, calibration.true_mid_x, CENTER_COLOR);
    draw_column(&mut image, digits.tick_x, TICK_COLOR);
    draw_box(&mut image, digits.padded, CROP_COLOR);
    draw_box(&mut image, digits.digit_box, LABEL_COLOR);
    image
}

/// Write `<name>_annotated.png` and `<name>_digits.png` into `dir`
pub fn write_debug_images(
    dir: &Path,
    name: &str,
    frame: &Frame,
    calibration: &Calibration,
    digits: &DigitSelection,
    crop: &RgbImage,
) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create debug directory {:?}", dir))?;

    let annotated_path = dir.join(format!("{}_annotated.png", name));
    annotate(frame, calibration, digits)
        .save(&annotated_path)
        .with_context(|| format!("Failed to write {:?}", annotated_path))?;

    let crop_path = dir.join(format!("{}_digits.png", name));
    crop.save(&crop_path)
        .with_context(|| format!("Failed to write {:?}", crop_path))?;

    debug!("Wrote debug images to {:?}", dir);
    Ok(())
}
