//! Digit box selection and tick association
//!
//! Picks the numeral label nearest the frame's horizontal center, pads it into
//! a crop for OCR and finds the tick the label belongs to. The offset of that
//! tick from the calibrated center gives the fractional part of the reading.

use serde::Serialize;
use tracing::debug;

use super::calibrate::Calibration;
use super::lines::LineSegment;
use super::BoundingBox;
use crate::config::SelectionSettings;
use crate::error::{DialError, DialResult};

/// Chosen label, its crop and the associated tick
#[derive(Debug, Clone, Serialize)]
pub struct DigitSelection {
    pub digit_box: BoundingBox,
    /// Crop region handed to OCR
    pub padded: BoundingBox,
    pub tick: LineSegment,
    /// Column of the labeled tick
    pub tick_x: i32,
    /// Pixels between the calibrated center and the labeled tick
    pub pix_frac: i32,
    /// `pix_frac` in scale units
    pub dec_frac: f64,
}

/// Box nearest `mid_x` among those ending above `split_y`. Earlier boxes win
/// ties.
pub fn select_digit_box(boxes: &[BoundingBox], mid_x: i32, split_y: i32) -> DialResult<BoundingBox> {
    let mut best: Option<(BoundingBox, i32)> = None;
    for b in boxes {
        if (b.bottom() as i64) >= split_y as i64 {
            continue;
        }
        let dist = (mid_x - b.center_x() as i32).abs();
        match best {
            Some((_, d)) if dist >= d => {}
            _ => best = Some((*b, dist)),
        }
    }

    best.map(|(b, _)| b).ok_or(DialError::NoDigitBox)
}

/// Grow the digit box into the OCR crop, bounded by the frame
pub fn pad_box(b: BoundingBox, frame_width: u32, frame_height: u32, settings: &SelectionSettings) -> BoundingBox {
    let x = b.x.saturating_sub(settings.pad_x);
    let y = b.y.saturating_sub(settings.pad_top);
    let w = (b.width + 2 * settings.pad_x).min(frame_width);
    let h = (b.height + settings.pad_top + settings.pad_bottom).min(frame_height);

    BoundingBox::clipped(
        x as i64,
        y as i64,
        x as i64 + w as i64,
        y as i64 + h as i64,
        frame_width,
        frame_height,
    )
    .unwrap_or(b)
}

/// Tick under the label: the candidate nearest `cmp_x` whose top lies between
/// the label's bottom and the scale boundary. Returns the segment and its
/// column, replaced by the crop's center when it falls outside the crop.
pub fn associate_tick(
    segments: &[LineSegment],
    cmp_x: i32,
    bot_y: i32,
    split_y: i32,
    padded: BoundingBox,
) -> Option<(LineSegment, i32)> {
    let mut tick = *segments.first()?;
    let cmp = cmp_x as f32;
    for l in segments {
        if (cmp - l.x1).abs() < (cmp - tick.x1).abs() && l.y1 > bot_y as f32 && l.y1 < split_y as f32 {
            tick = *l;
        }
    }

    let mut tick_x = tick.x1 as i32;
    if tick_x > padded.right() as i32 || tick_x < padded.x as i32 {
        debug!("Tick x={} outside crop, using crop center", tick_x);
        tick_x = padded.center_x() as i32;
    }
    Some((tick, tick_x))
}

/// Select the digit box and derive the fractional offset
pub fn select_digits(
    boxes: &[BoundingBox],
    segments: &[LineSegment],
    calibration: &Calibration,
    frame_width: u32,
    frame_height: u32,
    settings: &SelectionSettings,
) -> DialResult<DigitSelection> {
    let mid_x = (frame_width / 2) as i32;
    let digit_box = select_digit_box(boxes, mid_x, calibration.split_y)?;
    let padded = pad_box(digit_box, frame_width, frame_height, settings);

    let (tick, tick_x) = associate_tick(
        segments,
        digit_box.center_x() as i32,
        digit_box.bottom() as i32,
        calibration.split_y,
        padded,
    )
    .ok_or(DialError::NoTickCandidates)?;

    let pix_frac = calibration.true_mid_x - tick_x;
    let dec_frac = pix_frac as f64 / calibration.pixel_ratio * 0.01;

    debug!(
        "Digit box {:?}, crop {:?}, tick x={}, pix_frac={}, dec_frac={}",
        digit_box, padded, tick_x, pix_frac, dec_frac
    );

    Ok(DigitSelection {
        digit_box,
        padded,
        tick,
        tick_x,
        pix_frac,
        dec_frac,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(x: f32, y1: f32, y2: f32) -> LineSegment {
        LineSegment::new(x, y1, x, y2)
    }

    fn calibration() -> Calibration {
        let t = seg(200.0, 170.0, 230.0);
        Calibration {
            left_tick: t,
            right_tick: t,
            central_tick: t,
            pixel_ratio: 50.0,
            split_y: 170,
            true_mid_x: 200,
            row_y: 180,
            tick_xs: vec![100, 150, 200, 250, 300],
        }
    }

    fn segments() -> Vec<LineSegment> {
        vec![
            seg(150.0, 180.0, 220.0),
            seg(250.0, 180.0, 220.0),
            seg(200.0, 170.0, 230.0),
            seg(100.0, 180.0, 220.0),
            seg(300.0, 180.0, 220.0),
            seg(195.0, 165.0, 195.0),
        ]
    }

    #[test]
    fn test_select_nearest_box_above_split() {
        let boxes = vec![
            BoundingBox::new(10, 10, 40, 40),
            // Nearest, but reaches below the split
            BoundingBox::new(180, 150, 40, 40),
            BoundingBox::new(170, 100, 40, 50),
            // Same distance as the previous box
            BoundingBox::new(190, 20, 40, 50),
        ];
        let b = select_digit_box(&boxes, 200, 170).unwrap();
        assert_eq!(b, BoundingBox::new(170, 100, 40, 50));
    }

    #[test]
    fn test_bottom_on_split_rejected() {
        let boxes = vec![BoundingBox::new(180, 120, 40, 50)];
        assert!(matches!(
            select_digit_box(&boxes, 200, 170),
            Err(DialError::NoDigitBox)
        ));
    }

    #[test]
    fn test_pad_box() {
        let settings = SelectionSettings::default();
        let b = BoundingBox::new(180, 100, 40, 50);
        assert_eq!(pad_box(b, 400, 400, &settings), BoundingBox::new(80, 50, 240, 200));

        // Near the corner the crop is bounded by the frame
        let b = BoundingBox::new(20, 10, 40, 30);
        assert_eq!(pad_box(b, 400, 150, &settings), BoundingBox::new(0, 0, 240, 150));
    }

    #[test]
    fn test_associate_tick() {
        let padded = BoundingBox::new(80, 50, 240, 200);
        let (tick, x) = associate_tick(&segments(), 200, 150, 170, padded).unwrap();
        assert_eq!(tick, seg(195.0, 165.0, 195.0));
        assert_eq!(x, 195);
    }

    #[test]
    fn test_tick_outside_crop_uses_center() {
        let padded = BoundingBox::new(200, 50, 60, 100);
        let segs = vec![seg(120.0, 160.0, 200.0)];
        let (_, x) = associate_tick(&segs, 230, 150, 170, padded).unwrap();
        assert_eq!(x, 230);
    }

    #[test]
    fn test_select_digits_fraction() {
        let boxes = vec![BoundingBox::new(180, 100, 40, 50)];
        let sel = select_digits(
            &boxes,
            &segments(),
            &calibration(),
            400,
            400,
            &SelectionSettings::default(),
        )
        .unwrap();

        assert_eq!(sel.tick_x, 195);
        assert_eq!(sel.pix_frac, 5);
        assert!((sel.dec_frac - 0.001).abs() < 1e-12);
    }
}
