//! Tick calibration
//!
//! Finds the scale's central tick group, measures the pixel spacing of one
//! graduation from intensity peaks along the scale row, and locates the
//! boundary between the graduated scale and the printed numerals.

use image::GrayImage;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, info};

use super::lines::{LineSegment, TickCandidates};
use crate::config::SelectionSettings;
use crate::error::{DialError, DialResult};

/// Outcome of tick calibration
#[derive(Debug, Clone, Serialize)]
pub struct Calibration {
    pub left_tick: LineSegment,
    pub right_tick: LineSegment,
    /// Reference segment whose midpoint row was scanned for ticks
    pub central_tick: LineSegment,
    /// Pixels per scale subdivision
    pub pixel_ratio: f64,
    /// Row separating the graduated scale from the numeral labels
    pub split_y: i32,
    /// Column of the tick nearest the frame center among the tallest ticks
    pub true_mid_x: i32,
    /// Scanned row
    pub row_y: i32,
    /// Tick columns found on the scanned row
    pub tick_xs: Vec<i32>,
}

/// Pick the central reference segment.
///
/// Candidates spanning the left reference tick's extent are considered; the
/// tallest wins first, then the one nearest the center among those that do not
/// overshoot the reference by more than one tick height at both ends.
pub fn select_central_tick(candidates: &TickCandidates, mid_x: f32) -> LineSegment {
    let left = candidates.left;
    let mut mid = candidates.segments[0];

    let opts: Vec<LineSegment> = candidates
        .segments
        .iter()
        .copied()
        .filter(|l| left.y1 >= l.y1 && left.y2 <= l.y2)
        .collect();
    for l in &opts {
        if l.height() > mid.height() {
            mid = *l;
        }
    }

    let h = left.height();
    let cull = opts
        .iter()
        .filter(|l| !(l.y1 < left.y1 - h && l.y2 > left.y2 + h));
    for l in cull {
        if (mid_x - l.x1).abs() < (mid_x - mid.x1).abs() {
            mid = *l;
        }
    }

    mid
}

/// Columns where the row's intensity exceeds both neighbors by more than `delta`
pub fn row_peaks(image: &GrayImage, y: u32, delta: i32) -> Vec<i32> {
    let width = image.width();
    if width < 3 || y >= image.height() {
        return Vec::new();
    }
    let px = |x: u32| image.get_pixel(x, y).0[0] as i32;

    (1..width - 1)
        .filter(|&x| px(x) > px(x + 1) + delta && px(x) > px(x - 1) + delta)
        .map(|x| x as i32)
        .collect()
}

/// Most frequent difference between consecutive values.
///
/// Differences are counted in first-seen order, so on a tie the value that
/// appeared first wins.
pub fn modal_spacing(xs: &[i32]) -> Option<i32> {
    let mut order: Vec<i32> = Vec::new();
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for pair in xs.windows(2) {
        let d = (pair[0] - pair[1]).abs();
        let count = counts.entry(d).or_insert(0);
        if *count == 0 {
            order.push(d);
        }
        *count += 1;
    }

    let mut best: Option<(i32, usize)> = None;
    for d in order {
        let c = counts[&d];
        match best {
            Some((_, bc)) if c <= bc => {}
            _ => best = Some((d, c)),
        }
    }
    best.map(|(d, _)| d)
}

/// Vertical extent of the tick at column `x`, walking out from row `y`.
/// Returns `(top, bottom)`.
pub fn tick_extent(image: &GrayImage, x: i32, y: i32, delta: i32) -> (i32, i32) {
    let last_row = image.height() as i32 - 1;
    let px = |row: i32| image.get_pixel(x as u32, row as u32).0[0] as i32;

    let mut uy = y;
    while uy > 0 && px(uy) < px(uy - 1) + delta {
        uy -= 1;
    }
    let mut dy = y;
    while dy < last_row && px(dy) < px(dy + 1) + delta {
        dy += 1;
    }
    (uy, dy)
}

/// Calibrate the scale from the raw grayscale frame and the tick candidates
pub fn calibrate(
    image: &GrayImage,
    candidates: &TickCandidates,
    settings: &SelectionSettings,
) -> DialResult<Calibration> {
    let (width, height) = image.dimensions();
    let mid_x = (width / 2) as i32;

    let central = select_central_tick(candidates, mid_x as f32);
    let row_y = (central.y1 + central.height() / 2.0) as i32;
    if row_y < 0 || row_y >= height as i32 {
        return Err(DialError::CalibrationFailure(format!(
            "scan row {} outside frame",
            row_y
        )));
    }

    let ticks = row_peaks(image, row_y as u32, settings.peak_delta);
    debug!("Row {} has {} tick peaks", row_y, ticks.len());

    let pixel_ratio = match modal_spacing(&ticks) {
        Some(d) if d > 0 => d as f64,
        Some(_) => {
            return Err(DialError::CalibrationFailure(
                "modal tick spacing is zero".to_string(),
            ))
        }
        None => {
            return Err(DialError::CalibrationFailure(format!(
                "{} tick peaks, need at least 2",
                ticks.len()
            )))
        }
    };

    let top_n = settings.top_ticks.max(1);
    if ticks.len() < top_n {
        return Err(DialError::CalibrationFailure(format!(
            "{} tick peaks, need at least {}",
            ticks.len(),
            top_n
        )));
    }

    let extents: Vec<(i32, i32)> = ticks
        .iter()
        .map(|&x| tick_extent(image, x, row_y, settings.height_delta))
        .collect();

    // Tallest first; equal heights pop in peak order
    let mut heap: BinaryHeap<(i32, Reverse<usize>)> = extents
        .iter()
        .enumerate()
        .map(|(i, (top, bottom))| (bottom - top, Reverse(i)))
        .collect();
    let mut tallest = Vec::with_capacity(top_n);
    for _ in 0..top_n {
        if let Some((_, Reverse(i))) = heap.pop() {
            tallest.push(i);
        }
    }

    let split_y = extents[tallest[0]].0;

    let mut true_mid_x = ticks[tallest[0]];
    let mut best = i32::MAX;
    for &i in &tallest {
        let dist = (mid_x - ticks[i]).abs();
        if dist < best {
            best = dist;
            true_mid_x = ticks[i];
        }
    }

    info!(
        "Calibrated: pixel_ratio={}, split_y={}, true_mid_x={}",
        pixel_ratio, split_y, true_mid_x
    );

    Ok(Calibration {
        left_tick: candidates.left,
        right_tick: candidates.right,
        central_tick: central,
        pixel_ratio,
        split_y,
        true_mid_x,
        row_y,
        tick_xs: ticks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Bright one-pixel ticks on a dark field: `(x, top, bottom)` inclusive
    fn tick_image(width: u32, height: u32, ticks: &[(u32, u32, u32)]) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let on = ticks
                .iter()
                .any(|&(tx, top, bottom)| tx == x && (top..=bottom).contains(&y));
            Luma([if on { 200 } else { 50 }])
        })
    }

    fn seg(x: f32, y1: f32, y2: f32) -> LineSegment {
        LineSegment::new(x, y1, x, y2)
    }

    #[test]
    fn test_modal_spacing_first_seen_wins_ties() {
        assert_eq!(modal_spacing(&[0, 10, 20, 27, 34]), Some(10));
        assert_eq!(modal_spacing(&[0, 7, 14, 24, 34]), Some(7));
        assert_eq!(modal_spacing(&[0, 5, 15, 20, 30, 40]), Some(10));
        assert_eq!(modal_spacing(&[3]), None);
    }

    #[test]
    fn test_row_peaks_exact_spacing() {
        for s in [7u32, 12, 50] {
            let ticks: Vec<(u32, u32, u32)> = (1..=8).map(|i| (i * s, 10, 30)).collect();
            let img = tick_image(9 * s + 5, 40, &ticks);
            let peaks = row_peaks(&img, 20, 1);
            assert_eq!(peaks.len(), 8);
            assert_eq!(modal_spacing(&peaks), Some(s as i32));
        }
    }

    #[test]
    fn test_tick_extent() {
        let img = tick_image(20, 50, &[(10, 12, 38)]);
        assert_eq!(tick_extent(&img, 10, 20, 5), (12, 38));
    }

    #[test]
    fn test_tick_extent_stops_at_frame_edge() {
        let img = tick_image(20, 30, &[(10, 0, 29)]);
        assert_eq!(tick_extent(&img, 10, 15, 5), (0, 29));
    }

    fn scale_fixture() -> (GrayImage, TickCandidates) {
        let img = tick_image(
            400,
            400,
            &[
                (100, 180, 220),
                (150, 180, 220),
                (200, 170, 230),
                (250, 180, 220),
                (300, 180, 220),
            ],
        );
        let segments = vec![
            seg(150.0, 180.0, 220.0),
            seg(250.0, 180.0, 220.0),
            seg(200.0, 170.0, 230.0),
            seg(100.0, 180.0, 220.0),
            seg(300.0, 180.0, 220.0),
            seg(195.0, 165.0, 195.0),
        ];
        let candidates = TickCandidates {
            left: segments[5],
            right: segments[1],
            segments,
        };
        (img, candidates)
    }

    #[test]
    fn test_select_central_tick() {
        let (_, candidates) = scale_fixture();
        let mid = select_central_tick(&candidates, 200.0);
        assert_eq!(mid, seg(195.0, 165.0, 195.0));
    }

    #[test]
    fn test_calibrate_scale() {
        let (img, candidates) = scale_fixture();
        let cal = calibrate(&img, &candidates, &SelectionSettings::default()).unwrap();

        assert_eq!(cal.row_y, 180);
        assert_eq!(cal.tick_xs, vec![100, 150, 200, 250, 300]);
        assert_eq!(cal.pixel_ratio, 50.0);
        // The tall center tick starts at row 170
        assert_eq!(cal.split_y, 170);
        assert_eq!(cal.true_mid_x, 200);
    }

    #[test]
    fn test_calibrate_needs_five_ticks() {
        let img = tick_image(400, 400, &[(100, 180, 220), (150, 180, 220), (200, 180, 220)]);
        let segments = vec![seg(150.0, 180.0, 220.0), seg(250.0, 180.0, 220.0)];
        let candidates = TickCandidates {
            left: segments[0],
            right: segments[1],
            segments,
        };
        let result = calibrate(&img, &candidates, &SelectionSettings::default());
        assert!(matches!(result, Err(DialError::CalibrationFailure(_))));
    }

    #[test]
    fn test_equal_heights_keep_peak_order() {
        let ticks: Vec<(u32, u32, u32)> = (0..7).map(|i| (40 + i * 20, 180, 220)).collect();
        let img = tick_image(200, 400, &ticks);
        let segments = vec![seg(80.0, 180.0, 220.0), seg(120.0, 180.0, 220.0)];
        let candidates = TickCandidates {
            left: segments[0],
            right: segments[1],
            segments,
        };
        let cal = calibrate(&img, &candidates, &SelectionSettings::default()).unwrap();

        // The five tallest are the first five peaks (x = 40..=120); the one
        // nearest the center column 100 is x = 100
        assert_eq!(cal.true_mid_x, 100);
        assert_eq!(cal.split_y, 180);
    }
}
