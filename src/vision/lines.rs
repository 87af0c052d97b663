//! Line segment detection and tick candidate classification
//!
//! The detector grows regions of pixels sharing a level-line orientation
//! (the approach of the LSD family) and fits one segment per region along its
//! principal axis.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::Serialize;
use std::f32::consts::{PI, TAU};
use tracing::debug;

use crate::error::{DialError, DialResult};

/// A straight segment in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineSegment {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl LineSegment {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_vertical(&self) -> bool {
        (self.x1 - self.x2).abs() < (self.y1 - self.y2).abs()
    }

    /// Signed vertical extent, `y2 - y1`
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// Anything that can turn a grayscale frame into line segments
pub trait SegmentDetector: Send {
    fn detect(&self, image: &GrayImage) -> Vec<LineSegment>;
}

/// Region-growing line segment detector
#[derive(Debug, Clone)]
pub struct RegionGrowDetector {
    /// Gradient magnitude below which a pixel carries no orientation
    pub min_gradient: f32,
    /// Orientation tolerance when growing a region, in radians
    pub angle_tolerance: f32,
    /// Regions smaller than this are discarded
    pub min_region_pixels: usize,
}

impl Default for RegionGrowDetector {
    fn default() -> Self {
        Self {
            min_gradient: 5.2,
            angle_tolerance: 22.5_f32.to_radians(),
            min_region_pixels: 8,
        }
    }
}

struct GradientField {
    width: usize,
    height: usize,
    magnitude: Vec<f32>,
    angle: Vec<f32>,
}

impl GradientField {
    fn new(image: &GrayImage) -> Self {
        let gx = horizontal_sobel(image);
        let gy = vertical_sobel(image);
        let width = image.width() as usize;
        let height = image.height() as usize;

        let mut magnitude = Vec::with_capacity(width * height);
        let mut angle = Vec::with_capacity(width * height);
        for (px, py) in gx.pixels().zip(gy.pixels()) {
            let dx = px.0[0] as f32;
            let dy = py.0[0] as f32;
            magnitude.push(dx.hypot(dy) / 4.0);
            // Level-line orientation, perpendicular to the gradient
            angle.push(dx.atan2(-dy));
        }

        Self {
            width,
            height,
            magnitude,
            angle,
        }
    }
}

fn angle_diff(a: f32, b: f32) -> f32 {
    let mut d = (a - b).abs() % TAU;
    if d > PI {
        d = TAU - d;
    }
    d
}

impl RegionGrowDetector {
    fn grow(
        &self,
        field: &GradientField,
        used: &mut [bool],
        seed: usize,
    ) -> Vec<usize> {
        let mut region = vec![seed];
        used[seed] = true;

        let mut region_angle = field.angle[seed];
        let mut sum_cos = region_angle.cos();
        let mut sum_sin = region_angle.sin();

        let mut i = 0;
        while i < region.len() {
            let idx = region[i];
            let x = (idx % field.width) as i64;
            let y = (idx / field.width) as i64;

            for ny in (y - 1)..=(y + 1) {
                for nx in (x - 1)..=(x + 1) {
                    if nx < 0 || ny < 0 || nx >= field.width as i64 || ny >= field.height as i64 {
                        continue;
                    }
                    let n = ny as usize * field.width + nx as usize;
                    if used[n] || field.magnitude[n] <= self.min_gradient {
                        continue;
                    }
                    if angle_diff(field.angle[n], region_angle) <= self.angle_tolerance {
                        used[n] = true;
                        region.push(n);
                        sum_cos += field.angle[n].cos();
                        sum_sin += field.angle[n].sin();
                        region_angle = sum_sin.atan2(sum_cos);
                    }
                }
            }
            i += 1;
        }

        region
    }

    fn fit(&self, field: &GradientField, region: &[usize]) -> Option<LineSegment> {
        let mut total = 0.0f32;
        let mut cx = 0.0f32;
        let mut cy = 0.0f32;
        for &idx in region {
            let w = field.magnitude[idx];
            cx += w * (idx % field.width) as f32;
            cy += w * (idx / field.width) as f32;
            total += w;
        }
        if total <= 0.0 {
            return None;
        }
        cx /= total;
        cy /= total;

        let (mut sxx, mut syy, mut sxy) = (0.0f32, 0.0f32, 0.0f32);
        for &idx in region {
            let w = field.magnitude[idx];
            let dx = (idx % field.width) as f32 - cx;
            let dy = (idx / field.width) as f32 - cy;
            sxx += w * dx * dx;
            syy += w * dy * dy;
            sxy += w * dx * dy;
        }

        let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
        let (dir_x, dir_y) = (theta.cos(), theta.sin());

        let mut t_min = f32::INFINITY;
        let mut t_max = f32::NEG_INFINITY;
        for &idx in region {
            let dx = (idx % field.width) as f32 - cx;
            let dy = (idx / field.width) as f32 - cy;
            let t = dx * dir_x + dy * dir_y;
            t_min = t_min.min(t);
            t_max = t_max.max(t);
        }

        let mut seg = LineSegment::new(
            cx + t_min * dir_x,
            cy + t_min * dir_y,
            cx + t_max * dir_x,
            cy + t_max * dir_y,
        );

        // Vertical segments run top to bottom, the others left to right
        let swap = if seg.is_vertical() {
            seg.y1 > seg.y2
        } else {
            seg.x1 > seg.x2
        };
        if swap {
            seg = LineSegment::new(seg.x2, seg.y2, seg.x1, seg.y1);
        }

        Some(seg)
    }
}

impl SegmentDetector for RegionGrowDetector {
    fn detect(&self, image: &GrayImage) -> Vec<LineSegment> {
        let field = GradientField::new(image);
        let mut used = vec![false; field.magnitude.len()];

        let mut seeds: Vec<usize> = (0..field.magnitude.len())
            .filter(|&i| field.magnitude[i] > self.min_gradient)
            .collect();
        // Strongest gradients first; the sort is stable so ties keep raster order
        seeds.sort_by(|&a, &b| field.magnitude[b].total_cmp(&field.magnitude[a]));

        let mut segments = Vec::new();
        for seed in seeds {
            if used[seed] {
                continue;
            }
            let region = self.grow(&field, &mut used, seed);
            if region.len() < self.min_region_pixels {
                continue;
            }
            if let Some(seg) = self.fit(&field, &region) {
                segments.push(seg);
            }
        }

        debug!(
            "Line detector found {} segments in {}x{} frame",
            segments.len(),
            field.width,
            field.height
        );
        segments
    }
}

/// Vertical segments near the scale midline plus the reference ticks
/// flanking the frame's horizontal center
#[derive(Debug, Clone)]
pub struct TickCandidates {
    pub segments: Vec<LineSegment>,
    pub left: LineSegment,
    pub right: LineSegment,
}

/// Keep vertical segments whose endpoints lie within `band_fraction` of the
/// frame height around its vertical center.
///
/// The reference ticks start as the first two raw segments and are replaced
/// by any candidate strictly nearer to the center on their side.
pub fn extract_tick_candidates(
    lines: &[LineSegment],
    width: u32,
    height: u32,
    band_fraction: f32,
) -> DialResult<TickCandidates> {
    let Some(&first) = lines.first() else {
        return Err(DialError::NoTickCandidates);
    };
    let mut left = first;
    let mut right = lines.get(1).copied().unwrap_or(first);

    let mid_x = (width / 2) as f32;
    let mid_y = (height / 2) as f32;
    let band = band_fraction * height as f32;

    let mut segments = Vec::new();
    for &l in lines {
        if !l.is_vertical() || !(l.y1 > mid_y - band && l.y2 < mid_y + band) {
            continue;
        }
        segments.push(l);

        if l.x1 < mid_x && (mid_x - l.x1).abs() < (mid_x - left.x1).abs() {
            left = l;
        }
        if l.x1 > mid_x && (mid_x - l.x1).abs() < (mid_x - right.x1).abs() {
            right = l;
        }
    }

    if segments.is_empty() {
        return Err(DialError::NoTickCandidates);
    }

    debug!(
        "{} tick candidates, left ref x={:.1}, right ref x={:.1}",
        segments.len(),
        left.x1,
        right.x1
    );

    Ok(TickCandidates {
        segments,
        left,
        right,
    })
}
