//! EAST text detector input/output handling
//!
//! Builds the input blob for the detector, decodes its score and geometry
//! maps into axis-aligned boxes and applies non-maximum suppression.

use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::{Array4, Axis};
use tracing::debug;

use super::BoundingBox;
use crate::config::{DetectorSettings, TensorLayout};

/// Anything that maps an input blob to EAST score and geometry maps
pub trait TextDetectorModel: Send {
    fn infer(&mut self, blob: Array4<f32>) -> Result<EastMaps>;
}

/// Detector output in NCHW order: scores `[1, 1, H, W]`, geometry `[1, 5, H, W]`
#[derive(Debug, Clone)]
pub struct EastMaps {
    pub scores: Array4<f32>,
    pub geometry: Array4<f32>,
}

impl EastMaps {
    /// Validate the map shapes, transposing NHWC outputs to NCHW
    pub fn new(scores: Array4<f32>, geometry: Array4<f32>) -> Result<Self> {
        let scores = to_nchw(scores, 1)?;
        let geometry = to_nchw(geometry, 5)?;

        if scores.shape()[2..] != geometry.shape()[2..] {
            bail!(
                "Score map {:?} and geometry map {:?} disagree",
                scores.shape(),
                geometry.shape()
            );
        }

        Ok(Self { scores, geometry })
    }

    /// Rows and columns of the output grid
    pub fn grid(&self) -> (usize, usize) {
        (self.scores.shape()[2], self.scores.shape()[3])
    }
}

fn to_nchw(map: Array4<f32>, channels: usize) -> Result<Array4<f32>> {
    let shape = map.shape().to_vec();
    if shape[1] == channels {
        Ok(map)
    } else if shape[3] == channels {
        Ok(map.permuted_axes([0, 3, 1, 2]).as_standard_layout().to_owned())
    } else {
        bail!("Expected {} channels, got map of shape {:?}", channels, shape)
    }
}

/// Input blob: the gray frame replicated to three channels, resized to the
/// detector's square input and mean-subtracted
pub fn blob_from_gray(
    gray: &GrayImage,
    settings: &DetectorSettings,
    layout: TensorLayout,
) -> Array4<f32> {
    let size = settings.input_size;
    let resized = imageops::resize(gray, size, size, FilterType::Triangle);
    let s = size as usize;

    let mut nchw = Array4::<f32>::zeros((1, 3, s, s));
    for (x, y, p) in resized.enumerate_pixels() {
        let v = p.0[0] as f32;
        for c in 0..3 {
            nchw[[0, c, y as usize, x as usize]] = v - settings.mean[c];
        }
    }

    match layout {
        TensorLayout::Nchw => nchw,
        TensorLayout::Nhwc => nchw.permuted_axes([0, 2, 3, 1]).as_standard_layout().to_owned(),
    }
}

/// Integer rectangle as produced by decoding, before clipping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl RawRect {
    fn area(&self) -> i64 {
        if self.width <= 0 || self.height <= 0 {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    fn intersection(&self, other: &RawRect) -> i64 {
        let x1 = self.x.max(other.x) as i64;
        let y1 = self.y.max(other.y) as i64;
        let x2 = (self.x + self.width).min(other.x + other.width) as i64;
        let y2 = (self.y + self.height).min(other.y + other.height) as i64;
        if x2 <= x1 || y2 <= y1 {
            0
        } else {
            (x2 - x1) * (y2 - y1)
        }
    }

    fn iou(&self, other: &RawRect) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            0.0
        } else {
            inter as f32 / union as f32
        }
    }
}

/// Decode every confident cell into a rectangle in original frame
/// coordinates, paired with its score
pub fn decode(
    maps: &EastMaps,
    orig_width: u32,
    orig_height: u32,
    settings: &DetectorSettings,
) -> Vec<(RawRect, f32)> {
    let (rows, cols) = maps.grid();
    let size = settings.input_size.max(1) as f64;
    let r_w = orig_width as f64 / size;
    let r_h = orig_height as f64 / size;

    let scores = maps.scores.index_axis(Axis(0), 0);
    let geo = maps.geometry.index_axis(Axis(0), 0);

    let mut rects = Vec::new();
    for y in 0..rows {
        for x in 0..cols {
            let score = scores[[0, y, x]];
            if score < settings.score_threshold {
                continue;
            }

            let off_x = x as f32 * settings.cell_stride;
            let off_y = y as f32 * settings.cell_stride;
            let (g0, g1, g2, g3) = (geo[[0, y, x]], geo[[1, y, x]], geo[[2, y, x]], geo[[3, y, x]]);
            let angle = geo[[4, y, x]];
            let (sin, cos) = angle.sin_cos();
            let h = g0 + g2;
            let w = g1 + g3;

            let end_x = (off_x + cos * g1 + sin * g2) as i32;
            let end_y = (off_y - sin * g1 + cos * g2) as i32;
            let start_x = (end_x as f32 - w) as i32;
            let start_y = (end_y as f32 - h) as i32;

            if (end_y as f64 * r_h) < orig_height as f64 {
                rects.push((
                    RawRect {
                        x: (start_x as f64 * r_w) as i32,
                        y: (start_y as f64 * r_h) as i32,
                        width: ((end_x - start_x) as f64 * r_w) as i32,
                        height: ((end_y - start_y) as f64 * r_h) as i32,
                    },
                    score,
                ));
            }
        }
    }

    rects
}

/// Greedy non-maximum suppression. Returns the indices of kept rectangles,
/// strongest first; equal scores keep their decode order.
pub fn non_max_suppression(
    rects: &[(RawRect, f32)],
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rects.len())
        .filter(|&i| rects[i].1 > score_threshold)
        .collect();
    order.sort_by(|&a, &b| rects[b].1.total_cmp(&rects[a].1));

    let mut kept: Vec<usize> = Vec::new();
    for i in order {
        if kept.iter().all(|&k| rects[k].0.iou(&rects[i].0) <= iou_threshold) {
            kept.push(i);
        }
    }
    kept
}

/// Decode, suppress and clip to the frame
pub fn detect_boxes(
    maps: &EastMaps,
    orig_width: u32,
    orig_height: u32,
    settings: &DetectorSettings,
) -> Vec<BoundingBox> {
    let rects = decode(maps, orig_width, orig_height, settings);
    let kept = non_max_suppression(&rects, settings.nms_score_threshold, settings.nms_threshold);

    let boxes: Vec<BoundingBox> = kept
        .into_iter()
        .filter_map(|i| {
            let r = rects[i].0;
            BoundingBox::clipped(
                r.x as i64,
                r.y as i64,
                r.x as i64 + r.width as i64,
                r.y as i64 + r.height as i64,
                orig_width,
                orig_height,
            )
        })
        .collect();

    debug!(
        "EAST decoded {} cells, {} boxes after suppression",
        rects.len(),
        boxes.len()
    );
    boxes
}
