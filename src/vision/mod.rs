//! Vision pipeline stages
//!
//! Filtering, line and tick analysis, text detection and OCR for dial
//! photographs.

pub mod angle;
pub mod calibrate;
pub mod clahe;
pub mod digits;
pub mod east;
pub mod lines;
pub mod models;
pub mod ocr;
pub mod preprocess;
pub mod text_regions;

pub use angle::{final_angle, parse_mark, DigitReading};
pub use calibrate::{calibrate, Calibration};
pub use digits::{select_digits, DigitSelection};
pub use east::{EastMaps, TextDetectorModel};
pub use lines::{extract_tick_candidates, LineSegment, RegionGrowDetector, SegmentDetector, TickCandidates};
pub use models::{ModelStore, OnnxEastModel};
pub use ocr::{create_engine, OcrEngine, OcrText, OcrWord, TesseractCli};
pub use preprocess::Preprocessor;
pub use text_regions::{DetectionStage, StageOutcome, TextDetection, TextRegionDetector};

use serde::Serialize;

/// Axis-aligned box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box spanning the corners `(x1, y1)` to `(x2, y2)`, clipped to a
    /// `frame_width` x `frame_height` frame. `None` if nothing remains.
    pub fn clipped(x1: i64, y1: i64, x2: i64, y2: i64, frame_width: u32, frame_height: u32) -> Option<Self> {
        let x1 = x1.clamp(0, frame_width as i64);
        let y1 = y1.clamp(0, frame_height as i64);
        let x2 = x2.clamp(0, frame_width as i64);
        let y2 = y2.clamp(0, frame_height as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self::new(
            x1 as u32,
            y1 as u32,
            (x2 - x1) as u32,
            (y2 - y1) as u32,
        ))
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn center_x(&self) -> u32 {
        self.x + self.width / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_edges() {
        let b = BoundingBox::new(180, 100, 40, 50);
        assert_eq!(b.right(), 220);
        assert_eq!(b.bottom(), 150);
        assert_eq!(b.center_x(), 200);
    }

    #[test]
    fn test_clipped() {
        assert_eq!(
            BoundingBox::clipped(-10, -5, 30, 20, 100, 100),
            Some(BoundingBox::new(0, 0, 30, 20))
        );
        assert_eq!(
            BoundingBox::clipped(90, 90, 150, 130, 100, 100),
            Some(BoundingBox::new(90, 90, 10, 10))
        );
        assert_eq!(BoundingBox::clipped(120, 0, 150, 10, 100, 100), None);
        assert_eq!(BoundingBox::clipped(10, 10, 5, 20, 100, 100), None);
    }
}
