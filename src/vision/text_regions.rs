//! Text region detection with fallbacks
//!
//! The binarized frame goes through the EAST detector first. If nothing is
//! found the color-masked frame is tried, and as a last resort word-level OCR
//! of the mask supplies the boxes.

use image::GrayImage;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use super::east::{blob_from_gray, detect_boxes, TextDetectorModel};
use super::ocr::OcrEngine;
use super::preprocess::Preprocessor;
use super::BoundingBox;
use crate::capture::Frame;
use crate::config::DialConfig;
use crate::error::{DialError, DialResult};

/// Detection stages in the order they are attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStage {
    Primary,
    MaskedRetry,
    OcrFallback,
    Failed,
}

impl DetectionStage {
    /// Stage attempted after this one comes back empty
    pub fn next(self) -> Self {
        match self {
            DetectionStage::Primary => DetectionStage::MaskedRetry,
            DetectionStage::MaskedRetry => DetectionStage::OcrFallback,
            DetectionStage::OcrFallback | DetectionStage::Failed => DetectionStage::Failed,
        }
    }
}

impl fmt::Display for DetectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionStage::Primary => "primary",
            DetectionStage::MaskedRetry => "masked retry",
            DetectionStage::OcrFallback => "OCR fallback",
            DetectionStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a single stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Found(Vec<BoundingBox>),
    Empty,
}

impl StageOutcome {
    fn from_boxes(boxes: Vec<BoundingBox>) -> Self {
        if boxes.is_empty() {
            StageOutcome::Empty
        } else {
            StageOutcome::Found(boxes)
        }
    }
}

/// Boxes found and the stage that found them
#[derive(Debug, Clone)]
pub struct TextDetection {
    pub boxes: Vec<BoundingBox>,
    pub stage: DetectionStage,
}

/// Engines and filters the detection stages run on
pub struct TextRegionDetector<'a> {
    pub preprocessor: &'a Preprocessor,
    pub detector: &'a mut dyn TextDetectorModel,
    pub ocr: &'a mut dyn OcrEngine,
    pub config: &'a DialConfig,
}

impl TextRegionDetector<'_> {
    /// Run the stages in order until one finds text
    pub fn detect(&mut self, frame: &Frame) -> DialResult<TextDetection> {
        let mut stage = DetectionStage::Primary;
        let mut mask: Option<GrayImage> = None;

        loop {
            let outcome = match stage {
                DetectionStage::Primary => {
                    let binary = self.preprocessor.binarize(frame.gray());
                    self.east(&binary)?
                }
                DetectionStage::MaskedRetry => {
                    let masked = self.preprocessor.color_mask(frame.color());
                    let outcome = self.east(&masked)?;
                    mask = Some(masked);
                    outcome
                }
                DetectionStage::OcrFallback => {
                    let masked = match mask.take() {
                        Some(m) => m,
                        None => self.preprocessor.color_mask(frame.color()),
                    };
                    self.ocr_words(&masked)?
                }
                DetectionStage::Failed => {
                    warn!("No text regions found by any stage");
                    return Err(DialError::NoTextDetected);
                }
            };

            match outcome {
                StageOutcome::Found(boxes) => {
                    info!("{} text regions from {} stage", boxes.len(), stage);
                    return Ok(TextDetection { boxes, stage });
                }
                StageOutcome::Empty => {
                    debug!("{} stage found no text", stage);
                    stage = stage.next();
                }
            }
        }
    }

    fn east(&mut self, image: &GrayImage) -> DialResult<StageOutcome> {
        let settings = &self.config.detector;
        let blob = blob_from_gray(image, settings, self.config.models.input_layout);
        let maps = self.detector.infer(blob).map_err(DialError::Detector)?;
        let boxes = detect_boxes(&maps, image.width(), image.height(), settings);
        Ok(StageOutcome::from_boxes(boxes))
    }

    fn ocr_words(&mut self, mask: &GrayImage) -> DialResult<StageOutcome> {
        let conditioned = self.preprocessor.ocr_condition(mask);
        let half_height = conditioned.height() / 2;
        let min_confidence = self.config.ocr.min_word_confidence;

        let words = self.ocr.words(&conditioned).map_err(DialError::Ocr)?;
        let boxes = words
            .into_iter()
            .filter(|w| w.confidence > min_confidence && w.bounds.bottom() <= half_height)
            .map(|w| w.bounds)
            .collect();
        Ok(StageOutcome::from_boxes(boxes))
    }
}
