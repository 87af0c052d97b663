//! Pipeline error kinds
//!
//! Every variant is terminal for the image being read. Out-of-range scale
//! marks are not errors; they are corrected by the device profile.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single dial reading
#[derive(Debug, Error)]
pub enum DialError {
    /// The image file could not be opened or decoded
    #[error("failed to read image {path:?}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The line detector produced nothing usable as a tick
    #[error("no tick candidates found near the scale midline")]
    NoTickCandidates,

    /// Tick spacing or tick heights could not be established
    #[error("tick calibration failed: {0}")]
    CalibrationFailure(String),

    /// Primary, masked and OCR-fallback detection all came back empty
    #[error("no text regions detected")]
    NoTextDetected,

    /// Text was found, but none of it sits above the scale boundary
    #[error("no text region lies above the scale boundary")]
    NoDigitBox,

    /// The digit crop did not yield a usable numeral
    #[error("could not parse a scale mark from OCR text {raw:?}")]
    OcrParseFailure { raw: String },

    /// The text detection model failed to run
    #[error("text detector failed: {0:#}")]
    Detector(anyhow::Error),

    /// The OCR engine failed to run
    #[error("OCR engine failed: {0:#}")]
    Ocr(anyhow::Error),
}

pub type DialResult<T> = std::result::Result<T, DialError>;
