//! Scale mark parsing and final angle computation

use image::{GrayImage, RgbImage};
use serde::Serialize;
use tracing::{debug, info};

use super::ocr::OcrEngine;
use super::preprocess::Preprocessor;
use super::BoundingBox;
use crate::capture::frame::gray_to_rgb;
use crate::device::DeviceProfile;
use crate::error::{DialError, DialResult};

/// OCR result for the digit crop
#[derive(Debug, Clone, Serialize)]
pub struct DigitReading {
    /// Text as returned by the OCR engine
    pub raw_text: String,
    /// Mark parsed from the text
    pub parsed_value: f64,
    /// Mark after the device's range correction
    pub corrected_mark: f64,
    /// OCR confidence (0 - 100), 0 when not reported
    pub confidence: f32,
}

/// Parse the numeral printed above a tick.
///
/// Digits are collected up to the first line break. Labels with more than
/// three digits are whole numbers; shorter ones carry an implied decimal
/// point after the second digit.
pub fn parse_mark(raw: &str) -> DialResult<f64> {
    let first_line = raw.split('\n').next().unwrap_or_default();
    let mut digits: String = first_line.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < 2 {
        return Err(DialError::OcrParseFailure {
            raw: raw.to_string(),
        });
    }
    if digits.len() > 3 {
        digits.push_str(".0");
    } else {
        digits.insert(2, '.');
        if digits.ends_with('.') {
            digits.push('0');
        }
    }

    digits.parse::<f64>().map_err(|_| DialError::OcrParseFailure {
        raw: raw.to_string(),
    })
}

/// `round((mark + polarity * dec_frac) * 100) / 100`, rounding half away
/// from zero
pub fn final_angle(corrected_mark: f64, profile: &DeviceProfile, dec_frac: f64) -> f64 {
    let value = corrected_mark + profile.polarity * dec_frac;
    (value * 100.0).round() / 100.0
}

/// Cut the OCR crop out of the crop pass and enhance its contrast
pub fn prepare_crop(
    preprocessor: &Preprocessor,
    crop_source: &GrayImage,
    region: BoundingBox,
) -> RgbImage {
    let crop =
        image::imageops::crop_imm(crop_source, region.x, region.y, region.width, region.height)
            .to_image();
    let passes = preprocessor.settings().digit_crop_passes;
    preprocessor.enhance_contrast(&gray_to_rgb(&crop), passes)
}

/// OCR the prepared crop and correct the mark for the device
pub fn read_mark(
    ocr: &mut dyn OcrEngine,
    crop: &RgbImage,
    profile: &DeviceProfile,
) -> DialResult<DigitReading> {
    let recognized = ocr.text(crop).map_err(DialError::Ocr)?;
    debug!(
        "Digit crop OCR: {:?} (confidence {})",
        recognized.text, recognized.confidence
    );

    let parsed_value = parse_mark(&recognized.text)?;
    let corrected_mark = profile.correct(parsed_value);
    info!("Scale mark {} (corrected {})", parsed_value, corrected_mark);

    Ok(DigitReading {
        raw_text: recognized.text,
        parsed_value,
        corrected_mark,
        confidence: recognized.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inserts_decimal() {
        assert_eq!(parse_mark("105\n").unwrap(), 10.5);
        assert_eq!(parse_mark("45\n").unwrap(), 45.0);
        assert_eq!(parse_mark("1050").unwrap(), 1050.0);
        assert_eq!(parse_mark("35.5").unwrap(), 35.5);
    }

    #[test]
    fn test_parse_stops_at_first_line() {
        assert_eq!(parse_mark(" 2 0 \n 999").unwrap(), 20.0);
        assert_eq!(parse_mark("a1b2c3\n").unwrap(), 12.3);
    }

    #[test]
    fn test_parse_rejects_short_text() {
        assert!(matches!(
            parse_mark("7\n45"),
            Err(DialError::OcrParseFailure { .. })
        ));
        assert!(matches!(parse_mark(""), Err(DialError::OcrParseFailure { .. })));
        assert!(matches!(parse_mark("\n"), Err(DialError::OcrParseFailure { .. })));
    }

    #[test]
    fn test_final_angle_polarity() {
        assert_eq!(final_angle(45.0, &DeviceProfile::HMS, 0.001), 45.0);
        assert_eq!(final_angle(20.0, &DeviceProfile::HMS, 0.05), 20.05);
        assert_eq!(final_angle(20.0, &DeviceProfile::SHMS, 0.05), 19.95);
        assert_eq!(final_angle(12.0, &DeviceProfile::SHMS, -0.012), 12.01);
    }

    #[test]
    fn test_final_angle_rounds_half_away_from_zero() {
        assert_eq!(final_angle(0.0, &DeviceProfile::HMS, 0.125), 0.13);
        assert_eq!(final_angle(0.0, &DeviceProfile::HMS, -0.125), -0.13);
    }

    #[test]
    fn test_prepare_crop_dimensions() {
        let preprocessor = Preprocessor::new(&crate::config::PreprocessSettings::default());
        let source = GrayImage::from_fn(100, 80, |x, y| image::Luma([((x + y) % 256) as u8]));
        let crop = prepare_crop(&preprocessor, &source, BoundingBox::new(10, 20, 30, 40));
        assert_eq!(crop.dimensions(), (30, 40));
    }
}
