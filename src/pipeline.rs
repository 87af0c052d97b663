//! Dial reading pipeline
//!
//! Owns the engines for one worker and runs a frame through tick
//! calibration, text detection, digit selection and mark recognition.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::capture::{load_frame, Frame};
use crate::config::DialConfig;
use crate::debug_dump;
use crate::device::DeviceType;
use crate::error::{DialError, DialResult};
use crate::vision::angle::{final_angle, prepare_crop, read_mark};
use crate::vision::digits::select_digits;
use crate::vision::{
    calibrate, create_engine, extract_tick_candidates, Calibration, DetectionStage, DigitReading,
    DigitSelection, ModelStore, OcrEngine, OnnxEastModel, Preprocessor, RegionGrowDetector,
    SegmentDetector, TextDetectorModel, TextRegionDetector,
};

/// Output printed for any failed reading
pub const FAILURE: &str = "failure";

/// Everything learned while reading one frame
#[derive(Debug, Clone, Serialize)]
pub struct AngleReading {
    pub device: DeviceType,
    /// Encoder angle supplied by the caller; recorded only
    pub encoder_angle: Option<f64>,
    pub angle: f64,
    pub calibration: Calibration,
    pub stage: DetectionStage,
    pub digits: DigitSelection,
    pub reading: DigitReading,
}

/// Reader context: configuration, filters and loaded engines
pub struct DialReader {
    config: DialConfig,
    preprocessor: Preprocessor,
    segments: Box<dyn SegmentDetector>,
    detector: Box<dyn TextDetectorModel>,
    ocr: Box<dyn OcrEngine>,
    debug_dir: Option<PathBuf>,
}

impl DialReader {
    /// Load the EAST model and OCR engine named in the configuration
    pub fn new(config: DialConfig) -> anyhow::Result<Self> {
        let store = ModelStore::new()?;
        let detector = OnnxEastModel::load(&store, &config.models)?;
        let ocr = create_engine(&config.ocr)?;
        Ok(Self::with_engines(
            config,
            Box::new(RegionGrowDetector::default()),
            Box::new(detector),
            ocr,
        ))
    }

    /// Assemble a reader from already constructed engines
    pub fn with_engines(
        config: DialConfig,
        segments: Box<dyn SegmentDetector>,
        detector: Box<dyn TextDetectorModel>,
        ocr: Box<dyn OcrEngine>,
    ) -> Self {
        let preprocessor = Preprocessor::new(&config.preprocess);
        Self {
            config,
            preprocessor,
            segments,
            detector,
            ocr,
            debug_dir: None,
        }
    }

    /// Write annotated frames and digit crops to `dir`
    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    /// Read the dial in an image file. Without an explicit device the file
    /// name decides.
    pub fn read_path(
        &mut self,
        path: &Path,
        device: Option<DeviceType>,
        encoder_angle: Option<f64>,
    ) -> DialResult<AngleReading> {
        let device = device.unwrap_or_else(|| DeviceType::from_path(path));
        info!("Reading {:?} as {}", path, device);

        let frame = load_frame(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame".to_string());
        self.read_frame_named(&frame, device, encoder_angle, &stem)
    }

    /// Read the dial in an already loaded frame
    pub fn read_frame(
        &mut self,
        frame: &Frame,
        device: DeviceType,
        encoder_angle: Option<f64>,
    ) -> DialResult<AngleReading> {
        self.read_frame_named(frame, device, encoder_angle, "frame")
    }

    fn read_frame_named(
        &mut self,
        frame: &Frame,
        device: DeviceType,
        encoder_angle: Option<f64>,
        name: &str,
    ) -> DialResult<AngleReading> {
        if let Some(encoder) = encoder_angle {
            debug!("Encoder angle {} supplied", encoder);
        }
        let (width, height) = frame.dimensions();
        let selection = &self.config.selection;

        let source = self.preprocessor.source_pass(frame.gray());
        let lines = self.segments.detect(&source);
        let candidates =
            extract_tick_candidates(&lines, width, height, selection.band_fraction)?;

        let calibration = calibrate(frame.gray(), &candidates, selection)?;

        let detection = TextRegionDetector {
            preprocessor: &self.preprocessor,
            detector: &mut *self.detector,
            ocr: &mut *self.ocr,
            config: &self.config,
        }
        .detect(frame)?;

        let digits = select_digits(
            &detection.boxes,
            &candidates.segments,
            &calibration,
            width,
            height,
            selection,
        )?;

        let crop_source = self.preprocessor.crop_pass(frame.gray());
        let crop = prepare_crop(&self.preprocessor, &crop_source, digits.padded);

        if let Some(dir) = &self.debug_dir {
            if let Err(e) = debug_dump::write_debug_images(dir, name, frame, &calibration, &digits, &crop) {
                warn!("Failed to write debug images: {:#}", e);
            }
        }

        let profile = device.profile();
        let reading = read_mark(&mut *self.ocr, &crop, &profile)?;
        let angle = final_angle(reading.corrected_mark, &profile, digits.dec_frac);
        info!("Calculated angle {:.2}", angle);

        Ok(AngleReading {
            device,
            encoder_angle,
            angle,
            calibration,
            stage: detection.stage,
            digits,
            reading,
        })
    }

    /// Release the detector and OCR engines
    pub fn shutdown(self) {
        debug!("Shutting down reader engines");
        drop(self.detector);
        drop(self.ocr);
    }
}

/// CLI output for a reading: the angle with two decimals or `failure`
pub fn render(result: &DialResult<AngleReading>) -> String {
    match result {
        Ok(reading) => format!("{:.2}", reading.angle),
        Err(_) => FAILURE.to_string(),
    }
}

/// JSON record for one image
#[derive(Debug, Clone, Serialize)]
pub struct ReadingRecord {
    pub path: PathBuf,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<DetectionStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReadingRecord {
    pub fn new(path: &Path, result: &DialResult<AngleReading>) -> Self {
        let output = render(result);
        match result {
            Ok(r) => Self {
                path: path.to_path_buf(),
                output,
                angle: Some(r.angle),
                device: Some(r.device),
                stage: Some(r.stage),
                raw_text: Some(r.reading.raw_text.clone()),
                pixel_ratio: Some(r.calibration.pixel_ratio),
                error: None,
            },
            Err(e) => Self::failed(path, e),
        }
    }

    /// Record for an image that could not be read
    pub fn failed(path: &Path, error: &DialError) -> Self {
        Self {
            path: path.to_path_buf(),
            output: FAILURE.to_string(),
            angle: None,
            device: None,
            stage: None,
            raw_text: None,
            pixel_ratio: None,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::east::tests::single_cell_maps;
    use crate::vision::text_regions::tests::{FixedOcr, ScriptedDetector};
    use crate::vision::LineSegment;
    use image::{GrayImage, Rgb, RgbImage};
    use std::sync::atomic::Ordering;

    /// Returns fixed segments whatever the image
    struct FixedSegments(Vec<LineSegment>);

    impl SegmentDetector for FixedSegments {
        fn detect(&self, _image: &GrayImage) -> Vec<LineSegment> {
            self.0.clone()
        }
    }

    fn seg(x: f32, y1: f32, y2: f32) -> LineSegment {
        LineSegment::new(x, y1, x, y2)
    }

    /// Five bright ticks 50 px apart, the center one taller
    fn scale_frame() -> Frame {
        let ticks = [
            (100, 180, 220),
            (150, 180, 220),
            (200, 170, 230),
            (250, 180, 220),
            (300, 180, 220),
        ];
        Frame::new(RgbImage::from_fn(400, 400, |x, y| {
            let on = ticks
                .iter()
                .any(|&(tx, top, bottom)| tx == x && (top..=bottom).contains(&y));
            if on {
                Rgb([200, 200, 200])
            } else {
                Rgb([50, 50, 50])
            }
        }))
    }

    fn scale_segments() -> Vec<LineSegment> {
        vec![
            seg(150.0, 180.0, 220.0),
            seg(250.0, 180.0, 220.0),
            seg(200.0, 170.0, 230.0),
            seg(100.0, 180.0, 220.0),
            seg(300.0, 180.0, 220.0),
            seg(195.0, 165.0, 195.0),
        ]
    }

    fn label_maps() -> crate::vision::EastMaps {
        // Decodes to the box (180, 100, 40, 50) on a 400x400 frame
        single_cell_maps(44, 30, [40.0, 0.0, 0.0, 32.0, 0.0])
    }

    fn reader(detector: ScriptedDetector, ocr: FixedOcr) -> DialReader {
        DialReader::with_engines(
            DialConfig::default(),
            Box::new(FixedSegments(scale_segments())),
            Box::new(detector),
            Box::new(ocr),
        )
    }

    #[test]
    fn test_reads_hms_dial() {
        let ocr = FixedOcr::new(vec![], "45\n");
        let word_calls = ocr.word_calls.clone();
        let mut reader = reader(ScriptedDetector::new(vec![label_maps()]), ocr);

        let result = reader.read_frame(&scale_frame(), DeviceType::Hms, Some(12.0));
        let reading = result.as_ref().unwrap();

        assert_eq!(reading.calibration.pixel_ratio, 50.0);
        assert_eq!(reading.calibration.split_y, 170);
        assert_eq!(reading.calibration.true_mid_x, 200);
        assert_eq!(reading.stage, DetectionStage::Primary);
        assert_eq!(reading.digits.padded, crate::vision::BoundingBox::new(80, 50, 240, 200));
        assert_eq!(reading.digits.tick_x, 195);
        assert_eq!(reading.reading.corrected_mark, 45.0);
        assert_eq!(reading.angle, 45.0);
        assert_eq!(reading.encoder_angle, Some(12.0));
        assert_eq!(render(&result), "45.00");
        assert_eq!(word_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shms_polarity() {
        let ocr = FixedOcr::new(vec![], "205\n");
        let mut reader = reader(ScriptedDetector::new(vec![label_maps()]), ocr);

        let reading = reader
            .read_frame(&scale_frame(), DeviceType::Shms, None)
            .unwrap();
        // 20.5 - 0.001
        assert_eq!(reading.angle, 20.5);
        assert_eq!(reading.reading.parsed_value, 20.5);
        assert_eq!(reading.reading.confidence, 88.0);
    }

    #[test]
    fn test_reading_is_idempotent() {
        let mut reader = reader(
            ScriptedDetector::new(vec![label_maps(), label_maps()]),
            FixedOcr::new(vec![], "45\n"),
        );
        let frame = scale_frame();

        let first = reader.read_frame(&frame, DeviceType::Hms, None).unwrap();
        let second = reader.read_frame(&frame, DeviceType::Hms, None).unwrap();
        assert_eq!(first.angle.to_bits(), second.angle.to_bits());
        assert_eq!(first.digits.padded, second.digits.padded);
        assert_eq!(first.calibration.tick_xs, second.calibration.tick_xs);
    }

    #[test]
    fn test_no_text_is_failure() {
        let mut reader = reader(ScriptedDetector::new(vec![]), FixedOcr::new(vec![], "45\n"));
        let result = reader.read_frame(&scale_frame(), DeviceType::Hms, None);

        assert!(matches!(result, Err(DialError::NoTextDetected)));
        assert_eq!(render(&result), FAILURE);
    }

    #[test]
    fn test_unreadable_mark_is_failure() {
        let mut reader = reader(
            ScriptedDetector::new(vec![label_maps()]),
            FixedOcr::new(vec![], "?\n"),
        );
        let result = reader.read_frame(&scale_frame(), DeviceType::Hms, None);
        assert!(matches!(result, Err(DialError::OcrParseFailure { .. })));
    }

    #[test]
    fn test_missing_image_record() {
        let mut reader = reader(ScriptedDetector::new(vec![]), FixedOcr::new(vec![], ""));
        let path = Path::new("/nonexistent/SHMS_3.jpg");
        let result = reader.read_path(path, None, None);

        let record = ReadingRecord::new(path, &result);
        assert_eq!(record.output, FAILURE);
        assert!(record.error.is_some());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"output\":\"failure\""));
        assert!(!json.contains("angle"));
    }

    #[test]
    fn test_debug_images_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = reader(
            ScriptedDetector::new(vec![label_maps()]),
            FixedOcr::new(vec![], "45\n"),
        )
        .with_debug_dir(Some(dir.path().to_path_buf()));

        reader.read_frame(&scale_frame(), DeviceType::Hms, None).unwrap();
        assert!(dir.path().join("frame_annotated.png").exists());
        assert!(dir.path().join("frame_digits.png").exists());
        reader.shutdown();
    }
}
