//! Reader Configuration
//!
//! Model locations, detector thresholds and filter parameters stored in TOML
//! format. Every section falls back to its defaults when omitted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reader settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    /// Model file settings
    pub models: ModelSettings,
    /// Text detector decoding settings
    pub detector: DetectorSettings,
    /// OCR engine settings
    pub ocr: OcrSettings,
    /// Filter bank settings
    pub preprocess: PreprocessSettings,
    /// Tick calibration and digit box selection settings
    pub selection: SelectionSettings,
}

/// Tensor layout expected by the detection model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// Batch, channel, height, width
    #[default]
    Nchw,
    /// Batch, height, width, channel (raw TensorFlow exports)
    Nhwc,
}

/// Detection model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// EAST model file; relative paths are tried against the working
    /// directory, then the data directory's `models/` folder
    pub east_model: PathBuf,
    /// Expected SHA-256 of the model file, hex encoded
    pub east_sha256: Option<String>,
    /// Name of the image input tensor
    pub input_name: String,
    /// Name of the per-cell confidence output
    pub score_output: String,
    /// Name of the five-channel geometry output
    pub geometry_output: String,
    /// Layout of the input tensor
    pub input_layout: TensorLayout,
    /// Intra-op threads for the ONNX session
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            east_model: PathBuf::from("east.onnx"),
            east_sha256: None,
            input_name: "input_images:0".to_string(),
            score_output: "feature_fusion/Conv_7/Sigmoid:0".to_string(),
            geometry_output: "feature_fusion/concat_3:0".to_string(),
            input_layout: TensorLayout::Nchw,
            intra_threads: 4,
        }
    }
}

/// EAST decoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Square input size the frame is resized to
    pub input_size: u32,
    /// Cells scoring below this are discarded
    pub score_threshold: f32,
    /// Boxes must score above this to enter suppression
    pub nms_score_threshold: f32,
    /// Overlap above which the weaker box is suppressed
    pub nms_threshold: f32,
    /// Pixel stride of one output cell
    pub cell_stride: f32,
    /// Mean subtracted per channel, RGB order
    pub mean: [f32; 3],
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            input_size: 320,
            score_threshold: 0.5,
            nms_score_threshold: 0.0,
            nms_threshold: 0.5,
            cell_stride: 4.0,
            mean: [123.68, 116.78, 103.94],
        }
    }
}

/// OCR backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    /// The `tesseract` executable
    #[default]
    TesseractCli,
    /// libtesseract through `leptess` (requires the `leptess` feature)
    Leptess,
}

/// OCR engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub backend: OcrBackend,
    /// Executable used by the CLI backend
    pub tesseract_bin: PathBuf,
    /// Tesseract language code
    pub language: String,
    /// Directory holding `*.traineddata`, if not the system default
    pub datapath: Option<PathBuf>,
    /// Page segmentation mode (11 = sparse text)
    pub page_seg_mode: u32,
    /// Fallback words must exceed this confidence (0 - 100)
    pub min_word_confidence: f32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            backend: OcrBackend::TesseractCli,
            tesseract_bin: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            datapath: None,
            page_seg_mode: 11,
            min_word_confidence: 40.0,
        }
    }
}

/// Filter bank settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// CLAHE clip limit
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis
    pub clahe_tiles: u32,
    /// Bilateral denoiser window size (0 disables denoising)
    pub denoise_window: u32,
    /// Bilateral intensity sigma
    pub denoise_sigma_color: f32,
    /// Bilateral spatial sigma
    pub denoise_sigma_spatial: f32,
    /// Dilation radius used to estimate the local background
    pub background_radius: u8,
    /// Opening radius (0 keeps the image unchanged)
    pub open_radius: u8,
    /// Binarization threshold
    pub threshold: u8,
    /// Upper BGR bound of the color mask
    pub mask_upper_bgr: [u8; 3],
    /// Contrast passes applied to the digit crop
    pub digit_crop_passes: u32,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            denoise_window: 5,
            denoise_sigma_color: 25.0,
            denoise_sigma_spatial: 3.0,
            background_radius: 2,
            open_radius: 0,
            threshold: 127,
            mask_upper_bgr: [190, 190, 250],
            digit_crop_passes: 2,
        }
    }
}

/// Tick calibration and digit box settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSettings {
    /// Half-height of the tick band around the vertical center, as a fraction
    /// of the image height
    pub band_fraction: f32,
    /// A row pixel must exceed both neighbors by more than this to be a tick
    pub peak_delta: i32,
    /// Tick walks continue while intensity stays within this of the next row
    pub height_delta: i32,
    /// Number of tallest ticks examined for the scale boundary and center
    pub top_ticks: usize,
    /// Horizontal padding around the digit box
    pub pad_x: u32,
    /// Padding above the digit box
    pub pad_top: u32,
    /// Padding below the digit box
    pub pad_bottom: u32,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            band_fraction: 0.1,
            peak_delta: 1,
            height_delta: 5,
            top_ticks: 5,
            pad_x: 100,
            pad_top: 50,
            pad_bottom: 100,
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "dialreader", "DialReader")
        .ok_or_else(|| anyhow::anyhow!("Could not determine project directories"))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Get the data directory (holds `models/`)
pub fn get_data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Path of the default configuration file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<DialConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: DialConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &DialConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
