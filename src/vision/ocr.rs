//! OCR (Optical Character Recognition) module
//!
//! Word boxes for the text-detection fallback and free text for the digit
//! crop, through Tesseract. The default engine drives the `tesseract`
//! executable; the `leptess` feature links libtesseract in-process.

use anyhow::{bail, Context, Result};
use image::{GrayImage, ImageBuffer, ImageFormat, Pixel, PixelWithColorType, RgbImage};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use super::BoundingBox;
use crate::config::{OcrBackend, OcrSettings};

/// Single recognized word
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    /// Word bounds in image coordinates
    pub bounds: BoundingBox,
    /// Recognition confidence (0 - 100)
    pub confidence: f32,
    /// Recognized text
    pub text: String,
}

/// Free text recognized in an image
#[derive(Debug, Clone, PartialEq)]
pub struct OcrText {
    pub text: String,
    /// Mean confidence (0 - 100), 0 when the engine does not report one
    pub confidence: f32,
}

/// Text recognition backend
pub trait OcrEngine: Send {
    /// Recognize individual words with their boxes
    fn words(&mut self, image: &GrayImage) -> Result<Vec<OcrWord>>;

    /// Recognize the image as free text
    fn text(&mut self, image: &RgbImage) -> Result<OcrText>;
}

/// Build the engine selected in the settings
pub fn create_engine(settings: &OcrSettings) -> Result<Box<dyn OcrEngine>> {
    match settings.backend {
        OcrBackend::TesseractCli => Ok(Box::new(TesseractCli::new(settings)?)),
        #[cfg(feature = "leptess")]
        OcrBackend::Leptess => Ok(Box::new(leptess_engine::LeptessOcr::new(settings)?)),
        #[cfg(not(feature = "leptess"))]
        OcrBackend::Leptess => {
            bail!("OCR backend 'leptess' requires building with the `leptess` feature")
        }
    }
}

fn encode_png<P>(image: &ImageBuffer<P, Vec<u8>>) -> Result<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + PixelWithColorType,
{
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png)
}

/// Engine driving the `tesseract` executable through stdin/stdout
pub struct TesseractCli {
    binary: PathBuf,
    language: String,
    datapath: Option<PathBuf>,
    page_seg_mode: u32,
}

impl TesseractCli {
    /// Check that the executable runs and remember the settings
    pub fn new(settings: &OcrSettings) -> Result<Self> {
        let output = Command::new(&settings.tesseract_bin)
            .arg("--version")
            .output()
            .with_context(|| {
                format!(
                    "Failed to run {:?}. Is Tesseract installed?",
                    settings.tesseract_bin
                )
            })?;
        let version = String::from_utf8_lossy(&output.stdout);
        info!(
            "Using {}",
            version.lines().next().unwrap_or("tesseract (unknown version)")
        );

        Ok(Self {
            binary: settings.tesseract_bin.clone(),
            language: settings.language.clone(),
            datapath: settings.datapath.clone(),
            page_seg_mode: settings.page_seg_mode,
        })
    }

    fn run(&self, png: &[u8], config: Option<&str>) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("stdin")
            .arg("stdout")
            .arg("--psm")
            .arg(self.page_seg_mode.to_string())
            .arg("-l")
            .arg(&self.language);
        if let Some(dir) = &self.datapath {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        if let Some(config) = config {
            cmd.arg(config);
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {:?}", self.binary))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(png)
                .context("Failed to send image to tesseract")?;
        }

        let output = child
            .wait_with_output()
            .context("Failed to wait for tesseract")?;
        if !output.status.success() {
            bail!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrEngine for TesseractCli {
    fn words(&mut self, image: &GrayImage) -> Result<Vec<OcrWord>> {
        let tsv = self.run(&encode_png(image)?, Some("tsv"))?;
        let words = parse_tsv(&tsv);
        debug!("tesseract found {} words", words.len());
        Ok(words)
    }

    fn text(&mut self, image: &RgbImage) -> Result<OcrText> {
        let tsv = self.run(&encode_png(image)?, Some("tsv"))?;
        Ok(text_from_tsv(&tsv))
    }
}

/// A level 5 TSV row: the word and the (block, paragraph, line) it sits on
struct TsvWord {
    line: (u32, u32, u32),
    word: OcrWord,
}

fn tsv_words(tsv: &str) -> impl Iterator<Item = TsvWord> + '_ {
    tsv.lines().filter_map(|line| {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            return None;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().ok();
        let text = cols[11].trim();
        if text.is_empty() {
            return None;
        }

        Some(TsvWord {
            line: (num(2)?, num(3)?, num(4)?),
            word: OcrWord {
                bounds: BoundingBox::new(num(6)?, num(7)?, num(8)?, num(9)?),
                confidence: cols[10].trim().parse().ok()?,
                text: text.to_string(),
            },
        })
    })
}

/// Word rows (level 5) of Tesseract's TSV output
///
/// Columns: level, page, block, paragraph, line, word, left, top, width,
/// height, confidence, text.
pub fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    tsv_words(tsv).map(|w| w.word).collect()
}

/// Rebuild free text from TSV output: words joined by spaces, one output line
/// per Tesseract line. The confidence is the mean over the words.
pub fn text_from_tsv(tsv: &str) -> OcrText {
    let mut text = String::new();
    let mut current: Option<(u32, u32, u32)> = None;
    let mut total = 0.0f32;
    let mut count = 0usize;

    for TsvWord { line, word } in tsv_words(tsv) {
        match current {
            Some(prev) if prev == line => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current = Some(line);
        text.push_str(&word.text);
        if word.confidence >= 0.0 {
            total += word.confidence;
            count += 1;
        }
    }
    if current.is_some() {
        text.push('\n');
    }

    let confidence = if count == 0 { 0.0 } else { total / count as f32 };
    OcrText { text, confidence }
}

#[cfg(feature = "leptess")]
mod leptess_engine {
    use super::*;
    use leptess::{LepTess, Variable};

    /// In-process libtesseract engine
    pub struct LeptessOcr {
        tess: LepTess,
    }

    impl LeptessOcr {
        pub fn new(settings: &OcrSettings) -> Result<Self> {
            let datapath = settings
                .datapath
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned());
            let mut tess = LepTess::new(datapath.as_deref(), &settings.language)
                .context("Failed to initialize Tesseract. Is Tesseract installed?")?;
            tess.set_variable(
                Variable::TesseditPagesegMode,
                &settings.page_seg_mode.to_string(),
            )
            .context("Failed to set page segmentation mode")?;
            info!("Using libtesseract ({})", settings.language);
            Ok(Self { tess })
        }

        fn load(&mut self, png: &[u8]) -> Result<()> {
            self.tess
                .set_image_from_mem(png)
                .context("Failed to load image into Tesseract")
        }
    }

    impl OcrEngine for LeptessOcr {
        fn words(&mut self, image: &GrayImage) -> Result<Vec<OcrWord>> {
            self.load(&encode_png(image)?)?;
            let Some(boxes) = self
                .tess
                .get_component_boxes(leptess::capi::TessPageIteratorLevel_RIL_WORD, true)
            else {
                return Ok(Vec::new());
            };

            let mut words = Vec::new();
            for b in &boxes {
                self.tess.set_rectangle(&b);
                let text = self
                    .tess
                    .get_utf8_text()
                    .context("Failed to extract text from image")?;
                let g = b.get_geometry();
                words.push(OcrWord {
                    bounds: BoundingBox::new(
                        g.x.max(0) as u32,
                        g.y.max(0) as u32,
                        g.w.max(0) as u32,
                        g.h.max(0) as u32,
                    ),
                    confidence: self.tess.mean_text_conf() as f32,
                    text: text.trim().to_string(),
                });
            }
            Ok(words)
        }

        fn text(&mut self, image: &RgbImage) -> Result<OcrText> {
            self.load(&encode_png(image)?)?;
            let text = self
                .tess
                .get_utf8_text()
                .context("Failed to extract text from image")?;
            Ok(OcrText {
                text,
                confidence: self.tess.mean_text_conf() as f32,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
4\t1\t1\t1\t1\t0\t290\t60\t52\t31\t-1\t
5\t1\t1\t1\t1\t1\t290\t60\t52\t31\t91.5\t45
5\t1\t2\t1\t1\t1\t12\t300\t20\t18\t12.0\t~
5\t1\t3\t1\t1\t1\t1\t1\t3\t3\t95\t ";

    #[test]
    fn test_parse_tsv_words() {
        let words = parse_tsv(SAMPLE_TSV);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].bounds, BoundingBox::new(290, 60, 52, 31));
        assert!((words[0].confidence - 91.5).abs() < 1e-6);
        assert_eq!(words[0].text, "45");
        assert_eq!(words[1].text, "~");
    }

    #[test]
    fn test_text_from_tsv_lines_and_confidence() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
5\t1\t1\t1\t1\t1\t10\t10\t20\t15\t90\t20
5\t1\t1\t1\t1\t2\t34\t10\t10\t15\t80\t5
4\t1\t1\t1\t2\t0\t10\t40\t20\t15\t-1\t
5\t1\t1\t1\t2\t1\t10\t40\t20\t15\t70\t999";

        let ocr = text_from_tsv(tsv);
        assert_eq!(ocr.text, "20 5\n999\n");
        assert!((ocr.confidence - 80.0).abs() < 1e-4);
        assert_eq!(crate::vision::parse_mark(&ocr.text).unwrap(), 20.5);
    }

    #[test]
    fn test_text_from_empty_tsv() {
        let ocr = text_from_tsv("level\tpage_num\n");
        assert_eq!(ocr.text, "");
        assert_eq!(ocr.confidence, 0.0);
    }

    #[test]
    fn test_parse_tsv_ignores_garbage() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("5\t1\t1").is_empty());
        assert!(parse_tsv("5\t1\t1\t1\t1\t1\t-4\t0\t3\t3\t90\tx").is_empty());
    }

    #[test]
    fn test_missing_binary_is_error() {
        let settings = OcrSettings {
            tesseract_bin: PathBuf::from("/nonexistent/tesseract"),
            ..OcrSettings::default()
        };
        assert!(TesseractCli::new(&settings).is_err());
    }

    #[cfg(not(feature = "leptess"))]
    #[test]
    fn test_leptess_backend_needs_feature() {
        let settings = OcrSettings {
            backend: OcrBackend::Leptess,
            ..OcrSettings::default()
        };
        assert!(create_engine(&settings).is_err());
    }

    #[test]
    fn test_png_encoding() {
        let img = GrayImage::from_pixel(4, 4, image::Luma([9]));
        let png = encode_png(&img).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
