//! Filter bank for dial photographs
//!
//! Produces the derived images consumed downstream: the denoised grayscale
//! passes used for line detection and digit crops, the binarized image fed to
//! the text detector, and the color-masked fallback. Every filter returns a
//! new image.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::filter::{bilateral_filter, gaussian_blur_f32};
use imageproc::morphology::{dilate, open};
use tracing::debug;

use super::clahe::Clahe;
use crate::capture::frame::{gray_to_rgb, rgb_to_gray};
use crate::config::PreprocessSettings;

/// Sigma OpenCV derives for a 3x3 Gaussian kernel
const SIGMA_3X3: f32 = 0.8;
/// Sigma OpenCV derives for a 5x5 Gaussian kernel
const SIGMA_5X5: f32 = 1.1;

/// Stateless filter bank configured once per reader
#[derive(Debug, Clone)]
pub struct Preprocessor {
    clahe: Clahe,
    settings: PreprocessSettings,
}

impl Preprocessor {
    pub fn new(settings: &PreprocessSettings) -> Self {
        Self {
            clahe: Clahe::new(settings.clahe_clip_limit, settings.clahe_tiles),
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    /// Equalize the luminance channel `passes` times and recompose the color
    /// image. Each pass works on the previous pass's output.
    pub fn enhance_contrast(&self, frame: &RgbImage, passes: u32) -> RgbImage {
        let (width, height) = frame.dimensions();
        let mut lab: Vec<[f32; 3]> = frame.pixels().map(|p| rgb_to_lab(p.0)).collect();

        let mut lightness = GrayImage::from_fn(width, height, |x, y| {
            let l = lab[(y * width + x) as usize][0];
            Luma([l.round().clamp(0.0, 255.0) as u8])
        });
        for _ in 0..passes {
            lightness = self.clahe.apply(&lightness);
        }

        for (i, px) in lab.iter_mut().enumerate() {
            px[0] = lightness.as_raw()[i] as f32;
        }

        RgbImage::from_fn(width, height, |x, y| Rgb(lab_to_rgb(lab[(y * width + x) as usize])))
    }

    /// Edge-preserving denoise; one-pixel ticks survive it
    pub fn denoise(&self, image: &GrayImage) -> GrayImage {
        let window = self.settings.denoise_window;
        if window == 0 || image.width() == 0 || image.height() == 0 {
            return image.clone();
        }
        bilateral_filter(
            image,
            window,
            self.settings.denoise_sigma_color,
            self.settings.denoise_sigma_spatial,
        )
    }

    /// Denoise then blur; the line detector's input
    pub fn source_pass(&self, gray: &GrayImage) -> GrayImage {
        gaussian_blur_f32(&self.denoise(gray), SIGMA_5X5)
    }

    /// Blur then denoise; digit crops are cut from this
    pub fn crop_pass(&self, gray: &GrayImage) -> GrayImage {
        self.denoise(&gaussian_blur_f32(gray, SIGMA_5X5))
    }

    /// Black/white mask emphasizing tick and glyph edges
    pub fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let inverted = threshold(gray, self.settings.threshold, ThresholdType::BinaryInverted);
        let background = dilate(&inverted, Norm::LInf, self.settings.background_radius);
        let normalized = divide_scaled(&inverted, &background);

        let smoothed = gaussian_blur_f32(&normalized, SIGMA_3X3);
        let opened = self.open(&smoothed);
        let smoothed = gaussian_blur_f32(&opened, SIGMA_5X5);

        debug!("Binarized {}x{} frame", gray.width(), gray.height());
        self.denoise(&smoothed)
    }

    /// Mask of the dark scale print, dropping bright red and white glare.
    /// Only used when the binarized image yields no text.
    pub fn color_mask(&self, frame: &RgbImage) -> GrayImage {
        let enhanced = self.enhance_contrast(frame, 1);
        let denoised = self.denoise_color(&enhanced);

        let [b_hi, g_hi, r_hi] = self.settings.mask_upper_bgr;
        let masked = RgbImage::from_fn(denoised.width(), denoised.height(), |x, y| {
            let p = *denoised.get_pixel(x, y);
            let [r, g, b] = p.0;
            if b <= b_hi && g <= g_hi && r <= r_hi {
                p
            } else {
                Rgb([0, 0, 0])
            }
        });

        let gray = rgb_to_gray(&masked);
        let binary = threshold(&gray, 1, ThresholdType::Binary);
        let opened = self.open(&binary);
        let smoothed = gaussian_blur_f32(&opened, SIGMA_5X5);

        debug!("Color-masked {}x{} frame", frame.width(), frame.height());
        self.denoise(&smoothed)
    }

    /// Conditioning applied before word-level OCR of a mask image
    pub fn ocr_condition(&self, image: &GrayImage) -> GrayImage {
        let enhanced = rgb_to_gray(&self.enhance_contrast(&gray_to_rgb(image), 1));
        let pass = gaussian_blur_f32(&self.denoise(&enhanced), SIGMA_3X3);
        let pass = gaussian_blur_f32(&self.denoise(&pass), SIGMA_3X3);
        self.denoise(&pass)
    }

    fn open(&self, image: &GrayImage) -> GrayImage {
        if self.settings.open_radius == 0 {
            return image.clone();
        }
        open(image, Norm::LInf, self.settings.open_radius)
    }

    /// Channel-wise `denoise`
    fn denoise_color(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let [r, g, b] = [0, 1, 2].map(|c| {
            let channel =
                GrayImage::from_fn(width, height, |x, y| Luma([image.get_pixel(x, y).0[c]]));
            self.denoise(&channel)
        });
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([r.get_pixel(x, y).0[0], g.get_pixel(x, y).0[0], b.get_pixel(x, y).0[0]])
        })
    }
}

/// `dst = round(src * 255 / bg)`, zero where the background is zero
fn divide_scaled(src: &GrayImage, bg: &GrayImage) -> GrayImage {
    GrayImage::from_fn(src.width(), src.height(), |x, y| {
        let s = src.get_pixel(x, y).0[0] as f32;
        let b = bg.get_pixel(x, y).0[0] as f32;
        if b == 0.0 {
            Luma([0])
        } else {
            Luma([(s * 255.0 / b).round().clamp(0.0, 255.0) as u8])
        }
    })
}

const WHITE_X: f32 = 0.950456;
const WHITE_Z: f32 = 1.088754;
const LAB_EPSILON: f32 = 0.008856;

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

/// 8-bit Lab: L scaled to 0..255, a and b offset by 128
fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| srgb_to_linear(c as f32 / 255.0));

    let x = (0.412453 * r + 0.357580 * g + 0.180423 * b) / WHITE_X;
    let y = 0.212671 * r + 0.715160 * g + 0.072169 * b;
    let z = (0.019334 * r + 0.119193 * g + 0.950227 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > LAB_EPSILON {
        116.0 * fy - 16.0
    } else {
        903.3 * y
    };

    [
        l * 255.0 / 100.0,
        500.0 * (fx - fy) + 128.0,
        200.0 * (fy - fz) + 128.0,
    ]
}

fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let l = lab[0] * 100.0 / 255.0;
    let fy = (l + 16.0) / 116.0;
    let fx = fy + (lab[1] - 128.0) / 500.0;
    let fz = fy - (lab[2] - 128.0) / 200.0;

    let y = if l > 903.3 * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / 903.3
    };
    let x = lab_f_inv(fx) * WHITE_X;
    let z = lab_f_inv(fz) * WHITE_Z;

    let r = 3.240479 * x - 1.537150 * y - 0.498535 * z;
    let g = -0.969256 * x + 1.875992 * y + 0.041556 * z;
    let b = 0.055648 * x - 0.204043 * y + 1.057311 * z;

    [r, g, b].map(|c| (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0).round().clamp(0.0, 255.0) as u8)
}
