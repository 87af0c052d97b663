//! Frame data structures for dial photographs

use image::{GrayImage, Luma, RgbImage};

/// A decoded dial photograph with its grayscale view
#[derive(Debug, Clone)]
pub struct Frame {
    /// Color pixels, RGB order
    color: RgbImage,
    /// Luminance of `color`
    gray: GrayImage,
}

impl Frame {
    /// Create a frame from color pixels
    pub fn new(color: RgbImage) -> Self {
        let gray = rgb_to_gray(&color);
        Self { color, gray }
    }

    pub fn color(&self) -> &RgbImage {
        &self.color
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }
}

/// Convert RGB to grayscale with the 0.299/0.587/0.114 luminance weights
pub fn rgb_to_gray(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, p) in image.enumerate_pixels() {
        let [r, g, b] = p.0;
        let value = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        gray.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }

    gray
}

/// Replicate a grayscale image into three channels
pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let v = image.get_pixel(x, y).0[0];
        image::Rgb([v, v, v])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_gray_weights() {
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 0, Rgb([0, 0, 255]));

        let gray = rgb_to_gray(&img);
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_gray_round_trips_through_frame() {
        let gray = GrayImage::from_fn(4, 2, |x, y| Luma([(x * 40 + y * 7) as u8]));
        let frame = Frame::new(gray_to_rgb(&gray));
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.gray(), &gray);
    }
}
