//! Contrast-limited adaptive histogram equalization
//!
//! Tile histograms are clipped, the excess redistributed evenly, and each
//! pixel is mapped by bilinear interpolation between the four nearest tile
//! lookup tables.

use image::{GrayImage, Luma};

const BINS: usize = 256;

/// CLAHE operator for 8-bit single channel images
#[derive(Debug, Clone)]
pub struct Clahe {
    clip_limit: f32,
    tiles_x: u32,
    tiles_y: u32,
}

impl Clahe {
    pub fn new(clip_limit: f32, tiles: u32) -> Self {
        let tiles = tiles.max(1);
        Self {
            clip_limit,
            tiles_x: tiles,
            tiles_y: tiles,
        }
    }

    /// Equalize `image`, returning a new image of the same size
    pub fn apply(&self, image: &GrayImage) -> GrayImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image.clone();
        }

        let tiles_x = self.tiles_x.min(width);
        let tiles_y = self.tiles_y.min(height);
        let tile_w = width.div_ceil(tiles_x);
        let tile_h = height.div_ceil(tiles_y);

        let luts = self.tile_luts(image, tiles_x, tiles_y, tile_w, tile_h);

        let inv_tw = 1.0 / tile_w as f32;
        let inv_th = 1.0 / tile_h as f32;
        let mut out = GrayImage::new(width, height);

        for y in 0..height {
            let tyf = y as f32 * inv_th - 0.5;
            let ty1 = tyf.floor() as i64;
            let ya = tyf - ty1 as f32;
            let ty2 = (ty1 + 1).min(tiles_y as i64 - 1) as usize;
            let ty1 = ty1.max(0) as usize;

            for x in 0..width {
                let txf = x as f32 * inv_tw - 0.5;
                let tx1 = txf.floor() as i64;
                let xa = txf - tx1 as f32;
                let tx2 = (tx1 + 1).min(tiles_x as i64 - 1) as usize;
                let tx1 = tx1.max(0) as usize;

                let v = image.get_pixel(x, y).0[0] as usize;
                let lut = |tx: usize, ty: usize| luts[ty * tiles_x as usize + tx][v] as f32;

                let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
                let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
                let value = top * (1.0 - ya) + bottom * ya;

                out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
            }
        }

        out
    }

    fn tile_luts(
        &self,
        image: &GrayImage,
        tiles_x: u32,
        tiles_y: u32,
        tile_w: u32,
        tile_h: u32,
    ) -> Vec<[u8; BINS]> {
        let (width, height) = image.dimensions();
        let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);

        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = (x0 + tile_w).min(width);
                let y1 = (y0 + tile_h).min(height);

                let mut hist = [0u32; BINS];
                for y in y0..y1 {
                    for x in x0..x1 {
                        hist[image.get_pixel(x, y).0[0] as usize] += 1;
                    }
                }

                let area = (x1.saturating_sub(x0) * y1.saturating_sub(y0)).max(1);
                luts.push(self.build_lut(&mut hist, area));
            }
        }

        luts
    }

    fn build_lut(&self, hist: &mut [u32; BINS], area: u32) -> [u8; BINS] {
        if self.clip_limit > 0.0 {
            let limit = ((self.clip_limit * area as f32 / BINS as f32) as u32).max(1);

            let mut clipped = 0u32;
            for count in hist.iter_mut() {
                if *count > limit {
                    clipped += *count - limit;
                    *count = limit;
                }
            }

            let batch = clipped / BINS as u32;
            let residual = (clipped - batch * BINS as u32) as usize;
            for count in hist.iter_mut() {
                *count += batch;
            }
            if residual > 0 {
                let step = (BINS / residual).max(1);
                for i in (0..BINS).step_by(step).take(residual) {
                    hist[i] += 1;
                }
            }
        }

        let scale = 255.0 / area as f32;
        let mut lut = [0u8; BINS];
        let mut sum = 0u32;
        for (i, count) in hist.iter().enumerate() {
            sum += count;
            lut[i] = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
        }
        lut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_image_stays_uniform() {
        let img = GrayImage::from_pixel(64, 48, Luma([120]));
        let out = Clahe::new(2.0, 8).apply(&img);

        assert_eq!(out.dimensions(), (64, 48));
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn test_preserves_ordering_within_tile() {
        // Two levels inside one tile keep their order after equalization
        let img = GrayImage::from_fn(16, 16, |x, _| Luma([if x < 8 { 60 } else { 180 }]));
        let out = Clahe::new(2.0, 1).apply(&img);
        assert!(out.get_pixel(2, 2).0[0] < out.get_pixel(12, 2).0[0]);
    }

    #[test]
    fn test_small_image_fewer_pixels_than_tiles() {
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 50 + y * 20) as u8]));
        let out = Clahe::new(2.0, 8).apply(&img);
        assert_eq!(out.dimensions(), (3, 2));
    }
}
