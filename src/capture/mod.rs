//! Image Input Layer
//!
//! Loads dial photographs from disk into immutable frames.

pub mod frame;

pub use frame::Frame;

use std::path::Path;
use tracing::debug;

use crate::error::{DialError, DialResult};

/// Decode an image file into a frame
pub fn load_frame(path: &Path) -> DialResult<Frame> {
    let img = image::open(path).map_err(|source| DialError::ImageRead {
        path: path.to_path_buf(),
        source,
    })?;

    let color = img.to_rgb8();
    debug!("Loaded {:?} ({}x{})", path, color.width(), color.height());

    Ok(Frame::new(color))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file() {
        let result = load_frame(Path::new("/nonexistent/HMS_0.jpg"));
        assert!(matches!(result, Err(DialError::ImageRead { .. })));
    }

    #[test]
    fn test_load_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dial.png");
        image::RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let frame = load_frame(&path).unwrap();
        assert_eq!(frame.dimensions(), (8, 6));
        assert_eq!(frame.color().get_pixel(0, 0).0, [10, 20, 30]);
    }
}
