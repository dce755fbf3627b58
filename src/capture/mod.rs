//! Frame acquisition seam, capture enhancement and board localisation.
//!
//! Camera drivers live outside this crate; anything that can hand over an
//! RGB frame implements [`FrameSource`].

pub mod board;
pub mod enhance;

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;

pub use board::{crop_to_board, detect_board, BoardRegion};
pub use enhance::enhance_image;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to load image {path:?}: {source}")]
    Load {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to save image {path:?}: {source}")]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Anything that produces board frames: a webcam driver, a file, a test double.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// Frame source backed by a single image file on disk.
pub struct ImageFileSource {
    path: PathBuf,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for ImageFileSource {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        if !self.path.exists() {
            return Err(CaptureError::Unavailable(format!(
                "capture file {:?} does not exist",
                self.path
            )));
        }
        load_image(&self.path)
    }
}

/// Decode any supported image file into RGB.
pub fn load_image(path: &Path) -> Result<RgbImage, CaptureError> {
    let img = image::open(path).map_err(|source| CaptureError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Loaded {:?}: {}x{}", path, img.width(), img.height());
    Ok(img.to_rgb8())
}

/// Grab a frame, optionally enhance it, and optionally save it as a snapshot.
pub fn capture_snapshot<S: FrameSource>(
    source: &mut S,
    enhance: bool,
    save_path: Option<&Path>,
) -> Result<RgbImage, CaptureError> {
    let frame = source.next_frame()?;
    let frame = if enhance { enhance_image(&frame) } else { frame };

    if let Some(path) = save_path {
        frame.save(path).map_err(|source| CaptureError::Save {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Snapshot saved to {:?}", path);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    struct FixedSource(RgbImage);

    impl FrameSource for FixedSource {
        fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_file_source_missing_file_is_unavailable() {
        let mut source = ImageFileSource::new("/nonexistent/frame.png");
        let err = source.next_frame().unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
    }

    #[test]
    fn test_file_source_reads_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        RgbImage::from_pixel(40, 30, Rgb([10, 200, 30]))
            .save(&path)
            .unwrap();

        let mut source = ImageFileSource::new(&path);
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.dimensions(), (40, 30));
        assert_eq!(frame.get_pixel(0, 0), &Rgb([10, 200, 30]));
    }

    #[test]
    fn test_capture_snapshot_saves_file() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("snap.png");
        let mut source = FixedSource(RgbImage::from_pixel(20, 20, Rgb([90, 90, 90])));

        let frame = capture_snapshot(&mut source, true, Some(&out)).unwrap();
        assert_eq!(frame.dimensions(), (20, 20));
        assert!(out.exists());
    }
}
