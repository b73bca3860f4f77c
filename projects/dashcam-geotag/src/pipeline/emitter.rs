// Geotag emitter: mask and crop a decoded frame, stamp it, write it out

use crate::pipeline::crop::{apply_crop, apply_mask, CropMargins};
use crate::pipeline::exif::GeotagWriter;
use crate::pipeline::types::Geotag;
use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

pub struct FrameEmitter<W: GeotagWriter> {
    writer: W,
    output_dir: PathBuf,
    prefix: String,
    mask: Option<GrayImage>,
    crop: CropMargins,
    emitted: usize,
}

impl<W: GeotagWriter> FrameEmitter<W> {
    pub fn new(writer: W, output_dir: &Path, prefix: &str) -> Self {
        Self {
            writer,
            output_dir: output_dir.to_path_buf(),
            prefix: prefix.to_string(),
            mask: None,
            crop: CropMargins::default(),
            emitted: 0,
        }
    }

    pub fn with_mask(mut self, mask: Option<GrayImage>) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_crop(mut self, crop: CropMargins) -> Self {
        self.crop = crop;
        self
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Mask first, then crop.
    fn prepare(&self, mut frame: RgbImage) -> Result<RgbImage> {
        if let Some(mask) = &self.mask {
            apply_mask(&mut frame, mask);
        }
        if self.crop.is_empty() {
            Ok(frame)
        } else {
            apply_crop(&frame, &self.crop)
        }
    }

    /// Writes `<prefix><n>.jpg`, numbering emitted frames from zero.
    pub fn emit(&mut self, frame: RgbImage, geotag: &Geotag) -> Result<PathBuf> {
        let frame = self.prepare(frame)?;
        let bytes = self.writer.write_geotag(&frame, geotag)?;
        let path = self
            .output_dir
            .join(format!("{}{}.jpg", self.prefix, self.emitted));
        fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        self.emitted += 1;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::exif::ExifJpegWriter;
    use image::{Luma, Rgb};

    fn geotag() -> Geotag {
        Geotag {
            latitude: 1.0,
            longitude: 2.0,
            bearing: 3.0,
            timestamp: 1_600_000_000.0,
            speed: 4.0,
            make: "Viofo".into(),
            model: "A119 V3".into(),
        }
    }

    #[test]
    fn test_emit_numbers_files_and_applies_crop() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = FrameEmitter::new(ExifJpegWriter { quality: 90 }, dir.path(), "picture_")
            .with_mask(Some(GrayImage::from_pixel(4, 4, Luma([255]))))
            .with_crop(CropMargins {
                top: 2,
                ..Default::default()
            });

        let first = emitter
            .emit(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])), &geotag())
            .unwrap();
        let second = emitter
            .emit(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])), &geotag())
            .unwrap();

        assert_eq!(first, dir.path().join("picture_0.jpg"));
        assert_eq!(second, dir.path().join("picture_1.jpg"));
        assert_eq!(emitter.emitted(), 2);
        let written = image::open(&second).unwrap();
        assert_eq!((written.width(), written.height()), (8, 6));
    }

    #[test]
    fn test_failed_crop_does_not_consume_a_number() {
        let dir = tempfile::tempdir().unwrap();
        let mut emitter = FrameEmitter::new(ExifJpegWriter { quality: 90 }, dir.path(), "f")
            .with_crop(CropMargins {
                left: 10,
                ..Default::default()
            });
        assert!(emitter.emit(RgbImage::new(8, 8), &geotag()).is_err());
        assert_eq!(emitter.emitted(), 0);
    }
}
