use super::VideoReader;
use anyhow::{anyhow, Result};
use image::RgbImage;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_POS_FRAMES},
};
use std::path::Path;

pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
    total_frames: usize,
    position: usize,
}

impl OpencvReader {
    pub fn new(path: &Path) -> Result<Self> {
        let name = path
            .to_str()
            .ok_or_else(|| anyhow!("Non UTF-8 video path: {}", path.display()))?;
        let capture = VideoCapture::from_file(name, CAP_ANY)?;
        if !capture.is_opened()? {
            return Err(anyhow!("Failed to open video file: {}", path.display()));
        }

        let mut fps = capture.get(CAP_PROP_FPS)?;
        if fps <= 0.0 {
            tracing::warn!("OpencvReader: Failed to get FPS from metadata, falling back to 30.0");
            fps = 30.0;
        }
        let total_frames = capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, frames={}",
            path.display(),
            total_frames as f64 / fps,
            fps,
            total_frames
        );

        Ok(Self {
            capture,
            source_fps: fps,
            total_frames,
            position: 0,
        })
    }
}

/// Copies a BGR `Mat` into an owned RGB image.
fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let size = rgb.size()?;
    let (width, height) = (size.width as u32, size.height as u32);
    let bytes = if rgb.is_continuous() {
        rgb.data_bytes()?.to_vec()
    } else {
        let mut packed = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..size.height {
            let row = rgb.row(y)?;
            packed.extend_from_slice(row.data_bytes()?);
        }
        packed
    };
    RgbImage::from_raw(width, height, bytes).ok_or_else(|| anyhow!("Unexpected frame buffer size"))
}

impl VideoReader for OpencvReader {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.total_frames)
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.source_fps)
    }

    fn seek_to_frame(&mut self, frame_num: usize) -> Result<()> {
        self.capture.set(CAP_PROP_POS_FRAMES, frame_num as f64)?;
        self.position = frame_num;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        self.position += 1;
        mat_to_rgb(&frame).map(Some)
    }

    fn position(&self) -> usize {
        self.position
    }

    fn read_frame_at(&mut self, frame_num: usize) -> Result<Option<RgbImage>> {
        if frame_num < self.position {
            self.seek_to_frame(frame_num)?;
        }
        // grab() skips decoding into a Mat.
        while self.position < frame_num {
            if !self.capture.grab()? {
                return Ok(None);
            }
            self.position += 1;
        }
        self.read_frame()
    }
}
