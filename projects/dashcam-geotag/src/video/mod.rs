#[cfg(feature = "backend-ffmpeg")]
pub mod ffmpeg_reader;
#[cfg(feature = "backend-opencv")]
pub mod opencv_reader;
pub mod processor;

use anyhow::Result;
use image::RgbImage;
use std::path::Path;

/// Video-decode collaborator. Frames come back as packed RGB.
pub trait VideoReader {
    fn frame_count(&self) -> Result<usize>;
    fn source_fps(&self) -> Result<f64>;
    fn seek_to_frame(&mut self, frame_num: usize) -> Result<()>;
    /// Next frame in decode order, `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<RgbImage>>;
    /// Index of the frame `read_frame` will return next.
    fn position(&self) -> usize;

    /// Reads frame `frame_num`, skipping forward by decoding or seeking back.
    fn read_frame_at(&mut self, frame_num: usize) -> Result<Option<RgbImage>> {
        if frame_num < self.position() {
            self.seek_to_frame(frame_num)?;
        }
        while self.position() < frame_num {
            if self.read_frame()?.is_none() {
                return Ok(None);
            }
        }
        self.read_frame()
    }
}

/// Frame index of a decoded timestamp, counted from the stream's first
/// frame. Timestamps before the start clamp to frame 0.
pub fn frame_index_from_pts(pts: i64, start_pts: i64, time_base: f64, fps: f64) -> usize {
    let seconds = pts.saturating_sub(start_pts) as f64 * time_base;
    let index = (seconds * fps).round();
    if index.is_finite() && index > 0.0 {
        index as usize
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ffmpeg,
    Opencv,
}

/// Opens a reader with the requested backend, if it was compiled in.
pub fn open_reader(path: &Path, backend: Backend) -> Result<Box<dyn VideoReader>> {
    match backend {
        #[cfg(feature = "backend-ffmpeg")]
        Backend::Ffmpeg => Ok(Box::new(ffmpeg_reader::FfmpegReader::new(path)?)),
        #[cfg(feature = "backend-opencv")]
        Backend::Opencv => Ok(Box::new(opencv_reader::OpencvReader::new(path)?)),
        #[allow(unreachable_patterns)]
        other => Err(anyhow::anyhow!(
            "Video backend {:?} is not compiled in (enable the backend-{} feature) for {}",
            other,
            format!("{:?}", other).to_lowercase(),
            path.display()
        )),
    }
}
